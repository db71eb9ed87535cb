//! Core audit logic
//!
//! Runs the configured profiles, prints the console report and writes the
//! requested output file.

use std::fmt;
use std::sync::Arc;

use policy_kit::execution_api::Auditor;
use policy_kit::resources::registry::DuplicateResource;
use policy_kit::results::Statistics;
use policy_kit::transport::ConnectionManager;
use policy_kit::{log_error, log_info, AuditError, RunResult};

use crate::config::{AgentConfig, EXIT_FAILED, EXIT_PASSED, EXIT_RUN_ERROR, EXIT_SKIPPED, EXIT_USAGE};
use crate::output;
use crate::registry;

/// Run an audit with the given configuration
pub fn run_scan(config: &AgentConfig) -> Result<i32, ScanError> {
    let run = &config.run;
    log_info!("Starting audit", "target" => &run.target, "profiles" => run.profiles.len());
    if !config.quiet {
        println!();
        println!("Policy Audit Agent v{}", env!("CARGO_PKG_VERSION"));
        println!("Target: {}", run.target);
        println!();
    }

    let registry = registry::create_agent_registry().map_err(|e| {
        log_error!("Failed to create resource registry", "error" => &e);
        ScanError::Registry(e)
    })?;
    let auditor = Auditor::new(Arc::new(registry), ConnectionManager::new(run.connect_options()));

    let outcome = auditor.run(run);
    auditor.connections().close_all();
    let result = outcome.map_err(|e| {
        log_error!("Audit aborted", "error" => &e);
        ScanError::Audit(e)
    })?;

    if !config.quiet {
        output::print_results(&result);
    }

    if let Some(path) = &config.output_file {
        save_output(&result, config)?;
        if !config.quiet {
            println!("Results saved to: {} ({})", path.display(), config.format);
            println!();
        }
    }

    let stats = &result.statistics;
    log_info!("Audit completed",
        "controls" => stats.controls.total,
        "passed" => stats.controls.passed,
        "failed" => stats.controls.failed,
        "skipped" => stats.controls.skipped
    );
    Ok(exit_code(stats))
}

/// Exit status for a completed run
pub fn exit_code(stats: &Statistics) -> i32 {
    if stats.controls.failed > 0 {
        EXIT_FAILED
    } else if stats.controls.skipped > 0 {
        EXIT_SKIPPED
    } else {
        EXIT_PASSED
    }
}

fn save_output(result: &RunResult, config: &AgentConfig) -> Result<(), ScanError> {
    let Some(path) = &config.output_file else {
        return Ok(());
    };
    let json = output::build_output(result, config.format).map_err(ScanError::Output)?;
    std::fs::write(path, json).map_err(|e| ScanError::WriteFile(path.display().to_string(), e))
}

/// Errors that can occur while auditing
#[derive(Debug)]
pub enum ScanError {
    /// Failed to create registry
    Registry(DuplicateResource),
    /// Run-fatal audit error
    Audit(AuditError),
    /// Failed to generate output
    Output(output::OutputError),
    /// Failed to write output file
    WriteFile(String, std::io::Error),
}

impl ScanError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ScanError::Audit(AuditError::Config(_) | AuditError::InvalidControlFilter { .. }) => EXIT_USAGE,
            _ => EXIT_RUN_ERROR,
        }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Registry(e) => write!(f, "Registry creation failed: {}", e),
            ScanError::Audit(e) => write!(f, "{}", e),
            ScanError::Output(e) => write!(f, "Output generation failed: {}", e),
            ScanError::WriteFile(path, e) => write!(f, "Failed to write {}: {}", path, e),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScanError::Registry(e) => Some(e),
            ScanError::Audit(e) => Some(e),
            ScanError::Output(e) => Some(e),
            ScanError::WriteFile(_, e) => Some(e),
        }
    }
}
