//! Output generation module
//!
//! Provides builders for the result formats:
//! - Full run tree (JSON)
//! - Summary (statistics and per-control status, JSON)
//! - Console (human-readable)
//!
//! Both JSON formats share one envelope naming the agent and the run.

mod console;
mod full;
mod summary;

pub use console::print_results;
pub use full::build_full_result;
pub use summary::build_summary;

use policy_kit::RunResult;

use crate::config::OutputFormat;

/// Build output in the specified format
pub fn build_output(result: &RunResult, format: OutputFormat) -> Result<String, OutputError> {
    let value = match format {
        OutputFormat::Full => build_full_result(result)?,
        OutputFormat::Summary => build_summary(result),
    };
    serde_json::to_string_pretty(&value).map_err(|e| OutputError::Serialization(e.to_string()))
}

/// Agent and run identification shared by the JSON formats
fn envelope(result: &RunResult) -> serde_json::Value {
    serde_json::json!({
        "agent": {
            "name": "policy_agent",
            "version": env!("CARGO_PKG_VERSION")
        },
        "run_id": result.run_id,
        "started_at": result.started_at.to_rfc3339(),
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "target": result.target,
        "platform": result.platform,
    })
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur during output generation
#[derive(Debug)]
pub enum OutputError {
    /// Failed to build result
    Build(String),
    /// Failed to serialize result
    Serialization(String),
}

impl std::fmt::Display for OutputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputError::Build(msg) => write!(f, "Failed to build output: {}", msg),
            OutputError::Serialization(msg) => write!(f, "Failed to serialize output: {}", msg),
        }
    }
}

impl std::error::Error for OutputError {}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::time::Duration;

    use policy_kit::profile::{CodeLocation, Control};
    use policy_kit::results::{ControlResult, ProfileResult, TestResult, TestStatus};
    use policy_kit::transport::PlatformInfo;
    use policy_kit::RunResult;

    fn control(id: &str, statuses: &[TestStatus]) -> ControlResult {
        let location = CodeLocation::new("controls/base.toml", 2);
        let control = Control {
            id: id.to_string(),
            title: Some(format!("{} title", id)),
            desc: None,
            impact: 0.5,
            tags: Default::default(),
            tests: Vec::new(),
            location: location.clone(),
        };
        let results = statuses
            .iter()
            .map(|s| TestResult::new(*s, format!("File /etc/{} should exist", id), "file", &location))
            .collect();
        ControlResult::new(&control, results)
    }

    /// One passed, one failed and one skipped control
    pub fn run_result() -> RunResult {
        let profile = ProfileResult {
            name: "base".into(),
            version: "1.0.0".into(),
            title: None,
            parent: None,
            controls: vec![
                control("pass-01", &[TestStatus::Passed]),
                control("fail-01", &[TestStatus::Passed, TestStatus::Failed]),
                control("skip-01", &[TestStatus::Skipped]),
            ],
        };
        RunResult::new(
            "mock://",
            PlatformInfo::for_name("ubuntu"),
            chrono::Utc::now(),
            vec![profile],
            Duration::from_millis(40),
        )
    }
}
