//! Configuration types for the agent
//!
//! The library's [`RunConfig`] carries everything the audit needs; the
//! agent adds output and verbosity settings on top of it.

use std::fmt;
use std::path::PathBuf;

use clap::ValueEnum;
use log::LevelFilter;
use policy_kit::{RunConfig, Value};

use crate::cli::Cli;

/// Every executed control passed
pub const EXIT_PASSED: i32 = 0;
/// Run aborted by a connection, dependency or platform error
pub const EXIT_RUN_ERROR: i32 = 1;
/// Bad arguments or configuration file
pub const EXIT_USAGE: i32 = 2;
/// At least one control failed
pub const EXIT_FAILED: i32 = 100;
/// No failures but some controls were skipped
pub const EXIT_SKIPPED: i32 = 101;

/// Output format for results written with `--output`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Complete run tree
    Full,
    /// Statistics and per-control status
    Summary,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Full => write!(f, "full"),
            OutputFormat::Summary => write!(f, "summary"),
        }
    }
}

/// Configuration for one agent invocation
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub run: RunConfig,

    /// Output file path (None means console-only output)
    pub output_file: Option<PathBuf>,

    pub format: OutputFormat,

    /// Suppress console output
    pub quiet: bool,

    pub log_level: Option<LevelFilter>,
}

impl AgentConfig {
    /// Merge parsed arguments over the `--config` file, if any
    pub fn from_cli(cli: Cli) -> Result<Self, String> {
        let mut run = match &cli.config {
            Some(path) => RunConfig::from_file(path).map_err(|e| e.to_string())?,
            None => RunConfig::default(),
        };

        if let Some(target) = cli.target {
            run.target = target;
        }
        if !cli.profiles.is_empty() {
            run.profiles = cli.profiles;
        }
        if !cli.controls.is_empty() {
            run.controls = cli.controls;
        }
        for raw in &cli.inputs {
            let (name, value) = parse_input(raw)?;
            run.inputs.insert(name, value);
        }
        if cli.no_create_lockfile {
            run.create_lockfile = false;
        }
        if cli.update_lockfile {
            run.update_lockfile = true;
        }
        if let Some(secs) = cli.timeout {
            run.command_timeout_secs = secs;
        }
        if cli.vendor_dir.is_some() {
            run.vendor_dir = cli.vendor_dir;
        }
        run.validate().map_err(|e| e.to_string())?;

        Ok(Self {
            run,
            output_file: cli.output,
            format: cli.format,
            quiet: cli.quiet,
            log_level: cli.log_level,
        })
    }
}

/// `name=value`; the value is read as a TOML literal, falling back to a string
fn parse_input(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .filter(|(name, _)| !name.trim().is_empty())
        .ok_or_else(|| format!("--input expects NAME=VALUE, got '{}'", raw))?;

    let parsed = toml::from_str::<toml::Table>(&format!("v = {}", value))
        .ok()
        .and_then(|mut table| table.remove("v"))
        .map(Value::from)
        .unwrap_or_else(|| Value::from(value));
    Ok((name.trim().to_string(), parsed))
}
