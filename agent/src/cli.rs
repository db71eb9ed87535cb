//! Command-line interface parsing
//!
//! Arguments are declared with `clap` derive; [`parse_args`] turns them into
//! an [`AgentConfig`] merged over the optional `--config` file.

use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::Parser;
use log::LevelFilter;

use crate::config::{AgentConfig, OutputFormat};

/// CLI parsing result
pub enum CliResult {
    /// Run the audit with this configuration
    Run(Box<AgentConfig>),
    /// Help or version text to print before exiting successfully
    Help(String),
    /// Error with message
    Error(String),
}

/// Run policy profiles against a target
#[derive(Debug, Parser)]
#[command(name = "policy_agent", version, about, long_about = None)]
pub struct Cli {
    /// Profile directories to run
    #[arg(value_name = "PROFILE")]
    pub profiles: Vec<PathBuf>,

    /// Target locator (local://, ssh://user@host, docker://id, winrm://user@host, mock://)
    #[arg(short, long)]
    pub target: Option<String>,

    /// Control ids or /regex/ patterns to run; everything when omitted
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub controls: Vec<String>,

    /// Override a profile input, e.g. --input max_age=90
    #[arg(long = "input", value_name = "NAME=VALUE")]
    pub inputs: Vec<String>,

    /// Do not write a policy.lock
    #[arg(long)]
    pub no_create_lockfile: bool,

    /// Re-resolve dependencies and rewrite policy.lock
    #[arg(long)]
    pub update_lockfile: bool,

    /// Directory holding vendored dependency content
    #[arg(long, value_name = "DIR")]
    pub vendor_dir: Option<PathBuf>,

    /// TOML file providing defaults for every option
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Result format written to --output
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Full)]
    pub format: OutputFormat,

    /// Write results to this file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Suppress console output
    #[arg(short, long)]
    pub quiet: bool,

    /// Log level (error, warn, info, debug, trace); overrides RUST_LOG
    #[arg(long, value_name = "LEVEL", value_parser = parse_level)]
    pub log_level: Option<LevelFilter>,

    /// Per-command timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

fn parse_level(raw: &str) -> Result<LevelFilter, String> {
    raw.parse()
        .map_err(|_| format!("unknown log level '{}'", raw))
}

/// Parse command-line arguments
pub fn parse_args(args: &[String]) -> CliResult {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => CliResult::Help(e.to_string()),
                _ => CliResult::Error(e.to_string().trim_end().to_string()),
            }
        }
    };

    match AgentConfig::from_cli(cli) {
        Ok(config) => CliResult::Run(Box::new(config)),
        Err(msg) => CliResult::Error(msg),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("policy_agent")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    fn run(list: &[&str]) -> AgentConfig {
        match parse_args(&args(list)) {
            CliResult::Run(config) => *config,
            CliResult::Help(_) => panic!("unexpected help"),
            CliResult::Error(e) => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn test_parse_basic() {
        let config = run(&["profiles/base", "-t", "ssh://root@db01", "--controls", "/^db_/,web-1"]);
        assert_eq!(config.run.target, "ssh://root@db01");
        assert_eq!(config.run.profiles, vec![PathBuf::from("profiles/base")]);
        assert_eq!(config.run.controls, vec!["/^db_/", "web-1"]);
        assert_eq!(config.format, OutputFormat::Full);
        assert!(config.run.create_lockfile);
    }

    #[test]
    fn test_parse_lockfile_and_inputs() {
        let config = run(&[
            "p",
            "--no-create-lockfile",
            "--input",
            "max_age=90",
            "--input",
            "owner=root",
            "--format",
            "summary",
            "--log-level",
            "debug",
        ]);
        assert!(!config.run.create_lockfile);
        assert_eq!(config.run.inputs["max_age"], policy_kit::Value::Integer(90));
        assert_eq!(config.run.inputs["owner"], policy_kit::Value::from("root"));
        assert_eq!(config.format, OutputFormat::Summary);
        assert_eq!(config.log_level, Some(LevelFilter::Debug));
    }

    #[test]
    fn test_help() {
        assert!(matches!(parse_args(&args(&["--help"])), CliResult::Help(_)));
    }

    #[test]
    fn test_missing_profile_is_error() {
        assert!(matches!(parse_args(&args(&[])), CliResult::Error(_)));
    }

    #[test]
    fn test_bad_input_is_error() {
        assert!(matches!(parse_args(&args(&["p", "--input", "novalue"])), CliResult::Error(_)));
    }

    #[test]
    fn test_unknown_format_is_error() {
        assert!(matches!(parse_args(&args(&["p", "--format", "yaml"])), CliResult::Error(_)));
    }
}
