//! # Policy Audit Agent
//!
//! Runs policy profiles against a local or remote target and reports
//! per-control results.
//!
//! ## Usage
//!
//! ```bash
//! # Audit the local machine
//! policy_agent profiles/linux-baseline
//!
//! # Audit a host over SSH, only the ssh-* controls
//! policy_agent --target "ssh://auditor@db01?key_file=~/.ssh/id_ed25519" \
//!     --controls '/^ssh-/' profiles/linux-baseline
//!
//! # Write the full result tree
//! policy_agent --format full -o results.json profiles/linux-baseline
//! ```
//!
//! ## Output Formats
//!
//! - **full** (default): Complete run tree with per-test results and code locations
//! - **summary**: Statistics and per-control status only
//!
//! ## Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | every executed control passed |
//! | 100 | at least one control failed |
//! | 101 | no failures, some controls skipped |
//! | 1 | run aborted (connection, dependency, platform) |
//! | 2 | usage or configuration error |

mod cli;
mod config;
mod output;
mod registry;
mod scanner;

use cli::{parse_args, CliResult};
use config::{EXIT_RUN_ERROR, EXIT_USAGE};
use policy_kit::logging;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let exit_code = match parse_args(&args) {
        CliResult::Help(text) => {
            print!("{}", text);
            0
        }
        CliResult::Error(msg) => {
            eprintln!("Error: {}", msg);
            EXIT_USAGE
        }
        CliResult::Run(config) => {
            if let Err(e) = logging::init_with_level(config.log_level) {
                eprintln!("Failed to initialize logging: {}", e);
                std::process::exit(EXIT_USAGE);
            }
            let quiet = config.quiet;
            let code = match scanner::run_scan(&config) {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    e.exit_code()
                }
            };
            if !quiet || code == EXIT_RUN_ERROR {
                logging::print_summary();
            }
            code
        }
    };

    std::process::exit(exit_code);
}
