//! Local transport: commands run on the machine running the agent.

use std::io::ErrorKind;
use std::process::Command;
use std::time::Duration;

use super::process::{run_with_timeout, ProcessFailure};
use super::{CommandOutput, ShellKind, Transport};
use crate::error::ConnectionError;
use crate::log_debug;

const TARGET: &str = "local://";

/// Shell on the local host
#[derive(Debug, Clone)]
pub struct LocalTransport {
    shell: ShellKind,
    timeout: Duration,
}

impl LocalTransport {
    pub fn new(timeout: Duration) -> Self {
        let shell = if cfg!(windows) {
            ShellKind::PowerShell
        } else {
            ShellKind::Posix
        };
        Self { shell, timeout }
    }

    fn command(&self, script: &str) -> Command {
        match self.shell {
            ShellKind::Posix => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(script);
                cmd
            }
            ShellKind::PowerShell | ShellKind::Cmd => {
                let mut cmd = Command::new("powershell");
                cmd.args(["-NoProfile", "-NonInteractive", "-Command", script]);
                cmd
            }
        }
    }
}

impl Transport for LocalTransport {
    fn name(&self) -> &str {
        "local"
    }

    fn shell(&self) -> ShellKind {
        self.shell
    }

    fn run_command(&self, command: &str) -> Result<CommandOutput, ConnectionError> {
        let output = run_with_timeout(self.command(command), self.timeout).map_err(|e| match e {
            ProcessFailure::Spawn(e) => ConnectionError::Unreachable {
                target: TARGET.to_string(),
                reason: format!("cannot start shell: {}", e),
            },
            ProcessFailure::Io(e) => ConnectionError::Disconnected {
                target: TARGET.to_string(),
                reason: e.to_string(),
            },
            ProcessFailure::TimedOut => ConnectionError::Timeout {
                target: TARGET.to_string(),
                timeout_secs: self.timeout.as_secs(),
            },
        })?;

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_status: output.exit_status,
        })
    }

    fn read_file(&self, path: &str) -> Result<Option<String>, ConnectionError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => {
                log_debug!("Local file unreadable", "path" => path, "error" => e);
                Ok(None)
            }
        }
    }
}
