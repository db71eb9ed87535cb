//! Container transport over `docker exec`.
//!
//! `docker://<container>[?user=name&shell=powershell]`. Connecting checks
//! that the container exists and is running.

use std::process::Command;
use std::time::Duration;

use super::process::{run_with_timeout, ProcessFailure};
use super::ssh::shell_option;
use super::{CommandOutput, ConnectOptions, ShellKind, TargetDescriptor, Transport};
use crate::error::{ConfigurationError, ConnectionError, TransportError};

/// `docker exec` into one running container
#[derive(Debug)]
pub struct DockerTransport {
    container: String,
    user: Option<String>,
    shell: ShellKind,
    label: String,
    timeout: Duration,
}

impl DockerTransport {
    pub fn connect(target: &TargetDescriptor, options: &ConnectOptions) -> Result<Self, TransportError> {
        let container = target
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigurationError::new(target.to_string(), "docker target requires a container id or name"))?
            .to_string();

        let transport = Self {
            container,
            user: target.option("user").or(target.user()).map(str::to_string),
            shell: shell_option(target)?,
            label: target.to_string(),
            timeout: options.command_timeout,
        };
        transport.ensure_running()?;
        Ok(transport)
    }

    fn ensure_running(&self) -> Result<(), ConnectionError> {
        let mut cmd = Command::new("docker");
        cmd.args(["inspect", "-f", "{{.State.Running}}", &self.container]);
        let output = self.execute(cmd)?;
        if output.exit_status != 0 {
            return Err(ConnectionError::Unreachable {
                target: self.label.clone(),
                reason: output.stderr.trim().to_string(),
            });
        }
        if output.stdout.trim() != "true" {
            return Err(ConnectionError::Unreachable {
                target: self.label.clone(),
                reason: format!("container {} is not running", self.container),
            });
        }
        Ok(())
    }

    fn exec_command(&self, command: &str) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("exec");
        if let Some(user) = &self.user {
            cmd.args(["-u", user]);
        }
        cmd.arg(&self.container);
        match self.shell {
            ShellKind::Posix => cmd.args(["sh", "-c", command]),
            ShellKind::PowerShell => cmd.args(["powershell", "-NoProfile", "-Command", command]),
            ShellKind::Cmd => cmd.args(["cmd", "/c", command]),
        };
        cmd
    }

    fn execute(&self, cmd: Command) -> Result<super::process::ProcessOutput, ConnectionError> {
        run_with_timeout(cmd, self.timeout).map_err(|e| match e {
            ProcessFailure::Spawn(e) => ConnectionError::Unreachable {
                target: self.label.clone(),
                reason: format!("docker CLI not available: {}", e),
            },
            ProcessFailure::Io(e) => ConnectionError::Disconnected {
                target: self.label.clone(),
                reason: e.to_string(),
            },
            ProcessFailure::TimedOut => ConnectionError::Timeout {
                target: self.label.clone(),
                timeout_secs: self.timeout.as_secs(),
            },
        })
    }
}

/// `docker exec` reports daemon-side failures on stderr with this prefix
fn is_daemon_error(stderr: &str) -> bool {
    stderr.trim_start().starts_with("Error response from daemon")
}

impl Transport for DockerTransport {
    fn name(&self) -> &str {
        "docker"
    }

    fn shell(&self) -> ShellKind {
        self.shell
    }

    fn run_command(&self, command: &str) -> Result<CommandOutput, ConnectionError> {
        let output = self.execute(self.exec_command(command))?;
        if output.exit_status != 0 && is_daemon_error(&output.stderr) {
            return Err(ConnectionError::Disconnected {
                target: self.label.clone(),
                reason: output.stderr.trim().to_string(),
            });
        }
        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_status: output.exit_status,
        })
    }
}
