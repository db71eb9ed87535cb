//! `command`: output of one command on the target.
//!
//! The command runs at most once, on first access to `stdout`, `stderr` or
//! `exit_status`. `exists` asks the shell whether the program resolves.

use std::sync::{Arc, OnceLock};

use super::{required_param, ConstructResult, Resource};
use crate::error::{AssertionError, ConnectionError};
use crate::transport::{CommandOutput, Connection, ShellKind};
use crate::value::Value;

pub struct CommandResource {
    conn: Arc<Connection>,
    command: String,
    output: OnceLock<Result<CommandOutput, ConnectionError>>,
}

pub fn construct(params: &Value, conn: &Arc<Connection>) -> ConstructResult {
    let command = required_param("command", params, "command")?;
    Ok(Box::new(CommandResource {
        conn: Arc::clone(conn),
        command,
        output: OnceLock::new(),
    }))
}

impl CommandResource {
    fn output(&self) -> Result<&CommandOutput, AssertionError> {
        self.output
            .get_or_init(|| self.conn.run(&self.command))
            .as_ref()
            .map_err(|e| AssertionError::Connection(e.clone()))
    }

    fn program(&self) -> &str {
        self.command.split_whitespace().next().unwrap_or_default()
    }
}

impl Resource for CommandResource {
    fn describe(&self) -> String {
        format!("Command: `{}`", self.command)
    }

    fn exists(&self) -> Result<bool, AssertionError> {
        let program = self.conn.quote(self.program());
        let probe = match self.conn.shell() {
            ShellKind::Posix => format!("command -v {}", program),
            ShellKind::PowerShell | ShellKind::Cmd => {
                format!("Get-Command {} -ErrorAction Stop", program)
            }
        };
        Ok(self.conn.run(&probe)?.success())
    }

    fn get(&self, property: &str) -> Result<Value, AssertionError> {
        Ok(match property {
            "stdout" => Value::from(self.output()?.stdout.as_str()),
            "stderr" => Value::from(self.output()?.stderr.as_str()),
            "exit_status" => Value::Integer(i64::from(self.output()?.exit_status)),
            _ => Value::Null,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::transport::TargetDescriptor;

    fn resource(mock: &MockTransport, command: &str) -> Box<dyn Resource> {
        let conn = Arc::new(Connection::new(
            TargetDescriptor::parse("mock://").unwrap(),
            Box::new(mock.clone()),
        ));
        construct(&Value::from(command), &conn).ok().unwrap()
    }

    #[test]
    fn test_runs_once_for_all_properties() {
        let mock = MockTransport::new().with_command("sysctl -n net.ipv4.ip_forward", "0\n", 0);
        let cmd = resource(&mock, "sysctl -n net.ipv4.ip_forward");
        assert_eq!(cmd.get("stdout").unwrap(), Value::from("0\n"));
        assert_eq!(cmd.get("exit_status").unwrap(), Value::Integer(0));
        assert_eq!(cmd.get("stderr").unwrap(), Value::from(""));
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn test_exists_probes_program() {
        let mock = MockTransport::new().with_command("command -v sysctl", "/usr/sbin/sysctl\n", 0);
        assert!(resource(&mock, "sysctl -a").exists().unwrap());
        assert!(!resource(&mock, "nope --version").exists().unwrap());
    }

    #[test]
    fn test_constructor_needs_command() {
        let conn = Arc::new(Connection::new(
            TargetDescriptor::parse("mock://").unwrap(),
            Box::new(MockTransport::new()),
        ));
        assert!(construct(&Value::Null, &conn).is_err());
    }
}
