//! `security_policy`: the local security policy of a Windows host.
//!
//! The policy is exported with `secedit` on first property access and cached
//! for the lifetime of this instance only. Two instances bound to different
//! connections never see each other's export.
//!
//! | Section | Example key | Value |
//! |---------|-------------|-------|
//! | `[System Access]` | `MinimumPasswordAge` | integer |
//! | `[Event Audit]` | `AuditLogonEvents` | integer |
//! | `[Privilege Rights]` | `SeRemoteShutdownPrivilege` | list of SIDs |
//!
//! Keys are matched case-insensitively.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use super::{ConstructResult, Resource, StructuredConfig};
use crate::error::AssertionError;
use crate::transport::Connection;
use crate::value::Value;
use crate::log_debug;

const EXPORT_SCRIPT: &str = "$cfg = Join-Path $env:TEMP 'policy_kit_secpol.cfg'; \
     secedit /export /cfg $cfg | Out-Null; \
     Get-Content $cfg; \
     Remove-Item $cfg -Force -ErrorAction SilentlyContinue";

const PRIVILEGE_SECTION: &str = "privilege rights";

pub struct SecurityPolicyResource {
    conn: Arc<Connection>,
    policy: OnceLock<Result<Value, AssertionError>>,
}

pub fn construct(_params: &Value, conn: &Arc<Connection>) -> ConstructResult {
    Ok(Box::new(SecurityPolicyResource {
        conn: Arc::clone(conn),
        policy: OnceLock::new(),
    }))
}

impl SecurityPolicyResource {
    fn policy(&self) -> Result<&Value, AssertionError> {
        self.policy
            .get_or_init(|| self.export())
            .as_ref()
            .map_err(Clone::clone)
    }

    fn export(&self) -> Result<Value, AssertionError> {
        let output = self.conn.run(EXPORT_SCRIPT)?;
        if !output.success() {
            return Err(AssertionError::Accessor {
                property: "security_policy".to_string(),
                reason: format!(
                    "secedit export exited with {}: {}",
                    output.exit_status,
                    output.stderr.trim()
                ),
            });
        }
        let policy = parse_policy(&output.stdout);
        log_debug!("Security policy exported", "target" => self.conn.target(), "keys" => policy.len());
        Ok(Value::Map(policy))
    }
}

/// Parse secedit's INI export into lowercase keys
pub fn parse_policy(text: &str) -> BTreeMap<String, Value> {
    let mut policy = BTreeMap::new();
    let mut section = String::new();

    for line in text.lines() {
        let line = line.trim_start_matches('\u{feff}').trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = name.trim().to_ascii_lowercase();
            continue;
        }
        let Some((key, raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let raw = raw.trim();

        let value = if section == PRIVILEGE_SECTION {
            Value::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(Value::from)
                    .collect(),
            )
        } else if let Ok(n) = raw.parse::<i64>() {
            Value::Integer(n)
        } else {
            Value::from(raw.trim_matches('"'))
        };
        policy.insert(key, value);
    }
    policy
}

impl StructuredConfig for SecurityPolicyResource {
    fn document(&self) -> &Value {
        // Only called after a successful export
        self.policy
            .get()
            .and_then(|p| p.as_ref().ok())
            .unwrap_or(&Value::Null)
    }
}

impl Resource for SecurityPolicyResource {
    fn describe(&self) -> String {
        "Security Policy".to_string()
    }

    fn exists(&self) -> Result<bool, AssertionError> {
        Ok(!self.policy()?.is_empty())
    }

    fn get(&self, property: &str) -> Result<Value, AssertionError> {
        self.policy()?;
        Ok(self.lookup(&property.to_ascii_lowercase()))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::transport::{PlatformInfo, ShellKind, TargetDescriptor};

    const EXPORT: &str = "\u{feff}[Unicode]\r\nUnicode=yes\r\n[System Access]\r\n\
MinimumPasswordAge = 1\r\nMaximumPasswordAge = 42\r\nNewAdministratorName = \"Administrator\"\r\n\
[Privilege Rights]\r\nSeRemoteShutdownPrivilege = *S-1-5-32-544\r\n\
SeBackupPrivilege = *S-1-5-32-544,*S-1-5-32-551\r\n";

    fn windows_mock() -> MockTransport {
        MockTransport::new()
            .with_platform(PlatformInfo::new("windows", "windows"))
            .with_shell(ShellKind::PowerShell)
    }

    fn resource(mock: &MockTransport) -> Box<dyn Resource> {
        let conn = Arc::new(Connection::new(
            TargetDescriptor::parse("mock://").unwrap(),
            Box::new(mock.clone()),
        ));
        construct(&Value::Null, &conn).ok().unwrap()
    }

    #[test]
    fn test_parse_sections() {
        let policy = parse_policy(EXPORT);
        assert_eq!(policy["minimumpasswordage"], Value::Integer(1));
        assert_eq!(policy["newadministratorname"], Value::from("Administrator"));
        assert_eq!(
            policy["sebackupprivilege"],
            Value::from(vec!["*S-1-5-32-544", "*S-1-5-32-551"])
        );
    }

    #[test]
    fn test_export_runs_once_per_instance() {
        let mock = windows_mock().with_command(EXPORT_SCRIPT, EXPORT, 0);
        let policy = resource(&mock);
        assert_eq!(policy.get("MaximumPasswordAge").unwrap(), Value::Integer(42));
        assert_eq!(policy.get("minimumpasswordage").unwrap(), Value::Integer(1));
        assert_eq!(policy.get("NoSuchSetting").unwrap(), Value::Null);
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn test_instances_do_not_share_cache() {
        let mock = windows_mock().with_command(EXPORT_SCRIPT, EXPORT, 0);
        resource(&mock).get("MinimumPasswordAge").unwrap();
        resource(&mock).get("MinimumPasswordAge").unwrap();
        assert_eq!(mock.call_count(), 2);
    }

    #[test]
    fn test_failed_export_is_accessor_error() {
        let mock = windows_mock().with_output(
            EXPORT_SCRIPT,
            crate::transport::CommandOutput::new("", "Access is denied.", 1),
        );
        let err = resource(&mock).get("MinimumPasswordAge").unwrap_err();
        assert!(matches!(err, AssertionError::Accessor { .. }));
    }
}
