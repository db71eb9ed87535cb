//! `kernel_module`: state of a Linux kernel module.
//!
//! Properties: `loaded`, `disabled`, `disabled_via_bin_true`,
//! `disabled_via_bin_false`, `blacklisted`, `version`.
//! Registered for Linux only; elsewhere the instance is skipped before
//! this constructor runs.

use std::sync::{Arc, OnceLock};

use regex::Regex;

use super::{required_param, ConstructError, ConstructResult, Resource};
use crate::error::{AssertionError, ConnectionError};
use crate::transport::Connection;
use crate::value::Value;

pub struct KernelModuleResource {
    conn: Arc<Connection>,
    module: String,
    /// Red Hat keeps the module tools in /sbin, outside a plain user's PATH
    sbin_prefix: &'static str,
    modprobe_config: OnceLock<Result<String, ConnectionError>>,
}

pub fn construct(params: &Value, conn: &Arc<Connection>) -> ConstructResult {
    let module = required_param("kernel_module", params, "name")?;
    if !module
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ConstructError::Failed(format!("invalid module name '{}'", module)));
    }

    let platform = conn.os();
    let sbin_prefix = if platform.is_family("redhat") || platform.name == "fedora" {
        "/sbin/"
    } else {
        ""
    };

    Ok(Box::new(KernelModuleResource {
        conn: Arc::clone(conn),
        module,
        sbin_prefix,
        modprobe_config: OnceLock::new(),
    }))
}

impl KernelModuleResource {
    fn loaded(&self) -> Result<bool, AssertionError> {
        let output = self.conn.run(&format!("{}lsmod", self.sbin_prefix))?;
        if !output.success() {
            return Ok(false);
        }
        // lsmod reports names with underscores
        let name = self.module.replace('-', "_");
        Ok(output
            .stdout
            .lines()
            .filter_map(|l| l.split_whitespace().next())
            .any(|m| m == name))
    }

    fn modprobe_config(&self) -> Result<&str, AssertionError> {
        self.modprobe_config
            .get_or_init(|| {
                self.conn
                    .run(&format!("{}modprobe --showconfig", self.sbin_prefix))
                    .map(|o| o.stdout)
            })
            .as_deref()
            .map_err(|e| AssertionError::Connection(e.clone()))
    }

    fn config_matches(&self, pattern: &str) -> Result<bool, AssertionError> {
        let re = Regex::new(&format!(
            "(?m)^{}",
            pattern.replace("{module}", &regex::escape(&self.module))
        ))
        .map_err(|e| AssertionError::Invalid(e.to_string()))?;
        Ok(re.is_match(self.modprobe_config()?))
    }

    fn version(&self) -> Result<Value, AssertionError> {
        let output = self.conn.run(&format!(
            "{}modinfo -F version {}",
            self.sbin_prefix,
            self.conn.quote(&self.module)
        ))?;
        Ok(if output.success() {
            Value::from(output.stdout.trim())
        } else {
            Value::Null
        })
    }
}

impl Resource for KernelModuleResource {
    fn describe(&self) -> String {
        format!("Kernel Module {}", self.module)
    }

    fn exists(&self) -> Result<bool, AssertionError> {
        self.loaded()
    }

    fn get(&self, property: &str) -> Result<Value, AssertionError> {
        Ok(match property {
            "loaded" => Value::from(self.loaded()?),
            "disabled" => Value::from(self.config_matches(r"install\s+{module}\s+/s?bin/(true|false)")?),
            "disabled_via_bin_true" => Value::from(self.config_matches(r"install\s+{module}\s+/s?bin/true")?),
            "disabled_via_bin_false" => {
                Value::from(self.config_matches(r"install\s+{module}\s+/s?bin/false")?)
            }
            "blacklisted" => Value::from(self.config_matches(r"blacklist\s+{module}\b")?),
            "version" => self.version()?,
            _ => Value::Null,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::transport::{PlatformInfo, TargetDescriptor};

    const LSMOD: &str = "Module                  Size  Used by\nbridge                151336  0\nvideo                  45056  1 i915\n";
    const SHOWCONFIG: &str = "blacklist floppy\ninstall sstfb /bin/false\ninstall nvidiafb /bin/true\n";

    fn resource(platform: PlatformInfo, module: &str, mock: MockTransport) -> Box<dyn Resource> {
        let mock = mock.with_platform(platform);
        let conn = Arc::new(Connection::new(
            TargetDescriptor::parse("mock://").unwrap(),
            Box::new(mock),
        ));
        construct(&Value::from(module), &conn).ok().unwrap()
    }

    fn ubuntu() -> MockTransport {
        MockTransport::new()
            .with_command("lsmod", LSMOD, 0)
            .with_command("modprobe --showconfig", SHOWCONFIG, 0)
            .with_command("modinfo -F version video", "\n", 0)
    }

    #[test]
    fn test_loaded() {
        let platform = PlatformInfo::new("ubuntu", "debian");
        assert!(resource(platform.clone(), "bridge", ubuntu()).exists().unwrap());
        assert_eq!(
            resource(platform, "floppy", ubuntu()).get("loaded").unwrap(),
            Value::Boolean(false)
        );
    }

    #[test]
    fn test_disabled_and_blacklisted() {
        let platform = PlatformInfo::new("ubuntu", "debian");
        let sstfb = resource(platform.clone(), "sstfb", ubuntu());
        assert_eq!(sstfb.get("disabled").unwrap(), Value::Boolean(true));
        assert_eq!(sstfb.get("disabled_via_bin_false").unwrap(), Value::Boolean(true));
        assert_eq!(sstfb.get("disabled_via_bin_true").unwrap(), Value::Boolean(false));

        let floppy = resource(platform, "floppy", ubuntu());
        assert_eq!(floppy.get("blacklisted").unwrap(), Value::Boolean(true));
        assert_eq!(floppy.get("disabled").unwrap(), Value::Boolean(false));
    }

    #[test]
    fn test_redhat_uses_sbin() {
        let mock = MockTransport::new().with_command("/sbin/lsmod", LSMOD, 0);
        let module = resource(PlatformInfo::new("centos", "redhat"), "bridge", mock);
        assert_eq!(module.get("loaded").unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_invalid_module_name_fails_construction() {
        let conn = Arc::new(Connection::new(
            TargetDescriptor::parse("mock://").unwrap(),
            Box::new(MockTransport::new()),
        ));
        assert!(matches!(
            construct(&Value::from("x; rm -rf /"), &conn),
            Err(ConstructError::Failed(_))
        ));
    }
}
