//! Resource registry and skip dispatch.
//!
//! Registration happens once at startup and the table is read-only during a
//! run. `instantiate` evaluates the platform predicate before any
//! resource-specific code, so an unsupported resource costs no transport
//! calls beyond the (cached) platform probe.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::{
    command, etc_hosts, file, json_config, kernel_module, os, policy_document, processes,
    security_policy, ConstructError, ConstructResult, ResourceInstance,
};
use crate::error::ConnectionError;
use crate::transport::{Connection, PlatformInfo};
use crate::value::Value;
use crate::{log_debug, log_warn};

/// Platform support predicate evaluated before construction
pub type PlatformPredicate = Box<dyn Fn(&PlatformInfo) -> bool + Send + Sync>;

/// Resource-specific constructor
pub type Constructor = Box<dyn Fn(&Value, &Arc<Connection>) -> ConstructResult + Send + Sync>;

/// Error registering a resource
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("resource '{0}' is already registered")]
pub struct DuplicateResource(pub String);

struct Registration {
    supports: PlatformPredicate,
    construct: Constructor,
}

/// Append-only table of resource names to constructors
#[derive(Default)]
pub struct ResourceRegistry {
    entries: HashMap<String, Registration>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource; names are unique for the life of the registry
    pub fn register(
        &mut self,
        name: impl Into<String>,
        supports: PlatformPredicate,
        construct: Constructor,
    ) -> Result<(), DuplicateResource> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(DuplicateResource(name));
        }
        self.entries.insert(name, Registration { supports, construct });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build a resource instance, deciding its terminal status
    ///
    /// Only a transport fault during construction is returned as an error;
    /// unknown names, bad parameters and constructor panics produce a
    /// `Failed` instance.
    pub fn instantiate(
        &self,
        name: &str,
        params: &Value,
        conn: &Arc<Connection>,
    ) -> Result<ResourceInstance, ConnectionError> {
        let Some(entry) = self.entries.get(name) else {
            return Ok(ResourceInstance::failed(
                name,
                params,
                format!("unknown resource '{}'", name),
            ));
        };

        let platform = conn.os();
        if !(entry.supports)(platform) {
            let reason = format!(
                "Resource `{}` is not supported on platform {}",
                name,
                platform_label(platform)
            );
            log_debug!("Resource skipped", "resource" => name, "platform" => platform);
            return Ok(ResourceInstance::skipped(name, params, reason));
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| (entry.construct)(params, conn)));
        match outcome {
            Ok(Ok(resource)) => Ok(ResourceInstance::active(name, params, resource)),
            Ok(Err(ConstructError::Skipped(reason))) => {
                log_debug!("Resource skipped by constructor", "resource" => name, "reason" => &reason);
                Ok(ResourceInstance::skipped(name, params, reason))
            }
            Ok(Err(ConstructError::Failed(error))) => {
                log_warn!("Resource construction failed", "resource" => name, "error" => &error);
                Ok(ResourceInstance::failed(name, params, error))
            }
            Ok(Err(ConstructError::Connection(e))) => Err(e),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                log_warn!("Resource constructor panicked", "resource" => name, "error" => &message);
                Ok(ResourceInstance::failed(name, params, message))
            }
        }
    }
}

fn platform_label(platform: &PlatformInfo) -> String {
    match &platform.release {
        Some(release) => format!("{}/{}", platform.name, release),
        None => platform.name.clone(),
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Common platform predicates
pub mod supports {
    use super::PlatformPredicate;

    pub fn any() -> PlatformPredicate {
        Box::new(|_| true)
    }

    pub fn linux() -> PlatformPredicate {
        Box::new(|p| p.is_linux())
    }

    pub fn unix() -> PlatformPredicate {
        Box::new(|p| p.is_unix())
    }

    pub fn windows() -> PlatformPredicate {
        Box::new(|p| p.is_windows())
    }

    /// Matches when the platform belongs to any of `families`
    pub fn families(families: &'static [&'static str]) -> PlatformPredicate {
        Box::new(move |p| families.iter().any(|f| p.is_family(f)))
    }
}

/// Create a registry with every bundled resource
///
/// Includes:
/// - Platform facts (`os`)
/// - Command output and file metadata (`command`, `file`)
/// - Linux kernel modules (`kernel_module`)
/// - Tabular resources (`processes`, `etc_hosts`)
/// - Structured documents (`json`, `policy_document`)
/// - Windows security policy (`security_policy`)
pub fn create_default_registry() -> Result<ResourceRegistry, DuplicateResource> {
    let mut registry = ResourceRegistry::new();

    registry.register("os", supports::any(), Box::new(os::construct))?;
    registry.register("command", supports::any(), Box::new(command::construct))?;
    registry.register("file", supports::any(), Box::new(file::construct))?;
    registry.register(
        "kernel_module",
        supports::linux(),
        Box::new(kernel_module::construct),
    )?;

    // Filter-table resources
    registry.register("processes", supports::unix(), Box::new(processes::construct))?;
    registry.register("etc_hosts", supports::any(), Box::new(etc_hosts::construct))?;

    // Structured documents
    registry.register("json", supports::any(), Box::new(json_config::construct))?;
    registry.register(
        "policy_document",
        supports::any(),
        Box::new(policy_document::construct),
    )?;

    registry.register(
        "security_policy",
        supports::windows(),
        Box::new(security_policy::construct),
    )?;

    Ok(registry)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{skip, ResourceStatus};
    use crate::transport::mock::MockTransport;
    use crate::transport::TargetDescriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn connection(mock: &MockTransport) -> Arc<Connection> {
        Arc::new(Connection::new(
            TargetDescriptor::parse("mock://").unwrap(),
            Box::new(mock.clone()),
        ))
    }

    #[test]
    fn test_unsupported_platform_skips_without_constructor() {
        let mock = MockTransport::new().with_platform(PlatformInfo::new("windows", "windows"));
        let conn = connection(&mock);
        conn.os();
        mock.reset_calls();

        let constructed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&constructed);
        let mut registry = ResourceRegistry::new();
        registry
            .register(
                "linux_only",
                supports::linux(),
                Box::new(move |_, conn| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    conn.run("lsmod")?;
                    Err(skip("unreachable"))
                }),
            )
            .unwrap();

        let instance = registry.instantiate("linux_only", &Value::Null, &conn).unwrap();
        assert_eq!(
            instance.status(),
            &ResourceStatus::Skipped("Resource `linux_only` is not supported on platform windows".into())
        );
        assert_eq!(constructed.load(Ordering::SeqCst), 0);
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn test_constructor_may_skip() {
        let mock = MockTransport::new().with_platform(PlatformInfo::new("ubuntu", "debian"));
        let mut registry = ResourceRegistry::new();
        registry
            .register("helper", supports::any(), Box::new(|_, _| Err(skip("helper binary missing"))))
            .unwrap();
        let instance = registry.instantiate("helper", &Value::Null, &connection(&mock)).unwrap();
        assert_eq!(instance.skip_reason(), Some("helper binary missing"));
    }

    #[test]
    fn test_constructor_panic_becomes_failed() {
        let mock = MockTransport::new();
        let mut registry = ResourceRegistry::new();
        registry
            .register("boom", supports::any(), Box::new(|_, _| panic!("constructor exploded")))
            .unwrap();
        let instance = registry.instantiate("boom", &Value::Null, &connection(&mock)).unwrap();
        assert_eq!(instance.status(), &ResourceStatus::Failed("constructor exploded".into()));
    }

    #[test]
    fn test_connection_fault_aborts() {
        let mock = MockTransport::new().with_platform(PlatformInfo::new("ubuntu", "debian"));
        let conn = connection(&mock);
        conn.os();
        let mock = mock.failing(ConnectionError::Disconnected {
            target: "mock://".into(),
            reason: "gone".into(),
        });
        let mut registry = ResourceRegistry::new();
        registry
            .register(
                "remote",
                supports::any(),
                Box::new(|_, conn| {
                    conn.run("id")?;
                    Err(skip("never"))
                }),
            )
            .unwrap();
        assert!(registry.instantiate("remote", &Value::Null, &conn).is_err());
        drop(mock);
    }

    #[test]
    fn test_unknown_resource_is_failed_instance() {
        let registry = create_default_registry().unwrap();
        let instance = registry
            .instantiate("no_such_thing", &Value::Null, &connection(&MockTransport::new()))
            .unwrap();
        assert!(matches!(instance.status(), ResourceStatus::Failed(_)));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = create_default_registry().unwrap();
        let err = registry
            .register("file", supports::any(), Box::new(|_, _| Err(skip("x"))))
            .unwrap_err();
        assert_eq!(err, DuplicateResource("file".into()));
        assert!(registry.names().contains(&"security_policy"));
    }
}
