//! # Resources
//!
//! Semantic adapters exposing target state through a [`Connection`].
//!
//! A resource is built once per test block by the [`ResourceRegistry`] and
//! ends up in exactly one terminal state:
//!
//! ```text
//! Unconstructed ─┬─> Active
//!                ├─> Skipped(reason)   platform gate or constructor decision
//!                └─> Failed(error)     constructor error or panic
//! ```
//!
//! Skipped and failed instances answer every accessor with a neutral value
//! (`Null`, `false`, empty table) instead of raising.
//!
//! ## Bundled adapters
//!
//! | Name | Platforms | Kind |
//! |------|-----------|------|
//! | `os` | all | platform facts |
//! | `command` | all | command output |
//! | `file` | all | file metadata and content |
//! | `kernel_module` | linux | module state |
//! | `processes` | unix | filter table |
//! | `etc_hosts` | all | filter table |
//! | `json` | all | structured config |
//! | `security_policy` | windows | exported security policy |
//! | `policy_document` | all | JSON policy statements |

pub mod command;
pub mod etc_hosts;
pub mod file;
pub mod json_config;
pub mod kernel_module;
pub mod os;
pub mod policy_document;
pub mod processes;
pub mod registry;
pub mod security_policy;

pub use registry::{create_default_registry, supports, ResourceRegistry};

use std::fmt;

use crate::error::{AssertionError, ConnectionError};
use crate::filter_table::DynTable;
use crate::value::Value;

// ============================================================================
// Resource contract
// ============================================================================

/// A constructed resource bound to one connection
pub trait Resource: Send + Sync {
    /// Human-readable description, used as the default test title
    fn describe(&self) -> String;

    /// Existence-style predicate (`should exist`)
    fn exists(&self) -> Result<bool, AssertionError>;

    /// Property lookup; properties the resource doesn't know are `Null`
    fn get(&self, property: &str) -> Result<Value, AssertionError>;

    /// Tabular view for `where` conditions, when the resource is list-style
    fn table(&self) -> Option<Result<Box<dyn DynTable>, AssertionError>> {
        None
    }

    /// Resource-specific matcher (`have_statement`, ...); `None` when unknown
    fn matches(&self, _matcher: &str, _args: &Value) -> Option<Result<bool, AssertionError>> {
        None
    }
}

/// Resources backed by one parsed document
///
/// `get` walks dotted paths into the document, so `a.b.0` reaches into
/// nested maps and lists.
pub trait StructuredConfig {
    fn document(&self) -> &Value;

    fn lookup(&self, path: &str) -> Value {
        self.document().get_path(path)
    }
}

/// Why a constructor did not produce an active resource
#[derive(Debug)]
pub enum ConstructError {
    /// Not applicable on this target; becomes a `Skipped` instance
    Skipped(String),
    /// Invalid parameters or unusable data; becomes a `Failed` instance
    Failed(String),
    /// Transport fault; aborts the run
    Connection(ConnectionError),
}

impl From<ConnectionError> for ConstructError {
    fn from(e: ConnectionError) -> Self {
        ConstructError::Connection(e)
    }
}

pub type ConstructResult = Result<Box<dyn Resource>, ConstructError>;

/// Declare the instance skipped; constructors `return Err(skip(..))`
pub fn skip(reason: impl Into<String>) -> ConstructError {
    ConstructError::Skipped(reason.into())
}

/// String parameter: the parameter itself when scalar, else the named key
pub fn param(params: &Value, key: &str) -> Option<String> {
    match params {
        Value::String(s) => Some(s.clone()),
        Value::Map(_) => match params.get(key) {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        },
        _ => None,
    }
}

/// Like [`param`], failing construction when absent
pub fn required_param(resource: &str, params: &Value, key: &str) -> Result<String, ConstructError> {
    param(params, key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConstructError::Failed(format!("{} requires the '{}' parameter", resource, key)))
}

// ============================================================================
// Resource instances
// ============================================================================

/// Terminal construction state of a resource instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceStatus {
    Active,
    Skipped(String),
    Failed(String),
}

/// A resource bound to a connection and parameter set
pub struct ResourceInstance {
    name: String,
    params: Value,
    status: ResourceStatus,
    resource: Option<Box<dyn Resource>>,
}

impl fmt::Debug for ResourceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceInstance")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("status", &self.status)
            .finish()
    }
}

impl ResourceInstance {
    pub(crate) fn active(name: &str, params: &Value, resource: Box<dyn Resource>) -> Self {
        Self {
            name: name.to_string(),
            params: params.clone(),
            status: ResourceStatus::Active,
            resource: Some(resource),
        }
    }

    pub(crate) fn skipped(name: &str, params: &Value, reason: String) -> Self {
        Self {
            name: name.to_string(),
            params: params.clone(),
            status: ResourceStatus::Skipped(reason),
            resource: None,
        }
    }

    pub(crate) fn failed(name: &str, params: &Value, error: String) -> Self {
        Self {
            name: name.to_string(),
            params: params.clone(),
            status: ResourceStatus::Failed(error),
            resource: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    pub fn status(&self) -> &ResourceStatus {
        &self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == ResourceStatus::Active
    }

    pub fn skip_reason(&self) -> Option<&str> {
        match &self.status {
            ResourceStatus::Skipped(reason) => Some(reason),
            _ => None,
        }
    }

    /// The underlying resource; only active instances have one
    pub fn resource(&self) -> Option<&dyn Resource> {
        self.resource.as_deref()
    }

    pub fn describe(&self) -> String {
        match &self.resource {
            Some(resource) => resource.describe(),
            None => match param(&self.params, "name") {
                Some(arg) => format!("{} {}", self.name, arg),
                None => self.name.clone(),
            },
        }
    }

    pub fn exists(&self) -> Result<bool, AssertionError> {
        match &self.resource {
            Some(resource) => resource.exists(),
            None => Ok(false),
        }
    }

    pub fn get(&self, property: &str) -> Result<Value, AssertionError> {
        match &self.resource {
            Some(resource) => resource.get(property),
            None => Ok(Value::Null),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_param_scalar_and_map() {
        assert_eq!(param(&Value::from("/etc/hosts"), "path").as_deref(), Some("/etc/hosts"));

        let mut map = BTreeMap::new();
        map.insert("path".to_string(), Value::from("/etc/passwd"));
        map.insert("port".to_string(), Value::Integer(22));
        let params = Value::Map(map);
        assert_eq!(param(&params, "path").as_deref(), Some("/etc/passwd"));
        assert_eq!(param(&params, "port").as_deref(), Some("22"));
        assert_eq!(param(&params, "missing"), None);
    }

    #[test]
    fn test_required_param_fails_construction() {
        let err = required_param("file", &Value::Null, "path").unwrap_err();
        assert!(matches!(err, ConstructError::Failed(m) if m.contains("'path'")));
    }

    #[test]
    fn test_skipped_instance_is_neutral() {
        let instance = ResourceInstance::skipped(
            "kernel_module",
            &Value::from("bridge"),
            "not supported".into(),
        );
        assert!(!instance.exists().unwrap());
        assert_eq!(instance.get("loaded").unwrap(), Value::Null);
        assert_eq!(instance.skip_reason(), Some("not supported"));
        assert!(instance.resource().is_none());
        assert_eq!(instance.describe(), "kernel_module bridge");
    }
}
