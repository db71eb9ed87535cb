//! Run configuration.
//!
//! Every field has a default, so a config file only lists what it changes:
//!
//! ```toml
//! target = "ssh://auditor@db01.example.com?key_file=/home/auditor/.ssh/id_ed25519"
//! profiles = ["profiles/linux-baseline"]
//! controls = ["/^ssh-/"]
//! command_timeout_secs = 30
//!
//! [inputs]
//! max_password_age = 60
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AuditError;
use crate::execution::ControlSelector;
use crate::profile::ResolveOptions;
use crate::transport::{ConnectOptions, DEFAULT_COMMAND_TIMEOUT};
use crate::value::Value;

/// Locator used when no target is given
pub const DEFAULT_TARGET: &str = "local://";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub target: String,
    pub profiles: Vec<PathBuf>,
    /// Control ids or `/regex/` filters; empty runs everything
    pub controls: Vec<String>,
    pub create_lockfile: bool,
    pub update_lockfile: bool,
    /// Overrides for profile input defaults
    pub inputs: BTreeMap<String, Value>,
    pub command_timeout_secs: u64,
    pub vendor_dir: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target: DEFAULT_TARGET.to_string(),
            profiles: Vec::new(),
            controls: Vec::new(),
            create_lockfile: true,
            update_lockfile: false,
            inputs: BTreeMap::new(),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT.as_secs(),
            vendor_dir: None,
        }
    }
}

impl RunConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, AuditError> {
        toml::from_str(text).map_err(|e| AuditError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, AuditError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AuditError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text).map_err(|e| match e {
            AuditError::Config(reason) => AuditError::Config(format!("{}: {}", path.display(), reason)),
            other => other,
        })
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_profile(mut self, path: impl Into<PathBuf>) -> Self {
        self.profiles.push(path.into());
        self
    }

    pub fn with_controls<S: Into<String>>(mut self, filters: impl IntoIterator<Item = S>) -> Self {
        self.controls.extend(filters.into_iter().map(Into::into));
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    /// Don't create or update `policy.lock`
    pub fn without_lockfile(mut self) -> Self {
        self.create_lockfile = false;
        self
    }

    pub fn validate(&self) -> Result<(), AuditError> {
        if self.profiles.is_empty() {
            return Err(AuditError::Config("at least one profile is required".to_string()));
        }
        if self.command_timeout_secs == 0 {
            return Err(AuditError::Config("command_timeout_secs must be greater than 0".to_string()));
        }
        if self.update_lockfile && !self.create_lockfile {
            return Err(AuditError::Config(
                "update_lockfile conflicts with create_lockfile = false".to_string(),
            ));
        }
        Ok(())
    }

    pub fn selector(&self) -> Result<ControlSelector, AuditError> {
        ControlSelector::parse(&self.controls)
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            command_timeout: Duration::from_secs(self.command_timeout_secs),
        }
    }

    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            create_lockfile: self.create_lockfile,
            update_lockfile: self.update_lockfile,
            vendor_dir: self.vendor_dir.clone(),
        }
    }
}
