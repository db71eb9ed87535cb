//! # Audit API
//!
//! High-level entry points for running profiles against a target.
//!
//! A run goes through four phases:
//! 1. Connect to the target and detect its platform
//! 2. Load every profile and resolve its dependencies (lock file, vendor cache)
//! 3. Check profile platform support
//! 4. Execute the selected controls, dependencies before their dependents
//!
//! Any run-fatal error (connection, configuration, resolution, unsupported
//! platform) aborts before results are produced.
//!
//! ## Example
//!
//! ```ignore
//! use policy_kit::config::RunConfig;
//! use policy_kit::execution_api::run_audit;
//!
//! let config = RunConfig::default()
//!     .with_target("ssh://auditor@db01?key_file=/home/auditor/.ssh/id_ed25519")
//!     .with_profile("profiles/linux-baseline")
//!     .with_controls(["/^ssh-/"]);
//!
//! let result = run_audit(&config)?;
//! println!(
//!     "{} controls passed, {} failed",
//!     result.statistics.controls.passed, result.statistics.controls.failed
//! );
//! ```

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::config::RunConfig;
use crate::error::AuditError;
use crate::execution::ControlRunner;
use crate::profile::{load_profile, Fetcher, Resolution, Resolver};
use crate::resources::{create_default_registry, ResourceRegistry};
use crate::results::RunResult;
use crate::transport::ConnectionManager;
use crate::{log_error, log_info};

/// Runs profiles with one registry, one connection manager and any extra fetchers
pub struct Auditor {
    registry: Arc<ResourceRegistry>,
    connections: ConnectionManager,
    fetchers: Vec<Arc<dyn Fetcher>>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Auditor {
    pub fn new(registry: Arc<ResourceRegistry>, connections: ConnectionManager) -> Self {
        Self {
            registry,
            connections,
            fetchers: Vec::new(),
            cancel: None,
        }
    }

    /// Auditor with every bundled resource and the config's connection options
    pub fn for_config(config: &RunConfig) -> Result<Self, AuditError> {
        let registry = create_default_registry().map_err(|e| AuditError::Config(e.to_string()))?;
        Ok(Self::new(
            Arc::new(registry),
            ConnectionManager::new(config.connect_options()),
        ))
    }

    /// Register a dependency fetcher for a non-`path` source scheme
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetchers.push(fetcher);
        self
    }

    /// Abort between controls once `flag` is set
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Load a profile and resolve its dependency graph
    ///
    /// # Arguments
    /// * `path` - Profile directory containing `profile.toml`
    /// * `config` - Lock file policy and vendor directory
    pub fn resolve(&self, path: &Path, config: &RunConfig) -> Result<Resolution, AuditError> {
        let profile = load_profile(path)?;
        let mut resolver = Resolver::new(config.resolve_options());
        for fetcher in &self.fetchers {
            resolver.register_fetcher(Arc::clone(fetcher));
        }
        Ok(resolver.resolve(profile)?)
    }

    /// Run every configured profile against the configured target
    ///
    /// # Returns
    /// * `Ok(RunResult)` - The run completed; inspect `statistics` for the outcome
    /// * `Err(AuditError)` - A run-fatal error naming the target or dependency
    pub fn run(&self, config: &RunConfig) -> Result<RunResult, AuditError> {
        config.validate()?;
        let started_at = Utc::now();
        let clock = Instant::now();
        let selector = config.selector()?;

        // Phase 1: Connect
        log_info!("Phase 1: Connecting", "target" => &config.target);
        let conn = self.connections.connect_locator(&config.target)?;
        let platform = conn.os().clone();
        log_info!("Platform detected", "target" => conn.target(), "platform" => &platform);

        // Phase 2: Resolve
        log_info!("Phase 2: Resolving profiles", "count" => config.profiles.len());
        let resolutions = config
            .profiles
            .iter()
            .map(|path| self.resolve(path, config))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                log_error!("Profile resolution failed", "error" => &e);
                e
            })?;

        // Phase 3: Platform support
        for resolution in &resolutions {
            for profile in resolution.execution_order() {
                if !profile.supports_platform(&platform) {
                    return Err(AuditError::UnsupportedPlatform {
                        profile: profile.label(),
                        platform: platform.to_string(),
                    });
                }
            }
        }

        // Phase 4: Execute
        log_info!("Phase 4: Executing controls");
        let mut runner = ControlRunner::new(&self.registry, &conn, &selector);
        if let Some(flag) = &self.cancel {
            runner = runner.with_cancellation(Arc::clone(flag));
        }

        let mut profiles = Vec::new();
        for resolution in &resolutions {
            let root = resolution.root.name.as_str();
            for profile in resolution.execution_order() {
                let parent = (profile.name != root).then_some(root);
                profiles.push(runner.run_profile(profile, &config.inputs, parent)?);
            }
        }

        let result = RunResult::new(conn.target().to_string(), platform, started_at, profiles, clock.elapsed());
        log_info!("Run complete",
            "controls" => result.statistics.controls.total,
            "passed" => result.statistics.controls.passed,
            "failed" => result.statistics.controls.failed,
            "skipped" => result.statistics.controls.skipped
        );
        Ok(result)
    }
}

/// Run an audit with the bundled resources
///
/// # Arguments
/// * `config` - Target, profiles, control filters and lock file policy
///
/// # Example
/// ```ignore
/// let result = run_audit(&RunConfig::default().with_profile("profiles/base"))?;
/// ```
pub fn run_audit(config: &RunConfig) -> Result<RunResult, AuditError> {
    let auditor = Auditor::for_config(config)?;
    let result = auditor.run(config);
    auditor.connections().close_all();
    result
}
