//! # Policy Kit
//!
//! Policy-as-code audit runtime: evaluates declarative controls against a
//! live or replayed target and produces structured pass/fail/skip/error
//! results.
//!
//! ## Modules
//!
//! - `transport` - Target locators, connections, platform detection (local, ssh, docker, winrm, mock)
//! - `resources` - Resource registry with platform-gated skip dispatch, bundled adapters
//! - `filter_table` - Immutable row/column tables behind every list-style resource
//! - `profile` - Profile model, loader, dependency resolver, lock file, fetchers
//! - `execution` - Control selection, assertion evaluation, control runner
//! - `results` - Serializable run result tree and statistics
//! - `execution_api` - High-level audit entry points
//!
//! ## Usage
//!
//! ```rust,ignore
//! use policy_kit::config::RunConfig;
//! use policy_kit::execution_api::run_audit;
//!
//! let config = RunConfig::default()
//!     .with_target("docker://web-1")
//!     .with_profile("profiles/container-baseline");
//! let result = run_audit(&config)?;
//! ```

pub mod compare;
pub mod config;
pub mod error;
pub mod execution;
pub mod execution_api;
pub mod filter_table;
pub mod logging;
pub mod profile;
pub mod resources;
pub mod results;
pub mod transport;
pub mod value;

pub use config::RunConfig;
pub use error::{AuditError, ConnectionError, ConfigurationError, FetchError, ResolveError};
pub use execution_api::{run_audit, Auditor};
pub use results::{ControlStatus, RunResult, Statistics, TestStatus};
pub use value::Value;
