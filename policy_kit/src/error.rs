//! # Error Taxonomy
//!
//! Run-fatal errors abort the whole run with a message naming the offending
//! target or dependency. Resource skips and per-test failures are data and
//! never appear here.

use std::path::PathBuf;

use thiserror::Error;

/// Transport-level fault: unreachable host, auth failure, timeout
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("cannot reach {target}: {reason}")]
    Unreachable { target: String, reason: String },

    #[error("authentication to {target} failed: {reason}")]
    AuthenticationFailed { target: String, reason: String },

    #[error("command on {target} timed out after {timeout_secs}s")]
    Timeout { target: String, timeout_secs: u64 },

    #[error("protocol error talking to {target}: {reason}")]
    Protocol { target: String, reason: String },

    #[error("connection to {target} lost: {reason}")]
    Disconnected { target: String, reason: String },
}

/// Invalid target or backend parameters, raised before any network I/O
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid configuration for {target}: {reason}")]
pub struct ConfigurationError {
    pub target: String,
    pub reason: String,
}

impl ConfigurationError {
    pub fn new(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// Anything `connect` can fail with
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Dependency source unreachable or invalid
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no fetcher can handle source '{locator}'")]
    UnsupportedSource { locator: String },

    #[error("dependency source '{locator}' not found")]
    NotFound { locator: String },

    #[error("invalid dependency content at '{locator}': {reason}")]
    InvalidContent { locator: String, reason: String },

    #[error("content hash mismatch for '{name}': locked {expected}, fetched {actual}")]
    HashMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("I/O error fetching '{locator}': {source}")]
    Io {
        locator: String,
        #[source]
        source: std::io::Error,
    },
}

/// Graph-level resolution failures, all fatal for the run
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cyclic dependency detected: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error(
        "unsatisfiable version for '{name}': {}",
        .conflicts.iter().map(|c| format!("'{}' required by {}", c.constraint, c.required_by)).collect::<Vec<_>>().join(", ")
    )]
    UnsatisfiableVersion {
        name: String,
        resolved: Option<String>,
        conflicts: Vec<VersionConflict>,
    },

    #[error("dependency '{name}' required by {required_by} could not be resolved: {reason}")]
    UnresolvedDependency {
        name: String,
        required_by: String,
        reason: String,
    },

    #[error("lock file {path}: {reason}")]
    Lockfile { path: PathBuf, reason: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

/// One side of a version conflict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConflict {
    pub constraint: String,
    pub required_by: String,
}

/// Profile loading failures
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile metadata not found at {0}")]
    MissingMetadata(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid profile {name}: {reason}")]
    Invalid { name: String, reason: String },
}

/// Raised while evaluating one assertion; downgraded to an `error` result
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AssertionError {
    #[error("resource accessor '{property}' failed: {reason}")]
    Accessor { property: String, reason: String },

    #[error("unknown matcher '{0}'")]
    UnknownMatcher(String),

    #[error("invalid assertion: {0}")]
    Invalid(String),

    #[error("input '{0}' is not defined by the profile")]
    UnknownInput(String),

    #[error("resource raised a panic: {0}")]
    Panic(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Top-level error for a run; every variant aborts the run
#[derive(Debug, Error)]
pub enum AuditError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("This OS/platform ({platform}) is not supported by profile {profile}.")]
    UnsupportedPlatform { profile: String, platform: String },

    #[error("invalid control filter '{filter}': {reason}")]
    InvalidControlFilter { filter: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("run cancelled before control '{next_control}'")]
    Cancelled { next_control: String },
}

impl From<ConnectionError> for AuditError {
    fn from(e: ConnectionError) -> Self {
        AuditError::Transport(TransportError::Connection(e))
    }
}

impl From<ConfigurationError> for AuditError {
    fn from(e: ConfigurationError) -> Self {
        AuditError::Transport(TransportError::Configuration(e))
    }
}

impl From<FetchError> for AuditError {
    fn from(e: FetchError) -> Self {
        AuditError::Resolve(ResolveError::Fetch(e))
    }
}
