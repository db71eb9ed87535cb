//! `policy.lock`: the pinned result of dependency resolution.
//!
//! ```toml
//! lockfile_version = 1
//!
//! [dependencies.ssh-baseline]
//! version = "2.1.0"
//! source = "path:../ssh-baseline"
//! content_hash = "sha256:9f86d081884c7d65..."
//! required_by = ["linux-baseline"]
//! ```
//!
//! Entries are keyed by name in a sorted map and carry no timestamps, so the
//! same resolution always serializes to the same bytes. Writes take an
//! exclusive advisory lock on the file.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use semver::Version;
use serde::{Deserialize, Serialize};

use super::SourceLocator;
use crate::error::ResolveError;

/// Lock file name, next to `profile.toml`
pub const LOCKFILE_NAME: &str = "policy.lock";

/// Current lock file format
pub const LOCKFILE_VERSION: u32 = 1;

/// One pinned dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub version: Version,
    pub source: SourceLocator,
    pub content_hash: String,
    /// Profiles that declared this dependency, sorted
    #[serde(default)]
    pub required_by: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockfile {
    pub lockfile_version: u32,
    #[serde(default)]
    pub dependencies: BTreeMap<String, LockEntry>,
}

impl Default for Lockfile {
    fn default() -> Self {
        Self {
            lockfile_version: LOCKFILE_VERSION,
            dependencies: BTreeMap::new(),
        }
    }
}

fn lock_error(path: &Path, reason: impl Into<String>) -> ResolveError {
    ResolveError::Lockfile {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

impl Lockfile {
    pub fn path_for(profile_root: &Path) -> PathBuf {
        profile_root.join(LOCKFILE_NAME)
    }

    pub fn get(&self, name: &str) -> Option<&LockEntry> {
        self.dependencies.get(name)
    }

    /// Read a lock file; `Ok(None)` when it doesn't exist
    pub fn load(path: &Path) -> Result<Option<Self>, ResolveError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(lock_error(path, e.to_string())),
        };
        let lock: Lockfile = toml::from_str(&text).map_err(|e| lock_error(path, e.to_string()))?;
        if lock.lockfile_version != LOCKFILE_VERSION {
            return Err(lock_error(
                path,
                format!(
                    "unsupported lockfile_version {} (expected {})",
                    lock.lockfile_version, LOCKFILE_VERSION
                ),
            ));
        }
        Ok(Some(lock))
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }

    /// Write under an exclusive lock, replacing previous content
    pub fn save(&self, path: &Path) -> Result<(), ResolveError> {
        let text = self.to_toml().map_err(|e| lock_error(path, e.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| lock_error(path, e.to_string()))?;

        file.lock_exclusive()
            .map_err(|e| lock_error(path, format!("cannot lock: {}", e)))?;
        let written = file
            .set_len(0)
            .and_then(|_| file.write_all(text.as_bytes()))
            .and_then(|_| file.sync_all());
        let unlocked = FileExt::unlock(&file);
        written.map_err(|e| lock_error(path, e.to_string()))?;
        unlocked.map_err(|e| lock_error(path, format!("cannot unlock: {}", e)))
    }
}
