//! # Dependency Fetchers
//!
//! A fetcher turns a [`SourceLocator`] into profile content on local disk,
//! plus its concrete version and a content hash. Only `path:` sources ship
//! with the library; embedders register fetchers for other schemes on the
//! [`Resolver`](super::Resolver).
//!
//! ## Content hash
//!
//! `sha256:<hex>` over every regular file below the content root, visited
//! in sorted relative-path order. Each file contributes its `/`-separated
//! path, a NUL byte, its length and its bytes. `vendor/` and `policy.lock`
//! are excluded so that resolving a profile never changes its own hash.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use semver::{Version, VersionReq};
use sha2::{Digest, Sha256};

use super::loader::read_metadata;
use super::{SourceLocator, LOCKFILE_NAME, VENDOR_DIR};
use crate::error::FetchError;

/// Prefix of every content hash
pub const HASH_PREFIX: &str = "sha256:";

/// Fetched dependency content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedContent {
    pub content_path: PathBuf,
    pub name: String,
    pub version: Version,
    pub content_hash: String,
}

/// Resolves a source locator into local profile content
pub trait Fetcher: Send + Sync {
    /// Locator scheme handled by this fetcher (`path`, `git`, ...)
    fn scheme(&self) -> &str;

    /// Fetch content for `locator`
    ///
    /// `constraint` lets version-aware sources pick a release; the resolver
    /// checks the returned version against it either way.
    fn fetch(&self, locator: &SourceLocator, constraint: Option<&VersionReq>) -> Result<FetchedContent, FetchError>;
}

/// `path:` sources: a profile directory on the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalPathFetcher;

impl Fetcher for LocalPathFetcher {
    fn scheme(&self) -> &str {
        "path"
    }

    fn fetch(&self, locator: &SourceLocator, _constraint: Option<&VersionReq>) -> Result<FetchedContent, FetchError> {
        let path = PathBuf::from(&locator.location);
        if !path.is_dir() {
            return Err(FetchError::NotFound {
                locator: locator.to_string(),
            });
        }
        let metadata = read_metadata(&path).map_err(|e| FetchError::InvalidContent {
            locator: locator.to_string(),
            reason: e.to_string(),
        })?;
        let content_hash = content_hash(&path).map_err(|source| FetchError::Io {
            locator: locator.to_string(),
            source,
        })?;

        Ok(FetchedContent {
            content_path: path,
            name: metadata.name,
            version: metadata.version,
            content_hash,
        })
    }
}

// ============================================================================
// Content hashing and vendoring
// ============================================================================

fn excluded(relative: &str) -> bool {
    relative == LOCKFILE_NAME || relative == VENDOR_DIR || relative.starts_with(&format!("{}/", VENDOR_DIR))
}

/// Regular files below `root` as sorted `/`-separated relative paths
fn content_files(root: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let relative = path
                .strip_prefix(root)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            if excluded(&relative) {
                continue;
            }
            let file_type = fs::symlink_metadata(&path)?.file_type();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                files.push((relative, path));
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Deterministic hash of a profile directory's content
pub fn content_hash(root: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    for (relative, path) in content_files(root)? {
        let bytes = fs::read(&path)?;
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(format!("{}{}", HASH_PREFIX, hex::encode(hasher.finalize())))
}

/// `<vendor_root>/<hex digest>`
pub fn vendor_path(vendor_root: &Path, content_hash: &str) -> PathBuf {
    vendor_root.join(content_hash.strip_prefix(HASH_PREFIX).unwrap_or(content_hash))
}

/// Copy `source` into `dest` unless `dest` already exists
pub fn vendor_copy(source: &Path, dest: &Path) -> io::Result<()> {
    if dest.is_dir() {
        return Ok(());
    }
    let staging = dest.with_extension("partial");
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    for (relative, path) in content_files(source)? {
        let target = staging.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&path, &target)?;
    }
    fs::create_dir_all(&staging)?;
    fs::rename(&staging, dest)
}
