//! # Profiles
//!
//! A profile is a versioned bundle of controls, inputs and dependencies laid
//! out on disk as:
//!
//! ```text
//! linux-baseline/
//! ├── profile.toml      metadata, inputs, supports, depends
//! ├── controls/*.toml   [[control]] tables, loaded in file-name order
//! ├── policy.lock       pinned dependency resolution
//! └── vendor/<hash>/    cached dependency content
//! ```
//!
//! ## profile.toml
//!
//! ```toml
//! name = "linux-baseline"
//! version = "1.2.0"
//! title = "Linux hardening baseline"
//! supports = [{ family = "linux" }]
//!
//! [inputs]
//! max_password_age = 90
//!
//! [[depends]]
//! name = "ssh-baseline"
//! version = "^2.0"
//! path = "../ssh-baseline"
//! ```
//!
//! Profiles are mutable only while the resolver annotates their dependency
//! list with lock entries; execution reads them immutably.

pub mod control;
pub mod fetcher;
pub mod loader;
pub mod lockfile;
pub mod resolver;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

pub use control::{Assertion, CodeLocation, Control, TestBlock};
pub use fetcher::{Fetcher, FetchedContent, LocalPathFetcher};
pub use loader::load_profile;
pub use lockfile::{LockEntry, Lockfile, LOCKFILE_NAME};
pub use resolver::{Resolution, ResolveOptions, ResolvedDependency, Resolver};

use crate::transport::PlatformInfo;
use crate::value::Value;

/// File holding profile metadata
pub const METADATA_FILE: &str = "profile.toml";

/// Directory holding control files
pub const CONTROLS_DIR: &str = "controls";

/// Directory holding vendored dependency content
pub const VENDOR_DIR: &str = "vendor";

/// A loaded profile
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub version: Version,
    pub title: Option<String>,
    pub maintainer: Option<String>,
    pub summary: Option<String>,
    /// Directory the profile was loaded from
    pub root: PathBuf,
    pub supports: Vec<PlatformSupport>,
    pub depends: Vec<Dependency>,
    pub inputs: BTreeMap<String, Value>,
    pub controls: Vec<Control>,
}

impl Profile {
    /// `name@version`
    pub fn label(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// True when `supports` is empty or any entry matches
    pub fn supports_platform(&self, platform: &PlatformInfo) -> bool {
        self.supports.is_empty() || self.supports.iter().any(|s| s.matches(platform))
    }

    pub fn control(&self, id: &str) -> Option<&Control> {
        self.controls.iter().find(|c| c.id == id)
    }
}

// ============================================================================
// Platform support
// ============================================================================

/// One `supports` entry; every field that is set must match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformSupport {
    pub family: Option<String>,
    pub name: Option<String>,
    /// Exact release, or a prefix ending in `*` (`22.*`)
    pub release: Option<String>,
    pub arch: Option<String>,
}

impl PlatformSupport {
    pub fn matches(&self, platform: &PlatformInfo) -> bool {
        if let Some(family) = &self.family {
            if !platform.is_family(family) {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if !platform.name.eq_ignore_ascii_case(name) {
                return false;
            }
        }
        if let Some(pattern) = &self.release {
            match &platform.release {
                Some(release) if release_matches(pattern, release) => {}
                _ => return false,
            }
        }
        if let Some(arch) = &self.arch {
            if platform.arch.as_deref() != Some(arch.as_str()) {
                return false;
            }
        }
        true
    }
}

fn release_matches(pattern: &str, release: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => release.starts_with(prefix),
        None => pattern == release,
    }
}

impl fmt::Display for PlatformSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = [
            ("family", &self.family),
            ("name", &self.name),
            ("release", &self.release),
            ("arch", &self.arch),
        ]
        .iter()
        .filter_map(|(k, v)| v.as_ref().map(|v| format!("{}={}", k, v)))
        .collect();
        write!(f, "{}", parts.join(" "))
    }
}

// ============================================================================
// Dependencies
// ============================================================================

/// Where a dependency's content comes from: `scheme:location`
///
/// A bare path is shorthand for `path:<path>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceLocator {
    pub scheme: String,
    pub location: String,
}

impl SourceLocator {
    pub fn path(location: impl Into<String>) -> Self {
        Self {
            scheme: "path".to_string(),
            location: location.into(),
        }
    }

    pub fn parse(locator: &str) -> Result<Self, String> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err("empty source locator".to_string());
        }
        match locator.split_once(':') {
            // Windows drive letters are paths, not schemes
            Some((scheme, location))
                if scheme.len() > 1 && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') =>
            {
                Ok(Self {
                    scheme: scheme.to_ascii_lowercase(),
                    location: location.to_string(),
                })
            }
            _ => Ok(Self::path(locator)),
        }
    }

    pub fn is_path(&self) -> bool {
        self.scheme == "path"
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.location)
    }
}

impl TryFrom<String> for SourceLocator {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<SourceLocator> for String {
    fn from(l: SourceLocator) -> Self {
        l.to_string()
    }
}

/// A declared dependency
#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    pub name: String,
    pub version: Option<VersionReq>,
    pub source: SourceLocator,
    /// Run the dependency's own controls as part of the run
    pub include_controls: bool,
    /// Filled in by the resolver
    pub lock: Option<LockEntry>,
}

impl Dependency {
    pub fn constraint_label(&self) -> String {
        self.version
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "*".to_string())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_locator_parsing() {
        assert_eq!(SourceLocator::parse("../ssh").unwrap(), SourceLocator::path("../ssh"));
        assert_eq!(
            SourceLocator::parse("path:/srv/profiles/ssh").unwrap().location,
            "/srv/profiles/ssh"
        );
        let git = SourceLocator::parse("git:https://example.com/p.git").unwrap();
        assert_eq!(git.scheme, "git");
        assert_eq!(git.location, "https://example.com/p.git");
        assert!(SourceLocator::parse(r"C:\profiles\ssh").unwrap().is_path());
        assert!(SourceLocator::parse("  ").is_err());
    }

    #[test]
    fn test_platform_support_matching() {
        let ubuntu = PlatformInfo::for_name("ubuntu").with_release("22.04");
        let linux = PlatformSupport {
            family: Some("linux".into()),
            ..Default::default()
        };
        let jammy = PlatformSupport {
            name: Some("ubuntu".into()),
            release: Some("22.*".into()),
            ..Default::default()
        };
        let focal = PlatformSupport {
            name: Some("ubuntu".into()),
            release: Some("20.04".into()),
            ..Default::default()
        };
        assert!(linux.matches(&ubuntu));
        assert!(jammy.matches(&ubuntu));
        assert!(!focal.matches(&ubuntu));
        assert!(!linux.matches(&PlatformInfo::for_name("windows")));
        assert_eq!(jammy.to_string(), "name=ubuntu release=22.*");
    }
}
