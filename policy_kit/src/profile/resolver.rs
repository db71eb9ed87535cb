//! # Dependency Resolver
//!
//! Builds the dependency graph of a root profile by depth-first traversal,
//! pins it into a [`Lockfile`] and vendors every dependency's content under
//! `<root>/vendor/<hash>/`.
//!
//! ## Modes
//!
//! | Lock file | `update_lockfile` | Behavior |
//! |-----------|-------------------|----------|
//! | absent | - | full resolution, lock written unless `create_lockfile = false` |
//! | present | false | bind to locked versions; re-fetch only entries missing from the vendor cache |
//! | present | true | full resolution, lock rewritten |
//!
//! A lock that no longer covers the declared graph (new dependency, changed
//! constraint or source) is treated as absent.
//!
//! ## Failures
//!
//! Cycles, version conflicts, unknown sources and fetch errors are fatal for
//! the run. Fetch errors are not retried.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use super::fetcher::{vendor_copy, vendor_path, FetchedContent, Fetcher, LocalPathFetcher};
use super::loader::load_profile;
use super::lockfile::{LockEntry, Lockfile};
use super::{Dependency, Profile, SourceLocator, VENDOR_DIR};
use crate::error::{FetchError, ResolveError, VersionConflict};
use crate::{log_debug, log_info, log_warn};

/// Lock file policy for one resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Write `policy.lock` after a full resolution
    pub create_lockfile: bool,
    /// Ignore an existing lock and resolve from scratch
    pub update_lockfile: bool,
    /// Vendor cache root; `<profile>/vendor` when unset
    pub vendor_dir: Option<PathBuf>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            create_lockfile: true,
            update_lockfile: false,
            vendor_dir: None,
        }
    }
}

/// A dependency bound to its pinned content
#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    pub profile: Profile,
    pub entry: LockEntry,
    pub include_controls: bool,
}

/// Outcome of resolving one root profile
#[derive(Debug, Clone)]
pub struct Resolution {
    pub root: Profile,
    /// Dependencies before their dependents, in traversal order
    pub dependencies: Vec<ResolvedDependency>,
    pub lockfile: Lockfile,
    /// True when bound to an existing lock without re-resolving
    pub from_lock: bool,
}

impl Resolution {
    /// Profiles whose controls run, dependencies first
    pub fn execution_order(&self) -> Vec<&Profile> {
        self.dependencies
            .iter()
            .filter(|d| d.include_controls)
            .map(|d| &d.profile)
            .chain(std::iter::once(&self.root))
            .collect()
    }
}

/// Resolves profile dependencies through registered fetchers
pub struct Resolver {
    fetchers: BTreeMap<String, Arc<dyn Fetcher>>,
    options: ResolveOptions,
}

impl Resolver {
    /// Resolver with the local `path:` fetcher registered
    pub fn new(options: ResolveOptions) -> Self {
        let mut resolver = Self {
            fetchers: BTreeMap::new(),
            options,
        };
        resolver.register_fetcher(Arc::new(LocalPathFetcher));
        resolver
    }

    /// Add or replace the fetcher for its scheme
    pub fn register_fetcher(&mut self, fetcher: Arc<dyn Fetcher>) {
        self.fetchers.insert(fetcher.scheme().to_string(), fetcher);
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    pub fn resolve(&self, root: Profile) -> Result<Resolution, ResolveError> {
        let root_dir = normalize(&root.root);
        let vendor_root = self
            .options
            .vendor_dir
            .clone()
            .unwrap_or_else(|| root_dir.join(VENDOR_DIR));
        let lock_path = Lockfile::path_for(&root_dir);

        let mut walk = Walk {
            resolver: self,
            root_dir: root_dir.clone(),
            vendor_root,
            nodes: BTreeMap::new(),
            order: Vec::new(),
        };

        if !self.options.update_lockfile {
            if let Some(lock) = Lockfile::load(&lock_path)? {
                if walk.bind_locked(&root, &lock)? {
                    log_info!("Dependencies bound to lock file",
                        "profile" => root.label(),
                        "dependencies" => walk.order.len()
                    );
                    return Ok(walk.finish(root, true));
                }
                log_warn!("Lock file is stale, resolving again", "profile" => root.label(), "lockfile" => lock_path.display());
                walk.reset();
            }
        }

        let mut path = vec![root.name.clone()];
        for dep in &root.depends {
            walk.visit(dep, &root_dir, &root.name, &mut path)?;
        }
        let resolution = walk.finish(root, false);

        let has_lock = lock_path.exists();
        if self.options.create_lockfile && (has_lock || !resolution.dependencies.is_empty()) {
            resolution.lockfile.save(&lock_path)?;
            log_info!("Lock file written", "path" => lock_path.display(), "dependencies" => resolution.dependencies.len());
        }
        Ok(resolution)
    }

    fn fetch(&self, locator: &SourceLocator, dep: &Dependency) -> Result<FetchedContent, ResolveError> {
        let fetcher = self
            .fetchers
            .get(&locator.scheme)
            .ok_or_else(|| FetchError::UnsupportedSource {
                locator: locator.to_string(),
            })?;
        log_debug!("Fetching dependency", "name" => &dep.name, "source" => locator);
        Ok(fetcher.fetch(locator, dep.version.as_ref())?)
    }
}

struct Node {
    profile: Profile,
    entry: LockEntry,
    constraints: Vec<VersionConflict>,
    include_controls: bool,
}

struct Walk<'a> {
    resolver: &'a Resolver,
    root_dir: PathBuf,
    vendor_root: PathBuf,
    nodes: BTreeMap<String, Node>,
    order: Vec<String>,
}

impl Walk<'_> {
    fn reset(&mut self) {
        self.nodes.clear();
        self.order.clear();
    }

    /// Enter `name`, failing when it is already on the current path
    fn enter(path: &[String], name: &str) -> Result<(), ResolveError> {
        if path.iter().any(|p| p == name) {
            let mut cycle = path.to_vec();
            cycle.push(name.to_string());
            return Err(ResolveError::CyclicDependency { path: cycle });
        }
        Ok(())
    }

    /// `path:` locators relative to the declaring profile become absolute-ish
    fn locate(source: &SourceLocator, origin: &Path) -> SourceLocator {
        if source.is_path() && Path::new(&source.location).is_relative() {
            SourceLocator::path(normalize(&origin.join(&source.location)).to_string_lossy())
        } else {
            source.clone()
        }
    }

    /// Locator as stored in the lock: `path:` sources relative to the root profile
    fn lock_source(&self, locator: &SourceLocator) -> SourceLocator {
        if locator.is_path() {
            let relative = relative_to(Path::new(&locator.location), &self.root_dir);
            SourceLocator::path(relative.to_string_lossy().replace('\\', "/"))
        } else {
            locator.clone()
        }
    }

    fn vendor(&self, fetched: &FetchedContent) -> Result<PathBuf, ResolveError> {
        let dest = vendor_path(&self.vendor_root, &fetched.content_hash);
        vendor_copy(&fetched.content_path, &dest).map_err(|source| FetchError::Io {
            locator: fetched.content_path.display().to_string(),
            source,
        })?;
        Ok(dest)
    }

    fn visit(
        &mut self,
        dep: &Dependency,
        origin: &Path,
        required_by: &str,
        path: &mut Vec<String>,
    ) -> Result<(), ResolveError> {
        Self::enter(path, &dep.name)?;
        let constraint = VersionConflict {
            constraint: dep.constraint_label(),
            required_by: required_by.to_string(),
        };

        if let Some(node) = self.nodes.get_mut(&dep.name) {
            node.constraints.push(constraint);
            if let Some(req) = &dep.version {
                if !req.matches(&node.entry.version) {
                    return Err(ResolveError::UnsatisfiableVersion {
                        name: dep.name.clone(),
                        resolved: Some(node.entry.version.to_string()),
                        conflicts: node.constraints.clone(),
                    });
                }
            }
            add_requirer(&mut node.entry, required_by);
            node.include_controls |= dep.include_controls;
            return Ok(());
        }

        let locator = Self::locate(&dep.source, origin);
        let fetched = self.resolver.fetch(&locator, dep)?;
        if fetched.name != dep.name {
            return Err(ResolveError::UnresolvedDependency {
                name: dep.name.clone(),
                required_by: required_by.to_string(),
                reason: format!("{} contains profile '{}'", locator, fetched.name),
            });
        }
        if let Some(req) = &dep.version {
            if !req.matches(&fetched.version) {
                return Err(ResolveError::UnsatisfiableVersion {
                    name: dep.name.clone(),
                    resolved: Some(fetched.version.to_string()),
                    conflicts: vec![constraint],
                });
            }
        }

        let profile = load_profile(self.vendor(&fetched)?)?;
        let entry = LockEntry {
            version: fetched.version.clone(),
            source: self.lock_source(&locator),
            content_hash: fetched.content_hash.clone(),
            required_by: vec![required_by.to_string()],
        };
        let children = profile.depends.clone();
        self.nodes.insert(
            dep.name.clone(),
            Node {
                profile,
                entry,
                constraints: vec![constraint],
                include_controls: dep.include_controls,
            },
        );

        path.push(dep.name.clone());
        for child in &children {
            self.visit(child, &fetched.content_path, &dep.name, path)?;
        }
        path.pop();
        self.order.push(dep.name.clone());
        Ok(())
    }

    /// Bind the graph to `lock`; `Ok(false)` when the lock doesn't cover it
    fn bind_locked(&mut self, root: &Profile, lock: &Lockfile) -> Result<bool, ResolveError> {
        let mut path = vec![root.name.clone()];
        let origin = self.root_dir.clone();
        for dep in &root.depends {
            if !self.visit_locked(dep, &origin, lock, &root.name, &mut path)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn visit_locked(
        &mut self,
        dep: &Dependency,
        origin: &Path,
        lock: &Lockfile,
        required_by: &str,
        path: &mut Vec<String>,
    ) -> Result<bool, ResolveError> {
        Self::enter(path, &dep.name)?;
        let Some(entry) = lock.get(&dep.name) else {
            return Ok(false);
        };
        let declared = self.lock_source(&Self::locate(&dep.source, origin));
        if declared != entry.source {
            log_info!("Dependency source changed since lock",
                "name" => &dep.name,
                "locked" => &entry.source,
                "declared" => &declared
            );
            return Ok(false);
        }
        if let Some(req) = &dep.version {
            if !req.matches(&entry.version) {
                return Ok(false);
            }
        }
        if let Some(node) = self.nodes.get_mut(&dep.name) {
            node.include_controls |= dep.include_controls;
            return Ok(true);
        }

        let dir = vendor_path(&self.vendor_root, &entry.content_hash);
        if !dir.is_dir() {
            let locator = Self::locate(&entry.source, &self.root_dir);
            log_info!("Vendored dependency missing, fetching", "name" => &dep.name, "source" => &locator);
            let fetched = self.resolver.fetch(&locator, dep)?;
            if fetched.content_hash != entry.content_hash {
                return Err(FetchError::HashMismatch {
                    name: dep.name.clone(),
                    expected: entry.content_hash.clone(),
                    actual: fetched.content_hash,
                }
                .into());
            }
            self.vendor(&fetched)?;
        }

        let profile = load_profile(&dir)?;
        let children = profile.depends.clone();
        self.nodes.insert(
            dep.name.clone(),
            Node {
                profile,
                entry: entry.clone(),
                constraints: Vec::new(),
                include_controls: dep.include_controls,
            },
        );

        // Children declare sources relative to where this dependency came from
        let child_origin = if entry.source.is_path() {
            PathBuf::from(Self::locate(&entry.source, &self.root_dir).location)
        } else {
            dir.clone()
        };
        path.push(dep.name.clone());
        for child in &children {
            if !self.visit_locked(child, &child_origin, lock, &dep.name, path)? {
                return Ok(false);
            }
        }
        path.pop();
        self.order.push(dep.name.clone());
        Ok(true)
    }

    fn finish(mut self, mut root: Profile, from_lock: bool) -> Resolution {
        let mut lockfile = Lockfile::default();
        for (name, node) in &self.nodes {
            lockfile.dependencies.insert(name.clone(), node.entry.clone());
        }

        annotate(&mut root.depends, &lockfile);
        let mut dependencies = Vec::with_capacity(self.order.len());
        for name in &self.order {
            if let Some(node) = self.nodes.remove(name) {
                let mut profile = node.profile;
                annotate(&mut profile.depends, &lockfile);
                dependencies.push(ResolvedDependency {
                    profile,
                    entry: node.entry,
                    include_controls: node.include_controls,
                });
            }
        }

        Resolution {
            root,
            dependencies,
            lockfile,
            from_lock,
        }
    }
}

fn add_requirer(entry: &mut LockEntry, required_by: &str) {
    if !entry.required_by.iter().any(|r| r == required_by) {
        entry.required_by.push(required_by.to_string());
        entry.required_by.sort();
    }
}

fn annotate(depends: &mut [Dependency], lockfile: &Lockfile) {
    for dep in depends {
        dep.lock = lockfile.get(&dep.name).cloned();
    }
}

// ============================================================================
// Lexical path helpers
// ============================================================================

/// Resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// `path` expressed relative to `base`; both are normalized first
fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path = normalize(path);
    let base = normalize(base);
    if path.is_absolute() != base.is_absolute() {
        return path;
    }
    let path_parts: Vec<Component> = path.components().filter(|c| *c != Component::CurDir).collect();
    let base_parts: Vec<Component> = base.components().filter(|c| *c != Component::CurDir).collect();
    let common = path_parts
        .iter()
        .zip(&base_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base_parts.len() {
        out.push("..");
    }
    for part in &path_parts[common..] {
        out.push(part);
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
