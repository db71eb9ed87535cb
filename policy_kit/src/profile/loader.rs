//! Profile loading from a directory on disk.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use semver::{Version, VersionReq};
use serde::Deserialize;

use super::control::{Assertion, CodeLocation, Control, TestBlock, DEFAULT_IMPACT};
use super::{Dependency, PlatformSupport, Profile, SourceLocator, CONTROLS_DIR, METADATA_FILE};
use crate::error::ProfileError;
use crate::filter_table::Condition;
use crate::log_debug;
use crate::value::Value;

// ============================================================================
// Raw file formats
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawMetadata {
    name: String,
    version: String,
    title: Option<String>,
    maintainer: Option<String>,
    summary: Option<String>,
    #[serde(default)]
    supports: Vec<PlatformSupport>,
    #[serde(default)]
    depends: Vec<RawDependency>,
    #[serde(default)]
    inputs: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDependency {
    name: String,
    version: Option<String>,
    path: Option<String>,
    source: Option<String>,
    #[serde(default = "default_include_controls")]
    include_controls: bool,
}

fn default_include_controls() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ControlFile {
    #[serde(default)]
    control: Vec<RawControl>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawControl {
    id: String,
    title: Option<String>,
    desc: Option<String>,
    impact: Option<f64>,
    #[serde(default)]
    tags: BTreeMap<String, Value>,
    #[serde(default, rename = "test")]
    tests: Vec<RawTest>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTest {
    resource: String,
    #[serde(default)]
    params: Value,
    title: Option<String>,
    #[serde(default, rename = "where")]
    conditions: Vec<Condition>,
    #[serde(default, rename = "assert")]
    assertions: Vec<Assertion>,
}

/// Name and version only, read without touching controls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileMetadata {
    pub name: String,
    pub version: Version,
}

// ============================================================================
// Loading
// ============================================================================

fn read(path: &Path) -> Result<String, ProfileError> {
    fs::read_to_string(path).map_err(|source| ProfileError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse<T: for<'de> Deserialize<'de>>(path: &Path, text: &str) -> Result<T, ProfileError> {
    toml::from_str(text).map_err(|e| ProfileError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn invalid(name: &str, reason: impl Into<String>) -> ProfileError {
    ProfileError::Invalid {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn validate_name(name: &str) -> Result<(), ProfileError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(invalid(name, "profile names may only contain letters, digits, '-', '_' and '.'"))
    }
}

fn load_metadata(dir: &Path) -> Result<RawMetadata, ProfileError> {
    let path = dir.join(METADATA_FILE);
    if !path.is_file() {
        return Err(ProfileError::MissingMetadata(path));
    }
    let raw: RawMetadata = parse(&path, &read(&path)?)?;
    validate_name(&raw.name)?;
    Ok(raw)
}

fn parse_version(name: &str, version: &str) -> Result<Version, ProfileError> {
    Version::parse(version).map_err(|e| invalid(name, format!("invalid version '{}': {}", version, e)))
}

/// Read `profile.toml` name and version
pub fn read_metadata(dir: &Path) -> Result<ProfileMetadata, ProfileError> {
    let raw = load_metadata(dir)?;
    let version = parse_version(&raw.name, &raw.version)?;
    Ok(ProfileMetadata {
        name: raw.name,
        version,
    })
}

/// Load a profile with its controls
pub fn load_profile(dir: impl AsRef<Path>) -> Result<Profile, ProfileError> {
    let dir = dir.as_ref();
    let raw = load_metadata(dir)?;
    let version = parse_version(&raw.name, &raw.version)?;

    let depends = raw
        .depends
        .into_iter()
        .map(|d| convert_dependency(&raw.name, d))
        .collect::<Result<Vec<_>, _>>()?;

    let mut controls = Vec::new();
    for file in control_files(dir)? {
        let text = read(&file)?;
        let parsed: ControlFile = parse(&file, &text)?;
        let label = file
            .strip_prefix(dir)
            .unwrap_or(&file)
            .to_string_lossy()
            .replace('\\', "/");
        controls.extend(convert_controls(&raw.name, &label, &text, parsed)?);
    }

    let mut seen = HashSet::new();
    if let Some(dup) = controls.iter().find(|c| !seen.insert(c.id.as_str())) {
        return Err(invalid(&raw.name, format!("duplicate control id '{}'", dup.id)));
    }

    log_debug!("Profile loaded",
        "profile" => &raw.name,
        "version" => &version,
        "controls" => controls.len(),
        "dependencies" => depends.len()
    );

    Ok(Profile {
        name: raw.name,
        version,
        title: raw.title,
        maintainer: raw.maintainer,
        summary: raw.summary,
        root: dir.to_path_buf(),
        supports: raw.supports,
        depends,
        inputs: raw.inputs,
        controls,
    })
}

fn convert_dependency(profile: &str, raw: RawDependency) -> Result<Dependency, ProfileError> {
    validate_name(&raw.name)?;
    let source = match (raw.path, raw.source) {
        (Some(path), None) => SourceLocator::path(path),
        (None, Some(source)) => SourceLocator::parse(&source).map_err(|e| invalid(profile, e))?,
        _ => {
            return Err(invalid(
                profile,
                format!("dependency '{}' needs exactly one of 'path' or 'source'", raw.name),
            ))
        }
    };
    let version = raw
        .version
        .map(|v| {
            VersionReq::parse(&v).map_err(|e| {
                invalid(profile, format!("dependency '{}' has invalid constraint '{}': {}", raw.name, v, e))
            })
        })
        .transpose()?;

    Ok(Dependency {
        name: raw.name,
        version,
        source,
        include_controls: raw.include_controls,
        lock: None,
    })
}

/// `controls/*.toml`, sorted by file name
fn control_files(dir: &Path) -> Result<Vec<PathBuf>, ProfileError> {
    let controls = dir.join(CONTROLS_DIR);
    if !controls.is_dir() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(&controls).map_err(|source| ProfileError::Io {
        path: controls.clone(),
        source,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ProfileError::Io {
            path: controls.clone(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() && path.extension().map(|e| e == "toml").unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Line numbers of `[[control]]` headers and their `[[control.test]]` headers
fn header_lines(text: &str) -> Vec<(usize, Vec<usize>)> {
    let mut headers: Vec<(usize, Vec<usize>)> = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.starts_with("[[control]]") {
            headers.push((idx + 1, Vec::new()));
        } else if line.starts_with("[[control.test]]") {
            if let Some(last) = headers.last_mut() {
                last.1.push(idx + 1);
            }
        }
    }
    headers
}

fn convert_controls(
    profile: &str,
    file: &str,
    text: &str,
    parsed: ControlFile,
) -> Result<Vec<Control>, ProfileError> {
    let headers = header_lines(text);
    let mut controls = Vec::with_capacity(parsed.control.len());

    for (i, raw) in parsed.control.into_iter().enumerate() {
        if raw.id.trim().is_empty() {
            return Err(invalid(profile, format!("control without id in {}", file)));
        }
        let impact = raw.impact.unwrap_or(DEFAULT_IMPACT);
        if !(0.0..=1.0).contains(&impact) {
            return Err(invalid(
                profile,
                format!("control '{}' has impact {} outside [0, 1]", raw.id, impact),
            ));
        }

        let control_line = headers.get(i).map(|h| h.0).unwrap_or(1);
        let tests = raw
            .tests
            .into_iter()
            .enumerate()
            .map(|(j, t)| {
                let line = headers
                    .get(i)
                    .and_then(|h| h.1.get(j).copied())
                    .unwrap_or(control_line);
                TestBlock {
                    resource: t.resource,
                    params: t.params,
                    title: t.title,
                    conditions: t.conditions,
                    assertions: t.assertions,
                    location: CodeLocation::new(file, line),
                }
            })
            .collect();

        controls.push(Control {
            id: raw.id,
            title: raw.title,
            desc: raw.desc,
            impact,
            tags: raw.tags,
            tests,
            location: CodeLocation::new(file, control_line),
        });
    }
    Ok(controls)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::CompareOp;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    const METADATA: &str = r#"
name = "linux-baseline"
version = "1.2.0"
title = "Linux baseline"
supports = [{ family = "linux" }]

[inputs]
max_password_age = 90

[[depends]]
name = "ssh-baseline"
version = "^2.0"
path = "../ssh-baseline"
"#;

    const CONTROLS: &str = r#"
[[control]]
id = "fs-01"
title = "passwd is world readable"
impact = 0.7
tags = { cis = "6.1.2" }

[[control.test]]
resource = "file"
params = { path = "/etc/passwd" }
assert = [
  { matcher = "exist" },
  { property = "mode", op = "cmp", expected = "0644" },
]

[[control]]
id = "fs-02"

[[control.test]]
resource = "processes"
where = [{ field = "user", value = "root" }]
assert = [{ property = "count", op = "gt", expected = 0 }]

[[control.test]]
resource = "os"
assert = [{ matcher = "exist" }]
"#;

    #[test]
    fn test_load_profile() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "profile.toml", METADATA);
        write(dir.path(), "controls/filesystem.toml", CONTROLS);
        write(dir.path(), "controls/README.md", "not a control file");

        let profile = load_profile(dir.path()).unwrap();
        assert_eq!(profile.label(), "linux-baseline@1.2.0");
        assert_eq!(profile.inputs["max_password_age"], Value::Integer(90));
        assert_eq!(profile.depends[0].source, SourceLocator::path("../ssh-baseline"));
        assert!(profile.depends[0].include_controls);
        assert_eq!(profile.controls.len(), 2);

        let first = &profile.controls[0];
        assert_eq!(first.impact, 0.7);
        assert_eq!(first.location, CodeLocation::new("controls/filesystem.toml", 2));
        assert_eq!(first.tests[0].location.line, 8);
        assert_eq!(first.tests[0].assertions[1].op, Some(CompareOp::Cmp));

        let second = &profile.controls[1];
        assert_eq!(second.impact, DEFAULT_IMPACT);
        assert_eq!(second.tests[0].conditions[0].field, "user");
        assert_eq!(second.tests[1].location.line, 24);
    }

    #[test]
    fn test_missing_metadata() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_profile(dir.path()), Err(ProfileError::MissingMetadata(_))));
    }

    #[test]
    fn test_impact_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "profile.toml", "name = \"p\"\nversion = \"0.1.0\"\n");
        write(dir.path(), "controls/c.toml", "[[control]]\nid = \"x\"\nimpact = 7.0\n");
        assert!(matches!(load_profile(dir.path()), Err(ProfileError::Invalid { .. })));
    }

    #[test]
    fn test_duplicate_control_ids_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "profile.toml", "name = \"p\"\nversion = \"0.1.0\"\n");
        write(dir.path(), "controls/a.toml", "[[control]]\nid = \"x\"\n");
        write(dir.path(), "controls/b.toml", "[[control]]\nid = \"x\"\n");
        let err = load_profile(dir.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate control id 'x'"));
    }

    #[test]
    fn test_dependency_needs_one_source() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "profile.toml",
            "name = \"p\"\nversion = \"0.1.0\"\n[[depends]]\nname = \"q\"\n",
        );
        assert!(matches!(load_profile(dir.path()), Err(ProfileError::Invalid { .. })));
    }

    #[test]
    fn test_bad_version() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "profile.toml", "name = \"p\"\nversion = \"one\"\n");
        assert!(read_metadata(dir.path()).is_err());
    }
}
