//! End-to-end audit runs against mock targets.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use policy_kit::config::RunConfig;
use policy_kit::error::{AuditError, ResolveError};
use policy_kit::execution_api::{run_audit, Auditor};
use policy_kit::profile::LOCKFILE_NAME;
use policy_kit::resources::create_default_registry;
use policy_kit::results::{ControlStatus, TestStatus};
use policy_kit::transport::mock::MockTransport;
use policy_kit::transport::{ConnectionManager, PlatformInfo, TargetDescriptor};

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn profile(dir: &Path, name: &str, extra: &str, controls: &str) {
    write(
        dir,
        "profile.toml",
        &format!("name = \"{}\"\nversion = \"1.0.0\"\n{}", name, extra),
    );
    write(dir, "controls/main.toml", controls);
}

/// Auditor whose `mock://` target is bound to `mock`
fn auditor(mock: &MockTransport) -> Auditor {
    let auditor = Auditor::new(
        Arc::new(create_default_registry().unwrap()),
        ConnectionManager::default(),
    );
    let conn = auditor
        .connections()
        .attach(TargetDescriptor::parse("mock://").unwrap(), Box::new(mock.clone()));
    conn.os();
    mock.reset_calls();
    auditor
}

fn windows_mock() -> MockTransport {
    MockTransport::new()
        .with_platform(PlatformInfo::new("windows", "windows"))
        .with_command("whoami", "builtin\\auditor\n", 0)
}

const MIXED_CONTROLS: &str = r#"
[[control]]
id = "who-01"

[[control.test]]
resource = "command"
params = { command = "whoami" }
assert = [{ property = "exit_status", expected = 0 }]

[[control]]
id = "mod-01"

[[control.test]]
resource = "kernel_module"
params = { name = "bridge" }
assert = [{ matcher = "exist" }]
"#;

#[test]
fn test_unsupported_resource_is_skipped_not_failed() {
    let dir = tempfile::tempdir().unwrap();
    profile(dir.path(), "mixed", "", MIXED_CONTROLS);

    let config = RunConfig::default().with_target("mock://").with_profile(dir.path());
    let result = auditor(&windows_mock()).run(&config).unwrap();

    let stats = &result.statistics;
    assert_eq!((stats.controls.passed, stats.controls.skipped), (1, 1));
    assert_eq!((stats.tests.passed, stats.tests.skipped), (1, 1));
    assert_eq!(stats.controls.failed, 0);

    let skipped = result.control("mod-01").unwrap();
    assert_eq!(skipped.status, ControlStatus::Skipped);
    assert!(skipped.results[0]
        .message
        .as_deref()
        .unwrap()
        .contains("not supported on platform windows"));
}

#[test]
fn test_skipped_resource_makes_no_transport_calls() {
    let dir = tempfile::tempdir().unwrap();
    profile(
        dir.path(),
        "modules",
        "",
        r#"
[[control]]
id = "mod-01"

[[control.test]]
resource = "kernel_module"
params = { name = "bridge" }
assert = [{ matcher = "exist" }, { property = "loaded", expected = true }]
"#,
    );

    let mock = windows_mock();
    let auditor = auditor(&mock);
    auditor
        .run(&RunConfig::default().with_target("mock://").with_profile(dir.path()))
        .unwrap();
    assert_eq!(mock.call_count(), 0);
}

#[test]
fn test_errored_test_does_not_stop_later_controls() {
    let dir = tempfile::tempdir().unwrap();
    profile(
        dir.path(),
        "errors",
        "",
        r#"
[[control]]
id = "broken-01"

[[control.test]]
resource = "no_such_resource"
assert = [{ matcher = "exist" }]

[[control]]
id = "who-01"

[[control.test]]
resource = "command"
params = { command = "whoami" }
assert = [{ property = "stdout", op = "match", expected = "auditor" }]
"#,
    );

    let config = RunConfig::default().with_target("mock://").with_profile(dir.path());
    let result = auditor(&windows_mock()).run(&config).unwrap();

    let broken = result.control("broken-01").unwrap();
    assert_eq!(broken.status, ControlStatus::Failed);
    assert_eq!(broken.results[0].status, TestStatus::Error);
    assert_eq!(result.control("who-01").unwrap().status, ControlStatus::Passed);
    assert_eq!(result.statistics.tests.error, 1);
}

#[test]
fn test_control_filter_limits_execution() {
    let dir = tempfile::tempdir().unwrap();
    let control = |id: &str| {
        format!(
            "[[control]]\nid = \"{}\"\n\n[[control.test]]\nresource = \"command\"\nparams = {{ command = \"whoami\" }}\nassert = [{{ property = \"exit_status\", expected = 0 }}]\n\n",
            id
        )
    };
    let controls: String = ["db_1", "db_2", "web_1"].into_iter().map(control).collect();
    profile(dir.path(), "filtered", "", &controls);

    let config = RunConfig::default()
        .with_target("mock://")
        .with_profile(dir.path())
        .with_controls(["/^db_/"]);
    let result = auditor(&windows_mock()).run(&config).unwrap();

    assert_eq!(result.statistics.controls.total, 2);
    assert!(result.control("db_1").is_some());
    assert!(result.control("web_1").is_none());
}

#[test]
fn test_cycle_is_reported_with_both_profiles() {
    let root = tempfile::tempdir().unwrap();
    let a = root.path().join("a");
    let b = root.path().join("b");
    profile(&a, "a", "[[depends]]\nname = \"b\"\npath = \"../b\"\n", "");
    profile(&b, "b", "[[depends]]\nname = \"a\"\npath = \"../a\"\n", "");

    let config = RunConfig::default().with_target("mock://").with_profile(&a);
    let err = auditor(&windows_mock()).run(&config).unwrap_err();
    match err {
        AuditError::Resolve(ResolveError::CyclicDependency { path }) => {
            assert!(path.contains(&"a".to_string()));
            assert!(path.contains(&"b".to_string()));
        }
        other => panic!("expected a cycle, got {other}"),
    }
}

#[test]
fn test_lockfile_is_deterministic() {
    let root = tempfile::tempdir().unwrap();
    let app = root.path().join("app");
    let base = root.path().join("base");
    profile(
        &app,
        "app",
        "[[depends]]\nname = \"base\"\nversion = \"^1\"\npath = \"../base\"\n",
        "",
    );
    profile(&base, "base", "", MIXED_CONTROLS);

    let config = RunConfig::default().with_profile(&app);
    let auditor = auditor(&windows_mock());

    let first = auditor.resolve(&app, &config).unwrap();
    assert!(!first.from_lock);
    let lock = fs::read_to_string(app.join(LOCKFILE_NAME)).unwrap();

    fs::remove_file(app.join(LOCKFILE_NAME)).unwrap();
    auditor.resolve(&app, &config).unwrap();
    assert_eq!(fs::read_to_string(app.join(LOCKFILE_NAME)).unwrap(), lock);

    let bound = auditor.resolve(&app, &config).unwrap();
    assert!(bound.from_lock);
    assert_eq!(fs::read_to_string(app.join(LOCKFILE_NAME)).unwrap(), lock);
}

#[test]
fn test_dependency_controls_run_first_with_parent() {
    let root = tempfile::tempdir().unwrap();
    let app = root.path().join("app");
    let base = root.path().join("base");
    let app_controls = MIXED_CONTROLS.replace("who-01", "app-01").replace("mod-01", "app-02");
    profile(&app, "app", "[[depends]]\nname = \"base\"\npath = \"../base\"\n", &app_controls);
    profile(&base, "base", "", MIXED_CONTROLS);

    let config = RunConfig::default().with_target("mock://").with_profile(&app);
    let result = auditor(&windows_mock()).run(&config).unwrap();

    assert_eq!(result.profiles.len(), 2);
    assert_eq!(result.profiles[0].name, "base");
    assert_eq!(result.profiles[0].parent.as_deref(), Some("app"));
    assert_eq!(result.profiles[1].parent, None);
    assert_eq!(result.statistics.controls.total, 4);
}

#[test]
fn test_unsupported_profile_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    profile(dir.path(), "linux-only", "supports = [{ family = \"linux\" }]\n", MIXED_CONTROLS);

    let config = RunConfig::default().with_target("mock://").with_profile(dir.path());
    let err = auditor(&windows_mock()).run(&config).unwrap_err();
    assert!(matches!(err, AuditError::UnsupportedPlatform { ref profile, .. } if profile == "linux-only@1.0.0"));
}

#[test]
fn test_runs_share_one_connection() {
    let dir = tempfile::tempdir().unwrap();
    profile(dir.path(), "mixed", "", MIXED_CONTROLS);

    let config = RunConfig::default()
        .with_target("mock://?platform=windows")
        .with_profile(dir.path());
    let auditor = Auditor::for_config(&config).unwrap();
    auditor.run(&config).unwrap();
    auditor.run(&config).unwrap();
    assert_eq!(auditor.connections().open_connections(), 1);
}

#[test]
fn test_replayed_target_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "target.toml",
        r#"
[platform]
name = "ubuntu"
family = "debian"
release = "22.04"

[files."/etc/hosts"]
content = "127.0.0.1 localhost\n10.0.0.5 db01 db01.internal\n"
"#,
    );
    let profile_dir = dir.path().join("hosts");
    profile(
        &profile_dir,
        "hosts",
        "",
        r#"
[[control]]
id = "hosts-01"
title = "db01 resolves locally"

[[control.test]]
resource = "etc_hosts"
where = [{ field = "primary_name", value = "db01" }]
assert = [{ property = "count", expected = 1 }, { property = "ip_address", op = "include", expected = "10.0.0.5" }]
"#,
    );

    let config = RunConfig::default()
        .with_target(format!("mock://?replay={}", dir.path().join("target.toml").display()))
        .with_profile(&profile_dir);
    let result = run_audit(&config).unwrap();
    assert_eq!(result.platform.name, "ubuntu");
    assert_eq!(result.control("hosts-01").unwrap().status, ControlStatus::Passed);
}
