//! # Run Results
//!
//! The serializable result tree handed to reporters:
//!
//! ```text
//! RunResult
//! ├── statistics        counts at test and control granularity
//! └── profiles[]
//!     └── controls[]    rolled-up status
//!         └── results[] one per assertion
//! ```
//!
//! ## Control rollup
//!
//! | Tests | Control status |
//! |-------|----------------|
//! | none | skipped |
//! | any failed or error | failed |
//! | all skipped | skipped |
//! | otherwise | passed |
//!
//! An `error` test counts as a control failure but keeps its own status at
//! test granularity.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::profile::{CodeLocation, Control, Profile};
use crate::transport::PlatformInfo;
use crate::value::Value;

// ============================================================================
// Tests
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
    Error,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Skipped => "skipped",
            TestStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub status: TestStatus,
    /// Subject and expectation, e.g. `File /etc/passwd mode should cmp "0644"`
    pub code_desc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub resource: String,
    pub location: CodeLocation,
    pub run_time: f64,
}

impl TestResult {
    pub fn new(status: TestStatus, code_desc: impl Into<String>, resource: &str, location: &CodeLocation) -> Self {
        Self {
            status,
            code_desc: code_desc.into(),
            message: None,
            resource: resource.to_string(),
            location: location.clone(),
            run_time: 0.0,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_run_time(mut self, elapsed: Duration) -> Self {
        self.run_time = elapsed.as_secs_f64();
        self
    }
}

// ============================================================================
// Controls
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlStatus {
    Passed,
    Failed,
    Skipped,
}

impl fmt::Display for ControlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControlStatus::Passed => "passed",
            ControlStatus::Failed => "failed",
            ControlStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Overall control status from its test results
pub fn rollup(results: &[TestResult]) -> ControlStatus {
    if results.is_empty() {
        return ControlStatus::Skipped;
    }
    if results
        .iter()
        .any(|r| matches!(r.status, TestStatus::Failed | TestStatus::Error))
    {
        return ControlStatus::Failed;
    }
    if results.iter().all(|r| r.status == TestStatus::Skipped) {
        return ControlStatus::Skipped;
    }
    ControlStatus::Passed
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResult {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    pub impact: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, Value>,
    pub location: CodeLocation,
    pub status: ControlStatus,
    pub results: Vec<TestResult>,
}

impl ControlResult {
    pub fn new(control: &Control, results: Vec<TestResult>) -> Self {
        Self {
            id: control.id.clone(),
            title: control.title.clone(),
            desc: control.desc.clone(),
            impact: control.impact,
            tags: control.tags.clone(),
            location: control.location.clone(),
            status: rollup(&results),
            results,
        }
    }
}

// ============================================================================
// Profiles and runs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileResult {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Profile that pulled this one in as a dependency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub controls: Vec<ControlResult>,
}

impl ProfileResult {
    pub fn new(profile: &Profile, parent: Option<&str>) -> Self {
        Self {
            name: profile.name.clone(),
            version: profile.version.to_string(),
            title: profile.title.clone(),
            parent: parent.map(str::to_string),
            controls: Vec::new(),
        }
    }
}

/// Control-granularity counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Test-granularity counts; `error` is kept apart from `failed`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub error: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub controls: ControlCounts,
    pub tests: TestCounts,
    pub duration: f64,
}

impl Statistics {
    pub fn from_profiles(profiles: &[ProfileResult], duration: Duration) -> Self {
        let mut stats = Statistics {
            duration: duration.as_secs_f64(),
            ..Default::default()
        };
        for control in profiles.iter().flat_map(|p| &p.controls) {
            stats.controls.total += 1;
            match control.status {
                ControlStatus::Passed => stats.controls.passed += 1,
                ControlStatus::Failed => stats.controls.failed += 1,
                ControlStatus::Skipped => stats.controls.skipped += 1,
            }
            for test in &control.results {
                stats.tests.total += 1;
                match test.status {
                    TestStatus::Passed => stats.tests.passed += 1,
                    TestStatus::Failed => stats.tests.failed += 1,
                    TestStatus::Skipped => stats.tests.skipped += 1,
                    TestStatus::Error => stats.tests.error += 1,
                }
            }
        }
        stats
    }
}

/// Everything one invocation produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub target: String,
    pub platform: PlatformInfo,
    pub profiles: Vec<ProfileResult>,
    pub statistics: Statistics,
}

impl RunResult {
    pub fn new(
        target: impl Into<String>,
        platform: PlatformInfo,
        started_at: DateTime<Utc>,
        profiles: Vec<ProfileResult>,
        duration: Duration,
    ) -> Self {
        let statistics = Statistics::from_profiles(&profiles, duration);
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at,
            target: target.into(),
            platform,
            profiles,
            statistics,
        }
    }

    pub fn controls(&self) -> impl Iterator<Item = &ControlResult> + '_ {
        self.profiles.iter().flat_map(|p| &p.controls)
    }

    pub fn control(&self, id: &str) -> Option<&ControlResult> {
        self.controls().find(|c| c.id == id)
    }
}
