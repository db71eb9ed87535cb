//! # Mock Transport
//!
//! In-memory command and file tables for tests and offline replays. Every
//! call is recorded so tests can assert exactly what a resource touched.
//!
//! ```ignore
//! let mock = MockTransport::new()
//!     .with_file("/etc/os-release", "ID=ubuntu\nVERSION_ID=22.04\n")
//!     .with_command("uname -m", "x86_64\n", 0);
//! let conn = Connection::new(TargetDescriptor::parse("mock://")?, Box::new(mock.clone()));
//! conn.os();
//! assert!(mock.was_called("uname -m"));
//! ```
//!
//! ## Replay files
//!
//! `mock://?replay=target.toml` loads the tables from TOML:
//!
//! ```toml
//! [platform]
//! name = "ubuntu"
//! family = "debian"
//! release = "22.04"
//!
//! [[commands]]
//! command = "uname -s"
//! stdout = "Linux\n"
//!
//! [files."/etc/hosts"]
//! content = "127.0.0.1 localhost\n"
//! mode = 0o644
//! owner = "root"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Deserialize;

use super::{CommandOutput, FileKind, FileStat, PlatformInfo, ShellKind, TargetDescriptor, Transport};
use crate::error::{ConfigurationError, ConnectionError};

/// Exit status returned for commands that have no recorded output
pub const COMMAND_NOT_FOUND: i32 = 127;

/// One recorded transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Command(String),
    Stat(String),
    Read(String),
}

#[derive(Debug, Clone)]
struct MockFile {
    content: Option<String>,
    stat: FileStat,
}

#[derive(Debug, Default)]
struct MockState {
    commands: HashMap<String, CommandOutput>,
    files: HashMap<String, MockFile>,
    platform: Option<PlatformInfo>,
    shell: Option<ShellKind>,
    failure: Option<ConnectionError>,
    calls: Vec<MockCall>,
}

/// Scripted transport; clones share state so a test can keep a handle
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport for a `mock://` locator, honoring `replay` and `platform` options
    pub fn from_target(target: &TargetDescriptor) -> Result<Self, ConfigurationError> {
        let mut mock = match target.option("replay") {
            Some(path) => Self::from_replay(path)?,
            None => Self::new(),
        };
        if let Some(name) = target.option("platform") {
            mock = mock.with_platform(PlatformInfo::for_name(name));
        }
        Ok(mock)
    }

    /// Load command and file tables from a TOML replay file
    pub fn from_replay(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let label = format!("mock://?replay={}", path.display());
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::new(&label, format!("cannot read replay file: {}", e)))?;
        let replay: ReplayFile = toml::from_str(&text)
            .map_err(|e| ConfigurationError::new(&label, format!("invalid replay file: {}", e)))?;

        let mut mock = Self::new();
        if let Some(platform) = replay.platform {
            mock = mock.with_platform(platform);
        }
        for c in replay.commands {
            mock = mock.with_output(c.command, CommandOutput::new(c.stdout, c.stderr, c.exit_status));
        }
        for (path, f) in replay.files {
            let size = f.content.as_ref().map(|c| c.len() as u64).unwrap_or(0);
            let mut stat = if f.directory {
                FileStat::directory(f.mode.unwrap_or(0o755))
            } else {
                FileStat::file(f.mode.unwrap_or(0o644), size)
            };
            stat.owner = f.owner;
            stat.group = f.group;
            mock.state().files.insert(
                path,
                MockFile {
                    content: f.content,
                    stat,
                },
            );
        }
        Ok(mock)
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_command(self, command: &str, stdout: &str, exit_status: i32) -> Self {
        self.with_output(command, CommandOutput::new(stdout, "", exit_status))
    }

    pub fn with_output(self, command: impl Into<String>, output: CommandOutput) -> Self {
        self.state().commands.insert(command.into(), output);
        self
    }

    /// Regular file owned by root with mode 0644
    pub fn with_file(self, path: &str, content: &str) -> Self {
        let mut stat = FileStat::file(0o644, content.len() as u64);
        stat.owner = Some("root".to_string());
        stat.group = Some("root".to_string());
        self.with_file_stat(path, Some(content), stat)
    }

    pub fn with_file_stat(self, path: &str, content: Option<&str>, stat: FileStat) -> Self {
        self.state().files.insert(
            path.to_string(),
            MockFile {
                content: content.map(str::to_string),
                stat,
            },
        );
        self
    }

    pub fn with_directory(self, path: &str) -> Self {
        self.with_file_stat(path, None, FileStat::directory(0o755))
    }

    pub fn with_platform(self, platform: PlatformInfo) -> Self {
        self.state().platform = Some(platform);
        self
    }

    pub fn with_shell(self, shell: ShellKind) -> Self {
        self.state().shell = Some(shell);
        self
    }

    /// Every subsequent call fails with `error`
    pub fn failing(self, error: ConnectionError) -> Self {
        self.state().failure = Some(error);
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    pub fn was_called(&self, command: &str) -> bool {
        self.state()
            .calls
            .iter()
            .any(|c| matches!(c, MockCall::Command(cmd) if cmd == command))
    }

    pub fn reset_calls(&self) {
        self.state().calls.clear();
    }

    fn record(&self, call: MockCall) -> Result<MutexGuard<'_, MockState>, ConnectionError> {
        let mut state = self.state();
        state.calls.push(call);
        if let Some(error) = state.failure.clone() {
            return Err(error);
        }
        Ok(state)
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    fn shell(&self) -> ShellKind {
        self.state().shell.unwrap_or(ShellKind::Posix)
    }

    fn run_command(&self, command: &str) -> Result<CommandOutput, ConnectionError> {
        let state = self.record(MockCall::Command(command.to_string()))?;
        Ok(state.commands.get(command).cloned().unwrap_or_else(|| {
            CommandOutput::new("", format!("{}: command not found", command), COMMAND_NOT_FOUND)
        }))
    }

    fn stat(&self, path: &str) -> Result<Option<FileStat>, ConnectionError> {
        let state = self.record(MockCall::Stat(path.to_string()))?;
        Ok(state.files.get(path).map(|f| f.stat.clone()))
    }

    fn read_file(&self, path: &str) -> Result<Option<String>, ConnectionError> {
        let state = self.record(MockCall::Read(path.to_string()))?;
        Ok(state
            .files
            .get(path)
            .filter(|f| f.stat.kind != FileKind::Directory)
            .and_then(|f| f.content.clone()))
    }

    fn implied_platform(&self) -> Option<PlatformInfo> {
        self.state().platform.clone()
    }
}

// ============================================================================
// Replay file format
// ============================================================================

#[derive(Debug, Deserialize)]
struct ReplayFile {
    platform: Option<PlatformInfo>,
    #[serde(default)]
    commands: Vec<ReplayCommand>,
    #[serde(default)]
    files: BTreeMap<String, ReplayEntry>,
}

#[derive(Debug, Deserialize)]
struct ReplayCommand {
    command: String,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    exit_status: i32,
}

#[derive(Debug, Deserialize)]
struct ReplayEntry {
    content: Option<String>,
    mode: Option<u32>,
    owner: Option<String>,
    group: Option<String>,
    #[serde(default)]
    directory: bool,
}
