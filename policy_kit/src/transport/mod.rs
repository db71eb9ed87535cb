//! # Transport Layer
//!
//! One contract over heterogeneous command/file surfaces (local shell, SSH,
//! container exec, WinRM, mock replay).
//!
//! ## Contract
//!
//! - `run` never fails on a non-zero exit status; only transport faults
//!   (timeout, disconnect, authentication) surface as [`ConnectionError`].
//! - `file(path)` never fails on a missing file; absence is a normal result.
//! - `os()` probes once per connection and caches the result.
//! - [`ConnectionManager::connect`] opens at most one connection per
//!   [`TargetDescriptor`] and never hands out a half-initialized one.
//!
//! No retries happen at this layer.

pub mod docker;
pub mod local;
pub mod mock;
pub mod platform;
pub mod process;
pub mod quoting;
pub mod ssh;
pub mod target;
pub mod winrm;

pub use platform::PlatformInfo;
pub use quoting::ShellKind;
pub use target::TargetDescriptor;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, ConnectionError, TransportError};
use crate::{log_debug, log_info};

/// Default per-command timeout
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Contract types
// ============================================================================

/// Output of one command; a non-zero exit status is ordinary data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_status: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_status,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// File metadata as reported by the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub kind: FileKind,
    /// Permission bits (`0o7777` mask); zero where the target has no modes
    pub mode: u32,
    pub size: u64,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub owner: Option<String>,
    pub group: Option<String>,
    /// Modification time, seconds since the epoch
    pub mtime: Option<i64>,
}

impl FileStat {
    /// Stat of a regular file with the given mode and size, everything else unknown
    pub fn file(mode: u32, size: u64) -> Self {
        Self {
            kind: FileKind::File,
            mode,
            size,
            uid: None,
            gid: None,
            owner: None,
            group: None,
            mtime: None,
        }
    }

    pub fn directory(mode: u32) -> Self {
        Self {
            kind: FileKind::Directory,
            ..Self::file(mode, 0)
        }
    }
}

/// A command/file surface on one target
///
/// Implementations only provide `run_command`; file access defaults to
/// shell commands appropriate to [`Transport::shell`].
pub trait Transport: Send + Sync {
    /// Backend name used in logs ("ssh", "winrm", ...)
    fn name(&self) -> &str;

    /// Interpreter commands are handed to
    fn shell(&self) -> ShellKind {
        ShellKind::Posix
    }

    /// Run one command to completion
    fn run_command(&self, command: &str) -> Result<CommandOutput, ConnectionError>;

    /// Metadata for `path`, `None` when it does not exist
    fn stat(&self, path: &str) -> Result<Option<FileStat>, ConnectionError> {
        remote_stat(self, path)
    }

    /// Content of `path`, `None` when it does not exist or cannot be read
    fn read_file(&self, path: &str) -> Result<Option<String>, ConnectionError> {
        remote_read(self, path)
    }

    /// Fixed platform for transports that only ever reach one OS family
    fn implied_platform(&self) -> Option<PlatformInfo> {
        None
    }

    /// Release backend sessions; called once when the connection drops
    fn close(&self) {}
}

// ============================================================================
// Command-based file access
// ============================================================================

const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

fn remote_stat<T: Transport + ?Sized>(
    transport: &T,
    path: &str,
) -> Result<Option<FileStat>, ConnectionError> {
    let shell = transport.shell();
    let quoted = shell.quote(path);
    let command = match shell {
        ShellKind::Posix => format!(
            "stat -c '%f|%s|%u|%g|%U|%G|%Y' -- {p} 2>/dev/null || stat -f '%Xp|%z|%u|%g|%Su|%Sg|%m' {p} 2>/dev/null",
            p = quoted
        ),
        ShellKind::PowerShell | ShellKind::Cmd => format!(
            "$i = Get-Item -LiteralPath {p} -Force -ErrorAction Stop; \
             $o = (Get-Acl -LiteralPath {p}).Owner; \
             '{{0}}|{{1}}|{{2}}|{{3}}' -f $i.PSIsContainer, $(if ($i.PSIsContainer) {{ 0 }} else {{ $i.Length }}), \
             ([DateTimeOffset]$i.LastWriteTimeUtc).ToUnixTimeSeconds(), $o",
            p = quoted
        ),
    };

    let output = transport.run_command(&command)?;
    if !output.success() {
        return Ok(None);
    }
    let line = output.stdout.lines().next().unwrap_or_default().trim();
    Ok(match shell {
        ShellKind::Posix => parse_posix_stat(line),
        _ => parse_powershell_stat(line),
    })
}

fn remote_read<T: Transport + ?Sized>(
    transport: &T,
    path: &str,
) -> Result<Option<String>, ConnectionError> {
    let shell = transport.shell();
    let command = match shell {
        ShellKind::Posix => format!("cat -- {}", shell.quote(path)),
        ShellKind::PowerShell | ShellKind::Cmd => format!(
            "Get-Content -LiteralPath {} -Raw -ErrorAction Stop",
            ShellKind::PowerShell.quote(path)
        ),
    };
    let output = transport.run_command(&command)?;
    if output.success() {
        Ok(Some(output.stdout))
    } else {
        Ok(None)
    }
}

/// Parse `rawmode_hex|size|uid|gid|user|group|mtime`
pub(crate) fn parse_posix_stat(line: &str) -> Option<FileStat> {
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() != 7 {
        return None;
    }
    let raw = u32::from_str_radix(parts.first()?, 16).ok()?;
    let kind = match raw & S_IFMT {
        S_IFREG => FileKind::File,
        S_IFDIR => FileKind::Directory,
        S_IFLNK => FileKind::Symlink,
        _ => FileKind::Other,
    };
    let name = |s: &str| match s {
        "" | "UNKNOWN" => None,
        other => Some(other.to_string()),
    };
    Some(FileStat {
        kind,
        mode: raw & 0o7777,
        size: parts.get(1)?.parse().unwrap_or(0),
        uid: parts.get(2)?.parse().ok(),
        gid: parts.get(3)?.parse().ok(),
        owner: name(parts.get(4)?),
        group: name(parts.get(5)?),
        mtime: parts.get(6)?.parse().ok(),
    })
}

/// Parse `IsContainer|length|mtime|owner`
pub(crate) fn parse_powershell_stat(line: &str) -> Option<FileStat> {
    let mut parts = line.splitn(4, '|');
    let is_dir = parts.next()?.eq_ignore_ascii_case("true");
    let size = parts.next()?.parse().unwrap_or(0);
    let mtime = parts.next()?.parse().ok();
    let owner = parts.next().map(str::trim).filter(|o| !o.is_empty()).map(str::to_string);
    Some(FileStat {
        kind: if is_dir { FileKind::Directory } else { FileKind::File },
        mode: 0,
        size,
        uid: None,
        gid: None,
        owner,
        group: None,
        mtime,
    })
}

// ============================================================================
// Connection
// ============================================================================

/// Live handle bound to one target
pub struct Connection {
    target: TargetDescriptor,
    transport: Box<dyn Transport>,
    platform: OnceLock<PlatformInfo>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target.to_string())
            .field("transport", &self.transport.name())
            .field("platform", &self.platform.get())
            .finish()
    }
}

impl Connection {
    /// Wrap an already-established transport
    pub fn new(target: TargetDescriptor, transport: Box<dyn Transport>) -> Self {
        Self {
            target,
            transport,
            platform: OnceLock::new(),
        }
    }

    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn shell(&self) -> ShellKind {
        self.transport.shell()
    }

    /// Quote one argument for this connection's shell
    pub fn quote(&self, arg: &str) -> String {
        self.transport.shell().quote(arg)
    }

    /// Run a command; a non-zero exit status is returned, not raised
    pub fn run(&self, command: &str) -> Result<CommandOutput, ConnectionError> {
        log_debug!("Running command", "transport" => self.transport.name(), "command" => command);
        let output = self.transport.run_command(command)?;
        log_debug!("Command finished", "exit_status" => output.exit_status);
        Ok(output)
    }

    /// Lazy handle for a path on the target
    pub fn file(&self, path: &str) -> FileHandle<'_> {
        FileHandle {
            conn: self,
            path: path.to_string(),
            stat: OnceLock::new(),
            content: OnceLock::new(),
        }
    }

    /// Platform of the target, probed on first call and cached
    pub fn os(&self) -> &PlatformInfo {
        self.platform.get_or_init(|| platform::detect(self))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.transport.close();
    }
}

/// Path on a target; stat and content are fetched at most once
pub struct FileHandle<'a> {
    conn: &'a Connection,
    path: String,
    stat: OnceLock<Result<Option<FileStat>, ConnectionError>>,
    content: OnceLock<Result<Option<String>, ConnectionError>>,
}

impl FileHandle<'_> {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn stat(&self) -> Result<Option<FileStat>, ConnectionError> {
        self.stat
            .get_or_init(|| self.conn.transport.stat(&self.path))
            .clone()
    }

    pub fn content(&self) -> Result<Option<String>, ConnectionError> {
        self.content
            .get_or_init(|| self.conn.transport.read_file(&self.path))
            .clone()
    }

    pub fn exists(&self) -> Result<bool, ConnectionError> {
        Ok(self.stat()?.is_some())
    }

    pub fn is_file(&self) -> Result<bool, ConnectionError> {
        Ok(matches!(self.stat()?, Some(s) if s.kind == FileKind::File))
    }

    pub fn is_directory(&self) -> Result<bool, ConnectionError> {
        Ok(matches!(self.stat()?, Some(s) if s.kind == FileKind::Directory))
    }

    pub fn mode(&self) -> Result<Option<u32>, ConnectionError> {
        Ok(self.stat()?.map(|s| s.mode))
    }

    pub fn owner(&self) -> Result<Option<String>, ConnectionError> {
        Ok(self.stat()?.and_then(|s| s.owner))
    }
}

// ============================================================================
// Connection manager
// ============================================================================

/// Settings shared by every transport a manager opens
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub command_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// Opens a transport for a custom scheme
pub type TransportFactory = Box<
    dyn Fn(&TargetDescriptor, &ConnectOptions) -> Result<Box<dyn Transport>, TransportError>
        + Send
        + Sync,
>;

/// Opens and memoizes connections, one per target descriptor
pub struct ConnectionManager {
    options: ConnectOptions,
    connections: Mutex<HashMap<TargetDescriptor, Arc<Connection>>>,
    extensions: HashMap<String, TransportFactory>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ConnectOptions::default())
    }
}

impl ConnectionManager {
    pub fn new(options: ConnectOptions) -> Self {
        Self {
            options,
            connections: Mutex::new(HashMap::new()),
            extensions: HashMap::new(),
        }
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Register a factory for a scheme the built-in transports don't handle
    pub fn register_scheme(&mut self, scheme: impl Into<String>, factory: TransportFactory) {
        self.extensions.insert(scheme.into().to_ascii_lowercase(), factory);
    }

    /// Bind a pre-built transport to a descriptor, replacing any open connection
    pub fn attach(&self, target: TargetDescriptor, transport: Box<dyn Transport>) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(target.clone(), transport));
        self.lock().insert(target, Arc::clone(&conn));
        conn
    }

    /// Parse a locator and connect
    pub fn connect_locator(&self, locator: &str) -> Result<Arc<Connection>, TransportError> {
        let target = TargetDescriptor::parse(locator)?;
        self.connect(&target)
    }

    /// Return the open connection for `target`, opening it on first use
    pub fn connect(&self, target: &TargetDescriptor) -> Result<Arc<Connection>, TransportError> {
        let mut connections = self.lock();
        if let Some(conn) = connections.get(target) {
            log_debug!("Reusing connection", "target" => target);
            return Ok(Arc::clone(conn));
        }

        let transport = self.open(target)?;
        log_info!("Connection opened", "target" => target, "transport" => transport.name());

        let conn = Arc::new(Connection::new(target.clone(), transport));
        connections.insert(target.clone(), Arc::clone(&conn));
        Ok(conn)
    }

    /// Number of distinct open connections
    pub fn open_connections(&self) -> usize {
        self.lock().len()
    }

    /// Drop every memoized connection; backends close once the last handle goes
    pub fn close_all(&self) {
        let mut connections = self.lock();
        let count = connections.len();
        connections.clear();
        if count > 0 {
            log_debug!("Connections released", "count" => count);
        }
    }

    fn open(&self, target: &TargetDescriptor) -> Result<Box<dyn Transport>, TransportError> {
        let options = &self.options;
        let transport: Box<dyn Transport> = match target.scheme() {
            "local" => Box::new(local::LocalTransport::new(options.command_timeout)),
            "ssh" => Box::new(ssh::SshTransport::connect(target, options)?),
            "docker" => Box::new(docker::DockerTransport::connect(target, options)?),
            "winrm" => Box::new(winrm::WinRmTransport::connect(target, options)?),
            "mock" => Box::new(mock::MockTransport::from_target(target)?),
            scheme => match self.extensions.get(scheme) {
                Some(factory) => factory(target, options)?,
                None => {
                    return Err(ConfigurationError::new(
                        target.to_string(),
                        format!("no transport registered for scheme '{}'", scheme),
                    )
                    .into())
                }
            },
        };
        Ok(transport)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TargetDescriptor, Arc<Connection>>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use mock::MockTransport;

    #[test]
    fn test_parse_gnu_stat_line() {
        let stat = parse_posix_stat("81a4|1024|0|0|root|root|1700000000").unwrap();
        assert_eq!(stat.kind, FileKind::File);
        assert_eq!(stat.mode, 0o644);
        assert_eq!(stat.size, 1024);
        assert_eq!(stat.owner.as_deref(), Some("root"));
        assert_eq!(stat.mtime, Some(1_700_000_000));

        let dir = parse_posix_stat("41ed|4096|0|0|root|root|1").unwrap();
        assert_eq!(dir.kind, FileKind::Directory);
        assert_eq!(dir.mode, 0o755);
    }

    #[test]
    fn test_parse_stat_rejects_garbage() {
        assert!(parse_posix_stat("").is_none());
        assert!(parse_posix_stat("stat: cannot stat").is_none());
    }

    #[test]
    fn test_parse_powershell_stat_line() {
        let stat = parse_powershell_stat("False|42|1700000000|BUILTIN\\Administrators").unwrap();
        assert_eq!(stat.kind, FileKind::File);
        assert_eq!(stat.size, 42);
        assert_eq!(stat.owner.as_deref(), Some("BUILTIN\\Administrators"));
    }

    #[test]
    fn test_nonzero_exit_is_data() {
        let mock = MockTransport::new().with_command("false", "", 1);
        let conn = Connection::new(TargetDescriptor::parse("mock://").unwrap(), Box::new(mock));
        let out = conn.run("false").unwrap();
        assert_eq!(out.exit_status, 1);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let conn = Connection::new(
            TargetDescriptor::parse("mock://").unwrap(),
            Box::new(MockTransport::new()),
        );
        let file = conn.file("/nope");
        assert!(!file.exists().unwrap());
        assert_eq!(file.content().unwrap(), None);
    }

    #[test]
    fn test_file_handle_fetches_once() {
        let mock = MockTransport::new().with_file("/etc/motd", "hi");
        let conn = Connection::new(TargetDescriptor::parse("mock://").unwrap(), Box::new(mock.clone()));
        let file = conn.file("/etc/motd");
        for _ in 0..3 {
            assert!(file.is_file().unwrap());
            assert_eq!(file.content().unwrap().as_deref(), Some("hi"));
        }
        assert_eq!(mock.call_count(), 2);
    }

    #[test]
    fn test_connect_reuses_identical_descriptor() {
        let manager = ConnectionManager::default();
        let a = manager.connect_locator("mock://host-a").unwrap();
        let b = manager.connect_locator("mock://host-a").unwrap();
        let c = manager.connect_locator("mock://host-b").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(manager.open_connections(), 2);
    }

    #[test]
    fn test_unknown_scheme_is_configuration_error() {
        let manager = ConnectionManager::default();
        let err = manager.connect_locator("carrier-pigeon://coop").unwrap_err();
        assert!(matches!(err, TransportError::Configuration(_)));
        assert_eq!(manager.open_connections(), 0);
    }

    #[test]
    fn test_extension_scheme_factory() {
        let mut manager = ConnectionManager::default();
        manager.register_scheme(
            "lab",
            Box::new(|_, _| Ok(Box::new(MockTransport::new().with_command("hostname", "lab1\n", 0)))),
        );
        let conn = manager.connect_locator("lab://rack1").unwrap();
        assert_eq!(conn.run("hostname").unwrap().stdout, "lab1\n");
    }

    #[test]
    fn test_failed_handshake_leaves_no_connection() {
        let manager = ConnectionManager::default();
        let err = manager.connect_locator("ssh://host:0").unwrap_err();
        assert!(matches!(err, TransportError::Configuration(_)));
        assert_eq!(manager.open_connections(), 0);
    }
}
