//! # Platform Detection
//!
//! Decision-tree probing of a connection's operating system. Probes run in
//! priority order and the first hit wins:
//!
//! 1. `/etc/os-release`
//! 2. legacy release files (`/etc/redhat-release`, `/etc/debian_version`, `/etc/alpine-release`)
//! 3. `uname -s` / `uname -r`
//! 4. `cmd /c ver` for Windows hosts
//! 5. the platform implied by the transport (e.g. WinRM is always Windows)
//!
//! The result is memoized by the owning [`Connection`](super::Connection).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::Connection;
use crate::log_debug;

/// Operating system facts about a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub name: String,
    pub family: String,
    pub release: Option<String>,
    pub arch: Option<String>,
}

const DEBIAN: &[&str] = &["debian", "ubuntu", "linuxmint", "raspbian", "kali"];
const REDHAT: &[&str] = &[
    "redhat", "rhel", "centos", "fedora", "amazon", "ol", "oracle", "rocky", "almalinux",
    "scientific",
];
const SUSE: &[&str] = &["suse", "sles", "opensuse", "opensuse-leap", "opensuse-tumbleweed"];
const LINUX_FAMILIES: &[&str] = &["linux", "debian", "redhat", "suse", "alpine", "arch", "gentoo"];
const BSD_FAMILIES: &[&str] = &["darwin", "freebsd", "openbsd", "netbsd", "bsd"];
const UNIX_FAMILIES: &[&str] = &["solaris", "aix", "hpux"];

impl PlatformInfo {
    pub fn new(name: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            family: family.into(),
            release: None,
            arch: None,
        }
    }

    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    /// Fallback when every probe missed
    pub fn unknown() -> Self {
        Self::new("unknown", "unknown")
    }

    /// Platform for an OS name, deriving the family from known names
    pub fn for_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        let family = family_for(&name).map(str::to_string).unwrap_or_else(|| name.clone());
        Self::new(name, family)
    }

    /// Family chain, most specific first (`ubuntu` → debian, linux, unix, os)
    pub fn families(&self) -> Vec<String> {
        let mut out = vec![self.family.clone()];
        let family = self.family.as_str();
        if family != "linux" && LINUX_FAMILIES.contains(&family) {
            out.push("linux".to_string());
        }
        if family != "bsd" && BSD_FAMILIES.contains(&family) {
            out.push("bsd".to_string());
        }
        if self.is_unix() {
            out.push("unix".to_string());
        }
        if family != "unknown" {
            out.push("os".to_string());
        }
        out
    }

    /// Name or any family in the chain matches
    pub fn is_family(&self, family: &str) -> bool {
        self.name.eq_ignore_ascii_case(family)
            || self.families().iter().any(|f| f.eq_ignore_ascii_case(family))
    }

    pub fn is_linux(&self) -> bool {
        LINUX_FAMILIES.contains(&self.family.as_str())
    }

    pub fn is_windows(&self) -> bool {
        self.family == "windows"
    }

    pub fn is_unix(&self) -> bool {
        let family = self.family.as_str();
        self.is_linux() || BSD_FAMILIES.contains(&family) || UNIX_FAMILIES.contains(&family)
    }

    pub fn is_unknown(&self) -> bool {
        self.family == "unknown"
    }
}

impl fmt::Display for PlatformInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(release) = &self.release {
            write!(f, " {}", release)?;
        }
        if let Some(arch) = &self.arch {
            write!(f, " ({})", arch)?;
        }
        Ok(())
    }
}

fn family_for(name: &str) -> Option<&'static str> {
    if DEBIAN.contains(&name) {
        Some("debian")
    } else if REDHAT.contains(&name) {
        Some("redhat")
    } else if SUSE.contains(&name) || name.starts_with("opensuse") {
        Some("suse")
    } else {
        match name {
            "alpine" => Some("alpine"),
            "arch" | "manjaro" => Some("arch"),
            "gentoo" => Some("gentoo"),
            "linux" => Some("linux"),
            "windows" => Some("windows"),
            "mac_os_x" | "darwin" => Some("darwin"),
            "freebsd" | "openbsd" | "netbsd" | "solaris" | "aix" | "hpux" => {
                UNIX_FAMILIES.iter().chain(BSD_FAMILIES).copied().find(|f| *f == name)
            }
            _ => None,
        }
    }
}

/// Run the probe chain against a connection
pub(crate) fn detect(conn: &Connection) -> PlatformInfo {
    let probes: [(&str, fn(&Connection) -> Option<PlatformInfo>); 5] = [
        ("os-release", probe_os_release),
        ("release-files", probe_release_files),
        ("uname", probe_uname),
        ("windows-ver", probe_windows_ver),
        ("transport", |c| c.transport().implied_platform()),
    ];

    for (name, probe) in probes {
        if let Some(mut info) = probe(conn) {
            if info.arch.is_none() && !info.is_windows() {
                info.arch = command_line(conn, "uname -m");
            }
            log_debug!("Platform detected", "probe" => name, "platform" => &info);
            return info;
        }
    }

    log_debug!("Platform detection failed", "target" => conn.target());
    PlatformInfo::unknown()
}

fn read(conn: &Connection, path: &str) -> Option<String> {
    match conn.file(path).content() {
        Ok(content) => content,
        Err(e) => {
            log_debug!("Platform probe read failed", "path" => path, "error" => e);
            None
        }
    }
}

/// First stdout line of a successful command
fn command_line(conn: &Connection, command: &str) -> Option<String> {
    let output = conn.run(command).ok()?;
    if output.exit_status != 0 {
        return None;
    }
    output
        .stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

fn probe_os_release(conn: &Connection) -> Option<PlatformInfo> {
    let content = read(conn, "/etc/os-release")?;
    let fields = parse_os_release(&content);
    let id = fields.get("ID")?.to_ascii_lowercase();

    let family = family_for(&id)
        .or_else(|| {
            fields
                .get("ID_LIKE")
                .and_then(|like| like.split_whitespace().find_map(family_for))
        })
        .unwrap_or("linux");

    let mut info = PlatformInfo::new(id, family);
    info.release = fields.get("VERSION_ID").cloned();
    Some(info)
}

pub(crate) fn parse_os_release(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| {
            let v = v.trim().trim_matches('"').trim_matches('\'');
            (k.trim().to_string(), v.to_string())
        })
        .collect()
}

fn probe_release_files(conn: &Connection) -> Option<PlatformInfo> {
    if let Some(content) = read(conn, "/etc/redhat-release") {
        let line = content.lines().next().unwrap_or_default();
        let first = line
            .split_whitespace()
            .next()
            .unwrap_or("redhat")
            .to_ascii_lowercase();
        let name = if first == "red" { "redhat".to_string() } else { first };
        let mut info = PlatformInfo::new(name, "redhat");
        if let Ok(re) = Regex::new(r"release\s+(\S+)") {
            info.release = re
                .captures(line)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
        }
        return Some(info);
    }

    if let Some(content) = read(conn, "/etc/debian_version") {
        return Some(PlatformInfo::new("debian", "debian").with_release(content.trim()));
    }

    if let Some(content) = read(conn, "/etc/alpine-release") {
        return Some(PlatformInfo::new("alpine", "alpine").with_release(content.trim()));
    }

    None
}

fn probe_uname(conn: &Connection) -> Option<PlatformInfo> {
    let kernel = command_line(conn, "uname -s")?;
    let (name, family) = match kernel.to_ascii_lowercase().as_str() {
        "linux" => ("linux", "linux"),
        "darwin" => ("mac_os_x", "darwin"),
        "freebsd" => ("freebsd", "freebsd"),
        "openbsd" => ("openbsd", "openbsd"),
        "netbsd" => ("netbsd", "netbsd"),
        "sunos" => ("solaris", "solaris"),
        "aix" => ("aix", "aix"),
        "hp-ux" => ("hpux", "hpux"),
        _ => return None,
    };
    let mut info = PlatformInfo::new(name, family);
    info.release = command_line(conn, "uname -r");
    Some(info)
}

fn probe_windows_ver(conn: &Connection) -> Option<PlatformInfo> {
    let line = command_line(conn, "cmd /c ver")?;
    if !line.contains("Windows") {
        return None;
    }
    let mut info = PlatformInfo::new("windows", "windows");
    if let Ok(re) = Regex::new(r"Version\s+([\d.]+)") {
        info.release = re
            .captures(&line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
    }
    info.arch = command_line(conn, "cmd /c echo %PROCESSOR_ARCHITECTURE%");
    Some(info)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::transport::TargetDescriptor;

    fn connection(mock: &MockTransport) -> Connection {
        Connection::new(TargetDescriptor::parse("mock://").unwrap(), Box::new(mock.clone()))
    }

    #[test]
    fn test_os_release_wins() {
        let mock = MockTransport::new()
            .with_file(
                "/etc/os-release",
                "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\nVERSION_ID=\"22.04\"\n",
            )
            .with_command("uname -m", "x86_64\n", 0)
            .with_command("uname -s", "Linux\n", 0);
        let info = connection(&mock).os().clone();

        assert_eq!(info.name, "ubuntu");
        assert_eq!(info.family, "debian");
        assert_eq!(info.release.as_deref(), Some("22.04"));
        assert_eq!(info.arch.as_deref(), Some("x86_64"));
        assert_eq!(info.families(), vec!["debian", "linux", "unix", "os"]);
        assert!(!mock.was_called("uname -s"));
    }

    #[test]
    fn test_id_like_fallback() {
        let mock = MockTransport::new().with_file("/etc/os-release", "ID=pop\nID_LIKE=\"ubuntu debian\"\n");
        let info = connection(&mock).os().clone();
        assert_eq!(info.family, "debian");
    }

    #[test]
    fn test_legacy_redhat_release() {
        let mock = MockTransport::new()
            .with_file("/etc/redhat-release", "CentOS release 6.10 (Final)\n");
        let info = connection(&mock).os().clone();
        assert_eq!(info.name, "centos");
        assert_eq!(info.family, "redhat");
        assert_eq!(info.release.as_deref(), Some("6.10"));
    }

    #[test]
    fn test_uname_probe_for_darwin() {
        let mock = MockTransport::new()
            .with_command("uname -s", "Darwin\n", 0)
            .with_command("uname -r", "23.1.0\n", 0)
            .with_command("uname -m", "arm64\n", 0);
        let info = connection(&mock).os().clone();
        assert_eq!(info.family, "darwin");
        assert!(info.is_unix());
        assert!(!info.is_linux());
        assert_eq!(info.families(), vec!["darwin", "bsd", "unix", "os"]);
    }

    #[test]
    fn test_windows_ver_probe() {
        let mock = MockTransport::new()
            .with_command("cmd /c ver", "\nMicrosoft Windows [Version 10.0.19045.3803]\n", 0)
            .with_command("cmd /c echo %PROCESSOR_ARCHITECTURE%", "AMD64\r\n", 0);
        let info = connection(&mock).os().clone();
        assert!(info.is_windows());
        assert_eq!(info.release.as_deref(), Some("10.0.19045.3803"));
        assert_eq!(info.arch.as_deref(), Some("AMD64"));
    }

    #[test]
    fn test_transport_implied_platform_is_last_resort() {
        let mock = MockTransport::new().with_platform(PlatformInfo::new("windows", "windows"));
        let info = connection(&mock).os().clone();
        assert!(info.is_windows());
    }

    #[test]
    fn test_all_probes_missing_gives_unknown() {
        let mock = MockTransport::new();
        let info = connection(&mock).os().clone();
        assert!(info.is_unknown());
        assert_eq!(info.families(), vec!["unknown"]);
    }

    #[test]
    fn test_detection_is_memoized() {
        let mock = MockTransport::new().with_file("/etc/os-release", "ID=alpine\nVERSION_ID=3.19\n");
        let conn = connection(&mock);
        let _ = conn.os();
        let calls = mock.call_count();
        let _ = conn.os();
        let _ = conn.os();
        assert_eq!(mock.call_count(), calls);
    }
}
