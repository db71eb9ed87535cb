//! Shell-argument quoting for the command surfaces transports expose.
//!
//! Every path or user-supplied word interpolated into a command string goes
//! through [`ShellKind::quote`] so argument boundaries survive and shell
//! metacharacters are inert.

use std::borrow::Cow;

use shell_escape::{unix, windows};

/// Command interpreter on the far side of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellKind {
    /// POSIX `sh`
    Posix,
    /// Windows PowerShell
    PowerShell,
    /// Windows `cmd.exe`
    Cmd,
}

impl ShellKind {
    /// Quote one argument for this shell
    pub fn quote(&self, arg: &str) -> String {
        match self {
            ShellKind::Posix => unix::escape(Cow::Borrowed(arg)).into_owned(),
            ShellKind::PowerShell => format!("'{}'", arg.replace('\'', "''")),
            ShellKind::Cmd => windows::escape(Cow::Borrowed(arg)).into_owned(),
        }
    }

    /// Join a program and its arguments into one command line
    pub fn join<S: AsRef<str>>(&self, program: &str, args: &[S]) -> String {
        let mut line = self.quote(program);
        for arg in args {
            line.push(' ');
            line.push_str(&self.quote(arg.as_ref()));
        }
        line
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, ShellKind::PowerShell | ShellKind::Cmd)
    }
}
