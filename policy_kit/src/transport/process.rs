//! Local child-process execution with a hard timeout.
//!
//! Shared by the transports that shell out (local, ssh, docker). Output pipes
//! are drained on reader threads while the parent waits, so a chatty command
//! cannot deadlock on a full pipe buffer.

use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::log_debug;

/// How long a timed-out command's reader threads get to see end-of-file
const READER_GRACE: Duration = Duration::from_millis(250);

type ReadResult = io::Result<Vec<u8>>;

/// Captured result of a finished child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code; `-1` when the process was terminated by a signal
    pub exit_status: i32,
}

/// How a process run ended when it did not produce output
#[derive(Debug)]
pub enum ProcessFailure {
    /// The program could not be started
    Spawn(io::Error),
    /// Waiting or reading failed
    Io(io::Error),
    /// The timeout elapsed; the child was killed
    TimedOut,
}

/// Run `command` to completion or until `timeout` elapses
pub fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
) -> Result<ProcessOutput, ProcessFailure> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(ProcessFailure::Spawn)?;

    let (stdout_tx, stdout_rx) = mpsc::channel();
    let (stderr_tx, stderr_rx) = mpsc::channel();

    let stdout_thread = child.stdout.take().map(|pipe| {
        thread::spawn(move || {
            let _ = stdout_tx.send(read_all(pipe));
        })
    });
    let stderr_thread = child.stderr.take().map(|pipe| {
        thread::spawn(move || {
            let _ = stderr_tx.send(read_all(pipe));
        })
    });

    let status = match child.wait_timeout(timeout).map_err(ProcessFailure::Io)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            // A grandchild holding a pipe keeps its reader blocked; such a
            // reader is detached after the grace period instead of joined.
            let stdout_done = reap(stdout_thread, &stdout_rx, READER_GRACE);
            let stderr_done = reap(stderr_thread, &stderr_rx, READER_GRACE);
            if !(stdout_done && stderr_done) {
                log_debug!("Output reader detached after timeout", "grace_ms" => READER_GRACE.as_millis());
            }
            return Err(ProcessFailure::TimedOut);
        }
    };

    join(stdout_thread);
    join(stderr_thread);

    let stdout = stdout_rx.recv().unwrap_or_else(|_| Ok(Vec::new())).map_err(ProcessFailure::Io)?;
    let stderr = stderr_rx.recv().unwrap_or_else(|_| Ok(Vec::new())).map_err(ProcessFailure::Io)?;

    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_status: status.code().unwrap_or(-1),
    })
}

fn read_all<R: Read>(mut pipe: R) -> ReadResult {
    let mut buf = Vec::new();
    pipe.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Join a reader once it reports within `grace`; `false` leaves it detached
fn reap(handle: Option<thread::JoinHandle<()>>, rx: &mpsc::Receiver<ReadResult>, grace: Duration) -> bool {
    match rx.recv_timeout(grace) {
        Ok(_) | Err(mpsc::RecvTimeoutError::Disconnected) => {
            join(handle);
            true
        }
        Err(mpsc::RecvTimeoutError::Timeout) => false,
    }
}

fn join(handle: Option<thread::JoinHandle<()>>) {
    if let Some(handle) = handle {
        let _ = handle.join();
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn test_nonzero_exit_is_data() {
        let out = run_with_timeout(sh("echo out; echo err >&2; exit 3"), Duration::from_secs(10))
            .unwrap();
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
        assert_eq!(out.exit_status, 3);
    }

    #[test]
    fn test_timeout_kills_child() {
        let result = run_with_timeout(sh("sleep 5"), Duration::from_millis(100));
        assert!(matches!(result, Err(ProcessFailure::TimedOut)));
    }

    #[test]
    fn test_timeout_with_grandchild_holding_pipe_returns_promptly() {
        let started = std::time::Instant::now();
        let result = run_with_timeout(sh("sleep 5 & sleep 5"), Duration::from_millis(100));
        assert!(matches!(result, Err(ProcessFailure::TimedOut)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_reap_joins_finished_reader_only() {
        let (tx, rx) = mpsc::channel::<ReadResult>();
        let finished = thread::spawn(move || {
            let _ = tx.send(Ok(b"done".to_vec()));
        });
        assert!(reap(Some(finished), &rx, Duration::from_secs(5)));

        let (tx, rx) = mpsc::channel::<ReadResult>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let blocked = thread::spawn(move || {
            let _ = release_rx.recv();
            let _ = tx.send(Ok(Vec::new()));
        });
        assert!(!reap(Some(blocked), &rx, Duration::from_millis(20)));
        release_tx.send(()).unwrap();
    }

    #[test]
    fn test_missing_program_is_spawn_failure() {
        let result = run_with_timeout(
            Command::new("/nonexistent/definitely-not-here"),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(ProcessFailure::Spawn(_))));
    }
}
