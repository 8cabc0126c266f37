//! Long-running processes started inside (or next to) emulated hosts.

use std::fs::{File, OpenOptions};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::command::Invocation;
use crate::topology::Namespace;

/// Grace period between SIGTERM and SIGKILL.
const STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Exit code, or `None` when killed by a signal.
    Exited(Option<i32>),
}

/// Where a spawned process writes its stdout and stderr.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogTarget {
    /// Scratch file owned by the process handle.
    Capture,
    /// A fixed path, truncated on spawn.
    File(PathBuf),
    Discard,
}

/// Handle to a process that outlives the call that started it.
pub trait ManagedProcess {
    fn label(&self) -> &str;

    fn poll(&mut self) -> ProcessState;

    fn is_alive(&mut self) -> bool {
        self.poll() == ProcessState::Running
    }

    /// Stop the process. A process that already exited is left alone.
    fn stop(&mut self);

    /// Everything the process wrote to stdout and stderr so far.
    fn logs(&mut self) -> String;
}

/// A child process running inside a network namespace.
///
/// Output goes to a file rather than a pipe so a chatty process can never
/// block on a full pipe buffer. The process is stopped on drop.
pub struct NamespaceProcess {
    child: Child,
    label: String,
    log_path: Option<PathBuf>,
    _scratch: Option<NamedTempFile>,
    stopped: bool,
}

impl NamespaceProcess {
    /// Spawn `invocation` inside `ns` via `sudo ip netns exec`, or in the
    /// root namespace when `ns` is `None`.
    pub fn spawn(ns: Option<&Namespace>, invocation: &Invocation, log: LogTarget) -> Result<Self> {
        invocation.validate()?;
        let label = match ns {
            Some(ns) => format!("{} in ns:{}", invocation.program(), ns.name),
            None => invocation.program().to_string(),
        };
        let wrapped = match ns {
            Some(ns) => ns.wrap(invocation),
            None => invocation.clone(),
        };

        let (log_path, scratch) = match &log {
            LogTarget::Capture => {
                let scratch = NamedTempFile::new().context("create log scratch file")?;
                (Some(scratch.path().to_path_buf()), Some(scratch))
            }
            LogTarget::File(path) => {
                File::create(path).with_context(|| format!("create log file {}", path.display()))?;
                (Some(path.clone()), None)
            }
            LogTarget::Discard => (None, None),
        };

        let (stdout, stderr) = match &log_path {
            Some(path) => (append_handle(path)?, append_handle(path)?),
            None => (Stdio::null(), Stdio::null()),
        };

        let child = Command::new("sudo")
            .args(wrapped.argv())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            // Own process group so stop() reaches the process behind sudo.
            .process_group(0)
            .spawn()
            .with_context(|| format!("spawn {label}"))?;

        debug!(%label, pid = child.id(), "spawned process");
        Ok(Self {
            child,
            label,
            log_path,
            _scratch: scratch,
            stopped: false,
        })
    }

    fn signal_group(&self, signal: &str) {
        let _ = Command::new("sudo")
            .args(["kill", signal, "--", &format!("-{}", self.child.id())])
            .output();
    }
}

impl ManagedProcess for NamespaceProcess {
    fn label(&self) -> &str {
        &self.label
    }

    fn poll(&mut self) -> ProcessState {
        match self.child.try_wait() {
            Ok(Some(status)) => ProcessState::Exited(status.code()),
            Ok(None) => ProcessState::Running,
            // The child can no longer be waited on; nothing left to stop.
            Err(_) => ProcessState::Exited(None),
        }
    }

    /// Send SIGTERM to the process group, wait briefly, then SIGKILL.
    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if !self.is_alive() {
            return;
        }
        self.signal_group("-TERM");

        let deadline = std::time::Instant::now() + STOP_GRACE;
        while std::time::Instant::now() < deadline {
            if !self.is_alive() {
                debug!(label = self.label, "process stopped");
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        self.signal_group("-9");
        let _ = self.child.wait();
        debug!(label = self.label, "process killed");
    }

    fn logs(&mut self) -> String {
        self.log_path
            .as_ref()
            .and_then(|p| std::fs::read(p).ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }
}

impl Drop for NamespaceProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn append_handle(path: &Path) -> Result<Stdio> {
    let file = OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))?;
    Ok(Stdio::from(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::check_privileges;

    #[test]
    fn test_captured_output_and_exit() {
        if !check_privileges() {
            eprintln!("Skipping: insufficient privileges");
            return;
        }

        let inv = Invocation::new("sh").args(["-c", "echo ready; echo oops >&2"]);
        let mut p = NamespaceProcess::spawn(None, &inv, LogTarget::Capture).expect("spawn");
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while p.is_alive() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(p.poll(), ProcessState::Exited(Some(0)));
        let logs = p.logs();
        assert!(logs.contains("ready") && logs.contains("oops"), "{logs}");
        // Stopping an exited process is a no-op.
        p.stop();
    }

    #[test]
    fn test_stop_terminates_sleeper() {
        if !check_privileges() {
            eprintln!("Skipping: insufficient privileges");
            return;
        }

        let inv = Invocation::new("sleep").arg("30");
        let mut p = NamespaceProcess::spawn(None, &inv, LogTarget::Discard).expect("spawn");
        assert!(p.is_alive());
        p.stop();
        assert!(!p.is_alive());
    }
}
