// src/exec/registry.rs

//! Process-wide table of live child processes.
//!
//! One [`ProcessRegistry`] is created by the host and cloned into every
//! process channel. It tracks the pid of each child that may still be alive
//! and kills them all on host shutdown or reload, so no invocation outlives
//! its host.

use std::collections::BTreeSet;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Host lifecycle notifications that must not leak child processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    BeforeReload,
    AfterReload,
    Quit,
}

#[derive(Debug)]
struct Inner {
    pids: Mutex<BTreeSet<u32>>,
    force_stop: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    inner: Arc<Inner>,
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRegistry {
    pub fn new() -> Self {
        let (force_stop, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                pids: Mutex::new(BTreeSet::new()),
                force_stop,
            }),
        }
    }

    fn pids_guard(&self) -> MutexGuard<'_, BTreeSet<u32>> {
        self.inner.pids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, pid: u32) {
        self.pids_guard().insert(pid);
        debug!(pid, "tracking child process");
    }

    pub fn remove(&self, pid: u32) -> bool {
        let removed = self.pids_guard().remove(&pid);
        if removed {
            debug!(pid, "child process released");
        }
        removed
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.pids_guard().contains(&pid)
    }

    pub fn len(&self) -> usize {
        self.pids_guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids_guard().is_empty()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.pids_guard().iter().copied().collect()
    }

    /// Kill every tracked process and clear the table.
    ///
    /// Individual failures (typically a process that already exited) are
    /// logged and skipped. The table is empty afterwards no matter what.
    /// Returns how many entries were cleared.
    pub fn kill_all(&self) -> usize {
        let pids = std::mem::take(&mut *self.pids_guard());
        let count = pids.len();

        for pid in pids {
            match terminate(pid) {
                Ok(()) => debug!(pid, "killed child process"),
                Err(err) => debug!(pid, error = %err, "could not kill child process; ignoring"),
            }
        }

        if count > 0 {
            info!(count, "killed tracked child processes");
        }
        count
    }

    /// Raise or lower the force-stop signal seen by running channels.
    pub fn force_stop(&self, stop: bool) {
        self.inner.force_stop.send_replace(stop);
    }

    pub fn is_force_stopped(&self) -> bool {
        *self.inner.force_stop.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.force_stop.subscribe()
    }

    pub fn handle_host_event(&self, event: HostEvent) {
        info!(?event, tracked = self.len(), "host lifecycle event");
        match event {
            HostEvent::BeforeReload | HostEvent::Quit => {
                self.force_stop(true);
                self.kill_all();
            }
            HostEvent::AfterReload => {
                self.kill_all();
                self.force_stop(false);
            }
        }
    }

    /// Map Ctrl-C to [`HostEvent::Quit`].
    pub fn spawn_ctrl_c_handler(&self) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            registry.handle_host_event(HostEvent::Quit);
        })
    }
}

/// Forcefully kill `pid` and, where possible, everything it spawned.
///
/// Children are started as process-group leaders, so the whole group is
/// signalled first; a bare pid is the fallback.
#[cfg(unix)]
pub fn terminate(pid: u32) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill, killpg};

    let target = unix_pid(pid)?;
    match killpg(target, Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH | Errno::EPERM) => kill(target, Signal::SIGKILL).map_err(io::Error::from),
        Err(err) => Err(err.into()),
    }
}

/// Kill whatever is left of the process group led by `pgid`.
///
/// Used once the leader itself has exited: background jobs it started may
/// still hold its output pipes. Fails with `ESRCH` when the group is empty.
#[cfg(unix)]
pub fn terminate_group(pgid: u32) -> io::Result<()> {
    use nix::sys::signal::{Signal, killpg};

    killpg(unix_pid(pgid)?, Signal::SIGKILL).map_err(io::Error::from)
}

#[cfg(unix)]
fn unix_pid(pid: u32) -> io::Result<nix::unistd::Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(nix::unistd::Pid::from_raw)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {pid}")))
}

#[cfg(windows)]
pub fn terminate(pid: u32) -> io::Result<()> {
    let status = std::process::Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!("taskkill exited with {status}")))
    }
}

/// Windows children are not started in their own group; `terminate` already
/// walks the tree with `taskkill /T` while the parent is alive.
#[cfg(windows)]
pub fn terminate_group(pgid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("no process group to sweep for {pgid}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_and_contains() {
        let registry = ProcessRegistry::new();
        registry.add(41);
        registry.add(42);
        registry.add(42);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(41));

        assert!(registry.remove(41));
        assert!(!registry.remove(41));
        assert_eq!(registry.pids(), vec![42]);
    }

    #[test]
    fn clones_share_one_table() {
        let registry = ProcessRegistry::new();
        let other = registry.clone();
        other.add(7);
        assert!(registry.contains(7));
    }

    #[test]
    fn force_stop_is_observed_by_subscribers() {
        let registry = ProcessRegistry::new();
        let rx = registry.subscribe();
        assert!(!*rx.borrow());

        registry.handle_host_event(HostEvent::Quit);
        assert!(*rx.borrow());
        assert!(registry.is_force_stopped());

        registry.handle_host_event(HostEvent::AfterReload);
        assert!(!registry.is_force_stopped());
    }

    #[cfg(unix)]
    #[test]
    fn terminate_rejects_pid_zero() {
        let err = terminate(0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        let err = terminate_group(0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
