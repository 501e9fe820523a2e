//! Tracks the most recently spawned worker for shutdown signalling.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{info, warn};

/// Remembers the latest worker pid. Only that worker is signalled on
/// shutdown; earlier workers are left to their own devices.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    // 0 = none
    latest: AtomicU32,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, pid: u32) {
        self.latest.store(pid, Ordering::Release);
    }

    /// Forget `pid` if it is still the latest worker.
    pub fn forget(&self, pid: u32) {
        let _ = self
            .latest
            .compare_exchange(pid, 0, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn latest(&self) -> Option<u32> {
        match self.latest.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Send SIGTERM to the latest worker. Returns the pid signalled.
    pub fn forward_shutdown(&self) -> Option<u32> {
        let pid = self.latest()?;
        let Ok(raw) = i32::try_from(pid) else {
            warn!(pid, "worker pid out of range, not signalling");
            return None;
        };
        match signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => {
                info!(pid, "forwarded SIGTERM to worker");
                Some(pid)
            }
            Err(e) => {
                warn!(pid, error = %e, "failed to signal worker");
                None
            }
        }
    }
}
