//! Advisory "node in use" files under the data directory.
//!
//! Workers and external tools look for these files to learn which nodes
//! are busy. Interactive nodes get one file each (`nodeinuse.<N>`); the
//! binkp pool shares a single `binkpinuse` file.

use super::ConnectionType;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const NODE_PREFIX: &str = "nodeinuse.";
const BINKP_FILE: &str = "binkpinuse";

/// Creates, removes and sweeps semaphore files.
#[derive(Debug, Clone)]
pub struct SemaphoreFiles {
    dir: PathBuf,
}

impl SemaphoreFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Semaphore path for a node of the given pool type.
    pub fn path_for(&self, pool_type: ConnectionType, index: u16) -> PathBuf {
        match pool_type {
            ConnectionType::Binkp => self.dir.join(BINKP_FILE),
            _ => self.dir.join(format!("{NODE_PREFIX}{index}")),
        }
    }

    pub(super) fn create(&self, path: &Path, index: u16, peer: &str) -> io::Result<()> {
        let body = format!(
            "node={index}\npeer={peer}\npid={}\nsince={}\n",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
        fs::write(path, body)?;
        debug!(path = %path.display(), "semaphore created");
        Ok(())
    }

    pub(super) fn remove(path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "semaphore removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove semaphore"),
        }
    }

    /// Remove every semaphore left behind by a previous run.
    ///
    /// Returns the number of files removed.
    pub fn clear_all(&self) -> usize {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "cannot scan for stale semaphores");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let stale = name == BINKP_FILE
                || name
                    .strip_prefix(NODE_PREFIX)
                    .is_some_and(|n| n.parse::<u16>().is_ok());
            if stale && fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, dir = %self.dir.display(), "cleared stale semaphore files");
        }
        removed
    }
}
