//! Permanently refused addresses.
//!
//! Loaded once at startup; at runtime the list only grows, through
//! auto-block promotions. Each addition is appended to the list file as
//! `"<ip> # AutoBlocked by <service> on: <timestamp>"`. The file is never
//! rewritten or compacted.

use super::ip_set::IpSet;
use crate::error::PersistenceError;
use parking_lot::RwLock;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Deny list with append-only runtime growth.
#[derive(Debug)]
pub struct DenyList {
    set: RwLock<IpSet>,
    path: PathBuf,
}

impl DenyList {
    /// Load from a list file. A missing file yields an empty list; the file
    /// is created on the first append.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let set = match IpSet::load(path) {
            Ok(set) => {
                info!(path = %path.display(), entries = set.len(), "deny list loaded");
                set
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "deny list not found, starting empty");
                IpSet::new()
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to load deny list, starting empty");
                IpSet::new()
            }
        };
        Self {
            set: RwLock::new(set),
            path: path.to_path_buf(),
        }
    }

    /// Whether the address is refused.
    #[inline]
    pub fn is_blocked(&self, ip: &IpAddr) -> bool {
        self.set.read().contains(ip)
    }

    /// Permanently refuse an address.
    ///
    /// The in-memory list is updated even if the append fails.
    pub fn block(&self, ip: IpAddr, service: &str) -> Result<(), PersistenceError> {
        let line = format!(
            "{ip} # AutoBlocked by {service} on: {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );

        let mut set = self.set.write();
        set.insert_ip(ip);
        let appended = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        drop(set);

        match appended {
            Ok(()) => {
                warn!(%ip, path = %self.path.display(), "address added to deny list");
                Ok(())
            }
            Err(e) => Err(PersistenceError::io(&self.path, e)),
        }
    }

    pub fn len(&self) -> usize {
        self.set.read().len()
    }
}
