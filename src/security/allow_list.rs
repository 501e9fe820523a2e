//! Addresses that are always admitted.

use super::ip_set::IpSet;
use std::io;
use std::net::IpAddr;
use std::path::Path;
use tracing::{error, info};

/// Always-allow list, loaded once at startup and immutable afterwards.
#[derive(Debug, Default)]
pub struct AllowList {
    set: IpSet,
}

impl AllowList {
    /// Load from a list file. A missing file yields an empty list.
    pub fn load(path: &Path) -> Self {
        match IpSet::load(path) {
            Ok(set) => {
                info!(path = %path.display(), entries = set.len(), "allow list loaded");
                Self { set }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "allow list not found, starting empty");
                Self::default()
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to load allow list, starting empty");
                Self::default()
            }
        }
    }

    /// Build from an in-memory set.
    #[cfg(test)]
    pub fn from_set(set: IpSet) -> Self {
        Self { set }
    }

    /// Whether this address bypasses every other admission check.
    #[inline]
    pub fn is_always_allowed(&self, ip: &IpAddr) -> bool {
        !self.set.is_empty() && self.set.contains(ip)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn empty_list_allows_nothing() {
        let list = AllowList::default();
        assert!(!list.is_always_allowed(&"127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn missing_file_is_empty() {
        let list = AllowList::load(Path::new("/nonexistent/allowlist.txt"));
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn loads_entries_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allowlist.txt");
        fs::write(&path, "192.0.2.10 # sysop home\n").unwrap();
        let list = AllowList::load(&path);
        assert!(list.is_always_allowed(&"192.0.2.10".parse().unwrap()));
        assert!(!list.is_always_allowed(&"192.0.2.11".parse().unwrap()));
    }
}
