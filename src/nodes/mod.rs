//! Node pools - bounded execution slots per service.
//!
//! A node is one concurrent session of a service. Each pool owns a fixed
//! range of node numbers created at startup; slots are claimed by
//! [`NodePool::acquire_node`] and returned by [`NodePool::release_node`].
//!
//! # Locking
//!
//! Every pool guards its slots with a single private mutex. No method
//! calls into another component while holding it. Semaphore files are
//! created and removed under the lock so the shared binkp file always
//! matches the pool's busy state.

mod semaphore;
mod status;

pub use semaphore::SemaphoreFiles;
pub use status::StatusReport;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Description of a free slot.
pub const WAITING_FOR_CALL: &str = "Waiting for Call";

/// Description of a freshly claimed slot.
pub const CONNECTING: &str = "Connecting...";

/// Protocol a connection arrived on. Also the typed dispatch target of a
/// listening endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    Telnet,
    Ssh,
    Binkp,
    Http,
    Unknown,
}

impl ConnectionType {
    /// Lowercase name for logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionType::Telnet => "telnet",
            ConnectionType::Ssh => "ssh",
            ConnectionType::Binkp => "binkp",
            ConnectionType::Http => "http",
            ConnectionType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One node slot.
#[derive(Debug, Clone)]
pub struct NodeSlot {
    /// Node number.
    pub index: u16,
    /// Protocol of the current caller, or the pool default when free.
    pub service_type: ConnectionType,
    /// Whether a caller holds this slot.
    pub connected: bool,
    /// Human-readable status line.
    pub description: String,
    /// Caller address, empty when free.
    pub peer: String,
    /// When the caller claimed the slot.
    pub connected_at: Option<DateTime<Utc>>,
    /// Worker process id, once spawned.
    pub pid: Option<u32>,
}

impl NodeSlot {
    fn free(index: u16, service_type: ConnectionType) -> Self {
        Self {
            index,
            service_type,
            connected: false,
            description: WAITING_FOR_CALL.to_string(),
            peer: String::new(),
            connected_at: None,
            pid: None,
        }
    }
}

/// Fixed-capacity pool of node slots for one service.
#[derive(Debug)]
pub struct NodePool {
    label: String,
    service_type: ConnectionType,
    slots: Mutex<BTreeMap<u16, NodeSlot>>,
}

impl NodePool {
    /// Create a pool with one free slot per node in `[start, end]`.
    pub fn new(label: impl Into<String>, service_type: ConnectionType, start: u16, end: u16) -> Self {
        let slots = (start..=end)
            .map(|i| (i, NodeSlot::free(i, service_type)))
            .collect();
        Self {
            label: label.into(),
            service_type,
            slots: Mutex::new(slots),
        }
    }

    /// Claim the lowest free node for a caller.
    ///
    /// Returns `None`, leaving every slot untouched, when all are busy.
    pub fn acquire_node(&self, connection_type: ConnectionType, peer: &str) -> Option<u16> {
        let mut slots = self.slots.lock();
        let slot = slots.values_mut().find(|s| !s.connected)?;
        slot.connected = true;
        slot.service_type = connection_type;
        slot.description = CONNECTING.to_string();
        slot.peer = peer.to_string();
        slot.connected_at = Some(Utc::now());
        slot.pid = None;
        debug!(pool = %self.label, node = slot.index, %peer, "node acquired");
        Some(slot.index)
    }

    /// Return a node to the pool.
    ///
    /// Returns false if the node is unknown or already free.
    pub fn release_node(&self, index: u16) -> bool {
        let mut slots = self.slots.lock();
        self.free_slot(&mut slots, index)
    }

    fn free_slot(&self, slots: &mut BTreeMap<u16, NodeSlot>, index: u16) -> bool {
        match slots.get_mut(&index) {
            Some(slot) if slot.connected => {
                debug!(
                    pool = %self.label,
                    node = index,
                    kind = %slot.service_type,
                    peer = %slot.peer,
                    pid = ?slot.pid,
                    "node released"
                );
                *slot = NodeSlot::free(index, self.service_type);
                true
            }
            _ => false,
        }
    }

    /// Release a leased node and drop its semaphore file in one critical
    /// section. A shared file is only removed once the pool is idle.
    fn release_lease(&self, index: u16, semaphore: Option<&Path>) -> bool {
        let mut slots = self.slots.lock();
        let released = self.free_slot(&mut slots, index);
        if let Some(path) = semaphore {
            let shared = self.service_type == ConnectionType::Binkp;
            if !shared || !slots.values().any(|s| s.connected) {
                SemaphoreFiles::remove(path);
            }
        }
        released
    }

    /// Claim a node and wrap it in a guard that releases it on drop.
    pub fn lease(self: &Arc<Self>, connection_type: ConnectionType, peer: &str) -> Option<NodeLease> {
        let index = self.acquire_node(connection_type, peer)?;
        Some(NodeLease {
            pool: Arc::clone(self),
            index,
            semaphore: None,
        })
    }

    /// Mark a node busy with an externally reported status.
    pub fn set_node(&self, index: u16, description: impl Into<String>) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(&index) {
            Some(slot) => {
                if !slot.connected {
                    slot.connected = true;
                    slot.connected_at = Some(Utc::now());
                }
                slot.description = description.into();
                true
            }
            None => false,
        }
    }

    /// Reset a node to free regardless of its current state.
    #[allow(dead_code)] // operator reset, mirrors set_node for external tools
    pub fn clear_node(&self, index: u16) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(&index) {
            Some(slot) => {
                *slot = NodeSlot::free(index, self.service_type);
                true
            }
            None => false,
        }
    }

    /// Record the worker pid for a node.
    pub fn set_pid(&self, index: u16, pid: u32) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(&index) {
            Some(slot) => {
                slot.pid = Some(pid);
                true
            }
            None => false,
        }
    }

    /// Snapshot of all slots in node order.
    #[cfg(test)]
    pub fn nodes(&self) -> Vec<NodeSlot> {
        self.slots.lock().values().cloned().collect()
    }

    /// Total number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.slots.lock().len()
    }

    /// Number of busy nodes.
    pub fn nodes_used(&self) -> usize {
        self.slots.lock().values().filter(|s| s.connected).count()
    }

    /// One status line per node for monitoring.
    pub fn status_lines(&self) -> Vec<String> {
        self.slots
            .lock()
            .values()
            .map(|s| match s.connected_at {
                Some(at) if s.connected => format!(
                    "{} Node #{}: {} (since {})",
                    self.label,
                    s.index,
                    s.description,
                    at.format("%H:%M:%S")
                ),
                _ => format!("{} Node #{}: {}", self.label, s.index, s.description),
            })
            .collect()
    }
}

/// A claimed node. Dropping the lease frees the node and removes its
/// semaphore file.
#[derive(Debug)]
pub struct NodeLease {
    pool: Arc<NodePool>,
    index: u16,
    semaphore: Option<PathBuf>,
}

impl NodeLease {
    /// Node number held by this lease.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Write the node's semaphore file; it is removed when the lease drops.
    pub fn mark_in_use(&mut self, files: &SemaphoreFiles, peer: &str) {
        let path = files.path_for(self.pool.service_type, self.index);
        let _slots = self.pool.slots.lock();
        match files.create(&path, self.index, peer) {
            Ok(()) => self.semaphore = Some(path),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to create semaphore file"),
        }
    }
}

impl Drop for NodeLease {
    fn drop(&mut self) {
        let semaphore = self.semaphore.take();
        if !self.pool.release_lease(self.index, semaphore.as_deref()) {
            warn!(pool = %self.pool.label, node = self.index, "node was already free at release");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: u16) -> Arc<NodePool> {
        Arc::new(NodePool::new("Main", ConnectionType::Unknown, 1, n))
    }

    #[test]
    fn new_pool_is_all_free() {
        let p = pool(3);
        assert_eq!(p.num_nodes(), 3);
        assert_eq!(p.nodes_used(), 0);
        assert!(p.nodes().iter().all(|s| s.description == WAITING_FOR_CALL));
    }

    #[test]
    fn acquires_lowest_free_node() {
        let p = pool(3);
        assert_eq!(p.acquire_node(ConnectionType::Telnet, "10.0.0.1"), Some(1));
        assert_eq!(p.acquire_node(ConnectionType::Ssh, "10.0.0.2"), Some(2));
        assert!(p.release_node(1));
        assert_eq!(p.acquire_node(ConnectionType::Telnet, "10.0.0.3"), Some(1));

        let slot = &p.nodes()[1];
        assert!(slot.connected);
        assert_eq!(slot.service_type, ConnectionType::Ssh);
        assert_eq!(slot.description, CONNECTING);
        assert_eq!(slot.peer, "10.0.0.2");
        assert!(slot.connected_at.is_some());
    }

    #[test]
    fn acquire_then_release_restores_free_count() {
        let p = pool(2);
        let idx = p.acquire_node(ConnectionType::Telnet, "peer").unwrap();
        assert_eq!(p.nodes_used(), 1);
        assert!(p.release_node(idx));
        assert_eq!(p.nodes_used(), 0);
        assert_eq!(p.nodes()[0].service_type, ConnectionType::Unknown);
        assert!(p.nodes()[0].peer.is_empty());
    }

    #[test]
    fn full_pool_refuses_without_mutation() {
        let p = pool(2);
        p.acquire_node(ConnectionType::Telnet, "a").unwrap();
        p.acquire_node(ConnectionType::Telnet, "b").unwrap();
        let before = p.status_lines();
        assert_eq!(p.acquire_node(ConnectionType::Telnet, "c"), None);
        assert_eq!(p.status_lines(), before);
        assert_eq!(p.nodes_used(), 2);
    }

    #[test]
    fn release_unknown_or_free_node_fails() {
        let p = pool(2);
        assert!(!p.release_node(1));
        assert!(!p.release_node(42));
        let idx = p.acquire_node(ConnectionType::Telnet, "a").unwrap();
        assert!(p.release_node(idx));
        assert!(!p.release_node(idx));
    }

    #[test]
    fn status_mutators_mirror_external_state() {
        let p = pool(2);
        assert!(p.set_node(2, "Reading mail"));
        assert!(p.set_pid(2, 4242));
        let slot = &p.nodes()[1];
        assert!(slot.connected);
        assert_eq!(slot.pid, Some(4242));
        assert_eq!(p.nodes_used(), 1);
        assert!(p.status_lines()[1].contains("Reading mail"));

        assert!(p.clear_node(2));
        assert_eq!(p.nodes_used(), 0);
        assert_eq!(p.nodes()[1].pid, None);
        assert!(!p.set_node(9, "nope"));
        assert!(!p.set_pid(9, 1));
    }

    #[test]
    fn nodes_used_tracks_outstanding_acquires() {
        let p = pool(5);
        let held: Vec<u16> = (0..4)
            .map(|i| p.acquire_node(ConnectionType::Telnet, &format!("peer{i}")).unwrap())
            .collect();
        assert_eq!(p.nodes_used(), 4);
        p.release_node(held[1]);
        p.release_node(held[3]);
        assert_eq!(p.nodes_used(), 2);
    }

    #[test]
    fn lease_releases_on_drop() {
        let p = pool(1);
        {
            let lease = p.lease(ConnectionType::Telnet, "a").unwrap();
            assert_eq!(lease.index(), 1);
            assert!(p.lease(ConnectionType::Telnet, "b").is_none());
        }
        assert_eq!(p.nodes_used(), 0);
        assert!(p.lease(ConnectionType::Telnet, "c").is_some());
    }

    #[test]
    fn lease_removes_semaphore_file() {
        let dir = tempfile::tempdir().unwrap();
        let files = SemaphoreFiles::new(dir.path());
        let p = pool(2);
        let path = files.path_for(ConnectionType::Unknown, 1);
        {
            let mut lease = p.lease(ConnectionType::Telnet, "a").unwrap();
            lease.mark_in_use(&files, "a");
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn shared_binkp_semaphore_outlives_busy_pool() {
        let dir = tempfile::tempdir().unwrap();
        let files = SemaphoreFiles::new(dir.path());
        let p = Arc::new(NodePool::new("binkp", ConnectionType::Binkp, 1, 2));
        let path = files.path_for(ConnectionType::Binkp, 1);

        let mut first = p.lease(ConnectionType::Binkp, "a").unwrap();
        first.mark_in_use(&files, "a");
        let mut second = p.lease(ConnectionType::Binkp, "b").unwrap();
        second.mark_in_use(&files, "b");

        drop(first);
        assert!(path.exists());
        drop(second);
        assert!(!path.exists());
    }

    #[test]
    fn binkp_semaphore_tracks_overlapping_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let files = SemaphoreFiles::new(dir.path());
        let p = Arc::new(NodePool::new("binkp", ConnectionType::Binkp, 1, 2));
        let path = files.path_for(ConnectionType::Binkp, 1);

        let mut first = p.lease(ConnectionType::Binkp, "a").unwrap();
        first.mark_in_use(&files, "a");
        drop(first);
        assert!(!path.exists());

        // A session that starts while another is ending keeps the file.
        let mut second = p.lease(ConnectionType::Binkp, "b").unwrap();
        second.mark_in_use(&files, "b");
        let mut third = p.lease(ConnectionType::Binkp, "c").unwrap();
        third.mark_in_use(&files, "c");
        drop(second);
        assert!(path.exists());
        let mut fourth = p.lease(ConnectionType::Binkp, "d").unwrap();
        fourth.mark_in_use(&files, "d");
        drop(third);
        assert!(path.exists());
        drop(fourth);
        assert!(!path.exists());
    }

    #[test]
    fn concurrent_binkp_sessions_leave_no_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let files = SemaphoreFiles::new(dir.path());
        let p = Arc::new(NodePool::new("binkp", ConnectionType::Binkp, 1, 4));
        let path = files.path_for(ConnectionType::Binkp, 1);

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let p = Arc::clone(&p);
                let files = files.clone();
                let path = path.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        if let Some(mut lease) = p.lease(ConnectionType::Binkp, &format!("peer{i}")) {
                            lease.mark_in_use(&files, "peer");
                            assert!(path.exists());
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(p.nodes_used(), 0);
        assert!(!path.exists());
    }
}
