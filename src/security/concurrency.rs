//! Per-peer concurrent connection cap.
//!
//! A counter per address, present only while at least one connection from
//! that address holds a permit.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::net::IpAddr;
use std::sync::Arc;

/// Concurrent connection counter keyed by peer address.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    max_per_peer: u32,
    counts: DashMap<IpAddr, u32>,
}

impl ConcurrencyLimiter {
    pub fn new(max_per_peer: u32) -> Self {
        Self {
            max_per_peer,
            counts: DashMap::new(),
        }
    }

    pub fn max_per_peer(&self) -> u32 {
        self.max_per_peer
    }

    /// Take one slot for `peer`. Returns false without mutation at the cap.
    pub fn acquire(&self, peer: IpAddr) -> bool {
        match self.counts.entry(peer) {
            Entry::Occupied(mut occupied) => {
                let count = occupied.get_mut();
                if *count < self.max_per_peer {
                    *count += 1;
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                if self.max_per_peer == 0 {
                    return false;
                }
                vacant.insert(1);
                true
            }
        }
    }

    /// Return one slot for `peer`; the entry is deleted when it reaches zero.
    pub fn release(&self, peer: IpAddr) {
        if let Entry::Occupied(mut occupied) = self.counts.entry(peer) {
            if *occupied.get() <= 1 {
                occupied.remove();
            } else {
                *occupied.get_mut() -= 1;
            }
        }
    }

    /// Acquire a slot wrapped in a guard that releases it on drop.
    pub fn try_permit(self: &Arc<Self>, peer: IpAddr) -> Option<ConcurrencyPermit> {
        self.acquire(peer).then(|| ConcurrencyPermit {
            limiter: Arc::clone(self),
            peer,
        })
    }

    /// Current count for `peer` (0 when untracked).
    pub fn count(&self, peer: IpAddr) -> u32 {
        self.counts.get(&peer).map_or(0, |c| *c)
    }

    /// Number of addresses with at least one live connection.
    #[cfg(test)]
    pub fn tracked_peers(&self) -> usize {
        self.counts.len()
    }
}

/// Held for the life of an admitted connection.
#[derive(Debug)]
pub struct ConcurrencyPermit {
    limiter: Arc<ConcurrencyLimiter>,
    peer: IpAddr,
}

impl ConcurrencyPermit {
    #[cfg(test)]
    pub fn peer(&self) -> IpAddr {
        self.peer
    }
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        self.limiter.release(self.peer);
    }
}
