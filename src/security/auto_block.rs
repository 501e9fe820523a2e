//! Escalating auto-block for connection bursts.
//!
//! Every connection from an address is recorded in a sliding window. When
//! the window holds `threshold` connections the address is banned for the
//! next duration on the ladder (default 15m, 1h, 1d, 30d). Once the ladder is
//! exhausted the address is promoted to the permanent deny list.
//!
//! # Persistence
//!
//! Live bans are stored as JSON (`ip -> {count, expiration}`), rewritten
//! wholesale through a temp file and rename on every change. Expired bans
//! are dropped when the state is loaded.
//!
//! # Locking
//!
//! All state sits behind one mutex. A promotion is decided and persisted
//! under that lock; the deny-list append happens after it is released.

use super::deny_list::DenyList;
use crate::error::PersistenceError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Ladder used when none is configured.
pub const DEFAULT_LADDER: [Duration; 4] = [
    Duration::from_secs(15 * 60),
    Duration::from_secs(60 * 60),
    Duration::from_secs(24 * 60 * 60),
    Duration::from_secs(30 * 24 * 60 * 60),
];

/// Minimum ladder length; shorter ladders repeat their last step.
const MIN_LADDER_LEN: usize = 4;

/// Auto-block tuning.
#[derive(Debug, Clone)]
pub struct AutoBlockConfig {
    /// Disabled means every connection is admitted.
    pub enabled: bool,
    /// Connections within `window` that trigger an escalation.
    pub threshold: usize,
    /// Sliding window length.
    pub window: Duration,
    /// Ban duration per escalation step.
    pub ladder: Vec<Duration>,
}

impl Default for AutoBlockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 3,
            window: Duration::from_secs(10),
            ladder: DEFAULT_LADDER.to_vec(),
        }
    }
}

/// A live ban.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoBlockEntry {
    /// Escalations so far.
    pub count: u32,
    /// Ban end, in epoch seconds.
    pub expiration: i64,
}

impl AutoBlockEntry {
    #[inline]
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expiration > now.timestamp()
    }
}

/// What an escalation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escalation {
    Banned { count: u32, until: i64 },
    Promoted { count: u32 },
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<IpAddr, AutoBlockEntry>,
    windows: HashMap<IpAddr, VecDeque<DateTime<Utc>>>,
}

/// Escalating auto-block engine.
#[derive(Debug)]
pub struct AutoBlocker {
    config: AutoBlockConfig,
    state_path: PathBuf,
    service: String,
    deny: Arc<DenyList>,
    state: Mutex<State>,
}

impl AutoBlocker {
    /// Create the engine, loading persisted bans from `state_path`.
    ///
    /// `service` names the daemon in deny-list comments.
    pub fn new(
        mut config: AutoBlockConfig,
        state_path: impl Into<PathBuf>,
        deny: Arc<DenyList>,
        service: impl Into<String>,
    ) -> Self {
        config.ladder = normalize_ladder(config.ladder);
        let state_path = state_path.into();
        let blocker = Self {
            config,
            state_path,
            service: service.into(),
            deny,
            state: Mutex::new(State::default()),
        };
        blocker.load(Utc::now());
        blocker
    }

    /// Record a connection and decide whether to admit it.
    pub fn connection(&self, ip: IpAddr) -> bool {
        self.connection_at(ip, Utc::now())
    }

    pub(crate) fn connection_at(&self, ip: IpAddr, now: DateTime<Utc>) -> bool {
        if !self.config.enabled {
            return true;
        }

        let escalation = {
            let mut state = self.state.lock();
            if let Some(entry) = state.entries.get(&ip) {
                if entry.is_live(now) {
                    debug!(%ip, count = entry.count, "connection refused by live auto-block");
                    return false;
                }
            }

            let cutoff = window_start(now, self.config.window);
            let window = state.windows.entry(ip).or_default();
            window.push_back(now);
            while window.front().is_some_and(|t| *t < cutoff) {
                window.pop_front();
            }
            let size = window.len();

            if size == 1 || size < self.config.threshold {
                return true;
            }
            self.escalate_locked(&mut state, ip, now)
        };

        match escalation {
            Escalation::Banned { count, until } => {
                warn!(%ip, count, until, "auto-blocked connection burst");
                crate::metrics::record_autoblock("ban");
            }
            Escalation::Promoted { count } => {
                warn!(%ip, count, "auto-block ladder exhausted, promoting to deny list");
                crate::metrics::record_autoblock("promote");
                if let Err(e) = self.deny.block(ip, &self.service) {
                    error!(%ip, error = %e, "failed to persist deny-list promotion");
                }
            }
        }
        false
    }

    fn escalate_locked(&self, state: &mut State, ip: IpAddr, now: DateTime<Utc>) -> Escalation {
        let count = state.entries.get(&ip).map_or(0, |e| e.count) + 1;
        let escalation = match self.config.ladder.get(count as usize - 1) {
            Some(step) => {
                let until = ban_until(now, *step);
                state.entries.insert(ip, AutoBlockEntry { count, expiration: until });
                Escalation::Banned { count, until }
            }
            None => {
                state.entries.remove(&ip);
                state.windows.remove(&ip);
                Escalation::Promoted { count }
            }
        };
        self.persist(&state.entries);
        escalation
    }

    /// Current entry for an address, live or not.
    #[cfg(test)]
    pub fn entry(&self, ip: &IpAddr) -> Option<AutoBlockEntry> {
        self.state.lock().entries.get(ip).copied()
    }

    /// All entries, keyed by address.
    pub fn snapshot(&self) -> BTreeMap<IpAddr, AutoBlockEntry> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|(ip, e)| (*ip, *e))
            .collect()
    }

    /// Drop lapsed bans and idle windows. Returns the number of bans removed.
    pub fn prune_expired(&self) -> usize {
        self.prune_at(Utc::now())
    }

    fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, e| e.is_live(now));
        let removed = before - state.entries.len();

        let cutoff = window_start(now, self.config.window);
        state
            .windows
            .retain(|_, w| w.back().is_some_and(|t| *t >= cutoff));

        if removed > 0 {
            self.persist(&state.entries);
        }
        removed
    }

    fn load(&self, now: DateTime<Utc>) {
        let loaded = match read_state(&self.state_path) {
            Ok(Some(entries)) => entries,
            Ok(None) => {
                info!(path = %self.state_path.display(), "auto-block state not found, starting empty");
                return;
            }
            Err(e) => {
                error!(error = %e, "failed to load auto-block state, starting empty");
                return;
            }
        };

        let total = loaded.len();
        let mut state = self.state.lock();
        for (ip, entry) in loaded {
            if entry.is_live(now) {
                state.entries.insert(ip, entry);
            }
        }
        let dropped = total - state.entries.len();
        info!(
            path = %self.state_path.display(),
            live = state.entries.len(),
            dropped,
            "auto-block state loaded"
        );
        if dropped > 0 {
            self.persist(&state.entries);
        }
    }

    fn persist(&self, entries: &HashMap<IpAddr, AutoBlockEntry>) {
        if let Err(e) = write_state(&self.state_path, entries) {
            error!(error = %e, "failed to persist auto-block state");
        }
    }
}

/// Oldest instant still inside the window. Saturates at the earliest
/// representable time.
fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Ban end in epoch seconds. Saturates at `i64::MAX`.
fn ban_until(now: DateTime<Utc>, step: Duration) -> i64 {
    i64::try_from(step.as_secs())
        .ok()
        .and_then(|secs| now.timestamp().checked_add(secs))
        .unwrap_or(i64::MAX)
}

/// Pad a ladder to the minimum length by repeating its last step.
pub fn normalize_ladder(mut ladder: Vec<Duration>) -> Vec<Duration> {
    let Some(&last) = ladder.last() else {
        return DEFAULT_LADDER.to_vec();
    };
    while ladder.len() < MIN_LADDER_LEN {
        ladder.push(last);
    }
    ladder
}

fn read_state(path: &Path) -> Result<Option<HashMap<IpAddr, AutoBlockEntry>>, PersistenceError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistenceError::io(path, e)),
    };
    let raw: BTreeMap<String, AutoBlockEntry> =
        serde_json::from_str(&content).map_err(|source| PersistenceError::Format {
            path: path.to_path_buf(),
            source,
        })?;

    let mut entries = HashMap::with_capacity(raw.len());
    for (key, entry) in raw {
        match key.parse::<IpAddr>() {
            Ok(ip) => {
                entries.insert(ip, entry);
            }
            Err(_) => warn!(key = %key, "ignoring malformed address in auto-block state"),
        }
    }
    Ok(Some(entries))
}

/// Atomic write (temp file + rename).
fn write_state(path: &Path, entries: &HashMap<IpAddr, AutoBlockEntry>) -> Result<(), PersistenceError> {
    let ordered: BTreeMap<String, AutoBlockEntry> = entries
        .iter()
        .map(|(ip, e)| (ip.to_string(), *e))
        .collect();

    let temp_path = path.with_extension("json.tmp");
    let file = File::create(&temp_path).map_err(|e| PersistenceError::io(&temp_path, e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &ordered).map_err(|source| {
        PersistenceError::Format {
            path: temp_path.clone(),
            source,
        }
    })?;
    fs::rename(&temp_path, path).map_err(|e| PersistenceError::io(path, e))?;

    debug!(path = %path.display(), entries = ordered.len(), "auto-block state saved");
    Ok(())
}
