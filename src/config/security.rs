//! Admission policy configuration: allow/deny lists, auto-block, concurrency.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::defaults::{
    default_allow_list_path, default_auto_block_state_path, default_ban_ladder,
    default_deny_list_path, default_dns_country_server, default_dns_rbl_server,
    default_max_concurrent_per_peer,
    default_session_threshold, default_true, default_window_seconds,
};

/// Invalid duration string in the ban ladder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid duration '{0}' (expected e.g. 30s, 15m, 1h, 1d)")]
pub struct DurationParseError(pub String);

/// Admission policy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockingConfig {
    /// Consult the allow list (default: true).
    #[serde(default = "default_true")]
    pub use_allow_list: bool,
    /// Allow list file, relative to the data directory.
    #[serde(default = "default_allow_list_path")]
    pub allow_list_path: PathBuf,
    /// Consult the deny list (default: true).
    #[serde(default = "default_true")]
    pub use_deny_list: bool,
    /// Deny list file, relative to the data directory. Auto-block
    /// promotions are appended here.
    #[serde(default = "default_deny_list_path")]
    pub deny_list_path: PathBuf,
    /// Enable escalating auto-blocking of connection bursts (default: true).
    #[serde(default = "default_true")]
    pub use_auto_blocklist: bool,
    /// Auto-block state file, relative to the data directory.
    #[serde(default = "default_auto_block_state_path")]
    pub auto_block_state_path: PathBuf,
    /// Connections within the window that trigger a ban (default: 3).
    #[serde(default = "default_session_threshold")]
    pub session_threshold: usize,
    /// Sliding window for burst detection, in seconds (default: 10).
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Escalating ban durations (default: 15m, 1h, 1d, 30d).
    #[serde(default = "default_ban_ladder")]
    pub ban_ladder: Vec<String>,
    /// Simultaneous sessions allowed from one address (default: 2).
    #[serde(default = "default_max_concurrent_per_peer")]
    pub max_concurrent_per_peer: u32,
    /// ISO-3166 numeric country codes refused at connect time.
    #[serde(default)]
    pub blocked_countries: Vec<u16>,
    /// DNS zone answering country lookups (default: zz.countries.nerd.dk).
    #[serde(default = "default_dns_country_server")]
    pub dns_country_server: String,
    /// Refuse peers listed in the DNS blocklist zone (default: false).
    #[serde(default)]
    pub use_dns_rbl: bool,
    /// DNS blocklist zone (default: zen.spamhaus.org).
    #[serde(default = "default_dns_rbl_server")]
    pub dns_rbl_server: String,
    /// Require two ESC presses after a fake modem banner before the menu.
    #[serde(default)]
    pub mailer_mode_enabled: bool,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            use_allow_list: true,
            allow_list_path: default_allow_list_path(),
            use_deny_list: true,
            deny_list_path: default_deny_list_path(),
            use_auto_blocklist: true,
            auto_block_state_path: default_auto_block_state_path(),
            session_threshold: default_session_threshold(),
            window_seconds: default_window_seconds(),
            ban_ladder: default_ban_ladder(),
            max_concurrent_per_peer: default_max_concurrent_per_peer(),
            blocked_countries: Vec::new(),
            dns_country_server: default_dns_country_server(),
            use_dns_rbl: false,
            dns_rbl_server: default_dns_rbl_server(),
            mailer_mode_enabled: false,
        }
    }
}

impl BlockingConfig {
    /// Burst detection window.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    /// Parse the configured ban ladder.
    pub fn ladder(&self) -> Result<Vec<Duration>, DurationParseError> {
        self.ban_ladder.iter().map(|s| parse_duration(s)).collect()
    }
}

/// Parse a duration such as `90`, `30s`, `15m`, `1h`, `1d` or `2w`.
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, DurationParseError> {
    let trimmed = s.trim();
    let err = || DurationParseError(s.to_string());
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    let value: u64 = digits.parse().map_err(|_| err())?;
    let multiplier = match unit.to_ascii_lowercase().as_str() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 604_800,
        _ => return Err(err()),
    };
    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(err)
}
