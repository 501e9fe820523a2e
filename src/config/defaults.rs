//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

/// Returns `true` (for serde defaults).
pub fn default_true() -> bool {
    true
}

// =============================================================================
// Server Defaults
// =============================================================================

pub fn default_server_name() -> String {
    "nodegate".to_string()
}

pub fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

pub fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

// =============================================================================
// Blocking Defaults
// =============================================================================

pub fn default_allow_list_path() -> PathBuf {
    PathBuf::from("allowlist.txt")
}

pub fn default_deny_list_path() -> PathBuf {
    PathBuf::from("denylist.txt")
}

pub fn default_auto_block_state_path() -> PathBuf {
    PathBuf::from("autoblock.json")
}

pub fn default_session_threshold() -> usize {
    3
}

pub fn default_window_seconds() -> u64 {
    10
}

pub fn default_ban_ladder() -> Vec<String> {
    vec![
        "15m".to_string(),
        "1h".to_string(),
        "1d".to_string(),
        "30d".to_string(),
    ]
}

pub fn default_max_concurrent_per_peer() -> u32 {
    2
}

pub fn default_dns_country_server() -> String {
    "zz.countries.nerd.dk".to_string()
}

pub fn default_dns_rbl_server() -> String {
    "zen.spamhaus.org".to_string()
}

// =============================================================================
// Node Defaults
// =============================================================================

pub fn default_binkp_node() -> u16 {
    1
}
