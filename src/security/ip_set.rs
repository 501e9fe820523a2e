//! Address sets backing the allow and deny lists.
//!
//! - **IPv4 singles**: `RoaringBitmap` keyed by the u32 address
//! - **IPv6 singles**: `HashSet`
//! - **CIDR ranges**: `Vec<IpNet>`, scanned linearly (rare)

use ipnet::IpNet;
use roaring::RoaringBitmap;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv6Addr};
use std::path::Path;
use tracing::warn;

/// A set of addresses and networks with O(1) single-address lookups.
#[derive(Debug, Default, Clone)]
pub struct IpSet {
    ipv4: RoaringBitmap,
    ipv6: HashSet<Ipv6Addr>,
    networks: Vec<IpNet>,
}

impl IpSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a list file: one address or CIDR per line, `#` starts a comment.
    ///
    /// Malformed lines are logged and skipped.
    pub fn load(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut set = Self::new();
        for (lineno, line) in content.lines().enumerate() {
            match parse_line(line) {
                Some(Ok(net)) => set.insert(net),
                Some(Err(entry)) => warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    %entry,
                    "ignoring malformed address list entry"
                ),
                None => {}
            }
        }
        Ok(set)
    }

    /// Add an address (as a /32 or /128) or a network.
    pub fn insert(&mut self, net: IpNet) {
        match net {
            IpNet::V4(v4) if v4.prefix_len() == 32 => {
                self.ipv4.insert(u32::from(v4.addr()));
            }
            IpNet::V6(v6) if v6.prefix_len() == 128 => {
                self.ipv6.insert(v6.addr());
            }
            _ => {
                let net = net.trunc();
                if !self.networks.contains(&net) {
                    self.networks.push(net);
                }
            }
        }
    }

    /// Add a single address.
    pub fn insert_ip(&mut self, ip: IpAddr) {
        self.insert(IpNet::from(ip));
    }

    /// Whether the address is listed directly or falls in a listed network.
    #[inline]
    pub fn contains(&self, ip: &IpAddr) -> bool {
        let single = match ip {
            IpAddr::V4(v4) => self.ipv4.contains(u32::from(*v4)),
            IpAddr::V6(v6) => self.ipv6.contains(v6),
        };
        single || self.networks.iter().any(|net| net.contains(ip))
    }

    /// Number of entries (singles plus networks).
    pub fn len(&self) -> usize {
        self.ipv4.len() as usize + self.ipv6.len() + self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse one list line.
///
/// Returns `None` for blank and comment-only lines, `Some(Err(entry))` for
/// entries that are neither an address nor a CIDR network.
pub fn parse_line(line: &str) -> Option<Result<IpNet, String>> {
    let entry = line.split('#').next().unwrap_or("").trim();
    if entry.is_empty() {
        return None;
    }
    if let Ok(ip) = entry.parse::<IpAddr>() {
        return Some(Ok(IpNet::from(ip)));
    }
    Some(entry.parse::<IpNet>().map_err(|_| entry.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn parses_lines_with_comments() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   # just a comment"), None);
        assert_eq!(
            parse_line("1.2.3.4 # AutoBlocked by nodegate on: 2024-01-01"),
            Some(Ok("1.2.3.4/32".parse().unwrap()))
        );
        assert_eq!(
            parse_line("10.0.0.0/8"),
            Some(Ok("10.0.0.0/8".parse().unwrap()))
        );
        assert_eq!(parse_line("not-an-ip"), Some(Err("not-an-ip".to_string())));
    }

    #[test]
    fn matches_singles_and_networks() {
        let mut set = IpSet::new();
        set.insert_ip(ip("203.0.113.7"));
        set.insert_ip(ip("2001:db8::1"));
        set.insert("198.51.100.0/24".parse().unwrap());

        assert!(set.contains(&ip("203.0.113.7")));
        assert!(!set.contains(&ip("203.0.113.8")));
        assert!(set.contains(&ip("2001:db8::1")));
        assert!(set.contains(&ip("198.51.100.200")));
        assert!(!set.contains(&ip("198.51.101.1")));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn networks_are_normalized_and_deduplicated() {
        let mut set = IpSet::new();
        set.insert("10.1.2.3/16".parse().unwrap());
        set.insert("10.1.0.0/16".parse().unwrap());
        assert_eq!(set.len(), 1);
        assert!(set.contains(&ip("10.1.255.255")));
    }

    #[test]
    fn load_skips_malformed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.txt");
        fs::write(&path, "1.1.1.1\n# header\n\nbogus\n2001:db8::/32 # docs\n").unwrap();
        let set = IpSet::load(&path).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&ip("2001:db8::42")));
    }
}
