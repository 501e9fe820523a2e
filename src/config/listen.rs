//! Listening port configuration.

use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};

use crate::nodes::ConnectionType;

/// Ports the daemon listens on. An absent port or port 0 disables that protocol.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortsConfig {
    /// Telnet callers (mailer prelude and matrix menu apply).
    pub telnet: Option<u16>,
    /// SSH callers (handed to the primary service untouched).
    pub ssh: Option<u16>,
    /// Binkp mailer sessions.
    pub binkp: Option<u16>,
    /// HTTP status endpoint.
    pub http: Option<u16>,
}

impl PortsConfig {
    /// Enabled endpoints, in a fixed protocol order.
    pub fn endpoints(&self, bind: IpAddr) -> Vec<(SocketAddr, ConnectionType)> {
        [
            (self.telnet, ConnectionType::Telnet),
            (self.ssh, ConnectionType::Ssh),
            (self.binkp, ConnectionType::Binkp),
            (self.http, ConnectionType::Http),
        ]
        .into_iter()
        .filter_map(|(port, kind)| match port {
            Some(port) if port != 0 => Some((SocketAddr::new(bind, port), kind)),
            _ => None,
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn zero_and_missing_ports_are_disabled() {
        let ports = PortsConfig {
            telnet: Some(2323),
            ssh: Some(0),
            binkp: None,
            http: Some(8080),
        };
        let endpoints = ports.endpoints(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].0.port(), 2323);
        assert_eq!(endpoints[0].1, ConnectionType::Telnet);
        assert_eq!(endpoints[1].1, ConnectionType::Http);
    }
}
