//! DNS realtime blocklist (DNS-RBL) lookup.
//!
//! A peer is listed when `<reversed-ipv4>.<zone>` resolves to an address in
//! 127.0.0.0/8. NXDOMAIN, other answers and lookup failures mean not listed.

use super::BlocklistSource;
use super::dns::{lookup, query_name, system_resolver};
use async_trait::async_trait;
use hickory_resolver::TokioResolver;
use std::net::IpAddr;
use tracing::debug;

/// Checks peers against one blocklist zone.
#[derive(Clone)]
pub struct RblLookup {
    resolver: TokioResolver,
    zone: String,
}

impl RblLookup {
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            resolver: system_resolver(),
            zone: zone.into(),
        }
    }
}

#[async_trait]
impl BlocklistSource for RblLookup {
    async fn is_listed(&self, ip: IpAddr) -> bool {
        let IpAddr::V4(v4) = ip else {
            return false;
        };
        let Some(response) = lookup(&self.resolver, &query_name(v4, &self.zone)).await else {
            return false;
        };
        let listed = response.iter().any(is_listing);
        if listed {
            debug!(%ip, zone = %self.zone, "peer listed in blocklist");
        }
        listed
    }
}

impl std::fmt::Debug for RblLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RblLookup").field("zone", &self.zone).finish()
    }
}

/// Blocklists answer in 127.0.0.0/8; anything else is a wildcard or a
/// resolver redirect page.
fn is_listing(answer: IpAddr) -> bool {
    matches!(answer, IpAddr::V4(v4) if v4.octets()[0] == 127)
}
