//! Shared plumbing for DNS zone lookups (country and blocklist zones).

use hickory_resolver::TokioResolver;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::lookup_ip::LookupIp;
use hickory_resolver::name_server::TokioConnectionProvider;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::debug;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolver from the system configuration, or public defaults when that
/// cannot be read.
pub fn system_resolver() -> TokioResolver {
    TokioResolver::builder_tokio()
        .map(|b| b.build())
        .unwrap_or_else(|_| {
            TokioResolver::builder_with_config(
                ResolverConfig::default(),
                TokioConnectionProvider::default(),
            )
            .build()
        })
}

/// `<d>.<c>.<b>.<a>.<zone>.` for address `a.b.c.d`.
pub fn query_name(ip: Ipv4Addr, zone: &str) -> String {
    let [a, b, c, d] = ip.octets();
    format!("{d}.{c}.{b}.{a}.{}.", zone.trim_end_matches('.'))
}

/// Resolve `query`, treating errors and timeouts as no answer.
pub async fn lookup(resolver: &TokioResolver, query: &str) -> Option<LookupIp> {
    match tokio::time::timeout(LOOKUP_TIMEOUT, resolver.lookup_ip(query)).await {
        Ok(Ok(response)) => Some(response),
        Ok(Err(e)) => {
            debug!(%query, error = %e, "zone lookup failed");
            None
        }
        Err(_) => {
            debug!(%query, "zone lookup timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_reversed_query() {
        assert_eq!(
            query_name(Ipv4Addr::new(203, 0, 113, 7), "zz.countries.nerd.dk"),
            "7.113.0.203.zz.countries.nerd.dk."
        );
        assert_eq!(
            query_name(Ipv4Addr::new(1, 2, 3, 4), "zone.example."),
            "4.3.2.1.zone.example."
        );
    }
}
