//! DNS-based country lookup.
//!
//! Queries `<reversed-ipv4>.<zone>`; the zone answers with `127.0.X.Y` where
//! `X * 256 + Y` is the ISO-3166 numeric country code.

use super::CountrySource;
use super::dns::{lookup, query_name, system_resolver};
use async_trait::async_trait;
use hickory_resolver::TokioResolver;
use std::net::IpAddr;
use tracing::debug;

/// Resolves peer addresses to numeric country codes.
#[derive(Clone)]
pub struct CountryLookup {
    resolver: TokioResolver,
    zone: String,
}

impl CountryLookup {
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            resolver: system_resolver(),
            zone: zone.into(),
        }
    }
}

#[async_trait]
impl CountrySource for CountryLookup {
    /// Lookup errors, timeouts and IPv6 peers are all unknown.
    async fn country_code(&self, ip: IpAddr) -> Option<u16> {
        let IpAddr::V4(v4) = ip else {
            return None;
        };
        let response = lookup(&self.resolver, &query_name(v4, &self.zone)).await?;
        let code = response.iter().find_map(decode_answer);
        debug!(%ip, ?code, "country lookup");
        code
    }
}

impl std::fmt::Debug for CountryLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountryLookup").field("zone", &self.zone).finish()
    }
}

/// Decode a `127.0.X.Y` answer.
fn decode_answer(answer: IpAddr) -> Option<u16> {
    match answer {
        IpAddr::V4(v4) => match v4.octets() {
            [127, 0, x, y] => Some(u16::from(x) * 256 + u16::from(y)),
            _ => None,
        },
        IpAddr::V6(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_country_answers() {
        // 840 = United States
        assert_eq!(decode_answer("127.0.3.72".parse().unwrap()), Some(840));
        // 156 = China
        assert_eq!(decode_answer("127.0.0.156".parse().unwrap()), Some(156));
        assert_eq!(decode_answer("10.0.3.72".parse().unwrap()), None);
        assert_eq!(decode_answer("::1".parse().unwrap()), None);
    }

    #[tokio::test]
    async fn ipv6_is_unknown() {
        let lookup = CountryLookup::new("zz.countries.nerd.dk");
        assert_eq!(lookup.country_code("2001:db8::1".parse().unwrap()).await, None);
    }
}
