//! Connection admission policy.
//!
//! - **Allow list**: addresses that bypass every other check
//! - **Deny list**: permanently refused addresses, grows through promotions
//! - **Auto-block**: escalating bans for connection bursts
//! - **Country lookup**: DNS-based refusal by ISO numeric country code
//! - **DNS-RBL**: refusal of peers listed in a DNS blocklist zone
//! - **Concurrency**: per-peer simultaneous session cap
//!
//! # Decision order
//!
//! ```text
//! peer unknown ──► ALLOW (fail-open)
//! allow list   ──► ALLOW
//! deny list    ──► DENY
//! private addr ──► ALLOW
//! country      ──► DENY
//! DNS-RBL      ──► DENY
//! auto-block   ──► DENY
//! otherwise    ──► ALLOW
//! ```

pub mod allow_list;
pub mod auto_block;
pub mod concurrency;
pub mod country;
mod dns;
pub mod deny_list;
pub mod ip_set;
pub mod rbl;

pub use allow_list::AllowList;
pub use auto_block::{AutoBlockConfig, AutoBlocker};
pub use concurrency::ConcurrencyLimiter;
pub use country::CountryLookup;
pub use deny_list::DenyList;
pub use rbl::RblLookup;

use crate::config::{Config, DurationParseError};
use async_trait::async_trait;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Source of ISO numeric country codes for peer addresses.
#[async_trait]
pub trait CountrySource: fmt::Debug + Send + Sync {
    /// Country code for `ip`, or `None` when unknown.
    async fn country_code(&self, ip: IpAddr) -> Option<u16>;
}

/// A DNS blocklist, or anything else that can vouch against a peer.
#[async_trait]
pub trait BlocklistSource: fmt::Debug + Send + Sync {
    async fn is_listed(&self, ip: IpAddr) -> bool;
}

/// Why a connection was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowReason {
    /// Peer address unavailable.
    LookupFailed,
    AllowList,
    /// Loopback, private, link-local or unique-local.
    Private,
    /// No rule objected.
    Clean,
}

/// Why a connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    DenyList,
    Country(u16),
    DnsRbl,
    AutoBlock,
}

impl DenyReason {
    /// Static label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::DenyList => "deny_list",
            Self::Country(_) => "country",
            Self::DnsRbl => "dns_rbl",
            Self::AutoBlock => "auto_block",
        }
    }
}

/// Outcome of the block check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow(AllowReason),
    Deny(DenyReason),
}

#[derive(Debug)]
struct CountryRule {
    source: Box<dyn CountrySource>,
    blocked: Vec<u16>,
}

/// Composed admission policy for one daemon.
#[derive(Debug)]
pub struct IpReputation {
    allow: Option<AllowList>,
    deny: Arc<DenyList>,
    use_deny_list: bool,
    auto_block: AutoBlocker,
    country: Option<CountryRule>,
    blocklist: Option<Box<dyn BlocklistSource>>,
}

impl IpReputation {
    /// Policy with list and auto-block rules only. DNS rules are added with
    /// [`with_country`](Self::with_country) and
    /// [`with_blocklist`](Self::with_blocklist).
    pub fn new(
        allow: Option<AllowList>,
        deny: Arc<DenyList>,
        use_deny_list: bool,
        auto_block: AutoBlocker,
    ) -> Self {
        Self {
            allow,
            deny,
            use_deny_list,
            auto_block,
            country: None,
            blocklist: None,
        }
    }

    /// Refuse peers whose country code is in `blocked`.
    pub fn with_country(mut self, source: impl CountrySource + 'static, blocked: Vec<u16>) -> Self {
        self.country = Some(CountryRule {
            source: Box::new(source),
            blocked,
        });
        self
    }

    /// Refuse peers the blocklist reports as listed.
    pub fn with_blocklist(mut self, source: impl BlocklistSource + 'static) -> Self {
        self.blocklist = Some(Box::new(source));
        self
    }

    /// Load lists and ban state from the paths in `config`.
    ///
    /// The deny list is always loaded so auto-block promotions have a home;
    /// `use_deny_list` only controls whether it is consulted.
    pub fn from_config(config: &Config) -> Result<Self, DurationParseError> {
        let blocking = &config.blocking;

        let allow = blocking
            .use_allow_list
            .then(|| AllowList::load(&config.data_path(&blocking.allow_list_path)));
        let deny = Arc::new(DenyList::load(config.data_path(&blocking.deny_list_path)));

        let auto_config = AutoBlockConfig {
            enabled: blocking.use_auto_blocklist,
            threshold: blocking.session_threshold,
            window: blocking.window(),
            ladder: blocking.ladder()?,
        };
        let auto_block = AutoBlocker::new(
            auto_config,
            config.data_path(&blocking.auto_block_state_path),
            Arc::clone(&deny),
            config.server.name.clone(),
        );

        info!(
            allow = allow.as_ref().map_or(0, AllowList::len),
            deny = deny.len(),
            tracked = auto_block.snapshot().len(),
            "admission policy loaded"
        );
        let mut reputation = Self::new(allow, deny, blocking.use_deny_list, auto_block);
        if !blocking.blocked_countries.is_empty() {
            reputation = reputation.with_country(
                CountryLookup::new(blocking.dns_country_server.clone()),
                blocking.blocked_countries.clone(),
            );
        }
        if blocking.use_dns_rbl {
            reputation = reputation.with_blocklist(RblLookup::new(blocking.dns_rbl_server.clone()));
        }
        Ok(reputation)
    }

    pub fn auto_block(&self) -> &AutoBlocker {
        &self.auto_block
    }

    /// Decide whether a peer may connect. `None` means the address could not
    /// be determined.
    pub async fn check(&self, peer: Option<IpAddr>) -> Verdict {
        let Some(ip) = peer else {
            warn!("peer address unavailable, admitting");
            return Verdict::Allow(AllowReason::LookupFailed);
        };
        let ip = normalize(ip);

        if self.allow.as_ref().is_some_and(|a| a.is_always_allowed(&ip)) {
            debug!(%ip, "admitted by allow list");
            return Verdict::Allow(AllowReason::AllowList);
        }
        if self.use_deny_list && self.deny.is_blocked(&ip) {
            return Verdict::Deny(DenyReason::DenyList);
        }
        if is_private(&ip) {
            return Verdict::Allow(AllowReason::Private);
        }
        if let Some(rule) = &self.country {
            if let Some(code) = rule.source.country_code(ip).await {
                if rule.blocked.contains(&code) {
                    return Verdict::Deny(DenyReason::Country(code));
                }
            }
        }
        if let Some(blocklist) = &self.blocklist {
            if blocklist.is_listed(ip).await {
                return Verdict::Deny(DenyReason::DnsRbl);
            }
        }
        if !self.auto_block.connection(ip) {
            return Verdict::Deny(DenyReason::AutoBlock);
        }
        Verdict::Allow(AllowReason::Clean)
    }
}

/// Map IPv4-mapped IPv6 addresses to plain IPv4.
#[inline]
pub fn normalize(ip: IpAddr) -> IpAddr {
    ip.to_canonical()
}

/// Loopback, private, link-local, unique-local or unspecified.
pub fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_unspecified()
        }
    }
}
