//! Telemetry utilities for session timing and span naming.

use std::time::Instant;

/// Guard for timing a dispatched session.
///
/// Counts the session as active while alive; records its duration when
/// dropped.
pub struct SessionTimer {
    protocol: &'static str,
    start: Instant,
}

impl SessionTimer {
    pub fn start(protocol: &'static str) -> Self {
        crate::metrics::add_active_sessions(1);
        Self {
            protocol,
            start: Instant::now(),
        }
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        crate::metrics::add_active_sessions(-1);
        let duration = self.start.elapsed().as_secs_f64();
        crate::metrics::record_session(self.protocol, duration);
    }
}

/// Standardized span constructors.
pub mod spans {
    use std::net::SocketAddr;
    use tracing::{Span, info_span};

    /// Span covering one accepted connection.
    pub fn connection(peer: Option<SocketAddr>, protocol: &str) -> Span {
        match peer {
            Some(peer) => info_span!("connection", peer = %peer, protocol = %protocol),
            None => info_span!("connection", peer = "unknown", protocol = %protocol),
        }
    }

    /// Span covering a worker session on a node.
    pub fn session(service: &str, node: u16) -> Span {
        info_span!("session", service = %service, node = node)
    }
}
