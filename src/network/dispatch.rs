//! Per-connection dispatch.
//!
//! ```text
//! START ─► BLOCK_CHECK ─► CONCURRENCY_CHECK ─► PRELUDE ─► NODE_ACQUIRE ─► DISPATCHED
//!              │                 │                │             │              │
//!           (DENIED)          (DENIED)        (REJECTED)      (BUSY)        (ENDED)
//! ```
//!
//! HTTP callers leave after the block check and are served the status
//! surface. Binkp callers skip the preludes. Every exit path drops the node
//! lease before the concurrency permit.

use super::listener::AcceptHandler;
use super::prelude::{self, MenuChoice, MenuEntry};
use crate::error::DispatchError;
use crate::launch::LaunchRequest;
use crate::nodes::{ConnectionType, NodePool};
use crate::security::{DenyReason, Verdict, normalize};
use crate::state::{DaemonState, ServicePool};
use crate::telemetry::{SessionTimer, spans};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{Instrument, debug, info, warn};

pub const BUSY_BLOCKED: &str = "BUSY (Blocked)\r\n";
pub const BUSY_CONCURRENT: &str = "BUSY (Concurrent Limit Reached)\r\n";
pub const BUSY_NO_NODES: &str = "BUSY (No Available Nodes)\r\n";

/// Spawns one task per accepted connection.
pub struct Dispatcher {
    state: Arc<DaemonState>,
    status_router: axum::Router,
}

impl Dispatcher {
    pub fn new(state: Arc<DaemonState>) -> Self {
        let status_router = crate::http::router(state.pools());
        Self {
            state,
            status_router,
        }
    }
}

impl AcceptHandler for Dispatcher {
    fn on_accept(&self, stream: TcpStream, peer: SocketAddr, target: ConnectionType) {
        let state = Arc::clone(&self.state);
        let router = self.status_router.clone();
        let span = spans::connection(Some(peer), target.name());

        tokio::spawn(
            async move {
                if let Err(e) = run_connection(state, router, stream, target).await {
                    crate::metrics::record_dispatch_error(e.error_code());
                    warn!(error = %e, code = e.error_code(), "connection ended with error");
                }
                debug!("connection closed");
            }
            .instrument(span),
        );
    }
}

/// Write a single rejection line and close.
async fn send_busy(stream: &mut TcpStream, line: &str) {
    if let Err(e) = stream.write_all(line.as_bytes()).await {
        debug!(error = %e, "failed to send busy line");
    }
    let _ = stream.shutdown().await;
}

/// What a connection will run once it holds a node.
struct Target<'a> {
    name: &'a str,
    pool: &'a Arc<NodePool>,
    template: &'a str,
    working_directory: Option<&'a Path>,
}

/// Drive one connection through admission and dispatch.
pub async fn run_connection(
    state: Arc<DaemonState>,
    status_router: axum::Router,
    mut stream: TcpStream,
    connection_type: ConnectionType,
) -> Result<(), DispatchError> {
    let protocol = connection_type.name();
    crate::metrics::record_connection(protocol);

    let peer = match stream.peer_addr() {
        Ok(addr) => Some(normalize(addr.ip())),
        Err(e) => {
            warn!(error = %e, "cannot determine peer address");
            None
        }
    };

    // BLOCK_CHECK
    match state.reputation.check(peer).await {
        Verdict::Allow(reason) => debug!(?reason, "connection admitted"),
        Verdict::Deny(reason) => {
            let country = match reason {
                DenyReason::Country(code) => Some(code),
                _ => None,
            };
            info!(reason = reason.label(), ?country, "connection blocked");
            crate::metrics::record_rejection(protocol, reason.label());
            send_busy(&mut stream, BUSY_BLOCKED).await;
            return Ok(());
        }
    }

    if connection_type == ConnectionType::Http {
        if let Err(e) = crate::http::serve_connection(stream, status_router).await {
            debug!(error = %e, "status request failed");
        }
        return Ok(());
    }

    // CONCURRENCY_CHECK
    let peer_key = peer.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let Some(_permit) = state.limiter.try_permit(peer_key) else {
        info!(limit = state.limiter.max_per_peer(), "concurrent connection limit reached");
        crate::metrics::record_rejection(protocol, "concurrency");
        send_busy(&mut stream, BUSY_CONCURRENT).await;
        return Ok(());
    };
    let peer_label = peer.map_or_else(|| "unknown".to_string(), |ip| ip.to_string());

    // PROTOCOL_PRELUDE
    let target = match connection_type {
        ConnectionType::Telnet => {
            let Some(service) = select_telnet_service(&state, &mut stream).await? else {
                info!("caller left during prelude");
                crate::metrics::record_rejection(protocol, "prelude");
                let _ = stream.shutdown().await;
                return Ok(());
            };
            service_target(service, &service.config.telnet_command)
        }
        ConnectionType::Ssh => {
            let service = state
                .services
                .first()
                .ok_or(DispatchError::NoService(protocol))?;
            service_target(service, service.config.ssh_template())
        }
        ConnectionType::Binkp => {
            let binkp = state
                .binkp
                .as_ref()
                .ok_or(DispatchError::NoService(protocol))?;
            Target {
                name: "binkp",
                pool: &binkp.pool,
                template: &binkp.config.command,
                working_directory: binkp.config.working_directory.as_deref(),
            }
        }
        ConnectionType::Http | ConnectionType::Unknown => {
            return Err(DispatchError::NoService(protocol));
        }
    };

    // NODE_ACQUIRE
    let Some(mut lease) = target.pool.lease(connection_type, &peer_label) else {
        info!(service = target.name, "no free nodes");
        crate::metrics::record_rejection(protocol, "no_nodes");
        send_busy(&mut stream, BUSY_NO_NODES).await;
        return Ok(());
    };

    // DISPATCHED
    let node = lease.index();
    lease.mark_in_use(&state.semaphores, &peer_label);
    target
        .pool
        .set_node(node, format!("{} via {protocol} from {peer_label}", target.name));

    let _timer = SessionTimer::start(protocol);
    let request = LaunchRequest {
        template: target.template,
        node,
        working_directory: target.working_directory,
    };
    let pool = Arc::clone(target.pool);
    let outcome = state
        .launcher
        .launch(stream, request, |pid| {
            pool.set_pid(node, pid);
        })
        .instrument(spans::session(target.name, node))
        .await?;

    debug!(node, ?outcome, "session ended");
    Ok(())
}

fn service_target<'a>(service: &'a ServicePool, template: &'a str) -> Target<'a> {
    Target {
        name: &service.config.name,
        pool: &service.pool,
        template,
        working_directory: service.config.working_directory.as_deref(),
    }
}

/// Mailer gate and service menu for telnet callers. `None` means the
/// caller was turned away or hung up.
async fn select_telnet_service<'a>(
    state: &'a DaemonState,
    stream: &mut TcpStream,
) -> Result<Option<&'a ServicePool>, DispatchError> {
    let timings = &state.timings;

    if state.config.blocking.mailer_mode_enabled && !prelude::mailer_gate(stream, timings).await? {
        return Ok(None);
    }

    match state.services.as_slice() {
        [] => Err(DispatchError::NoService("telnet")),
        [only] => Ok(Some(only)),
        services => {
            let ansi = prelude::probe_ansi(stream, timings).await?;
            let entries: Vec<MenuEntry<'_>> = services
                .iter()
                .map(|s| MenuEntry {
                    key: s.config.key_char().unwrap_or('?'),
                    name: &s.config.name,
                    description: &s.config.description,
                    require_ansi: s.config.require_ansi,
                })
                .collect();
            let title = &state.config.server.name;
            match prelude::matrix_menu(stream, title, &entries, ansi, timings).await? {
                MenuChoice::Selected(index) => Ok(services.get(index)),
                MenuChoice::HangUp => Ok(None),
            }
        }
    }
}
