//! Listener set - one TCP endpoint per configured port, one accept loop.
//!
//! Each endpoint carries a typed dispatch target. Accepted connections are
//! handed to an [`AcceptHandler`], which must spawn and return at once: the
//! loop never waits on a session.

use crate::error::ListenerError;
use crate::nodes::ConnectionType;
use futures_util::future::select_all;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Receives accepted connections.
pub trait AcceptHandler: Send + Sync {
    fn on_accept(&self, stream: TcpStream, peer: SocketAddr, target: ConnectionType);
}

struct Endpoint {
    listener: TcpListener,
    target: ConnectionType,
    label: String,
}

/// Bound listening endpoints.
#[derive(Default)]
pub struct ListenerSet {
    endpoints: Vec<Endpoint>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an endpoint. A bind failure only disables this port.
    pub async fn add(&mut self, addr: SocketAddr, target: ConnectionType, label: impl Into<String>) -> bool {
        let label = label.into();
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                let bound = listener.local_addr().unwrap_or(addr);
                info!(address = %bound, %target, %label, "listener bound");
                self.endpoints.push(Endpoint {
                    listener,
                    target,
                    label,
                });
                true
            }
            Err(e) => {
                error!(address = %addr, %target, %label, error = %e, "failed to bind listener");
                false
            }
        }
    }

    /// Bound addresses with their targets.
    pub fn local_addrs(&self) -> Vec<(SocketAddr, ConnectionType)> {
        self.endpoints
            .iter()
            .filter_map(|ep| ep.listener.local_addr().ok().map(|a| (a, ep.target)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Accept until cancelled or until an endpoint fails outright.
    #[instrument(skip_all, name = "listeners")]
    pub async fn run<H: AcceptHandler>(self, cancel: CancellationToken, handler: H) -> Result<(), ListenerError> {
        if self.endpoints.is_empty() {
            warn!("no listeners bound, waiting for shutdown");
            cancel.cancelled().await;
            return Ok(());
        }

        loop {
            let accepts = self.endpoints.iter().enumerate().map(|(i, ep)| {
                Box::pin(async move { (i, ep.listener.accept().await) })
            });

            let ((index, result), _, _) = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("listeners stopping");
                    return Ok(());
                }
                accepted = select_all(accepts) => accepted,
            };
            let endpoint = &self.endpoints[index];

            match result {
                Ok((stream, peer)) => {
                    debug!(%peer, target = %endpoint.target, "connection accepted");
                    handler.on_accept(stream, peer, endpoint.target);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if is_endpoint_failure(&e) => {
                    error!(label = %endpoint.label, error = %e, "listener failed");
                    return Err(ListenerError::Multiplexer {
                        label: endpoint.label.clone(),
                        source: e,
                    });
                }
                Err(e) => {
                    warn!(label = %endpoint.label, error = %e, "failed to accept connection");
                }
            }
        }
    }
}

/// Errors that mean the listening socket itself is unusable.
fn is_endpoint_failure(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::NotConnected | io::ErrorKind::Unsupported
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: std::sync::Arc<Mutex<Vec<(ConnectionType, SocketAddr)>>>,
    }

    impl AcceptHandler for Recorder {
        fn on_accept(&self, _stream: TcpStream, peer: SocketAddr, target: ConnectionType) {
            self.seen.lock().unwrap().push((target, peer));
        }
    }

    #[tokio::test]
    async fn routes_connections_by_endpoint() {
        let mut set = ListenerSet::new();
        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
        assert!(set.add(any, ConnectionType::Telnet, "telnet").await);
        assert!(set.add(any, ConnectionType::Binkp, "binkp").await);
        let addrs = set.local_addrs();
        assert_eq!(addrs.len(), 2);

        let recorder = Recorder::default();
        let seen = std::sync::Arc::clone(&recorder.seen);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(set.run(cancel.clone(), recorder));

        let _a = TcpStream::connect(addrs[1].0).await.unwrap();
        let _b = TcpStream::connect(addrs[0].0).await.unwrap();
        for _ in 0..50 {
            if seen.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        cancel.cancel();
        task.await.unwrap().unwrap();

        let mut targets: Vec<_> = seen.lock().unwrap().iter().map(|(t, _)| t.name()).collect();
        targets.sort();
        assert_eq!(targets, ["binkp", "telnet"]);
    }

    #[tokio::test]
    async fn bind_failure_disables_only_that_port() {
        let mut set = ListenerSet::new();
        assert!(set.add("127.0.0.1:0".parse().unwrap(), ConnectionType::Telnet, "telnet").await);
        let taken = set.local_addrs()[0].0;
        assert!(!set.add(taken, ConnectionType::Ssh, "ssh").await);
        assert_eq!(set.local_addrs().len(), 1);
    }

    #[tokio::test]
    async fn empty_set_waits_for_cancel() {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(ListenerSet::new().run(cancel.clone(), Recorder::default()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[test]
    fn classifies_endpoint_failures() {
        assert!(is_endpoint_failure(&io::ErrorKind::InvalidInput.into()));
        assert!(!is_endpoint_failure(&io::ErrorKind::ConnectionAborted.into()));
    }
}
