//! HTTP status surface.
//!
//! HTTP connections arrive through the listener set like any other caller
//! and pass the block check first. Each connection is then served by hyper's
//! HTTP/1 connection driver over an axum router, one request per connection.
//!
//! - `GET /status`  - node status JSON
//! - `GET /metrics` - Prometheus text
//! - anything else  - 404

use crate::nodes::{NodePool, StatusReport};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use hyper::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tower::Service;

/// Time allowed to receive the request head.
const HEAD_TIMEOUT: Duration = Duration::from_secs(10);

type Pools = Arc<Vec<Arc<NodePool>>>;

/// Build the status router over the given pools.
pub fn router(pools: Vec<Arc<NodePool>>) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(not_found)
        .with_state(Arc::new(pools))
}

/// Handler for GET /status - aggregated node status.
async fn status_handler(State(pools): State<Pools>) -> Json<StatusReport> {
    Json(StatusReport::collect(pools.iter().map(|p| p.as_ref())))
}

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found\n")
}

/// Serve one request on `stream`, then close it.
pub async fn serve_connection<S>(stream: S, router: Router) -> Result<(), hyper::Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |request: Request<Incoming>| {
        let mut router = router.clone();
        async move { router.call(request).await }
    });
    http1::Builder::new()
        .keep_alive(false)
        .timer(TokioTimer::new())
        .header_read_timeout(HEAD_TIMEOUT)
        .serve_connection(TokioIo::new(stream), service)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::ConnectionType;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    fn pools() -> Vec<Arc<NodePool>> {
        let main = Arc::new(NodePool::new("Main", ConnectionType::Unknown, 1, 2));
        main.acquire_node(ConnectionType::Telnet, "203.0.113.1");
        vec![main]
    }

    /// Send raw request bytes and collect the response until close.
    async fn exchange(request: &[u8]) -> String {
        let (server, mut client) = duplex(64 * 1024);
        let task = tokio::spawn(serve_connection(server, router(pools())));
        client.write_all(request).await.unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        let _ = task.await.unwrap();
        response
    }

    fn split(response: &str) -> (String, &str) {
        let (head, body) = response.split_once("\r\n\r\n").unwrap();
        (head.to_ascii_lowercase(), body)
    }

    #[tokio::test]
    async fn status_returns_json() {
        let response = exchange(b"GET /status HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        let (head, body) = split(&response);
        assert!(head.contains("content-type: application/json"));
        assert!(head.contains("connection: close"));

        let report: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(report["num_instances"], 2);
        assert_eq!(report["used_instances"], 1);
        assert_eq!(report["lines"][1], "Main Node #2: Waiting for Call");
    }

    #[tokio::test]
    async fn head_request_has_no_body() {
        let response = exchange(b"HEAD /status HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        let (_, body) = split(&response);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn chunked_request_body_is_consumed() {
        let response = exchange(
            b"POST /status HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert_eq!(response.matches("HTTP/1.1 ").count(), 1);
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let response = exchange(b"GET /nope HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[tokio::test]
    async fn metrics_path_serves_text() {
        crate::metrics::init();
        let response = exchange(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[tokio::test]
    async fn garbage_is_400() {
        let response = exchange(b"HELLO\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }
}
