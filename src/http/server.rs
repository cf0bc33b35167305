//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{with_admission, SharedLimiter};
use crate::error::{Result, TollgateError};

/// HTTP server fronting a router with the admission interceptor.
pub struct HttpServer {
    /// Bound listener
    listener: TcpListener,
    /// Host routes with the interceptor applied
    app: Router,
}

impl HttpServer {
    /// Bind `addr` and wrap `routes` with the interceptor backed by `limiter`.
    pub async fn bind(addr: SocketAddr, routes: Router, limiter: SharedLimiter) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            app: with_admission(routes, limiter),
        })
    }

    /// The address actually bound (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `signal` resolves, then drain in-flight requests.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(
            addr = %self.local_addr()?,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            self.listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TollgateError::Io(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimiterConfig;
    use crate::ratelimit::RateLimiter;
    use crate::store::MemoryStore;
    use axum::routing::get;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn get_root(addr: SocketAddr) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_serves_and_limits_by_peer_address() {
        let config = LimiterConfig {
            capacity: 1,
            refill_rate: 1,
            refill_interval_ms: 60_000,
            ..LimiterConfig::default()
        };
        let limiter = Arc::new(RateLimiter::new(&config, Arc::new(MemoryStore::new())).unwrap());
        let routes = Router::new().route("/", get(|| async { "ok" }));

        let server = HttpServer::bind("127.0.0.1:0".parse().unwrap(), routes, limiter)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_with_shutdown(async move {
            let _ = stop_rx.await;
        }));

        let first = get_root(addr).await;
        assert!(first.starts_with("HTTP/1.1 200"), "{}", first);
        assert!(first.contains("x-ratelimit-remaining: 0"));

        let second = get_root(addr).await;
        assert!(second.starts_with("HTTP/1.1 429"), "{}", second);
        assert!(second.contains("too many requests"));

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
