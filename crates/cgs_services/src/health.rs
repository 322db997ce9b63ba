//! Operational HTTP endpoint: liveness, readiness, and metrics scrape.
//!
//! A deliberately minimal HTTP/1.1 server on tokio serving exactly three
//! GET routes:
//!
//! - `/healthz` - aggregated component health, 503 when unhealthy
//! - `/readyz`  - readiness flag, 503 until the server finishes startup
//! - `/metrics` - Prometheus text exposition from [`GameMetrics`]
//!
//! Each connection serves one request and closes.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use cgs_foundation::error::{CgsError, CgsResult};
use cgs_foundation::metrics::{GameMetrics, HealthStatus};

const MAX_REQUEST_BYTES: usize = 8192;

/// Running health endpoint.
pub struct HealthServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl HealthServer {
    /// Binds and starts serving. Pass port 0 to pick a free port.
    ///
    /// # Errors
    /// Returns [`CgsError::ConnectionFailed`] when the address cannot be
    /// bound.
    pub async fn bind(
        addr: SocketAddr,
        metrics: Arc<GameMetrics>,
        ready: Arc<AtomicBool>,
    ) -> CgsResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CgsError::ConnectionFailed(format!("health bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| CgsError::ConnectionFailed(e.to_string()))?;
        info!(addr = %local_addr, "health endpoint listening");

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                let metrics = metrics.clone();
                                let ready = ready.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = serve_one(stream, metrics, ready).await {
                                        debug!(peer = %peer, error = %e, "health connection error");
                                    }
                                });
                            }
                            Err(e) => warn!(error = %e, "health accept failed"),
                        }
                    }
                }
            }
            debug!("health endpoint stopped");
        });

        Ok(Self {
            local_addr,
            shutdown,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and waits for the accept loop to exit. In-flight
    /// requests finish on their own tasks.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

async fn serve_one(
    mut stream: TcpStream,
    metrics: Arc<GameMetrics>,
    ready: Arc<AtomicBool>,
) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if buf.len() > MAX_REQUEST_BYTES {
            let response = render(431, "Request Header Fields Too Large", "text/plain", "");
            stream.write_all(response.as_bytes()).await?;
            return stream.shutdown().await;
        }
    }

    let request = String::from_utf8_lossy(&buf);
    let mut parts = request.lines().next().unwrap_or("").split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");

    let response = if method != "GET" {
        render(405, "Method Not Allowed", "text/plain", "method not allowed\n")
    } else {
        match path {
            "/healthz" => {
                let report = metrics.health_check();
                let body = format!("{{\"status\":\"{}\"}}\n", report.status.as_str());
                if report.status == HealthStatus::Unhealthy {
                    render(503, "Service Unavailable", "application/json", &body)
                } else {
                    render(200, "OK", "application/json", &body)
                }
            }
            "/readyz" => {
                if ready.load(Ordering::Relaxed) {
                    render(200, "OK", "text/plain", "ready\n")
                } else {
                    render(503, "Service Unavailable", "text/plain", "not ready\n")
                }
            }
            "/metrics" => render(
                200,
                "OK",
                "text/plain; version=0.0.4",
                &metrics.scrape(),
            ),
            _ => render(404, "Not Found", "text/plain", "not found\n"),
        }
    };

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn render(code: u16, reason: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {code} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn request(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("GET {path} HTTP/1.1\r\nHost: test\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    async fn server(ready: bool) -> (HealthServer, Arc<GameMetrics>, Arc<AtomicBool>) {
        let metrics = Arc::new(GameMetrics::new());
        let ready_flag = Arc::new(AtomicBool::new(ready));
        let server = HealthServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            metrics.clone(),
            ready_flag.clone(),
        )
        .await
        .unwrap();
        (server, metrics, ready_flag)
    }

    #[tokio::test]
    async fn healthz_reflects_component_health() {
        let (server, metrics, _) = server(true).await;
        let addr = server.local_addr();

        let response = request(addr, "/healthz").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"status\":\"healthy\""));

        metrics.set_component_health("wal", HealthStatus::Unhealthy);
        let response = request(addr, "/healthz").await;
        assert!(response.starts_with("HTTP/1.1 503"));
        assert!(response.contains("\"status\":\"unhealthy\""));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn readyz_follows_flag() {
        let (server, _, ready) = server(false).await;
        let addr = server.local_addr();

        let response = request(addr, "/readyz").await;
        assert!(response.starts_with("HTTP/1.1 503"));

        ready.store(true, Ordering::Relaxed);
        let response = request(addr, "/readyz").await;
        assert!(response.starts_with("HTTP/1.1 200"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn metrics_scrape_is_served() {
        let (server, metrics, _) = server(true).await;
        metrics.increment_counter("ticks_total", 3);

        let response = request(server.local_addr(), "/metrics").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("ticks_total 3"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_path_is_404_and_post_is_405() {
        let (server, _, _) = server(true).await;
        let addr = server.local_addr();

        let response = request(addr, "/nope").await;
        assert!(response.starts_with("HTTP/1.1 404"));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"POST /healthz HTTP/1.1\r\nHost: test\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 405"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_accepting() {
        let (server, _, _) = server(true).await;
        let addr = server.local_addr();
        server.shutdown().await;
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
