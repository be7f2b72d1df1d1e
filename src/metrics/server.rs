//! Metrics HTTP Server
//!
//! Provides HTTP endpoint for Prometheus metrics scraping

use crate::metrics::Metrics;
use crate::protocol::read_request_head;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP server for serving Prometheus metrics
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    bind_addr: SocketAddr,
    request_timeout: Duration,
}

impl MetricsServer {
    /// Create a new metrics server
    pub fn new(metrics: Arc<Metrics>, bind_addr: SocketAddr) -> Self {
        Self {
            metrics,
            bind_addr,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Limit how long a scraper may take to send its request head
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Bind and serve until the task is aborted
    pub async fn start(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(bind_addr = %self.bind_addr, "Metrics server started");
        self.serve(listener).await
    }

    /// Serve requests on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            match listener.accept().await {
                Ok((mut stream, addr)) => {
                    debug!(client_addr = %addr, "Metrics request received");

                    let metrics = self.metrics.clone();
                    let request_timeout = self.request_timeout;
                    tokio::spawn(async move {
                        if let Err(e) = handle_request(&mut stream, metrics, request_timeout).await {
                            error!(error = %e, client_addr = %addr, "Failed to handle metrics request");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept metrics connection");
                }
            }
        }
    }
}

/// Handle a single HTTP request for metrics
async fn handle_request(stream: &mut TcpStream, metrics: Arc<Metrics>, request_timeout: Duration) -> anyhow::Result<()> {
    let head = match timeout(request_timeout, read_request_head(stream)).await {
        Ok(head) => head?,
        Err(_) => {
            warn!("Metrics request head timed out after {:?}", request_timeout);
            return Ok(());
        }
    };

    let (status, content_type, body) = match (head.method.as_str(), head.target.as_str()) {
        ("GET", "/metrics") => (
            "200 OK",
            "text/plain; version=0.0.4; charset=utf-8",
            metrics.export_prometheus(),
        ),
        ("GET", "/health") => ("200 OK", "text/plain", "OK".to_string()),
        _ => ("404 Not Found", "text/plain", "Not Found".to_string()),
    };

    let response = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        content_type,
        body.len(),
        body
    );

    stream.write_all(response.as_bytes()).await?;
    debug!(path = %head.target, status, "Sent metrics response");
    Ok(())
}
