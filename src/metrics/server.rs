//! Metrics HTTP Server
//!
//! Minimal HTTP endpoint for Prometheus scraping

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::metrics::Metrics;
use crate::Result;

/// HTTP server for serving Prometheus metrics
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    listener: TcpListener,
}

impl MetricsServer {
    /// Bind the metrics endpoint
    pub async fn bind(metrics: Arc<Metrics>, bind_addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind metrics server to {}", bind_addr))?;
        Ok(Self { metrics, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve requests until the task is aborted
    pub async fn serve(self) -> Result<()> {
        info!(bind_addr = %self.local_addr()?, "Metrics server started");

        loop {
            match self.listener.accept().await {
                Ok((mut stream, addr)) => {
                    debug!(client_addr = %addr, "Metrics request received");

                    let metrics = Arc::clone(&self.metrics);
                    tokio::spawn(async move {
                        if let Err(e) = handle_request(&mut stream, &metrics).await {
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

/// Handle a single HTTP request
async fn handle_request(stream: &mut TcpStream, metrics: &Metrics) -> Result<()> {
    let mut buffer = [0; 1024];
    let bytes_read = stream.read(&mut buffer).await?;
    if bytes_read == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buffer[..bytes_read]);

    let (status, content_type, body) = if request.starts_with("GET /metrics") {
        ("200 OK", "text/plain; version=0.0.4; charset=utf-8", metrics.export_prometheus())
    } else if request.starts_with("GET /health") {
        ("200 OK", "text/plain", "OK".to_string())
    } else {
        ("404 Not Found", "text/plain", "Not Found".to_string())
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
    stream.shutdown().await?;
    debug!(status, "Sent metrics response");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path).as_bytes())
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_metrics_endpoint() -> anyhow::Result<()> {
        let metrics = Arc::new(Metrics::new()?);
        metrics.session_opened();

        let server = MetricsServer::bind(metrics, "127.0.0.1:0".parse()?).await?;
        let addr = server.local_addr()?;
        let handle = tokio::spawn(server.serve());

        let response = get(addr, "/metrics").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("pgsniff_active_sessions 1"));

        let response = get(addr, "/health").await;
        assert!(response.ends_with("OK"));

        let response = get(addr, "/nope").await;
        assert!(response.starts_with("HTTP/1.1 404"));

        handle.abort();
        Ok(())
    }
}
