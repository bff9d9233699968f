//! Interfaces the host reading application provides to the engine.

use crate::sync::progress::ProgressRecord;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::{TcpStream, lookup_host};

/// What to do when the server's reading position differs from the local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressChoice {
    /// Jump to the server's position.
    ApplyRemote,
    /// Stay where the local document is.
    KeepLocal,
}

/// Callbacks into the host application.
pub trait Host: Send + Sync {
    /// Ask the user which reading position to keep.
    fn resolve_progress_conflict(
        &self,
        book_id: &str,
        local: &ProgressRecord,
        remote: &ProgressRecord,
    ) -> ProgressChoice {
        let _ = (book_id, local, remote);
        ProgressChoice::KeepLocal
    }

    /// Show a short status message.
    fn notify(&self, message: &str) {
        tracing::info!("{}", message);
    }
}

/// Host without a user interface: keeps local positions, logs messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessHost;

impl Host for HeadlessHost {}

/// Network availability as seen by the host.
#[async_trait]
pub trait Connectivity: Send + Sync {
    /// Whether the server at `server_url` can be reached right now.
    async fn is_online(&self, server_url: &str) -> bool;
}

/// Connectivity that always reports online; failures surface as network
/// errors instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

#[async_trait]
impl Connectivity for AlwaysOnline {
    async fn is_online(&self, _server_url: &str) -> bool {
        true
    }
}

/// Connectivity check by opening a TCP connection to the server.
#[derive(Debug, Clone, Copy)]
pub struct TcpReachability {
    timeout: Duration,
}

impl TcpReachability {
    /// Create a check with the given connect timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Resolution and every connect attempt share one deadline.
#[async_trait]
impl Connectivity for TcpReachability {
    async fn is_online(&self, server_url: &str) -> bool {
        let Ok(url) = reqwest::Url::parse(server_url) else {
            return false;
        };
        let (Some(host), Some(port)) = (url.host_str(), url.port_or_known_default()) else {
            return false;
        };
        // IPv6 literals come back bracketed
        let host = host.trim_start_matches('[').trim_end_matches(']');

        let attempt = async {
            let addrs = lookup_host((host, port)).await.ok()?;
            for addr in addrs {
                if TcpStream::connect(addr).await.is_ok() {
                    return Some(addr);
                }
            }
            None
        };

        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Some(_)) => true,
            Ok(None) => {
                tracing::debug!(host, port, "Server unreachable");
                false
            }
            Err(_) => {
                tracing::debug!(
                    host,
                    port,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Reachability check timed out"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[tokio::test]
    async fn tcp_reachability_detects_listening_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let check = TcpReachability::new(Duration::from_millis(500));
        assert!(check.is_online(&format!("http://127.0.0.1:{}", port)).await);
    }

    #[tokio::test]
    async fn tcp_reachability_reports_closed_port() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let check = TcpReachability::new(Duration::from_millis(500));
        assert!(!check.is_online(&format!("http://127.0.0.1:{}", port)).await);
    }

    #[tokio::test]
    async fn tcp_reachability_rejects_bad_urls() {
        let check = TcpReachability::new(Duration::from_millis(100));
        assert!(!check.is_online("not a url").await);
    }

    #[tokio::test]
    async fn tcp_reachability_is_bounded_by_timeout() {
        // Non-routable address: the connect hangs until the deadline
        let check = TcpReachability::new(Duration::from_millis(200));
        let started = std::time::Instant::now();
        assert!(!check.is_online("http://10.255.255.1:9").await);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
