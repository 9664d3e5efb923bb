//! In-memory sliding-window rate limiter for unauthenticated endpoints.
use axum::extract::ConnectInfo;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct RateLimiter {
    requests: Arc<RwLock<HashMap<String, Vec<Instant>>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_secs: u64) -> Self {
        Self {
            requests: Arc::new(RwLock::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Records an attempt for `identifier`; false once the window is full.
    pub async fn check(&self, identifier: &str) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.write().await;

        let history = requests.entry(identifier.to_string()).or_default();
        history.retain(|&at| now.duration_since(at) < self.window);

        if history.len() < self.max_requests {
            history.push(now);
            true
        } else {
            false
        }
    }

    pub async fn cleanup(&self) {
        let now = Instant::now();
        let mut requests = self.requests.write().await;

        requests.retain(|_, history| {
            history.retain(|&at| now.duration_since(at) < self.window);
            !history.is_empty()
        });

        tracing::debug!("Rate limiter cleanup: {} active identifiers", requests.len());
    }
}

/// Limiter key for a request: the endpoint scope plus the peer IP when known.
pub fn client_key(scope: &str, addr: Option<&ConnectInfo<SocketAddr>>) -> String {
    match addr {
        Some(ConnectInfo(addr)) => format!("{scope}:{}", addr.ip()),
        None => format!("{scope}:unknown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blocks_after_limit_per_identifier() {
        let limiter = RateLimiter::new(3, 60);

        assert!(limiter.check("login:10.0.0.1").await);
        assert!(limiter.check("login:10.0.0.1").await);
        assert!(limiter.check("login:10.0.0.1").await);
        assert!(!limiter.check("login:10.0.0.1").await);

        assert!(limiter.check("login:10.0.0.2").await);
    }

    #[tokio::test]
    async fn cleanup_drops_idle_identifiers() {
        let limiter = RateLimiter::new(5, 1);

        limiter.check("ip1").await;
        limiter.check("ip2").await;

        tokio::time::sleep(Duration::from_millis(1100)).await;
        limiter.cleanup().await;

        assert_eq!(limiter.requests.read().await.len(), 0);
    }

    #[test]
    fn key_includes_scope_and_ip() {
        let addr: SocketAddr = "192.168.1.4:5123".parse().unwrap();
        assert_eq!(client_key("register", Some(&ConnectInfo(addr))), "register:192.168.1.4");
        assert_eq!(client_key("register", None), "register:unknown");
    }
}
