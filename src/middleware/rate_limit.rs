//! Per-client rate limiting for the intake routes.
//!
//! Fixed-window counter per IP. The client IP comes from the first
//! X-Forwarded-For hop when present (the service usually sits behind a
//! proxy), falling back to the socket address. Requests with no
//! resolvable IP pass through unlimited rather than sharing one bucket.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

struct WindowEntry {
    count: u32,
    window_start: Instant,
}

pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    state: Mutex<HashMap<IpAddr, WindowEntry>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Arc<Self> {
        Arc::new(Self {
            max_requests,
            window,
            state: Mutex::new(HashMap::new()),
        })
    }

    fn allow(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();

        // Opportunistic cleanup keeps the map bounded.
        if state.len() > 10_000 {
            let window = self.window;
            state.retain(|_, entry| now.duration_since(entry.window_start) < window);
        }

        let entry = state.entry(ip).or_insert(WindowEntry {
            count: 0,
            window_start: now,
        });
        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.count += 1;
        entry.count <= self.max_requests
    }
}

fn client_ip(req: &Request) -> Option<IpAddr> {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse() {
                return Some(ip);
            }
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(ip) = client_ip(&req) else {
        return next.run(req).await;
    };
    if !limiter.allow(ip) {
        warn!(%ip, "Rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            axum::Json(serde_json::json!({ "error": "rate_limited" })),
        )
            .into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limiter.allow(ip));
        assert!(limiter.allow(ip));
        assert!(limiter.allow(ip));
        assert!(!limiter.allow(ip));
    }

    #[test]
    fn buckets_are_per_ip() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(limiter.allow(a));
        assert!(!limiter.allow(a));
        assert!(limiter.allow(b));
    }

    #[test]
    fn window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limiter.allow(ip));
        assert!(!limiter.allow(ip));
        std::thread::sleep(Duration::from_millis(15));
        assert!(limiter.allow(ip));
    }
}
