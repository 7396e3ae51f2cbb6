//! Fixed-window request limit keyed by client address.
//!
//! Each client gets its own window, opened by its first request. Counting
//! happens under a single mutex so concurrent requests from one client never
//! lose increments. Responses carry the `RateLimit-*` headers; requests over
//! the quota get `429 Too Many Requests` and a `Retry-After`.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{config::RateLimitConfig, state::AppState};

pub const TOO_MANY_REQUESTS_MESSAGE: &str = "Too many requests, please try again later.";

const RATELIMIT_POLICY: HeaderName = HeaderName::from_static("ratelimit-policy");
const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");
const X_FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    hits: u32,
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(cfg: &RateLimitConfig) -> Self {
        Self {
            max_requests: cfg.max_requests,
            window: cfg.window(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count one request from `client`.
    pub fn hit(&self, client: &str) -> Decision {
        self.hit_at(client, Instant::now())
    }

    fn hit_at(&self, client: &str, now: Instant) -> Decision {
        let mut clients = self.clients.lock();
        let window = clients.entry(client.to_owned()).or_insert(Window {
            started: now,
            hits: 0,
        });
        if now.saturating_duration_since(window.started) >= self.window {
            *window = Window {
                started: now,
                hits: 0,
            };
        }
        window.hits = window.hits.saturating_add(1);

        Decision {
            allowed: window.hits <= self.max_requests,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(window.hits),
            reset_after: self
                .window
                .saturating_sub(now.saturating_duration_since(window.started)),
        }
    }

    /// Drop expired windows; returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let mut clients = self.clients.lock();
        let before = clients.len();
        clients.retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        before - clients.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().len()
    }

    /// Sweep once per window for as long as the limiter is alive.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.window);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = self.sweep();
                if removed > 0 {
                    debug!(removed, remaining = self.tracked_clients(), "rate limit windows swept");
                }
            }
        })
    }
}

/// Peer IP, or the first `X-Forwarded-For` hop when the proxy is trusted.
fn client_key(req: &Request, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = req
            .headers()
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_owned();
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

fn apply_headers(headers: &mut HeaderMap, decision: &Decision, window: Duration) {
    if let Ok(policy) = HeaderValue::try_from(format!("{};w={}", decision.limit, window.as_secs())) {
        headers.insert(RATELIMIT_POLICY, policy);
    }
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(ceil_secs(decision.reset_after)));
}

pub async fn enforce(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let client = client_key(&req, state.config.rate_limit.trust_proxy);
    let limiter = &state.rate_limiter;
    let decision = limiter.hit(&client);

    let mut response = if decision.allowed {
        next.run(req).await
    } else {
        warn!(%client, limit = decision.limit, "rate limit exceeded");
        let mut res = (StatusCode::TOO_MANY_REQUESTS, TOO_MANY_REQUESTS_MESSAGE).into_response();
        res.headers_mut().insert(
            header::RETRY_AFTER,
            HeaderValue::from(ceil_secs(decision.reset_after)),
        );
        res
    };
    apply_headers(response.headers_mut(), &decision, limiter.window());
    response
}
