//! Per-client token buckets.
//!
//! One bucket per `(class, client ip)`. A `{max, window_secs}` limit becomes a
//! bucket of capacity `max` refilled at `max / window_secs` tokens per second.
//! The `api` class covers every `/api` route; `orders`, `auth` and `payments`
//! are checked by the handlers they guard.

use std::{
    collections::HashMap,
    convert::Infallible,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use servex_config::{RateLimitsConfig, WindowLimit};
use tokio::sync::Mutex;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitClass {
    Api,
    Orders,
    Auth,
    Payments,
}

impl LimitClass {
    fn rejection(&self) -> &'static str {
        match self {
            LimitClass::Api => "too many requests",
            LimitClass::Orders => "too many orders",
            LimitClass::Auth => "too many login attempts",
            LimitClass::Payments => "too many payment attempts",
        }
    }
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    limits: RateLimitsConfig,
    buckets: Mutex<HashMap<(LimitClass, String), Bucket>>,
}

impl RateLimiter {
    pub fn new(limits: RateLimitsConfig) -> Self {
        Self {
            limits,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn limit_for(&self, class: LimitClass) -> WindowLimit {
        match class {
            LimitClass::Api => self.limits.api,
            LimitClass::Orders => self.limits.orders,
            LimitClass::Auth => self.limits.auth,
            LimitClass::Payments => self.limits.payments,
        }
    }

    pub async fn allow_at(&self, class: LimitClass, client: &str, now: Instant) -> bool {
        let limit = self.limit_for(class);
        let capacity = f64::from(limit.max);
        let refill_per_sec = capacity / limit.window_secs.max(1) as f64;

        let mut lock = self.buckets.lock().await;
        let bucket = lock
            .entry((class, client.to_string()))
            .or_insert_with(|| Bucket {
                tokens: capacity,
                last_refill: now,
            });
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(capacity);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub async fn check(&self, class: LimitClass, client: &ClientIp) -> Result<(), ApiError> {
        if self.allow_at(class, &client.0, Instant::now()).await {
            Ok(())
        } else {
            tracing::warn!(client = %client.0, ?class, "rate limited");
            Err(ApiError::too_many_requests(class.rejection()))
        }
    }

    /// Forget buckets idle long enough to have refilled completely.
    pub async fn prune(&self, now: Instant) {
        let idle_after = |class: LimitClass| Duration::from_secs(self.limit_for(class).window_secs);
        self.buckets
            .lock()
            .await
            .retain(|(class, _), b| now.saturating_duration_since(b.last_refill) < idle_after(*class));
    }

    pub async fn tracked_clients(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

/// Peer address of the connection, or `"unknown"` when the server was not
/// started with connect info (in-process tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl ClientIp {
    fn from_parts(parts: &Parts) -> Self {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        ClientIp(ip)
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientIp::from_parts(parts))
    }
}

/// Middleware applying the `api` class to every request it wraps.
pub async fn api_limit(State(st): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let (parts, body) = req.into_parts();
    let client = ClientIp::from_parts(&parts);
    if let Err(err) = st.limiter.check(LimitClass::Api, &client).await {
        return err.into_response();
    }
    next.run(Request::from_parts(parts, body)).await
}
