//! Rate limiting
//!
//! Two layers: a process-wide token bucket (governor) in front of the whole
//! router, and per-client fixed windows per endpoint class, enforced by the
//! handlers after authentication so the key can be the user id.

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota,
};
use reef_common::{
    auth::AuthUser,
    config::{RateLimitConfig, WindowLimit},
    errors::{AppError, Result},
    metrics,
};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard};

/// Process-wide token bucket
pub type GlobalRateLimiter = governor::RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Create the process-wide limiter
pub fn create_global_limiter(requests_per_second: u32, burst: u32) -> Arc<GlobalRateLimiter> {
    let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst).unwrap_or(rate);
    Arc::new(governor::RateLimiter::direct(
        Quota::per_second(rate).allow_burst(burst),
    ))
}

/// Process-wide limiting middleware
pub async fn global_rate_limit(
    State(limiter): State<Arc<GlobalRateLimiter>>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, AppError> {
    match limiter.check() {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!("Global rate limit exceeded");
            metrics::record_rate_limited("global");
            Err(AppError::Overloaded)
        }
    }
}

/// Groups of endpoints sharing a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    SearchCreate,
    ParseDocument,
    SearchRead,
    Checkout,
    Pearl,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::SearchCreate => "search-create",
            EndpointClass::ParseDocument => "parse-document",
            EndpointClass::SearchRead => "search-read",
            EndpointClass::Checkout => "checkout",
            EndpointClass::Pearl => "pearl",
        }
    }

    pub fn limit(&self, config: &RateLimitConfig) -> WindowLimit {
        match self {
            EndpointClass::SearchCreate => config.search_create,
            EndpointClass::ParseDocument => config.parse_document,
            EndpointClass::SearchRead => config.search_read,
            EndpointClass::Checkout => config.checkout,
            EndpointClass::Pearl => config.pearl,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32, reset_at: DateTime<Utc> },
    Limited { reset_at: DateTime<Utc> },
}

/// Fixed-window counter keyed by an opaque string
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, key: &str, limit: WindowLimit) -> RateDecision;

    /// Drop expired windows; returns how many were removed
    async fn sweep(&self) -> usize;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Single-process limiter; state is lost on restart
#[derive(Default)]
pub struct InMemoryRateLimiter {
    windows: Mutex<HashMap<String, Window>>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn windows(&self) -> MutexGuard<'_, HashMap<String, Window>> {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn check_at(&self, key: &str, limit: WindowLimit, now: DateTime<Utc>) -> RateDecision {
        let mut windows = self.windows();
        let window = windows
            .entry(key.to_string())
            .and_modify(|w| {
                if now >= w.reset_at {
                    *w = Window {
                        count: 0,
                        reset_at: now + Duration::seconds(limit.window_secs as i64),
                    };
                }
            })
            .or_insert(Window {
                count: 0,
                reset_at: now + Duration::seconds(limit.window_secs as i64),
            });

        if window.count >= limit.limit {
            return RateDecision::Limited {
                reset_at: window.reset_at,
            };
        }

        window.count += 1;
        RateDecision::Allowed {
            remaining: limit.limit - window.count,
            reset_at: window.reset_at,
        }
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut windows = self.windows();
        let before = windows.len();
        windows.retain(|_, w| w.reset_at > now);
        before - windows.len()
    }

    pub fn len(&self) -> usize {
        self.windows().len()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, key: &str, limit: WindowLimit) -> RateDecision {
        self.check_at(key, limit, Utc::now())
    }

    async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }
}

/// `user:<id>` when authenticated, otherwise the first forwarded address
pub fn client_identifier(user: Option<&AuthUser>, headers: &HeaderMap) -> String {
    if let Some(user) = user {
        return format!("user:{}", user.user_id);
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    format!("ip:{}", forwarded.or(real_ip).unwrap_or("unknown"))
}

fn retry_after_secs(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (reset_at - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1000).max(1)
}

/// Count one request for `identity` against `class`
pub async fn enforce(
    limiter: &dyn RateLimiter,
    config: &RateLimitConfig,
    class: EndpointClass,
    identity: &str,
) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let limit = class.limit(config);
    let key = format!("{}:{}", class.as_str(), identity);

    match limiter.check(&key, limit).await {
        RateDecision::Allowed { .. } => Ok(()),
        RateDecision::Limited { reset_at } => {
            metrics::record_rate_limited(class.as_str());
            tracing::warn!(class = class.as_str(), identity, "Rate limit exceeded");
            Err(AppError::RateLimited {
                limit: limit.limit,
                reset_at,
                retry_after_secs: retry_after_secs(reset_at, Utc::now()),
            })
        }
    }
}

/// Periodically drop expired windows
pub fn spawn_sweeper(
    limiter: Arc<dyn RateLimiter>,
    every: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = limiter.sweep().await;
            if removed > 0 {
                tracing::debug!(removed, "Swept expired rate-limit windows");
            }
        }
    })
}
