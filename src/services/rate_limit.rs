use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Request},
    response::{IntoResponse, Response},
};
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use std::{future::Future, net::SocketAddr, num::NonZeroU32, pin::Pin, sync::Arc};
use tower::{Layer, Service};

use crate::modules::auth::interface::AuthError;

pub type KeyedRateLimiter = Arc<RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>>;

/// Keys tracked before idle buckets are dropped.
const PRUNE_ABOVE: usize = 10_000;

/// `burst` requests per client, then one per minute.
pub fn create_rate_limiter(burst: u32) -> KeyedRateLimiter {
    let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::per_minute(NonZeroU32::MIN).allow_burst(burst);
    Arc::new(RateLimiter::keyed(quota))
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`.
fn forwarded_client(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// The peer address the connection came from. Forwarded headers are only
/// consulted when a trusted proxy sets them; otherwise anyone could pick
/// their own bucket. Requests without connection info share one bucket.
pub fn client_key(request: &Request<Body>, trust_forwarded: bool) -> String {
    let forwarded = trust_forwarded
        .then(|| forwarded_client(request.headers()))
        .flatten();

    forwarded
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn prune(limiter: &KeyedRateLimiter) {
    if limiter.len() > PRUNE_ABOVE {
        limiter.retain_recent();
        tracing::debug!(keys = limiter.len(), "idle rate limit buckets dropped");
    }
}

#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: KeyedRateLimiter,
    trust_forwarded: bool,
}

impl RateLimitLayer {
    pub fn new(limiter: KeyedRateLimiter, trust_forwarded: bool) -> Self {
        Self {
            limiter,
            trust_forwarded,
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            trust_forwarded: self.trust_forwarded,
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: KeyedRateLimiter,
    trust_forwarded: bool,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();
        let key = client_key(&request, self.trust_forwarded);

        Box::pin(async move {
            let limited = limiter.check_key(&key).is_err();
            prune(&limiter);
            if limited {
                tracing::warn!(client = %key, path = %request.uri().path(), "rate limited");
                return Ok(AuthError::RateLimited.into_response());
            }
            inner.call(request).await
        })
    }
}
