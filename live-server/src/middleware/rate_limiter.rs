// live-server/src/middleware/rate_limiter.rs
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{header, StatusCode},
    Error, HttpResponse, ResponseError,
};
use common::RateLimitConfig;
use futures_util::future::{ready, LocalBoxFuture, Ready};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::utils::transport::remote_address_of;

#[derive(Debug)]
struct RateLimitExceeded {
    retry_after: u64,
}

impl fmt::Display for RateLimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rate limit exceeded")
    }
}

impl ResponseError for RateLimitExceeded {
    fn status_code(&self) -> StatusCode {
        StatusCode::TOO_MANY_REQUESTS
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::TooManyRequests()
            .append_header((header::RETRY_AFTER, self.retry_after.to_string()))
            .body("Too many page loads. Please try again later.")
    }
}

/// Sliding-window limit on page loads per resolved remote address.
///
/// Every page load reserves a viewer ID, so this also bounds how many
/// reservations one address can hold at a time.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    paths: Vec<String>,
    max_requests: usize,
    window: Duration,
    store: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
}

impl RateLimiter {
    pub fn new(paths: Vec<String>, limits: &RateLimitConfig) -> Self {
        Self {
            paths,
            max_requests: limits.max_page_loads,
            window: Duration::from_secs(limits.window_secs),
            store: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn applies_to(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    fn is_rate_limited(&self, address: &str) -> bool {
        let mut store = self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        let hits = store.entry(address.to_string()).or_default();

        while hits
            .front()
            .is_some_and(|hit| now.duration_since(*hit) >= self.window)
        {
            hits.pop_front();
        }

        if hits.len() >= self.max_requests {
            true
        } else {
            hits.push_back(now);
            false
        }
    }

    /// Forget addresses with no hits inside the window
    pub fn prune(&self) -> usize {
        let mut store = self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        let before = store.len();
        store.retain(|_, hits| {
            hits.back()
                .is_some_and(|last| now.duration_since(*last) < self.window)
        });
        before - store.len()
    }

    pub fn tracked_addresses(&self) -> usize {
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimiter
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RateLimiterMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimiterMiddleware {
            service,
            limiter: self.clone(),
        }))
    }
}

pub struct RateLimiterMiddleware<S> {
    service: S,
    limiter: RateLimiter,
}

impl<S, B> Service<ServiceRequest> for RateLimiterMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<ServiceResponse<B>, Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if self.limiter.applies_to(req.path()) {
            let peer = req.peer_addr().map(|addr| addr.ip());
            let address = remote_address_of(peer, req.headers());

            if self.limiter.is_rate_limited(&address) {
                tracing::warn!("Page load rate limit exceeded for {}", address);
                let retry_after = self.limiter.window.as_secs().max(1);
                return Box::pin(async move { Err(RateLimitExceeded { retry_after }.into()) });
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move { fut.await })
    }
}
