use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::warn;

use crate::error::{AppError, AppResult};

/// Process-wide budget for ledger-writing requests
#[derive(Clone)]
pub struct WriteRateLimiter {
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl WriteRateLimiter {
    pub fn per_minute(requests: u32) -> Self {
        let burst = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(burst))),
        }
    }

    pub fn check(&self) -> AppResult<()> {
        self.limiter.check().map_err(|_| AppError::RateLimited)
    }
}

/// Reads pass through; every other method spends from the write budget
pub async fn limit_writes(
    State(limiter): State<WriteRateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        if let Err(e) = limiter.check() {
            warn!(path = %req.uri().path(), "Write rate limit exceeded");
            return Err(e);
        }
    }
    Ok(next.run(req).await)
}
