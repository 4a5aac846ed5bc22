//! Admission control for the gRPC boundary
//!
//! A process-wide token bucket caps accepted requests per second; anything
//! over budget is turned away with `RESOURCE_EXHAUSTED` before it reaches a
//! handler. Concurrency caps are tower layers applied on the server builder.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tonic::service::Interceptor;
use tonic::{Request, Status};
use tracing::debug;

use crate::metrics;

#[derive(Clone)]
pub struct AdmissionInterceptor {
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl AdmissionInterceptor {
    /// `max_requests_per_second == 0` disables rate limiting
    pub fn new(max_requests_per_second: u32) -> Self {
        let limiter = NonZeroU32::new(max_requests_per_second)
            .map(|rps| Arc::new(RateLimiter::direct(Quota::per_second(rps))));
        Self { limiter }
    }
}

impl Interceptor for AdmissionInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        if let Some(limiter) = &self.limiter {
            if limiter.check().is_err() {
                debug!("Request rejected by rate limiter");
                metrics::record_admission_rejection();
                return Err(Status::resource_exhausted("request rate limit exceeded"));
            }
        }
        Ok(request)
    }
}
