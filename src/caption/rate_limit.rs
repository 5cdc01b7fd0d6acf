//! Request rate limiting for the captioning backend

use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;

/// Process-wide limiter shared by every generation call
pub struct GlobalRateLimiter {
    limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl GlobalRateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(nonzero!(1u32));
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rps).allow_burst(nonzero!(1u32))),
        }
    }

    /// Wait until a request is allowed
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }
}
