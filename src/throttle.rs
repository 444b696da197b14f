use axum::http::Method;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;

type MethodLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// GCRA request throttle keyed by HTTP method. A zero concurrency disables
/// it entirely.
pub struct Throttle {
    limiter: Option<MethodLimiter>,
}

impl Throttle {
    pub fn new(concurrency: u32, burst: u32) -> Self {
        let limiter = NonZeroU32::new(concurrency).map(|rate| {
            let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
            RateLimiter::keyed(Quota::per_second(rate).allow_burst(burst))
        });
        Self { limiter }
    }

    /// True when the request is admitted.
    pub fn check(&self, method: &Method) -> bool {
        match &self.limiter {
            Some(limiter) => limiter.check_key(&method.as_str().to_string()).is_ok(),
            None => true,
        }
    }
}
