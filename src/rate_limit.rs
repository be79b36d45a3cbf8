// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Keyed request rate limiting.
//!
//! One GCRA cell per caller key (`user:{id}` for authenticated requests,
//! `ip:{addr}` otherwise). A caller may burst up to the per-minute quota and
//! then gets one request back every `60s / quota`.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{
    clock::{Clock, DefaultClock},
    DefaultKeyedRateLimiter, Quota,
};

#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<DefaultKeyedRateLimiter<String>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("tracked_keys", &self.tracked_keys())
            .finish()
    }
}

impl RateLimiter {
    /// `limit` requests per minute per key; zero is treated as one.
    pub fn per_minute(limit: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(limit).unwrap_or(NonZeroU32::MIN));
        Self {
            inner: Arc::new(governor::RateLimiter::keyed(quota)),
        }
    }

    /// Take one request for `key`. On rejection returns how long the caller
    /// has to wait before the next request is admitted.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        self.inner
            .check_key(&key.to_string())
            .map_err(|negative| negative.wait_time_from(DefaultClock::default().now()))
    }

    /// Drop state for keys whose cells have fully refilled.
    pub fn retain_recent(&self) {
        self.inner.retain_recent();
        self.inner.shrink_to_fit();
    }

    pub fn tracked_keys(&self) -> usize {
        self.inner.len()
    }
}

/// Whole seconds for a `Retry-After` header, never zero.
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}
