// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Token bucket limiting how often the Sync Engine rebuilds.
//!
//! The bucket starts full. Each rebuild consumes one token; tokens refill at
//! `rate` per second up to `capacity`. A rate that is not a positive number
//! disables limiting.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    /// Tokens added per second; `None` admits everything
    rate: Option<f64>,
    state: Mutex<Bucket>,
}

impl TokenBucket {
    #[must_use]
    pub fn new(rate: f64, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            capacity,
            rate: (rate > 0.0 && rate.is_finite()).then_some(rate),
            state: Mutex::new(Bucket {
                tokens: capacity,
                last_update: Instant::now(),
            }),
        }
    }

    fn refill(&self, bucket: &mut Bucket, rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(self.capacity);
        bucket.last_update = now;
    }

    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.rate.is_none()
    }

    /// Consumes a token if one is available.
    pub fn try_acquire(&self) -> bool {
        let Some(rate) = self.rate else {
            return true;
        };
        let mut bucket = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut bucket, rate);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until the next token is available.
    #[must_use]
    pub fn wait_time(&self) -> Duration {
        let Some(rate) = self.rate else {
            return Duration::ZERO;
        };
        let mut bucket = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut bucket, rate);
        if bucket.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - bucket.tokens) / rate)
        }
    }

    /// Waits until a token is available and consumes it.
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            tokio::time::sleep(self.wait_time().max(Duration::from_millis(1))).await;
        }
    }
}
