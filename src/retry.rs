// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Exponential backoff for Kubernetes API calls and work queue requeues.
//!
//! API calls retry transient errors (429, 5xx, transport) and fail fast on permanent
//! errors (other 4xx). Work queues use an unbounded policy: a failing rebuild keeps
//! retrying at the capped interval until it succeeds or the queue shuts down.

use anyhow::{anyhow, Result};
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Shape of a backoff schedule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max_interval: Duration,
    /// Give up once this much time has passed; `None` never gives up
    pub max_elapsed: Option<Duration>,
    pub multiplier: f64,
    /// Jitter applied to every delay (0.1 = ±10%)
    pub jitter: f64,
}

/// Kubernetes API calls: 100ms doubling to 30s, for at most 5 minutes.
pub const API_POLICY: BackoffPolicy = BackoffPolicy {
    initial: Duration::from_millis(100),
    max_interval: Duration::from_secs(30),
    max_elapsed: Some(Duration::from_secs(300)),
    multiplier: 2.0,
    jitter: 0.1,
};

/// Work queue requeues: 500ms doubling to 60s, forever.
pub const QUEUE_POLICY: BackoffPolicy = BackoffPolicy {
    initial: Duration::from_millis(500),
    max_interval: Duration::from_secs(60),
    max_elapsed: None,
    multiplier: 2.0,
    jitter: 0.1,
};

/// Running backoff state for one operation or queue item.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    policy: BackoffPolicy,
    current: Duration,
    started: Instant,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: policy.initial,
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Un-jittered delay the next call to [`next_backoff`](Self::next_backoff) is based on.
    #[must_use]
    pub fn current_interval(&self) -> Duration {
        self.current
    }

    /// Returns the next delay, or `None` once the policy's time budget is spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self
            .policy
            .max_elapsed
            .is_some_and(|budget| self.started.elapsed() >= budget)
        {
            return None;
        }

        let delay = jittered(self.current, self.policy.jitter);
        self.current = self
            .current
            .mul_f64(self.policy.multiplier)
            .min(self.policy.max_interval);
        Some(delay)
    }

    /// Restart the schedule from the initial interval.
    pub fn reset(&mut self) {
        self.current = self.policy.initial;
        self.started = Instant::now();
    }
}

fn jittered(interval: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return interval;
    }
    let spread = interval.as_secs_f64() * factor;
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_secs_f64((interval.as_secs_f64() + offset).max(0.0))
}

/// Backoff for Kubernetes API retries ([`API_POLICY`]).
#[must_use]
pub fn default_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(API_POLICY)
}

/// Backoff for work queue requeues ([`QUEUE_POLICY`]).
#[must_use]
pub fn queue_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(QUEUE_POLICY)
}

/// Retry a Kubernetes API call with exponential backoff.
///
/// `operation_name` shows up in logs, e.g. "get service default/web".
///
/// # Errors
///
/// Returns the API error as soon as it is not retryable, or a summary error once
/// [`API_POLICY`]'s time budget is spent.
pub async fn retry_api_call<T, F, Fut>(mut operation: F, operation_name: &str) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    let mut backoff = default_backoff();
    let started = Instant::now();

    for attempt in 1u32.. {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt,
                        elapsed = ?started.elapsed(),
                        "Kubernetes API call succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(e) if !is_retryable_error(&e) => {
                debug!(operation = operation_name, error = %e, "Non-retryable Kubernetes API error");
                return Err(e.into());
            }
            Err(e) => e,
        };

        let Some(delay) = backoff.next_backoff() else {
            error!(
                operation = operation_name,
                attempt,
                elapsed = ?started.elapsed(),
                error = %err,
                "Backoff exhausted, giving up"
            );
            return Err(anyhow!("{operation_name}: gave up after {attempt} attempts: {err}"));
        };
        warn!(
            operation = operation_name,
            attempt,
            retry_after = ?delay,
            error = %err,
            "Retryable Kubernetes API error, will retry"
        );
        tokio::time::sleep(delay).await;
    }
    Err(anyhow!("{operation_name}: attempt counter overflowed"))
}

/// Rate limiting (429), server errors (5xx) and transport failures are transient.
pub(crate) fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(api_err) => api_err.code == 429 || (500..600).contains(&api_err.code),
        kube::Error::Service(_) => true,
        _ => false,
    }
}

/// Returns true if the error is an API 404.
#[must_use]
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<kube::Error>(),
        Some(kube::Error::Api(api_err)) if api_err.code == 404
    )
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
