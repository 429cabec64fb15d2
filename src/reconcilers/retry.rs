// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Backoff for Kubernetes API calls and for failing reconciles.
//!
//! Both layers follow the same schedule shape, doubling from an initial delay up to a
//! cap with ±10% jitter:
//!
//! - [`retry_api_call`] retries one call a few times on transient errors, so a brief
//!   conflict or throttle does not fail the whole pass.
//! - [`RequeueBackoff`] spaces out the requeues of an object whose passes keep failing
//!   with transient errors, and forgets the object once a pass succeeds.

use crate::constants::{
    API_CALL_ATTEMPTS, API_CALL_BACKOFF_INITIAL_MILLIS, API_CALL_BACKOFF_MAX_MILLIS,
    ERROR_BACKOFF_INITIAL_MILLIS, ERROR_BACKOFF_MAX_SECS, ERROR_REQUEUE_DURATION_SECS,
};
use crate::errors::ReconcileError;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Randomization applied to every delay (±10%)
const JITTER: f64 = 0.1;

/// Schedule of in-pass retries: 200ms, 400ms, 800ms
pub const API_CALL_BACKOFF: Backoff = Backoff {
    initial: Duration::from_millis(API_CALL_BACKOFF_INITIAL_MILLIS),
    max: Duration::from_millis(API_CALL_BACKOFF_MAX_MILLIS),
    jitter: JITTER,
};

/// Schedule of requeues after transient failures: 5s, 10s, 20s ... 5m
pub const REQUEUE_BACKOFF: Backoff = Backoff {
    initial: Duration::from_millis(ERROR_BACKOFF_INITIAL_MILLIS),
    max: Duration::from_secs(ERROR_BACKOFF_MAX_SECS),
    jitter: JITTER,
};

/// Capped exponential schedule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    /// Fraction of each delay randomized in both directions
    pub jitter: f64,
}

impl Backoff {
    /// Delay before retry number `attempt` (starting at 0), without jitter.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.initial.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// [`Backoff::delay`] spread by the jitter factor.
    #[must_use]
    pub fn jittered(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt).as_secs_f64();
        if self.jitter <= 0.0 {
            return Duration::from_secs_f64(delay);
        }
        let spread = delay * self.jitter;
        let jittered = rand::rng().random_range((delay - spread)..=(delay + spread));
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Whether a Kubernetes error is worth retrying unchanged.
///
/// Conflicts (409), throttling (429), server errors (5xx) and connection failures are;
/// every other client error is not.
#[must_use]
pub fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(status) => {
            status.code == 409 || status.code == 429 || (500..600).contains(&status.code)
        }
        kube::Error::Service(_) | kube::Error::HyperError(_) => true,
        _ => false,
    }
}

/// Run a Kubernetes API call, retrying transient errors with [`API_CALL_BACKOFF`].
///
/// After [`API_CALL_ATTEMPTS`] attempts the last error is returned unchanged, so the
/// caller can still classify it. Non-retryable errors are returned immediately.
///
/// # Errors
///
/// Returns the error of the last attempt.
///
/// # Example
///
/// ```no_run
/// use kube::{Api, Client};
/// use kubewarden_controller::crd::PolicyServer;
/// use kubewarden_controller::reconcilers::retry::retry_api_call;
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = Client::try_default().await?;
/// let api: Api<PolicyServer> = Api::all(client);
/// let api = &api;
///
/// let server = retry_api_call(
///     || async move { api.get_opt("default").await },
///     "get PolicyServer default",
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_api_call<T, F, Fut>(mut operation: F, operation_name: &str) -> Result<T, kube::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, kube::Error>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation = operation_name, attempts = attempt + 1, "API call succeeded after retries");
                }
                return Ok(value);
            }
            Err(err) if is_retryable_error(&err) && attempt + 1 < API_CALL_ATTEMPTS => {
                let delay = API_CALL_BACKOFF.jittered(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    retry_after = ?delay,
                    error = %err,
                    "Transient Kubernetes API error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Key identifying one object in a [`RequeueBackoff`].
#[must_use]
pub fn backoff_key(kind: &str, namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(namespace) => format!("{kind}/{namespace}/{name}"),
        None => format!("{kind}/{name}"),
    }
}

/// Consecutive transient failures per object, driving the requeue delay.
#[derive(Debug, Default)]
pub struct RequeueBackoff {
    failures: Mutex<HashMap<String, u32>>,
}

impl RequeueBackoff {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before the next pass of `key` after it failed with `err`.
    ///
    /// Transient errors grow the delay exponentially; any other error is requeued after
    /// a fixed delay and leaves the failure count alone.
    pub fn after_error(&self, key: &str, err: &ReconcileError) -> Duration {
        if !err.is_transient() {
            return Duration::from_secs(ERROR_REQUEUE_DURATION_SECS);
        }
        let attempt = {
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            let count = failures.entry(key.to_string()).or_insert(0);
            let attempt = *count;
            *count = count.saturating_add(1);
            attempt
        };
        REQUEUE_BACKOFF.jittered(attempt)
    }

    /// Forget the failures of `key` after a successful pass.
    pub fn reset(&self, key: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Consecutive transient failures recorded for `key`.
    #[must_use]
    pub fn failures(&self, key: &str) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
