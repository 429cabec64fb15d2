// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `retry.rs`

#[cfg(test)]
mod tests {
    use super::super::{
        backoff_key, is_retryable_error, retry_api_call, Backoff, RequeueBackoff,
        API_CALL_BACKOFF, REQUEUE_BACKOFF,
    };
    use crate::errors::ReconcileError;
    use kube::core::Status;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(
            Status::failure(&format!("{reason} error"), reason)
                .with_code(code)
                .boxed(),
        )
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let backoff = Backoff {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(300),
            jitter: 0.0,
        };
        assert_eq!(backoff.delay(0), Duration::from_secs(5));
        assert_eq!(backoff.delay(1), Duration::from_secs(10));
        assert_eq!(backoff.delay(3), Duration::from_secs(40));
        assert_eq!(backoff.delay(6), Duration::from_secs(300));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(300));
        assert_eq!(backoff.jittered(1), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        for attempt in 0..4 {
            let base = REQUEUE_BACKOFF.delay(attempt).as_secs_f64();
            let jittered = REQUEUE_BACKOFF.jittered(attempt).as_secs_f64();
            assert!(jittered >= base * 0.9 - 1e-9 && jittered <= base * 1.1 + 1e-9);
        }
        assert_eq!(API_CALL_BACKOFF.delay(0), Duration::from_millis(200));
        assert_eq!(API_CALL_BACKOFF.delay(10), Duration::from_secs(2));
    }

    #[test]
    fn test_conflict_throttling_and_server_errors_are_retryable() {
        for code in [409, 429, 500, 503, 599] {
            assert!(
                is_retryable_error(&api_error(code, "Transient")),
                "HTTP {code} should be retryable"
            );
        }
    }

    #[test]
    fn test_client_errors_not_retryable() {
        for code in [400, 401, 403, 404, 422] {
            assert!(
                !is_retryable_error(&api_error(code, "Client")),
                "HTTP {code} should not be retryable"
            );
        }
    }

    #[test]
    fn test_service_errors_retryable() {
        let service_error: Box<dyn std::error::Error + Send + Sync> = Box::new(
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "Connection failed"),
        );

        assert!(is_retryable_error(&kube::Error::Service(service_error)));
    }

    #[tokio::test]
    async fn test_retry_api_call_fails_fast_on_client_error() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), kube::Error> = retry_api_call(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(api_error(422, "Invalid")) }
            },
            "apply invalid object",
        )
        .await;

        assert!(matches!(result, Err(kube::Error::Api(status)) if status.code == 422));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_api_call_retries_conflicts() {
        let attempts = AtomicU32::new(0);

        let result = retry_api_call(
            || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(api_error(409, "Conflict"))
                    } else {
                        Ok(attempt)
                    }
                }
            },
            "apply with conflict",
        )
        .await
        .unwrap();

        assert_eq!(result, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_api_call_returns_last_transient_error() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), kube::Error> = retry_api_call(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(api_error(503, "ServiceUnavailable")) }
            },
            "get during outage",
        )
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        let err = ReconcileError::from(result.unwrap_err());
        assert!(err.is_transient());
    }

    #[test]
    fn test_requeue_backoff_grows_per_object_and_resets() {
        let backoff = RequeueBackoff::new();
        let key = backoff_key("AdmissionPolicy", Some("team-a"), "privileged");
        let other = backoff_key("PolicyServer", None, "default");
        assert_eq!(key, "AdmissionPolicy/team-a/privileged");
        assert_eq!(other, "PolicyServer/default");

        let transient = ReconcileError::from(api_error(503, "ServiceUnavailable"));
        let first = backoff.after_error(&key, &transient);
        let second = backoff.after_error(&key, &transient);
        let third = backoff.after_error(&key, &transient);
        assert!(first <= Duration::from_millis(5_500));
        assert!(second >= Duration::from_secs(9));
        assert!(third >= Duration::from_secs(18));
        assert_eq!(backoff.failures(&key), 3);
        assert_eq!(backoff.failures(&other), 0);

        backoff.reset(&key);
        assert_eq!(backoff.failures(&key), 0);
        assert!(backoff.after_error(&key, &transient) <= Duration::from_millis(5_500));
    }

    #[test]
    fn test_rejected_errors_requeue_at_fixed_delay() {
        let backoff = RequeueBackoff::new();
        let rejected = ReconcileError::from(api_error(422, "Invalid"));

        assert_eq!(backoff.after_error("k", &rejected), Duration::from_secs(30));
        assert_eq!(backoff.after_error("k", &rejected), Duration::from_secs(30));
        assert_eq!(backoff.failures("k"), 0);
    }
}
