//! Retry utilities: backoff builders.
//!
//! Uses `backon` for exponential backoff with jitter. Provides backoff
//! configurations for optimistic lock conflicts and downstream deliveries.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::config::{ConcurrencyConfig, DeliveryRetryConfig};

/// Backoff for state-machine transitions that lost an optimistic lock race.
///
/// Defaults: 10ms to 200ms, 3 retries, jitter enabled.
pub fn conflict_backoff(config: &ConcurrencyConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(config.min_delay_ms))
        .with_max_delay(Duration::from_millis(config.max_delay_ms))
        .with_max_times(config.max_retries)
        .with_jitter()
}

/// Backoff for downstream deliveries that failed transiently.
///
/// Defaults: 100ms to 30s, 5 retries, jitter enabled.
pub fn delivery_backoff(config: &DeliveryRetryConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(config.min_delay_ms))
        .with_max_delay(Duration::from_millis(config.max_delay_ms))
        .with_max_times(config.max_times)
        .with_jitter()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use backon::Retryable;

    use super::*;

    #[tokio::test]
    async fn test_conflict_backoff_stops_after_max_retries() {
        let config = ConcurrencyConfig {
            max_retries: 3,
            min_delay_ms: 1,
            max_delay_ms: 2,
        };
        let attempts = AtomicUsize::new(0);

        let result = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("conflict")
        })
        .retry(conflict_backoff(&config))
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_delivery_backoff_retries_until_success() {
        let config = DeliveryRetryConfig {
            min_delay_ms: 1,
            max_delay_ms: 2,
            max_times: 5,
        };
        let attempts = AtomicUsize::new(0);

        let result = (|| async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("unreachable")
            } else {
                Ok(7)
            }
        })
        .retry(delivery_backoff(&config))
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
