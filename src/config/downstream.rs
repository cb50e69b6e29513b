//! Downstream delivery, concurrency and expansion configuration.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Downstream content stores and the worker pool that feeds them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    /// Base URL of the draft content store. Unset disables draft delivery.
    pub draft_store_url: Option<String>,
    /// Base URL of the live content store. Unset disables live delivery.
    pub live_store_url: Option<String>,
    /// Number of delivery workers.
    pub workers: usize,
    /// Capacity of each priority queue.
    pub queue_capacity: usize,
    /// HTTP request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Retry policy for a single delivery.
    pub retry: DeliveryRetryConfig,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            draft_store_url: None,
            live_store_url: None,
            workers: 4,
            queue_capacity: 1024,
            request_timeout_ms: 10_000,
            retry: DeliveryRetryConfig::default(),
        }
    }
}

/// Exponential backoff for downstream deliveries.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryRetryConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Retries after the first attempt before the job is dead-lettered.
    pub max_times: usize,
}

impl Default for DeliveryRetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 100,
            max_delay_ms: 30_000,
            max_times: 5,
        }
    }
}

/// Optimistic lock retry policy for state-machine transitions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Retries after the first attempt before `Conflict` is surfaced.
    pub max_retries: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_delay_ms: 10,
            max_delay_ms: 200,
        }
    }
}

/// Expansion-relevant fields per document type, added to the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    pub fields: BTreeMap<String, Vec<String>>,
}
