//! Operational counters for the broker.
//!
//! All counters are backed by atomics for lock-free concurrent access.

use std::sync::atomic::{AtomicU64, Ordering};

/// Aggregated broker metrics.
///
/// Thread-safe via atomics; shared as `Arc<Metrics>` between the broker
/// core and the HTTP surface.
pub struct Metrics {
    /// Total requests accepted by `submit` (commitment opened).
    pub requests_received: AtomicU64,
    /// Requests fulfilled end to end (randomness delivered, commitment closed).
    pub requests_fulfilled: AtomicU64,
    /// Submissions rolled back because the provider rejected the request.
    pub requests_failed: AtomicU64,
    /// Commitments cleared through the administrative cancel path.
    pub requests_cancelled: AtomicU64,
    /// Consumer reveal deliveries that failed and were retained for retry.
    pub delivery_failures: AtomicU64,
    /// Administrative redelivery attempts.
    pub deliveries_retried: AtomicU64,
    /// Sum of submit-to-fulfillment latencies in milliseconds.
    pub fulfillment_latency_sum_ms: AtomicU64,
    /// Number of fulfillments contributing to the latency sum.
    pub fulfillment_count: AtomicU64,
}

impl Metrics {
    /// Create a new zeroed metrics instance.
    pub fn new() -> Self {
        Self {
            requests_received: AtomicU64::new(0),
            requests_fulfilled: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            requests_cancelled: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            deliveries_retried: AtomicU64::new(0),
            fulfillment_latency_sum_ms: AtomicU64::new(0),
            fulfillment_count: AtomicU64::new(0),
        }
    }

    /// Record an accepted submission.
    pub fn record_request(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed fulfillment with its latency.
    pub fn record_fulfillment(&self, latency_ms: u64) {
        self.requests_fulfilled.fetch_add(1, Ordering::Relaxed);
        self.fulfillment_latency_sum_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
        self.fulfillment_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a submission rolled back on provider rejection.
    pub fn record_failure(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an administrative cancel.
    pub fn record_cancel(&self) {
        self.requests_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed consumer delivery.
    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an administrative redelivery attempt.
    pub fn record_delivery_retry(&self) {
        self.deliveries_retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Average fulfillment latency in milliseconds, or 0 if none recorded.
    pub fn avg_latency_ms(&self) -> u64 {
        let count = self.fulfillment_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0;
        }
        self.fulfillment_latency_sum_ms.load(Ordering::Relaxed) / count
    }

    /// Serialize metrics as a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "requests_received": self.requests_received.load(Ordering::Relaxed),
            "requests_fulfilled": self.requests_fulfilled.load(Ordering::Relaxed),
            "requests_failed": self.requests_failed.load(Ordering::Relaxed),
            "requests_cancelled": self.requests_cancelled.load(Ordering::Relaxed),
            "delivery_failures": self.delivery_failures.load(Ordering::Relaxed),
            "deliveries_retried": self.deliveries_retried.load(Ordering::Relaxed),
            "avg_fulfillment_latency_ms": self.avg_latency_ms(),
            "fulfillment_count": self.fulfillment_count.load(Ordering::Relaxed),
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
