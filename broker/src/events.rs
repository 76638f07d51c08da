//! Audit events for the broker's request lifecycle.
//!
//! Every state transition that matters for incident analysis is recorded in
//! a bounded in-memory trail and emitted as a structured tracing event under
//! the `audit` target. Force-cancellation is a distinct event from normal
//! fulfillment so stuck-request incidents are observable after the fact.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::info;

use crate::state::{ConsumerCategory, Identity};

/// One recorded lifecycle transition.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A request was accepted and forwarded to the provider.
    RandomnessRequested {
        request_id: u64,
        requester: Identity,
        consumer: Identity,
        quantity: u32,
        callback_budget: u64,
        submitted_seq: u64,
    },
    /// The provider called back and the consumer reveal was delivered.
    RandomnessFulfilled {
        request_id: u64,
        consumer: Identity,
        quantity: u32,
        latency_ms: u64,
    },
    /// The consumer reveal endpoint failed; the commitment stays open.
    DeliveryFailed {
        request_id: u64,
        consumer: Identity,
        attempts: u32,
    },
    /// An administrator re-ran delivery from retained randomness.
    DeliveryRetried { request_id: u64, consumer: Identity },
    /// An administrator cleared a stuck commitment.
    RequestForceCancelled {
        request_id: Option<u64>,
        requester: Identity,
        consumer: Identity,
    },
    /// A consumer registration was added or its allow-flag changed.
    ConsumerAuthorized {
        consumer: Identity,
        category: ConsumerCategory,
        allowed: bool,
    },
    /// The gas budget profile was recalibrated.
    BudgetProfileUpdated {
        category: ConsumerCategory,
        base_cost: u64,
        per_unit_cost: u64,
        margin_percent: u64,
        version: u64,
    },
}

/// Bounded in-memory audit trail, newest last.
#[derive(Debug)]
pub struct AuditTrail {
    events: VecDeque<AuditEvent>,
    capacity: usize,
}

impl AuditTrail {
    /// Trail retaining at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Record an event, evicting the oldest entry when at capacity.
    pub fn record(&mut self, event: AuditEvent) {
        info!(target: "audit", event = ?event, "audit");
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Snapshot of the retained events, oldest first.
    pub fn snapshot(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trail_evicts_oldest_at_capacity() {
        let mut trail = AuditTrail::new(2);
        for request_id in 0..3 {
            trail.record(AuditEvent::DeliveryRetried {
                request_id,
                consumer: Identity([1u8; 32]),
            });
        }
        let snapshot = trail.snapshot();
        assert_eq!(snapshot.len(), 2);
        match &snapshot[0] {
            AuditEvent::DeliveryRetried { request_id, .. } => assert_eq!(*request_id, 1),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = AuditEvent::RequestForceCancelled {
            request_id: Some(4),
            requester: Identity([2u8; 32]),
            consumer: Identity([3u8; 32]),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "request_force_cancelled");
        assert_eq!(value["request_id"], 4);
    }
}
