//! Shared test doubles: a scripted provider and a recording consumer
//! transport.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use vrf_broker::broker::{Broker, BrokerOptions};
use vrf_broker::budget::DEFAULT_BUDGET_CEILING;
use vrf_broker::metrics::Metrics;
use vrf_broker::provider::{ProviderError, RandomnessProvider, RandomnessRequest};
use vrf_broker::state::{ConsumerCategory, ConsumerRecord, Identity};
use vrf_broker::transport::{ConsumerTransport, RevealDelivery, TransportError};

/// The administrator identity used across tests.
pub const ADMIN: Identity = Identity([0xAA; 32]);

pub fn identity(tag: u8) -> Identity {
    Identity([tag; 32])
}

/// Provider double issuing sequential ids, optionally rejecting every
/// request, and recording the last forwarded request for assertions.
pub struct ScriptedProvider {
    counter: AtomicU64,
    rejecting: Mutex<bool>,
    pub last_request: Mutex<Option<RandomnessRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            counter: AtomicU64::new(0),
            rejecting: Mutex::new(false),
            last_request: Mutex::new(None),
        })
    }

    pub fn set_rejecting(&self, rejecting: bool) {
        *self.rejecting.lock().unwrap() = rejecting;
    }
}

#[async_trait]
impl RandomnessProvider for ScriptedProvider {
    async fn request_randomness(&self, request: &RandomnessRequest) -> Result<u64, ProviderError> {
        *self.last_request.lock().unwrap() = Some(request.clone());
        if *self.rejecting.lock().unwrap() {
            return Err(ProviderError::Rejected(
                "insufficient subscription balance".into(),
            ));
        }
        Ok(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Transport double recording deliveries, optionally failing the next N.
pub struct RecordingTransport {
    pub deliveries: Mutex<Vec<(Identity, RevealDelivery)>>,
    fail_remaining: AtomicU64,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            deliveries: Mutex::new(Vec::new()),
            fail_remaining: AtomicU64::new(0),
        })
    }

    pub fn fail_next(&self, count: u64) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    pub fn delivery_count(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }
}

#[async_trait]
impl ConsumerTransport for RecordingTransport {
    async fn deliver(
        &self,
        consumer: &ConsumerRecord,
        delivery: &RevealDelivery,
    ) -> Result<(), TransportError> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Unreachable("consumer paused".into()));
        }
        self.deliveries
            .lock()
            .unwrap()
            .push((consumer.identity, delivery.clone()));
        Ok(())
    }
}

/// Broker wired to the given doubles, with a handle on its metrics.
pub fn broker_pair(
    provider: Arc<dyn RandomnessProvider>,
    transport: Arc<dyn ConsumerTransport>,
) -> (Arc<Broker>, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new());
    let broker = Arc::new(Broker::new(
        provider,
        transport,
        metrics.clone(),
        BrokerOptions {
            admin: ADMIN,
            budget_ceiling: DEFAULT_BUDGET_CEILING,
            audit_capacity: 64,
        },
    ));
    (broker, metrics)
}

/// Register and authorize a consumer under the given category.
pub async fn register(broker: &Broker, consumer: Identity, category: ConsumerCategory) {
    broker
        .authorize(
            ADMIN,
            ConsumerRecord {
                identity: consumer,
                category,
                reveal_url: "http://consumer.local/reveal".into(),
                authorized: true,
            },
        )
        .await
        .unwrap();
}
