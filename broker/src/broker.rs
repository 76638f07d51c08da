//! The broker core: request dispatcher and fulfillment router over the
//! four flat state maps.
//!
//! The broker is reactive. It has exactly two non-administrative entry
//! points — [`Broker::submit`] and [`Broker::on_fulfilled`] — and between a
//! submission and its callback the system is suspended with respect to that
//! request; the provider alone triggers resumption. All validation happens
//! synchronously inside `submit`, before any external call, so failures
//! never strand state. The one async gap that can leave state unresolved
//! (a provider that never calls back) is covered by the audited
//! [`Broker::force_cancel`] escape hatch, not by a timeout guess.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};

use crate::budget::{BudgetEntry, GasBudgetProfile};
use crate::errors::BrokerError;
use crate::events::{AuditEvent, AuditTrail};
use crate::fanout::expand_randomness;
use crate::ledger::{AuthorizationRegistry, CommitmentLedger};
use crate::metrics::Metrics;
use crate::provider::{FulfillmentEvent, ProviderError, RandomnessProvider, RandomnessRequest};
use crate::state::{Commitment, ConsumerCategory, ConsumerRecord, Identity, PendingRequest};
use crate::transport::{ConsumerTransport, RevealDelivery};

/// Construction-time broker parameters.
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    /// The one identity allowed on the administrative surface.
    pub admin: Identity,
    /// Hard ceiling on any single callback budget; submissions whose
    /// computed budget exceeds it are rejected before any state changes.
    pub budget_ceiling: u64,
    /// Number of audit events retained in memory.
    pub audit_capacity: usize,
}

/// Point-in-time operational snapshot for the status probe.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusSnapshot {
    /// Commitments currently open across all (requester, consumer) pairs.
    pub open_commitments: usize,
    /// Requests forwarded to the provider and not yet settled.
    pub pending_requests: usize,
    /// Registered consumers, authorized or revoked.
    pub registered_consumers: usize,
    /// Current gas budget profile version.
    pub profile_version: u64,
}

/// Everything behind the one lock: the four flat maps plus the audit trail
/// and the submission sequence counter.
struct CoreState {
    registry: AuthorizationRegistry,
    ledger: CommitmentLedger,
    pending: HashMap<u64, PendingRequest>,
    profile: GasBudgetProfile,
    audit: AuditTrail,
    submission_seq: u64,
}

/// Shared verifiable-randomness broker.
///
/// Holds no funds itself; the provider's prepaid subscription is the one
/// shared mutable resource, and the budget ceiling plus authorization
/// registry bound how much of it any consumer can draw per request.
pub struct Broker {
    state: Mutex<CoreState>,
    provider: Arc<dyn RandomnessProvider>,
    transport: Arc<dyn ConsumerTransport>,
    metrics: Arc<Metrics>,
    admin: Identity,
    budget_ceiling: u64,
}

impl Broker {
    /// Build a broker over the given provider and consumer transport.
    pub fn new(
        provider: Arc<dyn RandomnessProvider>,
        transport: Arc<dyn ConsumerTransport>,
        metrics: Arc<Metrics>,
        options: BrokerOptions,
    ) -> Self {
        Self {
            state: Mutex::new(CoreState {
                registry: AuthorizationRegistry::default(),
                ledger: CommitmentLedger::default(),
                pending: HashMap::new(),
                profile: GasBudgetProfile::calibrated(),
                audit: AuditTrail::new(options.audit_capacity),
                submission_seq: 0,
            }),
            provider,
            transport,
            metrics,
            admin: options.admin,
            budget_ceiling: options.budget_ceiling,
        }
    }

    fn ensure_admin(&self, caller: &Identity) -> Result<(), BrokerError> {
        if *caller == self.admin {
            Ok(())
        } else {
            Err(BrokerError::Unauthorized)
        }
    }

    /// Submit a randomness request on behalf of `requester` through
    /// `consumer`.
    ///
    /// Validation order: authorization, quantity, budget against the
    /// ceiling — all before the commitment is opened or the provider is
    /// called. If the provider rejects the forwarded request, the
    /// commitment opened here is rolled back so the requester can retry.
    ///
    /// The state lock is held across the provider call: a second
    /// submission for the same pair can never interleave past the ledger
    /// check, it fails fast with [`BrokerError::RequestAlreadyPending`].
    pub async fn submit(
        &self,
        requester: Identity,
        consumer: Identity,
        commitment_hash: [u8; 32],
        quantity: u32,
    ) -> Result<u64, BrokerError> {
        let mut state = self.state.lock().await;

        let record = match state.registry.get(&consumer) {
            Some(record) if record.authorized => record.clone(),
            _ => return Err(BrokerError::Unauthorized),
        };

        let callback_budget = state.profile.calculate(record.category, quantity)?;
        if callback_budget > self.budget_ceiling {
            return Err(BrokerError::BudgetExceedsCeiling);
        }

        let submitted_seq = state.submission_seq;
        state.submission_seq += 1;

        state.ledger.open(Commitment {
            requester,
            consumer,
            commitment_hash,
            quantity,
            fulfilled: false,
            submitted_seq,
        })?;
        self.metrics.record_request();

        let outbound = RandomnessRequest {
            consumer,
            seed: commitment_hash,
            num_words: 1,
            callback_budget,
        };
        match self.provider.request_randomness(&outbound).await {
            Ok(request_id) => {
                state.pending.insert(
                    request_id,
                    PendingRequest {
                        request_id,
                        requester,
                        consumer,
                        commitment_hash,
                        quantity,
                        callback_budget,
                        submitted_at: Instant::now(),
                        randomness: None,
                        delivery_attempts: 0,
                    },
                );
                state.audit.record(AuditEvent::RandomnessRequested {
                    request_id,
                    requester,
                    consumer,
                    quantity,
                    callback_budget,
                    submitted_seq,
                });
                info!(
                    request_id,
                    requester = %requester,
                    consumer = %consumer,
                    quantity,
                    callback_budget,
                    "randomness request forwarded"
                );
                Ok(request_id)
            }
            Err(e) => {
                // A rejected forward must not leave the commitment dangling.
                state.ledger.remove(&requester, &consumer);
                self.metrics.record_failure();
                warn!(
                    requester = %requester,
                    consumer = %consumer,
                    error = %e,
                    "provider refused request, commitment rolled back"
                );
                Err(match e {
                    ProviderError::Rejected(message) => BrokerError::ProviderRejected(message),
                    ProviderError::Unreachable(message) => {
                        BrokerError::ProviderUnavailable(message)
                    }
                })
            }
        }
    }

    /// Provider callback path. Fails closed on unknown or duplicate
    /// request ids without touching any state.
    pub async fn on_fulfilled(
        &self,
        request_id: u64,
        randomness: [u8; 32],
    ) -> Result<(), BrokerError> {
        {
            let mut state = self.state.lock().await;
            let Some(pending) = state.pending.get_mut(&request_id) else {
                warn!(request_id, "callback for unknown request, ignoring");
                return Err(BrokerError::UnknownRequest);
            };
            if pending.randomness.is_some() {
                warn!(request_id, "duplicate callback, ignoring");
                return Err(BrokerError::UnknownRequest);
            }
            pending.randomness = Some(randomness);
        }

        self.deliver_pending(request_id).await
    }

    /// Re-run consumer delivery from the randomness retained on a pending
    /// request whose earlier delivery failed. Administrator-only.
    pub async fn retry_delivery(
        &self,
        caller: Identity,
        request_id: u64,
    ) -> Result<(), BrokerError> {
        self.ensure_admin(&caller)?;

        {
            let mut state = self.state.lock().await;
            let Some(pending) = state.pending.get(&request_id) else {
                return Err(BrokerError::UnknownRequest);
            };
            if pending.randomness.is_none() {
                // Provider-side failure: there is no value to redeliver.
                return Err(BrokerError::RequestNotFulfilled);
            }
            let consumer = pending.consumer;
            state
                .audit
                .record(AuditEvent::DeliveryRetried { request_id, consumer });
        }
        self.metrics.record_delivery_retry();

        self.deliver_pending(request_id).await
    }

    /// Fan out the retained randomness and deliver it to the consumer's
    /// reveal entrypoint, closing the commitment on success.
    ///
    /// Runs the delivery itself outside the state lock; the re-acquire
    /// afterwards tolerates a concurrent force-cancel having cleared the
    /// request.
    async fn deliver_pending(&self, request_id: u64) -> Result<(), BrokerError> {
        let (pending, record, randomness) = {
            let mut state = self.state.lock().await;
            let Some(pending) = state.pending.get(&request_id) else {
                return Err(BrokerError::UnknownRequest);
            };
            let Some(randomness) = pending.randomness else {
                return Err(BrokerError::RequestNotFulfilled);
            };
            // Revoked registrations still carry the reveal endpoint for
            // in-flight requests; only a fully missing record blocks delivery.
            let Some(record) = state.registry.get(&pending.consumer).cloned() else {
                let consumer = pending.consumer;
                let attempts = {
                    let pending = state
                        .pending
                        .get_mut(&request_id)
                        .ok_or(BrokerError::UnknownRequest)?;
                    pending.delivery_attempts += 1;
                    pending.delivery_attempts
                };
                state.audit.record(AuditEvent::DeliveryFailed {
                    request_id,
                    consumer,
                    attempts,
                });
                self.metrics.record_delivery_failure();
                error!(
                    request_id,
                    consumer = %consumer,
                    "consumer registration missing at delivery time"
                );
                return Err(BrokerError::ConsumerDeliveryFailed);
            };
            (pending.clone(), record, randomness)
        };

        let values = expand_randomness(&randomness, request_id, pending.quantity);
        let delivery = RevealDelivery {
            request_id,
            requester: pending.requester,
            values,
        };

        match self.transport.deliver(&record, &delivery).await {
            Ok(()) => {
                let mut state = self.state.lock().await;
                let Some(settled) = state.pending.remove(&request_id) else {
                    warn!(request_id, "request cancelled while delivery was in flight");
                    return Ok(());
                };
                state
                    .ledger
                    .close(&settled.requester, &settled.consumer);
                let latency_ms = settled.submitted_at.elapsed().as_millis() as u64;
                state.audit.record(AuditEvent::RandomnessFulfilled {
                    request_id,
                    consumer: settled.consumer,
                    quantity: settled.quantity,
                    latency_ms,
                });
                self.metrics.record_fulfillment(latency_ms);
                info!(
                    request_id,
                    consumer = %settled.consumer,
                    quantity = settled.quantity,
                    latency_ms,
                    "randomness delivered and commitment closed"
                );
                Ok(())
            }
            Err(e) => {
                let mut state = self.state.lock().await;
                let attempts = match state.pending.get_mut(&request_id) {
                    Some(pending) => {
                        pending.delivery_attempts += 1;
                        pending.delivery_attempts
                    }
                    None => 0,
                };
                state.audit.record(AuditEvent::DeliveryFailed {
                    request_id,
                    consumer: pending.consumer,
                    attempts,
                });
                self.metrics.record_delivery_failure();
                error!(
                    request_id,
                    consumer = %pending.consumer,
                    attempts,
                    error = %e,
                    "reveal delivery failed, commitment retained for retry"
                );
                Err(BrokerError::ConsumerDeliveryFailed)
            }
        }
    }

    /// Read-only view of the outstanding commitment for a pair, if any.
    pub async fn peek(&self, requester: Identity, consumer: Identity) -> Option<Commitment> {
        let state = self.state.lock().await;
        state.ledger.peek(&requester, &consumer).cloned()
    }

    /// Whether the consumer may currently submit requests.
    pub async fn is_authorized(&self, consumer: Identity) -> bool {
        let state = self.state.lock().await;
        state.registry.is_authorized(&consumer)
    }

    /// Register a consumer or flip its allow-flag. Administrator-only,
    /// idempotent, no effect on in-flight commitments.
    pub async fn authorize(
        &self,
        caller: Identity,
        record: ConsumerRecord,
    ) -> Result<(), BrokerError> {
        self.ensure_admin(&caller)?;
        if record.identity.is_zero() {
            return Err(BrokerError::ZeroIdentityNotAllowed);
        }

        let mut state = self.state.lock().await;
        let event = AuditEvent::ConsumerAuthorized {
            consumer: record.identity,
            category: record.category,
            allowed: record.authorized,
        };
        info!(
            consumer = %record.identity,
            category = ?record.category,
            allowed = record.authorized,
            "consumer authorization updated"
        );
        state.registry.authorize(record);
        state.audit.record(event);
        Ok(())
    }

    /// Recalibrate one row of the gas budget profile. Administrator-only;
    /// returns the new profile version.
    pub async fn update_budget_profile(
        &self,
        caller: Identity,
        category: ConsumerCategory,
        entry: BudgetEntry,
    ) -> Result<u64, BrokerError> {
        self.ensure_admin(&caller)?;

        let mut state = self.state.lock().await;
        let version = state.profile.update(category, entry)?;
        state.audit.record(AuditEvent::BudgetProfileUpdated {
            category,
            base_cost: entry.base_cost,
            per_unit_cost: entry.per_unit_cost,
            margin_percent: entry.margin_percent,
            version,
        });
        info!(
            category = ?category,
            base_cost = entry.base_cost,
            per_unit_cost = entry.per_unit_cost,
            margin_percent = entry.margin_percent,
            version,
            "gas budget profile recalibrated"
        );
        Ok(version)
    }

    /// Clear a permanently stuck commitment and its pending request.
    /// Administrator-only; recorded as a distinct audit event so stuck-
    /// request incidents remain observable.
    pub async fn force_cancel(
        &self,
        caller: Identity,
        requester: Identity,
        consumer: Identity,
    ) -> Result<(), BrokerError> {
        self.ensure_admin(&caller)?;

        let mut state = self.state.lock().await;
        if state.ledger.remove(&requester, &consumer).is_none() {
            return Err(BrokerError::UnknownRequest);
        }
        let request_id = state
            .pending
            .iter()
            .find(|(_, p)| p.requester == requester && p.consumer == consumer)
            .map(|(id, _)| *id);
        if let Some(id) = request_id {
            state.pending.remove(&id);
        }
        state.audit.record(AuditEvent::RequestForceCancelled {
            request_id,
            requester,
            consumer,
        });
        self.metrics.record_cancel();
        warn!(
            requester = %requester,
            consumer = %consumer,
            request_id = ?request_id,
            "commitment force-cancelled"
        );
        Ok(())
    }

    /// Snapshot of the retained audit trail. Administrator-only.
    pub async fn audit_snapshot(&self, caller: Identity) -> Result<Vec<AuditEvent>, BrokerError> {
        self.ensure_admin(&caller)?;
        let state = self.state.lock().await;
        Ok(state.audit.snapshot())
    }

    /// Operational snapshot for the status probe.
    pub async fn status(&self) -> StatusSnapshot {
        let state = self.state.lock().await;
        StatusSnapshot {
            open_commitments: state.ledger.len(),
            pending_requests: state.pending.len(),
            registered_consumers: state.registry.len(),
            profile_version: state.profile.version(),
        }
    }
}

/// Drain provider fulfillments from the callback channel into the broker.
///
/// Runs as a spawned background task for the built-in provider; remote
/// providers reach the broker through the HTTP fulfillment endpoint
/// instead.
pub async fn run_router(broker: Arc<Broker>, mut rx: mpsc::Receiver<FulfillmentEvent>) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = broker.on_fulfilled(event.request_id, event.randomness).await {
            warn!(
                request_id = event.request_id,
                error = %e,
                "fulfillment routing failed"
            );
        }
    }
    info!("fulfillment channel closed, router stopping");
}
