//! Authorization registry and commitment ledger.
//!
//! Two of the broker's four flat maps live here. The registry tracks which
//! consumer identities may spend the shared subscription; the ledger
//! enforces the single-outstanding-request rule that makes commit-before-
//! reveal meaningful.

use std::collections::HashMap;

use crate::errors::BrokerError;
use crate::state::{Commitment, ConsumerRecord, Identity};

/// Tracks which consumers may submit requests against the shared
/// subscription.
#[derive(Debug, Default)]
pub struct AuthorizationRegistry {
    consumers: HashMap<Identity, ConsumerRecord>,
}

impl AuthorizationRegistry {
    /// Upsert a consumer record. Idempotent: re-registering an identity
    /// with the same record is a no-op, and flipping `authorized` leaves
    /// in-flight commitments untouched.
    pub fn authorize(&mut self, record: ConsumerRecord) {
        self.consumers.insert(record.identity, record);
    }

    /// Whether the consumer is currently allowed to submit requests.
    pub fn is_authorized(&self, consumer: &Identity) -> bool {
        self.consumers
            .get(consumer)
            .is_some_and(|record| record.authorized)
    }

    /// Look up the registration record for a consumer.
    ///
    /// Returns revoked records too: fulfillment of an in-flight request
    /// still needs the reveal endpoint after authorization is withdrawn.
    pub fn get(&self, consumer: &Identity) -> Option<&ConsumerRecord> {
        self.consumers.get(consumer)
    }

    /// Number of registered consumers (authorized or not).
    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    /// Whether no consumers are registered.
    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}

/// Per-(requester, consumer) record of outstanding commitments.
#[derive(Debug, Default)]
pub struct CommitmentLedger {
    commitments: HashMap<(Identity, Identity), Commitment>,
}

impl CommitmentLedger {
    /// Record a new commitment.
    ///
    /// Fails with [`BrokerError::RequestAlreadyPending`] if an unfulfilled
    /// commitment already exists for the pair; callers must wait for
    /// fulfillment or cancel the prior request first.
    pub fn open(&mut self, commitment: Commitment) -> Result<(), BrokerError> {
        let key = (commitment.requester, commitment.consumer);
        if self.commitments.contains_key(&key) {
            return Err(BrokerError::RequestAlreadyPending);
        }
        self.commitments.insert(key, commitment);
        Ok(())
    }

    /// Mark the pair's commitment fulfilled and clear it, freeing the pair
    /// for a new request. Called only by the fulfillment router.
    pub fn close(&mut self, requester: &Identity, consumer: &Identity) -> Option<Commitment> {
        let mut commitment = self.commitments.remove(&(*requester, *consumer))?;
        commitment.fulfilled = true;
        Some(commitment)
    }

    /// Remove a commitment without marking it fulfilled (rollback after a
    /// provider rejection, or an administrative force-cancel).
    pub fn remove(&mut self, requester: &Identity, consumer: &Identity) -> Option<Commitment> {
        self.commitments.remove(&(*requester, *consumer))
    }

    /// Read-only view of the pair's outstanding commitment, if any. Lets
    /// consumers self-diagnose a stuck state before retrying.
    pub fn peek(&self, requester: &Identity, consumer: &Identity) -> Option<&Commitment> {
        self.commitments.get(&(*requester, *consumer))
    }

    /// Number of open commitments across all pairs.
    pub fn len(&self) -> usize {
        self.commitments.len()
    }

    /// Whether no commitments are open.
    pub fn is_empty(&self) -> bool {
        self.commitments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConsumerCategory;

    fn identity(tag: u8) -> Identity {
        Identity([tag; 32])
    }

    fn commitment(requester: Identity, consumer: Identity, seq: u64) -> Commitment {
        Commitment {
            requester,
            consumer,
            commitment_hash: [0xCD; 32],
            quantity: 3,
            fulfilled: false,
            submitted_seq: seq,
        }
    }

    #[test]
    fn second_open_for_same_pair_fails_fast() {
        let mut ledger = CommitmentLedger::default();
        let (r, c) = (identity(1), identity(2));
        ledger.open(commitment(r, c, 0)).unwrap();
        assert_eq!(
            ledger.open(commitment(r, c, 1)),
            Err(BrokerError::RequestAlreadyPending)
        );
    }

    #[test]
    fn independent_pairs_do_not_interfere() {
        let mut ledger = CommitmentLedger::default();
        ledger.open(commitment(identity(1), identity(2), 0)).unwrap();
        ledger.open(commitment(identity(1), identity(3), 1)).unwrap();
        ledger.open(commitment(identity(4), identity(2), 2)).unwrap();
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn close_marks_fulfilled_and_frees_the_pair() {
        let mut ledger = CommitmentLedger::default();
        let (r, c) = (identity(1), identity(2));
        ledger.open(commitment(r, c, 0)).unwrap();
        let closed = ledger.close(&r, &c).unwrap();
        assert!(closed.fulfilled);
        assert!(ledger.peek(&r, &c).is_none());
        ledger.open(commitment(r, c, 1)).unwrap();
    }

    #[test]
    fn close_without_open_returns_none() {
        let mut ledger = CommitmentLedger::default();
        assert!(ledger.close(&identity(1), &identity(2)).is_none());
    }

    #[test]
    fn registry_authorization_is_idempotent_and_revocable() {
        let mut registry = AuthorizationRegistry::default();
        let consumer = identity(9);
        let record = ConsumerRecord {
            identity: consumer,
            category: ConsumerCategory::ItemMint,
            reveal_url: "http://minter.local/reveal".into(),
            authorized: true,
        };
        registry.authorize(record.clone());
        registry.authorize(record.clone());
        assert_eq!(registry.len(), 1);
        assert!(registry.is_authorized(&consumer));

        registry.authorize(ConsumerRecord {
            authorized: false,
            ..record
        });
        assert!(!registry.is_authorized(&consumer));
        assert!(registry.get(&consumer).is_some());
    }

    #[test]
    fn unregistered_consumer_is_not_authorized() {
        let registry = AuthorizationRegistry::default();
        assert!(!registry.is_authorized(&identity(5)));
    }
}
