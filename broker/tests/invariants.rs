//! Property tests: the single-outstanding-commitment invariant under
//! randomized operation interleavings, and fan-out statistics.

mod common;

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;

use common::{ADMIN, RecordingTransport, ScriptedProvider, broker_pair, identity, register};
use vrf_broker::errors::BrokerError;
use vrf_broker::fanout::expand_randomness;
use vrf_broker::state::ConsumerCategory;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Drive random interleavings of submit / fulfill / force-cancel over
    /// two requesters and two consumers, checking after every step that the
    /// broker's view matches a model allowing at most one open commitment
    /// per (requester, consumer) pair.
    #[test]
    fn at_most_one_outstanding_commitment_per_pair(
        ops in prop::collection::vec((0u8..3, 0usize..2, 0usize..2, 0u32..60u32), 1..40)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let provider = ScriptedProvider::new();
            let transport = RecordingTransport::new();
            let (broker, _metrics) = broker_pair(provider, transport);

            let requesters = [identity(10), identity(11)];
            let consumers = [identity(20), identity(21)];
            for consumer in consumers {
                register(&broker, consumer, ConsumerCategory::ItemMint).await;
            }

            // Model: pair -> outstanding request id.
            let mut open: HashMap<(usize, usize), u64> = HashMap::new();

            for (kind, r, c, quantity) in ops {
                match kind {
                    0 => {
                        let result = broker
                            .submit(requesters[r], consumers[c], [quantity as u8; 32], quantity)
                            .await;
                        let quantity_valid = (1..=50).contains(&quantity);
                        match result {
                            Ok(request_id) => {
                                prop_assert!(quantity_valid);
                                prop_assert!(!open.contains_key(&(r, c)));
                                open.insert((r, c), request_id);
                            }
                            Err(BrokerError::InvalidQuantity) => prop_assert!(!quantity_valid),
                            Err(BrokerError::RequestAlreadyPending) => {
                                prop_assert!(open.contains_key(&(r, c)));
                            }
                            Err(other) => prop_assert!(false, "unexpected error {other:?}"),
                        }
                    }
                    1 => match open.remove(&(r, c)) {
                        Some(request_id) => {
                            broker.on_fulfilled(request_id, [0x55; 32]).await.unwrap();
                        }
                        None => {
                            prop_assert_eq!(
                                broker.on_fulfilled(999_999, [0x55; 32]).await,
                                Err(BrokerError::UnknownRequest)
                            );
                        }
                    },
                    _ => {
                        let result = broker
                            .force_cancel(ADMIN, requesters[r], consumers[c])
                            .await;
                        match open.remove(&(r, c)) {
                            Some(_) => prop_assert!(result.is_ok()),
                            None => prop_assert_eq!(result, Err(BrokerError::UnknownRequest)),
                        }
                    }
                }

                for (ri, requester) in requesters.iter().enumerate() {
                    for (ci, consumer) in consumers.iter().enumerate() {
                        let commitment = broker.peek(*requester, *consumer).await;
                        prop_assert_eq!(
                            commitment.is_some(),
                            open.contains_key(&(ri, ci)),
                            "ledger and model disagree for pair ({}, {})", ri, ci
                        );
                        if let Some(commitment) = commitment {
                            prop_assert!(!commitment.fulfilled);
                        }
                    }
                }
            }
            Ok(())
        })?;
    }

    /// Fan-out is a pure function: identical inputs always produce
    /// identical output arrays.
    #[test]
    fn fan_out_is_deterministic(
        base in prop::array::uniform32(any::<u8>()),
        request_id in any::<u64>(),
        quantity in 1u32..=50,
    ) {
        let first = expand_randomness(&base, request_id, quantity);
        let second = expand_randomness(&base, request_id, quantity);
        prop_assert_eq!(first, second);
    }
}

/// Statistical independence check: over many random base values, batch
/// sub-values never collide with each other.
#[test]
fn fan_out_sub_values_distinct_over_random_bases() {
    use rand::RngCore;

    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let mut base = [0u8; 32];
        rng.fill_bytes(&mut base);
        let request_id = rng.next_u64();
        let values = expand_randomness(&base, request_id, 32);
        let unique: HashSet<_> = values.iter().collect();
        assert_eq!(unique.len(), values.len());
    }
}
