//! Deterministic fan-out of one delivered random value into many
//! independent sub-values.
//!
//! Batched requests ask the provider for exactly one base value; expansion
//! happens locally so provider cost stays flat in batch size. Each
//! sub-value is domain-separated by both the request id and its index, so
//! two requests fulfilled from related base values can never share outputs.

use sha2::{Digest, Sha256};

/// Expand base randomness into `quantity` sub-values:
/// `sub[i] = SHA256(randomness || request_id_le || i_le)`.
///
/// Deterministic and reproducible for auditing: the same inputs always
/// yield the same output array.
pub fn expand_randomness(randomness: &[u8; 32], request_id: u64, quantity: u32) -> Vec<[u8; 32]> {
    let mut values = Vec::with_capacity(quantity as usize);
    for i in 0..quantity {
        let mut hasher = Sha256::new();
        hasher.update(randomness);
        hasher.update(request_id.to_le_bytes());
        hasher.update(i.to_le_bytes());
        let hash = hasher.finalize();
        let mut value = [0u8; 32];
        value.copy_from_slice(&hash);
        values.push(value);
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn deterministic_for_same_inputs() {
        let base = [9u8; 32];
        let a = expand_randomness(&base, 7, 50);
        let b = expand_randomness(&base, 7, 50);
        assert_eq!(a, b);
    }

    #[test]
    fn produces_requested_quantity() {
        let base = [1u8; 32];
        assert_eq!(expand_randomness(&base, 0, 1).len(), 1);
        assert_eq!(expand_randomness(&base, 0, 50).len(), 50);
    }

    #[test]
    fn sub_values_pairwise_distinct() {
        let base = [42u8; 32];
        let values = expand_randomness(&base, 3, 50);
        let unique: HashSet<_> = values.iter().collect();
        assert_eq!(unique.len(), values.len());
    }

    #[test]
    fn different_request_ids_diverge() {
        let base = [5u8; 32];
        let a = expand_randomness(&base, 1, 10);
        let b = expand_randomness(&base, 2, 10);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_ne!(x, y);
        }
    }

    #[test]
    fn differs_from_base_value() {
        let base = [0xABu8; 32];
        for value in expand_randomness(&base, 11, 8) {
            assert_ne!(value, base);
        }
    }
}
