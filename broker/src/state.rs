//! Core broker state: identities, consumer records, commitments, and
//! pending requests.
//!
//! All persisted state is held in four flat maps (authorization registry,
//! commitment ledger, pending-request map, gas budget profile); the types in
//! this module are the entries of those maps.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque 32-byte identity (address-equivalent) for requesters, consumers,
/// and the broker administrator.
///
/// Rendered as base58 in logs, HTTP payloads, and audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(pub [u8; 32]);

/// Error returned when parsing a base58 identity string fails.
#[derive(Debug, Error)]
#[error("invalid identity: {0}")]
pub struct ParseIdentityError(String);

impl Identity {
    /// The all-zero identity, rejected wherever an identity is registered.
    pub const ZERO: Identity = Identity([0u8; 32]);

    /// Whether this is the zero identity.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(&self.0).into_string())
    }
}

impl FromStr for Identity {
    type Err = ParseIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = bs58::decode(s)
            .into_vec()
            .map_err(|e| ParseIdentityError(format!("{s}: {e}")))?;
        let bytes: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| ParseIdentityError(format!("{s}: expected 32 bytes")))?;
        Ok(Identity(bytes))
    }
}

impl Serialize for Identity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Calibration class of a consumer, keying the gas budget profile.
///
/// Each class has its own measured fulfillment cost curve: minters batch
/// heavily with cheap per-item work, expeditions resolve multi-step
/// outcomes, and fusion burns inputs on top of minting output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsumerCategory {
    /// Batched item minters.
    ItemMint,
    /// Dungeon-expedition outcome resolvers.
    Expedition,
    /// Item-fusion altars.
    Fusion,
}

/// Authorization registry entry for one consumer.
///
/// Only identities with `authorized = true` may open commitments or receive
/// fulfillments. Records are added and flipped only by the administrator;
/// never created implicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerRecord {
    /// The consumer's identity.
    pub identity: Identity,
    /// Calibration class used by the gas budget calculator.
    pub category: ConsumerCategory,
    /// Endpoint the fulfillment router delivers expanded randomness to.
    pub reveal_url: String,
    /// Whether this consumer may currently spend the shared subscription.
    pub authorized: bool,
}

/// One outstanding randomness request for one requester within one consumer.
///
/// Invariant: at most one `Commitment` with `fulfilled = false` exists per
/// (requester, consumer) pair at any time. This is the anti-replay and
/// anti-double-mint guarantee; a second submission for the same pair fails
/// fast instead of queuing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commitment {
    /// The end user the request is on behalf of.
    pub requester: Identity,
    /// The consumer contract the request flows through.
    pub consumer: Identity,
    /// Caller-supplied hash binding intent before the outcome is known.
    #[serde(with = "b64")]
    pub commitment_hash: [u8; 32],
    /// Number of independent sub-values to fan the base value out into.
    pub quantity: u32,
    /// Set by the fulfillment router immediately before the entry is cleared.
    pub fulfilled: bool,
    /// Monotonic submission sequence number at creation time.
    pub submitted_seq: u64,
}

/// Maps a provider-issued request id to the commitment it will settle.
///
/// Created atomically with the outbound provider request; destroyed on
/// successful delivery or an explicit administrative cancel. The external
/// provider never mutates this record, it only triggers lookup by id.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Provider-issued request identifier.
    pub request_id: u64,
    /// Requester the eventual outcome belongs to.
    pub requester: Identity,
    /// Consumer whose reveal endpoint receives the fan-out.
    pub consumer: Identity,
    /// Commitment hash forwarded to the provider as seed material.
    pub commitment_hash: [u8; 32],
    /// Number of sub-values to derive at fulfillment time.
    pub quantity: u32,
    /// Callback resource budget reserved for this request.
    pub callback_budget: u64,
    /// Submission instant, for fulfillment latency metrics.
    pub submitted_at: Instant,
    /// Base randomness retained after the provider callback, so consumer-side
    /// delivery failures can be retried without a second provider round trip.
    pub randomness: Option<[u8; 32]>,
    /// Number of failed delivery attempts so far.
    pub delivery_attempts: u32,
}

/// Serde adapter encoding `[u8; 32]` fields as base64 strings.
pub mod b64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize 32 bytes as a base64 string.
    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    /// Deserialize a base64 string into exactly 32 bytes.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(deserializer)?;
        let raw = STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)?;
        raw.as_slice()
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 base64-encoded bytes"))
    }
}

/// Serde adapter encoding `Vec<[u8; 32]>` as an array of base64 strings.
pub mod b64_vec {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize each 32-byte element as a base64 string.
    pub fn serialize<S: Serializer>(
        values: &[[u8; 32]],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&STANDARD.encode(value))?;
        }
        seq.end()
    }

    /// Deserialize an array of base64 strings into 32-byte elements.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<[u8; 32]>, D::Error> {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|text| {
                let raw = STANDARD
                    .decode(text.as_bytes())
                    .map_err(serde::de::Error::custom)?;
                raw.as_slice()
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("expected 32 base64-encoded bytes"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_round_trips_through_base58() {
        let identity = Identity([7u8; 32]);
        let text = identity.to_string();
        let parsed: Identity = text.parse().unwrap();
        assert_eq!(identity, parsed);
    }

    #[test]
    fn identity_rejects_wrong_length() {
        let short = bs58::encode(&[1u8; 16]).into_string();
        assert!(short.parse::<Identity>().is_err());
    }

    #[test]
    fn identity_rejects_invalid_alphabet() {
        assert!("not-base58-0OIl".parse::<Identity>().is_err());
    }

    #[test]
    fn zero_identity_detected() {
        assert!(Identity::ZERO.is_zero());
        assert!(!Identity([9u8; 32]).is_zero());
    }

    #[test]
    fn commitment_hash_serializes_as_base64() {
        let commitment = Commitment {
            requester: Identity([1u8; 32]),
            consumer: Identity([2u8; 32]),
            commitment_hash: [3u8; 32],
            quantity: 5,
            fulfilled: false,
            submitted_seq: 42,
        };
        let value = serde_json::to_value(&commitment).unwrap();
        let encoded = value["commitment_hash"].as_str().unwrap();
        use base64::Engine as _;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(decoded, vec![3u8; 32]);
    }
}
