//! External randomness provider seam.
//!
//! The broker forwards exactly one-word requests through the
//! [`RandomnessProvider`] trait and receives fulfillments asynchronously —
//! either over the in-process callback channel (built-in provider) or
//! through the HTTP fulfillment endpoint (remote provider). Two
//! implementations ship:
//!
//! - [`HmacProvider`] — development/test provider computing HMAC-SHA256
//!   randomness keyed by a configured secret, with a simulated prepaid
//!   subscription balance.
//! - [`HttpProvider`] — JSON client for a remote subscription service.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::state::Identity;

type HmacSha256 = Hmac<Sha256>;

/// HTTP request timeout for remote provider calls.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// One outbound randomness request.
///
/// `num_words` is always 1: fan-out happens locally in the broker, so
/// provider cost stays flat regardless of batch quantity.
#[derive(Debug, Clone)]
pub struct RandomnessRequest {
    /// Consumer identity presented to the provider as the spender.
    pub consumer: Identity,
    /// Commitment hash, forwarded as caller-bound seed material.
    pub seed: [u8; 32],
    /// Number of base random values requested. Always 1.
    pub num_words: u32,
    /// Callback resource budget reserved for fulfillment.
    pub callback_budget: u64,
}

/// Provider-side failures, distinguished so the dispatcher can log the
/// cause; both roll back the commitment opened during submission.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider refused the request (insufficient prepaid balance,
    /// provider-level authorization failure, malformed request).
    #[error("rejected: {0}")]
    Rejected(String),
    /// The provider could not be reached or answered unintelligibly.
    #[error("unreachable: {0}")]
    Unreachable(String),
}

/// The downstream request primitive of the shared subscription.
#[async_trait]
pub trait RandomnessProvider: Send + Sync {
    /// Forward one randomness request; returns the provider-issued
    /// request id the eventual callback will reference.
    async fn request_randomness(&self, request: &RandomnessRequest) -> Result<u64, ProviderError>;
}

/// A fulfillment pushed by the provider toward the broker's router.
#[derive(Debug, Clone)]
pub struct FulfillmentEvent {
    /// Id issued at request time.
    pub request_id: u64,
    /// The single delivered base random value.
    pub randomness: [u8; 32],
}

/// Compute a deterministic 32-byte random output for a request.
///
/// ```text
/// output = HMAC-SHA256(secret, seed || request_id_le)
/// ```
///
/// The caller-provided `seed` (the commitment hash) prevents the provider
/// from pre-computing outputs; `request_id` ensures uniqueness across
/// requests sharing a seed.
pub fn compute_randomness(secret: &[u8], seed: &[u8; 32], request_id: u64) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any size");

    mac.update(seed);
    mac.update(&request_id.to_le_bytes());

    let result = mac.finalize();
    let bytes = result.into_bytes();

    let mut output = [0u8; 32];
    output.copy_from_slice(&bytes);
    output
}

/// Built-in development/test provider.
///
/// Issues monotonically increasing request ids, debits a flat fee per
/// request from a simulated shared prepaid balance, and pushes the
/// fulfillment over an mpsc channel that the service's router task drains.
pub struct HmacProvider {
    secret: Vec<u8>,
    fee: u64,
    balance: AtomicU64,
    request_counter: AtomicU64,
    callback_tx: mpsc::Sender<FulfillmentEvent>,
}

impl HmacProvider {
    /// Provider with the given secret, per-request fee, and starting
    /// subscription balance.
    pub fn new(
        secret: Vec<u8>,
        fee: u64,
        initial_balance: u64,
        callback_tx: mpsc::Sender<FulfillmentEvent>,
    ) -> Self {
        Self {
            secret,
            fee,
            balance: AtomicU64::new(initial_balance),
            request_counter: AtomicU64::new(0),
            callback_tx,
        }
    }

    /// Top up the simulated subscription balance.
    pub fn fund(&self, amount: u64) {
        self.balance.fetch_add(amount, Ordering::Relaxed);
    }

    /// Current simulated subscription balance.
    pub fn balance(&self) -> u64 {
        self.balance.load(Ordering::Relaxed)
    }

    /// Debit one request fee, failing when the balance cannot cover it.
    fn debit_fee(&self) -> Result<(), ProviderError> {
        loop {
            let current = self.balance.load(Ordering::Acquire);
            if current < self.fee {
                return Err(ProviderError::Rejected(
                    "insufficient subscription balance".into(),
                ));
            }
            if self
                .balance
                .compare_exchange(
                    current,
                    current - self.fee,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl RandomnessProvider for HmacProvider {
    async fn request_randomness(&self, request: &RandomnessRequest) -> Result<u64, ProviderError> {
        self.debit_fee()?;

        let request_id = self.request_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let randomness = compute_randomness(&self.secret, &request.seed, request_id);

        debug!(
            request_id,
            consumer = %request.consumer,
            callback_budget = request.callback_budget,
            "local provider issued request"
        );

        if self
            .callback_tx
            .send(FulfillmentEvent {
                request_id,
                randomness,
            })
            .await
            .is_err()
        {
            // Router gone; refund so the balance stays truthful.
            self.balance.fetch_add(self.fee, Ordering::Relaxed);
            return Err(ProviderError::Unreachable(
                "fulfillment channel closed".into(),
            ));
        }

        Ok(request_id)
    }
}

#[derive(Serialize)]
struct RemoteRequestBody {
    consumer: String,
    seed: String,
    num_words: u32,
    callback_budget: u64,
}

#[derive(Deserialize, Debug)]
struct RemoteRequestResponse {
    request_id: Option<u64>,
    error: Option<String>,
}

/// JSON client for a remote subscription service.
///
/// The remote provider is expected to answer `POST {endpoint}/requests`
/// with `{"request_id": <u64>}` and later invoke the broker's fulfillment
/// endpoint with the base random value.
#[derive(Clone)]
pub struct HttpProvider {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpProvider {
    /// Client for the provider at `endpoint`.
    pub fn new(endpoint: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl RandomnessProvider for HttpProvider {
    async fn request_randomness(&self, request: &RandomnessRequest) -> Result<u64, ProviderError> {
        let body = RemoteRequestBody {
            consumer: request.consumer.to_string(),
            seed: base64::engine::general_purpose::STANDARD.encode(request.seed),
            num_words: request.num_words,
            callback_budget: request.callback_budget,
        };

        let response = self
            .http
            .post(format!("{}/requests", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;

        let status = response.status();
        let parsed: RemoteRequestResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unreachable(format!("malformed response: {e}")))?;

        if let Some(message) = parsed.error {
            return Err(ProviderError::Rejected(message));
        }
        match parsed.request_id {
            Some(request_id) if status.is_success() => Ok(request_id),
            _ => Err(ProviderError::Rejected(format!(
                "provider answered {status} without a request id"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn randomness_deterministic_for_same_inputs() {
        let secret = b"test-secret";
        let seed = [1u8; 32];

        let r1 = compute_randomness(secret, &seed, 0);
        let r2 = compute_randomness(secret, &seed, 0);
        assert_eq!(r1, r2);
    }

    #[test]
    fn randomness_differs_for_different_ids() {
        let secret = b"test-secret";
        let seed = [1u8; 32];

        let r1 = compute_randomness(secret, &seed, 0);
        let r2 = compute_randomness(secret, &seed, 1);
        assert_ne!(r1, r2);
    }

    #[test]
    fn randomness_differs_for_different_seeds() {
        let secret = b"test-secret";

        let r1 = compute_randomness(secret, &[1u8; 32], 0);
        let r2 = compute_randomness(secret, &[2u8; 32], 0);
        assert_ne!(r1, r2);
    }

    fn request() -> RandomnessRequest {
        RandomnessRequest {
            consumer: Identity([4u8; 32]),
            seed: [9u8; 32],
            num_words: 1,
            callback_budget: 250_000,
        }
    }

    #[tokio::test]
    async fn local_provider_issues_sequential_ids_and_debits_fee() {
        let (tx, mut rx) = mpsc::channel(8);
        let provider = HmacProvider::new(b"secret".to_vec(), 1_000, 2_500, tx);

        assert_eq!(provider.request_randomness(&request()).await.unwrap(), 1);
        assert_eq!(provider.request_randomness(&request()).await.unwrap(), 2);
        assert_eq!(provider.balance(), 500);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.request_id, 1);
        assert_eq!(
            first.randomness,
            compute_randomness(b"secret", &[9u8; 32], 1)
        );
    }

    #[tokio::test]
    async fn local_provider_rejects_when_balance_exhausted() {
        let (tx, _rx) = mpsc::channel(8);
        let provider = HmacProvider::new(b"secret".to_vec(), 1_000, 999, tx);

        let error = provider.request_randomness(&request()).await.unwrap_err();
        assert!(matches!(error, ProviderError::Rejected(_)));
        assert_eq!(provider.balance(), 999);

        provider.fund(1);
        assert!(provider.request_randomness(&request()).await.is_ok());
        assert_eq!(provider.balance(), 0);
    }
}
