//! Consumer reveal delivery.
//!
//! After fan-out, the fulfillment router hands the expanded sub-values to
//! the consumer's reveal entrypoint through the [`ConsumerTransport`] seam.
//! The HTTP implementation retries transient failures with exponential
//! backoff; a definitive consumer-side rejection is not retried here but
//! surfaced so the request stays available for administrative redelivery.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::state::{ConsumerRecord, Identity, b64_vec};

/// HTTP request timeout for reveal deliveries.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Ceiling for the exponential backoff delay between attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Payload delivered to a consumer's reveal entrypoint.
#[derive(Debug, Clone, Serialize)]
pub struct RevealDelivery {
    /// Request id the consumer recorded at submission time.
    pub request_id: u64,
    /// Requester the outcome belongs to.
    pub requester: Identity,
    /// The fanned-out sub-values, one per batched unit.
    #[serde(with = "b64_vec")]
    pub values: Vec<[u8; 32]>,
}

/// Delivery failures. Both leave the commitment open; the distinction is
/// logged so operators can tell a paused consumer from a broken one.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The consumer answered and refused the delivery (paused, bad state).
    #[error("consumer rejected delivery: {0}")]
    Rejected(String),
    /// The consumer could not be reached within the retry budget.
    #[error("consumer unreachable: {0}")]
    Unreachable(String),
}

/// The consumer-facing reveal primitive.
#[async_trait]
pub trait ConsumerTransport: Send + Sync {
    /// Deliver expanded randomness to the consumer's reveal endpoint.
    async fn deliver(
        &self,
        consumer: &ConsumerRecord,
        delivery: &RevealDelivery,
    ) -> Result<(), TransportError>;
}

/// HTTP reveal delivery with bounded exponential-backoff retries.
pub struct HttpConsumerTransport {
    http: reqwest::Client,
    max_retries: u32,
    initial_retry_delay: Duration,
}

impl HttpConsumerTransport {
    /// Transport retrying up to `max_retries` times, starting at
    /// `initial_retry_delay` and doubling per attempt.
    pub fn new(max_retries: u32, initial_retry_delay: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            max_retries: max_retries.max(1),
            initial_retry_delay,
        })
    }
}

#[async_trait]
impl ConsumerTransport for HttpConsumerTransport {
    async fn deliver(
        &self,
        consumer: &ConsumerRecord,
        delivery: &RevealDelivery,
    ) -> Result<(), TransportError> {
        let mut retry_delay = self.initial_retry_delay;
        let mut last_error = String::new();

        for attempt in 0..self.max_retries {
            match self
                .http
                .post(&consumer.reveal_url)
                .json(delivery)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) if response.status().is_client_error() => {
                    // Consumer answered and refused; retrying will not help.
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(TransportError::Rejected(format!("{status}: {body}")));
                }
                Ok(response) => last_error = format!("status {}", response.status()),
                Err(e) => last_error = e.to_string(),
            }

            if attempt + 1 < self.max_retries {
                warn!(
                    request_id = delivery.request_id,
                    consumer = %consumer.identity,
                    attempt = attempt + 1,
                    delay = ?retry_delay,
                    error = %last_error,
                    "reveal delivery failed, retrying"
                );
                tokio::time::sleep(retry_delay).await;
                retry_delay = retry_delay.saturating_mul(2).min(MAX_RETRY_DELAY);
            }
        }

        Err(TransportError::Unreachable(format!(
            "{} attempts exhausted: {last_error}",
            self.max_retries
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_payload_encodes_values_as_base64() {
        let delivery = RevealDelivery {
            request_id: 12,
            requester: Identity([1u8; 32]),
            values: vec![[0u8; 32], [255u8; 32]],
        };
        let value = serde_json::to_value(&delivery).unwrap();
        let values = value["values"].as_array().unwrap();
        assert_eq!(values.len(), 2);
        use base64::Engine as _;
        let last = base64::engine::general_purpose::STANDARD
            .decode(values[1].as_str().unwrap())
            .unwrap();
        assert_eq!(last, vec![255u8; 32]);
    }
}
