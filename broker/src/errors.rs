//! Error taxonomy for the randomness broker.
//!
//! Every failure a caller can observe maps to exactly one variant. Fatal
//! variants (`Unauthorized`, `InvalidQuantity`, `BudgetExceedsCeiling`,
//! `UnknownRequest`) are never retried by the broker; `RequestAlreadyPending`
//! and `ConsumerDeliveryFailed` are recoverable by the caller or an
//! administrator respectively.

use thiserror::Error;

/// Errors surfaced by broker operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Caller does not have permission for this action (unregistered or
    /// revoked consumer, or a non-administrator on the admin surface).
    #[error("caller is not permitted to perform this action")]
    Unauthorized,
    /// Requested quantity is outside the supported 1..=50 range. The caller
    /// must correct its input.
    #[error("requested quantity is outside the supported range")]
    InvalidQuantity,
    /// An unfulfilled commitment already exists for this (requester,
    /// consumer) pair. Wait for fulfillment or cancel before resubmitting.
    #[error("an unfulfilled request is already pending for this requester and consumer")]
    RequestAlreadyPending,
    /// The computed callback budget exceeds the global ceiling. Rejected at
    /// submit time so the request can never strand at fulfillment.
    #[error("computed callback budget exceeds the global ceiling")]
    BudgetExceedsCeiling,
    /// No pending request matches; spurious and duplicate callbacks are
    /// rejected with this, with no state touched.
    #[error("no matching pending request")]
    UnknownRequest,
    /// The provider has not delivered randomness for this request yet, so
    /// there is nothing to redeliver.
    #[error("request has not been fulfilled by the provider")]
    RequestNotFulfilled,
    /// The consumer's reveal endpoint failed. The commitment and pending
    /// request are retained so an administrator can retry delivery.
    #[error("consumer reveal delivery failed; request retained for retry")]
    ConsumerDeliveryFailed,
    /// The external provider rejected the forwarded request. The commitment
    /// opened during this submission has been rolled back.
    #[error("randomness provider rejected the request: {0}")]
    ProviderRejected(String),
    /// The external provider could not be reached. The commitment opened
    /// during this submission has been rolled back.
    #[error("randomness provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// A budget profile update specified a safety margin below the floor
    /// derived from observed production shortfalls.
    #[error("safety margin below the required floor")]
    MarginTooLow,
    /// No calibration row exists for this consumer category.
    #[error("no budget calibration for this consumer category")]
    CategoryNotCalibrated,
    /// The zero identity was supplied where a real identity is required.
    #[error("zero identity not allowed")]
    ZeroIdentityNotAllowed,
}
