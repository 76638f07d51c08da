//! Shared verifiable-randomness broker.
//!
//! Multiple independent game consumers (item minters, a dungeon-expedition
//! resolver, an item-fusion altar) obtain unbiased randomness from one
//! external subscription through this broker, which:
//!
//! - authorizes which consumers may spend the shared subscription,
//! - binds every request to a commitment hash before the outcome is known,
//! - sizes the callback resource budget per request from a measured,
//!   versioned cost table so fulfillment never fails for lack of budget,
//! - fans one delivered random value out into up to 50 independent
//!   per-item sub-values.
//!
//! ## Request lifecycle
//!
//! 1. **Submit** — an authorized consumer opens a commitment; the broker
//!    computes the callback budget and forwards a single one-word request
//!    to the provider. Provider rejection rolls the commitment back.
//! 2. **Fulfill** — the provider calls back with the base random value;
//!    the broker expands it and delivers the sub-values to the consumer's
//!    reveal entrypoint, then closes the commitment.
//! 3. **Recover** — a failed reveal delivery keeps the commitment open for
//!    administrative redelivery; a provider that never calls back is
//!    cleared through the audited force-cancel path.

pub mod broker;
pub mod budget;
pub mod config;
pub mod errors;
pub mod events;
pub mod fanout;
pub mod http;
pub mod ledger;
pub mod metrics;
pub mod provider;
pub mod state;
pub mod transport;

pub use broker::{Broker, BrokerOptions, StatusSnapshot, run_router};
pub use budget::{BudgetEntry, GasBudgetProfile, MAX_QUANTITY, MIN_QUANTITY};
pub use errors::BrokerError;
pub use state::{Commitment, ConsumerCategory, ConsumerRecord, Identity};
