//! Service configuration loaded from environment variables.
//!
//! Required: `ADMIN_IDENTITY`, plus `HMAC_SECRET` or `HMAC_SECRET_PATH`
//! when no `PROVIDER_URL` is set (built-in provider mode).
//! Optional: `PROVIDER_URL`, `HTTP_PORT`, `BUDGET_CEILING`, `PROVIDER_FEE`,
//!           `SUBSCRIPTION_BALANCE`, `MAX_RETRIES`,
//!           `INITIAL_RETRY_DELAY_MS`, `AUDIT_CAPACITY`

use anyhow::{Context, Result};

use crate::budget::DEFAULT_BUDGET_CEILING;
use crate::state::Identity;

/// How the broker reaches the external randomness subscription.
#[derive(Clone, Debug)]
pub enum ProviderMode {
    /// Built-in HMAC provider with a simulated subscription balance.
    Local,
    /// Remote subscription service reached over HTTP.
    Http {
        /// Base URL of the remote provider.
        endpoint: String,
    },
}

/// Broker service configuration.
#[derive(Clone)]
pub struct AppConfig {
    /// HTTP server port.
    pub http_port: u16,
    /// The one identity allowed on the administrative surface.
    pub admin: Identity,
    /// Provider selection: built-in or remote.
    pub provider: ProviderMode,
    /// Secret key for the built-in provider's HMAC randomness.
    pub hmac_secret: Vec<u8>,
    /// Flat fee the built-in provider debits per request.
    pub provider_fee: u64,
    /// Starting balance of the built-in provider's simulated subscription.
    pub subscription_balance: u64,
    /// Hard ceiling on any single callback budget.
    pub budget_ceiling: u64,
    /// Maximum consumer delivery attempts per fulfillment.
    pub max_retries: u32,
    /// Initial delivery retry delay in milliseconds.
    pub initial_retry_delay_ms: u64,
    /// Number of audit events retained in memory.
    pub audit_capacity: usize,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let admin: Identity = std::env::var("ADMIN_IDENTITY")
            .context("ADMIN_IDENTITY env var must be set")?
            .parse()
            .context("ADMIN_IDENTITY is not a valid base58 identity")?;

        let provider = match std::env::var("PROVIDER_URL") {
            Ok(endpoint) => ProviderMode::Http { endpoint },
            Err(_) => ProviderMode::Local,
        };

        let hmac_secret = match &provider {
            ProviderMode::Http { .. } => Vec::new(),
            ProviderMode::Local => match std::env::var("HMAC_SECRET") {
                Ok(secret) => secret.into_bytes(),
                Err(_) => {
                    let path = std::env::var("HMAC_SECRET_PATH").context(
                        "HMAC_SECRET or HMAC_SECRET_PATH must be set for the built-in provider",
                    )?;
                    let path = shellexpand::tilde(&path).to_string();
                    std::fs::read(&path)
                        .with_context(|| format!("failed to read HMAC secret from {path}"))?
                }
            },
        };

        let http_port = std::env::var("HTTP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let provider_fee = std::env::var("PROVIDER_FEE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(25_000);

        let subscription_balance = std::env::var("SUBSCRIPTION_BALANCE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10_000_000);

        let budget_ceiling = std::env::var("BUDGET_CEILING")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_BUDGET_CEILING);

        let max_retries = std::env::var("MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let initial_retry_delay_ms = std::env::var("INITIAL_RETRY_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(500);

        let audit_capacity = std::env::var("AUDIT_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1024);

        Ok(Self {
            http_port,
            admin,
            provider,
            hmac_secret,
            provider_fee,
            subscription_balance,
            budget_ceiling,
            max_retries,
            initial_retry_delay_ms,
            audit_capacity,
        })
    }
}
