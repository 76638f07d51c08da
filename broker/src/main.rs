//! Broker service entry point.
//!
//! Runs two concurrent subsystems:
//!
//! - **Router** — drains provider fulfillments (in-process channel for the
//!   built-in provider) and drives reveal delivery.
//! - **HTTP server** — consumer submissions, provider callbacks, probes,
//!   and the administrative surface.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer, web};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use vrf_broker::broker::{Broker, BrokerOptions, run_router};
use vrf_broker::config::{AppConfig, ProviderMode};
use vrf_broker::http::{self, AppState};
use vrf_broker::metrics::Metrics;
use vrf_broker::provider::{HmacProvider, HttpProvider, RandomnessProvider};
use vrf_broker::transport::HttpConsumerTransport;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn")),
        )
        .with_target(true)
        .with_ansi(true)
        .init();

    let config = AppConfig::from_env().expect("invalid configuration");

    info!(
        admin = %config.admin,
        budget_ceiling = config.budget_ceiling,
        "Starting randomness broker"
    );

    let metrics = Arc::new(Metrics::new());
    let (callback_tx, callback_rx) = mpsc::channel(256);

    let mut local_provider = None;
    let provider: Arc<dyn RandomnessProvider> = match &config.provider {
        ProviderMode::Local => {
            info!(
                balance = config.subscription_balance,
                fee = config.provider_fee,
                "Using built-in provider"
            );
            let provider = Arc::new(HmacProvider::new(
                config.hmac_secret.clone(),
                config.provider_fee,
                config.subscription_balance,
                callback_tx,
            ));
            local_provider = Some(provider.clone());
            provider
        }
        ProviderMode::Http { endpoint } => {
            info!(endpoint = %endpoint, "Using remote provider");
            drop(callback_tx);
            Arc::new(HttpProvider::new(endpoint).expect("failed to build provider client"))
        }
    };

    let transport = Arc::new(
        HttpConsumerTransport::new(
            config.max_retries,
            Duration::from_millis(config.initial_retry_delay_ms),
        )
        .expect("failed to build consumer transport"),
    );

    let broker = Arc::new(Broker::new(
        provider,
        transport,
        metrics.clone(),
        BrokerOptions {
            admin: config.admin,
            budget_ceiling: config.budget_ceiling,
            audit_capacity: config.audit_capacity,
        },
    ));

    // Background: route built-in provider fulfillments to consumers. In
    // remote mode the sender side is already gone and the task exits at
    // once; callbacks then arrive through the HTTP endpoint.
    let router_broker = broker.clone();
    tokio::spawn(async move {
        run_router(router_broker, callback_rx).await;
    });

    let state = web::Data::new(AppState {
        broker,
        metrics,
        local_provider,
    });

    let bind_addr = ("0.0.0.0", config.http_port);
    info!(addr = %format!("{}:{}", bind_addr.0, bind_addr.1), "Starting HTTP server");

    HttpServer::new(move || App::new().app_data(state.clone()).configure(http::routes))
        .bind(bind_addr)?
        .run()
        .await
}
