//! HTTP surface: consumer submissions, provider callbacks, diagnostics,
//! and the administrative endpoints.

use std::sync::Arc;

use actix_web::{HttpResponse, web};
use serde::Deserialize;

use crate::broker::Broker;
use crate::budget::BudgetEntry;
use crate::errors::BrokerError;
use crate::metrics::Metrics;
use crate::provider::HmacProvider;
use crate::state::{ConsumerCategory, ConsumerRecord, Identity, b64};

/// Shared application state accessible from HTTP handlers.
pub struct AppState {
    /// The broker core.
    pub broker: Arc<Broker>,
    /// Operational counters.
    pub metrics: Arc<Metrics>,
    /// Present in built-in provider mode, for balance reporting.
    pub local_provider: Option<Arc<HmacProvider>>,
}

/// Map a broker error to an HTTP response with a machine-readable code.
fn error_response(error: &BrokerError) -> HttpResponse {
    let (mut response, code) = match error {
        BrokerError::Unauthorized => (HttpResponse::Forbidden(), "unauthorized"),
        BrokerError::InvalidQuantity => (HttpResponse::BadRequest(), "invalid_quantity"),
        BrokerError::RequestAlreadyPending => {
            (HttpResponse::Conflict(), "request_already_pending")
        }
        BrokerError::BudgetExceedsCeiling => {
            (HttpResponse::BadRequest(), "budget_exceeds_ceiling")
        }
        BrokerError::UnknownRequest => (HttpResponse::NotFound(), "unknown_request"),
        BrokerError::RequestNotFulfilled => (HttpResponse::Conflict(), "request_not_fulfilled"),
        BrokerError::ConsumerDeliveryFailed => {
            (HttpResponse::BadGateway(), "consumer_delivery_failed")
        }
        BrokerError::ProviderRejected(_) => (HttpResponse::BadGateway(), "provider_rejected"),
        BrokerError::ProviderUnavailable(_) => {
            (HttpResponse::BadGateway(), "provider_unavailable")
        }
        BrokerError::MarginTooLow => (HttpResponse::BadRequest(), "margin_too_low"),
        BrokerError::CategoryNotCalibrated => {
            (HttpResponse::BadRequest(), "category_not_calibrated")
        }
        BrokerError::ZeroIdentityNotAllowed => (HttpResponse::BadRequest(), "zero_identity"),
    };
    response.json(serde_json::json!({
        "error": code,
        "message": error.to_string(),
    }))
}

/// Liveness probe.
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}

/// Readiness / status probe.
async fn status(data: web::Data<AppState>) -> HttpResponse {
    let snapshot = data.broker.status().await;
    let balance = data.local_provider.as_ref().map(|p| p.balance());
    HttpResponse::Ok().json(serde_json::json!({
        "status": "running",
        "open_commitments": snapshot.open_commitments,
        "pending_requests": snapshot.pending_requests,
        "registered_consumers": snapshot.registered_consumers,
        "profile_version": snapshot.profile_version,
        "subscription_balance": balance,
    }))
}

/// Metrics snapshot.
async fn metrics(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.metrics.to_json())
}

#[derive(Deserialize)]
struct SubmitBody {
    requester: Identity,
    consumer: Identity,
    #[serde(with = "b64")]
    commitment_hash: [u8; 32],
    quantity: u32,
}

async fn submit(data: web::Data<AppState>, body: web::Json<SubmitBody>) -> HttpResponse {
    let body = body.into_inner();
    match data
        .broker
        .submit(body.requester, body.consumer, body.commitment_hash, body.quantity)
        .await
    {
        Ok(request_id) => HttpResponse::Ok().json(serde_json::json!({"request_id": request_id})),
        Err(e) => error_response(&e),
    }
}

async fn peek(data: web::Data<AppState>, path: web::Path<(String, String)>) -> HttpResponse {
    let (requester, consumer) = path.into_inner();
    let (Ok(requester), Ok(consumer)) =
        (requester.parse::<Identity>(), consumer.parse::<Identity>())
    else {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "invalid_identity",
            "message": "path identities must be base58-encoded 32-byte values",
        }));
    };
    let commitment = data.broker.peek(requester, consumer).await;
    HttpResponse::Ok().json(serde_json::json!({"commitment": commitment}))
}

#[derive(Deserialize)]
struct FulfillmentBody {
    request_id: u64,
    #[serde(with = "b64")]
    randomness: [u8; 32],
}

async fn fulfillment(data: web::Data<AppState>, body: web::Json<FulfillmentBody>) -> HttpResponse {
    let body = body.into_inner();
    match data.broker.on_fulfilled(body.request_id, body.randomness).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({"status": "fulfilled"})),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
struct AuthorizeBody {
    caller: Identity,
    consumer: Identity,
    category: ConsumerCategory,
    reveal_url: String,
    allowed: bool,
}

async fn authorize(data: web::Data<AppState>, body: web::Json<AuthorizeBody>) -> HttpResponse {
    let body = body.into_inner();
    let record = ConsumerRecord {
        identity: body.consumer,
        category: body.category,
        reveal_url: body.reveal_url,
        authorized: body.allowed,
    };
    match data.broker.authorize(body.caller, record).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({"status": "updated"})),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
struct BudgetBody {
    caller: Identity,
    category: ConsumerCategory,
    #[serde(flatten)]
    entry: BudgetEntry,
}

async fn update_budget(data: web::Data<AppState>, body: web::Json<BudgetBody>) -> HttpResponse {
    let body = body.into_inner();
    match data
        .broker
        .update_budget_profile(body.caller, body.category, body.entry)
        .await
    {
        Ok(version) => HttpResponse::Ok().json(serde_json::json!({"version": version})),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
struct CancelBody {
    caller: Identity,
    requester: Identity,
    consumer: Identity,
}

async fn force_cancel(data: web::Data<AppState>, body: web::Json<CancelBody>) -> HttpResponse {
    let body = body.into_inner();
    match data
        .broker
        .force_cancel(body.caller, body.requester, body.consumer)
        .await
    {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({"status": "cancelled"})),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
struct RedeliverBody {
    caller: Identity,
    request_id: u64,
}

async fn redeliver(data: web::Data<AppState>, body: web::Json<RedeliverBody>) -> HttpResponse {
    let body = body.into_inner();
    match data.broker.retry_delivery(body.caller, body.request_id).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({"status": "delivered"})),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
struct AuditQuery {
    caller: Identity,
}

async fn audit(data: web::Data<AppState>, query: web::Query<AuditQuery>) -> HttpResponse {
    match data.broker.audit_snapshot(query.caller).await {
        Ok(events) => HttpResponse::Ok().json(serde_json::json!({"events": events})),
        Err(e) => error_response(&e),
    }
}

/// Wire up the full route table.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/status", web::get().to(status))
        .route("/metrics", web::get().to(metrics))
        .route("/v1/requests", web::post().to(submit))
        .route("/v1/requests/{requester}/{consumer}", web::get().to(peek))
        .route("/v1/fulfillments", web::post().to(fulfillment))
        .route("/v1/admin/consumers", web::post().to(authorize))
        .route("/v1/admin/budget", web::post().to(update_budget))
        .route("/v1/admin/cancel", web::post().to(force_cancel))
        .route("/v1/admin/redeliver", web::post().to(redeliver))
        .route("/v1/admin/audit", web::get().to(audit));
}
