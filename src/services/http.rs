use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::earnings::EarningsRequest;
use super::orders::OrderRequest;
use super::reconciliation::ReconcileRequest;
use super::settlement::SettlementRequest;
use super::transactions::TransactionServiceRequest;
use super::ServiceError;
use crate::models::payments::{PaymentNotification, CONFIRMED, SETTLEMENT_CURRENCY};

mod admin;
mod transactions;

pub struct AppChannels {
    pub order_channel: mpsc::Sender<OrderRequest>,
    pub reconcile_channel: mpsc::Sender<ReconcileRequest>,
    pub transaction_channel: mpsc::Sender<TransactionServiceRequest>,
    pub settlement_channel: mpsc::Sender<SettlementRequest>,
    pub earnings_channel: mpsc::Sender<EarningsRequest>,
}

#[derive(Clone)]
struct AppState {
    order_channel: mpsc::Sender<OrderRequest>,
    reconcile_channel: mpsc::Sender<ReconcileRequest>,
    transaction_channel: mpsc::Sender<TransactionServiceRequest>,
    settlement_channel: mpsc::Sender<SettlementRequest>,
    earnings_channel: mpsc::Sender<EarningsRequest>,
    callback_digest: Vec<u8>,
}

pub(crate) fn error_response(error: &ServiceError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match error {
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Unauthorized | ServiceError::AccountSuspended => StatusCode::FORBIDDEN,
        ServiceError::TimeWindowViolation(_)
        | ServiceError::BelowMinimum(_)
        | ServiceError::InsufficientBalance
        | ServiceError::DuplicatePendingRequest
        | ServiceError::CooldownActive => StatusCode::CONFLICT,
        ServiceError::InvalidState(_)
        | ServiceError::MissingSettlementFields
        | ServiceError::InvalidTransactionType => StatusCode::BAD_REQUEST,
        ServiceError::AllocationExhausted | ServiceError::ExternalService(_, _) => {
            StatusCode::BAD_GATEWAY
        }
        ServiceError::Store(_) | ServiceError::Communication(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (status, Json(json!({"description": error.to_string()})))
}

#[derive(Deserialize)]
struct WebhookQuery {
    secret: Option<String>,
}

/// Payment-network callback. Business rejections still answer 200 with an
/// `{ok: bool}` body so the upstream retries only on transport failures; the
/// shared secret is the one hard gate.
async fn handle_payment_webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    Json(body): Json<PaymentNotification>,
) -> impl IntoResponse {
    let provided = query.secret.unwrap_or_default();
    if Sha256::digest(provided.as_bytes()).as_slice() != state.callback_digest.as_slice() {
        log::warn!("Invalid payment webhook secret.");
        return (StatusCode::FORBIDDEN, Json(json!({"ok": false})));
    }

    if body.status != CONFIRMED {
        log::warn!("Payment notification is unconfirmed; ignoring.");
        return (StatusCode::OK, Json(json!({"ok": true})));
    }

    if body.currency.as_deref() != Some(SETTLEMENT_CURRENCY) {
        log::warn!("Only {} payments are accepted; ignoring.", SETTLEMENT_CURRENCY);
        return (StatusCode::OK, Json(json!({"ok": false})));
    }

    let (addr, txid, value) = match (body.addr, body.txid, body.value) {
        (Some(addr), Some(txid), Some(value)) if !addr.is_empty() && !txid.is_empty() => {
            (addr, txid, value)
        }
        _ => {
            log::warn!("Invalid payment webhook payload.");
            return (StatusCode::OK, Json(json!({"ok": false})));
        }
    };

    let (reconcile_tx, reconcile_rx) = oneshot::channel();
    let send_result = state
        .reconcile_channel
        .send(ReconcileRequest::PaymentConfirmed {
            value,
            txid,
            addr,
            response: reconcile_tx,
        })
        .await;

    if send_result.is_err() {
        return (StatusCode::OK, Json(json!({"ok": false})));
    }

    match reconcile_rx.await {
        Ok(Ok(accepted)) => (StatusCode::OK, Json(json!({"ok": accepted}))),
        Ok(Err(e)) => {
            log::error!("Reconciliation failed: {}", e);
            (StatusCode::OK, Json(json!({"ok": false})))
        }
        Err(_) => (StatusCode::OK, Json(json!({"ok": false}))),
    }
}

pub async fn start_http_server(
    channels: AppChannels,
    callback_secret: String,
    listen: &str,
) -> Result<(), anyhow::Error> {
    let app_state = AppState {
        order_channel: channels.order_channel,
        reconcile_channel: channels.reconcile_channel,
        transaction_channel: channels.transaction_channel,
        settlement_channel: channels.settlement_channel,
        earnings_channel: channels.earnings_channel,
        callback_digest: Sha256::digest(callback_secret.as_bytes()).to_vec(),
    };

    let app = Router::new()
        .route("/transaction/create", post(transactions::create_order))
        .route("/transaction/claim", post(transactions::claim_deposit))
        .route("/transaction/withdraw", post(transactions::withdraw))
        .route("/transaction", get(transactions::history))
        .route("/transaction/mine", post(transactions::mine))
        .route("/transaction/plan", post(transactions::purchase_tier))
        .route("/transaction/spin", post(transactions::spin))
        .route("/admin/transactions/{id}", patch(admin::settle))
        .route("/webhooks/payments", post(handle_payment_webhook))
        .route("/health", get(|| async { "OK" }))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(listen).await?;
    println!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
