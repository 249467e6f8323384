use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::oneshot;

use crate::models::orders::{ClaimDeposit, NewOrder};
use crate::models::transactions::WithdrawRequest;
use crate::services::earnings::EarningsRequest;
use crate::services::orders::OrderRequest;
use crate::services::transactions::TransactionServiceRequest;

use super::error_response;

#[derive(Serialize)]
struct OrderResponse {
    id: String,
    address: String,
    display_amount: f64,
    atomic_amount: i64,
    expires_at: chrono::DateTime<chrono::Utc>,
}

pub async fn create_order(
    State(state): State<super::AppState>,
    Json(req): Json<NewOrder>,
) -> impl IntoResponse {
    let (order_tx, order_rx) = oneshot::channel();

    let send_result = state
        .order_channel
        .send(OrderRequest::CreateOrder {
            email: req.email,
            amount: req.amount,
            response: order_tx,
        })
        .await;
    if let Err(e) = send_result {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"description": format!("Failed to process request: {}", e)})),
        );
    }

    match order_rx.await {
        Ok(Ok(order)) => {
            let response = OrderResponse {
                id: order.id,
                address: order.address,
                display_amount: order.display_amount,
                atomic_amount: order.atomic_amount,
                expires_at: order.expires_at,
            };
            (StatusCode::CREATED, Json(json!(response)))
        }
        Ok(Err(service_error)) => error_response(&service_error),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"description": format!("Failed to receive response: {}", e)})),
        ),
    }
}

pub async fn claim_deposit(
    State(state): State<super::AppState>,
    Json(req): Json<ClaimDeposit>,
) -> impl IntoResponse {
    let (claim_tx, claim_rx) = oneshot::channel();

    let send_result = state
        .transaction_channel
        .send(TransactionServiceRequest::ClaimDeposit {
            email: req.email,
            order_id: req.order_id,
            response: claim_tx,
        })
        .await;
    if let Err(e) = send_result {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"description": format!("Failed to process request: {}", e)})),
        );
    }

    match claim_rx.await {
        Ok(Ok(transaction)) => (StatusCode::CREATED, Json(json!(transaction))),
        Ok(Err(service_error)) => error_response(&service_error),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"description": format!("Failed to receive response: {}", e)})),
        ),
    }
}

pub async fn withdraw(
    State(state): State<super::AppState>,
    Json(req): Json<WithdrawRequest>,
) -> impl IntoResponse {
    let (withdraw_tx, withdraw_rx) = oneshot::channel();

    let send_result = state
        .transaction_channel
        .send(TransactionServiceRequest::Withdraw {
            email: req.email,
            wallet_address: req.wallet_address,
            amount: req.amount,
            response: withdraw_tx,
        })
        .await;
    if let Err(e) = send_result {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"description": format!("Failed to process request: {}", e)})),
        );
    }

    match withdraw_rx.await {
        Ok(Ok(transaction)) => (StatusCode::CREATED, Json(json!(transaction))),
        Ok(Err(service_error)) => error_response(&service_error),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"description": format!("Failed to receive response: {}", e)})),
        ),
    }
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    email: String,
    limit: Option<i64>,
    page: Option<i64>,
}

pub async fn history(
    State(state): State<super::AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let (history_tx, history_rx) = oneshot::channel();

    let send_result = state
        .transaction_channel
        .send(TransactionServiceRequest::History {
            email: query.email,
            limit: query.limit.unwrap_or(50),
            page: query.page.unwrap_or(1),
            response: history_tx,
        })
        .await;
    if let Err(e) = send_result {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"description": format!("Failed to process request: {}", e)})),
        );
    }

    match history_rx.await {
        Ok(Ok(page)) => (StatusCode::OK, Json(json!(page))),
        Ok(Err(service_error)) => error_response(&service_error),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"description": format!("Failed to receive response: {}", e)})),
        ),
    }
}

#[derive(Deserialize)]
pub struct EarningBody {
    email: String,
    amount: f64,
}

#[derive(Deserialize)]
pub struct SpinBody {
    email: String,
}

async fn earnings_round_trip(
    state: &super::AppState,
    request: impl FnOnce(oneshot::Sender<Result<f64, crate::services::ServiceError>>) -> EarningsRequest,
) -> (StatusCode, Json<serde_json::Value>) {
    let (earnings_tx, earnings_rx) = oneshot::channel();

    if let Err(e) = state.earnings_channel.send(request(earnings_tx)).await {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"description": format!("Failed to process request: {}", e)})),
        );
    }

    match earnings_rx.await {
        Ok(Ok(balance)) => (StatusCode::OK, Json(json!({"balance": balance}))),
        Ok(Err(service_error)) => error_response(&service_error),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"description": format!("Failed to receive response: {}", e)})),
        ),
    }
}

pub async fn mine(
    State(state): State<super::AppState>,
    Json(req): Json<EarningBody>,
) -> impl IntoResponse {
    earnings_round_trip(&state, |response| EarningsRequest::AccrueYield {
        email: req.email,
        amount: req.amount,
        response,
    })
    .await
}

pub async fn purchase_tier(
    State(state): State<super::AppState>,
    Json(req): Json<EarningBody>,
) -> impl IntoResponse {
    earnings_round_trip(&state, |response| EarningsRequest::PurchaseTier {
        email: req.email,
        amount: req.amount,
        response,
    })
    .await
}

pub async fn spin(
    State(state): State<super::AppState>,
    Json(req): Json<SpinBody>,
) -> impl IntoResponse {
    earnings_round_trip(&state, |response| EarningsRequest::SpinReward {
        email: req.email,
        response,
    })
    .await
}
