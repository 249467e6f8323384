use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tokio::sync::oneshot;

use crate::models::transactions::SettleRequest;
use crate::services::settlement::SettlementRequest;

use super::error_response;

pub async fn settle(
    State(state): State<super::AppState>,
    Path(transaction_id): Path<String>,
    Json(update): Json<SettleRequest>,
) -> impl IntoResponse {
    let (settle_tx, settle_rx) = oneshot::channel();

    let send_result = state
        .settlement_channel
        .send(SettlementRequest::Settle {
            transaction_id,
            update,
            response: settle_tx,
        })
        .await;
    if let Err(e) = send_result {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"description": format!("Failed to process request: {}", e)})),
        );
    }

    match settle_rx.await {
        Ok(Ok(transaction)) => (StatusCode::OK, Json(json!(transaction))),
        Ok(Err(service_error)) => error_response(&service_error),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"description": format!("Failed to receive response: {}", e)})),
        ),
    }
}
