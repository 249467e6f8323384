use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::transactions::TransactionType;
use crate::repositories::mailer::MailerApi;
use crate::utils;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettlementDecision {
    Approved,
    Declined,
}

impl SettlementDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            SettlementDecision::Approved => "approved",
            SettlementDecision::Declined => "declined",
        }
    }
}

/// Outbound notification dispatch. Review notices are fire-and-forget; a
/// failed send is logged and never blocks the ledger path that produced it.
/// Settlement notices carry an ack so the settlement engine can refuse to
/// mutate anything without a confirmed send.
#[derive(Debug)]
pub enum NotifyRequest {
    Review {
        email: String,
        amount_micros: i64,
        transaction_id: String,
        tx_type: TransactionType,
    },
    SettlementStatus {
        email: String,
        amount_micros: i64,
        transaction_id: String,
        tx_type: TransactionType,
        decision: SettlementDecision,
        reason: String,
        ack: oneshot::Sender<Result<(), ServiceError>>,
    },
}

#[derive(Clone)]
pub struct NotifyRequestHandler {
    api: std::sync::Arc<MailerApi>,
}

impl NotifyRequestHandler {
    pub fn new(api: MailerApi) -> Self {
        NotifyRequestHandler {
            api: std::sync::Arc::new(api),
        }
    }
}

#[async_trait]
impl RequestHandler<NotifyRequest> for NotifyRequestHandler {
    async fn handle_request(&self, request: NotifyRequest) {
        match request {
            NotifyRequest::Review {
                email,
                amount_micros,
                transaction_id,
                tx_type,
            } => {
                if let Err(e) = self
                    .api
                    .send_review(&email, utils::to_display(amount_micros), &transaction_id, tx_type)
                    .await
                {
                    log::error!("Failed to send review notification to {}: {}", email, e);
                }
            }
            NotifyRequest::SettlementStatus {
                email,
                amount_micros,
                transaction_id,
                tx_type,
                decision,
                reason,
                ack,
            } => {
                let result = self
                    .api
                    .send_settlement_status(
                        &email,
                        utils::to_display(amount_micros),
                        &transaction_id,
                        tx_type,
                        decision.as_str(),
                        &reason,
                    )
                    .await
                    .map_err(|e| {
                        ServiceError::ExternalService("Mailer".to_string(), e.to_string())
                    });
                let _ = ack.send(result);
            }
        }
    }
}

pub struct NotifyService;

impl NotifyService {
    pub fn new() -> Self {
        NotifyService {}
    }
}

#[async_trait]
impl Service<NotifyRequest, NotifyRequestHandler> for NotifyService {}
