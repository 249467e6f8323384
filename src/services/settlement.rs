use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::crew::{CrewRequest, RollupKind};
use super::notify::{NotifyRequest, SettlementDecision};
use super::{RequestHandler, Service, ServiceError};
use crate::models::transactions::{
    BalanceAction, SettleRequest, Transaction, TransactionStatus, TransactionType,
};
use crate::models::users::User;
use crate::repositories::admin::AdminStore;
use crate::repositories::transactions::TransactionStore;
use crate::repositories::users::UserStore;
use crate::utils;

pub enum SettlementRequest {
    Settle {
        transaction_id: String,
        update: SettleRequest,
        response: oneshot::Sender<Result<Transaction, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct SettlementRequestHandler {
    users: Arc<dyn UserStore>,
    transactions: Arc<dyn TransactionStore>,
    admin: Arc<dyn AdminStore>,
    crew_channel: mpsc::Sender<CrewRequest>,
    notify_channel: mpsc::Sender<NotifyRequest>,
}

impl SettlementRequestHandler {
    pub fn new(
        users: Arc<dyn UserStore>,
        transactions: Arc<dyn TransactionStore>,
        admin: Arc<dyn AdminStore>,
        crew_channel: mpsc::Sender<CrewRequest>,
        notify_channel: mpsc::Sender<NotifyRequest>,
    ) -> Self {
        SettlementRequestHandler {
            users,
            transactions,
            admin,
            crew_channel,
            notify_channel,
        }
    }

    /// Operator approval/decline of a pending transaction. The settlement
    /// notice must be confirmed sent before anything mutates, so an aborted
    /// settlement is always safe to retry.
    pub async fn settle(
        &self,
        transaction_id: &str,
        update: SettleRequest,
    ) -> Result<Transaction, ServiceError> {
        let transaction = self
            .transactions
            .get_for_owner(transaction_id, &update.email)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Transaction".to_string()))?;

        let user = self
            .users
            .get_by_email(&update.email)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;

        if transaction.status != TransactionStatus::Pending {
            return Err(ServiceError::InvalidState(
                "Only pending transactions can be updated".to_string(),
            ));
        }

        if let Some(image) = &update.image {
            self.transactions.set_image(&transaction.id, image).await?;
        }

        match update.status {
            TransactionStatus::Failed => self.decline(&transaction).await,
            TransactionStatus::Completed => self.approve(&transaction, &user, &update).await,
            TransactionStatus::Pending => Err(ServiceError::InvalidState(
                "A settlement must complete or fail the transaction".to_string(),
            )),
        }
    }

    async fn decline(&self, transaction: &Transaction) -> Result<Transaction, ServiceError> {
        self.confirm_settlement_notice(
            transaction,
            SettlementDecision::Declined,
            transaction.amount_micros,
            "The transaction was not approved.",
        )
        .await?;

        // The conditional transition guards the refund: a concurrent
        // settlement of the same transaction can release the reservation at
        // most once.
        if !self.transactions.fail_if_pending(&transaction.id).await? {
            return Err(ServiceError::InvalidState(
                "Only pending transactions can be updated".to_string(),
            ));
        }

        if transaction.tx_type == TransactionType::Withdrawal {
            self.users
                .credit_balance(&transaction.email, transaction.amount_micros)
                .await?;
        }

        self.transactions
            .get(&transaction.id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Transaction".to_string()))
    }

    async fn approve(
        &self,
        transaction: &Transaction,
        user: &User,
        update: &SettleRequest,
    ) -> Result<Transaction, ServiceError> {
        let (amount, action) = match (update.amount, update.action) {
            (Some(amount), Some(action)) => (amount, action),
            _ => return Err(ServiceError::MissingSettlementFields),
        };

        if !matches!(
            transaction.tx_type,
            TransactionType::Deposit | TransactionType::Withdrawal
        ) {
            return Err(ServiceError::InvalidTransactionType);
        }

        let amount_micros = utils::to_micros(amount);

        self.confirm_settlement_notice(
            transaction,
            SettlementDecision::Approved,
            amount_micros,
            "",
        )
        .await?;

        match action {
            BalanceAction::Add => {
                self.users
                    .credit_deposit(&transaction.email, amount_micros)
                    .await?;
            }
            // the withdrawal balance was already reserved at admission time
            BalanceAction::Minus => {
                self.users
                    .add_total_withdraw(&transaction.email, amount_micros)
                    .await?;
            }
        }

        let display_amount = utils::to_display(amount_micros);
        if transaction.tx_type == TransactionType::Deposit {
            if self.users.consume_one_time_bonus(&transaction.email).await? {
                self.send_crew(CrewRequest::AwardFirstDepositBonus {
                    user_id: user.id.clone(),
                    amount: display_amount,
                    reason: "first_deposit".to_string(),
                })
                .await;
            }
            self.send_crew(CrewRequest::UpdateRollup {
                user_id: user.id.clone(),
                kind: RollupKind::Deposit,
                amount: display_amount,
            })
            .await;
        } else {
            self.send_crew(CrewRequest::UpdateRollup {
                user_id: user.id.clone(),
                kind: RollupKind::Withdraw,
                amount: display_amount,
            })
            .await;
        }

        // Admin totals move by the amount recorded at admission time, in the
        // same micro-units as the webhook path.
        match transaction.tx_type {
            TransactionType::Deposit => {
                self.admin.add_deposit(transaction.amount_micros).await?;
            }
            _ => {
                self.admin.add_withdraw(transaction.amount_micros).await?;
            }
        }

        // Persist the completion last; a failure mid-sequence leaves the
        // transaction visibly pending for inspection.
        if !self.transactions.complete_if_pending(&transaction.id).await? {
            return Err(ServiceError::InvalidState(
                "Only pending transactions can be updated".to_string(),
            ));
        }

        self.transactions
            .get(&transaction.id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Transaction".to_string()))
    }

    async fn confirm_settlement_notice(
        &self,
        transaction: &Transaction,
        decision: SettlementDecision,
        amount_micros: i64,
        reason: &str,
    ) -> Result<(), ServiceError> {
        let (ack_tx, ack_rx) = oneshot::channel();

        self.notify_channel
            .send(NotifyRequest::SettlementStatus {
                email: transaction.email.clone(),
                amount_micros,
                transaction_id: transaction.id.clone(),
                tx_type: transaction.tx_type,
                decision,
                reason: reason.to_string(),
                ack: ack_tx,
            })
            .await
            .map_err(|e| ServiceError::Communication(e.to_string()))?;

        ack_rx
            .await
            .map_err(|e| ServiceError::Communication(e.to_string()))?
    }

    async fn send_crew(&self, request: CrewRequest) {
        if let Err(e) = self.crew_channel.send(request).await {
            log::error!("Could not queue crew update: {}", e);
        }
    }
}

#[async_trait]
impl RequestHandler<SettlementRequest> for SettlementRequestHandler {
    async fn handle_request(&self, request: SettlementRequest) {
        match request {
            SettlementRequest::Settle {
                transaction_id,
                update,
                response,
            } => {
                let result = self.settle(&transaction_id, update).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct SettlementService;

impl SettlementService {
    pub fn new() -> Self {
        SettlementService {}
    }
}

#[async_trait]
impl Service<SettlementRequest, SettlementRequestHandler> for SettlementService {}
