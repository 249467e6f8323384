use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};
use tokio::sync::{mpsc, oneshot};

use super::notify::NotifyRequest;
use super::{RequestHandler, Service, ServiceError};
use crate::models::transactions::{
    HistoryPage, Transaction, TransactionStatus, TransactionType,
};
use crate::repositories::orders::OrderStore;
use crate::repositories::transactions::TransactionStore;
use crate::repositories::users::UserStore;
use crate::repositories::StoreError;
use crate::settings;
use crate::utils;

pub enum TransactionServiceRequest {
    Withdraw {
        email: String,
        wallet_address: String,
        amount: f64,
        response: oneshot::Sender<Result<Transaction, ServiceError>>,
    },
    ClaimDeposit {
        email: String,
        order_id: String,
        response: oneshot::Sender<Result<Transaction, ServiceError>>,
    },
    History {
        email: String,
        limit: i64,
        page: i64,
        response: oneshot::Sender<Result<HistoryPage, ServiceError>>,
    },
}

/// Withdrawal admission policy: weekday business hours in the platform's
/// fixed timezone, and a floor on the requested amount.
#[derive(Clone)]
pub struct WithdrawalPolicy {
    pub min_amount_micros: i64,
    pub open_hour: u32,
    pub close_hour: u32,
    pub offset: FixedOffset,
}

impl WithdrawalPolicy {
    pub fn from_settings(settings: &settings::Withdrawals) -> Self {
        WithdrawalPolicy {
            min_amount_micros: utils::to_micros(settings.min_amount),
            open_hour: settings.open_hour,
            close_hour: settings.close_hour,
            offset: FixedOffset::east_opt(settings.utc_offset_hours * 3600)
                .expect("Invalid withdrawal timezone offset."),
        }
    }

    pub fn check_window(&self, now: DateTime<Utc>) -> Result<(), ServiceError> {
        let local = now.with_timezone(&self.offset);

        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return Err(ServiceError::TimeWindowViolation(format!(
                "Withdrawals aren't allowed on weekends. Withdrawals reopen at {:02}:00 Monday (UTC{}).",
                self.open_hour, self.offset
            )));
        }

        let hour = local.hour();
        if hour < self.open_hour || hour >= self.close_hour {
            return Err(ServiceError::TimeWindowViolation(format!(
                "Withdrawals are only allowed from {:02}:00 to {:02}:00 (UTC{}). Please try again during business hours.",
                self.open_hour, self.close_hour, self.offset
            )));
        }

        Ok(())
    }
}

#[derive(Clone)]
pub struct TransactionRequestHandler {
    users: Arc<dyn UserStore>,
    orders: Arc<dyn OrderStore>,
    transactions: Arc<dyn TransactionStore>,
    notify_channel: mpsc::Sender<NotifyRequest>,
    policy: WithdrawalPolicy,
}

impl TransactionRequestHandler {
    pub fn new(
        users: Arc<dyn UserStore>,
        orders: Arc<dyn OrderStore>,
        transactions: Arc<dyn TransactionStore>,
        notify_channel: mpsc::Sender<NotifyRequest>,
        policy: WithdrawalPolicy,
    ) -> Self {
        TransactionRequestHandler {
            users,
            orders,
            transactions,
            notify_channel,
            policy,
        }
    }

    /// Admit a withdrawal request. Funds are reserved the moment the request
    /// is admitted, not when it is later approved; a declined settlement
    /// releases the reservation.
    pub async fn request_withdrawal(
        &self,
        email: &str,
        wallet_address: &str,
        amount: f64,
        now: DateTime<Utc>,
    ) -> Result<Transaction, ServiceError> {
        let user = self
            .users
            .get_by_email(email)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;

        if !user.bot_active {
            return Err(ServiceError::AccountSuspended);
        }

        self.policy.check_window(now)?;

        let amount_micros = utils::to_micros(amount);
        if amount_micros < self.policy.min_amount_micros {
            return Err(ServiceError::BelowMinimum(utils::to_display(
                self.policy.min_amount_micros,
            )));
        }

        if user.balance_micros < amount_micros {
            return Err(ServiceError::InsufficientBalance);
        }

        if self.transactions.has_pending_withdrawal(email).await? {
            return Err(ServiceError::DuplicatePendingRequest);
        }

        // Pessimistic reservation; the conditional debit re-checks the
        // balance so two concurrent requests cannot both pass on a stale
        // read.
        if !self.users.reserve_balance(email, amount_micros).await? {
            return Err(ServiceError::InsufficientBalance);
        }

        let mut transaction = Transaction::new(
            email,
            TransactionType::Withdrawal,
            amount_micros,
            TransactionStatus::Pending,
        );
        transaction.wallet_address = Some(wallet_address.to_string());

        match self.transactions.insert(&transaction).await {
            Ok(()) => {}
            Err(StoreError::Conflict) => {
                // lost the exclusivity race; release the reservation
                self.users.credit_balance(email, amount_micros).await?;
                return Err(ServiceError::DuplicatePendingRequest);
            }
            Err(e) => {
                self.users.credit_balance(email, amount_micros).await?;
                return Err(e.into());
            }
        }

        self.users
            .set_withdrawal_wallet(email, wallet_address, amount_micros)
            .await?;

        if let Err(e) = self
            .notify_channel
            .send(NotifyRequest::Review {
                email: email.to_string(),
                amount_micros,
                transaction_id: transaction.id.clone(),
                tx_type: TransactionType::Withdrawal,
            })
            .await
        {
            log::error!("Could not queue withdrawal notification: {}", e);
        }

        Ok(transaction)
    }

    /// Attach a pending deposit transaction to one of the caller's pending
    /// orders ahead of the payment-network confirmation.
    pub async fn claim_deposit(
        &self,
        email: &str,
        order_id: &str,
    ) -> Result<Transaction, ServiceError> {
        self.users
            .get_by_email(email)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;

        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order".to_string()))?;

        if order.email != email {
            return Err(ServiceError::Unauthorized);
        }
        if order.status != crate::models::orders::OrderStatus::Pending
            || order.reference_id.is_some()
        {
            return Err(ServiceError::InvalidState(
                "This order has already been processed".to_string(),
            ));
        }

        let transaction = Transaction::new(
            email,
            TransactionType::Deposit,
            order.atomic_amount,
            TransactionStatus::Pending,
        );
        self.transactions.insert(&transaction).await?;
        self.orders.set_reference(&order.id, &transaction.id).await?;

        if let Err(e) = self
            .notify_channel
            .send(NotifyRequest::Review {
                email: email.to_string(),
                amount_micros: order.atomic_amount,
                transaction_id: transaction.id.clone(),
                tx_type: TransactionType::Deposit,
            })
            .await
        {
            log::error!("Could not queue deposit review notification: {}", e);
        }

        Ok(transaction)
    }

    pub async fn history(
        &self,
        email: &str,
        limit: i64,
        page: i64,
    ) -> Result<HistoryPage, ServiceError> {
        let limit = limit.clamp(1, 100);
        let page = page.max(1);
        let offset = (page - 1) * limit;

        let user = self
            .users
            .get_by_email(email)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;

        let transactions = self.transactions.list_for_owner(email, limit, offset).await?;
        let total = self.transactions.count_for_owner(email).await?;
        let total_pages = if total == 0 {
            1
        } else {
            (total + limit - 1) / limit
        };

        Ok(HistoryPage {
            transactions,
            page,
            total,
            total_pages,
            balance: utils::to_display(user.balance_micros),
        })
    }
}

#[async_trait]
impl RequestHandler<TransactionServiceRequest> for TransactionRequestHandler {
    async fn handle_request(&self, request: TransactionServiceRequest) {
        match request {
            TransactionServiceRequest::Withdraw {
                email,
                wallet_address,
                amount,
                response,
            } => {
                let result = self
                    .request_withdrawal(&email, &wallet_address, amount, Utc::now())
                    .await;
                let _ = response.send(result);
            }
            TransactionServiceRequest::ClaimDeposit {
                email,
                order_id,
                response,
            } => {
                let result = self.claim_deposit(&email, &order_id).await;
                let _ = response.send(result);
            }
            TransactionServiceRequest::History {
                email,
                limit,
                page,
                response,
            } => {
                let result = self.history(&email, limit, page).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct TransactionService;

impl TransactionService {
    pub fn new() -> Self {
        TransactionService {}
    }
}

#[async_trait]
impl Service<TransactionServiceRequest, TransactionRequestHandler> for TransactionService {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::models::orders::PaymentOrder;
    use crate::repositories::memory::MemoryLedger;
    use crate::services::testing;

    // Wednesday 2026-08-05 09:30 UTC -> 10:30 in the UTC+1 window.
    fn weekday_in_window() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 5, 9, 30, 0).unwrap()
    }

    fn handler(ledger: &Arc<MemoryLedger>) -> TransactionRequestHandler {
        let (notify_tx, _log) = testing::spawn_notify_stub(false);
        TransactionRequestHandler::new(
            ledger.clone(),
            ledger.clone(),
            ledger.clone(),
            notify_tx,
            testing::policy(),
        )
    }

    #[tokio::test]
    async fn admission_reserves_the_balance() {
        let ledger = testing::ledger();
        testing::seed_user(&ledger, "miner@x.io", 100_000_000).await;
        let handler = handler(&ledger);

        let tx = handler
            .request_withdrawal("miner@x.io", "wallet-addr", 30.0, weekday_in_window())
            .await
            .unwrap();

        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.amount_micros, 30_000_000);
        assert_eq!(tx.wallet_address.as_deref(), Some("wallet-addr"));

        let user = ledger.get_by_email("miner@x.io").await.unwrap().unwrap();
        assert_eq!(user.balance_micros, 70_000_000);
        assert_eq!(user.withdrawal_wallet_address.as_deref(), Some("wallet-addr"));
        assert_eq!(user.withdrawal_wallet_micros, Some(30_000_000));
    }

    #[tokio::test]
    async fn weekend_requests_are_refused() {
        let ledger = testing::ledger();
        testing::seed_user(&ledger, "miner@x.io", 100_000_000).await;
        let handler = handler(&ledger);

        // Saturday 2026-08-08
        let saturday = Utc.with_ymd_and_hms(2026, 8, 8, 10, 0, 0).unwrap();
        let err = handler
            .request_withdrawal("miner@x.io", "addr", 30.0, saturday)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::TimeWindowViolation(_)));
        assert!(err.to_string().contains("Monday"));
    }

    #[tokio::test]
    async fn requests_outside_business_hours_are_refused() {
        let ledger = testing::ledger();
        testing::seed_user(&ledger, "miner@x.io", 100_000_000).await;
        let handler = handler(&ledger);

        // 07:00 UTC -> 08:00 local, one hour before opening
        let early = Utc.with_ymd_and_hms(2026, 8, 5, 7, 0, 0).unwrap();
        let err = handler
            .request_withdrawal("miner@x.io", "addr", 30.0, early)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::TimeWindowViolation(_)));

        // 16:30 UTC -> 17:30 local, after closing
        let late = Utc.with_ymd_and_hms(2026, 8, 5, 16, 30, 0).unwrap();
        let err = handler
            .request_withdrawal("miner@x.io", "addr", 30.0, late)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::TimeWindowViolation(_)));
    }

    #[tokio::test]
    async fn below_minimum_is_refused() {
        let ledger = testing::ledger();
        testing::seed_user(&ledger, "miner@x.io", 100_000_000).await;
        let handler = handler(&ledger);

        let err = handler
            .request_withdrawal("miner@x.io", "addr", 11.999, weekday_in_window())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BelowMinimum(_)));
    }

    #[tokio::test]
    async fn insufficient_balance_is_refused() {
        let ledger = testing::ledger();
        testing::seed_user(&ledger, "miner@x.io", 20_000_000).await;
        let handler = handler(&ledger);

        let err = handler
            .request_withdrawal("miner@x.io", "addr", 25.0, weekday_in_window())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientBalance));

        let user = ledger.get_by_email("miner@x.io").await.unwrap().unwrap();
        assert_eq!(user.balance_micros, 20_000_000);
    }

    #[tokio::test]
    async fn second_pending_withdrawal_is_refused() {
        let ledger = testing::ledger();
        testing::seed_user(&ledger, "miner@x.io", 100_000_000).await;
        let handler = handler(&ledger);

        handler
            .request_withdrawal("miner@x.io", "addr", 20.0, weekday_in_window())
            .await
            .unwrap();
        let err = handler
            .request_withdrawal("miner@x.io", "addr", 15.0, weekday_in_window())
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::DuplicatePendingRequest));
        // only the first reservation stands
        let user = ledger.get_by_email("miner@x.io").await.unwrap().unwrap();
        assert_eq!(user.balance_micros, 80_000_000);
    }

    #[tokio::test]
    async fn concurrent_admissions_never_over_reserve() {
        let ledger = testing::ledger();
        testing::seed_user(&ledger, "miner@x.io", 100_000_000).await;
        let handler = handler(&ledger);

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let handler = handler.clone();
            tasks.push(tokio::spawn(async move {
                handler
                    .request_withdrawal("miner@x.io", "addr", 30.0, weekday_in_window())
                    .await
            }));
        }

        let mut admitted = 0_i64;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                admitted += 1;
            }
        }

        let user = ledger.get_by_email("miner@x.io").await.unwrap().unwrap();
        assert_eq!(user.balance_micros, 100_000_000 - admitted * 30_000_000);
        assert!(user.balance_micros >= 0);
        // exclusivity admits exactly one concurrent request
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn claim_deposit_links_a_pending_transaction() {
        let ledger = testing::ledger();
        testing::seed_user(&ledger, "miner@x.io", 0).await;
        let handler = handler(&ledger);

        let order = PaymentOrder::new(
            "miner@x.io",
            12_345_000,
            "addr",
            Utc::now() + chrono::Duration::minutes(30),
        );
        OrderStore::insert(ledger.as_ref(), &order).await.unwrap();

        let tx = handler.claim_deposit("miner@x.io", &order.id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.amount_micros, 12_345_000);

        let stored = OrderStore::get(ledger.as_ref(), &order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.reference_id.as_deref(), Some(tx.id.as_str()));

        // a second claim on the same order is rejected
        let err = handler
            .claim_deposit("miner@x.io", &order.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn claim_deposit_rejects_foreign_orders() {
        let ledger = testing::ledger();
        testing::seed_user(&ledger, "miner@x.io", 0).await;
        testing::seed_user(&ledger, "other@x.io", 0).await;
        let handler = handler(&ledger);

        let order = PaymentOrder::new(
            "other@x.io",
            12_345_000,
            "addr",
            Utc::now() + chrono::Duration::minutes(30),
        );
        OrderStore::insert(ledger.as_ref(), &order).await.unwrap();

        let err = handler
            .claim_deposit("miner@x.io", &order.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized));
    }

    #[tokio::test]
    async fn history_pages_and_clamps() {
        let ledger = testing::ledger();
        testing::seed_user(&ledger, "miner@x.io", 5_000_000).await;
        let handler = handler(&ledger);

        for i in 0..3 {
            let mut tx = Transaction::new(
                "miner@x.io",
                TransactionType::Yield,
                1_000_000,
                TransactionStatus::Completed,
            );
            tx.date = Utc::now() - chrono::Duration::minutes(i);
            TransactionStore::insert(ledger.as_ref(), &tx).await.unwrap();
        }

        let page = handler.history("miner@x.io", 2, 1).await.unwrap();
        assert_eq!(page.transactions.len(), 2);
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.balance, 5.0);
        // newest first
        assert!(page.transactions[0].date >= page.transactions[1].date);

        let clamped = handler.history("miner@x.io", 0, 0).await.unwrap();
        assert_eq!(clamped.page, 1);
        assert_eq!(clamped.transactions.len(), 1);
    }
}
