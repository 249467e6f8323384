use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

use super::crew::{CrewRequest, RollupKind};
use super::notify::NotifyRequest;
use super::{RequestHandler, Service, ServiceError};
use crate::models::orders::PaymentOrder;
use crate::models::transactions::{Transaction, TransactionStatus, TransactionType};
use crate::repositories::admin::AdminStore;
use crate::repositories::orders::OrderStore;
use crate::repositories::transactions::TransactionStore;
use crate::repositories::users::UserStore;
use crate::utils;

pub enum ReconcileRequest {
    /// A fully-confirmed payment of `value` micro-units observed by the
    /// payment network. Must be safe under at-least-once delivery.
    PaymentConfirmed {
        value: i64,
        txid: String,
        addr: String,
        response: oneshot::Sender<Result<bool, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct ReconcileRequestHandler {
    users: Arc<dyn UserStore>,
    orders: Arc<dyn OrderStore>,
    transactions: Arc<dyn TransactionStore>,
    admin: Arc<dyn AdminStore>,
    crew_channel: mpsc::Sender<CrewRequest>,
    notify_channel: mpsc::Sender<NotifyRequest>,
}

impl ReconcileRequestHandler {
    pub fn new(
        users: Arc<dyn UserStore>,
        orders: Arc<dyn OrderStore>,
        transactions: Arc<dyn TransactionStore>,
        admin: Arc<dyn AdminStore>,
        crew_channel: mpsc::Sender<CrewRequest>,
        notify_channel: mpsc::Sender<NotifyRequest>,
    ) -> Self {
        ReconcileRequestHandler {
            users,
            orders,
            transactions,
            admin,
            crew_channel,
            notify_channel,
        }
    }

    /// Match a confirmed payment to a pending order and apply it exactly
    /// once. Returns Ok(false) for anything that is not ours to process:
    /// unknown or expired amounts, orphaned orders, duplicate notifications.
    pub async fn reconcile(
        &self,
        value: i64,
        txid: &str,
        addr: &str,
    ) -> Result<bool, ServiceError> {
        let order = match self.orders.find_claimable(value, Utc::now()).await? {
            Some(order) => order,
            None => {
                log::warn!("No claimable order for amount {}; ignoring.", value);
                return Ok(false);
            }
        };

        let user = match self.users.get_by_email(&order.email).await? {
            Some(user) => user,
            None => {
                log::warn!("User not found for order {}; ignoring.", order.id);
                return Ok(false);
            }
        };

        // The single authoritative idempotency guard: pending -> completed in
        // one conditional update. A duplicate notification loses this race
        // and is treated as already processed.
        if !self.orders.claim_pending(&order.id, txid, addr).await? {
            log::warn!("Order {} already processed; ignoring duplicate.", order.id);
            return Ok(false);
        }

        let display_amount = utils::to_display(value);

        if self.users.consume_one_time_bonus(&user.email).await? {
            self.send_crew(CrewRequest::AwardFirstDepositBonus {
                user_id: user.id.clone(),
                amount: display_amount,
                reason: "first_deposit".to_string(),
            })
            .await;
        }

        self.users.credit_deposit(&user.email, value).await?;
        self.admin.add_deposit(value).await?;

        let transaction_id = self.link_transaction(&order, value, txid).await?;

        // Notification and rollup never reverse the financial state above.
        if let Err(e) = self
            .notify_channel
            .send(NotifyRequest::Review {
                email: user.email.clone(),
                amount_micros: value,
                transaction_id,
                tx_type: TransactionType::Deposit,
            })
            .await
        {
            log::error!("Could not queue deposit notification: {}", e);
        }

        self.send_crew(CrewRequest::UpdateRollup {
            user_id: user.id,
            kind: RollupKind::Deposit,
            amount: display_amount,
        })
        .await;

        log::info!("Payment confirmed for {} ({} USDT).", addr, display_amount);
        Ok(true)
    }

    /// Resolve or create the ledger entry for a claimed order. An order that
    /// was claimed by a user beforehand already references a pending deposit
    /// transaction; otherwise a completed one is created and linked back.
    async fn link_transaction(
        &self,
        order: &PaymentOrder,
        value: i64,
        txid: &str,
    ) -> Result<String, ServiceError> {
        if let Some(reference) = &order.reference_id {
            if self.transactions.get(reference).await?.is_some() {
                if !self.transactions.complete_if_pending(reference).await? {
                    log::warn!("Transaction {} was not pending at reconciliation.", reference);
                }
                self.transactions.set_external_ref(reference, txid).await?;
                return Ok(reference.clone());
            }
        }

        let mut transaction = Transaction::new(
            &order.email,
            TransactionType::Deposit,
            value,
            TransactionStatus::Completed,
        );
        transaction.external_txid = Some(txid.to_string());
        self.transactions.insert(&transaction).await?;
        self.orders.set_reference(&order.id, &transaction.id).await?;

        Ok(transaction.id)
    }

    async fn send_crew(&self, request: CrewRequest) {
        if let Err(e) = self.crew_channel.send(request).await {
            log::error!("Could not queue crew update: {}", e);
        }
    }
}

#[async_trait]
impl RequestHandler<ReconcileRequest> for ReconcileRequestHandler {
    async fn handle_request(&self, request: ReconcileRequest) {
        match request {
            ReconcileRequest::PaymentConfirmed {
                value,
                txid,
                addr,
                response,
            } => {
                let accepted = self.reconcile(value, &txid, &addr).await;
                let _ = response.send(accepted);
            }
        }
    }
}

pub struct ReconciliationService;

impl ReconciliationService {
    pub fn new() -> Self {
        ReconciliationService {}
    }
}

#[async_trait]
impl Service<ReconcileRequest, ReconcileRequestHandler> for ReconciliationService {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::models::orders::OrderStatus;
    use crate::repositories::memory::MemoryLedger;
    use crate::services::testing;

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        handler: ReconcileRequestHandler,
        crew: testing::CrewLog,
        notifications: testing::NotifyLog,
    }

    fn fixture() -> Fixture {
        let ledger = testing::ledger();
        let (crew_tx, crew) = testing::spawn_crew_recorder();
        let (notify_tx, notifications) = testing::spawn_notify_stub(false);
        let handler = ReconcileRequestHandler::new(
            ledger.clone(),
            ledger.clone(),
            ledger.clone(),
            ledger.clone(),
            crew_tx,
            notify_tx,
        );

        Fixture {
            ledger,
            handler,
            crew,
            notifications,
        }
    }

    async fn pending_order(
        ledger: &Arc<MemoryLedger>,
        email: &str,
        atomic_amount: i64,
    ) -> PaymentOrder {
        let order = PaymentOrder::new(
            email,
            atomic_amount,
            "order-addr",
            Utc::now() + Duration::minutes(30),
        );
        OrderStore::insert(ledger.as_ref(), &order).await.unwrap();
        order
    }

    #[tokio::test]
    async fn confirmed_payment_credits_exactly_once() {
        let f = fixture();
        testing::seed_user(&f.ledger, "miner@x.io", 0).await;
        let order = pending_order(&f.ledger, "miner@x.io", 10_523_000).await;

        assert!(f.handler.reconcile(10_523_000, "txid-1", "addr-1").await.unwrap());
        // duplicate delivery of the same notification
        assert!(!f.handler.reconcile(10_523_000, "txid-1", "addr-1").await.unwrap());

        let user = f.ledger.get_by_email("miner@x.io").await.unwrap().unwrap();
        assert_eq!(user.balance_micros, 10_523_000);
        assert_eq!(user.total_deposit_micros, 10_523_000);
        assert_eq!(f.ledger.totals().await.unwrap().total_deposit_micros, 10_523_000);

        let order = OrderStore::get(f.ledger.as_ref(), &order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.external_txid.as_deref(), Some("txid-1"));
        let tx = TransactionStore::get(f.ledger.as_ref(), order.reference_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.amount_micros, 10_523_000);
        assert_eq!(tx.external_txid.as_deref(), Some("txid-1"));
    }

    #[tokio::test]
    async fn allocated_order_reconciles_at_its_exact_atomic_amount() {
        let f = fixture();
        testing::seed_user(&f.ledger, "miner@x.io", 0).await;
        let allocator = crate::services::orders::OrderRequestHandler::new(
            f.ledger.clone(),
            f.ledger.clone(),
            testing::static_gateway("pay-addr"),
        );

        let order = allocator.create_order("miner@x.io", 10.0).await.unwrap();
        assert!(order.atomic_amount >= 10_100_000 && order.atomic_amount <= 10_999_000);

        // a near-miss amount matches nothing
        assert!(!f
            .handler
            .reconcile(order.atomic_amount + 1, "tx", "a")
            .await
            .unwrap());
        assert!(f
            .handler
            .reconcile(order.atomic_amount, "tx", "a")
            .await
            .unwrap());

        let user = f.ledger.get_by_email("miner@x.io").await.unwrap().unwrap();
        assert_eq!(user.balance_micros, order.atomic_amount);
    }

    #[tokio::test]
    async fn unknown_amount_is_rejected_without_side_effects() {
        let f = fixture();
        testing::seed_user(&f.ledger, "miner@x.io", 0).await;

        assert!(!f.handler.reconcile(99_999_000, "txid", "addr").await.unwrap());

        let user = f.ledger.get_by_email("miner@x.io").await.unwrap().unwrap();
        assert_eq!(user.balance_micros, 0);
        assert_eq!(f.ledger.totals().await.unwrap().total_deposit_micros, 0);
    }

    #[tokio::test]
    async fn expired_order_is_not_honored() {
        let f = fixture();
        testing::seed_user(&f.ledger, "miner@x.io", 0).await;
        let mut order = PaymentOrder::new(
            "miner@x.io",
            10_100_000,
            "addr",
            Utc::now() - Duration::minutes(1),
        );
        order.created_at = Utc::now() - Duration::minutes(31);
        OrderStore::insert(f.ledger.as_ref(), &order).await.unwrap();

        assert!(!f.handler.reconcile(10_100_000, "txid", "addr").await.unwrap());
        let user = f.ledger.get_by_email("miner@x.io").await.unwrap().unwrap();
        assert_eq!(user.balance_micros, 0);
    }

    #[tokio::test]
    async fn first_deposit_bonus_is_awarded_once() {
        let f = fixture();
        testing::seed_user(&f.ledger, "miner@x.io", 0).await;
        pending_order(&f.ledger, "miner@x.io", 10_100_000).await;
        pending_order(&f.ledger, "miner@x.io", 20_200_000).await;

        assert!(f.handler.reconcile(10_100_000, "tx1", "a1").await.unwrap());
        assert!(f.handler.reconcile(20_200_000, "tx2", "a2").await.unwrap());
        testing::settle_events().await;

        let user = f.ledger.get_by_email("miner@x.io").await.unwrap().unwrap();
        assert!(!user.one_time_bonus);

        let crew = f.crew.lock().unwrap();
        let bonuses = crew
            .iter()
            .filter(|r| matches!(r, CrewRequest::AwardFirstDepositBonus { .. }))
            .count();
        let rollups = crew
            .iter()
            .filter(|r| matches!(r, CrewRequest::UpdateRollup { kind: RollupKind::Deposit, .. }))
            .count();
        assert_eq!(bonuses, 1);
        assert_eq!(rollups, 2);
    }

    #[tokio::test]
    async fn claimed_order_completes_its_linked_transaction() {
        let f = fixture();
        testing::seed_user(&f.ledger, "miner@x.io", 0).await;
        let order = pending_order(&f.ledger, "miner@x.io", 15_400_000).await;

        // the user attached a pending deposit transaction beforehand
        let claim = Transaction::new(
            "miner@x.io",
            TransactionType::Deposit,
            15_400_000,
            TransactionStatus::Pending,
        );
        TransactionStore::insert(f.ledger.as_ref(), &claim)
            .await
            .unwrap();
        f.ledger.set_reference(&order.id, &claim.id).await.unwrap();

        assert!(f.handler.reconcile(15_400_000, "txid-9", "addr").await.unwrap());

        let tx = TransactionStore::get(f.ledger.as_ref(), &claim.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.external_txid.as_deref(), Some("txid-9"));
    }

    #[tokio::test]
    async fn deposit_notification_is_queued() {
        let f = fixture();
        testing::seed_user(&f.ledger, "miner@x.io", 0).await;
        pending_order(&f.ledger, "miner@x.io", 11_100_000).await;

        assert!(f.handler.reconcile(11_100_000, "txid", "addr").await.unwrap());
        testing::settle_events().await;

        let sent = f.notifications.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("review:deposit:miner@x.io"));
    }
}
