use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::orders::PaymentOrder;
use crate::repositories::gateway::AddressProvider;
use crate::repositories::orders::OrderStore;
use crate::repositories::users::UserStore;
use crate::repositories::StoreError;
use crate::utils;

pub const ORDER_EXPIRY_MINUTES: i64 = 30;

// The offset spans 0.100-0.999 of a display unit, in whole display-millis.
// It only disambiguates orders that request the same nominal amount; the
// matching key downstream is the atomic amount, not the email.
const OFFSET_MIN_MILLIS: i64 = 100;
const OFFSET_MAX_MILLIS: i64 = 1_000;
const ALLOCATION_RETRIES: u32 = 3;

const SWEEP_INTERVAL_SECS: u64 = 60;

pub enum OrderRequest {
    CreateOrder {
        email: String,
        amount: f64,
        response: oneshot::Sender<Result<PaymentOrder, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct OrderRequestHandler {
    users: Arc<dyn UserStore>,
    orders: Arc<dyn OrderStore>,
    gateway: Arc<dyn AddressProvider>,
}

impl OrderRequestHandler {
    pub fn new(
        users: Arc<dyn UserStore>,
        orders: Arc<dyn OrderStore>,
        gateway: Arc<dyn AddressProvider>,
    ) -> Self {
        OrderRequestHandler {
            users,
            orders,
            gateway,
        }
    }

    /// Background sweep failing pending orders past their deadline, freeing
    /// their atomic amounts for reuse. The reconciliation path re-checks
    /// expiry at match time, so a race with the sweep never honors a stale
    /// order.
    pub fn start_expiry_sweep(&self) {
        let orders = self.orders.clone();

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                match orders.fail_expired(Utc::now()).await {
                    Ok(0) => {}
                    Ok(swept) => log::info!("Expired {} payment orders.", swept),
                    Err(e) => log::error!("Order expiry sweep failed: {}", e),
                }
            }
        });
    }

    pub async fn create_order(
        &self,
        email: &str,
        amount: f64,
    ) -> Result<PaymentOrder, ServiceError> {
        let user = self
            .users
            .get_by_email(email)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;

        if !user.bot_active {
            return Err(ServiceError::AccountSuspended);
        }

        let address = self
            .gateway
            .new_address("USDT")
            .await
            .map_err(|e| ServiceError::ExternalService("Gateway".to_string(), e.to_string()))?;

        let base_micros = utils::to_micros(amount);
        let expires_at = Utc::now() + Duration::minutes(ORDER_EXPIRY_MINUTES);

        for _ in 0..ALLOCATION_RETRIES {
            let offset_millis =
                rand::thread_rng().gen_range(OFFSET_MIN_MILLIS..OFFSET_MAX_MILLIS);
            let payable_micros = base_micros + offset_millis * utils::MILLI_MICROS;

            // The probe only cuts down on constraint-violation retries; the
            // store's pending-amount uniqueness is the real guarantee.
            if self.orders.pending_amount_exists(payable_micros).await? {
                continue;
            }

            let order = PaymentOrder::new(email, payable_micros, &address, expires_at);
            match self.orders.insert(&order).await {
                Ok(()) => return Ok(order),
                Err(StoreError::Conflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(ServiceError::AllocationExhausted)
    }
}

#[async_trait]
impl RequestHandler<OrderRequest> for OrderRequestHandler {
    async fn handle_request(&self, request: OrderRequest) {
        match request {
            OrderRequest::CreateOrder {
                email,
                amount,
                response,
            } => {
                let order = self.create_order(&email, amount).await;
                let _ = response.send(order);
            }
        }
    }
}

pub struct OrderService;

impl OrderService {
    pub fn new() -> Self {
        OrderService {}
    }
}

#[async_trait]
impl Service<OrderRequest, OrderRequestHandler> for OrderService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::orders::OrderStatus;
    use crate::services::testing;

    fn handler(
        ledger: &Arc<crate::repositories::memory::MemoryLedger>,
        gateway: Arc<dyn AddressProvider>,
    ) -> OrderRequestHandler {
        OrderRequestHandler::new(ledger.clone(), ledger.clone(), gateway)
    }

    #[tokio::test]
    async fn allocates_a_pending_order_with_offset_amount() {
        let ledger = testing::ledger();
        testing::seed_user(&ledger, "miner@x.io", 0).await;
        let handler = handler(&ledger, testing::static_gateway("tb1qaddr"));

        let order = handler.create_order("miner@x.io", 10.0).await.unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.address, "tb1qaddr");
        assert!(order.atomic_amount >= 10_100_000 && order.atomic_amount <= 10_999_000);
        assert_eq!(order.atomic_amount % utils::MILLI_MICROS, 0);
        assert_eq!(order.display_amount, utils::to_display(order.atomic_amount));
        assert!(order.expires_at > Utc::now() + Duration::minutes(ORDER_EXPIRY_MINUTES - 1));
        assert!(order.expires_at <= Utc::now() + Duration::minutes(ORDER_EXPIRY_MINUTES));
    }

    #[tokio::test]
    async fn same_nominal_amount_disambiguates() {
        let ledger = testing::ledger();
        testing::seed_user(&ledger, "a@x.io", 0).await;
        testing::seed_user(&ledger, "b@x.io", 0).await;
        let handler = handler(&ledger, testing::static_gateway("addr"));

        let first = handler.create_order("a@x.io", 25.0).await.unwrap();
        let second = handler.create_order("b@x.io", 25.0).await.unwrap();

        assert_ne!(first.atomic_amount, second.atomic_amount);
    }

    #[tokio::test]
    async fn suspended_account_cannot_allocate() {
        let ledger = testing::ledger();
        testing::seed_suspended_user(&ledger, "frozen@x.io").await;
        let handler = handler(&ledger, testing::static_gateway("addr"));

        let err = handler.create_order("frozen@x.io", 10.0).await.unwrap_err();
        assert!(matches!(err, ServiceError::AccountSuspended));
    }

    #[tokio::test]
    async fn gateway_failure_creates_no_order() {
        let ledger = testing::ledger();
        testing::seed_user(&ledger, "a@x.io", 0).await;
        let handler = handler(&ledger, testing::failing_gateway());

        let err = handler.create_order("a@x.io", 10.0).await.unwrap_err();
        assert!(matches!(err, ServiceError::ExternalService(_, _)));
        assert!(!ledger.pending_amount_exists(10_100_000).await.unwrap());
    }

    #[tokio::test]
    async fn exhausted_offset_space_fails_allocation() {
        let ledger = testing::ledger();
        testing::seed_user(&ledger, "a@x.io", 0).await;
        let handler = handler(&ledger, testing::static_gateway("addr"));

        // every offset in [100, 999] display-millis is already pending
        let expires = Utc::now() + Duration::minutes(30);
        for offset in OFFSET_MIN_MILLIS..OFFSET_MAX_MILLIS {
            let amount = 10_000_000 + offset * utils::MILLI_MICROS;
            let order = PaymentOrder::new("other@x.io", amount, "addr", expires);
            OrderStore::insert(ledger.as_ref(), &order).await.unwrap();
        }

        let err = handler.create_order("a@x.io", 10.0).await.unwrap_err();
        assert!(matches!(err, ServiceError::AllocationExhausted));
    }
}
