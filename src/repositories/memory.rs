use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::admin::AdminStore;
use super::orders::OrderStore;
use super::transactions::TransactionStore;
use super::users::UserStore;
use super::StoreError;
use crate::models::admin::AdminTotals;
use crate::models::orders::{OrderStatus, PaymentOrder};
use crate::models::transactions::{Transaction, TransactionStatus, TransactionType};
use crate::models::users::User;

/// In-memory ledger with the same conditional-update semantics as the
/// Postgres repositories. The index maps mirror the partial unique indexes:
/// `pending_amounts` holds the atomic amount of every pending order,
/// `pending_withdrawals` the id of each user's single pending withdrawal.
#[derive(Default)]
pub struct MemoryLedger {
    users: DashMap<String, User>,
    orders: DashMap<String, PaymentOrder>,
    pending_amounts: DashMap<i64, String>,
    transactions: DashMap<String, Transaction>,
    pending_withdrawals: DashMap<String, String>,
    totals: Mutex<AdminTotals>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        MemoryLedger::default()
    }

    fn with_user<T>(
        &self,
        email: &str,
        f: impl FnOnce(&mut User) -> T,
    ) -> Result<T, StoreError> {
        match self.users.get_mut(email) {
            Some(mut user) => {
                user.updated_at = Utc::now();
                Ok(f(&mut user))
            }
            None => Err(StoreError::NotFound),
        }
    }
}

#[async_trait]
impl UserStore for MemoryLedger {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        match self.users.entry(user.email.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(user.clone());
                Ok(())
            }
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(email).map(|u| u.value().clone()))
    }

    async fn reserve_balance(&self, email: &str, amount_micros: i64) -> Result<bool, StoreError> {
        self.with_user(email, |user| {
            if user.balance_micros >= amount_micros {
                user.balance_micros -= amount_micros;
                true
            } else {
                false
            }
        })
    }

    async fn credit_balance(&self, email: &str, amount_micros: i64) -> Result<(), StoreError> {
        self.with_user(email, |user| user.balance_micros += amount_micros)
    }

    async fn credit_deposit(&self, email: &str, amount_micros: i64) -> Result<(), StoreError> {
        self.with_user(email, |user| {
            user.balance_micros += amount_micros;
            user.total_deposit_micros += amount_micros;
        })
    }

    async fn credit_yield(&self, email: &str, amount_micros: i64) -> Result<(), StoreError> {
        self.with_user(email, |user| {
            user.balance_micros += amount_micros;
            user.total_yield_micros += amount_micros;
        })
    }

    async fn add_total_withdraw(&self, email: &str, amount_micros: i64) -> Result<(), StoreError> {
        self.with_user(email, |user| user.total_withdraw_micros += amount_micros)
    }

    async fn consume_one_time_bonus(&self, email: &str) -> Result<bool, StoreError> {
        self.with_user(email, |user| {
            if user.one_time_bonus {
                user.one_time_bonus = false;
                true
            } else {
                false
            }
        })
    }

    async fn set_withdrawal_wallet(
        &self,
        email: &str,
        address: &str,
        amount_micros: i64,
    ) -> Result<(), StoreError> {
        self.with_user(email, |user| {
            user.withdrawal_wallet_address = Some(address.to_string());
            user.withdrawal_wallet_micros = Some(amount_micros);
        })
    }

    async fn claim_spin(
        &self,
        email: &str,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<bool, StoreError> {
        self.with_user(email, |user| match user.spin_started_at {
            Some(started) if started > now - cooldown => false,
            _ => {
                user.spin_started_at = Some(now);
                true
            }
        })
    }
}

#[async_trait]
impl OrderStore for MemoryLedger {
    async fn insert(&self, order: &PaymentOrder) -> Result<(), StoreError> {
        match self.pending_amounts.entry(order.atomic_amount) {
            Entry::Occupied(_) => return Err(StoreError::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(order.id.clone());
            }
        }
        self.orders.insert(order.id.clone(), order.clone());

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<PaymentOrder>, StoreError> {
        Ok(self.orders.get(id).map(|o| o.value().clone()))
    }

    async fn pending_amount_exists(&self, atomic_amount: i64) -> Result<bool, StoreError> {
        Ok(self.pending_amounts.contains_key(&atomic_amount))
    }

    async fn find_claimable(
        &self,
        atomic_amount: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentOrder>, StoreError> {
        let id = match self.pending_amounts.get(&atomic_amount) {
            Some(id) => id.value().clone(),
            None => return Ok(None),
        };

        Ok(self.orders.get(&id).and_then(|o| {
            if o.status == OrderStatus::Pending && o.expires_at > now {
                Some(o.value().clone())
            } else {
                None
            }
        }))
    }

    async fn claim_pending(
        &self,
        id: &str,
        external_txid: &str,
        external_addr: &str,
    ) -> Result<bool, StoreError> {
        let claimed_amount = {
            let mut order = match self.orders.get_mut(id) {
                Some(order) => order,
                None => return Ok(false),
            };
            if order.status != OrderStatus::Pending {
                return Ok(false);
            }
            order.status = OrderStatus::Completed;
            order.external_txid = Some(external_txid.to_string());
            order.address = external_addr.to_string();
            order.atomic_amount
        };

        self.pending_amounts.remove(&claimed_amount);
        Ok(true)
    }

    async fn set_reference(&self, id: &str, reference_id: &str) -> Result<(), StoreError> {
        match self.orders.get_mut(id) {
            Some(mut order) => {
                order.reference_id = Some(reference_id.to_string());
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn fail_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let expired: Vec<(String, i64)> = self
            .orders
            .iter()
            .filter(|o| o.status == OrderStatus::Pending && o.expires_at <= now)
            .map(|o| (o.id.clone(), o.atomic_amount))
            .collect();

        let mut swept = 0;
        for (id, amount) in expired {
            let failed = {
                let mut order = match self.orders.get_mut(&id) {
                    Some(order) => order,
                    None => continue,
                };
                if order.status == OrderStatus::Pending && order.expires_at <= now {
                    order.status = OrderStatus::Failed;
                    true
                } else {
                    false
                }
            };
            if failed {
                self.pending_amounts.remove(&amount);
                swept += 1;
            }
        }

        Ok(swept)
    }
}

#[async_trait]
impl TransactionStore for MemoryLedger {
    async fn insert(&self, tx: &Transaction) -> Result<(), StoreError> {
        if tx.tx_type == TransactionType::Withdrawal && tx.status == TransactionStatus::Pending {
            match self.pending_withdrawals.entry(tx.email.clone()) {
                Entry::Occupied(_) => return Err(StoreError::Conflict),
                Entry::Vacant(slot) => {
                    slot.insert(tx.id.clone());
                }
            }
        }
        self.transactions.insert(tx.id.clone(), tx.clone());

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Transaction>, StoreError> {
        Ok(self.transactions.get(id).map(|t| t.value().clone()))
    }

    async fn get_for_owner(
        &self,
        id: &str,
        email: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .transactions
            .get(id)
            .filter(|t| t.email == email)
            .map(|t| t.value().clone()))
    }

    async fn has_pending_withdrawal(&self, email: &str) -> Result<bool, StoreError> {
        Ok(self.pending_withdrawals.contains_key(email))
    }

    async fn complete_if_pending(&self, id: &str) -> Result<bool, StoreError> {
        self.transition_if_pending(id, TransactionStatus::Completed)
    }

    async fn fail_if_pending(&self, id: &str) -> Result<bool, StoreError> {
        self.transition_if_pending(id, TransactionStatus::Failed)
    }

    async fn set_external_ref(&self, id: &str, txid: &str) -> Result<(), StoreError> {
        match self.transactions.get_mut(id) {
            Some(mut tx) => {
                tx.external_txid = Some(txid.to_string());
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn set_image(&self, id: &str, image: &str) -> Result<(), StoreError> {
        match self.transactions.get_mut(id) {
            Some(mut tx) => {
                tx.image = Some(image.to_string());
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn list_for_owner(
        &self,
        email: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut all: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|t| t.email == email)
            .map(|t| t.value().clone())
            .collect();
        all.sort_by(|a, b| b.date.cmp(&a.date));

        Ok(all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_for_owner(&self, email: &str) -> Result<i64, StoreError> {
        Ok(self.transactions.iter().filter(|t| t.email == email).count() as i64)
    }
}

impl MemoryLedger {
    fn transition_if_pending(
        &self,
        id: &str,
        to: TransactionStatus,
    ) -> Result<bool, StoreError> {
        let released = {
            let mut tx = match self.transactions.get_mut(id) {
                Some(tx) => tx,
                None => return Ok(false),
            };
            if tx.status != TransactionStatus::Pending {
                return Ok(false);
            }
            tx.status = to;
            if tx.tx_type == TransactionType::Withdrawal {
                Some(tx.email.clone())
            } else {
                None
            }
        };

        if let Some(email) = released {
            self.pending_withdrawals.remove(&email);
        }
        Ok(true)
    }
}

#[async_trait]
impl AdminStore for MemoryLedger {
    async fn add_deposit(&self, amount_micros: i64) -> Result<(), StoreError> {
        let mut totals = self.totals.lock().unwrap();
        totals.total_deposit_micros += amount_micros;
        Ok(())
    }

    async fn add_withdraw(&self, amount_micros: i64) -> Result<(), StoreError> {
        let mut totals = self.totals.lock().unwrap();
        totals.total_withdraw_micros += amount_micros;
        Ok(())
    }

    async fn totals(&self) -> Result<AdminTotals, StoreError> {
        Ok(*self.totals.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(email: &str, amount: i64) -> PaymentOrder {
        PaymentOrder::new(email, amount, "addr", Utc::now() + Duration::minutes(30))
    }

    #[tokio::test]
    async fn second_pending_order_with_same_amount_conflicts() {
        let ledger = MemoryLedger::new();
        OrderStore::insert(&ledger, &order("a@x.io", 10_500_000))
            .await
            .unwrap();

        let err = OrderStore::insert(&ledger, &order("b@x.io", 10_500_000))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn claim_pending_is_one_shot() {
        let ledger = MemoryLedger::new();
        let order = order("a@x.io", 10_500_000);
        OrderStore::insert(&ledger, &order).await.unwrap();

        assert!(ledger.claim_pending(&order.id, "tx1", "addr").await.unwrap());
        assert!(!ledger.claim_pending(&order.id, "tx1", "addr").await.unwrap());

        // the amount is free again for a new pending order
        assert!(!ledger.pending_amount_exists(10_500_000).await.unwrap());
    }

    #[tokio::test]
    async fn expired_orders_are_swept_and_amount_freed() {
        let ledger = MemoryLedger::new();
        let mut stale = order("a@x.io", 7_250_000);
        stale.expires_at = Utc::now() - Duration::minutes(1);
        OrderStore::insert(&ledger, &stale).await.unwrap();

        assert_eq!(ledger.fail_expired(Utc::now()).await.unwrap(), 1);
        assert!(!ledger.pending_amount_exists(7_250_000).await.unwrap());
        let swept = OrderStore::get(&ledger, &stale.id).await.unwrap().unwrap();
        assert_eq!(swept.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn reserve_balance_is_conditional() {
        let ledger = MemoryLedger::new();
        let mut user = User::new("a@x.io");
        user.balance_micros = 50_000_000;
        ledger.insert_user(&user).await.unwrap();

        assert!(ledger.reserve_balance("a@x.io", 30_000_000).await.unwrap());
        assert!(!ledger.reserve_balance("a@x.io", 30_000_000).await.unwrap());

        let user = ledger.get_by_email("a@x.io").await.unwrap().unwrap();
        assert_eq!(user.balance_micros, 20_000_000);
    }

    #[tokio::test]
    async fn one_time_bonus_is_consumed_once() {
        let ledger = MemoryLedger::new();
        ledger.insert_user(&User::new("a@x.io")).await.unwrap();

        assert!(ledger.consume_one_time_bonus("a@x.io").await.unwrap());
        assert!(!ledger.consume_one_time_bonus("a@x.io").await.unwrap());
    }

    #[tokio::test]
    async fn single_pending_withdrawal_per_user() {
        let ledger = MemoryLedger::new();
        let first = Transaction::new(
            "a@x.io",
            TransactionType::Withdrawal,
            15_000_000,
            TransactionStatus::Pending,
        );
        TransactionStore::insert(&ledger, &first).await.unwrap();

        let second = Transaction::new(
            "a@x.io",
            TransactionType::Withdrawal,
            20_000_000,
            TransactionStatus::Pending,
        );
        let err = TransactionStore::insert(&ledger, &second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict));

        // resolving the first frees the slot
        assert!(ledger.fail_if_pending(&first.id).await.unwrap());
        TransactionStore::insert(&ledger, &second).await.unwrap();
    }
}
