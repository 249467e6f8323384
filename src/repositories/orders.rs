use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::StoreError;
use crate::models::orders::{OrderStatus, PaymentOrder};

/// Pending payment orders. The store itself enforces that at most one
/// pending order holds a given atomic amount; `insert` reports the collision
/// as `StoreError::Conflict`.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: &PaymentOrder) -> Result<(), StoreError>;
    async fn get(&self, id: &str) -> Result<Option<PaymentOrder>, StoreError>;
    async fn pending_amount_exists(&self, atomic_amount: i64) -> Result<bool, StoreError>;

    /// Pending, unexpired order carrying exactly this atomic amount.
    async fn find_claimable(
        &self,
        atomic_amount: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentOrder>, StoreError>;

    /// Transition pending -> completed and record the on-chain proof.
    /// Returns false when the order was not pending anymore; the caller must
    /// then treat the notification as already processed.
    async fn claim_pending(
        &self,
        id: &str,
        external_txid: &str,
        external_addr: &str,
    ) -> Result<bool, StoreError>;

    async fn set_reference(&self, id: &str, reference_id: &str) -> Result<(), StoreError>;

    /// Fail pending orders whose deadline has passed, freeing their atomic
    /// amounts for reuse. Returns how many were swept.
    async fn fail_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[derive(Clone)]
pub struct OrderRepository {
    conn: PgPool,
}

impl OrderRepository {
    pub fn new(conn: PgPool) -> Self {
        OrderRepository { conn }
    }
}

fn row_to_order(row: &PgRow) -> Result<PaymentOrder, StoreError> {
    let status: String = row.try_get("status")?;

    Ok(PaymentOrder {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        atomic_amount: row.try_get("atomic_amount")?,
        display_amount: row.try_get("display_amount")?,
        coin: row.try_get("coin")?,
        address: row.try_get("address")?,
        status: status.parse::<OrderStatus>().map_err(StoreError::Backend)?,
        reference_id: row.try_get("reference_id")?,
        external_txid: row.try_get("external_txid")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl OrderStore for OrderRepository {
    async fn insert(&self, order: &PaymentOrder) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO payment_orders
            (id, email, atomic_amount, display_amount, coin, address, status,
             reference_id, external_txid, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"#,
        )
        .bind(&order.id)
        .bind(&order.email)
        .bind(order.atomic_amount)
        .bind(order.display_amount)
        .bind(&order.coin)
        .bind(&order.address)
        .bind(order.status.as_str())
        .bind(&order.reference_id)
        .bind(&order.external_txid)
        .bind(order.expires_at)
        .bind(order.created_at)
        .execute(&self.conn)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<PaymentOrder>, StoreError> {
        let row = sqlx::query("SELECT * FROM payment_orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.conn)
            .await?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn pending_amount_exists(&self, atomic_amount: i64) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM payment_orders WHERE atomic_amount = $1 AND status = 'pending'",
        )
        .bind(atomic_amount)
        .fetch_one(&self.conn)
        .await?;

        Ok(count > 0)
    }

    async fn find_claimable(
        &self,
        atomic_amount: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentOrder>, StoreError> {
        let row = sqlx::query(
            r#"SELECT * FROM payment_orders
            WHERE atomic_amount = $1 AND status = 'pending' AND expires_at > $2"#,
        )
        .bind(atomic_amount)
        .bind(now)
        .fetch_optional(&self.conn)
        .await?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn claim_pending(
        &self,
        id: &str,
        external_txid: &str,
        external_addr: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"UPDATE payment_orders
            SET status = 'completed', external_txid = $2, address = $3
            WHERE id = $1 AND status = 'pending'"#,
        )
        .bind(id)
        .bind(external_txid)
        .bind(external_addr)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_reference(&self, id: &str, reference_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE payment_orders SET reference_id = $2 WHERE id = $1")
            .bind(id)
            .bind(reference_id)
            .execute(&self.conn)
            .await?;

        Ok(())
    }

    async fn fail_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE payment_orders SET status = 'failed' WHERE status = 'pending' AND expires_at <= $1",
        )
        .bind(now)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected())
    }
}
