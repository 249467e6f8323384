use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::StoreError;
use crate::models::transactions::{Transaction, TransactionStatus, TransactionType};

/// Transaction ledger. The store enforces the one-pending-withdrawal-per-user
/// rule; `insert` of a second pending withdrawal reports `Conflict`.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, tx: &Transaction) -> Result<(), StoreError>;
    async fn get(&self, id: &str) -> Result<Option<Transaction>, StoreError>;
    async fn get_for_owner(&self, id: &str, email: &str)
        -> Result<Option<Transaction>, StoreError>;
    async fn has_pending_withdrawal(&self, email: &str) -> Result<bool, StoreError>;

    /// Conditional pending -> completed transition.
    async fn complete_if_pending(&self, id: &str) -> Result<bool, StoreError>;

    /// Conditional pending -> failed transition.
    async fn fail_if_pending(&self, id: &str) -> Result<bool, StoreError>;

    /// Backfill the on-chain proof. Allowed on any status; everything else on
    /// a settled record is immutable.
    async fn set_external_ref(&self, id: &str, txid: &str) -> Result<(), StoreError>;

    async fn set_image(&self, id: &str, image: &str) -> Result<(), StoreError>;

    async fn list_for_owner(
        &self,
        email: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, StoreError>;
    async fn count_for_owner(&self, email: &str) -> Result<i64, StoreError>;
}

#[derive(Clone)]
pub struct TransactionRepository {
    conn: PgPool,
}

impl TransactionRepository {
    pub fn new(conn: PgPool) -> Self {
        TransactionRepository { conn }
    }
}

fn row_to_transaction(row: &PgRow) -> Result<Transaction, StoreError> {
    let tx_type: String = row.try_get("tx_type")?;
    let status: String = row.try_get("status")?;

    Ok(Transaction {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        tx_type: tx_type
            .parse::<TransactionType>()
            .map_err(StoreError::Backend)?,
        amount_micros: row.try_get("amount_micros")?,
        status: status
            .parse::<TransactionStatus>()
            .map_err(StoreError::Backend)?,
        external_txid: row.try_get("external_txid")?,
        wallet_address: row.try_get("wallet_address")?,
        image: row.try_get("image")?,
        date: row.try_get("date")?,
    })
}

#[async_trait]
impl TransactionStore for TransactionRepository {
    async fn insert(&self, tx: &Transaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO transactions
            (id, email, tx_type, amount_micros, status, external_txid,
             wallet_address, image, date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(&tx.id)
        .bind(&tx.email)
        .bind(tx.tx_type.as_str())
        .bind(tx.amount_micros)
        .bind(tx.status.as_str())
        .bind(&tx.external_txid)
        .bind(&tx.wallet_address)
        .bind(&tx.image)
        .bind(tx.date)
        .execute(&self.conn)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.conn)
            .await?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn get_for_owner(
        &self,
        id: &str,
        email: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query("SELECT * FROM transactions WHERE id = $1 AND email = $2")
            .bind(id)
            .bind(email)
            .fetch_optional(&self.conn)
            .await?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn has_pending_withdrawal(&self, email: &str) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(1) FROM transactions
            WHERE email = $1 AND tx_type = 'withdrawal' AND status = 'pending'"#,
        )
        .bind(email)
        .fetch_one(&self.conn)
        .await?;

        Ok(count > 0)
    }

    async fn complete_if_pending(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE transactions SET status = 'completed' WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail_if_pending(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE transactions SET status = 'failed' WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_external_ref(&self, id: &str, txid: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE transactions SET external_txid = $2 WHERE id = $1")
            .bind(id)
            .bind(txid)
            .execute(&self.conn)
            .await?;

        Ok(())
    }

    async fn set_image(&self, id: &str, image: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE transactions SET image = $2 WHERE id = $1")
            .bind(id)
            .bind(image)
            .execute(&self.conn)
            .await?;

        Ok(())
    }

    async fn list_for_owner(
        &self,
        email: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT * FROM transactions
            WHERE email = $1 ORDER BY date DESC LIMIT $2 OFFSET $3"#,
        )
        .bind(email)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.conn)
        .await?;

        rows.iter().map(row_to_transaction).collect()
    }

    async fn count_for_owner(&self, email: &str) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM transactions WHERE email = $1")
            .bind(email)
            .fetch_one(&self.conn)
            .await?;

        Ok(count)
    }
}
