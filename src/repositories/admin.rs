use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::StoreError;
use crate::models::admin::AdminTotals;

/// Singleton platform totals. Writers use the same conditional-increment
/// statement rather than read-modify-write.
#[async_trait]
pub trait AdminStore: Send + Sync {
    async fn add_deposit(&self, amount_micros: i64) -> Result<(), StoreError>;
    async fn add_withdraw(&self, amount_micros: i64) -> Result<(), StoreError>;
    async fn totals(&self) -> Result<AdminTotals, StoreError>;
}

#[derive(Clone)]
pub struct AdminRepository {
    conn: PgPool,
}

impl AdminRepository {
    pub fn new(conn: PgPool) -> Self {
        AdminRepository { conn }
    }
}

#[async_trait]
impl AdminStore for AdminRepository {
    async fn add_deposit(&self, amount_micros: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE admin_totals SET total_deposit_micros = total_deposit_micros + $1 WHERE id = 1",
        )
        .bind(amount_micros)
        .execute(&self.conn)
        .await?;

        Ok(())
    }

    async fn add_withdraw(&self, amount_micros: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE admin_totals SET total_withdraw_micros = total_withdraw_micros + $1 WHERE id = 1",
        )
        .bind(amount_micros)
        .execute(&self.conn)
        .await?;

        Ok(())
    }

    async fn totals(&self) -> Result<AdminTotals, StoreError> {
        let row = sqlx::query(
            "SELECT total_deposit_micros, total_withdraw_micros FROM admin_totals WHERE id = 1",
        )
        .fetch_one(&self.conn)
        .await?;

        Ok(AdminTotals {
            total_deposit_micros: row.try_get("total_deposit_micros")?,
            total_withdraw_micros: row.try_get("total_withdraw_micros")?,
        })
    }
}
