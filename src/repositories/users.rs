use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::StoreError;
use crate::models::users::User;

/// User-facing monetary fields. Every mutation is a single conditional
/// statement so concurrent handlers are serialized by the store, never by an
/// in-process lock.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Debit `amount_micros` only if the balance covers it. Returns whether
    /// the reservation was taken.
    async fn reserve_balance(&self, email: &str, amount_micros: i64) -> Result<bool, StoreError>;

    /// Credit the balance alone (withdrawal refunds, instant rewards).
    async fn credit_balance(&self, email: &str, amount_micros: i64) -> Result<(), StoreError>;

    /// Credit the balance and lifetime deposit total.
    async fn credit_deposit(&self, email: &str, amount_micros: i64) -> Result<(), StoreError>;

    /// Credit the balance and lifetime yield total.
    async fn credit_yield(&self, email: &str, amount_micros: i64) -> Result<(), StoreError>;

    /// Bump the lifetime withdrawal total. The balance itself was already
    /// reserved at admission time.
    async fn add_total_withdraw(&self, email: &str, amount_micros: i64) -> Result<(), StoreError>;

    /// Clear the first-deposit bonus flag. Returns true for exactly one
    /// caller over the user's lifetime.
    async fn consume_one_time_bonus(&self, email: &str) -> Result<bool, StoreError>;

    /// Record the requested destination and amount for operator reference.
    async fn set_withdrawal_wallet(
        &self,
        email: &str,
        address: &str,
        amount_micros: i64,
    ) -> Result<(), StoreError>;

    /// Claim the daily spin slot if the cooldown has elapsed.
    async fn claim_spin(
        &self,
        email: &str,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<bool, StoreError>;
}

#[derive(Clone)]
pub struct UserRepository {
    conn: PgPool,
}

impl UserRepository {
    pub fn new(conn: PgPool) -> Self {
        UserRepository { conn }
    }
}

fn row_to_user(row: &PgRow) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        balance_micros: row.try_get("balance_micros")?,
        total_deposit_micros: row.try_get("total_deposit_micros")?,
        total_withdraw_micros: row.try_get("total_withdraw_micros")?,
        total_yield_micros: row.try_get("total_yield_micros")?,
        one_time_bonus: row.try_get("one_time_bonus")?,
        bot_active: row.try_get("bot_active")?,
        withdrawal_wallet_address: row.try_get("withdrawal_wallet_address")?,
        withdrawal_wallet_micros: row.try_get("withdrawal_wallet_micros")?,
        spin_started_at: row.try_get("spin_started_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl UserStore for UserRepository {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO users
            (id, email, balance_micros, total_deposit_micros, total_withdraw_micros,
             total_yield_micros, one_time_bonus, bot_active, withdrawal_wallet_address,
             withdrawal_wallet_micros, spin_started_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(user.balance_micros)
        .bind(user.total_deposit_micros)
        .bind(user.total_withdraw_micros)
        .bind(user.total_yield_micros)
        .bind(user.one_time_bonus)
        .bind(user.bot_active)
        .bind(&user.withdrawal_wallet_address)
        .bind(user.withdrawal_wallet_micros)
        .bind(user.spin_started_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.conn)
        .await?;

        Ok(())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.conn)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn reserve_balance(&self, email: &str, amount_micros: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"UPDATE users
            SET balance_micros = balance_micros - $2, updated_at = now()
            WHERE email = $1 AND balance_micros >= $2"#,
        )
        .bind(email)
        .bind(amount_micros)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn credit_balance(&self, email: &str, amount_micros: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE users
            SET balance_micros = balance_micros + $2, updated_at = now()
            WHERE email = $1"#,
        )
        .bind(email)
        .bind(amount_micros)
        .execute(&self.conn)
        .await?;

        Ok(())
    }

    async fn credit_deposit(&self, email: &str, amount_micros: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE users
            SET balance_micros = balance_micros + $2,
                total_deposit_micros = total_deposit_micros + $2,
                updated_at = now()
            WHERE email = $1"#,
        )
        .bind(email)
        .bind(amount_micros)
        .execute(&self.conn)
        .await?;

        Ok(())
    }

    async fn credit_yield(&self, email: &str, amount_micros: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE users
            SET balance_micros = balance_micros + $2,
                total_yield_micros = total_yield_micros + $2,
                updated_at = now()
            WHERE email = $1"#,
        )
        .bind(email)
        .bind(amount_micros)
        .execute(&self.conn)
        .await?;

        Ok(())
    }

    async fn add_total_withdraw(&self, email: &str, amount_micros: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE users
            SET total_withdraw_micros = total_withdraw_micros + $2, updated_at = now()
            WHERE email = $1"#,
        )
        .bind(email)
        .bind(amount_micros)
        .execute(&self.conn)
        .await?;

        Ok(())
    }

    async fn consume_one_time_bonus(&self, email: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"UPDATE users
            SET one_time_bonus = FALSE, updated_at = now()
            WHERE email = $1 AND one_time_bonus"#,
        )
        .bind(email)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_withdrawal_wallet(
        &self,
        email: &str,
        address: &str,
        amount_micros: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE users
            SET withdrawal_wallet_address = $2, withdrawal_wallet_micros = $3,
                updated_at = now()
            WHERE email = $1"#,
        )
        .bind(email)
        .bind(address)
        .bind(amount_micros)
        .execute(&self.conn)
        .await?;

        Ok(())
    }

    async fn claim_spin(
        &self,
        email: &str,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<bool, StoreError> {
        let threshold = now - cooldown;
        let result = sqlx::query(
            r#"UPDATE users
            SET spin_started_at = $2, updated_at = now()
            WHERE email = $1 AND (spin_started_at IS NULL OR spin_started_at <= $3)"#,
        )
        .bind(email)
        .bind(now)
        .bind(threshold)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
