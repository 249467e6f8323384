use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub balance_micros: i64,
    pub total_deposit_micros: i64,
    pub total_withdraw_micros: i64,
    pub total_yield_micros: i64,
    pub one_time_bonus: bool,
    pub bot_active: bool,
    pub withdrawal_wallet_address: Option<String>,
    pub withdrawal_wallet_micros: Option<i64>,
    pub spin_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: &str) -> Self {
        let now = Utc::now();

        User {
            id: Uuid::new_v4().hyphenated().to_string(),
            email: email.to_string(),
            balance_micros: 0,
            total_deposit_micros: 0,
            total_withdraw_micros: 0,
            total_yield_micros: 0,
            one_time_bonus: true,
            bot_active: true,
            withdrawal_wallet_address: None,
            withdrawal_wallet_micros: None,
            spin_started_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
