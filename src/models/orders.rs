use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Completed,
    Failed,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "completed" => Ok(OrderStatus::Completed),
            "failed" => Ok(OrderStatus::Failed),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

/// A reserved, time-bounded expectation of an incoming payment of a specific
/// atomic amount. The atomic amount is the exact-match key the webhook path
/// reconciles against.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PaymentOrder {
    pub id: String,
    pub email: String,
    pub atomic_amount: i64,
    pub display_amount: f64,
    pub coin: String,
    pub address: String,
    pub status: OrderStatus,
    pub reference_id: Option<String>,
    pub external_txid: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl PaymentOrder {
    pub fn new(email: &str, atomic_amount: i64, address: &str, expires_at: DateTime<Utc>) -> Self {
        PaymentOrder {
            id: Uuid::new_v4().hyphenated().to_string(),
            email: email.to_string(),
            atomic_amount,
            display_amount: utils::to_display(atomic_amount),
            coin: "USDT".to_string(),
            address: address.to_string(),
            status: OrderStatus::Pending,
            reference_id: None,
            external_txid: None,
            expires_at,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewOrder {
    pub email: String,
    pub amount: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClaimDeposit {
    pub email: String,
    pub order_id: String,
}
