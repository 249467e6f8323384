use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Yield,
    Tier,
    Bonus,
}

impl TransactionType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Yield => "yield",
            TransactionType::Tier => "tier",
            TransactionType::Bonus => "bonus",
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "yield" => Ok(TransactionType::Yield),
            "tier" => Ok(TransactionType::Tier),
            "bonus" => Ok(TransactionType::Bonus),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// Ledger entry. Once completed or failed the record is immutable except for
/// the external transaction reference backfill.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Transaction {
    pub id: String,
    pub email: String,
    pub tx_type: TransactionType,
    pub amount_micros: i64,
    pub status: TransactionStatus,
    pub external_txid: Option<String>,
    pub wallet_address: Option<String>,
    pub image: Option<String>,
    pub date: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        email: &str,
        tx_type: TransactionType,
        amount_micros: i64,
        status: TransactionStatus,
    ) -> Self {
        Transaction {
            id: Uuid::new_v4().hyphenated().to_string(),
            email: email.to_string(),
            tx_type,
            amount_micros,
            status,
            external_txid: None,
            wallet_address: None,
            image: None,
            date: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceAction {
    Add,
    Minus,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WithdrawRequest {
    pub email: String,
    pub wallet_address: String,
    pub amount: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SettleRequest {
    pub email: String,
    pub status: TransactionStatus,
    pub amount: Option<f64>,
    pub action: Option<BalanceAction>,
    pub image: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct HistoryPage {
    pub transactions: Vec<Transaction>,
    pub page: i64,
    pub total: i64,
    pub total_pages: i64,
    pub balance: f64,
}
