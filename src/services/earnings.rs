use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::transactions::{Transaction, TransactionStatus, TransactionType};
use crate::repositories::transactions::TransactionStore;
use crate::repositories::users::UserStore;
use crate::utils;

pub const SPIN_REWARD: f64 = 0.01;
const SPIN_COOLDOWN_HOURS: i64 = 24;

pub enum EarningsRequest {
    AccrueYield {
        email: String,
        amount: f64,
        response: oneshot::Sender<Result<f64, ServiceError>>,
    },
    PurchaseTier {
        email: String,
        amount: f64,
        response: oneshot::Sender<Result<f64, ServiceError>>,
    },
    SpinReward {
        email: String,
        response: oneshot::Sender<Result<f64, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct EarningsRequestHandler {
    users: Arc<dyn UserStore>,
    transactions: Arc<dyn TransactionStore>,
}

impl EarningsRequestHandler {
    pub fn new(users: Arc<dyn UserStore>, transactions: Arc<dyn TransactionStore>) -> Self {
        EarningsRequestHandler {
            users,
            transactions,
        }
    }

    async fn require_active(&self, email: &str) -> Result<(), ServiceError> {
        let user = self
            .users
            .get_by_email(email)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;

        if !user.bot_active {
            return Err(ServiceError::AccountSuspended);
        }
        Ok(())
    }

    async fn balance_of(&self, email: &str) -> Result<f64, ServiceError> {
        let user = self
            .users
            .get_by_email(email)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))?;

        Ok(utils::to_display(user.balance_micros))
    }

    pub async fn accrue_yield(&self, email: &str, amount: f64) -> Result<f64, ServiceError> {
        self.require_active(email).await?;

        let amount_micros = utils::to_micros(amount);
        self.users.credit_yield(email, amount_micros).await?;

        let transaction = Transaction::new(
            email,
            TransactionType::Yield,
            amount_micros,
            TransactionStatus::Completed,
        );
        self.transactions.insert(&transaction).await?;

        self.balance_of(email).await
    }

    pub async fn purchase_tier(&self, email: &str, amount: f64) -> Result<f64, ServiceError> {
        self.require_active(email).await?;

        let amount_micros = utils::to_micros(amount);
        if !self.users.reserve_balance(email, amount_micros).await? {
            return Err(ServiceError::InsufficientBalance);
        }

        let transaction = Transaction::new(
            email,
            TransactionType::Tier,
            amount_micros,
            TransactionStatus::Completed,
        );
        self.transactions.insert(&transaction).await?;

        self.balance_of(email).await
    }

    pub async fn spin_reward(&self, email: &str) -> Result<f64, ServiceError> {
        self.require_active(email).await?;

        let claimed = self
            .users
            .claim_spin(email, Utc::now(), Duration::hours(SPIN_COOLDOWN_HOURS))
            .await?;
        if !claimed {
            return Err(ServiceError::CooldownActive);
        }

        let amount_micros = utils::to_micros(SPIN_REWARD);
        self.users.credit_balance(email, amount_micros).await?;

        let transaction = Transaction::new(
            email,
            TransactionType::Bonus,
            amount_micros,
            TransactionStatus::Completed,
        );
        self.transactions.insert(&transaction).await?;

        self.balance_of(email).await
    }
}

#[async_trait]
impl RequestHandler<EarningsRequest> for EarningsRequestHandler {
    async fn handle_request(&self, request: EarningsRequest) {
        match request {
            EarningsRequest::AccrueYield {
                email,
                amount,
                response,
            } => {
                let result = self.accrue_yield(&email, amount).await;
                let _ = response.send(result);
            }
            EarningsRequest::PurchaseTier {
                email,
                amount,
                response,
            } => {
                let result = self.purchase_tier(&email, amount).await;
                let _ = response.send(result);
            }
            EarningsRequest::SpinReward { email, response } => {
                let result = self.spin_reward(&email).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct EarningsService;

impl EarningsService {
    pub fn new() -> Self {
        EarningsService {}
    }
}

#[async_trait]
impl Service<EarningsRequest, EarningsRequestHandler> for EarningsService {}
