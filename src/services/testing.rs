//! Shared fixtures for service tests: an in-memory ledger plus recording
//! stand-ins for the crew and notification services.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::crew::CrewRequest;
use super::notify::NotifyRequest;
use super::transactions::WithdrawalPolicy;
use super::ServiceError;
use crate::models::users::User;
use crate::repositories::gateway::AddressProvider;
use crate::repositories::memory::MemoryLedger;
use crate::repositories::users::UserStore;

pub type CrewLog = Arc<Mutex<Vec<CrewRequest>>>;
pub type NotifyLog = Arc<Mutex<Vec<String>>>;

pub fn ledger() -> Arc<MemoryLedger> {
    Arc::new(MemoryLedger::new())
}

pub async fn seed_user(ledger: &Arc<MemoryLedger>, email: &str, balance_micros: i64) -> User {
    let mut user = User::new(email);
    user.balance_micros = balance_micros;
    ledger.insert_user(&user).await.unwrap();
    user
}

pub async fn seed_suspended_user(ledger: &Arc<MemoryLedger>, email: &str) -> User {
    let mut user = User::new(email);
    user.bot_active = false;
    ledger.insert_user(&user).await.unwrap();
    user
}

pub fn policy() -> WithdrawalPolicy {
    WithdrawalPolicy::from_settings(&crate::settings::Withdrawals {
        min_amount: 12.0,
        open_hour: 9,
        close_hour: 17,
        utc_offset_hours: 1,
    })
}

/// Consume crew requests into an inspectable log.
pub fn spawn_crew_recorder() -> (mpsc::Sender<CrewRequest>, CrewLog) {
    let (tx, mut rx) = mpsc::channel(64);
    let log: CrewLog = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();

    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            sink.lock().unwrap().push(request);
        }
    });

    (tx, log)
}

/// Consume notification requests. Review notices are logged as
/// `review:<type>:<email>`; settlement notices are acked with Ok or, when
/// `fail_settlement` is set, with a mailer failure.
pub fn spawn_notify_stub(fail_settlement: bool) -> (mpsc::Sender<NotifyRequest>, NotifyLog) {
    let (tx, mut rx) = mpsc::channel(64);
    let log: NotifyLog = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();

    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            match request {
                NotifyRequest::Review {
                    email, tx_type, ..
                } => {
                    sink.lock()
                        .unwrap()
                        .push(format!("review:{}:{}", tx_type.as_str(), email));
                }
                NotifyRequest::SettlementStatus {
                    email,
                    decision,
                    ack,
                    ..
                } => {
                    sink.lock()
                        .unwrap()
                        .push(format!("settlement:{}:{}", decision.as_str(), email));
                    let result = if fail_settlement {
                        Err(ServiceError::ExternalService(
                            "Mailer".to_string(),
                            "delivery failed".to_string(),
                        ))
                    } else {
                        Ok(())
                    };
                    let _ = ack.send(result);
                }
            }
        }
    });

    (tx, log)
}

/// Let the recorder tasks drain their channels before asserting on the logs.
pub async fn settle_events() {
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
}

struct StaticGateway(String);

#[async_trait::async_trait]
impl AddressProvider for StaticGateway {
    async fn new_address(&self, _coin: &str) -> Result<String, anyhow::Error> {
        Ok(self.0.clone())
    }
}

struct FailingGateway;

#[async_trait::async_trait]
impl AddressProvider for FailingGateway {
    async fn new_address(&self, _coin: &str) -> Result<String, anyhow::Error> {
        anyhow::bail!("gateway unavailable")
    }
}

pub fn static_gateway(address: &str) -> Arc<dyn AddressProvider> {
    Arc::new(StaticGateway(address.to_string()))
}

pub fn failing_gateway() -> Arc<dyn AddressProvider> {
    Arc::new(FailingGateway)
}
