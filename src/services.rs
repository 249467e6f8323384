use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::mpsc;

use crate::repositories::admin::{AdminRepository, AdminStore};
use crate::repositories::crew::CrewApi;
use crate::repositories::gateway::{AddressProvider, PaymentGatewayApi};
use crate::repositories::mailer::MailerApi;
use crate::repositories::orders::{OrderRepository, OrderStore};
use crate::repositories::transactions::{TransactionRepository, TransactionStore};
use crate::repositories::users::{UserRepository, UserStore};
use crate::repositories::StoreError;
use crate::settings::Settings;

pub mod crew;
pub mod earnings;
pub mod http;
pub mod notify;
pub mod orders;
pub mod reconciliation;
pub mod settlement;
pub mod transactions;

#[cfg(test)]
pub mod testing;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("Your account has been suspended. Please visit customer care.")]
    AccountSuspended,
    #[error("{0}")]
    TimeWindowViolation(String),
    #[error("Minimum withdrawal is ${0:.2}")]
    BelowMinimum(f64),
    #[error("Insufficient balance for withdrawal")]
    InsufficientBalance,
    #[error("You have a pending withdrawal request. Please wait for it to be processed before making another request.")]
    DuplicatePendingRequest,
    #[error("Time for the next spin has not elapsed. Please try again later.")]
    CooldownActive,
    #[error("Amount and action are required when completing a transaction")]
    MissingSettlementFields,
    #[error("Invalid transaction type")]
    InvalidTransactionType,
    #[error("Could not allocate a unique payable amount. Please try again.")]
    AllocationExhausted,
    #[error("External service error: {0} => {1}")]
    ExternalService(String, String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Communication error: {0}")]
    Communication(String),
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

pub async fn start_services(
    pool: PgPool,
    settings: Settings,
    listen: &str,
) -> Result<(), anyhow::Error> {
    let (order_tx, mut order_rx) = mpsc::channel(512);
    let (reconcile_tx, mut reconcile_rx) = mpsc::channel(512);
    let (transaction_tx, mut transaction_rx) = mpsc::channel(512);
    let (settlement_tx, mut settlement_rx) = mpsc::channel(512);
    let (earnings_tx, mut earnings_rx) = mpsc::channel(512);
    let (crew_tx, mut crew_rx) = mpsc::channel(512);
    let (notify_tx, mut notify_rx) = mpsc::channel(512);

    let users: Arc<dyn UserStore> = Arc::new(UserRepository::new(pool.clone()));
    let orders: Arc<dyn OrderStore> = Arc::new(OrderRepository::new(pool.clone()));
    let transactions: Arc<dyn TransactionStore> = Arc::new(TransactionRepository::new(pool.clone()));
    let admin: Arc<dyn AdminStore> = Arc::new(AdminRepository::new(pool.clone()));
    let gateway: Arc<dyn AddressProvider> = Arc::new(PaymentGatewayApi::new(
        settings.payments.api_key.clone(),
        settings.payments.url.clone(),
    ));

    println!("[*] Starting crew service.");
    let mut crew_service = crew::CrewService::new();
    let crew_api = CrewApi::new(settings.crew.auth_token, settings.crew.url);
    tokio::spawn(async move {
        crew_service
            .run(crew::CrewRequestHandler::new(crew_api), &mut crew_rx)
            .await;
    });

    println!("[*] Starting notification service.");
    let mut notify_service = notify::NotifyService::new();
    let mailer = MailerApi::new(
        settings.mailer.auth_token,
        settings.mailer.url,
        settings.mailer.operator_email,
    );
    tokio::spawn(async move {
        notify_service
            .run(notify::NotifyRequestHandler::new(mailer), &mut notify_rx)
            .await;
    });

    println!("[*] Starting order service.");
    let mut order_service = orders::OrderService::new();
    let order_users = users.clone();
    let order_store = orders.clone();
    tokio::spawn(async move {
        let handler = orders::OrderRequestHandler::new(order_users, order_store, gateway);
        handler.start_expiry_sweep();
        order_service.run(handler, &mut order_rx).await;
    });

    println!("[*] Starting reconciliation service.");
    let mut reconcile_service = reconciliation::ReconciliationService::new();
    let reconcile_handler = reconciliation::ReconcileRequestHandler::new(
        users.clone(),
        orders.clone(),
        transactions.clone(),
        admin.clone(),
        crew_tx.clone(),
        notify_tx.clone(),
    );
    tokio::spawn(async move {
        reconcile_service
            .run(reconcile_handler, &mut reconcile_rx)
            .await;
    });

    println!("[*] Starting transaction service.");
    let mut transaction_service = transactions::TransactionService::new();
    let transaction_handler = transactions::TransactionRequestHandler::new(
        users.clone(),
        orders.clone(),
        transactions.clone(),
        notify_tx.clone(),
        transactions::WithdrawalPolicy::from_settings(&settings.withdrawals),
    );
    tokio::spawn(async move {
        transaction_service
            .run(transaction_handler, &mut transaction_rx)
            .await;
    });

    println!("[*] Starting settlement service.");
    let mut settlement_service = settlement::SettlementService::new();
    let settlement_handler = settlement::SettlementRequestHandler::new(
        users.clone(),
        transactions.clone(),
        admin.clone(),
        crew_tx.clone(),
        notify_tx.clone(),
    );
    tokio::spawn(async move {
        settlement_service
            .run(settlement_handler, &mut settlement_rx)
            .await;
    });

    println!("[*] Starting earnings service.");
    let mut earnings_service = earnings::EarningsService::new();
    let earnings_handler = earnings::EarningsRequestHandler::new(users, transactions);
    tokio::spawn(async move {
        earnings_service.run(earnings_handler, &mut earnings_rx).await;
    });

    println!("[*] Starting HTTP server.");
    http::start_http_server(
        http::AppChannels {
            order_channel: order_tx,
            reconcile_channel: reconcile_tx,
            transaction_channel: transaction_tx,
            settlement_channel: settlement_tx,
            earnings_channel: earnings_tx,
        },
        settings.payments.callback_secret,
        listen,
    )
    .await?;

    Ok(())
}
