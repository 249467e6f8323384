use async_trait::async_trait;

use super::{RequestHandler, Service};
use crate::repositories::crew::CrewApi;

/// One-directional event notifications to the referral service. Each request
/// represents exactly one completed financial event; failures are logged and
/// never reach back into the ledger paths that produced them.
#[derive(Clone, Debug)]
pub enum CrewRequest {
    AwardFirstDepositBonus {
        user_id: String,
        amount: f64,
        reason: String,
    },
    UpdateRollup {
        user_id: String,
        kind: RollupKind,
        amount: f64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RollupKind {
    Deposit,
    Withdraw,
}

impl RollupKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RollupKind::Deposit => "deposit",
            RollupKind::Withdraw => "withdraw",
        }
    }
}

#[derive(Clone)]
pub struct CrewRequestHandler {
    api: std::sync::Arc<CrewApi>,
}

impl CrewRequestHandler {
    pub fn new(api: CrewApi) -> Self {
        CrewRequestHandler {
            api: std::sync::Arc::new(api),
        }
    }
}

#[async_trait]
impl RequestHandler<CrewRequest> for CrewRequestHandler {
    async fn handle_request(&self, request: CrewRequest) {
        match request {
            CrewRequest::AwardFirstDepositBonus {
                user_id,
                amount,
                reason,
            } => {
                if let Err(e) = self.api.award_referral_bonus(&user_id, amount, &reason).await {
                    log::error!("Failed to award referral bonus for {}: {}", user_id, e);
                }
            }
            CrewRequest::UpdateRollup {
                user_id,
                kind,
                amount,
            } => {
                if let Err(e) = self
                    .api
                    .update_crew_on_transaction(&user_id, kind.as_str(), amount)
                    .await
                {
                    log::error!("Failed to update crew rollup for {}: {}", user_id, e);
                }
            }
        }
    }
}

pub struct CrewService;

impl CrewService {
    pub fn new() -> Self {
        CrewService {}
    }
}

#[async_trait]
impl Service<CrewRequest, CrewRequestHandler> for CrewService {}
