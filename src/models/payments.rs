use serde::{Deserialize, Serialize};

/// Fully-confirmed sentinel of the payment network's callback.
pub const CONFIRMED: i32 = 2;

/// Settlement currency accepted by the platform.
pub const SETTLEMENT_CURRENCY: &str = "USDT";

/// Inbound payment-network callback body. Fields are optional so the boundary
/// can reject malformed payloads without a transport error.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PaymentNotification {
    pub status: i32,
    pub addr: Option<String>,
    pub txid: Option<String>,
    pub value: Option<i64>,
    pub currency: Option<String>,
}

/// Response of the gateway's address-generation call.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AddressResponse {
    pub address: String,
}
