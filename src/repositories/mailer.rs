use anyhow::bail;
use serde_json::json;

use crate::models::transactions::TransactionType;

/// Relay client for transactional mail. The operator copy goes to the
/// configured platform mailbox; delivery outcomes are reported to callers so
/// the settlement path can refuse to proceed without a confirmed send.
pub struct MailerApi {
    auth_token: String,
    url: String,
    operator_email: String,
    client: reqwest::Client,
}

impl MailerApi {
    pub fn new(auth_token: String, url: String, operator_email: String) -> Self {
        Self {
            auth_token,
            url,
            operator_email,
            client: reqwest::Client::new(),
        }
    }

    pub async fn send_review(
        &self,
        recipient: &str,
        amount: f64,
        transaction_id: &str,
        tx_type: TransactionType,
    ) -> Result<(), anyhow::Error> {
        let payload = json!({
            "to": self.operator_email,
            "recipient": recipient,
            "amount": amount,
            "transactionID": transaction_id,
            "type": tx_type.as_str(),
        });

        let response = self
            .client
            .post(format!("{}/send", self.url))
            .bearer_auth(&self.auth_token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("Mailer: review send failed ({})", response.status());
        }

        Ok(())
    }

    pub async fn send_settlement_status(
        &self,
        recipient: &str,
        amount: f64,
        transaction_id: &str,
        tx_type: TransactionType,
        decision: &str,
        reason: &str,
    ) -> Result<(), anyhow::Error> {
        let payload = json!({
            "to": recipient,
            "recipient": recipient,
            "amount": amount,
            "transactionID": transaction_id,
            "type": tx_type.as_str(),
            "decision": decision,
            "reason": reason,
        });

        let response = self
            .client
            .post(format!("{}/transaction-status", self.url))
            .bearer_auth(&self.auth_token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("Mailer: status send failed ({})", response.status());
        }

        Ok(())
    }
}
