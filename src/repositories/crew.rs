use anyhow::bail;
use serde_json::json;

/// Client for the crew (referral) service. Each call represents exactly one
/// completed financial event; the upline walk itself lives on the crew side.
pub struct CrewApi {
    auth_token: String,
    url: String,
    client: reqwest::Client,
}

impl CrewApi {
    pub fn new(auth_token: String, url: String) -> Self {
        Self {
            auth_token,
            url,
            client: reqwest::Client::new(),
        }
    }

    pub async fn award_referral_bonus(
        &self,
        user_id: &str,
        amount: f64,
        reason: &str,
    ) -> Result<(), anyhow::Error> {
        let payload = json!({
            "userID": user_id,
            "amount": amount,
            "reason": reason,
        });

        let response = self
            .client
            .post(format!("{}/bonus", self.url))
            .bearer_auth(&self.auth_token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("Crew: bonus award failed ({})", response.status());
        }

        Ok(())
    }

    pub async fn update_crew_on_transaction(
        &self,
        user_id: &str,
        kind: &str,
        amount: f64,
    ) -> Result<(), anyhow::Error> {
        let payload = json!({
            "userID": user_id,
            "kind": kind,
            "amount": amount,
        });

        let response = self
            .client
            .post(format!("{}/rollup", self.url))
            .bearer_auth(&self.auth_token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("Crew: rollup update failed ({})", response.status());
        }

        Ok(())
    }
}
