use async_trait::async_trait;
use anyhow::bail;

use crate::models::payments::AddressResponse;

/// Address generation against the payment network. One call per allocation;
/// a failure here means no order is persisted.
#[async_trait]
pub trait AddressProvider: Send + Sync {
    async fn new_address(&self, coin: &str) -> Result<String, anyhow::Error>;
}

pub struct PaymentGatewayApi {
    api_key: String,
    url: String,
    client: reqwest::Client,
}

impl PaymentGatewayApi {
    pub fn new(api_key: String, url: String) -> Self {
        Self {
            api_key,
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AddressProvider for PaymentGatewayApi {
    async fn new_address(&self, coin: &str) -> Result<String, anyhow::Error> {
        let response = self
            .client
            .post(format!("{}/new_address?crypto={}", self.url, coin))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("Gateway: address generation failed ({})", response.status());
        }

        let body: AddressResponse = response.json().await?;
        if body.address.is_empty() {
            bail!("Gateway: bad response format.");
        }

        Ok(body.address)
    }
}
