//! Pushes newly discovered products to the internal catalog API.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::models::Product;
use crate::traits::Notifier;
use crate::transport::StealthClient;

#[derive(Clone)]
pub struct CatalogPush {
    client: StealthClient,
    url: String,
    token: String,
}

impl CatalogPush {
    pub fn new(client: StealthClient, url: impl Into<String>, token: impl Into<String>) -> Self {
        let token = token.into();
        if token.is_empty() {
            warn!("Catalog push token not set - requests will carry an empty bearer token");
        }

        Self {
            client,
            url: url.into(),
            token,
        }
    }

    /// POSTs the product as JSON with the static bearer token. Any non-2xx
    /// answer is logged with its body and reported as an error.
    pub async fn push(&self, product: &Product) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(product)
            .send()
            .await
            .context("failed to send product to catalog API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, response = %body, "Failed to send product to API");
            bail!("catalog API returned status code: {}", status.as_u16());
        }

        info!(id = %product.id, url = %self.url, "Product pushed to catalog API");
        Ok(())
    }
}

#[async_trait]
impl Notifier for CatalogPush {
    fn name(&self) -> &'static str {
        "catalog-push"
    }

    async fn send(&self, product: &Product) -> Result<()> {
        self.push(product).await
    }
}
