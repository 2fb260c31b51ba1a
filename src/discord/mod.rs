//! # Discord Webhook Integration
//!
//! This module sends a rich Discord notification for every newly discovered
//! storefront product. Each message is a single embed with the product's
//! thumbnail, description, first variant and price, linking straight to the
//! product page.
//!
//! ## Discord Embed Structure
//!
//! Each notification includes:
//! - **Author**: "🎉 **New Product Alert!** 🎉"
//! - **Title**: Product title, linking to `<home_url>/products/<slug>`
//! - **Description**: The product's short description
//! - **Color**: Pink (`15277667`) for consistent branding
//! - **Thumbnail**: Product image in the top-right corner
//! - **Fields**: First variant id and its price (`$123.45`)
//! - **Footer**: "Unifi Store Monitor"
//! - **Timestamp**: When the notification was built
//!
//! ## Rate Limits
//!
//! Discord answers `429 Too Many Requests` when a webhook is hit too often.
//! The notifier waits and retries a bounded number of times (3 by default,
//! 5 seconds apart) before giving up and reporting the failure.
//!
//! ## Configuration
//!
//! The webhook URL comes from `discord_webhook_url` in `config.yml` or the
//! `DISCORD_WEBHOOK_URL` environment variable. If it is empty, notifications
//! are disabled but logged.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use tracing::{error, info, warn};

use crate::models::{
    DiscordAuthor, DiscordEmbed, DiscordField, DiscordFooter, DiscordMessage, DiscordThumbnail,
    Product,
};
use crate::traits::Notifier;
use crate::transport::StealthClient;

const EMBED_COLOR: u32 = 15_277_667;
const BOT_NAME: &str = "Unifi Store Monitor";
const ICON_URL: &str =
    "https://tse3.mm.bing.net/th?id=OIP.RadjPrUUrLwqfVTEI5YqmwHaIV&pid=Api&P=0&w=300&h=300";

/// Default wait after a `429` before trying again.
pub const RATE_LIMIT_DELAY: Duration = Duration::from_secs(5);

/// Default number of retries after a `429` before the send is reported as failed.
pub const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Discord webhook notification client for product discoveries.
///
/// This struct bundles the shared HTTP transport, the webhook URL and the
/// storefront home URL used to build product links.
///
/// ## Fields
///
/// - `client`: Shared browser-like transport used for every webhook request
/// - `webhook_url`: Optional Discord webhook URL, `None` when unconfigured
/// - `home_url`: Storefront home page, prefix of every product link
/// - `retry_delay` / `max_retries`: Rate-limit retry policy
///
/// ## Thread Safety
///
/// This struct is `Clone` and can be shared across async tasks. The underlying
/// `reqwest::Client` is designed for concurrent use.
#[derive(Clone)]
pub struct DiscordNotifier {
    client: StealthClient,

    /// If `None`, all notification attempts are skipped.
    webhook_url: Option<String>,

    home_url: String,
    retry_delay: Duration,
    max_retries: u32,
}

impl DiscordNotifier {
    /// Creates a new Discord notifier.
    ///
    /// An empty `webhook_url` disables notifications; the constructor logs a
    /// warning once and every later `send` succeeds without a request.
    ///
    /// ## Example
    ///
    /// ```rust,ignore
    /// let http = StealthClient::new()?;
    /// let notifier = DiscordNotifier::new(
    ///     http,
    ///     "https://discord.com/api/webhooks/{id}/{token}",
    ///     "https://store.ui.com/us/en",
    /// );
    /// ```
    pub fn new(
        client: StealthClient,
        webhook_url: impl Into<String>,
        home_url: impl Into<String>,
    ) -> Self {
        let webhook_url = Some(webhook_url.into()).filter(|url| !url.trim().is_empty());

        if webhook_url.is_none() {
            warn!("Discord webhook URL not set - Discord notifications will be disabled");
        }

        Self {
            client,
            webhook_url,
            home_url: home_url.into(),
            retry_delay: RATE_LIMIT_DELAY,
            max_retries: MAX_RATE_LIMIT_RETRIES,
        }
    }

    /// Overrides the rate-limit retry policy.
    #[cfg(test)]
    #[must_use]
    pub fn with_retry_policy(mut self, retry_delay: Duration, max_retries: u32) -> Self {
        self.retry_delay = retry_delay;
        self.max_retries = max_retries;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Link to the product page on the storefront.
    pub fn product_url(&self, product: &Product) -> String {
        format!(
            "{}/products/{}",
            self.home_url.trim_end_matches('/'),
            urlencoding::encode(&product.slug)
        )
    }

    /// Builds the webhook payload for `product`.
    ///
    /// Only the first variant is shown. Products without variants get
    /// `N/A` in both fields instead of failing the notification.
    pub fn build_message(&self, product: &Product) -> DiscordMessage {
        let (variant, price) = product.primary_variant().map_or_else(
            || ("N/A".to_string(), "N/A".to_string()),
            |v| (v.id.clone(), v.display_price.formatted()),
        );

        let embed = DiscordEmbed {
            title: product.title.clone(),
            color: EMBED_COLOR,
            url: self.product_url(product),
            timestamp: Utc::now().to_rfc3339(),
            thumbnail: DiscordThumbnail {
                url: product.thumbnail.url.clone(),
            },
            author: DiscordAuthor {
                name: "🎉 **New Product Alert!** 🎉".to_string(),
                icon_url: ICON_URL.to_string(),
            },
            description: format!("{}\n", product.short_description),
            fields: vec![
                DiscordField {
                    name: "Variant".to_string(),
                    value: variant,
                    inline: true,
                },
                DiscordField {
                    name: "Price".to_string(),
                    value: price,
                    inline: true,
                },
            ],
            footer: DiscordFooter {
                text: BOT_NAME.to_string(),
                icon_url: ICON_URL.to_string(),
            },
        };

        DiscordMessage {
            username: BOT_NAME.to_string(),
            avatar_url: ICON_URL.to_string(),
            embeds: vec![embed],
        }
    }

    /// Sends a Discord notification for a newly discovered product.
    ///
    /// ## Error Handling
    ///
    /// - **Missing webhook URL**: Silent skip, returns `Ok(())`
    /// - **`429 Too Many Requests`**: Waits `retry_delay` and retries, at most
    ///   `max_retries` times; still rate limited after that is an error
    /// - **Other non-2xx**: Response body logged, error returned, no retry
    /// - **Network failures**: Propagated as `anyhow::Error`
    pub async fn send_notification(&self, product: &Product) -> Result<()> {
        let Some(webhook_url) = &self.webhook_url else {
            return Ok(());
        };

        let payload = serde_json::to_vec(&self.build_message(product))
            .context("failed to encode discord payload")?;

        let mut retries = 0;
        loop {
            let response = self
                .client
                .post(webhook_url)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(payload.clone())
                .send()
                .await
                .context("failed to send discord webhook")?;

            let status = response.status();
            if status.is_success() {
                info!("Discord notification sent for product: {}", product.title);
                return Ok(());
            }

            if status == StatusCode::TOO_MANY_REQUESTS && retries < self.max_retries {
                retries += 1;
                warn!(
                    retries,
                    delay_ms = self.retry_delay.as_millis() as u64,
                    "Discord rate limited, retrying"
                );
                tokio::time::sleep(self.retry_delay).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            error!(status = %status, response = %body, "Discord error response");
            bail!("discord webhook returned status code: {}", status.as_u16());
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn send(&self, product: &Product) -> Result<()> {
        self.send_notification(product).await
    }
}
