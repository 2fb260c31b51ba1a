//! Data models for storefront products and Discord webhook payloads

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize};

/// Reads an explicit `null` as the field's default value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A product listed on the storefront.
///
/// Identity is the `id` alone: two observations with the same id are the
/// same product, whatever their other fields say.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub short_description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub slug: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub thumbnail: Thumbnail,
    #[serde(default, deserialize_with = "null_as_default")]
    pub variants: Vec<Variant>,
}

impl Product {
    /// First listed variant, used for notification pricing.
    pub fn primary_variant(&self) -> Option<&Variant> {
        self.variants.first()
    }
}

impl PartialEq for Product {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Product {}

impl Hash for Product {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Thumbnail {
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub display_price: DisplayPrice,
}

/// Price in minor units (cents) plus an ISO currency code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayPrice {
    #[serde(default, deserialize_with = "null_as_default")]
    pub amount: i64,
    #[serde(default = "default_currency", deserialize_with = "currency_or_default")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn currency_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let currency = Option::<String>::deserialize(deserializer)?;
    Ok(currency.unwrap_or_else(default_currency))
}

impl Default for DisplayPrice {
    fn default() -> Self {
        Self {
            amount: 0,
            currency: default_currency(),
        }
    }
}

impl DisplayPrice {
    /// Renders the amount as dollars and cents, e.g. `12345` -> `$123.45`.
    /// The currency code does not affect the format.
    pub fn formatted(&self) -> String {
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.unsigned_abs();
        format!("{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

/// Envelope returned by the storefront's data API for a category page
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub page_props: PageProps,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageProps {
    #[serde(default, deserialize_with = "null_as_default")]
    pub sub_categories: Vec<SubCategory>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubCategory {
    #[serde(default, deserialize_with = "null_as_default")]
    pub products: Vec<Product>,
}

impl CatalogResponse {
    /// Flattens every sub-category's products into one list, keeping source order.
    pub fn into_products(self) -> Vec<Product> {
        self.page_props
            .sub_categories
            .into_iter()
            .flat_map(|sub| sub.products)
            .collect()
    }
}

/// Discord embed structure for rich notifications
#[derive(Debug, Serialize)]
pub struct DiscordEmbed {
    pub title: String,
    pub color: u32,
    pub url: String,
    pub timestamp: String,
    pub thumbnail: DiscordThumbnail,
    pub author: DiscordAuthor,
    pub description: String,
    pub fields: Vec<DiscordField>,
    pub footer: DiscordFooter,
}

/// Small thumbnail image for Discord embeds
#[derive(Debug, Serialize)]
pub struct DiscordThumbnail {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct DiscordAuthor {
    pub name: String,
    pub icon_url: String,
}

#[derive(Debug, Serialize)]
pub struct DiscordFooter {
    pub text: String,
    pub icon_url: String,
}

/// Key-value field for Discord embeds
#[derive(Debug, Serialize)]
pub struct DiscordField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Discord webhook message payload
#[derive(Debug, Serialize)]
pub struct DiscordMessage {
    pub username: String,
    pub avatar_url: String,
    pub embeds: Vec<DiscordEmbed>,
}
