//! Storefront data-API client.
//!
//! The storefront is a Next.js site: its JSON data routes live under
//! `/_next/data/<build id>/...`, and the build id changes on every deploy.
//! The id is scraped from the home page before each poll cycle and then used
//! to query one category at a time.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{CatalogResponse, Product};
use crate::transport::StealthClient;

pub const DEFAULT_CATEGORIES: &[&str] = &[
    "all-switching",
    "all-unifi-cloud-gateways",
    "all-wifi",
    "all-cameras-nvrs",
    "all-door-access",
    "all-cloud-keys-gateways",
    "all-power-tech",
    "all-integrations",
    "accessories-cables-dacs",
];

static BUILD_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://[^/]+/_next/static/([a-zA-Z0-9]+)/_ssgManifest\.js")
        .expect("build id pattern is a valid regex")
});

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("build id not found in home page")]
    BuildIdNotFound,
    #[error("unexpected status code: {0}")]
    Status(StatusCode),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid storefront url: {0}")]
    Url(String),
}

/// Identifier of the currently deployed storefront build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildId(String);

impl BuildId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pulls the build id out of the home page HTML.
pub fn extract_build_id(html: &str) -> Option<BuildId> {
    BUILD_ID_PATTERN
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| BuildId::new(m.as_str()))
}

#[derive(Clone)]
pub struct StorefrontClient {
    http: StealthClient,
    home_url: String,
}

impl StorefrontClient {
    pub fn new(http: StealthClient, home_url: impl Into<String>) -> Self {
        Self {
            http,
            home_url: home_url.into(),
        }
    }

    pub async fn discover_build_id(&self) -> Result<BuildId, FetchError> {
        let response = self.http.get(&self.home_url).send().await?;

        if response.status() != StatusCode::OK {
            return Err(FetchError::Status(response.status()));
        }

        let html = response.text().await?;
        let build_id = extract_build_id(&html).ok_or(FetchError::BuildIdNotFound)?;

        info!(build_id = %build_id, "Successfully extracted build ID");
        Ok(build_id)
    }

    /// `https://store.ui.com/us/en` becomes
    /// `https://store.ui.com/_next/data/<id>/us/en.json`.
    pub fn data_url(&self, build_id: &BuildId) -> Result<Url, FetchError> {
        let home = Url::parse(&self.home_url).map_err(|e| FetchError::Url(e.to_string()))?;
        let page = home.path().trim_end_matches('/');
        let page = if page.is_empty() { "/index" } else { page };

        home.join(&format!("/_next/data/{build_id}{page}.json"))
            .map_err(|e| FetchError::Url(e.to_string()))
    }

    pub async fn fetch_category(
        &self,
        build_id: &BuildId,
        category: &str,
    ) -> Result<Vec<Product>, FetchError> {
        let url = self.data_url(build_id)?;
        info!(url = %url, category, "Fetching products");

        let response = self
            .http
            .get(url)
            .query(&[("category", category), ("store", "us"), ("language", "en")])
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(FetchError::Status(response.status()));
        }

        let body = response.bytes().await?;
        let products = serde_json::from_slice::<CatalogResponse>(&body)?.into_products();

        debug!(category, count = products.len(), "Fetched category");
        Ok(products)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HOME_HTML: &str = r#"<html><head>
        <script src="https://cdn.example.com/_next/static/abc123/_buildManifest.js" defer></script>
        <script src="https://cdn.example.com/_next/static/abc123/_ssgManifest.js" defer></script>
        </head><body></body></html>"#;

    fn client_for(server: &MockServer) -> StorefrontClient {
        StorefrontClient::new(
            StealthClient::new().unwrap(),
            format!("{}/us/en", server.uri()),
        )
    }

    #[test]
    fn extracts_build_id_from_manifest_script() {
        let id = extract_build_id(HOME_HTML).unwrap();
        assert_eq!(id.to_string(), "abc123");
    }

    #[test]
    fn missing_manifest_yields_none() {
        assert!(extract_build_id("<html><script src=\"/app.js\"></script></html>").is_none());
        assert!(extract_build_id("http://x/_next/static/abc/_ssgManifest.js").is_none());
    }

    #[test]
    fn data_url_follows_home_path() {
        let client =
            StorefrontClient::new(StealthClient::new().unwrap(), "https://store.ui.com/us/en");
        let url = client.data_url(&BuildId::new("xyz")).unwrap();
        assert_eq!(url.as_str(), "https://store.ui.com/_next/data/xyz/us/en.json");
    }

    #[tokio::test]
    async fn discovers_build_id_from_home_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/us/en"))
            .respond_with(ResponseTemplate::new(200).set_body_string(HOME_HTML))
            .mount(&server)
            .await;

        let id = client_for(&server).discover_build_id().await.unwrap();
        assert_eq!(id.to_string(), "abc123");
    }

    #[tokio::test]
    async fn discovery_without_match_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/us/en"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).discover_build_id().await.unwrap_err();
        assert!(matches!(err, FetchError::BuildIdNotFound));
    }

    #[tokio::test]
    async fn fetch_category_flattens_sub_categories_in_order() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "pageProps": {"subCategories": [
                {"products": [{"id": "p1"}, {"id": "p2"}]},
                {"products": [{"id": "p3"}]}
            ]}
        });
        Mock::given(method("GET"))
            .and(path("/_next/data/abc123/us/en.json"))
            .and(query_param("category", "all-wifi"))
            .and(query_param("store", "us"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let products = client_for(&server)
            .fetch_category(&BuildId::new("abc123"), "all-wifi")
            .await
            .unwrap();

        let ids: Vec<_> = products.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn fetch_category_reports_status_and_decode_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("category", "broken"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("category", "missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let id = BuildId::new("abc123");

        let err = client.fetch_category(&id, "broken").await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));

        let err = client.fetch_category(&id, "missing").await.unwrap_err();
        assert!(matches!(err, FetchError::Status(StatusCode::NOT_FOUND)));
    }
}
