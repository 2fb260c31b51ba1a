//! Browser-like HTTP transport shared by every outbound component.
//!
//! The storefront only answers requests that look like they come from a
//! desktop Chrome tab, so the client carries Chrome's user agent, client
//! hints and fetch metadata on every request. One client is built in `main`
//! and cloned into the components that need it.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, IntoUrl, RequestBuilder};

/// Timeout applied to every request made through the transport.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const CHROME_VERSION: &str = "124";

const BROWSER_HEADERS: &[(&str, &str)] = &[
    (
        "sec-ch-ua",
        r#""Chromium";v="124", "Google Chrome";v="124", "Not-A.Brand";v="99""#,
    ),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", r#""Windows""#),
    ("sec-fetch-site", "same-origin"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-dest", "empty"),
    ("x-requested-with", "XMLHttpRequest"),
    ("rtt", "50"),
    ("downlink", "3.9"),
    ("ect", "4g"),
];

#[derive(Clone)]
pub struct StealthClient {
    client: Client,
}

impl StealthClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent())
            .default_headers(browser_headers()?)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client })
    }

    pub fn get<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.client.get(url)
    }

    pub fn post<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.client.post(url)
    }
}

fn user_agent() -> String {
    format!(
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{CHROME_VERSION}.0.0.0 Safari/537.36"
    )
}

fn browser_headers() -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en,en_US;q=0.9"));

    for &(name, value) in BROWSER_HEADERS {
        let name = HeaderName::from_static(name);
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for header {name}"))?;
        headers.insert(name, value);
    }

    Ok(headers)
}
