use std::time::Duration;

use kmdb_core::error::AppError;
use kmdb_core::traits::{Cookies, PageFetcher};
use reqwest::header::COOKIE;
use reqwest::{Client, Proxy};
use url::Url;

const USER_AGENT: &str = "autokmdb";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP fetcher using reqwest.
///
/// Sends the outlet's session cookies when given and can route through a
/// SOCKS proxy (`socks5h://host:1080`) so paywalled outlets see the
/// subscriber's address.
#[derive(Clone, Debug)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::build(DEFAULT_TIMEOUT, None)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        Self::build(timeout, None)
    }

    pub fn with_proxy(timeout: Duration, proxy_url: &str) -> Result<Self, AppError> {
        Self::build(timeout, Some(proxy_url))
    }

    fn build(timeout: Duration, proxy_url: Option<&str>) -> Result<Self, AppError> {
        let mut builder = Client::builder().user_agent(USER_AGENT).timeout(timeout);
        if let Some(proxy_url) = proxy_url {
            let proxy = Proxy::all(proxy_url)
                .map_err(|e| AppError::ConfigError(format!("Invalid proxy '{proxy_url}': {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

/// `name=value` pairs joined for a `Cookie` header, sorted by name.
pub fn cookie_header(cookies: &Cookies) -> String {
    let mut pairs: Vec<(&String, &String)> = cookies.iter().collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

fn validate_scheme(url: &str) -> Result<(), AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(AppError::HttpError(format!(
            "URL scheme '{scheme}' is not allowed (only http/https)"
        ))),
    }
}

impl PageFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, cookies: Option<&Cookies>) -> Result<String, AppError> {
        validate_scheme(url)?;

        let mut request = self.client.get(url);
        if let Some(cookies) = cookies.filter(|c| !c.is_empty()) {
            request = request.header(COOKIE, cookie_header(cookies));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))?;
        tracing::debug!(%url, bytes = html.len(), "Fetched page");
        Ok(html)
    }
}
