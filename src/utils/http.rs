// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::HarvestConfig;

/// Source of page bodies for the harvest client and the catalog reader.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url` and return the response body.
    ///
    /// A 503 answer maps to [`AppError::RateLimited`], any other non-success
    /// status to [`AppError::Transport`].
    async fn fetch(&self, url: &Url) -> Result<String>;
}

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &HarvestConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// [`PageFetcher`] backed by `reqwest`.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &HarvestConfig) -> Result<Self> {
        Ok(Self::new(create_async_client(config)?))
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String> {
        log::debug!("GET {}", url);
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if status == StatusCode::SERVICE_UNAVAILABLE {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(AppError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(AppError::Transport {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.text().await?)
    }
}

/// Retry-After in delta-seconds form; HTTP-date values are not honored.
pub fn parse_retry_after(value: &str) -> Option<u64> {
    value.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("5"), Some(5));
        assert_eq!(parse_retry_after(" 120 "), Some(120));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_create_client_from_config() {
        let config = HarvestConfig::default();
        assert!(create_async_client(&config).is_ok());
    }
}
