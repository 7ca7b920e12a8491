//! HTTP session shared by all fetchers.
//!
//! One pooled client per run, owned by the pipeline and handed to the
//! fetchers explicitly. App tokens raise the portal's throttling threshold
//! and are attached as a default header when configured.

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use std::time::Duration;

use crate::downloader::config::{CONNECT_TIMEOUT, PAGE_TIMEOUT};

/// Header carrying the portal application token.
pub const APP_TOKEN_HEADER: &str = "X-App-Token";

/// Environment variable consulted for the default app token.
pub const APP_TOKEN_ENV: &str = "SODA_APP_TOKEN";

/// Connection settings for a portal session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Portal base URL, e.g. `https://opendata.example.org`
    pub base_url: String,
    /// Optional application token
    pub app_token: Option<String>,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Overall request timeout; long enough for the largest page
    pub request_timeout: Duration,
    /// Idle connections kept per host
    pub pool_max_idle: usize,
}

impl SessionConfig {
    /// Settings for a portal at `base_url`, reading the app token from the
    /// environment when present.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            app_token: std::env::var(APP_TOKEN_ENV).ok().filter(|t| !t.is_empty()),
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout: PAGE_TIMEOUT,
            pool_max_idle: 16,
        }
    }

    /// Override the app token.
    pub fn with_app_token(mut self, token: impl Into<String>) -> Self {
        self.app_token = Some(token.into());
        self
    }
}

/// A connected portal session: one pooled HTTP client plus the base URL.
#[derive(Debug, Clone)]
pub struct Session {
    client: Client,
    base_url: String,
}

impl Session {
    /// Build the pooled client for `config`.
    pub fn connect(config: SessionConfig) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.app_token {
            if let Ok(value) = HeaderValue::from_str(token) {
                headers.insert(APP_TOKEN_HEADER, value);
            }
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.pool_max_idle)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// The shared HTTP client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Portal base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of the paginated JSON endpoint for a resource.
    pub fn resource_url(&self, dataset_id: &str) -> String {
        format!("{}/resource/{}.json", self.base_url, dataset_id)
    }

    /// URL of the whole-dataset CSV export endpoint.
    pub fn export_url(&self, dataset_id: &str) -> String {
        format!(
            "{}/api/views/{}/rows.csv?accessType=DOWNLOAD",
            self.base_url, dataset_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let session = Session::connect(SessionConfig {
            base_url: "https://opendata.example.org/".to_string(),
            app_token: None,
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
            pool_max_idle: 1,
        })
        .unwrap();

        assert_eq!(
            session.resource_url("m9d7-ebf2"),
            "https://opendata.example.org/resource/m9d7-ebf2.json"
        );
        assert_eq!(
            session.export_url("m9d7-ebf2"),
            "https://opendata.example.org/api/views/m9d7-ebf2/rows.csv?accessType=DOWNLOAD"
        );
    }
}
