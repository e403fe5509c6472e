//! Static HTTP metadata provider.
//!
//! Fetches the page without running scripts and reads its metadata. Pages
//! that only get a title once scripts run are left to the render fallback.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, header::CONTENT_TYPE, redirect};
use tracing::{debug, warn};
use url::Url;

use crate::{
    application::{provider::MetadataProvider, render::MetadataNormalizer},
    config::ProviderSettings,
    domain::MetadataRecord,
};

use super::error::InfraError;

const MAX_REDIRECTS: usize = 5;

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub timeout: Duration,
    pub max_html_bytes: usize,
    pub user_agent: String,
}

impl From<&ProviderSettings> for ProviderConfig {
    fn from(settings: &ProviderSettings) -> Self {
        Self {
            timeout: settings.timeout,
            max_html_bytes: settings.max_html_bytes,
            user_agent: settings.user_agent.clone(),
        }
    }
}

pub struct HttpMetadataProvider {
    client: Client,
    normalizer: Arc<dyn MetadataNormalizer>,
    max_html_bytes: usize,
}

impl HttpMetadataProvider {
    pub fn new(
        config: ProviderConfig,
        normalizer: Arc<dyn MetadataNormalizer>,
    ) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|err| InfraError::http(format!("failed to build client: {err}")))?;
        Ok(Self {
            client,
            normalizer,
            max_html_bytes: config.max_html_bytes,
        })
    }

    /// Download at most `max_html_bytes` of an HTML document.
    async fn fetch_html(&self, url: &Url) -> Result<(Url, String), &'static str> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|_| "request_failed")?;

        if !response.status().is_success() {
            return Err("status");
        }
        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_none_or(|value| value.to_ascii_lowercase().contains("html"));
        if !is_html {
            return Err("not_html");
        }

        let final_url = response.url().clone();
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|_| "body_failed")? {
            let remaining = self.max_html_bytes - body.len();
            if chunk.len() >= remaining {
                body.extend_from_slice(&chunk[..remaining]);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok((final_url, String::from_utf8_lossy(&body).into_owned()))
    }
}

#[async_trait]
impl MetadataProvider for HttpMetadataProvider {
    async fn fetch_metadata(&self, url: &Url, seed: MetadataRecord) -> Option<MetadataRecord> {
        if !matches!(url.scheme(), "http" | "https") {
            debug!(
                target = "infra::http_provider",
                op = "fetch_metadata",
                result = "unsupported_scheme",
                url = %url,
                "Skipping non-HTTP URL"
            );
            return None;
        }

        let (page_url, html) = match self.fetch_html(url).await {
            Ok(fetched) => fetched,
            Err(reason) => {
                warn!(
                    target = "infra::http_provider",
                    op = "fetch_metadata",
                    result = "miss",
                    reason,
                    url = %url,
                    "Static fetch did not yield an HTML document"
                );
                return None;
            }
        };

        let record = self.normalizer.normalize(&page_url, &html);
        if record.title.is_none() {
            debug!(
                target = "infra::http_provider",
                op = "fetch_metadata",
                result = "untitled",
                url = %url,
                html_bytes = html.len(),
                "Static document has no title; deferring to rendering"
            );
            return None;
        }

        Some(seed.overlay(record))
    }
}
