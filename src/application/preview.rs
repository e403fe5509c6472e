//! Public entry point for link previews.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, instrument};
use url::Url;

use crate::domain::MetadataRecord;

use super::{
    provider::MetadataProvider,
    render::{PreviewFailure, RenderCoordinator},
};

const METRIC_PROVIDER_HIT: &str = "linkpeek_provider_hit_total";
const METRIC_PROVIDER_MISS: &str = "linkpeek_provider_miss_total";

/// Resolves previews through the native provider first and the render
/// fallback second.
#[derive(Clone)]
pub struct PreviewService {
    coordinator: RenderCoordinator,
    provider: Option<Arc<dyn MetadataProvider>>,
}

impl PreviewService {
    pub fn new(coordinator: RenderCoordinator) -> Self {
        Self {
            coordinator,
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn coordinator(&self) -> &RenderCoordinator {
        &self.coordinator
    }

    /// Preview for `url`, or `None` when no strategy produced one.
    pub async fn fetch_preview(&self, url: &Url) -> Option<MetadataRecord> {
        self.fetch_preview_detailed(url).await.ok()
    }

    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch_preview_detailed(&self, url: &Url) -> Result<MetadataRecord, PreviewFailure> {
        if let Some(provider) = self.provider.as_ref() {
            match provider.fetch_metadata(url, MetadataRecord::default()).await {
                Some(record) if !record.is_empty() => {
                    counter!(METRIC_PROVIDER_HIT).increment(1);
                    debug!(
                        target = "application::preview",
                        op = "fetch_preview",
                        result = "provider_hit",
                        "Native provider described the page"
                    );
                    return Ok(record);
                }
                _ => {
                    counter!(METRIC_PROVIDER_MISS).increment(1);
                    debug!(
                        target = "application::preview",
                        op = "fetch_preview",
                        result = "provider_miss",
                        "Falling back to page rendering"
                    );
                }
            }
        }

        self.coordinator.render(url.clone()).await
    }
}
