use async_trait::async_trait;
use url::Url;

use crate::domain::MetadataRecord;

/// Native metadata source consulted before the render fallback.
///
/// Implementations receive a seed record holding whatever the caller already
/// knows about the URL and return an enriched copy, or `None` when they
/// cannot describe the page.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn fetch_metadata(&self, url: &Url, seed: MetadataRecord) -> Option<MetadataRecord>;
}
