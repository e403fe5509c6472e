//! Blocking facade over [`PreviewService`] for synchronous callers.

use std::{io, sync::mpsc};

use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::warn;
use url::Url;

use crate::domain::MetadataRecord;

use super::{preview::PreviewService, render::PreviewFailure};

#[derive(Debug, Error)]
pub enum BlockingError {
    #[error("blocking preview called from inside an async runtime")]
    InsideRuntime,
    #[error("failed to start preview runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error(transparent)]
    Preview(#[from] PreviewFailure),
}

/// Owns a dedicated runtime and blocks the calling thread per preview.
///
/// Completions are processed on the owned runtime's workers, so the caller
/// may block freely. Calling from a thread where any Tokio runtime is current
/// is refused; that includes `spawn_blocking` threads, so async callers
/// should use [`PreviewService`] directly.
pub struct BlockingPreviewClient {
    runtime: Option<Runtime>,
    service: PreviewService,
}

impl BlockingPreviewClient {
    /// Build a client; `build` constructs the service on the owned runtime.
    pub fn new<F>(build: F) -> Result<Self, BlockingError>
    where
        F: FnOnce() -> PreviewService,
    {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("linkpeek-preview")
            .enable_all()
            .build()
            .map_err(BlockingError::Runtime)?;
        let service = {
            let _guard = runtime.enter();
            build()
        };
        Ok(Self {
            runtime: Some(runtime),
            service,
        })
    }

    pub fn fetch_preview(&self, url: &Url) -> Result<Option<MetadataRecord>, BlockingError> {
        match self.fetch_preview_detailed(url) {
            Ok(record) => Ok(Some(record)),
            Err(BlockingError::Preview(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Block until the preview resolves.
    ///
    /// Returns [`BlockingError::InsideRuntime`] whenever a Tokio runtime
    /// handle is reachable from the calling thread, `spawn_blocking` threads
    /// included.
    pub fn fetch_preview_detailed(&self, url: &Url) -> Result<MetadataRecord, BlockingError> {
        if Handle::try_current().is_ok() {
            warn!(
                target = "application::blocking",
                op = "fetch_preview",
                result = "refused",
                url = %url,
                "Blocking preview requested from an async context"
            );
            return Err(BlockingError::InsideRuntime);
        }
        let Some(runtime) = self.runtime.as_ref() else {
            return Err(PreviewFailure::Closed.into());
        };

        let (tx, rx) = mpsc::sync_channel(1);
        let service = self.service.clone();
        let url = url.clone();
        runtime.spawn(async move {
            let outcome = service.fetch_preview_detailed(&url).await;
            let _ = tx.send(outcome);
        });

        rx.recv()
            .unwrap_or(Err(PreviewFailure::Closed))
            .map_err(BlockingError::from)
    }
}

impl Drop for BlockingPreviewClient {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
