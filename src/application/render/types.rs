use std::{io, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::domain::MetadataRecord;

/// Result handed to every waiter of a render.
pub type PreviewOutcome = Result<MetadataRecord, PreviewFailure>;

/// Caller-supplied completion callback.
///
/// Waiters run on the coordinator task, in registration order, and must not
/// block.
pub type Waiter = Box<dyn FnOnce(PreviewOutcome) + Send + 'static>;

/// Coarse classification of a failed preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Navigation,
    Extraction,
    Timeout,
    Closed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Navigation => "navigation",
            FailureKind::Extraction => "extraction",
            FailureKind::Timeout => "timeout",
            FailureKind::Closed => "closed",
        }
    }
}

/// Why a preview could not be produced.
///
/// Callers that only care about availability collapse this to `None`; the
/// detailed APIs expose it as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreviewFailure {
    #[error("navigation failed: {message}")]
    Navigation { message: String },
    #[error("rendered markup could not be extracted: {message}")]
    Extraction { message: String },
    #[error("render did not finish within {}s", .after.as_secs())]
    Timeout { after: Duration },
    #[error("render coordinator is no longer running")]
    Closed,
}

impl PreviewFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            PreviewFailure::Navigation { .. } => FailureKind::Navigation,
            PreviewFailure::Extraction { .. } => FailureKind::Extraction,
            PreviewFailure::Timeout { .. } => FailureKind::Timeout,
            PreviewFailure::Closed => FailureKind::Closed,
        }
    }
}

/// Errors reported by a [`RenderEngine`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("navigation failed: {message}")]
    Navigation { message: String },
    #[error("markup extraction failed: {message}")]
    Extraction { message: String },
    #[error("render engine could not be started: {0}")]
    Spawn(#[source] io::Error),
    #[error("no rendered document available; navigate first")]
    NotLoaded,
}

impl EngineError {
    pub fn navigation(message: impl Into<String>) -> Self {
        Self::Navigation {
            message: message.into(),
        }
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction {
            message: message.into(),
        }
    }
}

impl From<EngineError> for PreviewFailure {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Navigation { message } => PreviewFailure::Navigation { message },
            EngineError::Spawn(err) => PreviewFailure::Navigation {
                message: err.to_string(),
            },
            EngineError::Extraction { message } => PreviewFailure::Extraction { message },
            EngineError::NotLoaded => PreviewFailure::Extraction {
                message: EngineError::NotLoaded.to_string(),
            },
        }
    }
}

/// How an engine answers server-trust challenges during TLS negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrustPolicy {
    /// Let the platform validate the certificate chain.
    #[default]
    SystemDefault,
    /// Accept whatever trust the server presents.
    AcceptAny,
}

impl TrustPolicy {
    pub fn from_accept_invalid_certs(accept: bool) -> Self {
        if accept {
            TrustPolicy::AcceptAny
        } else {
            TrustPolicy::SystemDefault
        }
    }

    /// Trust-decision callback for a single challenge.
    pub fn decide(&self, challenge: &ServerTrustChallenge<'_>) -> TrustDecision {
        let decision = match self {
            TrustPolicy::SystemDefault => TrustDecision::PerformDefaultHandling,
            TrustPolicy::AcceptAny => TrustDecision::UseServerTrust,
        };
        debug!(
            target = "application::render::trust",
            host = challenge.host,
            policy = ?self,
            decision = ?decision,
            "Server trust challenge answered"
        );
        decision
    }
}

/// Server trust presented while negotiating a secure channel.
#[derive(Debug, Clone, Copy)]
pub struct ServerTrustChallenge<'a> {
    pub host: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    PerformDefaultHandling,
    UseServerTrust,
}

/// One heavyweight page-rendering engine.
///
/// Each successful `navigate` is followed by at most one
/// `extract_rendered_markup`. The coordinator never drives the same engine
/// from two renders at once.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Load `url`, resolving once the page finished loading or failed.
    async fn navigate(&self, url: &Url) -> Result<(), EngineError>;

    /// Return the fully rendered document of the last successful navigation.
    async fn extract_rendered_markup(&self) -> Result<String, EngineError>;

    fn trust_policy(&self) -> TrustPolicy {
        TrustPolicy::SystemDefault
    }
}

/// Creates engines on first demand, one per pool slot.
pub trait RenderEngineFactory: Send + Sync {
    fn create(&self, slot: usize) -> Arc<dyn RenderEngine>;
}

impl<F> RenderEngineFactory for F
where
    F: Fn(usize) -> Arc<dyn RenderEngine> + Send + Sync,
{
    fn create(&self, slot: usize) -> Arc<dyn RenderEngine> {
        self(slot)
    }
}
