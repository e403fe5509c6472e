//! Render fallback pipeline.
//!
//! A bounded pool of page-rendering engines is shared by every caller. The
//! [`RenderCoordinator`] collapses concurrent requests for one URL into a
//! single navigation, queues overflow FIFO, and bounds each render with a
//! timeout. Markup produced by an engine is turned into a
//! [`MetadataRecord`](crate::domain::MetadataRecord) by a
//! [`MetadataNormalizer`].

mod coordinator;
mod normalize;
mod timeout;
mod types;

pub use coordinator::{
    CoordinatorConfig, CoordinatorSnapshot, DEFAULT_RENDER_TIMEOUT, RenderCoordinator,
};
pub use normalize::{MetadataNormalizer, OpenGraphNormalizer};
pub use types::{
    EngineError, FailureKind, PreviewFailure, PreviewOutcome, RenderEngine, RenderEngineFactory,
    ServerTrustChallenge, TrustDecision, TrustPolicy, Waiter,
};
