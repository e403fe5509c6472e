//! Link preview metadata with a pooled headless-browser fallback.
//!
//! [`application::preview::PreviewService`] asks a native
//! [`application::provider::MetadataProvider`] first and otherwise renders
//! the page through a shared [`application::render::RenderCoordinator`].
//! [`application::blocking::BlockingPreviewClient`] wraps the same service
//! for synchronous callers.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
