//! Application services: the render fallback, the native provider seam and
//! the preview facades built on top of them.

pub mod blocking;
pub mod error;
pub mod preview;
pub mod provider;
pub mod render;
