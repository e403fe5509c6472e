//! Infrastructure adapters: the Chromium engine, the static HTTP provider
//! and process-wide telemetry.

pub mod chrome;
pub mod error;
pub mod http_provider;
mod lock;
pub mod telemetry;
