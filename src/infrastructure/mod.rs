//! Infrastructure layer module
//!
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//!
//! Storage and device adapters live under `crate::adapters`.

pub mod config;
pub mod logging;
