//! Domain layer for the warmup engine
//!
//! Models, state machine rules and the ports the services depend on.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
