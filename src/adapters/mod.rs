//! Infrastructure adapters for external systems.

pub mod device;
pub mod sqlite;
