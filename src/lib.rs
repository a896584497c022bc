//! Warmup Engine - account warmup phase state machine and scheduler
//!
//! Drives social-media accounts through a fixed catalog of profile-building
//! phases on a device farm, under lifecycle governance and with a human review
//! queue for failures automation cannot handle.
//!
//! # Architecture
//!
//! Hexagonal layout:
//!
//! - **Domain Layer** (`domain`): models, state machine rules and ports
//! - **Service Layer** (`services`): lifecycle, warmup engine, review queue, bot sessions
//! - **Adapters** (`adapters`): `SQLite` repositories and device automation
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Account, Config, LifecycleState, PhaseCatalog, PhaseStatus, ReviewItem, ReviewStatus, WarmupPhase,
    WarmupPhaseKind,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{BotSessionService, LifecycleService, ReviewQueueService, WarmupService};
