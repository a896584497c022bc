//! Domain ports (interfaces) for the warmup engine.
//!
//! Storage, content selection, device automation, time and cooldown jitter are reached
//! through these traits so services stay independent of the adapters.

pub mod account_repository;
pub mod automation;
pub mod bot_session_repository;
pub mod clock;
pub mod content_provider;
pub mod cooldown;
pub mod phase_repository;
pub mod review_repository;

pub use account_repository::AccountRepository;
pub use automation::{DeviceAutomation, ExecutionDispatcher, ExecutionJob, ExecutionReport};
pub use bot_session_repository::BotSessionRepository;
pub use clock::{Clock, FakeClock, SystemClock};
pub use content_provider::ContentProvider;
pub use cooldown::{CooldownSource, FixedCooldown, UniformCooldown};
pub use phase_repository::{
    ClaimRequest, CompletionRecord, FailureRecord, NextPhaseCooldown, PhaseRepository, ReadyQuery,
};
pub use review_repository::ReviewRepository;
