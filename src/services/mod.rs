//! Application services for the warmup engine.

pub mod bot_session_service;
pub mod lifecycle_service;
pub mod review_queue_service;
pub mod warmup_service;

pub use bot_session_service::BotSessionService;
pub use lifecycle_service::LifecycleService;
pub use review_queue_service::ReviewQueueService;
pub use warmup_service::{FinalizationReport, PhaseRunOutcome, StartedPhase, WarmupService};
