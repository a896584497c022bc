//! CLI command implementations.

pub mod account;
pub mod bot;
pub mod content;
pub mod init;
pub mod phase;
pub mod review;

use anyhow::{anyhow, Result};

use crate::domain::models::{
    ContentKind, FailureCategory, LifecycleState, ResolutionMethod, ReviewStatus, WarmupPhaseKind,
};

pub(crate) fn parse_state(s: &str) -> Result<LifecycleState> {
    LifecycleState::from_str(s).ok_or_else(|| anyhow!("Invalid lifecycle state: {s}"))
}

pub(crate) fn parse_phase(s: &str) -> Result<WarmupPhaseKind> {
    WarmupPhaseKind::from_str(s).ok_or_else(|| anyhow!("Unknown warmup phase: {s}"))
}

pub(crate) fn parse_category(s: &str) -> Result<FailureCategory> {
    FailureCategory::from_str(s).ok_or_else(|| anyhow!("Invalid failure category: {s}"))
}

pub(crate) fn parse_review_status(s: &str) -> Result<ReviewStatus> {
    ReviewStatus::from_str(s).ok_or_else(|| anyhow!("Invalid review status: {s}"))
}

pub(crate) fn parse_resolution(s: &str) -> Result<ResolutionMethod> {
    ResolutionMethod::from_str(s).ok_or_else(|| anyhow!("Invalid resolution method: {s}"))
}

pub(crate) fn parse_content_kind(s: &str) -> Result<ContentKind> {
    ContentKind::from_str(s).ok_or_else(|| anyhow!("Invalid content kind: {s} (expected image or text)"))
}

pub(crate) fn format_time(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
