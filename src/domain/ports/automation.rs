//! Ports for physically performing warmup actions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ContentRef, DeviceCommand, PhaseFailure, WarmupPhaseKind};

/// Runs single commands on the automation device.
#[async_trait]
pub trait DeviceAutomation: Send + Sync {
    /// Execute one command against a container. `payload` carries the image
    /// location or text for gallery/clipboard commands.
    async fn execute(&self, container_number: i64, command: &DeviceCommand, payload: Option<&str>) -> DomainResult<()>;
}

/// A started phase handed to the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionJob {
    pub account_id: Uuid,
    pub phase: WarmupPhaseKind,
    pub bot_id: String,
    pub session_id: String,
    pub container_number: i64,
    pub commands: Vec<DeviceCommand>,
    pub image: Option<ContentRef>,
    pub text: Option<ContentRef>,
}

/// What the dispatcher reports back to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionReport {
    Succeeded {
        execution_time_ms: i64,
        response: Option<serde_json::Value>,
    },
    Failed(PhaseFailure),
}

/// Performs a started phase and reports the outcome.
#[async_trait]
pub trait ExecutionDispatcher: Send + Sync {
    async fn dispatch(&self, job: &ExecutionJob) -> ExecutionReport;
}
