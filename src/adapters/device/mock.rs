//! In-memory device automation for tests and dry runs.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::DeviceCommand;
use crate::domain::ports::DeviceAutomation;

/// One command the mock was asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub container_number: i64,
    pub script: String,
    pub payload: Option<String>,
}

/// Records every command and fails the scripts it is told to fail.
#[derive(Clone, Default)]
pub struct MockDeviceAutomation {
    executed: Arc<RwLock<Vec<RecordedCommand>>>,
    failing_scripts: Arc<RwLock<HashSet<String>>>,
}

impl MockDeviceAutomation {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_on(&self, script: impl Into<String>) {
        self.failing_scripts.write().await.insert(script.into());
    }

    pub async fn executed(&self) -> Vec<RecordedCommand> {
        self.executed.read().await.clone()
    }

    pub async fn scripts(&self) -> Vec<String> {
        self.executed.read().await.iter().map(|c| c.script.clone()).collect()
    }
}

#[async_trait]
impl DeviceAutomation for MockDeviceAutomation {
    async fn execute(&self, container_number: i64, command: &DeviceCommand, payload: Option<&str>) -> DomainResult<()> {
        self.executed.write().await.push(RecordedCommand {
            container_number,
            script: command.script.clone(),
            payload: payload.map(ToString::to_string),
        });

        if self.failing_scripts.read().await.contains(&command.script) {
            return Err(DomainError::AutomationFailed(format!("{} failed", command.script)));
        }
        Ok(())
    }
}
