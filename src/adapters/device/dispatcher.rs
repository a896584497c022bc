//! Executes a started phase command by command on the device.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::models::{CommandKind, DeviceCommand, FailureCategory, PhaseFailure};
use crate::domain::ports::{DeviceAutomation, ExecutionDispatcher, ExecutionJob, ExecutionReport};

pub struct DeviceDispatcher {
    automation: Arc<dyn DeviceAutomation>,
    command_delay: Duration,
}

impl DeviceDispatcher {
    pub fn new(automation: Arc<dyn DeviceAutomation>, command_delay: Duration) -> Self {
        Self { automation, command_delay }
    }

    fn payload<'a>(command: &DeviceCommand, job: &'a ExecutionJob) -> Option<&'a str> {
        if command.kind != CommandKind::Api {
            return None;
        }
        match command.script.as_str() {
            "gallery" => job.image.as_ref().map(|c| c.payload.as_str()),
            "clipboard" => job.text.as_ref().map(|c| c.payload.as_str()),
            _ => None,
        }
    }
}

#[async_trait]
impl ExecutionDispatcher for DeviceDispatcher {
    async fn dispatch(&self, job: &ExecutionJob) -> ExecutionReport {
        let started = Instant::now();
        let mut executed = Vec::with_capacity(job.commands.len());

        for (index, command) in job.commands.iter().enumerate() {
            if index > 0 && !self.command_delay.is_zero() {
                tokio::time::sleep(self.command_delay).await;
            }

            if let Err(e) = self
                .automation
                .execute(job.container_number, command, Self::payload(command, job))
                .await
            {
                tracing::warn!(
                    account_id = %job.account_id,
                    phase = %job.phase,
                    script = %command.script,
                    error = %e,
                    "device command failed"
                );
                return ExecutionReport::Failed(
                    PhaseFailure::new(e.to_string(), FailureCategory::BotError).with_details(serde_json::json!({
                        "failed_command": command.script,
                        "step": index,
                        "completed_commands": executed,
                    })),
                );
            }
            executed.push(command.script.clone());
        }

        let elapsed = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        ExecutionReport::Succeeded {
            execution_time_ms: elapsed,
            response: Some(serde_json::json!({ "commands": executed })),
        }
    }
}
