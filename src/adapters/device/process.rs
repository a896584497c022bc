//! Runs device commands through an external runner process.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{CommandKind, DeviceCommand, DeviceConfig};
use crate::domain::ports::DeviceAutomation;

/// Invokes `runner [runner_args..] <lua|api> <script> --container <n> [--payload <p>]`
/// once per command.
pub struct ProcessDeviceAutomation {
    config: DeviceConfig,
}

impl ProcessDeviceAutomation {
    pub fn new(config: DeviceConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, container_number: i64, command: &DeviceCommand, payload: Option<&str>) -> Vec<String> {
        let mut args = self.config.runner_args.clone();
        args.push(
            match command.kind {
                CommandKind::Lua => "lua",
                CommandKind::Api => "api",
            }
            .to_string(),
        );
        args.push(command.script.clone());
        args.push("--container".to_string());
        args.push(container_number.to_string());
        if let Some(payload) = payload {
            args.push("--payload".to_string());
            args.push(payload.to_string());
        }
        args
    }
}

#[async_trait]
impl DeviceAutomation for ProcessDeviceAutomation {
    async fn execute(&self, container_number: i64, command: &DeviceCommand, payload: Option<&str>) -> DomainResult<()> {
        let args = self.build_args(container_number, command, payload);

        let mut cmd = Command::new(&self.config.runner);
        cmd.args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!(
            container = container_number,
            script = %command.script,
            "running device command"
        );

        let timeout = Duration::from_secs(self.config.command_timeout_secs);
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                DomainError::AutomationFailed(format!(
                    "{} timed out after {}s",
                    command.script, self.config.command_timeout_secs
                ))
            })?
            .map_err(|e| DomainError::AutomationFailed(format!("Failed to spawn {}: {e}", self.config.runner)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DomainError::AutomationFailed(format!(
                "{} exited with {}: {}",
                command.script,
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args() {
        let automation = ProcessDeviceAutomation::new(DeviceConfig::default());
        let args = automation.build_args(7, &DeviceCommand::api("clipboard", "Copy text"), Some("hello"));
        assert_eq!(
            args,
            vec!["scripts/api/lua_executor.js", "api", "clipboard", "--container", "7", "--payload", "hello"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let config = DeviceConfig {
            runner: "false".to_string(),
            runner_args: Vec::new(),
            ..DeviceConfig::default()
        };
        let automation = ProcessDeviceAutomation::new(config);
        let err = automation
            .execute(1, &DeviceCommand::lua("open_settings.lua", "Open settings"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::AutomationFailed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_command() {
        let config = DeviceConfig {
            runner: "true".to_string(),
            runner_args: Vec::new(),
            ..DeviceConfig::default()
        };
        let automation = ProcessDeviceAutomation::new(config);
        automation
            .execute(1, &DeviceCommand::lua("open_settings.lua", "Open settings"), None)
            .await
            .unwrap();
    }
}
