//! Shell capability — execute system commands.
//!
//! Supports command allowlisting, execution timeout, and output truncation.

use async_trait::async_trait;
use forgeloop_core::capability::{Capability, CapabilityCategory, CapabilityOutput};
use forgeloop_core::error::CapabilityError;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Execute shell commands with safety constraints.
pub struct ShellCapability {
    /// If non-empty, only these commands are allowed.
    allowed_commands: Vec<String>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ShellCapability {
    pub fn new(allowed_commands: Vec<String>, timeout_secs: u64, max_output_bytes: usize) -> Self {
        Self {
            allowed_commands,
            timeout: Duration::from_secs(timeout_secs),
            max_output_bytes,
        }
    }

    pub fn unrestricted() -> Self {
        Self::new(Vec::new(), 60, 65536)
    }

    fn is_command_allowed(&self, command: &str) -> bool {
        if self.allowed_commands.is_empty() {
            return true; // No allowlist = all commands allowed
        }

        // Extract the base command (first word)
        let base_cmd = command.split_whitespace().next().unwrap_or("").trim();

        self.allowed_commands.iter().any(|a| a == base_cmd)
    }

    fn truncate_output(&self, text: String) -> String {
        if text.len() <= self.max_output_bytes {
            return text;
        }
        let mut cut = self.max_output_bytes;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!(
            "{}\n[truncated: showing {} of {} bytes]",
            &text[..cut],
            cut,
            text.len()
        )
    }
}

#[async_trait]
impl Capability for ShellCapability {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout/stderr. Use this for running programs, tests, builds, and git operations."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn category(&self) -> CapabilityCategory {
        CapabilityCategory::Trust
    }

    async fn invoke(
        &self,
        params: serde_json::Value,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let command = params["command"].as_str().ok_or_else(|| {
            CapabilityError::InvalidParameters("Missing 'command' parameter".into())
        })?;

        if !self.is_command_allowed(command) {
            return Err(CapabilityError::PermissionDenied {
                capability: "shell".into(),
                reason: format!(
                    "Command '{}' not in allowlist",
                    command.split_whitespace().next().unwrap_or("")
                ),
            });
        }

        debug!(command = %command, "Executing shell command");

        let child = if cfg!(target_os = "windows") {
            Command::new("cmd").args(["/C", command]).output()
        } else {
            Command::new("sh").args(["-c", command]).output()
        };

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(result) => result,
            Err(_) => {
                warn!(command = %command, timeout_secs = self.timeout.as_secs(), "Command timed out");
                return Err(CapabilityError::Timeout {
                    capability: "shell".into(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        match output {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let success = output.status.success();

                let result_text = if success {
                    if stderr.is_empty() {
                        stdout
                    } else {
                        format!("{stdout}\n[stderr]: {stderr}")
                    }
                } else {
                    let code = output.status.code().unwrap_or(-1);
                    warn!(command = %command, exit_code = code, "Command failed");
                    format!("[exit code: {code}]\n{stdout}\n{stderr}")
                };

                let result_text = self.truncate_output(result_text.trim().to_string());

                if success {
                    Ok(CapabilityOutput::ok(result_text))
                } else {
                    Ok(CapabilityOutput::fail(result_text))
                }
            }
            Err(e) => Err(CapabilityError::ExecutionFailed {
                capability: "shell".into(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_check() {
        let cap = ShellCapability::new(vec!["ls".into(), "cat".into(), "git".into()], 60, 65536);
        assert!(cap.is_command_allowed("ls -la"));
        assert!(cap.is_command_allowed("cat file.txt"));
        assert!(cap.is_command_allowed("git status"));
        assert!(!cap.is_command_allowed("rm -rf /"));
        assert!(!cap.is_command_allowed("sudo something"));
    }

    #[test]
    fn empty_allowlist_allows_all() {
        let cap = ShellCapability::unrestricted();
        assert!(cap.is_command_allowed("anything goes"));
    }

    #[test]
    fn capability_metadata() {
        let cap = ShellCapability::unrestricted();
        assert_eq!(cap.name(), "shell");
        assert!(!cap.is_read_only());
        assert_eq!(cap.category(), CapabilityCategory::Trust);
    }

    #[tokio::test]
    async fn execute_echo() {
        let cap = ShellCapability::unrestricted();
        let result = cap
            .invoke(serde_json::json!({"command": "echo hello"}))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("hello"));
    }

    #[tokio::test]
    async fn blocked_command() {
        let cap = ShellCapability::new(vec!["ls".into()], 60, 65536);
        let result = cap
            .invoke(serde_json::json!({"command": "rm -rf /"}))
            .await;
        assert!(matches!(
            result,
            Err(CapabilityError::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn failing_command_reports_exit_code() {
        let cap = ShellCapability::unrestricted();
        let result = cap
            .invoke(serde_json::json!({"command": "false"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("[exit code: 1]"));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let cap = ShellCapability::new(Vec::new(), 1, 65536);
        let result = cap
            .invoke(serde_json::json!({"command": "sleep 5"}))
            .await;
        assert!(matches!(result, Err(CapabilityError::Timeout { .. })));
    }

    #[tokio::test]
    async fn long_output_is_truncated() {
        let cap = ShellCapability::new(Vec::new(), 60, 100);
        let result = cap
            .invoke(serde_json::json!({"command": "yes x | head -n 200"}))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("[truncated"));
        assert!(result.output.len() < 200);
    }
}
