//! Git status capability — read-only view of the working tree.

use async_trait::async_trait;
use forgeloop_core::capability::{Capability, CapabilityCategory, CapabilityOutput};
use forgeloop_core::error::CapabilityError;
use std::path::PathBuf;
use tokio::process::Command;

pub struct GitStatus {
    workdir: Option<PathBuf>,
}

impl GitStatus {
    pub fn new(workdir: Option<PathBuf>) -> Self {
        Self { workdir }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("git");
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl Default for GitStatus {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl Capability for GitStatus {
    fn name(&self) -> &str {
        "git_status"
    }

    fn description(&self) -> &str {
        "Show the current git branch and working tree status (porcelain format)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn category(&self) -> CapabilityCategory {
        CapabilityCategory::Trust
    }

    async fn invoke(
        &self,
        _params: serde_json::Value,
    ) -> Result<CapabilityOutput, CapabilityError> {
        // `branch --show-current` succeeds even before the first commit,
        // where `rev-parse HEAD` would fail on the unborn branch.
        let branch = self
            .command()
            .args(["branch", "--show-current"])
            .output()
            .await;

        let branch = match branch {
            Ok(out) if out.status.success() => {
                let name = String::from_utf8_lossy(&out.stdout).trim().to_string();
                if name.is_empty() {
                    // Detached HEAD prints nothing.
                    "HEAD (detached)".to_string()
                } else {
                    name
                }
            }
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
                return Ok(CapabilityOutput::fail(format!(
                    "Not a git repository: {stderr}"
                )));
            }
            Err(e) => {
                return Ok(CapabilityOutput::fail(format!("Failed to run git: {e}")));
            }
        };

        let status = self
            .command()
            .args(["status", "--porcelain"])
            .output()
            .await;

        match status {
            Ok(out) if out.status.success() => {
                let listing = String::from_utf8_lossy(&out.stdout).trim_end().to_string();
                if listing.is_empty() {
                    Ok(CapabilityOutput::ok(format!(
                        "On branch {branch}\nWorking tree clean"
                    )))
                } else {
                    Ok(CapabilityOutput::ok(format!(
                        "On branch {branch}\n{listing}"
                    )))
                }
            }
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
                Ok(CapabilityOutput::fail(format!("git status failed: {stderr}")))
            }
            Err(e) => Ok(CapabilityOutput::fail(format!("Failed to run git: {e}"))),
        }
    }
}
