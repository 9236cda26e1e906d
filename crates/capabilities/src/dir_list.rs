//! Directory listing capability.

use crate::path_policy::PathPolicy;
use async_trait::async_trait;
use forgeloop_core::capability::{Capability, CapabilityCategory, CapabilityOutput};
use forgeloop_core::error::CapabilityError;
use std::sync::Arc;

pub struct DirList {
    policy: Arc<PathPolicy>,
}

impl DirList {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }

    pub fn unrestricted() -> Self {
        Self::new(Arc::new(PathPolicy::unrestricted()))
    }
}

#[async_trait]
impl Capability for DirList {
    fn name(&self) -> &str {
        "dir_list"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Directories are suffixed with '/'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The directory to list"
                }
            },
            "required": ["path"]
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn category(&self) -> CapabilityCategory {
        CapabilityCategory::Read
    }

    async fn invoke(
        &self,
        params: serde_json::Value,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let path = params["path"]
            .as_str()
            .ok_or_else(|| CapabilityError::InvalidParameters("Missing 'path' parameter".into()))?;

        if let Err(e) = self.policy.validate(path) {
            return Err(CapabilityError::PermissionDenied {
                capability: "dir_list".into(),
                reason: e.to_string(),
            });
        }

        let mut reader = match tokio::fs::read_dir(path).await {
            Ok(r) => r,
            Err(e) => {
                return Ok(CapabilityOutput::fail(format!(
                    "Failed to list directory: {e}"
                )));
            }
        };

        let mut entries = Vec::new();
        loop {
            match reader.next_entry().await {
                Ok(Some(entry)) => {
                    let name = entry.file_name().to_string_lossy().to_string();
                    let is_dir = entry
                        .file_type()
                        .await
                        .map(|t| t.is_dir())
                        .unwrap_or(false);
                    if is_dir {
                        entries.push(format!("{name}/"));
                    } else {
                        entries.push(name);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    return Ok(CapabilityOutput::fail(format!(
                        "Failed to read directory entry: {e}"
                    )));
                }
            }
        }

        entries.sort();

        if entries.is_empty() {
            return Ok(CapabilityOutput::ok(format!("{path} is empty")));
        }

        Ok(CapabilityOutput::ok(entries.join("\n")))
    }
}
