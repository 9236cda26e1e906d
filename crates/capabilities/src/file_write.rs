//! File write capability — write or create files with path validation.

use crate::path_policy::PathPolicy;
use async_trait::async_trait;
use forgeloop_core::capability::{Capability, CapabilityCategory, CapabilityOutput, ResourceKey};
use forgeloop_core::error::CapabilityError;
use std::sync::Arc;

pub struct FileWrite {
    policy: Arc<PathPolicy>,
}

impl FileWrite {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }

    pub fn unrestricted() -> Self {
        Self::new(Arc::new(PathPolicy::unrestricted()))
    }
}

#[async_trait]
impl Capability for FileWrite {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file if it doesn't exist, overwrites if it does."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to write to"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn category(&self) -> CapabilityCategory {
        CapabilityCategory::Write
    }

    fn conflict_key(&self, params: &serde_json::Value) -> Option<ResourceKey> {
        params["path"]
            .as_str()
            .map(|p| ResourceKey(p.to_string()))
    }

    async fn invoke(
        &self,
        params: serde_json::Value,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let path = params["path"]
            .as_str()
            .ok_or_else(|| CapabilityError::InvalidParameters("Missing 'path' parameter".into()))?;

        let content = params["content"].as_str().ok_or_else(|| {
            CapabilityError::InvalidParameters("Missing 'content' parameter".into())
        })?;

        if let Err(e) = self.policy.validate(path) {
            return Err(CapabilityError::PermissionDenied {
                capability: "file_write".into(),
                reason: e.to_string(),
            });
        }

        // Ensure parent directory exists
        if let Some(parent) = std::path::Path::new(path).parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return Ok(CapabilityOutput::fail(format!(
                "Failed to create directory: {e}"
            )));
        }

        match tokio::fs::write(path, content).await {
            Ok(()) => Ok(CapabilityOutput::ok(format!(
                "Successfully wrote {} bytes to {path}",
                content.len()
            ))),
            Err(e) => Ok(CapabilityOutput::fail(format!("Failed to write file: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_metadata() {
        let cap = FileWrite::unrestricted();
        assert_eq!(cap.name(), "file_write");
        assert!(!cap.is_read_only());
        assert_eq!(cap.category(), CapabilityCategory::Write);

        let schema = cap.parameters_schema();
        assert_eq!(schema["required"], serde_json::json!(["path", "content"]));
    }

    #[test]
    fn conflict_key_is_target_path() {
        let cap = FileWrite::unrestricted();
        let key = cap.conflict_key(&serde_json::json!({"path": "/tmp/a.txt", "content": "x"}));
        assert_eq!(key, Some(ResourceKey("/tmp/a.txt".into())));

        // No path parameter → ambiguous target
        assert!(cap.conflict_key(&serde_json::json!({})).is_none());
    }

    #[tokio::test]
    async fn write_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("output.txt");

        let cap = FileWrite::unrestricted();
        let result = cap
            .invoke(serde_json::json!({
                "path": file_path.to_str().unwrap(),
                "content": "Hello from test!"
            }))
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.output.contains("16 bytes"));
        assert_eq!(
            std::fs::read_to_string(&file_path).unwrap(),
            "Hello from test!"
        );
    }

    #[tokio::test]
    async fn write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("nested").join("dir").join("file.txt");

        let cap = FileWrite::unrestricted();
        let result = cap
            .invoke(serde_json::json!({
                "path": file_path.to_str().unwrap(),
                "content": "nested content"
            }))
            .await
            .unwrap();

        assert!(result.success);
        assert!(file_path.exists());
    }

    #[tokio::test]
    async fn overwrite_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("overwrite.txt");
        std::fs::write(&file_path, "old content").unwrap();

        let cap = FileWrite::unrestricted();
        let result = cap
            .invoke(serde_json::json!({
                "path": file_path.to_str().unwrap(),
                "content": "new content"
            }))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(std::fs::read_to_string(&file_path).unwrap(), "new content");
    }

    #[tokio::test]
    async fn missing_content_parameter() {
        let cap = FileWrite::unrestricted();
        let result = cap.invoke(serde_json::json!({"path": "/tmp/x.txt"})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn forbidden_path_blocked() {
        let policy = Arc::new(PathPolicy::new(vec![], vec!["/etc".into()]));
        let cap = FileWrite::new(policy);
        let result = cap
            .invoke(serde_json::json!({"path": "/etc/shadow", "content": "bad"}))
            .await;
        assert!(matches!(
            result,
            Err(CapabilityError::PermissionDenied { .. })
        ));
    }
}
