//! File read capability — read file contents with path validation.

use crate::path_policy::PathPolicy;
use async_trait::async_trait;
use forgeloop_core::capability::{Capability, CapabilityCategory, CapabilityOutput};
use forgeloop_core::error::CapabilityError;
use std::sync::Arc;

pub struct FileRead {
    policy: Arc<PathPolicy>,
    max_bytes: usize,
}

impl FileRead {
    pub fn new(policy: Arc<PathPolicy>, max_bytes: usize) -> Self {
        Self { policy, max_bytes }
    }

    /// A read capability with no path restrictions (tests, local runs).
    pub fn unrestricted() -> Self {
        Self::new(Arc::new(PathPolicy::unrestricted()), 65536)
    }
}

#[async_trait]
impl Capability for FileRead {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
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
                capability: "file_read".into(),
                reason: e.to_string(),
            });
        }

        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                if content.len() > self.max_bytes {
                    let total = content.len();
                    let mut cut = self.max_bytes;
                    while !content.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    return Ok(CapabilityOutput::ok(format!(
                        "{}\n[truncated: showing {cut} of {total} bytes]",
                        &content[..cut]
                    )));
                }
                Ok(CapabilityOutput::ok(content))
            }
            Err(e) => Ok(CapabilityOutput::fail(format!("Failed to read file: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn capability_metadata() {
        let cap = FileRead::unrestricted();
        assert_eq!(cap.name(), "file_read");
        assert!(cap.is_read_only());
        assert_eq!(cap.category(), CapabilityCategory::Read);
        assert!(cap.conflict_key(&serde_json::json!({})).is_none());

        let schema = cap.parameters_schema();
        assert_eq!(schema["required"], serde_json::json!(["path"]));
    }

    #[tokio::test]
    async fn read_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("test.txt");
        let mut f = std::fs::File::create(&file_path).unwrap();
        writeln!(f, "Hello, world!").unwrap();

        let cap = FileRead::unrestricted();
        let result = cap
            .invoke(serde_json::json!({"path": file_path.to_str().unwrap()}))
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.output.contains("Hello, world!"));
    }

    #[tokio::test]
    async fn read_nonexistent_file() {
        let cap = FileRead::unrestricted();
        let result = cap
            .invoke(serde_json::json!({"path": "/tmp/forgeloop_test_nonexistent_12345.txt"}))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.output.contains("Failed to read file"));
    }

    #[tokio::test]
    async fn oversized_file_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("big.txt");
        std::fs::write(&file_path, "x".repeat(200)).unwrap();

        let cap = FileRead::new(Arc::new(PathPolicy::unrestricted()), 50);
        let result = cap
            .invoke(serde_json::json!({"path": file_path.to_str().unwrap()}))
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.output.contains("[truncated"));
    }

    #[tokio::test]
    async fn missing_path_parameter() {
        let cap = FileRead::unrestricted();
        let result = cap.invoke(serde_json::json!({})).await;
        assert!(matches!(
            result,
            Err(CapabilityError::InvalidParameters(_))
        ));
    }

    #[tokio::test]
    async fn forbidden_path_blocked() {
        let policy = Arc::new(PathPolicy::new(vec![], vec!["/etc".into()]));
        let cap = FileRead::new(policy, 65536);
        let result = cap.invoke(serde_json::json!({"path": "/etc/shadow"})).await;
        assert!(matches!(
            result,
            Err(CapabilityError::PermissionDenied { .. })
        ));
    }
}
