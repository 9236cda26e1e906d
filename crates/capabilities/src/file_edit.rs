//! File edit capability — targeted find/replace inside an existing file.

use crate::path_policy::PathPolicy;
use async_trait::async_trait;
use forgeloop_core::capability::{Capability, CapabilityCategory, CapabilityOutput, ResourceKey};
use forgeloop_core::error::CapabilityError;
use std::sync::Arc;

pub struct FileEdit {
    policy: Arc<PathPolicy>,
}

impl FileEdit {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }

    pub fn unrestricted() -> Self {
        Self::new(Arc::new(PathPolicy::unrestricted()))
    }
}

#[async_trait]
impl Capability for FileEdit {
    fn name(&self) -> &str {
        "file_edit"
    }

    fn description(&self) -> &str {
        "Replace occurrences of a string in an existing file. Fails if the search string is not found."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file to edit"
                },
                "find": {
                    "type": "string",
                    "description": "Exact text to search for"
                },
                "replace": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "all": {
                    "type": "boolean",
                    "description": "Replace every occurrence instead of just the first"
                }
            },
            "required": ["path", "find", "replace"]
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
        let find = params["find"]
            .as_str()
            .ok_or_else(|| CapabilityError::InvalidParameters("Missing 'find' parameter".into()))?;
        let replace = params["replace"].as_str().ok_or_else(|| {
            CapabilityError::InvalidParameters("Missing 'replace' parameter".into())
        })?;
        let replace_all = params["all"].as_bool().unwrap_or(false);

        if find.is_empty() {
            return Err(CapabilityError::InvalidParameters(
                "'find' must not be empty".into(),
            ));
        }

        if let Err(e) = self.policy.validate(path) {
            return Err(CapabilityError::PermissionDenied {
                capability: "file_edit".into(),
                reason: e.to_string(),
            });
        }

        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) => {
                return Ok(CapabilityOutput::fail(format!("Failed to read file: {e}")));
            }
        };

        let occurrences = content.matches(find).count();
        if occurrences == 0 {
            return Ok(CapabilityOutput::fail(format!(
                "Search string not found in {path}"
            )));
        }

        let (updated, replaced) = if replace_all {
            (content.replace(find, replace), occurrences)
        } else {
            (content.replacen(find, replace, 1), 1)
        };

        match tokio::fs::write(path, updated).await {
            Ok(()) => Ok(CapabilityOutput::ok(format!(
                "Replaced {replaced} occurrence(s) in {path}"
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
        let cap = FileEdit::unrestricted();
        assert_eq!(cap.name(), "file_edit");
        assert!(!cap.is_read_only());
        assert_eq!(cap.category(), CapabilityCategory::Write);
    }

    #[tokio::test]
    async fn replaces_first_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("code.rs");
        std::fs::write(&file_path, "let x = 1; let x = 1;").unwrap();

        let cap = FileEdit::unrestricted();
        let result = cap
            .invoke(serde_json::json!({
                "path": file_path.to_str().unwrap(),
                "find": "let x = 1;",
                "replace": "let y = 2;"
            }))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(
            std::fs::read_to_string(&file_path).unwrap(),
            "let y = 2; let x = 1;"
        );
    }

    #[tokio::test]
    async fn replaces_all_occurrences() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("code.rs");
        std::fs::write(&file_path, "foo bar foo baz foo").unwrap();

        let cap = FileEdit::unrestricted();
        let result = cap
            .invoke(serde_json::json!({
                "path": file_path.to_str().unwrap(),
                "find": "foo",
                "replace": "qux",
                "all": true
            }))
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.output.contains("3 occurrence"));
        assert_eq!(
            std::fs::read_to_string(&file_path).unwrap(),
            "qux bar qux baz qux"
        );
    }

    #[tokio::test]
    async fn missing_search_string_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("code.rs");
        std::fs::write(&file_path, "nothing to see").unwrap();

        let cap = FileEdit::unrestricted();
        let result = cap
            .invoke(serde_json::json!({
                "path": file_path.to_str().unwrap(),
                "find": "absent",
                "replace": "x"
            }))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.output.contains("not found"));
    }

    #[tokio::test]
    async fn empty_find_rejected() {
        let cap = FileEdit::unrestricted();
        let result = cap
            .invoke(serde_json::json!({
                "path": "/tmp/x.txt",
                "find": "",
                "replace": "y"
            }))
            .await;
        assert!(matches!(
            result,
            Err(CapabilityError::InvalidParameters(_))
        ));
    }

    #[tokio::test]
    async fn nonexistent_file_fails() {
        let cap = FileEdit::unrestricted();
        let result = cap
            .invoke(serde_json::json!({
                "path": "/tmp/forgeloop_edit_missing_9876.txt",
                "find": "a",
                "replace": "b"
            }))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.output.contains("Failed to read file"));
    }
}
