//! Code search capability — substring search across a directory tree.

use crate::path_policy::PathPolicy;
use async_trait::async_trait;
use forgeloop_core::capability::{Capability, CapabilityCategory, CapabilityOutput};
use forgeloop_core::error::CapabilityError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directories never descended into during a search.
const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules", ".venv", "__pycache__"];

pub struct CodeSearch {
    policy: Arc<PathPolicy>,
    max_results: usize,
}

impl CodeSearch {
    pub fn new(policy: Arc<PathPolicy>, max_results: usize) -> Self {
        Self {
            policy,
            max_results,
        }
    }

    pub fn unrestricted() -> Self {
        Self::new(Arc::new(PathPolicy::unrestricted()), 50)
    }

    fn search_tree(
        root: &Path,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<String>, std::io::Error> {
        let needle = query.to_lowercase();
        let mut matches = Vec::new();
        let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            if matches.len() >= max_results {
                break;
            }
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_string();

                if path.is_dir() {
                    if !SKIPPED_DIRS.contains(&name.as_str()) && !name.starts_with('.') {
                        pending.push(path);
                    }
                    continue;
                }

                // Binary files fail the UTF-8 read and are skipped.
                let Ok(content) = std::fs::read_to_string(&path) else {
                    continue;
                };

                for (line_no, line) in content.lines().enumerate() {
                    if line.to_lowercase().contains(&needle) {
                        matches.push(format!(
                            "{}:{}: {}",
                            path.display(),
                            line_no + 1,
                            line.trim()
                        ));
                        if matches.len() >= max_results {
                            break;
                        }
                    }
                }
                if matches.len() >= max_results {
                    break;
                }
            }
        }

        Ok(matches)
    }
}

#[async_trait]
impl Capability for CodeSearch {
    fn name(&self) -> &str {
        "code_search"
    }

    fn description(&self) -> &str {
        "Search files under a directory for lines containing a string (case-insensitive). Returns 'file:line: text' matches."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Text to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search (defaults to the current directory)"
                }
            },
            "required": ["query"]
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn category(&self) -> CapabilityCategory {
        CapabilityCategory::Search
    }

    async fn invoke(
        &self,
        params: serde_json::Value,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let query = params["query"].as_str().ok_or_else(|| {
            CapabilityError::InvalidParameters("Missing 'query' parameter".into())
        })?;
        let path = params["path"].as_str().unwrap_or(".");

        if query.trim().is_empty() {
            return Err(CapabilityError::InvalidParameters(
                "'query' must not be empty".into(),
            ));
        }

        let root = match self.policy.validate(path) {
            Ok(p) => p,
            Err(e) => {
                return Err(CapabilityError::PermissionDenied {
                    capability: "code_search".into(),
                    reason: e.to_string(),
                });
            }
        };

        let query = query.to_string();
        let max_results = self.max_results;
        // Tree walk is blocking I/O; keep it off the async executor.
        let searched = tokio::task::spawn_blocking(move || {
            Self::search_tree(&root, &query, max_results)
        })
        .await
        .map_err(|e| CapabilityError::ExecutionFailed {
            capability: "code_search".into(),
            reason: e.to_string(),
        })?;

        match searched {
            Ok(matches) if matches.is_empty() => {
                Ok(CapabilityOutput::ok("No matches found".to_string()))
            }
            Ok(matches) => {
                let mut text = matches.join("\n");
                if matches.len() >= self.max_results {
                    text.push_str(&format!("\n[truncated at {} matches]", self.max_results));
                }
                Ok(CapabilityOutput::ok(text))
            }
            Err(e) => Ok(CapabilityOutput::fail(format!("Search failed: {e}"))),
        }
    }
}
