//! Built-in capability implementations for forgeloop.
//!
//! Capabilities give the orchestrator the ability to act on a workspace:
//! read, write, and edit files, list directories, search code, run shell
//! commands, and inspect git state.
//!
//! Every file capability shares one [`PathPolicy`] so workspace scoping
//! and forbidden-path rules are enforced uniformly.

pub mod code_search;
pub mod dir_list;
pub mod file_edit;
pub mod file_read;
pub mod file_write;
pub mod git_status;
pub mod path_policy;
pub mod shell;

pub use code_search::CodeSearch;
pub use dir_list::DirList;
pub use file_edit::FileEdit;
pub use file_read::FileRead;
pub use file_write::FileWrite;
pub use git_status::GitStatus;
pub use path_policy::{PathPolicy, PathValidationError};
pub use shell::ShellCapability;

use forgeloop_config::CapabilitiesConfig;
use forgeloop_core::capability::CapabilityRegistry;
use std::path::Path;
use std::sync::Arc;

/// Default search result cap for `code_search`.
const DEFAULT_MAX_SEARCH_RESULTS: usize = 50;

/// Create a registry with all built-in capabilities, scoped to the
/// given workspace root.
///
/// All file capabilities share one path policy built from the config,
/// so allowed roots and forbidden paths apply consistently. The shell
/// allowlist and timeouts also come from the config.
pub fn default_registry(config: &CapabilitiesConfig, workspace_root: &Path) -> CapabilityRegistry {
    let policy = Arc::new(PathPolicy::from_config(config, workspace_root));

    let mut registry = CapabilityRegistry::new();
    registry.register(Arc::new(FileRead::new(
        policy.clone(),
        config.max_output_bytes,
    )));
    registry.register(Arc::new(FileWrite::new(policy.clone())));
    registry.register(Arc::new(FileEdit::new(policy.clone())));
    registry.register(Arc::new(DirList::new(policy.clone())));
    registry.register(Arc::new(CodeSearch::new(
        policy.clone(),
        DEFAULT_MAX_SEARCH_RESULTS,
    )));
    registry.register(Arc::new(ShellCapability::new(
        config.shell_allowlist.clone(),
        config.shell_timeout_secs,
        config.max_output_bytes,
    )));
    registry.register(Arc::new(GitStatus::new(Some(
        workspace_root.to_path_buf(),
    ))));
    registry
}
