//! Post-execution verification of invocation results.
//!
//! Every result that claims success gets a category-specific check
//! before it is folded back to the engine: reads must produce output,
//! writes are confirmed by reading the target back, empty searches
//! pass but pick up refinement suggestions, and trusted capabilities
//! (shell, git) are taken at their word. Results that already failed
//! are skipped — recovery deals with those, not the verifier.
//!
//! Verification never mutates the workspace and never aborts the turn.

use forgeloop_core::capability::{
    CapabilityCategory, CapabilityRegistry, InvocationRequest, InvocationResult,
};
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Capability used to read a write target back.
const READ_BACK_CAPABILITY: &str = "file_read";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    Passed,
    Failed,
    Skipped,
}

/// Outcome of one verification check.
#[derive(Debug, Clone)]
pub struct Verification {
    pub status: VerificationStatus,
    pub notes: Vec<String>,
}

impl Verification {
    fn passed() -> Self {
        Self {
            status: VerificationStatus::Passed,
            notes: Vec::new(),
        }
    }

    fn passed_with(notes: Vec<String>) -> Self {
        Self {
            status: VerificationStatus::Passed,
            notes,
        }
    }

    fn failed(notes: Vec<String>) -> Self {
        Self {
            status: VerificationStatus::Failed,
            notes,
        }
    }

    fn skipped() -> Self {
        Self {
            status: VerificationStatus::Skipped,
            notes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifierStats {
    pub checks: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl VerifierStats {
    /// Passed over examined (skips excluded); 0.0 before any check.
    pub fn success_rate(&self) -> f64 {
        let examined = self.passed + self.failed;
        if examined == 0 {
            0.0
        } else {
            self.passed as f64 / examined as f64
        }
    }
}

/// Category-dispatched result verifier.
pub struct Verifier {
    registry: Arc<CapabilityRegistry>,
    stats: Mutex<VerifierStats>,
}

impl Verifier {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            stats: Mutex::new(VerifierStats::default()),
        }
    }

    /// Check one result. Skips results that already failed.
    pub async fn verify(
        &self,
        request: &InvocationRequest,
        result: &InvocationResult,
    ) -> Verification {
        let verification = if !result.success {
            Verification::skipped()
        } else {
            match self.category_of(&request.capability_name) {
                CapabilityCategory::Read => verify_read(result),
                CapabilityCategory::Write => self.verify_write(request, result).await,
                CapabilityCategory::Search => verify_search(result),
                CapabilityCategory::Trust => Verification::passed(),
            }
        };

        {
            let mut stats = self.lock_stats();
            stats.checks += 1;
            match verification.status {
                VerificationStatus::Passed => stats.passed += 1,
                VerificationStatus::Failed => stats.failed += 1,
                VerificationStatus::Skipped => stats.skipped += 1,
            }
        }

        debug!(
            capability = %request.capability_name,
            status = ?verification.status,
            "Verification complete"
        );
        verification
    }

    /// Verify and write the outcome onto the result in place.
    pub async fn annotate(
        &self,
        request: &InvocationRequest,
        result: &mut InvocationResult,
    ) -> VerificationStatus {
        let verification = self.verify(request, result).await;
        result.verified = verification.status == VerificationStatus::Passed;
        result.verification_notes = verification.notes;
        verification.status
    }

    fn category_of(&self, capability_name: &str) -> CapabilityCategory {
        self.registry
            .get(capability_name)
            .map(|c| c.category())
            .unwrap_or(CapabilityCategory::Trust)
    }

    /// Confirm a write by reading the target back through the registry.
    async fn verify_write(
        &self,
        request: &InvocationRequest,
        _result: &InvocationResult,
    ) -> Verification {
        let Some(path) = request.parameters["path"].as_str() else {
            return Verification::passed_with(vec![
                "Write target not stated; accepted without read-back".to_string(),
            ]);
        };

        if self.registry.get(READ_BACK_CAPABILITY).is_none() {
            return Verification::passed_with(vec![
                "Read-back capability unavailable; accepted without read-back".to_string(),
            ]);
        }

        let read_back = InvocationRequest::new(
            READ_BACK_CAPABILITY,
            json!({ "path": path }),
            request.origin_turn_id.clone(),
        );

        let output = match self.registry.invoke(&read_back).await {
            Ok(output) => output,
            Err(e) => {
                return Verification::failed(vec![format!("Read-back failed: {e}")]);
            }
        };

        if !output.success {
            return Verification::failed(vec![format!(
                "Write target could not be read back: {}",
                output.output
            )]);
        }

        if let Some(content) = request.parameters["content"].as_str() {
            if !content_confirmed(&output.output, content) {
                return Verification::failed(vec![
                    "File content does not match the requested write".to_string(),
                ]);
            }
        } else if let Some(replace) = request.parameters["replace"].as_str() {
            if !replace.is_empty() && !output.output.contains(replace) {
                return Verification::failed(vec![
                    "Replacement text not found in the file after the edit".to_string(),
                ]);
            }
        }

        Verification::passed_with(vec![format!("Write to {path} confirmed by read-back")])
    }

    pub fn stats(&self) -> VerifierStats {
        *self.lock_stats()
    }

    pub fn take_stats(&self) -> VerifierStats {
        std::mem::take(&mut *self.lock_stats())
    }

    fn lock_stats(&self) -> MutexGuard<'_, VerifierStats> {
        match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// A successful read with no output is suspicious: the target is
/// probably wrong, not empty.
fn verify_read(result: &InvocationResult) -> Verification {
    if result.output.trim().is_empty() {
        Verification::failed(vec![
            "Read returned no content".to_string(),
            "Check that the path is correct".to_string(),
            "List the parent directory to find the right name".to_string(),
        ])
    } else {
        Verification::passed()
    }
}

/// Empty search results are a valid answer, but worth refining.
fn verify_search(result: &InvocationResult) -> Verification {
    let lowered = result.output.to_lowercase();
    if lowered.contains("no matches") || lowered.contains("no results") {
        Verification::passed_with(vec![
            "Try a broader search pattern".to_string(),
            "Search from a higher directory".to_string(),
            "Check the spelling of the search term".to_string(),
        ])
    } else {
        Verification::passed()
    }
}

/// Exact match, or prefix match when the read-back was truncated.
fn content_confirmed(read_back: &str, expected: &str) -> bool {
    if read_back == expected {
        return true;
    }
    if let Some(idx) = read_back.rfind("\n[truncated: showing") {
        return expected.starts_with(&read_back[..idx]);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeloop_capabilities::FileRead;
    use forgeloop_core::capability::CapabilityOutput;
    use serde_json::json;

    fn verifier_with_file_read() -> Verifier {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(FileRead::unrestricted()));
        Verifier::new(Arc::new(registry))
    }

    fn ok_result(name: &str, output: &str) -> InvocationResult {
        InvocationResult::from_output(name, CapabilityOutput::ok(output), 5)
    }

    #[tokio::test]
    async fn nonempty_read_passes() {
        let verifier = verifier_with_file_read();
        let request = InvocationRequest::new("file_read", json!({"path": "a.rs"}), "t1");
        let result = ok_result("file_read", "fn main() {}");

        let verification = verifier.verify(&request, &result).await;
        assert_eq!(verification.status, VerificationStatus::Passed);
        assert!(verification.notes.is_empty());
    }

    #[tokio::test]
    async fn empty_read_fails_with_suggestions() {
        let verifier = verifier_with_file_read();
        let request = InvocationRequest::new("file_read", json!({"path": "a.rs"}), "t1");
        let result = ok_result("file_read", "   ");

        let verification = verifier.verify(&request, &result).await;
        assert_eq!(verification.status, VerificationStatus::Failed);
        assert_eq!(verification.notes.len(), 3);
    }

    #[tokio::test]
    async fn failed_results_are_skipped() {
        let verifier = verifier_with_file_read();
        let request = InvocationRequest::new("file_read", json!({"path": "a.rs"}), "t1");
        let result =
            InvocationResult::from_output("file_read", CapabilityOutput::fail("no such file"), 5);

        let verification = verifier.verify(&request, &result).await;
        assert_eq!(verification.status, VerificationStatus::Skipped);
        assert_eq!(verifier.stats().skipped, 1);
    }

    #[tokio::test]
    async fn write_confirmed_by_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "written content").unwrap();

        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(FileRead::unrestricted()));
        registry.register(Arc::new(forgeloop_capabilities::FileWrite::unrestricted()));
        let verifier = Verifier::new(Arc::new(registry));

        let request = InvocationRequest::new(
            "file_write",
            json!({"path": path.to_str().unwrap(), "content": "written content"}),
            "t1",
        );
        let result = ok_result("file_write", "Wrote 15 bytes");

        let verification = verifier.verify(&request, &result).await;
        assert_eq!(verification.status, VerificationStatus::Passed);
        assert!(verification.notes[0].contains("confirmed by read-back"));
    }

    #[tokio::test]
    async fn write_mismatch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "something else entirely").unwrap();

        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(FileRead::unrestricted()));
        registry.register(Arc::new(forgeloop_capabilities::FileWrite::unrestricted()));
        let verifier = Verifier::new(Arc::new(registry));

        let request = InvocationRequest::new(
            "file_write",
            json!({"path": path.to_str().unwrap(), "content": "written content"}),
            "t1",
        );
        let result = ok_result("file_write", "Wrote 15 bytes");

        let verification = verifier.verify(&request, &result).await;
        assert_eq!(verification.status, VerificationStatus::Failed);
        assert!(verification.notes[0].contains("does not match"));
    }

    #[tokio::test]
    async fn write_to_missing_target_fails() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(FileRead::unrestricted()));
        registry.register(Arc::new(forgeloop_capabilities::FileWrite::unrestricted()));
        let verifier = Verifier::new(Arc::new(registry));

        let request = InvocationRequest::new(
            "file_write",
            json!({"path": "/nonexistent/dir/out.txt", "content": "x"}),
            "t1",
        );
        let result = ok_result("file_write", "Wrote 1 byte");

        let verification = verifier.verify(&request, &result).await;
        assert_eq!(verification.status, VerificationStatus::Failed);
    }

    #[tokio::test]
    async fn edit_confirmed_when_replacement_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.rs");
        std::fs::write(&path, "fn renamed_function() {}").unwrap();

        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(FileRead::unrestricted()));
        registry.register(Arc::new(forgeloop_capabilities::FileEdit::unrestricted()));
        let verifier = Verifier::new(Arc::new(registry));

        let request = InvocationRequest::new(
            "file_edit",
            json!({"path": path.to_str().unwrap(), "find": "old_function", "replace": "renamed_function"}),
            "t1",
        );
        let result = ok_result("file_edit", "Replaced 1 occurrence(s)");

        let verification = verifier.verify(&request, &result).await;
        assert_eq!(verification.status, VerificationStatus::Passed);
    }

    #[tokio::test]
    async fn empty_search_passes_with_suggestions() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(forgeloop_capabilities::CodeSearch::unrestricted()));
        let verifier = Verifier::new(Arc::new(registry));

        let request =
            InvocationRequest::new("code_search", json!({"query": "nothing"}), "t1");
        let result = ok_result("code_search", "No matches found");

        let verification = verifier.verify(&request, &result).await;
        assert_eq!(verification.status, VerificationStatus::Passed);
        assert_eq!(verification.notes.len(), 3);
    }

    #[tokio::test]
    async fn trust_capabilities_pass_on_success() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(forgeloop_capabilities::GitStatus::default()));
        let verifier = Verifier::new(Arc::new(registry));

        let request = InvocationRequest::new("git_status", json!({}), "t1");
        let result = ok_result("git_status", "On branch main\nWorking tree clean");

        let verification = verifier.verify(&request, &result).await;
        assert_eq!(verification.status, VerificationStatus::Passed);
    }

    #[tokio::test]
    async fn annotate_writes_outcome_onto_result() {
        let verifier = verifier_with_file_read();
        let request = InvocationRequest::new("file_read", json!({"path": "a.rs"}), "t1");
        let mut result = ok_result("file_read", "");

        let status = verifier.annotate(&request, &mut result).await;
        assert_eq!(status, VerificationStatus::Failed);
        assert!(!result.verified);
        assert!(!result.verification_notes.is_empty());
    }

    #[tokio::test]
    async fn stats_track_success_rate() {
        let verifier = verifier_with_file_read();
        let request = InvocationRequest::new("file_read", json!({"path": "a.rs"}), "t1");

        verifier.verify(&request, &ok_result("file_read", "content")).await;
        verifier.verify(&request, &ok_result("file_read", "content")).await;
        verifier.verify(&request, &ok_result("file_read", "")).await;

        let stats = verifier.stats();
        assert_eq!(stats.checks, 3);
        assert_eq!(stats.passed, 2);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn truncated_read_back_still_confirms() {
        let expected = "a".repeat(200);
        let read_back = format!("{}\n[truncated: showing 100 of 200 bytes]", "a".repeat(100));
        assert!(content_confirmed(&read_back, &expected));
        assert!(!content_confirmed("different", &expected));
    }
}
