//! Unproductive-behavior detection inside the orchestration loop.
//!
//! Engines sometimes get stuck: re-issuing the same invocation batch,
//! grinding through searches that keep finding nothing, or exploring
//! forever without committing to an answer. The guard watches for all
//! three and either stops the loop (hard repetition) or injects a
//! synthesis nudge into the conversation (unproductive exploration).

use forgeloop_core::capability::{InvocationRequest, InvocationResult};
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::router::TaskType;

/// How many recent batch signatures are considered for repetition.
const REPETITION_WINDOW: usize = 5;
/// Occurrences of one signature within the window that count as a loop.
const REPETITION_THRESHOLD: usize = 3;
/// Empty searches tolerated before a synthesis nudge.
const EMPTY_SEARCH_LIMIT: u32 = 4;
/// Iteration at which an explore turn is pushed to conclude.
const FORCE_SYNTHESIS_ITERATION: u32 = 10;

/// What the guard concluded from the latest invocation batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    Continue,
    /// The same batch keeps coming back; stop the loop early.
    RepetitionDetected,
}

/// Per-turn loop state. Reset at the start of every turn.
pub struct LoopGuard {
    recent_signatures: Vec<String>,
    empty_search_count: u32,
    files_discovered: BTreeSet<String>,
}

impl LoopGuard {
    pub fn new() -> Self {
        Self {
            recent_signatures: Vec::new(),
            empty_search_count: 0,
            files_discovered: BTreeSet::new(),
        }
    }

    pub fn reset(&mut self) {
        self.recent_signatures.clear();
        self.empty_search_count = 0;
        self.files_discovered.clear();
    }

    /// Record a parsed invocation batch and check for repetition:
    /// the same signature three or more times within the last five
    /// batches means the engine is looping.
    pub fn observe_batch(&mut self, requests: &[InvocationRequest]) -> GuardVerdict {
        if requests.is_empty() {
            return GuardVerdict::Continue;
        }

        let signature = batch_signature(requests);
        self.recent_signatures.push(signature.clone());

        if self.recent_signatures.len() >= REPETITION_THRESHOLD {
            let window_start = self.recent_signatures.len().saturating_sub(REPETITION_WINDOW);
            let occurrences = self.recent_signatures[window_start..]
                .iter()
                .filter(|s| **s == signature)
                .count();
            if occurrences >= REPETITION_THRESHOLD {
                warn!(
                    capability = %requests[0].capability_name,
                    "Loop detected: same invocation batch repeated"
                );
                return GuardVerdict::RepetitionDetected;
            }
        }

        GuardVerdict::Continue
    }

    /// Track productive vs unproductive results: empty searches count
    /// up, successful file reads count down, directory listings feed
    /// the discovered-file set used in the synthesis nudge.
    pub fn observe_results(&mut self, results: &[InvocationResult]) {
        for result in results {
            if !result.success {
                continue;
            }
            match result.capability_name.as_str() {
                "code_search" => {
                    if result.output.contains("No matches found")
                        || result.output.trim().is_empty()
                    {
                        self.empty_search_count += 1;
                        info!(count = self.empty_search_count, "Empty search");
                    }
                }
                "dir_list" => {
                    for line in result.output.lines() {
                        let entry = line.trim();
                        if !entry.is_empty() {
                            self.files_discovered.insert(entry.to_string());
                        }
                    }
                }
                "file_read" => {
                    self.empty_search_count = self.empty_search_count.saturating_sub(1);
                }
                _ => {}
            }
        }
    }

    /// When too many searches came back empty, produce a nudge telling
    /// the engine to stop searching and synthesize. Consumes the streak.
    pub fn synthesis_nudge(&mut self) -> Option<String> {
        if self.empty_search_count < EMPTY_SEARCH_LIMIT {
            return None;
        }

        warn!(
            empty_searches = self.empty_search_count,
            "Unproductive exploration; injecting synthesis nudge"
        );

        let discovered = if self.files_discovered.is_empty() {
            "See directory listings above".to_string()
        } else {
            self.files_discovered
                .iter()
                .take(20)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        };

        self.empty_search_count = 0;
        Some(format!(
            "You've searched extensively but many patterns weren't found.\n\
             Files discovered so far: {discovered}\n\n\
             STOP SEARCHING. Instead:\n\
             1. Summarize what you DID find from the directory listings and any files you read\n\
             2. Describe the project based on available evidence\n\
             3. If you couldn't find specific patterns, say so and explain what the project \
             likely is based on the file structure"
        ))
    }

    /// Explore turns that run long are told to conclude.
    pub fn force_synthesis(iteration: u32, task_type: TaskType) -> Option<&'static str> {
        if task_type == TaskType::Explore && iteration >= FORCE_SYNTHESIS_ITERATION {
            info!(iteration, "Forcing synthesis for long-running exploration");
            Some(
                "**Time to synthesize:** You've explored enough. Provide your analysis now \
                 based on what you found.",
            )
        } else {
            None
        }
    }

    pub fn empty_search_count(&self) -> u32 {
        self.empty_search_count
    }
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new()
    }
}

fn batch_signature(requests: &[InvocationRequest]) -> String {
    requests
        .iter()
        .map(|r| r.signature())
        .collect::<Vec<_>>()
        .join("|")
}
