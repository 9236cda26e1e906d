//! Per-batch invocation processing.
//!
//! One engine response yields one batch of invocation requests. The
//! pipeline runs the whole batch to completion before the next engine
//! call: dispatch (cache included), then recovery for failures, then
//! verification of every final result. The engine sees the annotated
//! outputs; the caller sees the counters.

use forgeloop_core::capability::{InvocationRequest, InvocationResult};
use forgeloop_core::recovery::{ErrorRecord, RecoveryOutcome, RecoveryStrategy};
use tracing::{debug, warn};

use crate::dispatcher::ParallelDispatcher;
use crate::recovery::{RecoveryManager, format_suggestions};
use crate::verifier::{VerificationStatus, Verifier};

/// Outcome of processing one invocation batch.
#[derive(Debug)]
pub struct ProcessedBatch {
    /// Final results, in request order, outputs annotated.
    pub results: Vec<InvocationResult>,
    /// Failures turned into successes by retry.
    pub recovered: u32,
    pub verifications_passed: u32,
    pub verifications_failed: u32,
    pub verifications_skipped: u32,
    /// Error records appended to the recovery history by this batch.
    pub recovery_records: Vec<ErrorRecord>,
    /// A fatal failure was seen; the active task should not continue.
    pub aborted: bool,
}

impl ProcessedBatch {
    fn empty() -> Self {
        Self {
            results: Vec::new(),
            recovered: 0,
            verifications_passed: 0,
            verifications_failed: 0,
            verifications_skipped: 0,
            recovery_records: Vec::new(),
            aborted: false,
        }
    }
}

/// Dispatch, verify, recover — in that order, once per batch.
pub struct InvocationPipeline {
    dispatcher: ParallelDispatcher,
    verifier: Verifier,
}

impl InvocationPipeline {
    pub fn new(dispatcher: ParallelDispatcher, verifier: Verifier) -> Self {
        Self {
            dispatcher,
            verifier,
        }
    }

    pub fn dispatcher(&self) -> &ParallelDispatcher {
        &self.dispatcher
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Run a batch end to end. Results come back in request order with
    /// recovery and verification notes already folded into the outputs.
    pub async fn process(
        &self,
        requests: &[InvocationRequest],
        recovery: &mut RecoveryManager,
    ) -> ProcessedBatch {
        let mut batch = ProcessedBatch::empty();
        if requests.is_empty() {
            return batch;
        }

        let dispatched = self.dispatcher.dispatch(requests).await;

        for (request, mut result) in requests.iter().zip(dispatched) {
            if !result.success {
                result = self.recover(request, result, recovery, &mut batch).await;
            }

            let status = self.verifier.annotate(request, &mut result).await;
            match status {
                VerificationStatus::Passed => batch.verifications_passed += 1,
                VerificationStatus::Failed => {
                    batch.verifications_failed += 1;
                    if !result.verification_notes.is_empty() {
                        let notes = result
                            .verification_notes
                            .iter()
                            .map(|n| format!("- {n}"))
                            .collect::<Vec<_>>()
                            .join("\n");
                        append_note(&mut result.output, "[Verification Suggestions]", &notes);
                    }
                }
                VerificationStatus::Skipped => batch.verifications_skipped += 1,
            }

            batch.results.push(result);
        }

        batch
    }

    /// Apply recovery to one failed result. Retry-leading suggestions
    /// are executed here with backoff; anything else becomes annotated
    /// guidance for the engine. Every final outcome lands in the
    /// recovery history.
    async fn recover(
        &self,
        request: &InvocationRequest,
        mut result: InvocationResult,
        recovery: &mut RecoveryManager,
        batch: &mut ProcessedBatch,
    ) -> InvocationResult {
        let mut attempt = 1u32;

        loop {
            let message = result.output.clone();
            let pattern = RecoveryManager::classify(&request.capability_name, &message);
            let actions = recovery.suggest(&request.capability_name, &message, attempt);
            let Some(leading) = actions.first().cloned() else {
                return result;
            };

            match leading.strategy {
                RecoveryStrategy::Retry => {
                    let delay = recovery.backoff_delay(attempt);
                    debug!(
                        capability = %request.capability_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying failed invocation"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;

                    let mut retried = self
                        .dispatcher
                        .dispatch(std::slice::from_ref(request))
                        .await;
                    match retried.pop() {
                        Some(r) if r.success => {
                            let record = ErrorRecord::new(
                                pattern,
                                &request.capability_name,
                                message,
                                RecoveryStrategy::Retry,
                                RecoveryOutcome::Recovered,
                            );
                            batch.recovery_records.push(record.clone());
                            recovery.record(record);
                            batch.recovered += 1;
                            debug!(
                                capability = %request.capability_name,
                                "Invocation recovered by retry"
                            );
                            return r;
                        }
                        Some(r) => result = r,
                        None => {}
                    }
                }
                strategy => {
                    let outcome = match strategy {
                        RecoveryStrategy::Abort => {
                            warn!(
                                capability = %request.capability_name,
                                "Fatal invocation failure, aborting"
                            );
                            batch.aborted = true;
                            RecoveryOutcome::Aborted
                        }
                        RecoveryStrategy::Skip => RecoveryOutcome::Skipped,
                        _ => RecoveryOutcome::Suggested,
                    };

                    append_note(
                        &mut result.output,
                        "[Error Recovery]",
                        &format_suggestions(&actions),
                    );
                    let record = ErrorRecord::new(
                        pattern,
                        &request.capability_name,
                        message,
                        strategy,
                        outcome,
                    );
                    result.error = Some(record.clone());
                    batch.recovery_records.push(record.clone());
                    recovery.record(record);
                    return result;
                }
            }
        }
    }
}

/// Wrap results for the engine, one block per invocation.
pub fn format_results(results: &[InvocationResult]) -> String {
    results
        .iter()
        .map(|result| {
            let status = if result.success { "success" } else { "error" };
            format!(
                "<tool_result name=\"{}\" status=\"{}\">\n{}\n</tool_result>",
                result.capability_name, status, result.output
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn append_note(output: &mut String, header: &str, body: &str) {
    if output.is_empty() {
        *output = format!("{header}\n{body}");
    } else {
        output.push_str("\n\n");
        output.push_str(header);
        output.push('\n');
        output.push_str(body);
    }
}
