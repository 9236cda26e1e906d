//! The orchestration loop.
//!
//! One `handle_turn` call drives a full user turn: classify the request,
//! retrieve context, enforce the window budget, call the engine, parse
//! and dispatch invocations, fold the results back, and repeat until the
//! engine answers without invocations or a bound trips. Each iteration
//! makes exactly one engine call, and that call's invocation batch is
//! fully processed before the next one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use forgeloop_config::AppConfig;
use forgeloop_core::Error;
use forgeloop_core::capability::{CapabilityDefinition, CapabilityRegistry, InvocationRequest};
use forgeloop_core::engine::{Engine, EngineProfile, EngineRequest, EngineResponse};
use forgeloop_core::error::EngineError;
use forgeloop_core::event::{CoreEvent, EventBus};
use forgeloop_core::recovery::ErrorRecord;
use forgeloop_core::retrieval::{KnowledgeEntry, KnowledgeKind, KnowledgeRepository, SessionStore};
use forgeloop_core::task::TaskStatus;
use forgeloop_core::turn::{ConversationTurn, Session, TurnMetrics, TurnResult};

use crate::cache::OperationCache;
use crate::dispatcher::ParallelDispatcher;
use crate::loop_guard::{GuardVerdict, LoopGuard};
use crate::parse::{parse_invocations, strip_invocations};
use crate::pipeline::{InvocationPipeline, format_results};
use crate::planner::TaskPlanner;
use crate::prompt::{self, PromptInputs};
use crate::recovery::RecoveryManager;
use crate::retriever::{ContextRetriever, format_snippets};
use crate::router::{ClassifyContext, ComplexityTier, Router};
use crate::verifier::Verifier;
use crate::window::ContextWindow;

/// Recovery records shown to the engine and consulted by the router.
const ERROR_HISTORY_WINDOW: usize = 5;
const ESCALATION_WINDOW: usize = 10;
/// Solution text stored after a successful turn is capped at this length.
const SOLUTION_RECORD_LIMIT: usize = 500;

/// Signals a running turn to stop before its next iteration.
///
/// In-flight engine calls and invocations finish; the turn returns a
/// partial answer with a cancellation note.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// The orchestration core. One instance serves any number of sessions;
/// per-session window state is kept internally, keyed by session ID.
pub struct Orchestrator {
    engine: Arc<dyn Engine>,
    registry: Arc<CapabilityRegistry>,
    cache: Arc<OperationCache>,
    pipeline: InvocationPipeline,
    retriever: ContextRetriever,
    router: Router,
    recovery: RecoveryManager,
    guard: LoopGuard,
    windows: HashMap<String, ContextWindow>,
    events: Arc<EventBus>,
    session_store: Option<Arc<dyn SessionStore>>,
    knowledge: Option<Arc<dyn KnowledgeRepository>>,

    max_iterations: u32,
    retain_recent: usize,
    retrieval_budget_bytes: usize,
    auto_record_solutions: bool,
    system_preamble: Option<String>,
    engine_call_retries: u32,
    engine_retry_base: Duration,
    profile_low: EngineProfile,
    profile_medium: EngineProfile,
    profile_high: EngineProfile,

    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<dyn Engine>,
        registry: Arc<CapabilityRegistry>,
        config: &AppConfig,
        events: Arc<EventBus>,
    ) -> Self {
        let orch = &config.orchestrator;

        let ttl_overrides = orch
            .cache_ttl_overrides
            .iter()
            .map(|(name, secs)| (name.clone(), Duration::from_secs(*secs)))
            .collect();
        let cache = Arc::new(
            OperationCache::new(Duration::from_secs(orch.cache_ttl_secs), orch.cache_capacity)
                .with_ttl_overrides(ttl_overrides),
        );

        let dispatcher = ParallelDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            orch.max_parallel,
            Duration::from_secs(orch.invocation_timeout_secs),
        );
        let verifier = Verifier::new(Arc::clone(&registry));
        let pipeline = InvocationPipeline::new(dispatcher, verifier);

        let recovery = RecoveryManager::new(
            orch.max_invocation_retries,
            Duration::from_millis(orch.retry_base_ms),
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);

        Self {
            engine,
            registry,
            cache,
            pipeline,
            retriever: ContextRetriever::disabled(),
            router: Router::new(orch.escalation_threshold),
            recovery,
            guard: LoopGuard::new(),
            windows: HashMap::new(),
            events,
            session_store: None,
            knowledge: None,
            max_iterations: orch.max_iterations,
            retain_recent: orch.retain_recent,
            retrieval_budget_bytes: orch.retrieval_budget_bytes,
            auto_record_solutions: config.memory.auto_record_solutions,
            system_preamble: config.system_preamble.clone(),
            engine_call_retries: config.engine.call_retries,
            engine_retry_base: Duration::from_millis(config.engine.retry_base_ms),
            profile_low: config.profile_for("low"),
            profile_medium: config.profile_for("medium"),
            profile_high: config.profile_for("high"),
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    /// Attach a context retriever (disabled by default).
    pub fn with_retriever(mut self, retriever: ContextRetriever) -> Self {
        self.retriever = retriever;
        self
    }

    /// Attach a session store; sessions are saved at turn boundaries.
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Attach a knowledge repository for recording solved requests.
    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeRepository>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// A handle that can stop the current turn between iterations.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    /// Registered capability names, sorted.
    pub fn capability_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub async fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.lifetime_stats().await
    }

    pub fn recovery_stats(&self) -> &crate::recovery::RecoveryStats {
        self.recovery.stats()
    }

    /// Run one full user turn against the session.
    pub async fn handle_turn(
        &mut self,
        session: &mut Session,
        user_input: &str,
    ) -> Result<TurnResult, Error> {
        let turn_start = Instant::now();
        let session_id = session.id.to_string();
        let mut metrics = TurnMetrics::default();

        self.guard.reset();
        self.events.publish(CoreEvent::TurnStarted {
            session_id: session_id.clone(),
            timestamp: chrono::Utc::now(),
        });

        // CLASSIFY
        let classification = {
            let context = ClassifyContext {
                history_bytes: session.turns.iter().map(|t| t.content.len()).sum(),
                recent_errors: self.recovery.recent(ESCALATION_WINDOW),
            };
            self.router.classify(user_input, &context)
        };
        info!(
            session = %session_id,
            task_type = %classification.task_type,
            tier = %classification.tier,
            "Turn classified"
        );
        let profile = self.profile(classification.tier).clone();

        // PLAN — decompose complex requests once, at turn start.
        if session.active_task.is_none() && TaskPlanner::needs_decomposition(user_input) {
            let mut task = TaskPlanner::plan(user_input);
            task.status = TaskStatus::InProgress;
            debug!(subtasks = task.subtasks.len(), "Planned task decomposition");
            session.active_task = Some(task);
        }

        // RETRIEVE
        let snippets = self
            .retriever
            .retrieve(user_input, self.retrieval_budget_bytes)
            .await;
        let retrieved_context = format_snippets(&snippets);

        session.push(ConversationTurn::user(user_input));

        let definitions: Vec<CapabilityDefinition> = self.registry.definitions();
        let mut accumulated = String::new();
        let mut invocation_log = Vec::new();
        let mut iteration: u32 = 0;
        let mut answered = false;
        let mut task_failed = false;
        let mut synthesis_forced = false;

        loop {
            if *self.cancel_rx.borrow() {
                warn!(session = %session_id, "Turn cancelled, stopping before next iteration");
                push_note(&mut accumulated, "[Warning: Turn cancelled, stopping early]");
                break;
            }
            if iteration >= self.max_iterations {
                warn!(
                    session = %session_id,
                    iterations = iteration,
                    "Maximum iterations reached without a final answer"
                );
                push_note(
                    &mut accumulated,
                    &format!(
                        "[Warning: Reached maximum iterations ({})]",
                        self.max_iterations
                    ),
                );
                break;
            }
            iteration += 1;
            self.cache.reset_iteration().await;

            // WINDOW — summarize or truncate until the prompt fits.
            let visible = {
                let window = self
                    .windows
                    .entry(session_id.clone())
                    .or_insert_with(|| ContextWindow::new(self.retain_recent));
                window
                    .enforce(session, self.engine.as_ref(), &profile, &self.events)
                    .await;
                window.visible_turns(session)
            };

            // BUILD PROMPT
            let error_history = render_error_history(self.recovery.recent(ERROR_HISTORY_WINDOW));
            let performance_hint = if metrics.cache_hits > 0 {
                format!(
                    "{} cached results were reused this turn; avoid re-reading unchanged files.",
                    metrics.cache_hits
                )
            } else {
                String::new()
            };
            let built = prompt::build_messages(
                &PromptInputs {
                    identity: self.system_preamble.as_deref(),
                    task_type: classification.task_type,
                    tier: classification.tier,
                    retrieved_context: &retrieved_context,
                    definitions: &definitions,
                    error_history: &error_history,
                    performance_hint: &performance_hint,
                },
                &visible,
            );
            debug!(
                iteration,
                messages = built.messages.len(),
                estimated_tokens = built.estimated_tokens,
                "Prompt built"
            );

            // CALL ENGINE
            let request = EngineRequest::from_profile(&profile, built.messages);
            let response = match self.call_engine(request, &mut metrics).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(session = %session_id, error = %e, "Engine call failed");
                    let text = format!("Engine error: {e}");
                    session.push(ConversationTurn::assistant(&text));
                    push_note(&mut accumulated, &text);
                    break;
                }
            };

            let tokens_used = response.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0);
            self.events.publish(CoreEvent::EngineResponded {
                session_id: session_id.clone(),
                model: response.model.clone(),
                iteration,
                tokens_used,
                timestamp: chrono::Utc::now(),
            });

            // PARSE
            let content = response.content;
            let parsed = parse_invocations(&content);
            let clean_text = strip_invocations(&content);
            if !clean_text.is_empty() {
                push_note(&mut accumulated, &clean_text);
            }
            session.push(ConversationTurn::assistant(&content));

            if parsed.is_empty() {
                answered = true;
                break;
            }

            let origin_turn = session
                .turns
                .last()
                .map(|t| t.id.clone())
                .unwrap_or_default();
            let requests: Vec<InvocationRequest> = parsed
                .iter()
                .map(|p| InvocationRequest::new(&p.name, p.params.clone(), &origin_turn))
                .collect();

            // LOOP GUARD — refuse to dispatch a batch the engine keeps
            // repeating.
            if self.guard.observe_batch(&requests) == GuardVerdict::RepetitionDetected {
                push_note(
                    &mut accumulated,
                    "[Warning: Detected repetitive behavior, stopping early]",
                );
                break;
            }

            // DISPATCH — cache, parallel execution, verify, recover.
            let batch = self.pipeline.process(&requests, &mut self.recovery).await;

            for result in &batch.results {
                self.events.publish(CoreEvent::InvocationCompleted {
                    capability_name: result.capability_name.clone(),
                    success: result.success,
                    cache_hit: result.cache_hit,
                    duration_ms: result.duration_ms,
                    timestamp: chrono::Utc::now(),
                });
            }
            for record in &batch.recovery_records {
                self.events.publish(CoreEvent::RecoveryApplied {
                    capability_name: record.capability_name.clone(),
                    pattern: record.pattern.to_string(),
                    strategy: record.strategy.to_string(),
                    timestamp: chrono::Utc::now(),
                });
            }
            self.guard.observe_results(&batch.results);

            metrics.invocations += batch.results.len() as u32;
            metrics.recovered_errors += batch.recovered as u64;
            metrics.verifications_passed += batch.verifications_passed as u64;
            metrics.verifications_failed += batch.verifications_failed as u64;
            metrics.verifications_skipped += batch.verifications_skipped as u64;
            let iteration_stats = self.cache.iteration_stats().await;
            metrics.cache_hits += iteration_stats.hits;
            metrics.cache_misses += iteration_stats.misses;

            // FOLD — results go back to the engine as a tool turn.
            let results_text = format_results(&batch.results);
            session.push(ConversationTurn::tool(results_text, batch.results.clone()));
            invocation_log.extend(batch.results);

            if batch.aborted {
                // A fatal failure fails the task only while dependents
                // still gate on the current work; otherwise it stays a
                // failed step and the engine decides how to proceed.
                if let Some(task) = &mut session.active_task {
                    if task.has_pending_dependents() {
                        task_failed = true;
                        task.status = TaskStatus::Failed;
                    }
                }
            }

            // Nudge the engine out of unproductive exploration.
            if let Some(nudge) = self.guard.synthesis_nudge() {
                session.push(ConversationTurn::user(nudge));
            }
            if !synthesis_forced {
                if let Some(text) =
                    LoopGuard::force_synthesis(iteration, classification.task_type)
                {
                    session.push(ConversationTurn::user(text));
                    synthesis_forced = true;
                }
            }
        }

        // Task bookkeeping: a normal answer completes the active task,
        // an abort already failed it; terminal tasks leave the session.
        if answered && !task_failed {
            if let Some(task) = &mut session.active_task {
                task.status = TaskStatus::Completed;
            }
        }
        let task_state = session.active_task.as_ref().map(|t| t.status);
        if session
            .active_task
            .as_ref()
            .is_some_and(|t| t.status.is_terminal())
        {
            session.active_task = None;
        }

        let final_text = accumulated.trim().to_string();

        if answered && !task_failed && self.auto_record_solutions && !invocation_log.is_empty() {
            self.record_solution(&session_id, user_input, &final_text, classification.task_type)
                .await;
        }

        // Metrics and events.
        metrics.iterations = iteration;
        let dispatch_stats = self.pipeline.dispatcher().take_stats();
        metrics.parallel_batches += dispatch_stats.parallel_batches;
        metrics.time_saved_ms += dispatch_stats.time_saved_ms;
        metrics.total_duration_ms = turn_start.elapsed().as_millis() as u64;
        session.metrics.absorb(&metrics);

        self.events.publish(CoreEvent::TurnCompleted {
            session_id: session_id.clone(),
            iterations: iteration,
            invocations: metrics.invocations,
            timestamp: chrono::Utc::now(),
        });

        if let Some(store) = &self.session_store {
            if let Err(e) = store.save(session).await {
                warn!(session = %session_id, "Failed to persist session: {e}");
            }
        }

        // A cancel only applies to the turn it interrupted.
        let _ = self.cancel_tx.send(false);

        info!(
            session = %session_id,
            iterations = iteration,
            invocations = metrics.invocations,
            duration_ms = metrics.total_duration_ms,
            "Turn complete"
        );

        Ok(TurnResult {
            final_text,
            invocation_log,
            metrics,
            task_state,
        })
    }

    fn profile(&self, tier: ComplexityTier) -> &EngineProfile {
        match tier {
            ComplexityTier::Low => &self.profile_low,
            ComplexityTier::Medium => &self.profile_medium,
            ComplexityTier::High => &self.profile_high,
        }
    }

    /// Call the engine, retrying transient failures with backoff.
    /// Rate-limit responses wait at least as long as the server asked.
    async fn call_engine(
        &self,
        request: EngineRequest,
        metrics: &mut TurnMetrics,
    ) -> Result<EngineResponse, EngineError> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            metrics.engine_calls += 1;

            match self.engine.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt <= self.engine_call_retries => {
                    let exponent = attempt.saturating_sub(1).min(8);
                    let mut delay = self.engine_retry_base.saturating_mul(1u32 << exponent);
                    if let EngineError::RateLimited { retry_after_secs } = &e {
                        delay = delay.max(Duration::from_secs(*retry_after_secs));
                    }
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient engine error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Store what worked so future retrieval can suggest it.
    async fn record_solution(
        &self,
        session_id: &str,
        request: &str,
        solution: &str,
        task_type: crate::router::TaskType,
    ) {
        let Some(knowledge) = &self.knowledge else {
            return;
        };

        let summary: String = solution.chars().take(SOLUTION_RECORD_LIMIT).collect();
        let mut entry = KnowledgeEntry::new(
            KnowledgeKind::Solution,
            format!("Task: {request}\nSolution: {summary}"),
        );
        entry.tags = vec!["solution".to_string(), task_type.as_str().to_string()];
        entry.source_session = Some(session_id.to_string());

        match knowledge.record(entry).await {
            Ok(id) => debug!(entry_id = %id, "Recorded solution"),
            Err(e) => warn!("Failed to record solution: {e}"),
        }
    }
}

fn render_error_history(records: &[ErrorRecord]) -> String {
    records
        .iter()
        .map(|r| format!("- {} failed: {}", r.capability_name, r.message))
        .collect::<Vec<_>>()
        .join("\n")
}

fn push_note(accumulated: &mut String, note: &str) {
    if !accumulated.is_empty() {
        accumulated.push_str("\n\n");
    }
    accumulated.push_str(note);
}
