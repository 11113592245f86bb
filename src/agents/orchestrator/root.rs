//! Automation orchestrator - the public entry point of the engine.
//!
//! # Responsibilities
//! 1. Score the task and pick a strategy
//! 2. Run it (single-strategy executor or multi-agent pipeline)
//! 3. On failure, ask the recovery controller whether to retry, escalate or stop
//! 4. Record every strategy run with the outcome learner
//! 5. Enforce the one wall-clock deadline and caller cancellation
//! 6. Always return a well-formed `AutomationResult`

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::pipeline::{MultiAgentPipeline, PipelineOutcome};
use super::recovery::RecoveryController;
use crate::agents::leaf::{
    ComplexityAnalyzer, ComplexityScore, SingleStrategyExecutor, StrategyRecommendation,
    StrategySelector,
};
use crate::agents::{
    Agent, AgentContext, AgentError, AgentId, AgentType, AutomationResult, NextAction, Strategy,
    TerminalReason,
};
use crate::config::{EngineConfig, MAX_DEADLINE};
use crate::learning::{OutcomeLearner, OutcomeRecord, StrategyTotals};
use crate::llm::InferenceBackend;
use crate::task::{ExecutionTrace, Task};

/// Failed runs keep this share of their succeeded-step confidence.
const PARTIAL_CREDIT: f64 = 0.5;

/// Read-only view over the statistics store.
#[derive(Debug, Clone, Serialize)]
pub struct EngineMetrics {
    /// Automation calls recorded since start
    pub total_automations: u64,
    pub successful_automations: u64,
    pub success_rate: f64,
    /// Per-strategy totals across all buckets, including escalated runs
    pub strategies: BTreeMap<Strategy, StrategyTotals>,
    pub buckets: Vec<BucketMetrics>,
    pub learning_enabled: bool,
}

/// One statistics bucket.
#[derive(Debug, Clone, Serialize)]
pub struct BucketMetrics {
    pub key: String,
    pub success_count: u64,
    pub total_count: u64,
    pub rolling_average: Option<f64>,
    pub mean_confidence: Option<f64>,
    pub mean_elapsed_secs: Option<f64>,
    pub total_retries: u64,
    pub last_recorded_at: Option<DateTime<Utc>>,
}

/// One strategy run inside an automation call.
struct StrategyRun {
    strategy: Strategy,
    success: bool,
    output: String,
    confidence: f64,
    trace: ExecutionTrace,
    planning_attempts: u32,
    terminal_reason: TerminalReason,
    summary: String,
    elapsed: Duration,
}

/// Bookkeeping for a round, readable after the call is cut off.
struct Round {
    strategy: Strategy,
    /// Role that ran the strategy
    agent: AgentType,
    started: Instant,
    summary: Option<String>,
    /// Outcome already handed to the learner
    recorded: bool,
}

/// Latest round, unless its outcome was already recorded.
fn unrecorded_round(rounds: &[Round]) -> Option<&Round> {
    rounds.last().filter(|round| !round.recorded)
}

/// `started + budget`, with the budget capped so the addition cannot overflow.
fn deadline_after(started: Instant, budget: Duration) -> Instant {
    let budget = budget.min(MAX_DEADLINE);
    started
        .checked_add(budget)
        .or_else(|| started.checked_add(Duration::from_secs(24 * 60 * 60)))
        .unwrap_or(started)
}

/// The engine facade.
///
/// # Task Processing Flow
/// ```text
/// 1. Analyze complexity + domain (ComplexityAnalyzer)
/// 2. Select a strategy from a statistics snapshot (StrategySelector)
/// 3. Run it (SingleStrategyExecutor or MultiAgentPipeline)
/// 4. On failure: RecoveryController -> retry / escalate / give up
/// 5. Record outcomes (OutcomeLearner), return AutomationResult
/// ```
///
/// # Thread Safety
/// Calls are independent; many may run concurrently on one orchestrator. The
/// statistics store is the only state they share.
pub struct AutomationOrchestrator {
    id: AgentId,
    backend: Arc<dyn InferenceBackend>,
    config: Arc<EngineConfig>,
    analyzer: Arc<ComplexityAnalyzer>,
    selector: StrategySelector,
    executor: SingleStrategyExecutor,
    pipeline: MultiAgentPipeline,
    recovery: RecoveryController,
    learner: OutcomeLearner,
}

impl AutomationOrchestrator {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        config: EngineConfig,
        learner: OutcomeLearner,
    ) -> Self {
        let config = Arc::new(config);
        let orchestrator = Self {
            id: AgentId::new(),
            backend,
            analyzer: Arc::new(ComplexityAnalyzer::default()),
            selector: StrategySelector::new(Arc::clone(&config)),
            executor: SingleStrategyExecutor::new(),
            pipeline: MultiAgentPipeline::new(),
            recovery: RecoveryController::new(Arc::clone(&config)),
            learner,
            config,
        };
        for agent in orchestrator.agents() {
            tracing::debug!(
                agent = %agent.agent_type(),
                agent_id = %agent.id(),
                "Registered agent: {}",
                agent.description()
            );
        }
        orchestrator
    }

    /// Every role taking part in an automation call, root first.
    pub fn agents(&self) -> Vec<&dyn Agent> {
        let mut agents: Vec<&dyn Agent> = vec![
            self,
            self.analyzer.as_ref(),
            &self.selector,
            &self.executor,
            &self.pipeline,
        ];
        agents.extend(self.pipeline.roles());
        agents.push(&self.recovery);
        agents
    }

    /// Role that runs `strategy`.
    fn agent_for(&self, strategy: Strategy) -> AgentType {
        match strategy {
            Strategy::MultiAgentPipeline => self.pipeline.agent_type(),
            _ => self.executor.agent_type(),
        }
    }

    /// Replace the complexity analyzer (custom rules or classifier).
    pub fn with_analyzer(mut self, analyzer: ComplexityAnalyzer) -> Self {
        self.analyzer = Arc::new(analyzer);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn learner(&self) -> &OutcomeLearner {
        &self.learner
    }

    /// Run a task to completion, failure or deadline.
    ///
    /// Never panics on expected failures and returns no later than the task's
    /// deadline (or the configured default) plus scheduling overhead.
    pub async fn automate(&self, task: Task) -> AutomationResult {
        self.automate_with_cancellation(task, CancellationToken::new())
            .await
    }

    /// `automate`, stoppable by the caller through `cancel`.
    pub async fn automate_with_cancellation(
        &self,
        task: Task,
        cancel: CancellationToken,
    ) -> AutomationResult {
        let started = Instant::now();
        let budget = task.deadline().unwrap_or(self.config.default_deadline);
        let score = self.analyzer.analyze(&task);
        let initial = self.selector.select(&score, &self.learner.snapshot().await);

        tracing::info!(
            agent = %self.agent_type(),
            task_id = %task.id(),
            domain = %score.domain(),
            strategy = %initial,
            "Automating task (complexity {:.2}, deadline {:?})",
            score.value(),
            budget
        );

        if budget.is_zero() {
            return self.empty_result(
                &task,
                &score,
                initial,
                started,
                TerminalReason::DeadlineExceeded,
                "deadline already expired; nothing was run",
            );
        }
        if cancel.is_cancelled() {
            return self.empty_result(
                &task,
                &score,
                initial,
                started,
                TerminalReason::Cancelled,
                "cancelled before start; nothing was run",
            );
        }

        let deadline = deadline_after(started, budget);
        let ctx = AgentContext::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.config),
            task.id().clone(),
            deadline,
        )
        .with_cancel_token(cancel.child_token());
        let progress = ctx.progress_handle();
        let rounds: Mutex<Vec<Round>> = Mutex::new(Vec::new());

        let finished = {
            let run = self.run_rounds(&task, &score, initial, &ctx, &rounds, started);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TerminalReason::Cancelled),
                result = tokio::time::timeout_at(deadline, run) => {
                    result.map_err(|_| TerminalReason::DeadlineExceeded)
                }
            }
        };

        let reason = match finished {
            Ok(result) => return result,
            Err(reason) => reason,
        };

        // The run future is gone; whatever it finished is in the progress log.
        let rounds = rounds.into_inner();
        let progress = progress.read().await.clone();
        let strategy = rounds.last().map_or(initial, |r| r.strategy);

        tracing::warn!(
            agent = %self.agent_type(),
            task_id = %task.id(),
            strategy = %strategy,
            "Automation interrupted ({:?}) after {:?}",
            reason,
            started.elapsed()
        );

        if reason == TerminalReason::DeadlineExceeded {
            if let Some(round) = unrecorded_round(&rounds) {
                self.learner
                    .record(&OutcomeRecord {
                        task_id: task.id().clone(),
                        domain: score.domain(),
                        complexity: score.value(),
                        strategy,
                        success: false,
                        confidence: 0.0,
                        elapsed_ms: round.started.elapsed().as_millis() as u64,
                        retries: rounds.len().saturating_sub(1) as u32,
                        superseded: false,
                        recorded_at: Utc::now(),
                    })
                    .await;
            }
        }

        let mut summary = render_rounds(&rounds);
        summary.push(progress.summary());
        summary.push(match reason {
            TerminalReason::Cancelled => "cancelled by caller".to_string(),
            _ => format!("deadline of {:?} exceeded", budget),
        });

        AutomationResult {
            task_id: task.id().clone(),
            success: false,
            output: progress.partial_output(),
            strategy,
            confidence: 0.0,
            elapsed_ms: started.elapsed().as_millis() as u64,
            retries: rounds.len().saturating_sub(1) as u32,
            domain: score.domain(),
            complexity: score.value(),
            terminal_reason: reason,
            trace_summary: summary.join("\n"),
        }
    }

    /// Strategy rounds until success or recovery gives up.
    async fn run_rounds(
        &self,
        task: &Task,
        score: &ComplexityScore,
        initial: Strategy,
        ctx: &AgentContext,
        rounds: &Mutex<Vec<Round>>,
        started: Instant,
    ) -> AutomationResult {
        let max_rounds = self.config.max_recovery_rounds.max(1) as usize;
        let auto_recover = task.auto_recover().unwrap_or(self.config.auto_recover);
        let mut strategy = initial;
        let mut tried: Vec<Strategy> = Vec::new();
        let mut retries = 0u32;

        loop {
            tried.push(strategy);
            rounds.lock().await.push(Round {
                strategy,
                agent: self.agent_for(strategy),
                started: Instant::now(),
                summary: None,
                recorded: false,
            });
            ctx.begin_attempt(format!("round {}: {}", tried.len(), strategy))
                .await;

            let run = self.run_strategy(task, strategy, ctx).await;
            retries += run.planning_attempts.saturating_sub(1);
            if let Some(round) = rounds.lock().await.last_mut() {
                round.summary = Some(run.summary.clone());
            }

            if run.success {
                self.record(task, score, &run, retries, false, ctx, rounds).await;
                return self.finish(task, score, run, retries, rounds, started).await;
            }

            let decision = self.recovery.handle_failure(
                score,
                strategy,
                &run.trace,
                &tried,
                ctx.should_stop(),
            );
            let action = if !auto_recover || tried.len() >= max_rounds {
                NextAction::GiveUp
            } else {
                decision.action
            };

            match action {
                NextAction::GiveUp => {
                    self.record(task, score, &run, retries, false, ctx, rounds).await;
                    return self.finish(task, score, run, retries, rounds, started).await;
                }
                NextAction::RetrySameStrategy => {
                    self.record(task, score, &run, retries, true, ctx, rounds).await;
                    retries += 1;
                }
                NextAction::EscalateToPipeline => {
                    self.record(task, score, &run, retries, true, ctx, rounds).await;
                    retries += 1;
                    strategy = Strategy::MultiAgentPipeline;
                }
            }

            tracing::info!(
                agent = %self.recovery.agent_type(),
                task_id = %task.id(),
                strategy = %strategy,
                "Recovery round {} after {:?} failure",
                tried.len() + 1,
                decision.analysis.mode
            );
        }
    }

    /// Run `strategy` once.
    async fn run_strategy(&self, task: &Task, strategy: Strategy, ctx: &AgentContext) -> StrategyRun {
        let start = Instant::now();

        if strategy == Strategy::MultiAgentPipeline {
            let outcome = self.pipeline.run(task, ctx).await;
            let terminal_reason = if outcome.success {
                TerminalReason::Completed
            } else {
                pipeline_failure_reason(&outcome, ctx)
            };
            let confidence = if outcome.success {
                outcome.confidence()
            } else {
                outcome.trace.success_ratio() * strategy.base_confidence() * PARTIAL_CREDIT
            };
            return StrategyRun {
                strategy,
                success: outcome.success,
                output: outcome.output(),
                confidence,
                summary: pipeline_summary(&outcome),
                planning_attempts: outcome.planning_attempts,
                trace: outcome.trace,
                terminal_reason,
                elapsed: start.elapsed(),
            };
        }

        let trace = self.executor.execute(task, strategy, ctx).await;
        let credit = if trace.success { 1.0 } else { PARTIAL_CREDIT };
        let confidence = trace.success_ratio() * strategy.base_confidence() * credit;
        let terminal_reason = if trace.success {
            TerminalReason::Completed
        } else {
            interruption(ctx).unwrap_or(TerminalReason::ExecutionFailed)
        };
        let summary = format!(
            "{}/{} steps succeeded{}\n{}",
            trace.succeeded_count(),
            trace.steps.len(),
            if trace.notes.is_empty() {
                String::new()
            } else {
                format!(" ({})", trace.notes.join("; "))
            },
            trace.render()
        );

        StrategyRun {
            strategy,
            success: trace.success,
            output: trace.combined_output(),
            confidence,
            trace,
            planning_attempts: 0,
            terminal_reason,
            summary,
            elapsed: start.elapsed(),
        }
    }

    /// Feed one strategy run to the learner. Cancelled calls are not learned from.
    ///
    /// The round is marked first, so a deadline that fires mid-record never
    /// records it a second time.
    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        task: &Task,
        score: &ComplexityScore,
        run: &StrategyRun,
        retries: u32,
        superseded: bool,
        ctx: &AgentContext,
        rounds: &Mutex<Vec<Round>>,
    ) {
        if let Some(round) = rounds.lock().await.last_mut() {
            round.recorded = true;
        }
        if ctx.is_cancelled() {
            return;
        }
        self.learner
            .record(&OutcomeRecord {
                task_id: task.id().clone(),
                domain: score.domain(),
                complexity: score.value(),
                strategy: run.strategy,
                success: run.success,
                confidence: run.confidence,
                elapsed_ms: run.elapsed.as_millis() as u64,
                retries,
                superseded,
                recorded_at: Utc::now(),
            })
            .await;
    }

    async fn finish(
        &self,
        task: &Task,
        score: &ComplexityScore,
        run: StrategyRun,
        retries: u32,
        rounds: &Mutex<Vec<Round>>,
        started: Instant,
    ) -> AutomationResult {
        let summary = render_rounds(&rounds.lock().await);

        tracing::info!(
            agent = %self.agent_type(),
            task_id = %task.id(),
            strategy = %run.strategy,
            success = run.success,
            "Automation finished in {:?} ({} retries)",
            started.elapsed(),
            retries
        );

        AutomationResult {
            task_id: task.id().clone(),
            success: run.success,
            output: run.output,
            strategy: run.strategy,
            confidence: run.confidence.clamp(0.0, 1.0),
            elapsed_ms: started.elapsed().as_millis() as u64,
            retries,
            domain: score.domain(),
            complexity: score.value(),
            terminal_reason: run.terminal_reason,
            trace_summary: summary.join("\n"),
        }
    }

    /// Result for a call that ends before any strategy runs.
    fn empty_result(
        &self,
        task: &Task,
        score: &ComplexityScore,
        strategy: Strategy,
        started: Instant,
        reason: TerminalReason,
        summary: &str,
    ) -> AutomationResult {
        tracing::warn!(
            agent = %self.agent_type(),
            task_id = %task.id(),
            "Not running task: {}",
            summary
        );
        AutomationResult {
            task_id: task.id().clone(),
            success: false,
            output: String::new(),
            strategy,
            confidence: 0.0,
            elapsed_ms: started.elapsed().as_millis() as u64,
            retries: 0,
            domain: score.domain(),
            complexity: score.value(),
            terminal_reason: reason,
            trace_summary: summary.to_string(),
        }
    }

    /// Preview routing for a description without running or recording anything.
    pub async fn recommend_strategy(&self, description: &str) -> StrategyRecommendation {
        let score = self.analyzer.analyze_text(description, None);
        let stats = self.learner.snapshot().await;
        self.selector.recommend(&score, &stats)
    }

    pub async fn metrics(&self) -> EngineMetrics {
        let snapshot = self.learner.snapshot().await;
        let (total, succeeded) = self.learner.call_counts().await;

        let buckets = snapshot
            .iter()
            .map(|(key, stats)| BucketMetrics {
                key: key.encode(),
                success_count: stats.success_count(),
                total_count: stats.total_count(),
                rolling_average: stats.rolling_success_rate(),
                mean_confidence: stats.mean_confidence(),
                mean_elapsed_secs: stats.mean_elapsed_secs(),
                total_retries: stats.total_retries(),
                last_recorded_at: stats.last_recorded_at(),
            })
            .collect();

        EngineMetrics {
            total_automations: total,
            successful_automations: succeeded,
            success_rate: if total == 0 {
                0.0
            } else {
                succeeded as f64 / total as f64
            },
            strategies: snapshot.strategy_totals(),
            buckets,
            learning_enabled: self.learner.is_enabled(),
        }
    }
}

impl Agent for AutomationOrchestrator {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Root
    }

    fn description(&self) -> &str {
        "Automation orchestrator: analyzes, routes, recovers and learns"
    }
}

fn interruption(ctx: &AgentContext) -> Option<TerminalReason> {
    if ctx.is_cancelled() {
        Some(TerminalReason::Cancelled)
    } else if ctx.is_expired() {
        Some(TerminalReason::DeadlineExceeded)
    } else {
        None
    }
}

fn pipeline_failure_reason(outcome: &PipelineOutcome, ctx: &AgentContext) -> TerminalReason {
    if let Some(reason) = interruption(ctx) {
        return reason;
    }
    match &outcome.error {
        Some(AgentError::Cancelled) => TerminalReason::Cancelled,
        Some(AgentError::DeadlineExceeded) => TerminalReason::DeadlineExceeded,
        Some(AgentError::PlanningFailure(_)) | Some(AgentError::Inference(_)) => {
            TerminalReason::PlanningFailed
        }
        None if outcome.trace.aborted.is_some() => TerminalReason::ExecutionFailed,
        None => TerminalReason::ValidationFailed,
    }
}

fn pipeline_summary(outcome: &PipelineOutcome) -> String {
    let mut lines = vec![format!(
        "{}: planning attempts: {}",
        AgentType::Planner,
        outcome.planning_attempts
    )];
    if let Some(plan) = &outcome.plan {
        lines.push(format!("plan ({} steps):\n{}", plan.len(), plan.render()));
    }
    if !outcome.trace.steps.is_empty() {
        lines.push(format!("{}:\n{}", AgentType::PlanRunner, outcome.trace.render()));
    }
    lines.extend(outcome.trace.notes.iter().cloned());
    if let Some(verdict) = &outcome.verdict {
        lines.push(format!(
            "{}: verdict: passed={} confidence={:.2} ({:?}) {}",
            AgentType::Validator,
            verdict.passed(),
            verdict.confidence(),
            verdict.source(),
            verdict.reasoning()
        ));
    }
    if let Some(err) = &outcome.error {
        lines.push(format!("error: {}", err));
    }
    lines.join("\n")
}

fn render_rounds(rounds: &[Round]) -> Vec<String> {
    rounds
        .iter()
        .enumerate()
        .map(|(i, round)| {
            format!(
                "round {} [{}] by {}: {}",
                i + 1,
                round.strategy,
                round.agent,
                round.summary.as_deref().unwrap_or("interrupted")
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::{StatsKey, StatsStore};
    use crate::llm::scripted::ScriptedBackend;
    use crate::llm::{InferenceError, RoleHint};
    use crate::task::Domain;

    const THREE_STEPS: &str =
        r#"{"steps": ["reproduce the crash", "patch the null check", "run the tests"]}"#;

    /// Mid-range planning task (not a pipeline domain).
    const OFFSITE: &str =
        "Plan the team offsite: analyze venues and compare prices, then organize the agenda and schedule";

    fn fast_config() -> EngineConfig {
        EngineConfig {
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
            ..EngineConfig::default()
        }
    }

    fn orchestrator(backend: Arc<ScriptedBackend>) -> AutomationOrchestrator {
        AutomationOrchestrator::new(
            backend,
            fast_config(),
            OutcomeLearner::new(StatsStore::new(50), true),
        )
    }

    fn mid_range_score() -> ComplexityScore {
        let score = ComplexityAnalyzer::default().analyze(&Task::new(OFFSITE));
        assert_eq!(score.domain(), Domain::Planning);
        assert!(score.value() >= 3.0 && score.value() <= 7.0, "score {}", score.value());
        score
    }

    #[tokio::test]
    async fn test_scenario_coding_task_through_pipeline() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond(RoleHint::Planner, THREE_STEPS)
                .fallback(RoleHint::Executor, Ok("done".into()))
                .respond(RoleHint::Validator, r#"{"passed": true, "confidence": 0.9}"#),
        );
        let orch = orchestrator(backend.clone());
        let result = orch
            .automate(Task::new("fix a null pointer bug in function X"))
            .await;

        assert!(result.success);
        assert_eq!(result.strategy, Strategy::MultiAgentPipeline);
        assert_eq!(result.domain, Domain::Coding);
        assert_eq!(result.terminal_reason, TerminalReason::Completed);
        assert!((result.confidence - 0.9).abs() < 1e-9);
        assert_eq!(backend.calls(RoleHint::Executor), 3);
        assert_eq!(backend.calls(RoleHint::Direct), 0);
    }

    #[tokio::test]
    async fn test_scenario_say_hello_is_direct() {
        let backend = Arc::new(ScriptedBackend::new().respond(RoleHint::Direct, "Hello!"));
        let orch = orchestrator(backend.clone());
        let result = orch.automate(Task::new("say hello")).await;

        assert!(result.success);
        assert_eq!(result.strategy, Strategy::Direct);
        assert_eq!(result.output, "Hello!");
        assert_eq!(result.retries, 0);
        assert_eq!(backend.total_calls(), 1);
        assert_eq!(orch.metrics().await.total_automations, 1);
    }

    #[tokio::test]
    async fn test_scenario_ambiguous_validation_replans_once() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .fallback(RoleHint::Planner, Ok(THREE_STEPS.into()))
                .fallback(RoleHint::Executor, Ok("done".into()))
                .fallback(RoleHint::Validator, Ok("it probably works".into())),
        );
        let orch = orchestrator(backend.clone());
        let result = orch
            .automate(Task::new("fix a null pointer bug in function X"))
            .await;

        assert!(!result.success);
        assert_eq!(result.strategy, Strategy::MultiAgentPipeline);
        assert_eq!(result.terminal_reason, TerminalReason::ValidationFailed);
        assert_eq!(backend.calls(RoleHint::Planner), 2);
        assert!(result.trace_summary.contains("planning attempts: 2"));
        assert_eq!(result.retries, 1);
        // partial output stays available
        assert!(result.is_partial());
    }

    #[tokio::test]
    async fn test_scenario_parallel_majority() {
        let score = mid_range_score();
        let learner = OutcomeLearner::new(StatsStore::new(50), true);
        for _ in 0..10 {
            learner
                .record(&OutcomeRecord {
                    task_id: "seed".into(),
                    domain: score.domain(),
                    complexity: score.value(),
                    strategy: Strategy::ParallelDecomposition,
                    success: true,
                    confidence: 0.8,
                    elapsed_ms: 2000,
                    retries: 0,
                    superseded: false,
                    recorded_at: Utc::now(),
                })
                .await;
        }

        let backend = Arc::new(
            ScriptedBackend::new()
                .respond(
                    RoleHint::Decomposer,
                    r#"["list venues", "get quotes", "draft agenda", "pick dates"]"#,
                )
                .when_prompt_contains(
                    RoleHint::Executor,
                    "step 4: pick dates",
                    Err(InferenceError::unavailable("down")),
                )
                .fallback(RoleHint::Executor, Ok("done".into())),
        );
        let orch = AutomationOrchestrator::new(backend, fast_config(), learner);
        let result = orch.automate(Task::new(OFFSITE)).await;

        assert!(result.success);
        assert_eq!(result.strategy, Strategy::ParallelDecomposition);
        assert!((result.confidence - 0.75 * 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_decomposition_escalates_to_pipeline() {
        let score = mid_range_score();
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond(RoleHint::Decomposer, r#"["draft agenda", "pick dates"]"#)
                .when_prompt_contains(
                    RoleHint::Executor,
                    "draft agenda",
                    Err(InferenceError::empty_response("nothing")),
                )
                .respond(RoleHint::Planner, r#"["book venue", "send invites"]"#)
                .fallback(RoleHint::Executor, Ok("done".into()))
                .respond(RoleHint::Validator, r#"{"passed": true, "confidence": 0.85}"#),
        );
        let orch = orchestrator(backend);
        let result = orch.automate(Task::new(OFFSITE)).await;

        assert!(result.success);
        assert_eq!(result.strategy, Strategy::MultiAgentPipeline);
        assert_eq!(result.retries, 1);
        assert!(result.trace_summary.contains("round 1 [sequential_decomposition]"));
        assert!(result
            .trace_summary
            .contains("round 2 [multi_agent_pipeline] by pipeline"));
        assert!(result.trace_summary.contains("validator: verdict: passed=true"));

        let metrics = orch.metrics().await;
        assert_eq!(metrics.total_automations, 1);
        assert_eq!(metrics.successful_automations, 1);
        let pipeline_key =
            StatsKey::new(score.domain(), score.bucket(), Strategy::MultiAgentPipeline).encode();
        let bucket = metrics
            .buckets
            .iter()
            .find(|b| b.key == pipeline_key)
            .unwrap();
        assert_eq!(bucket.total_retries, 1);
        assert!((bucket.mean_confidence.unwrap() - 0.85).abs() < 1e-9);
        assert!(bucket.last_recorded_at.is_some());
        assert!(bucket.mean_elapsed_secs.is_some());
        let seq_key = StatsKey::new(score.domain(), score.bucket(), Strategy::SequentialDecomposition);
        let snapshot = orch.learner().snapshot().await;
        assert_eq!(snapshot.get(&seq_key).unwrap().success_count(), 0);
        assert_eq!(snapshot.get(&seq_key).unwrap().total_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_direct_failure_retried_within_bounds() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .fallback(RoleHint::Direct, Err(InferenceError::unavailable("down"))),
        );
        let orch = orchestrator(backend.clone());
        let result = orch.automate(Task::new("say hello")).await;

        assert!(!result.success);
        assert_eq!(result.terminal_reason, TerminalReason::ExecutionFailed);
        assert_eq!(result.retries, 1);
        // two rounds, each bounded by step_max_attempts
        assert_eq!(backend.calls(RoleHint::Direct), 6);
    }

    #[tokio::test]
    async fn test_auto_recover_off_gives_up_after_first_round() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .fallback(RoleHint::Direct, Err(InferenceError::unavailable("down"))),
        );
        let orch = orchestrator(backend.clone());
        let result = orch
            .automate(Task::new("say hello").with_auto_recover(false))
            .await;

        assert!(!result.success);
        assert_eq!(result.terminal_reason, TerminalReason::ExecutionFailed);
        assert_eq!(result.retries, 0);
        assert_eq!(backend.calls(RoleHint::Direct), 3);
        assert_eq!(orch.metrics().await.total_automations, 1);
    }

    #[tokio::test]
    async fn test_auto_recover_disabled_in_config() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .fallback(RoleHint::Direct, Err(InferenceError::unavailable("down"))),
        );
        let orch = AutomationOrchestrator::new(
            backend.clone(),
            EngineConfig {
                auto_recover: false,
                ..fast_config()
            },
            OutcomeLearner::new(StatsStore::new(50), true),
        );

        // per-task flag overrides the engine default
        let result = orch
            .automate(Task::new("say hello").with_auto_recover(true))
            .await;
        assert_eq!(result.retries, 1);
        assert_eq!(backend.calls(RoleHint::Direct), 6);

        let result = orch.automate(Task::new("say hello")).await;
        assert_eq!(result.retries, 0);
        assert_eq!(backend.calls(RoleHint::Direct), 9);
    }

    #[tokio::test]
    async fn test_huge_task_deadline_runs_normally() {
        let backend = Arc::new(ScriptedBackend::new().respond(RoleHint::Direct, "Hello!"));
        let orch = orchestrator(backend);
        let result = orch
            .automate(Task::new("say hello").with_deadline(Duration::from_secs(u64::MAX)))
            .await;

        assert!(result.success);
        assert_eq!(result.terminal_reason, TerminalReason::Completed);
    }

    #[tokio::test]
    async fn test_huge_default_deadline_runs_normally() {
        let backend = Arc::new(ScriptedBackend::new().respond(RoleHint::Direct, "Hello!"));
        let orch = AutomationOrchestrator::new(
            backend,
            EngineConfig {
                default_deadline: Duration::MAX,
                ..fast_config()
            },
            OutcomeLearner::new(StatsStore::new(50), true),
        );
        let result = orch.automate(Task::new("say hello")).await;

        assert!(result.success);
        assert_eq!(result.output, "Hello!");
    }

    #[test]
    fn test_deadline_after_caps_budget() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert!(deadline_after(now, Duration::MAX) <= now + MAX_DEADLINE);
        assert!(deadline_after(now, Duration::MAX) > now);
    }

    #[test]
    fn test_recorded_round_is_not_recorded_again() {
        let round = |recorded| Round {
            strategy: Strategy::Direct,
            agent: AgentType::StrategyExecutor,
            started: Instant::now(),
            summary: None,
            recorded,
        };

        assert!(unrecorded_round(&[]).is_none());
        assert!(unrecorded_round(&[round(false)]).is_some());
        assert!(unrecorded_round(&[round(false), round(true)]).is_none());
        assert!(unrecorded_round(&[round(true), round(false)]).is_some());
    }

    #[test]
    fn test_every_role_is_registered() {
        let orch = orchestrator(Arc::new(ScriptedBackend::new()));
        let agents = orch.agents();

        let types: std::collections::HashSet<AgentType> =
            agents.iter().map(|a| a.agent_type()).collect();
        assert_eq!(types.len(), 9);
        assert_eq!(agents[0].agent_type(), AgentType::Root);

        let ids: std::collections::HashSet<String> =
            agents.iter().map(|a| a.id().to_string()).collect();
        assert_eq!(ids.len(), agents.len());
        assert!(agents.iter().all(|a| a.description() != "Generic agent"));
    }

    #[tokio::test]
    async fn test_expired_deadline_returns_immediately() {
        let backend = Arc::new(ScriptedBackend::new().respond(RoleHint::Direct, "hi"));
        let orch = orchestrator(backend.clone());
        let result = orch
            .automate(Task::new("say hello").with_deadline(Duration::ZERO))
            .await;

        assert!(!result.success);
        assert_eq!(result.terminal_reason, TerminalReason::DeadlineExceeded);
        assert_eq!(backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_deadline_cuts_off_slow_backend() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .fallback(RoleHint::Direct, Ok("late".into()))
                .with_delay(RoleHint::Direct, Duration::from_secs(30)),
        );
        let orch = orchestrator(backend);
        let started = std::time::Instant::now();
        let result = orch
            .automate(Task::new("say hello").with_deadline(Duration::from_millis(100)))
            .await;

        assert!(!result.success);
        assert_eq!(result.terminal_reason, TerminalReason::DeadlineExceeded);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_deadline_keeps_partial_output() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond(RoleHint::Planner, THREE_STEPS)
                .fallback(RoleHint::Executor, Ok("reproduced".into()))
                .with_delay(RoleHint::Validator, Duration::from_secs(30)),
        );
        let orch = orchestrator(backend);
        let result = orch
            .automate(
                Task::new("fix a null pointer bug in function X")
                    .with_deadline(Duration::from_millis(300)),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.terminal_reason, TerminalReason::DeadlineExceeded);
        assert!(result.output.contains("reproduced"));
        assert!(result.is_partial());
    }

    #[tokio::test]
    async fn test_cancellation_stops_call() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .fallback(RoleHint::Direct, Ok("late".into()))
                .with_delay(RoleHint::Direct, Duration::from_secs(30)),
        );
        let orch = orchestrator(backend);
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result = orch
            .automate_with_cancellation(Task::new("say hello"), token)
            .await;
        assert_eq!(result.terminal_reason, TerminalReason::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(orch.metrics().await.total_automations, 0);
    }

    #[tokio::test]
    async fn test_recommend_strategy_is_read_only() {
        let backend = Arc::new(ScriptedBackend::new());
        let orch = orchestrator(backend.clone());

        let rec = orch.recommend_strategy("fix the failing unit test").await;
        assert_eq!(rec.strategy, Strategy::MultiAgentPipeline);
        assert!((rec.confidence - 0.75).abs() < 1e-9);

        let rec = orch.recommend_strategy("say hello").await;
        assert_eq!(rec.strategy, Strategy::Direct);

        assert_eq!(backend.total_calls(), 0);
        assert!(orch.learner().snapshot().await.is_empty());
    }
}
