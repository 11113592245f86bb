//! Single-strategy executor - Direct, Sequential and Parallel strategies.
//!
//! None of these use the Planner/Validator roles. Decomposing strategies ask
//! the backend for a short ad hoc list of sub-steps and run each one as an
//! Executor call. All calls go through `AgentContext::infer`, so per-call
//! retries and the deadline apply uniformly.

use futures::stream::{self, StreamExt};

use crate::agents::{Agent, AgentContext, AgentId, AgentType, Strategy};
use crate::llm::{InferenceOptions, RoleHint};
use crate::task::{parse_step_list, ExecutionTrace, PlanStep, StepResult, Task};
use crate::util::truncate_chars;

/// Upper bound on sub-steps taken from a decomposition reply.
const MAX_DECOMPOSED_STEPS: usize = 8;

/// Characters of a previous step's output carried into the next prompt.
const PRIOR_OUTPUT_CHARS: usize = 1500;

/// Runs the three non-pipeline strategies.
///
/// # Side Effects
/// None beyond backend calls and the call-local progress log.
pub struct SingleStrategyExecutor {
    id: AgentId,
}

impl SingleStrategyExecutor {
    pub fn new() -> Self {
        Self { id: AgentId::new() }
    }

    /// Run `strategy` for `task`.
    ///
    /// The pipeline is not a single-strategy path; asking for it yields an
    /// aborted, empty trace.
    pub async fn execute(&self, task: &Task, strategy: Strategy, ctx: &AgentContext) -> ExecutionTrace {
        match strategy {
            Strategy::Direct => self.execute_direct(task, ctx).await,
            Strategy::SequentialDecomposition => self.execute_sequential(task, ctx).await,
            Strategy::ParallelDecomposition => self.execute_parallel(task, ctx).await,
            Strategy::MultiAgentPipeline => ExecutionTrace::new(Vec::new(), false)
                .with_abort("multi_agent_pipeline is not a single-strategy path"),
        }
    }

    /// One backend call with the whole task.
    ///
    /// Succeeds iff the call returns non-empty text.
    pub async fn execute_direct(&self, task: &Task, ctx: &AgentContext) -> ExecutionTrace {
        let mut prompt = task.description().to_string();
        if let Some(context) = task.context_block() {
            prompt.push_str("\n\nContext:\n");
            prompt.push_str(&context);
        }

        let outcome = ctx
            .infer(&prompt, &InferenceOptions::for_role(RoleHint::Direct))
            .await;
        let step = match outcome.result {
            Ok(output) => StepResult::succeeded(
                0,
                task.description(),
                output,
                outcome.attempts,
                outcome.elapsed,
            ),
            Err(e) => StepResult::failed(
                0,
                task.description(),
                e.to_string(),
                Some(e.kind),
                outcome.attempts,
                outcome.elapsed,
            ),
        };
        ctx.record_step(&step).await;

        let success = step.is_success();
        ExecutionTrace::new(vec![step], success)
    }

    /// Decompose, then run sub-steps one after another.
    ///
    /// Each step sees the outputs of the steps before it. The run stops at the
    /// first step that fails after its retries; later steps are `Skipped`.
    /// Succeeds iff every step succeeded.
    pub async fn execute_sequential(&self, task: &Task, ctx: &AgentContext) -> ExecutionTrace {
        let (steps, notes) = self.decompose(task, ctx).await;
        let mut results: Vec<StepResult> = Vec::with_capacity(steps.len());
        let mut stopped: Option<String> = None;

        for (index, step) in steps.iter().enumerate() {
            if let Some(reason) = &stopped {
                results.push(StepResult::skipped(index, &step.description, reason.clone()));
                continue;
            }
            if ctx.should_stop() {
                let reason = stop_reason(ctx);
                results.push(StepResult::skipped(index, &step.description, reason.clone()));
                stopped = Some(reason);
                continue;
            }

            let result = run_step(ctx, task, index, step, &results).await;
            if !result.is_success() {
                tracing::warn!(
                    agent = %self.agent_type(),
                    task_id = %ctx.task_id,
                    strategy = %Strategy::SequentialDecomposition,
                    "Sub-step {} failed, stopping: {}",
                    index + 1,
                    result.error.as_deref().unwrap_or("unknown error")
                );
                stopped = Some(format!("not run: step {} failed", index + 1));
            }
            results.push(result);
        }

        let success = !results.is_empty() && results.iter().all(StepResult::is_success);
        with_notes(ExecutionTrace::new(results, success), notes)
    }

    /// Decompose, then run sub-steps concurrently.
    ///
    /// At most `parallel_fan_out` steps are in flight. Results are collected
    /// by step index regardless of completion order. Succeeds when the
    /// succeeded fraction exceeds `parallel_success_threshold`.
    pub async fn execute_parallel(&self, task: &Task, ctx: &AgentContext) -> ExecutionTrace {
        let (steps, notes) = self.decompose(task, ctx).await;
        let fan_out = ctx.config.parallel_fan_out.max(1);

        let results: Vec<StepResult> = stream::iter(steps.iter().enumerate())
            .map(|(index, step)| async move {
                if ctx.should_stop() {
                    return StepResult::skipped(index, &step.description, stop_reason(ctx));
                }
                run_step(ctx, task, index, step, &[]).await
            })
            .buffered(fan_out)
            .collect()
            .await;

        let trace = ExecutionTrace::new(results, false);
        let ratio = trace.success_ratio();
        let success = ratio > ctx.config.parallel_success_threshold;

        tracing::info!(
            agent = %self.agent_type(),
            task_id = %ctx.task_id,
            strategy = %Strategy::ParallelDecomposition,
            "Parallel run: {}/{} sub-steps succeeded (threshold {:.2})",
            trace.succeeded_count(),
            trace.steps.len(),
            ctx.config.parallel_success_threshold
        );

        with_notes(ExecutionTrace { success, ..trace }, notes)
    }

    /// Ask the backend for sub-steps.
    ///
    /// Falls back to a single step holding the whole task when the call fails
    /// or the reply has no usable list; the fallback is reported as a note.
    async fn decompose(&self, task: &Task, ctx: &AgentContext) -> (Vec<PlanStep>, Vec<String>) {
        let prompt = format!(
            r#"Break this task into a short ordered list of concrete sub-steps (2-{max}).

Task: {task}
{context}
Respond with a JSON object:
{{"steps": ["first sub-step", "second sub-step"]}}

Respond ONLY with the JSON object."#,
            max = MAX_DECOMPOSED_STEPS,
            task = task.description(),
            context = task
                .context_block()
                .map(|c| format!("\nContext:\n{}\n", c))
                .unwrap_or_default(),
        );

        let outcome = ctx
            .infer(&prompt, &InferenceOptions::for_role(RoleHint::Decomposer))
            .await;
        let fallback = |reason: String| {
            tracing::warn!(task_id = %ctx.task_id, "Decomposition fell back to one step: {}", reason);
            (
                vec![PlanStep::new(task.description())],
                vec![format!("decomposition unavailable ({}); ran the task as one step", reason)],
            )
        };

        match outcome.result {
            Ok(text) => {
                let mut steps = parse_step_list(&text);
                steps.retain(|s| !s.description.trim().is_empty());
                if steps.is_empty() {
                    return fallback("no sub-steps in reply".to_string());
                }
                steps.truncate(MAX_DECOMPOSED_STEPS);
                tracing::debug!(task_id = %ctx.task_id, "Decomposed into {} sub-steps", steps.len());
                (steps, Vec::new())
            }
            Err(e) => fallback(e.to_string()),
        }
    }
}

impl Default for SingleStrategyExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for SingleStrategyExecutor {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn agent_type(&self) -> AgentType {
        AgentType::StrategyExecutor
    }

    fn description(&self) -> &str {
        "Runs direct, sequential and parallel strategies"
    }
}

/// Execute one step as an Executor call and mirror it into the progress log.
///
/// `prior` holds results of earlier steps whose outputs the step may build on.
pub(crate) async fn run_step(
    ctx: &AgentContext,
    task: &Task,
    index: usize,
    step: &PlanStep,
    prior: &[StepResult],
) -> StepResult {
    let outcome = ctx
        .infer(
            &step_prompt(task, index, step, prior),
            &InferenceOptions::for_role(RoleHint::Executor),
        )
        .await;

    let result = match outcome.result {
        Ok(output) => StepResult::succeeded(
            index,
            &step.description,
            output,
            outcome.attempts,
            outcome.elapsed,
        ),
        Err(e) => StepResult::failed(
            index,
            &step.description,
            e.to_string(),
            Some(e.kind),
            outcome.attempts,
            outcome.elapsed,
        ),
    }
    .with_critical(step.critical);

    ctx.record_step(&result).await;
    result
}

fn step_prompt(task: &Task, index: usize, step: &PlanStep, prior: &[StepResult]) -> String {
    let mut prompt = format!("Overall task: {}\n", task.description());
    if let Some(context) = task.context_block() {
        prompt.push_str(&format!("Context:\n{}\n", context));
    }

    let done: Vec<String> = prior
        .iter()
        .filter(|r| r.is_success())
        .map(|r| {
            format!(
                "Step {} ({}):\n{}",
                r.index + 1,
                r.description,
                truncate_chars(r.output.trim(), PRIOR_OUTPUT_CHARS)
            )
        })
        .collect();
    if !done.is_empty() {
        prompt.push_str("\nCompleted so far:\n");
        prompt.push_str(&done.join("\n\n"));
        prompt.push('\n');
    }

    prompt.push_str(&format!(
        "\nNow do step {}: {}\nExpected output: {}\n",
        index + 1,
        step.description,
        step.expected_output.as_str()
    ));
    if let Some(hint) = &step.validation_hint {
        prompt.push_str(&format!("It will be checked by: {}\n", hint));
    }
    prompt.push_str("Reply with the result of this step only.");
    prompt
}

fn stop_reason(ctx: &AgentContext) -> String {
    if ctx.is_cancelled() {
        "not run: cancelled".to_string()
    } else {
        "not run: deadline reached".to_string()
    }
}

fn with_notes(trace: ExecutionTrace, notes: Vec<String>) -> ExecutionTrace {
    notes.into_iter().fold(trace, |trace, note| trace.with_note(note))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::config::EngineConfig;
    use crate::llm::scripted::ScriptedBackend;
    use crate::llm::{InferenceBackend, InferenceError};
    use crate::task::{ExpectedOutput, StepStatus, TaskId};

    /// Tracks how many Executor calls are running at once.
    #[derive(Default)]
    struct InFlightBackend {
        current: AtomicUsize,
        peak: AtomicUsize,
        executed: AtomicUsize,
    }

    #[async_trait]
    impl InferenceBackend for InFlightBackend {
        async fn infer(
            &self,
            _prompt: &str,
            options: &InferenceOptions,
        ) -> Result<String, InferenceError> {
            if options.role == RoleHint::Decomposer {
                return Ok(r#"["a", "b", "c", "d", "e", "f", "g", "h"]"#.to_string());
            }
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            self.executed.fetch_add(1, Ordering::SeqCst);
            Ok("done".to_string())
        }
    }

    fn ctx(backend: Arc<ScriptedBackend>) -> AgentContext {
        let config = EngineConfig {
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
            ..EngineConfig::default()
        };
        AgentContext::new(
            backend,
            Arc::new(config),
            TaskId::generate(),
            Instant::now() + Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn test_direct_success() {
        let backend = Arc::new(ScriptedBackend::new().respond(RoleHint::Direct, "Hello!"));
        let trace = SingleStrategyExecutor::new()
            .execute_direct(&Task::new("say hello"), &ctx(backend.clone()))
            .await;
        assert!(trace.success);
        assert_eq!(trace.steps.len(), 1);
        assert_eq!(trace.combined_output(), "Hello!");
        assert_eq!(backend.calls(RoleHint::Direct), 1);
    }

    #[tokio::test]
    async fn test_direct_empty_reply_fails() {
        let backend = Arc::new(ScriptedBackend::new().fallback(RoleHint::Direct, Ok(String::new())));
        let trace = SingleStrategyExecutor::new()
            .execute_direct(&Task::new("say hello"), &ctx(backend))
            .await;
        assert!(!trace.success);
        assert_eq!(trace.steps[0].status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_sequential_feeds_prior_outputs_forward() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond(RoleHint::Decomposer, r#"{"steps": ["gather facts", "write summary"]}"#)
                .respond(RoleHint::Executor, "facts: A, B")
                .respond(RoleHint::Executor, "summary of A and B"),
        );
        let trace = SingleStrategyExecutor::new()
            .execute_sequential(&Task::new("research and summarize"), &ctx(backend.clone()))
            .await;
        assert!(trace.success);
        assert_eq!(trace.succeeded_count(), 2);
        let prompts = backend.prompts(RoleHint::Executor);
        assert!(prompts[1].contains("facts: A, B"));
    }

    #[tokio::test]
    async fn test_sequential_stops_at_first_failure() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond(RoleHint::Decomposer, "1. one\n2. two\n3. three")
                .respond(RoleHint::Executor, "ok")
                .fallback(RoleHint::Executor, Err(InferenceError::unavailable("down"))),
        );
        let trace = SingleStrategyExecutor::new()
            .execute_sequential(&Task::new("three things"), &ctx(backend.clone()))
            .await;
        assert!(!trace.success);
        assert_eq!(trace.steps[0].status, StepStatus::Succeeded);
        assert_eq!(trace.steps[1].status, StepStatus::Failed);
        assert_eq!(trace.steps[1].attempts, 3);
        assert_eq!(trace.steps[2].status, StepStatus::Skipped);
        // one success plus three attempts on step two
        assert_eq!(backend.calls(RoleHint::Executor), 4);
    }

    #[tokio::test]
    async fn test_parallel_majority_succeeds() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond(RoleHint::Decomposer, r#"["alpha", "beta", "gamma", "delta"]"#)
                .when_prompt_contains(
                    RoleHint::Executor,
                    "step 3: gamma",
                    Err(InferenceError::unavailable("down")),
                )
                .fallback(RoleHint::Executor, Ok("done".into())),
        );
        let trace = SingleStrategyExecutor::new()
            .execute_parallel(&Task::new("four things"), &ctx(backend))
            .await;
        assert!(trace.success);
        assert_eq!(trace.succeeded_count(), 3);
        let indices: Vec<usize> = trace.steps.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(trace.steps[2].status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_parallel_respects_fan_out() {
        let backend = Arc::new(InFlightBackend::default());
        let config = EngineConfig {
            parallel_fan_out: 2,
            ..EngineConfig::default()
        };
        let ctx = AgentContext::new(
            backend.clone(),
            Arc::new(config),
            TaskId::generate(),
            Instant::now() + Duration::from_secs(10),
        );

        let trace = SingleStrategyExecutor::new()
            .execute_parallel(&Task::new("eight things"), &ctx)
            .await;

        assert!(trace.success);
        assert_eq!(trace.succeeded_count(), 8);
        assert_eq!(backend.executed.load(Ordering::SeqCst), 8);
        let peak = backend.peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 2, "peak {}", peak);
    }

    #[tokio::test]
    async fn test_step_prompt_carries_expected_output_and_check() {
        let backend = Arc::new(ScriptedBackend::new().respond(RoleHint::Executor, "{}"));
        let step = PlanStep::new("emit the config")
            .with_expected_output(ExpectedOutput::Data)
            .with_validation_hint("parses as JSON");

        let result = run_step(&ctx(backend.clone()), &Task::new("write config"), 0, &step, &[]).await;

        assert!(result.is_success());
        let prompt = &backend.prompts(RoleHint::Executor)[0];
        assert!(prompt.contains("Now do step 1: emit the config"));
        assert!(prompt.contains("Expected output: data"));
        assert!(prompt.contains("It will be checked by: parses as JSON"));
    }

    #[tokio::test]
    async fn test_parallel_half_is_not_majority() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond(RoleHint::Decomposer, r#"["alpha", "beta"]"#)
                .when_prompt_contains(
                    RoleHint::Executor,
                    "step 2: beta",
                    Err(InferenceError::timeout("slow")),
                )
                .fallback(RoleHint::Executor, Ok("done".into())),
        );
        let trace = SingleStrategyExecutor::new()
            .execute_parallel(&Task::new("two things"), &ctx(backend))
            .await;
        assert!(!trace.success);
    }

    #[tokio::test]
    async fn test_decomposition_fallback_runs_whole_task() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond(RoleHint::Decomposer, "I would rather not.")
                .respond(RoleHint::Executor, "did it"),
        );
        let trace = SingleStrategyExecutor::new()
            .execute_sequential(&Task::new("do the thing"), &ctx(backend))
            .await;
        assert!(trace.success);
        assert_eq!(trace.steps.len(), 1);
        assert_eq!(trace.steps[0].description, "do the thing");
        assert_eq!(trace.notes.len(), 1);
    }
}
