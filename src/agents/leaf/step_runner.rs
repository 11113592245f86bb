//! Plan runner - the Executor role of the pipeline.

use crate::agents::leaf::executor::run_step;
use crate::agents::{Agent, AgentContext, AgentId, AgentType};
use crate::task::{ExecutionPlan, ExecutionTrace, StepResult, StepStatus, Task};

/// Runs plan steps strictly in declared order.
///
/// # Failure Handling
/// - Each step gets `step_max_attempts` backend attempts with backoff
/// - A failed critical step aborts the plan; later steps are `Skipped`
/// - A failed non-critical step is recorded and the plan continues
/// - The trace succeeds iff nothing aborted and at least one step succeeded
pub struct PlanRunner {
    id: AgentId,
}

impl PlanRunner {
    pub fn new() -> Self {
        Self { id: AgentId::new() }
    }

    pub async fn run(&self, task: &Task, plan: &ExecutionPlan, ctx: &AgentContext) -> ExecutionTrace {
        let mut results: Vec<StepResult> = Vec::with_capacity(plan.len());
        let mut abort: Option<String> = None;

        for (index, step) in plan.steps().iter().enumerate() {
            if let Some(reason) = &abort {
                results.push(
                    StepResult::skipped(index, &step.description, format!("not run: {}", reason))
                        .with_critical(step.critical),
                );
                continue;
            }
            if ctx.should_stop() {
                let reason = if ctx.is_cancelled() {
                    "cancelled"
                } else {
                    "deadline reached"
                };
                results.push(
                    StepResult::skipped(index, &step.description, format!("not run: {}", reason))
                        .with_critical(step.critical),
                );
                abort = Some(reason.to_string());
                continue;
            }

            let result = run_step(ctx, task, index, step, &results).await;
            if result.status == StepStatus::Failed {
                if step.critical {
                    tracing::warn!(
                        agent = %self.agent_type(),
                        task_id = %ctx.task_id,
                        "Critical step {} failed, aborting plan: {}",
                        index + 1,
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                    abort = Some(format!("critical step {} failed", index + 1));
                } else {
                    tracing::info!(
                        agent = %self.agent_type(),
                        task_id = %ctx.task_id,
                        "Non-critical step {} failed, continuing",
                        index + 1
                    );
                }
            }
            results.push(result);
        }

        let trace = ExecutionTrace::new(results, false);
        match abort {
            Some(reason) => trace.with_abort(reason),
            None => {
                let success = trace.succeeded_count() > 0;
                ExecutionTrace { success, ..trace }
            }
        }
    }
}

impl Default for PlanRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for PlanRunner {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn agent_type(&self) -> AgentType {
        AgentType::PlanRunner
    }

    fn description(&self) -> &str {
        "Executes plan steps in order with per-step retries"
    }
}
