//! Multi-agent pipeline - Planner -> PlanRunner -> Validator with re-planning.
//!
//! # State Machine
//! ```text
//! Planning --plan ok--> Executing --trace--> Validating --pass--> Done(success)
//!    ^                      |                    |
//!    |                      | critical abort     | fail, confidence < retry
//!    |                      v                    | threshold, budget left
//!    |                 Done(failure)             v
//!    +------------------------------------- Retrying
//! ```
//! The planning budget (`max_planning_attempts`) counts every visit to
//! `Planning`, whether it follows a rejected verdict or an unusable plan.

use std::sync::Arc;

use serde::Serialize;

use crate::agents::leaf::{PlanRunner, Planner, Replan, Validator};
use crate::agents::{Agent, AgentContext, AgentError, AgentId, AgentType};
use crate::task::{ExecutionPlan, ExecutionTrace, Task, ValidationVerdict};

/// Observable pipeline states, recorded in `PipelineOutcome::history`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Planning,
    Executing,
    Validating,
    Retrying,
    Done,
}

/// Internal states carrying their data.
enum Stage {
    Planning(NextPlan),
    Executing(ExecutionPlan),
    Validating(ExecutionPlan, ExecutionTrace),
    Retrying(NextPlan),
    Done,
}

impl Stage {
    fn state(&self) -> PipelineState {
        match self {
            Stage::Planning(_) => PipelineState::Planning,
            Stage::Executing(_) => PipelineState::Executing,
            Stage::Validating(..) => PipelineState::Validating,
            Stage::Retrying(_) => PipelineState::Retrying,
            Stage::Done => PipelineState::Done,
        }
    }
}

/// Owned form of `Replan`, carried between states.
enum NextPlan {
    Fresh,
    Remediation(String),
    Unparseable,
}

impl NextPlan {
    fn as_replan(&self) -> Replan<'_> {
        match self {
            NextPlan::Fresh => Replan::Fresh,
            NextPlan::Remediation(hint) => Replan::Remediation(hint),
            NextPlan::Unparseable => Replan::Unparseable,
        }
    }
}

/// Result of one pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub success: bool,
    /// Visits to `Planning` (never exceeds `max_planning_attempts`)
    pub planning_attempts: u32,
    /// Last plan produced, if any
    pub plan: Option<ExecutionPlan>,
    /// Trace of the last execution (empty if nothing ran)
    pub trace: ExecutionTrace,
    /// Last verdict, if validation (or an abort) produced one
    pub verdict: Option<ValidationVerdict>,
    /// Error that ended the run without a verdict
    pub error: Option<AgentError>,
    pub history: Vec<PipelineState>,
}

impl PipelineOutcome {
    pub fn output(&self) -> String {
        self.trace.combined_output()
    }

    /// Verdict confidence on success, zero otherwise.
    pub fn confidence(&self) -> f64 {
        match &self.verdict {
            Some(v) if self.success => v.confidence(),
            _ => 0.0,
        }
    }
}

/// Supervises the three pipeline roles for one task.
pub struct MultiAgentPipeline {
    id: AgentId,
    planner: Arc<Planner>,
    runner: Arc<PlanRunner>,
    validator: Arc<Validator>,
}

impl MultiAgentPipeline {
    pub fn new() -> Self {
        Self {
            id: AgentId::new(),
            planner: Arc::new(Planner::new()),
            runner: Arc::new(PlanRunner::new()),
            validator: Arc::new(Validator::new()),
        }
    }

    /// Planner, runner and validator, in pipeline order.
    pub fn roles(&self) -> [&dyn Agent; 3] {
        [
            self.planner.as_ref(),
            self.runner.as_ref(),
            self.validator.as_ref(),
        ]
    }

    /// Drive the state machine to `Done`.
    pub async fn run(&self, task: &Task, ctx: &AgentContext) -> PipelineOutcome {
        let max_planning = ctx.config.max_planning_attempts.max(1);
        let mut outcome = PipelineOutcome {
            success: false,
            planning_attempts: 0,
            plan: None,
            trace: ExecutionTrace::default(),
            verdict: None,
            error: None,
            history: Vec::new(),
        };
        let mut stage = Stage::Planning(NextPlan::Fresh);

        loop {
            outcome.history.push(stage.state());
            stage = match stage {
                Stage::Planning(next) => {
                    if let Some(err) = stop_error(ctx) {
                        outcome.error = Some(err);
                        Stage::Done
                    } else {
                        outcome.planning_attempts += 1;
                        match self.planner.plan(task, next.as_replan(), ctx).await {
                            Ok(plan) => Stage::Executing(plan),
                            Err(AgentError::PlanningFailure(reason))
                                if outcome.planning_attempts < max_planning =>
                            {
                                tracing::warn!(
                                    agent = %self.agent_type(),
                                    task_id = %ctx.task_id,
                                    attempt = outcome.planning_attempts,
                                    "Planning produced no usable steps, re-planning: {}",
                                    reason
                                );
                                outcome.trace.notes.push(format!(
                                    "planning attempt {} failed: {}",
                                    outcome.planning_attempts, reason
                                ));
                                Stage::Retrying(NextPlan::Unparseable)
                            }
                            Err(err) => {
                                tracing::warn!(task_id = %ctx.task_id, "Planning failed: {}", err);
                                outcome.trace.notes.push(format!(
                                    "planning attempt {} failed: {}",
                                    outcome.planning_attempts, err
                                ));
                                outcome.error = Some(err);
                                Stage::Done
                            }
                        }
                    }
                }

                Stage::Executing(plan) => {
                    let trace = self.runner.run(task, &plan, ctx).await;
                    outcome.plan = Some(plan.clone());
                    match trace.aborted.clone() {
                        Some(reason) => {
                            outcome.verdict = Some(ValidationVerdict::aborted(&reason));
                            outcome.trace = merge_notes(trace, &outcome.trace);
                            Stage::Done
                        }
                        None => Stage::Validating(plan, trace),
                    }
                }

                Stage::Validating(plan, trace) => {
                    let verdict = self.validator.validate(task, &plan, &trace, ctx).await;
                    outcome.trace = merge_notes(trace, &outcome.trace);

                    let retry = !verdict.passed()
                        && verdict.confidence() < ctx.config.validation_retry_confidence
                        && outcome.planning_attempts < max_planning
                        && !ctx.should_stop();

                    let next = if verdict.passed() {
                        outcome.success = true;
                        Stage::Done
                    } else if retry {
                        let hint = verdict
                            .remediation()
                            .map(str::to_string)
                            .unwrap_or_else(|| verdict.reasoning().to_string());
                        tracing::info!(
                            task_id = %ctx.task_id,
                            attempt = outcome.planning_attempts,
                            "Validation failed with confidence {:.2}, re-planning",
                            verdict.confidence()
                        );
                        outcome.trace.notes.push(format!(
                            "validation rejected plan {} (confidence {:.2}): {}",
                            outcome.planning_attempts,
                            verdict.confidence(),
                            verdict.reasoning()
                        ));
                        Stage::Retrying(NextPlan::Remediation(hint))
                    } else {
                        Stage::Done
                    };
                    outcome.verdict = Some(verdict);
                    next
                }

                Stage::Retrying(next) => Stage::Planning(next),

                Stage::Done => break,
            };
        }

        tracing::info!(
            agent = %self.agent_type(),
            task_id = %ctx.task_id,
            success = outcome.success,
            "Pipeline finished after {} planning attempt(s)",
            outcome.planning_attempts
        );
        outcome
    }
}

impl Default for MultiAgentPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for MultiAgentPipeline {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Pipeline
    }

    fn description(&self) -> &str {
        "Plans, executes and validates with re-planning on rejection"
    }
}

fn stop_error(ctx: &AgentContext) -> Option<AgentError> {
    if ctx.is_cancelled() {
        Some(AgentError::Cancelled)
    } else if ctx.is_expired() {
        Some(AgentError::DeadlineExceeded)
    } else {
        None
    }
}

/// Keep notes from earlier attempts on the newest trace.
fn merge_notes(mut trace: ExecutionTrace, previous: &ExecutionTrace) -> ExecutionTrace {
    let mut notes = previous.notes.clone();
    notes.append(&mut trace.notes);
    trace.notes = notes;
    trace
}
