//! Planner role - turns a task into an ordered `ExecutionPlan`.

use crate::agents::{Agent, AgentContext, AgentError, AgentId, AgentType};
use crate::llm::{InferenceOptions, RoleHint};
use crate::task::{parse_step_list, plan::parse_reasoning, ExecutionPlan, Task};

/// What the previous planning attempt left behind, if anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replan<'a> {
    /// First attempt
    Fresh,
    /// The validator rejected the last run and suggested this
    Remediation(&'a str),
    /// The last reply had no usable steps
    Unparseable,
}

/// Agent that produces step plans.
///
/// # Algorithm
/// 1. Prompt the backend with the task (plus any remediation from the last
///    validation, or a stricter format reminder after an unusable reply)
/// 2. Parse the reply into steps
/// 3. Mark critical steps (leading steps, planner flags, setup phrasing)
pub struct Planner {
    id: AgentId,
}

impl Planner {
    pub fn new() -> Self {
        Self { id: AgentId::new() }
    }

    fn build_prompt(task: &Task, replan: Replan<'_>) -> String {
        let mut prompt = format!(
            r#"Create an execution plan for this task.

Task: {}
"#,
            task.description()
        );
        if let Some(context) = task.context_block() {
            prompt.push_str(&format!("\nContext:\n{}\n", context));
        }

        match replan {
            Replan::Fresh => {}
            Replan::Remediation(hint) => prompt.push_str(&format!(
                "\nA previous attempt was rejected by review. Address this in the new plan:\n{}\n",
                hint
            )),
            Replan::Unparseable => prompt.push_str(
                "\nYour previous reply could not be parsed. Follow the JSON format exactly and include at least one step.\n",
            ),
        }

        prompt.push_str(
            r#"
Respond with a JSON object:
{
    "steps": [
        {
            "description": "What to do",
            "expected_output": "text | code | command | data",
            "validation_hint": "How to check this step worked",
            "critical": false
        }
    ],
    "reasoning": "Why these steps"
}

Guidelines:
- Steps run in order; each should be concrete and independently checkable
- Mark a step critical if later steps cannot work without it
- Keep the plan short

Respond ONLY with the JSON object."#,
        );
        prompt
    }

    /// Produce a plan for `task`.
    ///
    /// # Errors
    /// - `AgentError::Inference` when the backend call fails after retries
    /// - `AgentError::PlanningFailure` when the reply yields zero usable steps
    pub async fn plan(
        &self,
        task: &Task,
        replan: Replan<'_>,
        ctx: &AgentContext,
    ) -> Result<ExecutionPlan, AgentError> {
        let outcome = ctx
            .infer(
                &Self::build_prompt(task, replan),
                &InferenceOptions::for_role(RoleHint::Planner),
            )
            .await;
        let text = outcome.result?;

        let steps = parse_step_list(&text);
        let plan = ExecutionPlan::new(steps, parse_reasoning(&text))
            .map_err(|e| AgentError::PlanningFailure(e.to_string()))?
            .mark_critical(ctx.config.critical_leading_steps);

        tracing::info!(
            agent = %self.agent_type(),
            task_id = %ctx.task_id,
            "Planned {} steps ({} critical)",
            plan.len(),
            plan.steps().iter().filter(|s| s.critical).count()
        );
        Ok(plan)
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for Planner {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Planner
    }

    fn description(&self) -> &str {
        "Breaks a task into an ordered, checkable step plan"
    }
}
