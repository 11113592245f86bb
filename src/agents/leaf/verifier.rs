//! Validator role - judges whether a pipeline run achieved its task.
//!
//! # Safety Default
//! The validator never passes on ambiguous input. A failed backend call, a
//! reply without JSON, or JSON lacking a boolean `passed` and a numeric
//! `confidence` all yield `ValidationVerdict::ambiguous` (fail, confidence 0).

use serde_json::Value;

use crate::agents::{Agent, AgentContext, AgentId, AgentType};
use crate::llm::{InferenceOptions, RoleHint};
use crate::task::plan::extract_json;
use crate::task::{ExecutionPlan, ExecutionTrace, Task, ValidationVerdict};
use crate::util::strip_code_fence;

/// Agent that validates pipeline results.
pub struct Validator {
    id: AgentId,
}

impl Validator {
    pub fn new() -> Self {
        Self { id: AgentId::new() }
    }

    fn build_prompt(task: &Task, plan: &ExecutionPlan, trace: &ExecutionTrace) -> String {
        let errors = trace.errors();
        format!(
            r#"Judge whether the work below achieved the task.

Task: {task}

Plan:
{plan}

Step results:
{steps}
{errors}
Respond with a JSON object:
{{
    "passed": true or false,
    "confidence": 0.0 to 1.0,
    "reasoning": "Brief explanation",
    "remediation": "What to redo if it failed (omit if passed)"
}}

Be strict: pass only if the task is actually accomplished.
Respond ONLY with the JSON object."#,
            task = task.description(),
            plan = plan.render(),
            steps = trace.render(),
            errors = if errors.is_empty() {
                String::new()
            } else {
                format!("\nProblems:\n- {}\n", errors.join("\n- "))
            },
        )
    }

    /// Parse a verdict, applying the safety default to anything unusable.
    pub fn parse_verdict(response: &str) -> ValidationVerdict {
        let Some(json) = extract_json(strip_code_fence(response)) else {
            return ValidationVerdict::ambiguous("validator reply was not JSON");
        };
        let Some(passed) = json.get("passed").and_then(Value::as_bool) else {
            return ValidationVerdict::ambiguous("validator reply had no boolean 'passed'");
        };
        let Some(confidence) = json.get("confidence").and_then(Value::as_f64) else {
            return ValidationVerdict::ambiguous("validator reply had no numeric 'confidence'");
        };

        let reasoning = json
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let remediation = json
            .get("remediation")
            .and_then(Value::as_str)
            .map(str::to_string);

        ValidationVerdict::judged(passed, confidence, reasoning, remediation)
    }

    /// Judge `trace` against the task and plan.
    pub async fn validate(
        &self,
        task: &Task,
        plan: &ExecutionPlan,
        trace: &ExecutionTrace,
        ctx: &AgentContext,
    ) -> ValidationVerdict {
        let outcome = ctx
            .infer(
                &Self::build_prompt(task, plan, trace),
                &InferenceOptions::for_role(RoleHint::Validator),
            )
            .await;

        let verdict = match outcome.result {
            Ok(text) => Self::parse_verdict(&text),
            Err(e) => ValidationVerdict::ambiguous(format!("validator unavailable: {}", e)),
        };

        tracing::info!(
            agent = %self.agent_type(),
            task_id = %ctx.task_id,
            "Validation: passed={} confidence={:.2} ({:?})",
            verdict.passed(),
            verdict.confidence(),
            verdict.source()
        );
        verdict
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for Validator {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Validator
    }

    fn description(&self) -> &str {
        "Judges goal completion; fails closed on ambiguous replies"
    }
}
