//! Per-step results and the trace that collects them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::llm::InferenceErrorKind;

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    /// Not run (earlier abort) or failed non-critically and passed over
    Skipped,
}

/// Result of executing one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Position in the plan / decomposition
    pub index: usize,
    pub description: String,
    pub status: StepStatus,
    /// Raw backend output (empty unless the step produced something)
    pub output: String,
    /// Backend attempts spent on this step
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub critical: bool,
    /// Last error, if the step did not succeed
    pub error: Option<String>,
    pub error_kind: Option<InferenceErrorKind>,
}

impl StepResult {
    pub fn succeeded(
        index: usize,
        description: impl Into<String>,
        output: String,
        attempts: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            index,
            description: description.into(),
            status: StepStatus::Succeeded,
            output,
            attempts,
            elapsed_ms: elapsed.as_millis() as u64,
            critical: false,
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(
        index: usize,
        description: impl Into<String>,
        error: impl Into<String>,
        error_kind: Option<InferenceErrorKind>,
        attempts: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            index,
            description: description.into(),
            status: StepStatus::Failed,
            output: String::new(),
            attempts,
            elapsed_ms: elapsed.as_millis() as u64,
            critical: false,
            error: Some(error.into()),
            error_kind,
        }
    }

    /// A step that never ran.
    pub fn skipped(index: usize, description: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            index,
            description: description.into(),
            status: StepStatus::Skipped,
            output: String::new(),
            attempts: 0,
            elapsed_ms: 0,
            critical: false,
            error: Some(reason.into()),
            error_kind: None,
        }
    }

    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Succeeded
    }
}

/// Ordered step results for one strategy run.
///
/// # Invariants
/// - `steps` is ordered by `index`, regardless of completion order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub steps: Vec<StepResult>,
    /// Overall verdict of the executing role
    pub success: bool,
    /// Set when a critical failure stopped the run early
    pub aborted: Option<String>,
    /// Problems not tied to a single step (e.g. decomposition fallbacks)
    pub notes: Vec<String>,
}

impl ExecutionTrace {
    pub fn new(mut steps: Vec<StepResult>, success: bool) -> Self {
        steps.sort_by_key(|s| s.index);
        Self {
            steps,
            success,
            aborted: None,
            notes: Vec::new(),
        }
    }

    pub fn with_abort(mut self, reason: impl Into<String>) -> Self {
        self.aborted = Some(reason.into());
        self.success = false;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn succeeded_count(&self) -> usize {
        self.steps.iter().filter(|s| s.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count()
    }

    pub fn total_attempts(&self) -> u32 {
        self.steps.iter().map(|s| s.attempts).sum()
    }

    /// Fraction of steps that succeeded (0 for an empty trace).
    pub fn success_ratio(&self) -> f64 {
        if self.steps.is_empty() {
            0.0
        } else {
            self.succeeded_count() as f64 / self.steps.len() as f64
        }
    }

    /// Outputs of succeeded steps, in step order.
    pub fn combined_output(&self) -> String {
        let outputs: Vec<&str> = self
            .steps
            .iter()
            .filter(|s| s.is_success())
            .map(|s| s.output.trim())
            .filter(|o| !o.is_empty())
            .collect();
        outputs.join("\n\n")
    }

    /// Errors of every non-successful step plus run-level notes.
    pub fn errors(&self) -> Vec<String> {
        let mut errors: Vec<String> = self
            .steps
            .iter()
            .filter_map(|s| {
                s.error
                    .as_ref()
                    .map(|e| format!("step {} ({}): {}", s.index + 1, s.description, e))
            })
            .collect();
        if let Some(reason) = &self.aborted {
            errors.push(format!("aborted: {}", reason));
        }
        errors.extend(self.notes.iter().cloned());
        errors
    }

    /// One line per step, for prompts and diagnostics.
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .map(|s| {
                let status = match s.status {
                    StepStatus::Succeeded => "OK",
                    StepStatus::Failed => "FAILED",
                    StepStatus::Skipped => "SKIPPED",
                };
                let detail = match s.status {
                    StepStatus::Succeeded => crate::util::truncate_chars(s.output.trim(), 400),
                    _ => s.error.clone().unwrap_or_default(),
                };
                format!("{}. [{}] {} -> {}", s.index + 1, status, s.description, detail)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
