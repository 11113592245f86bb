//! Execution plans and the parsing of step lists out of model output.
//!
//! Both the pipeline Planner and the ad hoc decomposer of the
//! Sequential/Parallel strategies produce step lists; they share the parser
//! here so the accepted formats stay identical.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::strip_code_fence;

/// Kind of artifact a step is expected to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedOutput {
    #[default]
    Text,
    Code,
    Command,
    Data,
}

impl ExpectedOutput {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpectedOutput::Text => "text",
            ExpectedOutput::Code => "code",
            ExpectedOutput::Command => "command",
            ExpectedOutput::Data => "data",
        }
    }

    /// Lenient parse; anything unrecognised is plain text.
    fn from_loose(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "code" | "patch" | "diff" | "source" => ExpectedOutput::Code,
            "command" | "shell" | "cli" => ExpectedOutput::Command,
            "data" | "json" | "table" | "list" => ExpectedOutput::Data,
            _ => ExpectedOutput::Text,
        }
    }
}

/// One step of a plan or decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    pub expected_output: ExpectedOutput,
    /// How the step's result can be checked
    pub validation_hint: Option<String>,
    /// Failure of a critical step aborts the plan
    pub critical: bool,
}

impl PlanStep {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            expected_output: ExpectedOutput::Text,
            validation_hint: None,
            critical: false,
        }
    }

    pub fn with_expected_output(mut self, expected: ExpectedOutput) -> Self {
        self.expected_output = expected;
        self
    }

    pub fn with_validation_hint(mut self, hint: impl Into<String>) -> Self {
        self.validation_hint = Some(hint.into());
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// Ordered steps produced by the Planner for one pipeline attempt.
///
/// # Invariants
/// - `steps` is non-empty
/// - every step has a non-blank description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    steps: Vec<PlanStep>,
    /// Planner's stated rationale, if it gave one
    reasoning: Option<String>,
}

impl ExecutionPlan {
    /// Create a plan.
    ///
    /// # Errors
    /// `PlanError::EmptyPlan` for zero steps, `PlanError::EmptyStepDescription`
    /// for a blank step.
    pub fn new(steps: Vec<PlanStep>, reasoning: Option<String>) -> Result<Self, PlanError> {
        if steps.is_empty() {
            return Err(PlanError::EmptyPlan);
        }
        if let Some(index) = steps.iter().position(|s| s.description.trim().is_empty()) {
            return Err(PlanError::EmptyStepDescription { index });
        }
        Ok(Self { steps, reasoning })
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn reasoning(&self) -> Option<&str> {
        self.reasoning.as_deref()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Flag critical steps: the first `leading` steps plus any whose
    /// description reads like setup or a precondition. Planner-set flags stay.
    pub fn mark_critical(mut self, leading: usize) -> Self {
        for (i, step) in self.steps.iter_mut().enumerate() {
            if i < leading || is_setup_step(&step.description) {
                step.critical = true;
            }
        }
        self
    }

    /// Numbered rendering used inside prompts.
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let mut line = format!("{}. {}", i + 1, s.description);
                if let Some(hint) = &s.validation_hint {
                    line.push_str(&format!(" (check: {})", hint));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Errors from plan construction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("Plan contains no steps")]
    EmptyPlan,

    #[error("Step {index} has an empty description")]
    EmptyStepDescription { index: usize },
}

const SETUP_PATTERNS: &[&str] = &[
    "setup",
    "set up",
    "install",
    "initialize",
    "initialise",
    "prerequisite",
    "precondition",
    "configure environment",
    "create project",
];

/// Whether a step description matches setup/precondition phrasing.
///
/// Patterns match whole words, so "uninstall" is not "install".
pub fn is_setup_step(description: &str) -> bool {
    let lower = description.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let joined = format!(" {} ", words.join(" "));
    SETUP_PATTERNS
        .iter()
        .any(|p| joined.contains(&format!(" {} ", p)))
}

fn list_item_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:(?:step\s*)?\d+[.):]|[-*\u{2022}])\s+(.+?)\s*$").ok()
    })
    .as_ref()
}

/// Parse a step list from model output.
///
/// Accepts, in order of preference:
/// - a JSON object with a `steps` (or `subtasks`) array
/// - a bare JSON array
/// - numbered or bulleted lines
///
/// Array items may be strings or objects with `description`,
/// `expected_output`, `validation_hint` and `critical`. Returns an empty
/// vector when nothing usable is found; callers decide what that means.
pub fn parse_step_list(text: &str) -> Vec<PlanStep> {
    let body = strip_code_fence(text);

    if let Some(value) = extract_json(body) {
        let items = match &value {
            Value::Array(items) => Some(items.as_slice()),
            Value::Object(map) => map
                .get("steps")
                .or_else(|| map.get("subtasks"))
                .and_then(Value::as_array)
                .map(Vec::as_slice),
            _ => None,
        };
        if let Some(items) = items {
            return items.iter().filter_map(step_from_value).collect();
        }
    }

    let Some(re) = list_item_regex() else {
        return Vec::new();
    };
    body.lines()
        .filter_map(|line| re.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|d| !d.is_empty())
        .map(PlanStep::new)
        .collect()
}

/// Pull the planner's reasoning field out of a JSON reply, if any.
pub fn parse_reasoning(text: &str) -> Option<String> {
    extract_json(strip_code_fence(text))?
        .get("reasoning")?
        .as_str()
        .map(str::to_string)
}

/// Parse `text` as JSON, falling back to the outermost `{...}` or `[...]` span.
pub(crate) fn extract_json(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end]) {
                    return Some(value);
                }
            }
        }
    }
    None
}

fn step_from_value(item: &Value) -> Option<PlanStep> {
    match item {
        Value::String(s) if !s.trim().is_empty() => Some(PlanStep::new(s.trim())),
        Value::Object(map) => {
            let description = map
                .get("description")
                .or_else(|| map.get("step"))
                .or_else(|| map.get("task"))
                .and_then(Value::as_str)?
                .trim();
            if description.is_empty() {
                return None;
            }
            let mut step = PlanStep::new(description);
            if let Some(expected) = map.get("expected_output").and_then(Value::as_str) {
                step.expected_output = ExpectedOutput::from_loose(expected);
            }
            step.validation_hint = map
                .get("validation_hint")
                .or_else(|| map.get("verification"))
                .and_then(Value::as_str)
                .map(str::to_string);
            step.critical = map.get("critical").and_then(Value::as_bool).unwrap_or(false);
            Some(step)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_object_with_steps() {
        let text = r#"{"reasoning": "simple fix", "steps": [
            {"description": "Reproduce the null pointer", "expected_output": "command", "validation_hint": "crash observed"},
            {"description": "Add a null check in function X", "expected_output": "code", "critical": true},
            "Run the unit tests"
        ]}"#;
        let steps = parse_step_list(text);

        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].expected_output, ExpectedOutput::Command);
        assert_eq!(steps[0].validation_hint.as_deref(), Some("crash observed"));
        assert!(steps[1].critical);
        assert_eq!(steps[1].expected_output, ExpectedOutput::Code);
        assert_eq!(steps[2].description, "Run the unit tests");
        assert_eq!(parse_reasoning(text).as_deref(), Some("simple fix"));
    }

    #[test]
    fn test_parse_fenced_array() {
        let text = "```json\n[\"first\", \"second\"]\n```";
        let steps = parse_step_list(text);
        assert_eq!(
            steps.iter().map(|s| s.description.as_str()).collect::<Vec<_>>(),
            vec!["first", "second"]
        );
    }

    #[test]
    fn test_parse_json_embedded_in_prose() {
        let text = "Sure! Here is the plan:\n{\"steps\": [\"a\", \"b\"]}\nGood luck.";
        assert_eq!(parse_step_list(text).len(), 2);
    }

    #[test]
    fn test_parse_numbered_and_bulleted_lines() {
        let text = "Plan:\n1. Gather requirements\n2) Draft outline\n- Review draft\nStep 4: Publish\nnot a step";
        let steps = parse_step_list(text);
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[3].description, "Publish");
    }

    #[test]
    fn test_parse_garbage_yields_nothing() {
        assert!(parse_step_list("I cannot help with that.").is_empty());
        assert!(parse_step_list("{\"steps\": []}").is_empty());
        assert!(parse_step_list("").is_empty());
    }

    #[test]
    fn test_plan_rejects_empty() {
        assert_eq!(ExecutionPlan::new(vec![], None).unwrap_err(), PlanError::EmptyPlan);
        assert_eq!(
            ExecutionPlan::new(vec![PlanStep::new("ok"), PlanStep::new("  ")], None).unwrap_err(),
            PlanError::EmptyStepDescription { index: 1 }
        );
    }

    #[test]
    fn test_mark_critical() {
        let plan = ExecutionPlan::new(
            vec![
                PlanStep::new("Read the ticket"),
                PlanStep::new("Write the patch"),
                PlanStep::new("Install the test dependencies"),
                PlanStep::new("Summarize"),
            ],
            None,
        )
        .unwrap()
        .mark_critical(1);

        let flags: Vec<bool> = plan.steps().iter().map(|s| s.critical).collect();
        assert_eq!(flags, vec![true, false, true, false]);
    }

    #[test]
    fn test_setup_steps_match_whole_words() {
        assert!(is_setup_step("Install the test dependencies"));
        assert!(is_setup_step("First, set up the project"));
        assert!(is_setup_step("Run setup.sh"));
        assert!(is_setup_step("Check the prerequisite: Python 3"));

        assert!(!is_setup_step("Uninstall the old package"));
        assert!(!is_setup_step("reinstall deps"));
        assert!(!is_setup_step("Compare the two setups"));
        assert!(!is_setup_step("Reset upstream branch"));
    }
}
