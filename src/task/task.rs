//! Core Task type submitted to the automation engine.
//!
//! # Invariants
//! - A `Task` is never mutated once handed to the orchestrator
//! - `id` is unique per automation call (caller-supplied or generated)

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for a task.
///
/// Callers may supply their own (e.g. a request id); otherwise a UUID is generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Create a new unique task ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::generate()
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broad category of work a task asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Writing, debugging, testing or refactoring code
    Coding,
    /// Multi-step planning and coordination
    Planning,
    /// Answering questions, lookups, summaries
    Information,
    /// Performing a concrete action (send, open, book...)
    Action,
    Unknown,
}

impl Domain {
    pub const ALL: [Domain; 5] = [
        Domain::Coding,
        Domain::Planning,
        Domain::Information,
        Domain::Action,
        Domain::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Coding => "coding",
            Domain::Planning => "planning",
            Domain::Information => "information",
            Domain::Action => "action",
            Domain::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "coding" | "code" | "debugging" | "testing" | "refactoring" => Ok(Domain::Coding),
            "planning" => Ok(Domain::Planning),
            "information" => Ok(Domain::Information),
            "action" => Ok(Domain::Action),
            "unknown" => Ok(Domain::Unknown),
            other => Err(format!("unknown domain '{}'", other)),
        }
    }
}

/// One unit of user-requested work.
///
/// Built with the `with_*` methods, then handed by value to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    description: String,
    /// Opaque key-value bag from the caller, rendered into prompts
    context: BTreeMap<String, serde_json::Value>,
    domain_hint: Option<Domain>,
    #[serde(default, with = "optional_duration_ms")]
    deadline: Option<Duration>,
    /// Overrides `EngineConfig::auto_recover` for this task
    #[serde(default)]
    auto_recover: Option<bool>,
}

impl Task {
    /// Create a task with a generated id.
    ///
    /// Empty descriptions are accepted; the analyzer scores them as trivial.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: TaskId::generate(),
            description: description.into(),
            context: BTreeMap::new(),
            domain_hint: None,
            deadline: None,
            auto_recover: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_domain_hint(mut self, domain: Domain) -> Self {
        self.domain_hint = Some(domain);
        self
    }

    /// Overall time budget for the automation call, measured from its start.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Turn retries and escalation on or off for this task only.
    pub fn with_auto_recover(mut self, enabled: bool) -> Self {
        self.auto_recover = Some(enabled);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn context(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.context
    }

    pub fn domain_hint(&self) -> Option<Domain> {
        self.domain_hint
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub fn auto_recover(&self) -> Option<bool> {
        self.auto_recover
    }

    /// Caller context rendered as `key: value` lines for prompts.
    pub fn context_block(&self) -> Option<String> {
        if self.context.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .context
            .iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("{}: {}", k, s),
                other => format!("{}: {}", k, other),
            })
            .collect();
        Some(lines.join("\n"))
    }
}

mod optional_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
