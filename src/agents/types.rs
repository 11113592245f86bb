//! Core types for the agent system.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{Domain, TaskId};

/// Unique identifier for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(Uuid);

impl AgentId {
    /// Create a new unique agent ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role an agent plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Automation orchestrator (top of the tree)
    Root,
    /// Multi-agent pipeline supervisor
    Pipeline,
    /// Scores complexity and classifies domain
    Analyzer,
    /// Picks the execution strategy
    Selector,
    /// Runs Direct / Sequential / Parallel strategies
    StrategyExecutor,
    Planner,
    /// Runs plan steps in order
    PlanRunner,
    Validator,
    /// Decides retry / escalate / give up after a failure
    Recovery,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Root => "root",
            AgentType::Pipeline => "pipeline",
            AgentType::Analyzer => "analyzer",
            AgentType::Selector => "selector",
            AgentType::StrategyExecutor => "strategy_executor",
            AgentType::Planner => "planner",
            AgentType::PlanRunner => "plan_runner",
            AgentType::Validator => "validator",
            AgentType::Recovery => "recovery",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Named execution policy chosen per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One backend call with the whole task
    Direct,
    /// Ad hoc decomposition, sub-steps run one after another
    SequentialDecomposition,
    /// Ad hoc decomposition, sub-steps run concurrently
    ParallelDecomposition,
    /// Planner -> Executor -> Validator with re-planning
    MultiAgentPipeline,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::Direct,
        Strategy::SequentialDecomposition,
        Strategy::ParallelDecomposition,
        Strategy::MultiAgentPipeline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::SequentialDecomposition => "sequential_decomposition",
            Strategy::ParallelDecomposition => "parallel_decomposition",
            Strategy::MultiAgentPipeline => "multi_agent_pipeline",
        }
    }

    /// Expected success rate before any outcomes are learned.
    pub fn prior_success_rate(&self) -> f64 {
        match self {
            Strategy::Direct => 0.60,
            Strategy::SequentialDecomposition => 0.65,
            Strategy::ParallelDecomposition => 0.60,
            Strategy::MultiAgentPipeline => 0.75,
        }
    }

    /// Expected latency in seconds before any outcomes are learned.
    pub fn prior_cost_secs(&self) -> f64 {
        match self {
            Strategy::Direct => 2.0,
            Strategy::SequentialDecomposition => 8.0,
            Strategy::ParallelDecomposition => 5.0,
            Strategy::MultiAgentPipeline => 15.0,
        }
    }

    /// Confidence reported for a fully successful run of a strategy that has
    /// no validator. Scaled by the succeeded-step ratio.
    pub fn base_confidence(&self) -> f64 {
        match self {
            Strategy::Direct => 0.7,
            Strategy::SequentialDecomposition => 0.85,
            Strategy::ParallelDecomposition => 0.75,
            Strategy::MultiAgentPipeline => 1.0,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct" => Ok(Strategy::Direct),
            "sequential_decomposition" | "sequential" => Ok(Strategy::SequentialDecomposition),
            "parallel_decomposition" | "parallel" => Ok(Strategy::ParallelDecomposition),
            "multi_agent_pipeline" | "pipeline" => Ok(Strategy::MultiAgentPipeline),
            other => Err(format!("unknown strategy '{}'", other)),
        }
    }
}

/// What to do after a strategy failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    RetrySameStrategy,
    EscalateToPipeline,
    GiveUp,
}

/// Reason why an automation call ended without success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// Strategy ran to completion
    Completed,
    /// Caller cancelled the call
    Cancelled,
    /// Overall deadline elapsed (or was already past on entry)
    DeadlineExceeded,
    /// Planner never produced a usable plan
    PlanningFailed,
    /// Validator rejected the result and the planning budget ran out
    ValidationFailed,
    /// Steps failed and recovery gave up
    ExecutionFailed,
}

/// Result of one automation call, returned to the caller.
///
/// # Invariants
/// - If `success == true`, `terminal_reason` is `Completed`
/// - `confidence` is in [0, 1]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationResult {
    pub task_id: TaskId,

    /// Whether the task was successful
    pub success: bool,

    /// Final (or partial) output
    pub output: String,

    /// Strategy that produced this result (the last one tried)
    pub strategy: Strategy,

    pub confidence: f64,

    pub elapsed_ms: u64,

    /// Strategy attempts beyond the first plus pipeline re-plans
    pub retries: u32,

    pub domain: Domain,

    pub complexity: f64,

    pub terminal_reason: TerminalReason,

    /// Human-readable diagnostics: strategies tried, step statuses, errors
    pub trace_summary: String,
}

impl AutomationResult {
    pub fn is_partial(&self) -> bool {
        !self.success && !self.output.trim().is_empty()
    }
}

/// Errors that can occur in agent operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("Planning failed: {0}")]
    PlanningFailure(String),

    #[error("Inference error: {0}")]
    Inference(#[from] crate::llm::InferenceError),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Cancelled")]
    Cancelled,
}
