//! Agents module - routing and supervision of one automation call.
//!
//! # Agent Types
//! - **ComplexityAnalyzer**: scores difficulty and classifies the domain
//! - **StrategySelector**: picks an execution strategy from score + statistics
//! - **SingleStrategyExecutor**: runs Direct / Sequential / Parallel strategies
//! - **Planner**, **PlanRunner**, **Validator**: the three pipeline roles
//! - **MultiAgentPipeline**: the plan -> execute -> validate state machine
//! - **RecoveryController**: decides what happens after a failed strategy
//! - **AutomationOrchestrator**: the public facade wiring all of the above
//!
//! # Design Principles
//! - Leaf roles wrap at most one kind of inference call each
//! - Selection is pure over a statistics snapshot
//! - Every retry loop carries an explicit counter; the orchestrator owns the
//!   only wall-clock deadline

mod context;
pub mod leaf;
pub mod orchestrator;
mod types;

pub use context::{AgentContext, InferenceOutcome, ProgressLog};
pub use types::{
    AgentError, AgentId, AgentType, AutomationResult, NextAction, Strategy, TerminalReason,
};

/// Base trait for all agents.
///
/// Agents do their work through role-specific async methods; this trait only
/// carries identity. Log lines carry `agent_type` as the `agent` field, and
/// trace summaries name the role that produced each line.
pub trait Agent: Send + Sync {
    /// Get the unique identifier for this agent.
    fn id(&self) -> &AgentId;

    /// Get the type/role of this agent.
    fn agent_type(&self) -> AgentType;

    /// Get a human-readable description of this agent.
    fn description(&self) -> &str {
        "Generic agent"
    }
}
