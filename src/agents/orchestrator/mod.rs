//! Orchestrator agents - coordinate leaf agents for a whole automation call.
//!
//! - `AutomationOrchestrator`: entry point (analyze, route, recover, learn)
//! - `MultiAgentPipeline`: planner/runner/validator state machine
//! - `RecoveryController`: failure classification and next action

mod pipeline;
mod recovery;
mod root;

pub use pipeline::{MultiAgentPipeline, PipelineOutcome, PipelineState};
pub use recovery::{FailureAnalysis, FailureMode, RecoveryController, RecoveryDecision};
pub use root::{AutomationOrchestrator, BucketMetrics, EngineMetrics};
