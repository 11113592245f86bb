//! Leaf agents - specialized agents that do actual work.
//!
//! # Routing
//! - `ComplexityAnalyzer`: heuristic score + domain (no backend calls)
//! - `StrategySelector`: pure choice over a statistics snapshot
//!
//! # Execution
//! - `SingleStrategyExecutor`: Direct / Sequential / Parallel
//! - `Planner`, `PlanRunner`, `Validator`: the pipeline roles

mod complexity;
mod executor;
mod planner;
mod step_runner;
mod strategy_select;
mod verifier;

pub use complexity::{
    Classification, Classifier, ComplexityAnalyzer, ComplexityScore, KeywordClassifier,
    KeywordRules, Signal, SignalKind, WeightedKeyword, MAX_COMPLEXITY,
};
pub use executor::SingleStrategyExecutor;
pub use planner::{Planner, Replan};
pub use step_runner::PlanRunner;
pub use strategy_select::{StrategyRecommendation, StrategySelector};
pub use verifier::Validator;
