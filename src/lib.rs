//! # Adaptive Automation
//!
//! Task automation engine that routes each natural-language task to an
//! execution strategy matched to its complexity, recovers from failures by
//! escalating, and learns which strategies work from observed outcomes.
//!
//! ## Architecture
//!
//! ```text
//!              ┌──────────────────────────────┐
//!              │    AutomationOrchestrator    │
//!              │ (deadline, recovery, learn)  │
//!              └──────────────┬───────────────┘
//!        ┌────────────────────┼─────────────────────┐
//!        ▼                    ▼                     ▼
//! ┌─────────────┐   ┌──────────────────┐   ┌──────────────────┐
//! │ Complexity  │   │ SingleStrategy   │   │ MultiAgent       │
//! │ Analyzer +  │   │ Executor         │   │ Pipeline         │
//! │ Selector    │   │ direct/seq/par   │   │ plan→run→verify  │
//! └─────────────┘   └────────┬─────────┘   └────────┬─────────┘
//!                            └──────────┬───────────┘
//!                                       ▼
//!                            ┌──────────────────────┐
//!                            │  InferenceBackend    │
//!                            └──────────────────────┘
//! ```
//!
//! ## Task Flow
//! 1. Score complexity and classify the domain
//! 2. Pick a strategy from learned success rates (or priors)
//! 3. Run it under one wall-clock deadline
//! 4. On failure: retry, escalate to the pipeline, or give up
//! 5. Record the outcome and return an `AutomationResult`
//!
//! ## Modules
//! - `agents`: orchestrator, pipeline and leaf roles
//! - `learning`: statistics store, persistence and the outcome learner
//! - `llm`: inference backend trait and the OpenRouter client
//! - `task`: tasks, plans, traces and verdicts

pub mod agents;
pub mod config;
pub mod learning;
pub mod llm;
pub mod task;
pub mod util;

pub use agents::orchestrator::{AutomationOrchestrator, EngineMetrics};
pub use agents::{AutomationResult, Strategy, TerminalReason};
pub use config::{Config, EngineConfig};
pub use learning::OutcomeLearner;
pub use task::{Domain, Task, TaskId};
