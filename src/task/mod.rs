//! Task module - the data that flows through one automation call.
//!
//! Everything here is owned by a single call: the `Task`, the
//! `ExecutionPlan` a planner derives from it, the `ExecutionTrace` of running
//! it and the `ValidationVerdict` on the result. None of it outlives the call.

pub mod plan;
pub mod task;
pub mod trace;
mod verdict;

pub use plan::{parse_step_list, ExecutionPlan, ExpectedOutput, PlanError, PlanStep};
pub use task::{Domain, Task, TaskId};
pub use trace::{ExecutionTrace, StepResult, StepStatus};
pub use verdict::{ValidationVerdict, VerdictSource};
