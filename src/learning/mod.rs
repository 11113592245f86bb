//! Online learning of per-strategy success rates.
//!
//! # How It Works
//!
//! 1. Each strategy run produces an `OutcomeRecord`
//! 2. The `OutcomeLearner` appends it to the `StatsStore` bucket keyed by
//!    (domain, complexity bucket, strategy), keeping the last K outcomes
//! 3. The strategy selector reads a `StatsSnapshot` and uses learned rates
//!    once a bucket has enough samples, falling back to per-strategy priors
//! 4. The store can be persisted to JSON and reloaded across restarts

mod learner;
mod persist;
mod store;

pub use learner::{OutcomeLearner, OutcomeRecord};
pub use persist::PersistError;
pub use store::{
    BucketStats, ComplexityBucket, Sample, StatsKey, StatsSnapshot, StatsStore, StrategyEstimate,
    StrategyTotals,
};
