//! Strategy selection.
//!
//! # Decision Policy
//! ```text
//! domain in pipeline_domains      -> MultiAgentPipeline
//! complexity > high threshold     -> MultiAgentPipeline
//! complexity < low threshold      -> Direct
//! otherwise (mid range)           -> Sequential, or Parallel when its
//!                                    estimated success rate beats
//!                                    Sequential's by more than the margin
//! ```
//! Estimates come from the statistics snapshot once a bucket has enough
//! samples, and from per-strategy priors before that. When the rate gap sits
//! exactly on the margin, the higher success-to-cost ratio wins.

use std::sync::Arc;

use serde::Serialize;

use crate::agents::leaf::ComplexityScore;
use crate::agents::{Agent, AgentId, AgentType, Strategy};
use crate::config::EngineConfig;
use crate::learning::{StatsKey, StatsSnapshot, StrategyEstimate};

/// Rate differences closer than this to the margin count as a tie.
const TIE_EPSILON: f64 = 1e-9;

/// Read-only routing preview.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyRecommendation {
    /// Strategy name as used in logs and persisted keys
    pub name: String,
    pub strategy: Strategy,
    /// Estimated success rate of `strategy` in the task's bucket
    pub confidence: f64,
    pub complexity: f64,
    pub domain: crate::task::Domain,
    /// True when `confidence` comes from observed outcomes
    pub learned: bool,
}

/// Picks a strategy for a scored task.
///
/// # Pure Function
/// `select` reads only the score, the snapshot and the configuration.
pub struct StrategySelector {
    id: AgentId,
    config: Arc<EngineConfig>,
}

impl StrategySelector {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            id: AgentId::new(),
            config,
        }
    }

    /// Samples a bucket needs before learned rates are used.
    ///
    /// With learning disabled the priors are always used.
    fn min_samples(&self) -> usize {
        if self.config.learning_enabled {
            self.config.min_samples
        } else {
            usize::MAX
        }
    }

    /// Estimate for `strategy` in the score's (domain, bucket).
    pub fn estimate(
        &self,
        score: &ComplexityScore,
        strategy: Strategy,
        stats: &StatsSnapshot,
    ) -> StrategyEstimate {
        let key = StatsKey::new(score.domain(), score.bucket(), strategy);
        stats.estimate(&key, self.min_samples())
    }

    /// Choose the strategy for `score`.
    pub fn select(&self, score: &ComplexityScore, stats: &StatsSnapshot) -> Strategy {
        let cfg = &self.config;
        let value = score.value();

        if cfg.is_pipeline_domain(score.domain()) || value > cfg.high_complexity_threshold {
            return Strategy::MultiAgentPipeline;
        }
        if value < cfg.low_complexity_threshold {
            return Strategy::Direct;
        }

        let sequential = self.estimate(score, Strategy::SequentialDecomposition, stats);
        let parallel = self.estimate(score, Strategy::ParallelDecomposition, stats);
        let advantage = parallel.success_rate - sequential.success_rate;

        let strategy = if (advantage - cfg.parallel_margin).abs() < TIE_EPSILON {
            if parallel.efficiency() > sequential.efficiency() {
                Strategy::ParallelDecomposition
            } else {
                Strategy::SequentialDecomposition
            }
        } else if advantage > cfg.parallel_margin {
            Strategy::ParallelDecomposition
        } else {
            Strategy::SequentialDecomposition
        };

        tracing::debug!(
            agent = %self.agent_type(),
            domain = %score.domain(),
            strategy = %strategy,
            "Mid-range routing: sequential {:.2} ({}), parallel {:.2} ({})",
            sequential.success_rate,
            if sequential.learned { "learned" } else { "prior" },
            parallel.success_rate,
            if parallel.learned { "learned" } else { "prior" },
        );
        strategy
    }

    /// `select` plus the estimate backing it.
    pub fn recommend(&self, score: &ComplexityScore, stats: &StatsSnapshot) -> StrategyRecommendation {
        let strategy = self.select(score, stats);
        let estimate = self.estimate(score, strategy, stats);
        StrategyRecommendation {
            name: strategy.as_str().to_string(),
            strategy,
            confidence: estimate.success_rate.clamp(0.0, 1.0),
            complexity: score.value(),
            domain: score.domain(),
            learned: estimate.learned,
        }
    }
}

impl Agent for StrategySelector {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Selector
    }

    fn description(&self) -> &str {
        "Chooses an execution strategy from complexity and learned success rates"
    }
}
