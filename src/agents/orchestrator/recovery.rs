//! Recovery controller - what to do after a strategy fails.
//!
//! # Policy
//! 1. Classify the failed trace into a `FailureMode`
//! 2. Deadline/cancellation or a failed pipeline -> `GiveUp`
//! 3. Task qualifies for the pipeline and it was not tried -> `EscalateToPipeline`
//! 4. Transient failure and the strategy ran only once -> `RetrySameStrategy`
//! 5. Otherwise -> `GiveUp`
//!
//! The orchestrator additionally caps the number of rounds.

use std::sync::Arc;

use serde::Serialize;

use crate::agents::leaf::ComplexityScore;
use crate::agents::{Agent, AgentId, AgentType, NextAction, Strategy};
use crate::config::EngineConfig;
use crate::task::{ExecutionTrace, StepStatus};

/// Coarse cause of a failed strategy run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Every failed step failed on a timeout or an unavailable backend
    Transient,
    /// Some steps succeeded, the run as a whole did not
    PartialProgress,
    /// The backend answered but the work was not good enough
    Capability,
    /// The deadline passed or the caller cancelled
    Deadline,
}

/// Classified failure plus the evidence behind it.
#[derive(Debug, Clone, Serialize)]
pub struct FailureAnalysis {
    pub mode: FailureMode,
    pub evidence: Vec<String>,
}

/// Recovery decision for one failed round.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryDecision {
    pub action: NextAction,
    pub analysis: FailureAnalysis,
}

/// Stateless recovery policy.
pub struct RecoveryController {
    id: AgentId,
    config: Arc<EngineConfig>,
}

impl RecoveryController {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            id: AgentId::new(),
            config,
        }
    }

    /// Classify a failed trace.
    ///
    /// `interrupted` is true when the deadline passed or the call was cancelled.
    pub fn analyze(&self, trace: &ExecutionTrace, interrupted: bool) -> FailureAnalysis {
        let mut evidence = trace.errors();

        if interrupted {
            evidence.push("deadline reached or call cancelled".to_string());
            return FailureAnalysis {
                mode: FailureMode::Deadline,
                evidence,
            };
        }

        let failed: Vec<_> = trace
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .collect();
        let all_transient = !failed.is_empty()
            && failed
                .iter()
                .all(|s| s.error_kind.map_or(false, |k| k.is_transient()));

        let mode = if all_transient && trace.succeeded_count() == 0 {
            FailureMode::Transient
        } else if trace.succeeded_count() > 0 {
            FailureMode::PartialProgress
        } else {
            FailureMode::Capability
        };
        FailureAnalysis { mode, evidence }
    }

    /// Whether the task should get the pipeline after a cheaper strategy failed.
    fn qualifies_for_pipeline(&self, score: &ComplexityScore) -> bool {
        self.config.is_pipeline_domain(score.domain())
            || score.value() >= self.config.low_complexity_threshold
    }

    /// Decide the next action for a failed round.
    ///
    /// `tried` lists every strategy run so far in this call, including
    /// `attempted`.
    pub fn handle_failure(
        &self,
        score: &ComplexityScore,
        attempted: Strategy,
        trace: &ExecutionTrace,
        tried: &[Strategy],
        interrupted: bool,
    ) -> RecoveryDecision {
        let analysis = self.analyze(trace, interrupted);

        let action = if analysis.mode == FailureMode::Deadline
            || attempted == Strategy::MultiAgentPipeline
        {
            NextAction::GiveUp
        } else if self.qualifies_for_pipeline(score)
            && !tried.contains(&Strategy::MultiAgentPipeline)
        {
            NextAction::EscalateToPipeline
        } else if analysis.mode == FailureMode::Transient
            && tried.iter().filter(|s| **s == attempted).count() < 2
        {
            NextAction::RetrySameStrategy
        } else {
            NextAction::GiveUp
        };

        tracing::info!(
            agent = %self.agent_type(),
            strategy = %attempted,
            "Recovery: {:?} failure -> {:?}",
            analysis.mode,
            action
        );
        RecoveryDecision { action, analysis }
    }
}

impl Agent for RecoveryController {
    fn id(&self) -> &AgentId {
        &self.id
    }

    fn agent_type(&self) -> AgentType {
        AgentType::Recovery
    }

    fn description(&self) -> &str {
        "Chooses between retrying, escalating to the pipeline and giving up"
    }
}
