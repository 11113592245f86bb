//! Agent execution context - per-call state shared by every role.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::llm::{BackoffPolicy, InferenceBackend, InferenceError, InferenceOptions};
use crate::task::{StepResult, TaskId};

/// Outcome of a (possibly retried) inference call.
#[derive(Debug)]
pub struct InferenceOutcome {
    pub result: Result<String, InferenceError>,
    /// Backend calls made, including the successful one
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Work completed so far in one call, readable after the call is cut off.
///
/// `steps` covers the current strategy attempt only; `notes` span the call.
#[derive(Debug, Clone, Default)]
pub struct ProgressLog {
    pub steps: Vec<StepResult>,
    pub notes: Vec<String>,
}

impl ProgressLog {
    /// Outputs of succeeded steps in the order they finished.
    pub fn partial_output(&self) -> String {
        self.steps
            .iter()
            .filter(|s| s.is_success())
            .map(|s| s.output.trim())
            .filter(|o| !o.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn summary(&self) -> String {
        let mut lines = self.notes.clone();
        let ok = self.steps.iter().filter(|s| s.is_success()).count();
        lines.push(format!(
            "{} of {} finished steps succeeded before the run was cut off",
            ok,
            self.steps.len()
        ));
        lines.join("\n")
    }
}

/// Context passed to all agents during one automation call.
///
/// # Thread Safety
/// Shared by reference between concurrently running steps. The progress log
/// sits behind its own lock; everything else is read-only.
pub struct AgentContext {
    /// Inference backend for model calls
    pub backend: Arc<dyn InferenceBackend>,

    pub config: Arc<EngineConfig>,

    pub task_id: TaskId,

    /// Hard stop for everything done on behalf of this task
    deadline: Instant,

    /// Cooperative cancellation from the caller.
    pub cancel_token: CancellationToken,

    backoff: BackoffPolicy,

    progress: Arc<RwLock<ProgressLog>>,
}

impl AgentContext {
    /// Create a new agent context.
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        config: Arc<EngineConfig>,
        task_id: TaskId,
        deadline: Instant,
    ) -> Self {
        let backoff = BackoffPolicy::new(config.backoff_base, config.backoff_max);
        Self {
            backend,
            config,
            task_id,
            deadline,
            cancel_token: CancellationToken::new(),
            backoff,
            progress: Arc::new(RwLock::new(ProgressLog::default())),
        }
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Check if execution has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Either cancellation or the deadline.
    pub fn should_stop(&self) -> bool {
        self.is_cancelled() || self.is_expired()
    }

    /// Call the backend with retries.
    ///
    /// - at most `step_max_attempts` backend calls
    /// - each call is bounded by the remaining deadline
    /// - a blank reply counts as `EmptyResponse`
    /// - backoff between attempts; no retry is scheduled if the backoff
    ///   would run past the deadline
    pub async fn infer(&self, prompt: &str, options: &InferenceOptions) -> InferenceOutcome {
        let max_attempts = self.config.step_max_attempts.max(1);
        let start = Instant::now();
        let mut attempts = 0u32;

        let finish = |result: Result<String, InferenceError>, attempts: u32| InferenceOutcome {
            result,
            attempts,
            elapsed: start.elapsed(),
        };

        loop {
            if self.is_cancelled() {
                return finish(Err(InferenceError::timeout("call cancelled")), attempts);
            }
            let remaining = self.remaining();
            if remaining.is_zero() {
                return finish(
                    Err(InferenceError::timeout("deadline reached before call")),
                    attempts,
                );
            }

            attempts += 1;
            let call = tokio::time::timeout(remaining, self.backend.infer(prompt, options));
            let result = tokio::select! {
                _ = self.cancel_token.cancelled() => Err(InferenceError::timeout("call cancelled")),
                r = call => r.unwrap_or_else(|_| {
                    Err(InferenceError::timeout("deadline elapsed during call"))
                }),
            };

            let error = match result {
                Ok(text) if !text.trim().is_empty() => {
                    if attempts > 1 {
                        tracing::info!(
                            task_id = %self.task_id,
                            role = %options.role,
                            "Inference succeeded after {} attempts",
                            attempts
                        );
                    }
                    return finish(Ok(text), attempts);
                }
                Ok(_) => InferenceError::empty_response("backend returned blank text"),
                Err(e) => e,
            };

            if attempts >= max_attempts {
                tracing::warn!(
                    task_id = %self.task_id,
                    role = %options.role,
                    "Inference failed after {} attempts: {}",
                    attempts,
                    error
                );
                return finish(Err(error), attempts);
            }

            let delay = self.backoff.delay_for(&error, attempts - 1);
            if delay >= self.remaining() {
                tracing::warn!(
                    task_id = %self.task_id,
                    role = %options.role,
                    "Not retrying, backoff {:?} exceeds remaining deadline: {}",
                    delay,
                    error
                );
                return finish(Err(error), attempts);
            }

            tracing::warn!(
                task_id = %self.task_id,
                role = %options.role,
                attempt = attempts,
                "Inference attempt failed with {}, retrying in {:?}: {}",
                error.kind,
                delay,
                error.message
            );

            tokio::select! {
                _ = self.cancel_token.cancelled() => return finish(Err(error), attempts),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Start a new strategy attempt: earlier step results are dropped.
    pub async fn begin_attempt(&self, note: impl Into<String>) {
        let mut progress = self.progress.write().await;
        progress.steps.clear();
        progress.notes.push(note.into());
    }

    /// Mirror a finished step into the progress log.
    pub async fn record_step(&self, step: &StepResult) {
        self.progress.write().await.steps.push(step.clone());
    }

    pub async fn note(&self, note: impl Into<String>) {
        self.progress.write().await.notes.push(note.into());
    }

    /// Shared handle to the progress log, for reading after the work is dropped.
    pub fn progress_handle(&self) -> Arc<RwLock<ProgressLog>> {
        Arc::clone(&self.progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::ScriptedBackend;
    use crate::llm::{InferenceErrorKind, RoleHint};

    fn fast_config() -> Arc<EngineConfig> {
        Arc::new(EngineConfig {
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
            ..EngineConfig::default()
        })
    }

    fn ctx(backend: Arc<ScriptedBackend>, config: Arc<EngineConfig>, budget: Duration) -> AgentContext {
        AgentContext::new(backend, config, TaskId::generate(), Instant::now() + budget)
    }

    #[tokio::test]
    async fn test_retries_transient_errors_then_succeeds() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .push(RoleHint::Direct, Err(InferenceError::unavailable("503")))
                .push(RoleHint::Direct, Err(InferenceError::timeout("slow")))
                .respond(RoleHint::Direct, "done"),
        );
        let ctx = ctx(backend.clone(), fast_config(), Duration::from_secs(5));

        let outcome = ctx
            .infer("hi", &InferenceOptions::for_role(RoleHint::Direct))
            .await;
        assert_eq!(outcome.result.unwrap(), "done");
        assert_eq!(outcome.attempts, 3);
        assert_eq!(backend.calls(RoleHint::Direct), 3);
    }

    #[tokio::test]
    async fn test_attempts_never_exceed_limit() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .fallback(RoleHint::Executor, Err(InferenceError::unavailable("down"))),
        );
        let config = Arc::new(EngineConfig {
            step_max_attempts: 2,
            ..(*fast_config()).clone()
        });
        let ctx = ctx(backend.clone(), config, Duration::from_secs(5));

        let outcome = ctx
            .infer("x", &InferenceOptions::for_role(RoleHint::Executor))
            .await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(backend.calls(RoleHint::Executor), 2);
    }

    #[tokio::test]
    async fn test_blank_reply_is_empty_response() {
        let backend = Arc::new(ScriptedBackend::new().fallback(RoleHint::Direct, Ok("  ".into())));
        let ctx = ctx(backend, fast_config(), Duration::from_secs(5));

        let outcome = ctx
            .infer("x", &InferenceOptions::for_role(RoleHint::Direct))
            .await;
        assert_eq!(
            outcome.result.unwrap_err().kind,
            InferenceErrorKind::EmptyResponse
        );
    }

    #[tokio::test]
    async fn test_slow_call_cut_off_by_deadline() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .fallback(RoleHint::Direct, Ok("late".into()))
                .with_delay(RoleHint::Direct, Duration::from_secs(10)),
        );
        let ctx = ctx(backend, fast_config(), Duration::from_millis(50));

        let started = std::time::Instant::now();
        let outcome = ctx
            .infer("x", &InferenceOptions::for_role(RoleHint::Direct))
            .await;
        assert_eq!(outcome.result.unwrap_err().kind, InferenceErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_no_retry_when_backoff_exceeds_deadline() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .fallback(RoleHint::Direct, Err(InferenceError::unavailable("down"))),
        );
        let config = Arc::new(EngineConfig {
            backoff_base: Duration::from_secs(30),
            backoff_max: Duration::from_secs(60),
            ..EngineConfig::default()
        });
        let ctx = ctx(backend.clone(), config, Duration::from_millis(200));

        let outcome = ctx
            .infer("x", &InferenceOptions::for_role(RoleHint::Direct))
            .await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_progress_log_keeps_current_attempt() {
        let backend = Arc::new(ScriptedBackend::new());
        let ctx = ctx(backend, fast_config(), Duration::from_secs(5));
        ctx.begin_attempt("attempt 1").await;
        ctx.record_step(&StepResult::succeeded(0, "a", "old".into(), 1, Duration::ZERO))
            .await;
        ctx.begin_attempt("attempt 2").await;
        ctx.record_step(&StepResult::succeeded(0, "a", "new".into(), 1, Duration::ZERO))
            .await;

        let handle = ctx.progress_handle();
        let progress = handle.read().await;
        assert_eq!(progress.partial_output(), "new");
        assert_eq!(progress.notes, vec!["attempt 1", "attempt 2"]);
    }

    #[tokio::test]
    async fn test_cancelled_context_makes_no_calls() {
        let backend = Arc::new(ScriptedBackend::new().fallback(RoleHint::Direct, Ok("x".into())));
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ctx(backend.clone(), fast_config(), Duration::from_secs(5)).with_cancel_token(token);

        let outcome = ctx
            .infer("x", &InferenceOptions::for_role(RoleHint::Direct))
            .await;
        assert!(outcome.result.is_err());
        assert_eq!(backend.total_calls(), 0);
    }
}
