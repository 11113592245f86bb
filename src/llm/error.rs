//! Inference error types and the backoff policy applied to them.
//!
//! Every error kind the backend can report is retryable by policy; the
//! distinction between kinds only feeds backoff sizing and failure analysis.

use std::time::Duration;

/// Error from an inference backend call.
#[derive(Debug, Clone)]
pub struct InferenceError {
    /// The kind of error
    pub kind: InferenceErrorKind,
    /// HTTP status code, if the backend speaks HTTP
    pub status_code: Option<u16>,
    /// Error message
    pub message: String,
    /// Backend-requested delay before retrying (Retry-After)
    pub retry_after: Option<Duration>,
}

impl InferenceError {
    /// The call did not complete in time (or the deadline cut it off).
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: InferenceErrorKind::Timeout,
            status_code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// The backend could not be reached or refused the request.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: InferenceErrorKind::BackendUnavailable,
            status_code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// The backend answered over HTTP with a non-success status.
    pub fn http_status(status_code: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: classify_http_status(status_code),
            status_code: Some(status_code),
            message: message.into(),
            retry_after,
        }
    }

    /// The backend answered, but with nothing usable.
    pub fn empty_response(message: impl Into<String>) -> Self {
        Self {
            kind: InferenceErrorKind::EmptyResponse,
            status_code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Check if this error is transient (infrastructure rather than content).
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl std::fmt::Display for InferenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for InferenceError {}

/// Classification of inference errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceErrorKind {
    /// Call exceeded its time budget
    Timeout,
    /// Connection failure, rate limiting, 5xx, or an unusable reply envelope
    BackendUnavailable,
    /// Reply contained no text
    EmptyResponse,
}

impl InferenceErrorKind {
    /// Timeouts and unavailability say nothing about the prompt itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InferenceErrorKind::Timeout | InferenceErrorKind::BackendUnavailable
        )
    }
}

impl std::fmt::Display for InferenceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InferenceErrorKind::Timeout => write!(f, "Timeout"),
            InferenceErrorKind::BackendUnavailable => write!(f, "Backend unavailable"),
            InferenceErrorKind::EmptyResponse => write!(f, "Empty response"),
        }
    }
}

/// Exponential backoff between attempts of one inference call.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay, including `retry_after`
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt` (0-based) after `error`.
    ///
    /// Uses the backend's `retry_after` when present, otherwise
    /// `base * 2^attempt` plus up to 25% deterministic jitter. Always capped
    /// at `max_delay`.
    pub fn delay_for(&self, error: &InferenceError, attempt: u32) -> Duration {
        if let Some(retry_after) = error.retry_after {
            return retry_after.min(self.max_delay);
        }

        // Unavailable backends get a longer runway than timeouts or empty replies
        let base_ms = match error.kind {
            InferenceErrorKind::BackendUnavailable => self.base_delay.as_millis() as u64 * 2,
            InferenceErrorKind::Timeout | InferenceErrorKind::EmptyResponse => {
                self.base_delay.as_millis() as u64
            }
        };

        let multiplier = 2u64.saturating_pow(attempt);
        let delay_ms = base_ms.saturating_mul(multiplier);

        let jitter_range = delay_ms / 4;
        let jitter = if jitter_range > 0 {
            (attempt as u64 * 7) % jitter_range
        } else {
            0
        };

        let capped = delay_ms
            .saturating_add(jitter)
            .min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped)
    }
}

/// Parse HTTP status code into error kind.
///
/// Timeouts map to `Timeout`; everything else the backend rejects is
/// `BackendUnavailable` from the engine's point of view.
pub fn classify_http_status(status: u16) -> InferenceErrorKind {
    match status {
        408 | 504 => InferenceErrorKind::Timeout,
        _ => InferenceErrorKind::BackendUnavailable,
    }
}
