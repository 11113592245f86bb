//! Inference backend abstraction.
//!
//! The engine consumes a single capability: turn a prompt into text. This
//! module defines that trait, the options that travel with each call, and an
//! OpenRouter implementation. Retrying is the caller's job (see
//! `AgentContext::infer`), so backends make exactly one attempt per call.

mod error;
mod openrouter;
#[cfg(test)]
pub(crate) mod scripted;

pub use error::{classify_http_status, BackoffPolicy, InferenceError, InferenceErrorKind};
pub use openrouter::OpenRouterBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a chat-style request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Purpose of an inference call.
///
/// Backends may use this to pick a system prompt or route to a different
/// model; the engine uses it to label logs and traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleHint {
    /// Single-shot answer to the whole task
    Direct,
    /// Ad hoc split into sub-steps (Sequential / Parallel strategies)
    Decomposer,
    /// Pipeline planner
    Planner,
    /// Runs one step of a plan or decomposition
    Executor,
    /// Judges goal completion
    Validator,
}

impl RoleHint {
    /// System prompt matching the role.
    pub fn system_prompt(&self) -> &'static str {
        match self {
            RoleHint::Direct => "You are a capable assistant. Complete the user's task directly and concisely.",
            RoleHint::Decomposer => "You break tasks into short ordered lists of sub-steps. Respond only with JSON.",
            RoleHint::Planner => "You are a meticulous planner. Produce executable step plans as JSON only.",
            RoleHint::Executor => "You execute a single step of a larger task and report the concrete result.",
            RoleHint::Validator => "You are a strict reviewer. Judge whether work achieved its goal. Respond only with JSON.",
        }
    }
}

impl std::fmt::Display for RoleHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RoleHint::Direct => "direct",
            RoleHint::Decomposer => "decomposer",
            RoleHint::Planner => "planner",
            RoleHint::Executor => "executor",
            RoleHint::Validator => "validator",
        };
        write!(f, "{}", name)
    }
}

/// Options for a single inference call.
#[derive(Debug, Clone)]
pub struct InferenceOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub role: RoleHint,
}

impl InferenceOptions {
    /// Defaults tuned per role: structured roles run cold, execution a bit warmer.
    pub fn for_role(role: RoleHint) -> Self {
        let temperature = match role {
            RoleHint::Planner | RoleHint::Decomposer | RoleHint::Validator => 0.1,
            RoleHint::Direct | RoleHint::Executor => 0.4,
        };
        Self {
            temperature: Some(temperature),
            max_tokens: Some(2048),
            role,
        }
    }
}

/// Trait for inference backends.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Produce text for `prompt`.
    ///
    /// Implementations make a single attempt and report failures as one of
    /// the three `InferenceErrorKind`s; they must not retry internally.
    async fn infer(&self, prompt: &str, options: &InferenceOptions)
        -> Result<String, InferenceError>;
}
