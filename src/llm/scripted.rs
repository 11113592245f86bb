//! Deterministic in-process backend for tests.
//!
//! Responses are resolved in this order: persistent substring rules, the
//! per-role queue, then the per-role fallback. Calls are counted per role.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{InferenceBackend, InferenceError, InferenceOptions, RoleHint};

type Reply = Result<String, InferenceError>;

#[derive(Default)]
pub(crate) struct ScriptedBackend {
    rules: Mutex<Vec<(RoleHint, String, Reply)>>,
    queues: Mutex<HashMap<RoleHint, VecDeque<Reply>>>,
    fallbacks: Mutex<HashMap<RoleHint, Reply>>,
    delays: Mutex<HashMap<RoleHint, Duration>>,
    calls: Mutex<HashMap<RoleHint, u32>>,
    prompts: Mutex<Vec<(RoleHint, String)>>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot reply for `role`.
    pub(crate) fn push(self, role: RoleHint, reply: Reply) -> Self {
        self.queues
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .push_back(reply);
        self
    }

    pub(crate) fn respond(self, role: RoleHint, text: &str) -> Self {
        self.push(role, Ok(text.to_string()))
    }

    /// Reply used for `role` whenever its queue is empty.
    pub(crate) fn fallback(self, role: RoleHint, reply: Reply) -> Self {
        self.fallbacks.lock().unwrap().insert(role, reply);
        self
    }

    /// Reply for every `role` call whose prompt contains `needle`.
    pub(crate) fn when_prompt_contains(self, role: RoleHint, needle: &str, reply: Reply) -> Self {
        self.rules
            .lock()
            .unwrap()
            .push((role, needle.to_string(), reply));
        self
    }

    /// Sleep this long before answering `role` calls.
    pub(crate) fn with_delay(self, role: RoleHint, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(role, delay);
        self
    }

    pub(crate) fn calls(&self, role: RoleHint) -> u32 {
        self.calls.lock().unwrap().get(&role).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    pub(crate) fn prompts(&self, role: RoleHint) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn resolve(&self, role: RoleHint, prompt: &str) -> Reply {
        if let Some((_, _, reply)) = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|(r, needle, _)| *r == role && prompt.contains(needle.as_str()))
        {
            return reply.clone();
        }
        if let Some(reply) = self
            .queues
            .lock()
            .unwrap()
            .get_mut(&role)
            .and_then(|q| q.pop_front())
        {
            return reply;
        }
        self.fallbacks
            .lock()
            .unwrap()
            .get(&role)
            .cloned()
            .unwrap_or_else(|| Err(InferenceError::empty_response("no scripted reply")))
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn infer(&self, prompt: &str, options: &InferenceOptions) -> Result<String, InferenceError> {
        *self.calls.lock().unwrap().entry(options.role).or_insert(0) += 1;
        self.prompts
            .lock()
            .unwrap()
            .push((options.role, prompt.to_string()));

        let delay = self.delays.lock().unwrap().get(&options.role).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self.resolve(options.role, prompt)?;
        if reply.trim().is_empty() {
            return Err(InferenceError::empty_response("blank scripted reply"));
        }
        Ok(reply)
    }
}
