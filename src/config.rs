//! Configuration management for the automation engine.
//!
//! Configuration can be set via environment variables:
//! - `OPENROUTER_API_KEY` - Required by the `automate` binary's HTTP backend.
//! - `DEFAULT_MODEL` - Optional. Model identifier (OpenRouter format). Defaults to `openai/gpt-4.1-mini`.
//! - `OPENROUTER_API_URL` - Optional. OpenAI-compatible chat-completions endpoint replacing OpenRouter's.
//! - `AUTOMATION_LOW_THRESHOLD` - Optional. Complexity below this runs Direct. Defaults to `3.0`.
//! - `AUTOMATION_HIGH_THRESHOLD` - Optional. Complexity above this runs the pipeline. Defaults to `7.0`.
//! - `AUTOMATION_PARALLEL_MARGIN` - Optional. Learned advantage Parallel needs over Sequential. Defaults to `0.1`.
//! - `AUTOMATION_PARALLEL_FAN_OUT` - Optional. Concurrent sub-steps for Parallel. Defaults to `4`.
//! - `AUTOMATION_PARALLEL_SUCCESS_THRESHOLD` - Optional. Fraction of sub-steps that must succeed. Defaults to `0.5`.
//! - `AUTOMATION_STEP_MAX_ATTEMPTS` - Optional. Attempts per inference call / step. Defaults to `3`.
//! - `AUTOMATION_MAX_PLANNING_ATTEMPTS` - Optional. Pipeline planning budget (first plan + re-plans). Defaults to `2`.
//! - `AUTOMATION_VALIDATION_RETRY_CONFIDENCE` - Optional. Fail verdicts below this confidence re-plan. Defaults to `0.6`.
//! - `AUTOMATION_CRITICAL_LEADING_STEPS` - Optional. Leading plan steps treated as critical. Defaults to `1`.
//! - `AUTOMATION_BACKOFF_BASE_MS` / `AUTOMATION_BACKOFF_MAX_MS` - Optional. Retry backoff bounds. Defaults to `250` / `5000`.
//! - `AUTOMATION_DEFAULT_DEADLINE_SECS` - Optional. Deadline for tasks that declare none. Defaults to `120`.
//! - `AUTOMATION_ROLLING_WINDOW` - Optional. Outcomes kept per statistics bucket. Defaults to `50`.
//! - `AUTOMATION_MIN_SAMPLES` - Optional. Outcomes needed before learned rates replace priors. Defaults to `5`.
//! - `AUTOMATION_MAX_RECOVERY_ROUNDS` - Optional. Strategy attempts per task. Defaults to `3`.
//! - `AUTOMATION_LEARNING_ENABLED` - Optional. Record outcomes. Defaults to `true`.
//! - `AUTOMATION_AUTO_RECOVER` - Optional. Retry or escalate failed strategies. Defaults to `true`.
//! - `AUTOMATION_STATS_PATH` - Optional. JSON file the statistics store is loaded from / saved to.
//! - `AUTOMATION_CLASSIFIER_RULES` - Optional. JSON file replacing the default keyword rules.
//! - `AUTOMATION_PIPELINE_DOMAINS` - Optional. Comma-separated domains always routed to the pipeline. Defaults to `coding`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::task::Domain;
use crate::util::{env_var_bool, env_var_parse};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Longest budget a single automation call may run under.
pub const MAX_DEADLINE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Tunables for routing, retries and learning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Complexity strictly below this is handled by `Direct`
    pub low_complexity_threshold: f64,

    /// Complexity strictly above this is handled by the pipeline
    pub high_complexity_threshold: f64,

    /// Parallel must beat Sequential by more than this to be chosen
    pub parallel_margin: f64,

    /// Max sub-steps in flight for the Parallel strategy
    pub parallel_fan_out: usize,

    /// Succeeded fraction a Parallel trace must exceed to count as a success
    pub parallel_success_threshold: f64,

    /// Attempts for a single inference call (and hence a single step)
    pub step_max_attempts: u32,

    /// Planning attempts the pipeline may make (initial plan included)
    pub max_planning_attempts: u32,

    /// Failed verdicts below this confidence send the pipeline back to planning
    pub validation_retry_confidence: f64,

    /// Number of leading plan steps that are always critical
    pub critical_leading_steps: usize,

    pub backoff_base: Duration,
    pub backoff_max: Duration,

    /// Deadline applied when a task declares none
    pub default_deadline: Duration,

    /// Moving-average window per statistics bucket
    pub rolling_window: usize,

    /// Samples a bucket needs before its learned rate replaces the prior
    pub min_samples: usize,

    /// Strategy attempts (initial + recovery) per automation call
    pub max_recovery_rounds: u32,

    pub learning_enabled: bool,

    /// Let the recovery controller retry or escalate after a failure
    pub auto_recover: bool,

    /// Domains that always receive the multi-agent pipeline
    pub pipeline_domains: Vec<Domain>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            low_complexity_threshold: 3.0,
            high_complexity_threshold: 7.0,
            parallel_margin: 0.1,
            parallel_fan_out: 4,
            parallel_success_threshold: 0.5,
            step_max_attempts: 3,
            max_planning_attempts: 2,
            validation_retry_confidence: 0.6,
            critical_leading_steps: 1,
            backoff_base: Duration::from_millis(250),
            backoff_max: Duration::from_secs(5),
            default_deadline: Duration::from_secs(120),
            rolling_window: 50,
            min_samples: 5,
            max_recovery_rounds: 3,
            learning_enabled: true,
            auto_recover: true,
            pipeline_domains: vec![Domain::Coding],
        }
    }
}

impl EngineConfig {
    /// Load engine tunables from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let pipeline_domains = match std::env::var("AUTOMATION_PIPELINE_DOMAINS") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<Domain>().map_err(|e| {
                        ConfigError::InvalidValue("AUTOMATION_PIPELINE_DOMAINS".to_string(), e)
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => defaults.pipeline_domains.clone(),
        };

        let config = Self {
            low_complexity_threshold: env_var_parse(
                "AUTOMATION_LOW_THRESHOLD",
                defaults.low_complexity_threshold,
            )?,
            high_complexity_threshold: env_var_parse(
                "AUTOMATION_HIGH_THRESHOLD",
                defaults.high_complexity_threshold,
            )?,
            parallel_margin: env_var_parse("AUTOMATION_PARALLEL_MARGIN", defaults.parallel_margin)?,
            parallel_fan_out: env_var_parse(
                "AUTOMATION_PARALLEL_FAN_OUT",
                defaults.parallel_fan_out,
            )?,
            parallel_success_threshold: env_var_parse(
                "AUTOMATION_PARALLEL_SUCCESS_THRESHOLD",
                defaults.parallel_success_threshold,
            )?,
            step_max_attempts: env_var_parse(
                "AUTOMATION_STEP_MAX_ATTEMPTS",
                defaults.step_max_attempts,
            )?,
            max_planning_attempts: env_var_parse(
                "AUTOMATION_MAX_PLANNING_ATTEMPTS",
                defaults.max_planning_attempts,
            )?,
            validation_retry_confidence: env_var_parse(
                "AUTOMATION_VALIDATION_RETRY_CONFIDENCE",
                defaults.validation_retry_confidence,
            )?,
            critical_leading_steps: env_var_parse(
                "AUTOMATION_CRITICAL_LEADING_STEPS",
                defaults.critical_leading_steps,
            )?,
            backoff_base: Duration::from_millis(env_var_parse(
                "AUTOMATION_BACKOFF_BASE_MS",
                defaults.backoff_base.as_millis() as u64,
            )?),
            backoff_max: Duration::from_millis(env_var_parse(
                "AUTOMATION_BACKOFF_MAX_MS",
                defaults.backoff_max.as_millis() as u64,
            )?),
            default_deadline: Duration::from_secs(env_var_parse(
                "AUTOMATION_DEFAULT_DEADLINE_SECS",
                defaults.default_deadline.as_secs(),
            )?),
            rolling_window: env_var_parse("AUTOMATION_ROLLING_WINDOW", defaults.rolling_window)?,
            min_samples: env_var_parse("AUTOMATION_MIN_SAMPLES", defaults.min_samples)?,
            max_recovery_rounds: env_var_parse(
                "AUTOMATION_MAX_RECOVERY_ROUNDS",
                defaults.max_recovery_rounds,
            )?,
            learning_enabled: env_var_bool("AUTOMATION_LEARNING_ENABLED", defaults.learning_enabled),
            auto_recover: env_var_bool("AUTOMATION_AUTO_RECOVER", defaults.auto_recover),
            pipeline_domains,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.low_complexity_threshold > self.high_complexity_threshold {
            return Err(ConfigError::InvalidValue(
                "AUTOMATION_LOW_THRESHOLD".to_string(),
                format!(
                    "{} exceeds high threshold {}",
                    self.low_complexity_threshold, self.high_complexity_threshold
                ),
            ));
        }
        for (name, value) in [
            (
                "AUTOMATION_PARALLEL_SUCCESS_THRESHOLD",
                self.parallel_success_threshold,
            ),
            (
                "AUTOMATION_VALIDATION_RETRY_CONFIDENCE",
                self.validation_retry_confidence,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue(
                    name.to_string(),
                    format!("{} is outside [0, 1]", value),
                ));
            }
        }
        if self.parallel_fan_out == 0 {
            return Err(ConfigError::InvalidValue(
                "AUTOMATION_PARALLEL_FAN_OUT".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if self.step_max_attempts == 0 || self.max_planning_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "AUTOMATION_STEP_MAX_ATTEMPTS".to_string(),
                "attempt budgets must be at least 1".to_string(),
            ));
        }
        if self.default_deadline > MAX_DEADLINE {
            return Err(ConfigError::InvalidValue(
                "AUTOMATION_DEFAULT_DEADLINE_SECS".to_string(),
                format!(
                    "{}s exceeds the {}s ceiling",
                    self.default_deadline.as_secs(),
                    MAX_DEADLINE.as_secs()
                ),
            ));
        }
        if self.rolling_window == 0 {
            return Err(ConfigError::InvalidValue(
                "AUTOMATION_ROLLING_WINDOW".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `domain` is always routed to the multi-agent pipeline.
    pub fn is_pipeline_domain(&self, domain: Domain) -> bool {
        self.pipeline_domains.contains(&domain)
    }
}

/// Process configuration for the `automate` binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenRouter API key
    pub api_key: String,

    /// LLM model identifier (OpenRouter format)
    pub default_model: String,

    /// Endpoint override for the HTTP backend
    pub api_endpoint: Option<String>,

    /// Where the statistics store is persisted, if anywhere
    pub stats_path: Option<PathBuf>,

    /// Replacement keyword rules for the classifier
    pub classifier_rules_path: Option<PathBuf>,

    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENROUTER_API_KEY` is not set,
    /// and `ConfigError::InvalidValue` for unparseable tunables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        let default_model =
            std::env::var("DEFAULT_MODEL").unwrap_or_else(|_| "openai/gpt-4.1-mini".to_string());

        let api_endpoint = std::env::var("OPENROUTER_API_URL").ok();
        let stats_path = std::env::var("AUTOMATION_STATS_PATH").ok().map(PathBuf::from);
        let classifier_rules_path = std::env::var("AUTOMATION_CLASSIFIER_RULES")
            .ok()
            .map(PathBuf::from);

        Ok(Self {
            api_key,
            default_model,
            api_endpoint,
            stats_path,
            classifier_rules_path,
            engine: EngineConfig::from_env()?,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, default_model: String) -> Self {
        Self {
            api_key,
            default_model,
            api_endpoint: None,
            stats_path: None,
            classifier_rules_path: None,
            engine: EngineConfig::default(),
        }
    }
}
