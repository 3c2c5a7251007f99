//! Runtime configuration
//!
//! Everything is read from the environment (optionally seeded from `.env`).
//! `OrchestrationPolicy` carries the bounds and policy constants the
//! Router, Worker Loop and Orchestrator enforce.

use crate::error::OrchestrationError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Hard ceiling for `max_iterations`, whatever the caller asks for.
pub const MAX_ITERATIONS_CEILING: u32 = 50;

/// Bounds and policy constants for one orchestration run.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestrationPolicy {
    /// Distinct specialists that must complete a step before synthesis.
    pub min_specialists: usize,
    /// Default outer bound when a task does not set one.
    pub default_max_iterations: u32,
    /// Inner bound on reasoning/tool cycles per worker invocation.
    pub max_tool_rounds: u32,
    /// Empty completions tolerated before a worker gives up.
    pub max_empty_retries: u32,
    /// Failed attempts after which a specialist is no longer routed to
    /// by the diversity rule.
    pub max_attempts_per_specialist: usize,
    /// Prior step summaries handed to each worker.
    pub summary_window: usize,
    pub llm_timeout: Duration,
    pub tool_timeout: Duration,
    pub run_timeout: Duration,
    /// Bounded event queue per subscriber.
    pub event_buffer: usize,
    /// Emit `tool_call` sub-events.
    pub stream_tool_calls: bool,
}

impl Default for OrchestrationPolicy {
    fn default() -> Self {
        Self {
            min_specialists: 3,
            default_max_iterations: 15,
            max_tool_rounds: 3,
            max_empty_retries: 2,
            max_attempts_per_specialist: 2,
            summary_window: 6,
            llm_timeout: Duration::from_secs(50),
            tool_timeout: Duration::from_secs(30),
            run_timeout: Duration::from_secs(600),
            event_buffer: 64,
            stream_tool_calls: false,
        }
    }
}

impl OrchestrationPolicy {
    /// Reject combinations that would break the termination guarantees.
    pub fn validate(&self) -> Result<()> {
        if self.max_tool_rounds == 0 {
            return Err(OrchestrationError::ConfigError(
                "max_tool_rounds must be at least 1".to_string(),
            ));
        }
        if self.default_max_iterations == 0 || self.default_max_iterations > MAX_ITERATIONS_CEILING {
            return Err(OrchestrationError::ConfigError(format!(
                "default_max_iterations must be within 1..={}",
                MAX_ITERATIONS_CEILING
            )));
        }
        if self.event_buffer == 0 {
            return Err(OrchestrationError::ConfigError(
                "event_buffer must be at least 1".to_string(),
            ));
        }
        if self.llm_timeout >= self.run_timeout || self.tool_timeout >= self.run_timeout {
            return Err(OrchestrationError::ConfigError(
                "per-call timeouts must be shorter than the run timeout".to_string(),
            ));
        }
        Ok(())
    }
}

/// Process-wide settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub llm_provider: String,
    pub llm_model: Option<String>,
    pub groq_api_key: String,
    pub together_api_key: String,
    pub fireworks_api_key: String,
    pub openrouter_api_key: String,
    pub financial_api_base_url: Option<String>,
    pub database_url: Option<String>,
    pub api_port: u16,
    pub policy: OrchestrationPolicy,
}

impl Settings {
    /// Load `.env` (if present) and read settings from the environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = OrchestrationPolicy::default();
        let policy = OrchestrationPolicy {
            min_specialists: parse_var("MIN_SPECIALISTS", defaults.min_specialists)?,
            default_max_iterations: parse_var("MAX_AGENT_ITERATIONS", defaults.default_max_iterations)?,
            max_tool_rounds: parse_var("MAX_TOOL_ROUNDS", defaults.max_tool_rounds)?,
            max_empty_retries: defaults.max_empty_retries,
            max_attempts_per_specialist: defaults.max_attempts_per_specialist,
            summary_window: parse_var("SUMMARY_WINDOW", defaults.summary_window)?,
            llm_timeout: Duration::from_secs(parse_var("LLM_TIMEOUT_SECS", defaults.llm_timeout.as_secs())?),
            tool_timeout: Duration::from_secs(parse_var("TOOL_TIMEOUT_SECS", defaults.tool_timeout.as_secs())?),
            run_timeout: Duration::from_secs(parse_var("RUN_TIMEOUT_SECS", defaults.run_timeout.as_secs())?),
            event_buffer: parse_var("EVENT_BUFFER", defaults.event_buffer)?,
            stream_tool_calls: parse_var("STREAM_TOOL_CALLS", defaults.stream_tool_calls)?,
        };
        policy.validate()?;

        let api_port = match env::var("PORT").or_else(|_| env::var("API_PORT")) {
            Ok(raw) => raw.parse().map_err(|_| {
                OrchestrationError::ConfigError(format!("invalid port: {}", raw))
            })?,
            Err(_) => 8080,
        };

        Ok(Self {
            llm_provider: env::var("LLM_PROVIDER").unwrap_or_else(|_| "groq".to_string()),
            llm_model: non_empty_var("LLM_MODEL"),
            groq_api_key: env::var("GROQ_API_KEY").unwrap_or_default(),
            together_api_key: env::var("TOGETHER_API_KEY").unwrap_or_default(),
            fireworks_api_key: env::var("FIREWORKS_API_KEY").unwrap_or_default(),
            openrouter_api_key: env::var("OPENROUTER_API_KEY").unwrap_or_default(),
            financial_api_base_url: non_empty_var("FINANCIAL_API_BASE_URL")
                .or_else(|| non_empty_var("TOOLS_API_BASE_URL")),
            database_url: non_empty_var("DATABASE_URL"),
            api_port,
            policy,
        })
    }

    /// API key for a provider key name such as `groq`.
    pub fn api_key_for(&self, provider: &str) -> Option<&str> {
        let key = match provider {
            "groq" => &self.groq_api_key,
            "together" => &self.together_api_key,
            "fireworks" => &self.fireworks_api_key,
            "openrouter" => &self.openrouter_api_key,
            _ => return None,
        };
        if key.is_empty() {
            None
        } else {
            Some(key.as_str())
        }
    }

    /// Which providers have credentials, for the health endpoint.
    pub fn configured_providers(&self) -> Vec<(&'static str, bool)> {
        ["groq", "together", "fireworks", "openrouter"]
            .into_iter()
            .map(|name| (name, self.api_key_for(name).is_some()))
            .collect()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| {
            OrchestrationError::ConfigError(format!("{} has an invalid value: {}", name, raw))
        }),
        _ => Ok(default),
    }
}
