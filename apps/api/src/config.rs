use std::time::Duration;

use anyhow::{Context, Result};

use crate::llm_client::{LlmSettings, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::pipeline::orchestrator::PipelineSettings;

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub completion_api_key: String,
    pub completion_base_url: String,
    pub completion_model: String,
    pub completion_timeout_secs: u64,
    pub completion_max_retries: u32,
    pub discovery_max_tokens: u32,
    pub summary_max_tokens: u32,
    pub filter_max_tokens: u32,
    /// Results live in memory only when unset.
    pub redis_url: Option<String>,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            completion_api_key: require_env("PERPLEXITY_API_KEY")?,
            completion_base_url: env_or("COMPLETION_BASE_URL", DEFAULT_BASE_URL),
            completion_model: env_or("COMPLETION_MODEL", DEFAULT_MODEL),
            completion_timeout_secs: parse_env("COMPLETION_TIMEOUT_SECS", 90)?,
            completion_max_retries: parse_env("COMPLETION_MAX_RETRIES", 2)?,
            discovery_max_tokens: parse_env("DISCOVERY_MAX_TOKENS", 500)?,
            summary_max_tokens: parse_env("SUMMARY_MAX_TOKENS", 500)?,
            filter_max_tokens: parse_env("FILTER_MAX_TOKENS", 500)?,
            redis_url: std::env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty()),
            port: parse_env("PORT", 8080).context("PORT must be a valid port number")?,
            rust_log: env_or("RUST_LOG", "info"),
        })
    }

    pub fn llm_settings(&self) -> LlmSettings {
        LlmSettings {
            api_key: self.completion_api_key.clone(),
            base_url: self.completion_base_url.clone(),
            model: self.completion_model.clone(),
            timeout: Duration::from_secs(self.completion_timeout_secs),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            discovery_max_tokens: self.discovery_max_tokens,
            summary_max_tokens: self.summary_max_tokens,
            filter_max_tokens: self.filter_max_tokens,
            call_timeout: Duration::from_secs(self.completion_timeout_secs),
            max_retries: self.completion_max_retries,
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value '{value}'")),
        Err(_) => Ok(default),
    }
}
