//! Configuration types.
//!
//! Everything is read from the environment once at startup. Missing
//! generation-service credentials are not an error: the core runs in
//! degraded mode (rule-based classification, no drafts).

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default Anthropic model for classification and drafting.
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

/// Timeouts applied to every external call made by the core.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// `users.info` / `conversations.info` / `auth.test`.
    pub identity_lookup: Duration,
    /// Classification and draft completions.
    pub generation: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            identity_lookup: Duration::from_secs(5),
            generation: Duration::from_secs(20),
        }
    }
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP port for the Slack events endpoint and the REST API.
    pub port: u16,
    /// libSQL database file.
    pub db_path: PathBuf,
    /// Slack bot token (`xoxb-…`). Without it no identities can be resolved.
    pub slack_bot_token: Option<SecretString>,
    /// Anthropic API key. `None` means degraded mode.
    pub anthropic_api_key: Option<SecretString>,
    /// Model used for both classification and drafting.
    pub model: String,
    pub timeouts: Timeouts,
    /// How many times `auth.test` is attempted before ingestion starts anyway.
    pub bot_init_attempts: u32,
    /// Directory for rolling log files. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            db_path: PathBuf::from("./data/triage.db"),
            slack_bot_token: None,
            anthropic_api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeouts: Timeouts::default(),
            bot_init_attempts: 3,
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// Build configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match non_empty("TRIAGE_PORT").or_else(|| non_empty("PORT")) {
            Some(v) => parse_value("TRIAGE_PORT", &v)?,
            None => defaults.port,
        };

        let identity_secs: u64 = match non_empty("TRIAGE_IDENTITY_TIMEOUT_SECS") {
            Some(v) => parse_value("TRIAGE_IDENTITY_TIMEOUT_SECS", &v)?,
            None => defaults.timeouts.identity_lookup.as_secs(),
        };
        let generation_secs: u64 = match non_empty("TRIAGE_GENERATION_TIMEOUT_SECS") {
            Some(v) => parse_value("TRIAGE_GENERATION_TIMEOUT_SECS", &v)?,
            None => defaults.timeouts.generation.as_secs(),
        };

        let bot_init_attempts = match non_empty("TRIAGE_BOT_INIT_ATTEMPTS") {
            Some(v) => parse_value("TRIAGE_BOT_INIT_ATTEMPTS", &v)?,
            None => defaults.bot_init_attempts,
        };

        Ok(Self {
            port,
            db_path: non_empty("TRIAGE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            slack_bot_token: non_empty("SLACK_BOT_TOKEN").map(SecretString::from),
            anthropic_api_key: non_empty("ANTHROPIC_API_KEY").map(SecretString::from),
            model: non_empty("TRIAGE_MODEL").unwrap_or(defaults.model),
            timeouts: Timeouts {
                identity_lookup: Duration::from_secs(identity_secs),
                generation: Duration::from_secs(generation_secs),
            },
            bot_init_attempts: bot_init_attempts.max(1),
            log_dir: non_empty("TRIAGE_LOG_DIR").map(PathBuf::from),
        })
    }

    /// Whether the text-generation service has credentials.
    pub fn llm_enabled(&self) -> bool {
        self.anthropic_api_key.is_some()
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
