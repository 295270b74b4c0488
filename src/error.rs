//! Error types for the triage core.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors from the Slack Web API (identity source).
#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("Slack client not configured")]
    NotConfigured,

    #[error("HTTP error calling {method}: {reason}")]
    Http { method: String, reason: String },

    #[error("Slack API {method} returned error: {code}")]
    Api { method: String, code: String },

    #[error("Slack API {method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("Invalid response from {method}: {reason}")]
    InvalidResponse { method: String, reason: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Bot identity initialization failed after {attempts} attempts: {reason}")]
    BotIdentity { attempts: u32, reason: String },
}

/// Draft generation errors. These are the only failures the core surfaces
/// to its callers.
#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("Text generation service not configured")]
    NotConfigured,

    #[error("Generation failed: {0}")]
    Generation(#[from] LlmError),
}
