//! LLM integration.
//!
//! Uses the rig-core crate for HTTP transport to Anthropic and the
//! `RigAdapter` to bridge rig's `CompletionModel` trait to our `LlmProvider`
//! trait, so tests can substitute stubs.

pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::LlmError;

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
}

/// Create an Anthropic provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {e}"),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model)))
}
