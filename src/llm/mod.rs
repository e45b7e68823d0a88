//! Text-generation providers for AI-generated autoresponses.
//!
//! Supports:
//! - **Anthropic**: Direct API access via rig-core
//! - **OpenAI**: Direct API access via rig-core
//!
//! The `RigAdapter` bridges rig's `CompletionModel` trait to our `LlmProvider`
//! trait, which is all the response generator depends on.

pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::{ConfigError, LlmError};

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

impl LlmConfig {
    /// Read provider settings from the environment.
    ///
    /// Returns `Ok(None)` when no API key is set; AI-generated rules then
    /// always answer with the fallback template.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    /// Anthropic wins when both keys are present; blank values count as unset.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let model = var("AUTORESPONDER_MODEL");

        let selected = [
            ("ANTHROPIC_API_KEY", LlmBackend::Anthropic, DEFAULT_ANTHROPIC_MODEL),
            ("OPENAI_API_KEY", LlmBackend::OpenAi, DEFAULT_OPENAI_MODEL),
        ]
        .into_iter()
        .find_map(|(key_var, backend, default_model)| {
            var(key_var).map(|key| (backend, key, default_model))
        });

        match (selected, model) {
            (Some((backend, key, default_model)), model) => Ok(Some(Self {
                backend,
                api_key: secrecy::SecretString::from(key),
                model: model.unwrap_or_else(|| default_model.to_string()),
            })),
            (None, Some(model)) => Err(ConfigError::MissingEnvVar(format!(
                "ANTHROPIC_API_KEY or OPENAI_API_KEY (AUTORESPONDER_MODEL={model} is set)"
            ))),
            (None, None) => Ok(None),
        }
    }
}

/// Build the provider selected by `config`. Keys are not checked until the
/// first request.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => anthropic_provider(config),
        LlmBackend::OpenAi => openai_provider(config),
    }
}

fn client_error(provider: &str, e: impl std::fmt::Display) -> LlmError {
    LlmError::RequestFailed {
        provider: provider.to_string(),
        reason: format!("client setup failed: {e}"),
    }
}

fn anthropic_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret())
            .map_err(|e| client_error("anthropic", e))?;

    tracing::info!(model = %config.model, "Autoresponse generation via Anthropic");
    Ok(Arc::new(RigAdapter::new(
        client.completion_model(&config.model),
        &config.model,
    )))
}

fn openai_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret())
            .map_err(|e| client_error("openai", e))?;

    tracing::info!(model = %config.model, "Autoresponse generation via OpenAI");
    Ok(Arc::new(RigAdapter::new(
        client.completion_model(&config.model),
        &config.model,
    )))
}
