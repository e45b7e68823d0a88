//! Error types for the autoresponder engine.

use std::time::Duration;

use uuid::Uuid;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Rule store errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A write collided with an existing (owner, name) pair.
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),
}

/// Text-generation provider errors.
///
/// The engine treats every variant the same way (template fallback); the
/// distinctions only matter for logs.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout {
        provider: String,
        timeout: Duration,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} rate limited")]
    RateLimited { provider: String },
}

/// Errors surfaced by the engine API.
///
/// Not-found, validation and conflict are kept apart so callers can tell a
/// stale reference from bad input.
#[derive(Debug, thiserror::Error)]
pub enum AutoresponderError {
    #[error("Rule {id} not found")]
    NotFound { id: Uuid },

    #[error("Invalid rule: {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Rule conflict: {0}")]
    Conflict(String),

    #[error("Rule store error: {0}")]
    Store(#[from] DatabaseError),
}

impl AutoresponderError {
    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
