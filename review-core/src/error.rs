//! Error taxonomy for the contract review engine.

use thiserror::Error;

/// Result type alias using the engine's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during review-graph operations.
///
/// Most variants are recovered locally by the caller (LLM failure falls back
/// to a default plan / regex-only extraction / deterministic skill loop); the
/// type exists so call sites can log the reason before degrading.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing handler path, remote skill without a client, unregistered
    /// skill id. Raised at registration time or first use.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unreadable document or empty text on the upload path.
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// LLM timeout, schema violation, or unparseable JSON.
    #[error("LLM failure: {0}")]
    LlmFailure(String),

    /// An exception-equivalent raised from inside a skill handler.
    #[error("tool failure in skill {skill_id}: {message}")]
    ToolFailure { skill_id: String, message: String },

    /// Invalid analysis_depth, unknown clause_id in an adjustment, or similar
    /// state-invariant violation. Normalized or silently ignored by callers.
    #[error("route/state invariant violation: {0}")]
    RouteInvariant(String),

    /// `resume` was called without a matching pending interrupt state.
    #[error("interrupt state mismatch: {0}")]
    InterruptMismatch(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Regex compilation error, e.g. an LLM-proposed cross-reference pattern
    /// or clause pattern that failed to compile.
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Transport-level error talking to an LLM or embedding provider.
    #[error("transport error: {0}")]
    Transport(String),

    /// Internal error that should not normally occur.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn parse_failure(message: impl Into<String>) -> Self {
        Self::ParseFailure(message.into())
    }

    pub fn llm_failure(message: impl Into<String>) -> Self {
        Self::LlmFailure(message.into())
    }

    pub fn tool_failure(skill_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailure {
            skill_id: skill_id.into(),
            message: message.into(),
        }
    }

    pub fn route_invariant(message: impl Into<String>) -> Self {
        Self::RouteInvariant(message.into())
    }

    pub fn interrupt_mismatch(message: impl Into<String>) -> Self {
        Self::InterruptMismatch(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
