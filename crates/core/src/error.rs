//! Error types for the agentloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; `Error` wraps them all.

use thiserror::Error;

/// The top-level error type for all agentloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Agent loop errors ---
    #[error("Agent loop error: {0}")]
    Loop(#[from] LoopError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool crashed: {tool_name}: {reason}")]
    Crashed { tool_name: String, reason: String },

    #[error("Tool produced no result: {tool_name} (invocation {invocation_id})")]
    MissingResult {
        tool_name: String,
        invocation_id: String,
    },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

impl ToolError {
    /// Short machine-readable kind, sent to the model next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::Crashed { .. } => "crashed",
            Self::MissingResult { .. } => "missing_result",
            Self::InvalidArguments(_) => "invalid_arguments",
        }
    }
}

/// Failures that stop an agent loop execution outright.
#[derive(Debug, Clone, Error)]
pub enum LoopError {
    /// A tool invocation was left without exactly one matching result.
    #[error("Protocol desync: {0}")]
    ProtocolDesync(String),

    /// The model call itself failed.
    #[error("Model call failed on iteration {iteration}: {source}")]
    Provider {
        iteration: u32,
        #[source]
        source: ProviderError,
    },
}
