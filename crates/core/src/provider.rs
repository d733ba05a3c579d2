//! Provider trait: the abstraction over the chat-completion backend.
//!
//! A Provider takes the full conversation plus tool schemas and returns the
//! model's next assistant turn. The boundary is plain request/response; the
//! protocol is stateless, so every request carries the whole history.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::conversation::{ContentBlock, Turn};
use crate::error::ProviderError;

/// One model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The model to use (e.g., "claude-sonnet-4-20250514")
    pub model: String,

    /// Top-level system prompt
    pub system: String,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// The full ordered history
    pub messages: Vec<Turn>,

    /// Maximum tokens to generate
    pub max_tokens: u32,
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's input
    pub input_schema: serde_json::Value,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model expects tool results before continuing
    ToolUse,
    /// The model finished on its own
    EndTurn,
    /// Anything else the backend reports (max_tokens, stop_sequence, ...)
    #[serde(untagged)]
    Other(String),
}

impl StopReason {
    /// Map a raw backend stop reason string.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "tool_use" => Self::ToolUse,
            "end_turn" => Self::EndTurn,
            other => Self::Other(other.to_string()),
        }
    }
}

/// The model's reply to one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub stop_reason: StopReason,

    /// Ordered content blocks (text and tool_use)
    pub content: Vec<ContentBlock>,

    /// Token usage statistics
    #[serde(default)]
    pub usage: Usage,

    /// Which model actually responded
    pub model: String,
}

/// Token usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

/// The core Provider trait.
///
/// The agent loop calls `complete()` without knowing which backend answers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get the complete response.
    async fn complete(&self, request: ModelRequest) -> std::result::Result<ModelResponse, ProviderError>;
}
