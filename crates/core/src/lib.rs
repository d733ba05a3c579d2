//! # agentloop core
//!
//! Domain types, traits, and error definitions for the agentloop tool-use
//! runtime. This crate defines the domain model (turns, tool invocations,
//! the model and tool boundaries) that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every boundary is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping the model backend or tool executors via configuration
//! - Easy testing with scripted providers and stub tools
//! - Clean dependency graph (all crates depend inward on core)

pub mod conversation;
pub mod error;
pub mod event;
pub mod normalize;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use conversation::{ContentBlock, Conversation, ConversationId, Role, Turn};
pub use error::{Error, LoopError, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use normalize::normalize;
pub use provider::{ModelRequest, ModelResponse, Provider, StopReason, ToolDefinition, Usage};
pub use tool::{CompletionTool, Tool, ToolInvocation, ToolOutcome, ToolRegistry, ToolResult};
