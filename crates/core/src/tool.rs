//! Tool trait: the abstraction over external capabilities.
//!
//! Tools are what give the agent the ability to act in the world: read a
//! calendar, search documentation, post a message. The loop never knows what a
//! tool does; it only knows the name, the schema, and how to call it.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use crate::conversation::ContentBlock;
use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// A model-issued request to run one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Unique within its turn (matches the model's `tool_use.id`)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Input as a JSON value, already normalized
    pub input: serde_json::Value,
}

/// What a tool execution produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success(serde_json::Value),
    Failure { kind: String, message: String },
}

/// The result of one invocation, ready to be sent back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The invocation this result answers
    pub invocation_id: String,

    /// Kept for diagnostics only
    pub tool_name: String,

    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(invocation: &ToolInvocation, value: serde_json::Value) -> Self {
        Self {
            invocation_id: invocation.id.clone(),
            tool_name: invocation.name.clone(),
            outcome: ToolOutcome::Success(value),
        }
    }

    pub fn failure(invocation: &ToolInvocation, error: &ToolError) -> Self {
        Self {
            invocation_id: invocation.id.clone(),
            tool_name: invocation.name.clone(),
            outcome: ToolOutcome::Failure {
                kind: error.kind().to_string(),
                message: error.to_string(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Failure { .. })
    }

    /// The JSON payload the model receives.
    ///
    /// Failures are encoded as `{"error": ..., "kind": ...}` so the model can
    /// read what went wrong and decide how to proceed.
    pub fn payload(&self) -> serde_json::Value {
        match &self.outcome {
            ToolOutcome::Success(value) => value.clone(),
            ToolOutcome::Failure { kind, message } => serde_json::json!({
                "error": message,
                "kind": kind,
            }),
        }
    }

    /// Convert into a `tool_result` content block.
    pub fn to_block(&self) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: self.invocation_id.clone(),
            content: self.payload().to_string(),
            is_error: self.is_error(),
        }
    }
}

/// Results of a batch, keyed by invocation identifier.
pub type BatchResults = HashMap<String, std::result::Result<serde_json::Value, ToolError>>;

/// The core Tool trait.
///
/// Each external capability (calendar, mail, chat, document search/fetch/
/// create/update) implements this trait. Tools are registered in the
/// ToolRegistry and made available to the agent loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "notion-search").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given input.
    async fn execute(&self, input: serde_json::Value) -> std::result::Result<serde_json::Value, ToolError>;

    /// Execute every invocation of this tool from one turn.
    ///
    /// The default runs each invocation concurrently through `execute`. A
    /// panic in one invocation becomes a `Crashed` result for that invocation
    /// only. Tools backed by a single batch call override this and answer each
    /// invocation identifier from the one upstream response.
    async fn execute_batch(&self, invocations: Vec<ToolInvocation>) -> BatchResults {
        let pending = invocations.into_iter().map(|invocation| async move {
            let result = AssertUnwindSafe(self.execute(invocation.input))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(ToolError::Crashed {
                        tool_name: self.name().to_string(),
                        reason: panic_message(panic.as_ref()),
                    })
                });
            (invocation.id, result)
        });
        futures::future::join_all(pending).await.into_iter().collect()
    }

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

/// The reserved tool a model calls to hand over its final answer.
///
/// It is described to the model like any other tool but never executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionTool {
    pub name: String,
    pub description: String,

    /// Input field that carries the final answer text
    pub answer_field: String,

    /// Schema description of the answer field
    #[serde(default = "default_answer_description")]
    pub answer_description: String,
}

fn default_answer_description() -> String {
    "The complete final answer".into()
}

impl CompletionTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        answer_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            answer_field: answer_field.into(),
            answer_description: default_answer_description(),
        }
    }

    pub fn with_answer_description(mut self, description: impl Into<String>) -> Self {
        self.answer_description = description.into();
        self
    }

    pub fn to_definition(&self) -> ToolDefinition {
        let mut properties = serde_json::Map::new();
        properties.insert(
            self.answer_field.clone(),
            serde_json::json!({
                "type": "string",
                "description": self.answer_description,
            }),
        );
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": [self.answer_field],
            }),
        }
    }

    /// Read the answer out of a completion invocation's input.
    pub fn answer(&self, input: &serde_json::Value) -> Option<String> {
        match input.get(&self.answer_field)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// A registry of available tools.
///
/// The agent loop uses this to:
/// 1. Get tool definitions to send to the LLM
/// 2. Look up and execute tools when the LLM requests them
/// 3. Recognise the completion tool
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
    completion: Option<CompletionTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            completion: None,
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    /// Declare the completion tool.
    pub fn with_completion(mut self, completion: CompletionTool) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn completion(&self) -> Option<&CompletionTool> {
        self.completion.as_ref()
    }

    pub fn is_completion(&self, name: &str) -> bool {
        self.completion.as_ref().is_some_and(|c| c.name == name)
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All tool definitions in registration order, completion tool last.
    pub fn describe(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.to_definition())
            .chain(self.completion.iter().map(CompletionTool::to_definition))
            .collect()
    }

    /// Execute a single tool by name.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(input).await
    }

    /// List all registered tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
