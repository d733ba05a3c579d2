//! Shared test helpers: a scripted provider and a few stub tools.

use agentloop_core::conversation::ContentBlock;
use agentloop_core::error::{ProviderError, ToolError};
use agentloop_core::provider::{ModelRequest, ModelResponse, Provider, StopReason, Usage};
use agentloop_core::tool::{Tool, ToolInvocation};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Mutex;

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue and keeps
/// a copy of the request. Panics if more calls are made than responses
/// provided.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<Result<ModelResponse, ProviderError>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self::scripted(responses.into_iter().map(Ok).collect())
    }

    pub fn scripted(responses: Vec<Result<ModelResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let responses = self.responses.lock().unwrap();
        let call = requests.len();

        if call >= responses.len() {
            panic!(
                "SequentialMockProvider: no more responses (call #{}, have {})",
                call,
                responses.len()
            );
        }

        requests.push(request);
        responses[call].clone()
    }
}

fn response(stop_reason: StopReason, content: Vec<ContentBlock>) -> ModelResponse {
    ModelResponse {
        stop_reason,
        content,
        usage: Usage {
            input_tokens: 10,
            output_tokens: 5,
        },
        model: "mock-model".into(),
    }
}

/// A text-only response that ends the turn.
pub fn end_turn(text: &str) -> ModelResponse {
    response(StopReason::EndTurn, vec![ContentBlock::text(text)])
}

/// A response requesting the given `(id, name, input)` tool uses.
pub fn tool_use(calls: Vec<(&str, &str, Value)>) -> ModelResponse {
    with_stop(StopReason::ToolUse, None, calls)
}

/// A response with optional leading text and the given tool uses.
pub fn with_stop(
    stop_reason: StopReason,
    text: Option<&str>,
    calls: Vec<(&str, &str, Value)>,
) -> ModelResponse {
    let mut content: Vec<ContentBlock> = text.map(ContentBlock::text).into_iter().collect();
    content.extend(calls.into_iter().map(|(id, name, input)| ContentBlock::ToolUse {
        id: id.into(),
        name: name.into(),
        input,
    }));
    response(stop_reason, content)
}

pub fn invocation(id: &str, name: &str, input: Value) -> ToolInvocation {
    ToolInvocation {
        id: id.into(),
        name: name.into(),
        input,
    }
}

/// Echoes its own name and input.
pub struct LookupTool {
    name: String,
}

impl LookupTool {
    pub fn new(name: &str) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Tool for LookupTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Looks things up"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        Ok(json!({"tool": self.name, "input": input}))
    }
}

pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _input: Value) -> Result<Value, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "failing".into(),
            reason: "upstream returned 500".into(),
        })
    }
}

pub struct PanickingTool;

#[async_trait]
impl Tool for PanickingTool {
    fn name(&self) -> &str {
        "panicking"
    }
    fn description(&self) -> &str {
        "Panics"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _input: Value) -> Result<Value, ToolError> {
        panic!("tool blew up");
    }
}
