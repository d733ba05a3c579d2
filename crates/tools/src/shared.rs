//! Shared tool: one execution answers every invocation in a turn.
//!
//! Some backends expose a single endpoint that returns everything at once
//! (today's calendar, the unread inbox). When the model asks for such a tool
//! several times in one turn, running it once and handing the same output to
//! each invocation identifier saves round trips and keeps the answers
//! consistent.

use agentloop_core::error::ToolError;
use agentloop_core::tool::{BatchResults, Tool, ToolInvocation};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Wraps a tool so that a batch runs it once and fans the result out.
pub struct SharedTool {
    inner: Arc<dyn Tool>,
}

impl SharedTool {
    pub fn new(inner: Arc<dyn Tool>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Tool for SharedTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn input_schema(&self) -> serde_json::Value {
        self.inner.input_schema()
    }

    async fn execute(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        self.inner.execute(input).await
    }

    /// Runs the wrapped tool with the first invocation's input.
    async fn execute_batch(&self, invocations: Vec<ToolInvocation>) -> BatchResults {
        let Some(first) = invocations.first() else {
            return BatchResults::new();
        };

        debug!(
            tool = %self.name(),
            invocations = invocations.len(),
            "Running shared tool once for the whole batch"
        );
        let result = self.inner.execute(first.input.clone()).await;

        invocations
            .into_iter()
            .map(|invocation| (invocation.id, result.clone()))
            .collect()
    }
}
