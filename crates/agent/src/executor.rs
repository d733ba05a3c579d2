//! Concurrent execution of one turn's tool invocations.

use agentloop_core::error::{LoopError, ToolError};
use agentloop_core::event::{DomainEvent, EventBus};
use agentloop_core::normalize;
use agentloop_core::tool::{BatchResults, ToolInvocation, ToolRegistry, ToolResult};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Runs the pending invocations of one turn against the registry.
///
/// Invocations are grouped by tool name and each group runs as its own tokio
/// task through [`Tool::execute_batch`](agentloop_core::Tool::execute_batch),
/// so a tool that answers many invocations with one upstream call can do so.
/// The task boundary catches panics that escape a batch override; the default
/// batch already confines a panic to the invocation that raised it.
/// All groups are joined before returning. Every invocation gets exactly one
/// result, in invocation order.
pub struct ToolCallExecutor {
    registry: Arc<ToolRegistry>,
    event_bus: Arc<EventBus>,
}

struct GroupOutcome {
    name: String,
    results: Result<BatchResults, ToolError>,
    duration_ms: u64,
}

impl ToolCallExecutor {
    pub fn new(registry: Arc<ToolRegistry>, event_bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            event_bus,
        }
    }

    /// Execute every invocation and return one result per invocation.
    ///
    /// Fails only on a protocol error: two invocations sharing an identifier.
    pub async fn execute(
        &self,
        invocations: Vec<ToolInvocation>,
    ) -> Result<Vec<ToolResult>, LoopError> {
        let mut seen = HashSet::new();
        if let Some(dup) = invocations.iter().find(|inv| !seen.insert(inv.id.as_str())) {
            return Err(LoopError::ProtocolDesync(format!(
                "duplicate tool invocation id '{}'",
                dup.id
            )));
        }

        let invocations: Vec<ToolInvocation> = invocations
            .into_iter()
            .map(|mut inv| {
                inv.input = normalize(inv.input);
                inv
            })
            .collect();

        let mut groups: Vec<(String, Vec<ToolInvocation>)> = Vec::new();
        for inv in &invocations {
            match groups.iter_mut().find(|(name, _)| *name == inv.name) {
                Some((_, batch)) => batch.push(inv.clone()),
                None => groups.push((inv.name.clone(), vec![inv.clone()])),
            }
        }

        debug!(
            invocations = invocations.len(),
            groups = groups.len(),
            "Dispatching tool invocations"
        );

        let pending = groups
            .into_iter()
            .map(|(name, batch)| self.run_group(name, batch));
        let mut outcomes: HashMap<String, GroupOutcome> = futures::future::join_all(pending)
            .await
            .into_iter()
            .map(|outcome| (outcome.name.clone(), outcome))
            .collect();

        let mut results = Vec::with_capacity(invocations.len());
        for inv in &invocations {
            let (result, duration_ms) = match outcomes.get_mut(&inv.name) {
                Some(outcome) => (Self::result_for(inv, &mut outcome.results), outcome.duration_ms),
                None => (
                    ToolResult::failure(
                        inv,
                        &ToolError::MissingResult {
                            tool_name: inv.name.clone(),
                            invocation_id: inv.id.clone(),
                        },
                    ),
                    0,
                ),
            };

            if result.is_error() {
                warn!(tool = %inv.name, invocation_id = %inv.id, "Tool invocation failed");
            }

            self.event_bus.publish(DomainEvent::ToolExecuted {
                tool_name: inv.name.clone(),
                invocation_id: inv.id.clone(),
                success: !result.is_error(),
                duration_ms,
                timestamp: Utc::now(),
            });

            results.push(result);
        }

        Ok(results)
    }

    /// Run one tool's invocations in a task of its own.
    async fn run_group(&self, name: String, batch: Vec<ToolInvocation>) -> GroupOutcome {
        let started = Instant::now();
        let results = match self.registry.get(&name) {
            None => Err(ToolError::NotFound(name.clone())),
            Some(tool) => {
                debug!(tool = %name, invocations = batch.len(), "Executing tool");
                tokio::spawn(async move { tool.execute_batch(batch).await })
                    .await
                    .map_err(|e| ToolError::Crashed {
                        tool_name: name.clone(),
                        reason: e.to_string(),
                    })
            }
        };

        GroupOutcome {
            name,
            results,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn result_for(
        inv: &ToolInvocation,
        group: &mut Result<BatchResults, ToolError>,
    ) -> ToolResult {
        match group {
            Err(e) => ToolResult::failure(inv, e),
            Ok(batch) => match batch.remove(&inv.id) {
                Some(Ok(value)) => ToolResult::success(inv, normalize(value)),
                Some(Err(e)) => ToolResult::failure(inv, &e),
                None => ToolResult::failure(
                    inv,
                    &ToolError::MissingResult {
                        tool_name: inv.name.clone(),
                        invocation_id: inv.id.clone(),
                    },
                ),
            },
        }
    }
}
