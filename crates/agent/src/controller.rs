//! The agent loop state machine.
//!
//! `INIT -> AWAITING_MODEL -> {EXECUTING_TOOLS -> AWAITING_MODEL} | EXITED`
//!
//! Each turn sends the full history to the model, reads the stop reason and
//! content blocks, and either runs the requested tools and goes around again,
//! or exits with an [`ExitRecord`].

use crate::executor::ToolCallExecutor;
use crate::state::{Bound, LoopLimits, LoopState, TurnInput};
use agentloop_config::{AppConfig, ProfileConfig};
use agentloop_core::conversation::{ContentBlock, Conversation, Role, Turn};
use agentloop_core::error::LoopError;
use agentloop_core::event::{DomainEvent, EventBus};
use agentloop_core::normalize;
use agentloop_core::provider::{ModelRequest, Provider, StopReason, Usage};
use agentloop_core::tool::{ToolInvocation, ToolRegistry, ToolResult};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Why a loop execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExitReason {
    /// The model called the completion tool
    #[serde(rename = "completion-signal")]
    CompletionSignal,
    /// The model finished on its own
    #[serde(rename = "end_turn")]
    EndTurn,
    /// The model stopped without asking for tools and without finishing
    #[serde(rename = "no_tool_calls")]
    NoToolCalls,
    #[serde(rename = "max_iterations_reached")]
    MaxIterationsReached,
    #[serde(rename = "timeout")]
    Timeout,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CompletionSignal => "completion-signal",
            Self::EndTurn => "end_turn",
            Self::NoToolCalls => "no_tool_calls",
            Self::MaxIterationsReached => "max_iterations_reached",
            Self::Timeout => "timeout",
        }
    }

    /// Whether a safety bound ended the loop (rather than the model).
    pub fn is_bound(&self) -> bool {
        matches!(self, Self::MaxIterationsReached | Self::Timeout)
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The terminal outcome of one loop execution.
#[derive(Debug, Clone)]
pub struct ExitRecord {
    pub reason: ExitReason,

    /// The answer chosen by the exit policy, if the model produced one
    pub final_text: Option<String>,

    /// Concatenated text blocks of the last model response; on a bound exit,
    /// of the response before the bound tripped
    pub text_content: String,

    /// Token usage summed over all model calls
    pub usage: Usage,

    /// Model calls made
    pub iterations: u32,

    pub elapsed: Duration,

    /// Invocations issued next to the completion tool and never executed
    pub discarded_invocations: usize,
}

/// A finished execution: the exit record plus the full history.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub record: ExitRecord,
    pub conversation: Conversation,
}

/// What a turn hands back to the loop.
enum Step {
    Continue {
        state: LoopState,
        tool_results: Vec<ToolResult>,
    },
    Exited(ExitRecord),
}

/// The core agent loop that orchestrates model calls and tool execution.
pub struct AgentLoop {
    /// The model provider to use
    provider: Arc<dyn Provider>,

    /// The model to use
    model: String,

    /// Max output tokens per model response
    max_tokens: u32,

    /// Tool registry, including the completion tool declaration
    tools: Arc<ToolRegistry>,

    system_prompt: String,

    limits: LoopLimits,

    executor: ToolCallExecutor,

    /// Event bus for domain events
    event_bus: Arc<EventBus>,
}

impl AgentLoop {
    /// Create a new agent loop.
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
        system_prompt: impl Into<String>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: 4096,
            executor: ToolCallExecutor::new(tools.clone(), event_bus.clone()),
            tools,
            system_prompt: system_prompt.into(),
            limits: LoopLimits::default(),
            event_bus,
        }
    }

    /// Create a loop configured by a profile.
    ///
    /// `date` fills the `{date}` placeholder of the system prompt.
    pub fn for_profile(
        provider: Arc<dyn Provider>,
        config: &AppConfig,
        profile: &ProfileConfig,
        tools: Arc<ToolRegistry>,
        date: &str,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let model = profile.model.as_deref().unwrap_or(&config.default_model);
        Self::new(
            provider,
            model,
            tools,
            profile.render_system_prompt(date),
            event_bus,
        )
        .with_max_iterations(profile.max_iterations)
        .with_timeout(profile.timeout())
        .with_max_tokens(profile.max_tokens.unwrap_or(config.default_max_tokens))
    }

    /// Set the maximum number of model calls.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.limits.max_iterations = max;
        self
    }

    /// Set the wall-clock budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.limits.timeout = timeout;
        self
    }

    /// Set the max output tokens per model response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }

    pub fn limits(&self) -> LoopLimits {
        self.limits
    }

    /// Run one loop execution for a task.
    ///
    /// Returns the exit record and the history on every controlled exit. A
    /// failed model call or a broken invocation/result pairing is returned as
    /// a [`LoopError`] and no further model call is made.
    pub async fn run(&self, task: impl Into<String>) -> Result<LoopOutcome, LoopError> {
        let mut conversation = Conversation::new(&self.system_prompt, self.tools.describe());
        let mut input = TurnInput::First { task: task.into() };

        loop {
            match self.turn(&mut conversation, input).await {
                Ok(Step::Continue {
                    state,
                    tool_results,
                }) => {
                    input = TurnInput::Continuation {
                        state,
                        tool_results,
                    };
                }
                Ok(Step::Exited(record)) => {
                    self.log_exit(&conversation, &record);
                    return Ok(LoopOutcome {
                        record,
                        conversation,
                    });
                }
                Err(e) => {
                    warn!(
                        conversation_id = %conversation.id,
                        turns = conversation.len(),
                        error = %e,
                        "Agent loop failed"
                    );
                    self.event_bus.publish(DomainEvent::ErrorOccurred {
                        context: format!("agent loop {}", conversation.id),
                        error_message: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    return Err(e);
                }
            }
        }
    }

    /// One pass through the state machine.
    async fn turn(
        &self,
        conversation: &mut Conversation,
        input: TurnInput,
    ) -> Result<Step, LoopError> {
        let mut state = match input {
            TurnInput::First { task } => {
                info!(
                    conversation_id = %conversation.id,
                    model = %self.model,
                    max_iterations = self.limits.max_iterations,
                    timeout_secs = self.limits.timeout.as_secs(),
                    tools = conversation.tools.len(),
                    "Agent loop started"
                );
                self.event_bus.publish(DomainEvent::LoopStarted {
                    conversation_id: conversation.id.to_string(),
                    task_preview: task.chars().take(120).collect(),
                    timestamp: Utc::now(),
                });
                conversation.append(Turn::user_text(task));
                LoopState::new(self.limits)
            }
            TurnInput::Continuation {
                state,
                tool_results,
            } => {
                conversation.append(Turn::tool_results(&tool_results));
                state
            }
        };

        conversation.verify_pairing()?;

        if let Some(bound) = state.begin_iteration() {
            let reason = match bound {
                Bound::Iterations => ExitReason::MaxIterationsReached,
                Bound::Timeout => ExitReason::Timeout,
            };
            warn!(
                iteration = state.iteration(),
                elapsed_ms = state.elapsed().as_millis() as u64,
                reason = %reason,
                "Agent loop bound reached"
            );
            let text = last_assistant_text(conversation);
            return Ok(Step::Exited(exit_record(&state, reason, None, text, 0)));
        }

        debug!(
            iteration = state.iteration(),
            turns = conversation.len(),
            "Requesting model response"
        );

        let request = ModelRequest {
            model: self.model.clone(),
            system: conversation.system_prompt.clone(),
            tools: conversation.tools.clone(),
            messages: conversation.turns().to_vec(),
            max_tokens: self.max_tokens,
        };

        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|source| LoopError::Provider {
                iteration: state.iteration(),
                source,
            })?;

        state.record_usage(response.usage);
        self.event_bus.publish(DomainEvent::ResponseGenerated {
            conversation_id: conversation.id.to_string(),
            model: response.model.clone(),
            iteration: state.iteration(),
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            timestamp: Utc::now(),
        });

        let (invocations, text) = split_content(&response.content);
        let stop_reason = response.stop_reason.clone();
        conversation.append(Turn::assistant(response.content));

        debug!(
            iteration = state.iteration(),
            stop_reason = ?stop_reason,
            tool_calls = invocations.len(),
            text_len = text.len(),
            "Model responded"
        );

        // 1. The completion tool wins over everything else in the response.
        if let Some(index) = invocations
            .iter()
            .position(|inv| self.tools.is_completion(&inv.name))
        {
            let discarded = invocations.len() - 1;
            if discarded > 0 {
                let names: Vec<&str> = invocations
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != index)
                    .map(|(_, inv)| inv.name.as_str())
                    .collect();
                warn!(
                    iteration = state.iteration(),
                    discarded,
                    tools = ?names,
                    "Completion tool called alongside other tools; discarding them"
                );
            }
            let answer = self
                .tools
                .completion()
                .and_then(|c| c.answer(&normalize(invocations[index].input.clone())));
            return Ok(Step::Exited(exit_record(
                &state,
                ExitReason::CompletionSignal,
                answer,
                text,
                discarded,
            )));
        }

        // 2. More tool use expected.
        if !invocations.is_empty() && stop_reason == StopReason::ToolUse {
            let tool_results = self.executor.execute(invocations).await?;
            return Ok(Step::Continue {
                state,
                tool_results,
            });
        }

        // 3. Natural completion.
        if stop_reason == StopReason::EndTurn {
            let final_text = non_empty(&text);
            return Ok(Step::Exited(exit_record(
                &state,
                ExitReason::EndTurn,
                final_text,
                text,
                0,
            )));
        }

        // 4. Anything else.
        if !invocations.is_empty() {
            warn!(
                iteration = state.iteration(),
                stop_reason = ?stop_reason,
                tool_calls = invocations.len(),
                "Tool calls without a tool_use stop reason; not executing them"
            );
        }
        let final_text = non_empty(&text);
        Ok(Step::Exited(exit_record(
            &state,
            ExitReason::NoToolCalls,
            final_text,
            text,
            0,
        )))
    }

    fn log_exit(&self, conversation: &Conversation, record: &ExitRecord) {
        let elapsed_ms = record.elapsed.as_millis() as u64;
        info!(
            conversation_id = %conversation.id,
            reason = %record.reason,
            iterations = record.iterations,
            elapsed_ms,
            input_tokens = record.usage.input_tokens,
            output_tokens = record.usage.output_tokens,
            "Agent loop exited"
        );
        self.event_bus.publish(DomainEvent::LoopExited {
            conversation_id: conversation.id.to_string(),
            reason: record.reason.to_string(),
            iterations: record.iterations,
            elapsed_ms,
            timestamp: Utc::now(),
        });
    }
}

/// Split response content into tool invocations and concatenated text.
fn split_content(content: &[ContentBlock]) -> (Vec<ToolInvocation>, String) {
    let mut invocations = Vec::new();
    let mut text = String::new();
    for block in content {
        match block {
            ContentBlock::Text { text: t } => text.push_str(t),
            ContentBlock::ToolUse { id, name, input } => invocations.push(ToolInvocation {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            ContentBlock::ToolResult { .. } => {}
        }
    }
    (invocations, text)
}

/// Text of the most recent model turn, empty before the first response.
fn last_assistant_text(conversation: &Conversation) -> String {
    conversation
        .turns()
        .iter()
        .rev()
        .find(|turn| turn.role == Role::Assistant)
        .map(Turn::text)
        .unwrap_or_default()
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn exit_record(
    state: &LoopState,
    reason: ExitReason,
    final_text: Option<String>,
    text_content: String,
    discarded_invocations: usize,
) -> ExitRecord {
    // A tripped bound counted a call that was never made
    let iterations = if reason.is_bound() {
        state.iteration().saturating_sub(1)
    } else {
        state.iteration()
    };
    ExitRecord {
        reason,
        final_text,
        text_content,
        usage: state.usage(),
        iterations,
        elapsed: state.elapsed(),
        discarded_invocations,
    }
}
