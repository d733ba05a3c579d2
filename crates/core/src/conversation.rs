//! Turn and Conversation domain types.
//!
//! A conversation is the append-only history a model sees: role-tagged turns,
//! each an ordered list of content blocks. The system prompt and the tool
//! schemas ride along with it because every model call re-sends them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::LoopError;
use crate::provider::ToolDefinition;
use crate::tool::ToolResult;

/// Unique identifier for one loop execution's conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The task giver, and the carrier of tool results
    User,
    /// The model
    Assistant,
}

/// One block of turn content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Free text
    Text { text: String },

    /// A model-issued request to run a tool
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// The answer to a `ToolUse` block, matched by `tool_use_id`
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "is_false")]
        is_error: bool,
    },
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A single role-tagged message in the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Turn {
    /// A user turn holding one text block.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// An assistant turn, stored exactly as the model produced it.
    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// A user turn carrying one result block per tool result, in order.
    pub fn tool_results(results: &[ToolResult]) -> Self {
        Self {
            role: Role::User,
            content: results.iter().map(ToolResult::to_block).collect(),
        }
    }

    /// Identifiers of the tool-use blocks in this turn, in order.
    pub fn tool_use_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Identifiers referenced by the tool-result blocks in this turn, in order.
    pub fn tool_result_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// All text blocks concatenated in encounter order.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// The ordered, append-only history of one loop execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Sent as the top-level system prompt on every call
    pub system_prompt: String,

    /// Tool schemas sent on every call
    pub tools: Vec<ToolDefinition>,

    turns: Vec<Turn>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last turn was appended
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create an empty conversation.
    pub fn new(system_prompt: impl Into<String>, tools: Vec<ToolDefinition>) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            system_prompt: system_prompt.into(),
            tools,
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a conversation whose first turn is the user's task.
    pub fn initial(
        system_prompt: impl Into<String>,
        tools: Vec<ToolDefinition>,
        first_user_message: impl Into<String>,
    ) -> Self {
        let mut conversation = Self::new(system_prompt, tools);
        conversation.append(Turn::user_text(first_user_message));
        conversation
    }

    /// Append a turn. Earlier turns are never touched.
    pub fn append(&mut self, turn: Turn) {
        self.updated_at = Utc::now();
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Check that the history can be sent to the model.
    ///
    /// The history must end with a user turn, and every assistant turn that
    /// invokes tools must be followed by a user turn answering each invocation
    /// exactly once, with no results for invocations it never made.
    pub fn verify_pairing(&self) -> Result<(), LoopError> {
        match self.turns.last() {
            None => {
                return Err(LoopError::ProtocolDesync(
                    "conversation has no turns".into(),
                ));
            }
            Some(turn) if turn.role != Role::User => {
                return Err(LoopError::ProtocolDesync(
                    "conversation must end with a user turn".into(),
                ));
            }
            Some(_) => {}
        }

        for (index, turn) in self.turns.iter().enumerate() {
            if turn.role != Role::User {
                let next_is_user = self
                    .turns
                    .get(index + 1)
                    .is_some_and(|next| next.role == Role::User);
                if !next_is_user && !turn.tool_use_ids().is_empty() {
                    return Err(LoopError::ProtocolDesync(format!(
                        "tool invocations in turn {index} are not followed by a result turn"
                    )));
                }
                continue;
            }
            let answered = turn.tool_result_ids();
            let invoked: Vec<&str> = match index.checked_sub(1).map(|i| &self.turns[i]) {
                Some(prev) if prev.role == Role::Assistant => prev.tool_use_ids(),
                _ => Vec::new(),
            };
            check_turn_pair(index, &invoked, &answered)?;
        }

        Ok(())
    }
}

fn check_turn_pair(index: usize, invoked: &[&str], answered: &[&str]) -> Result<(), LoopError> {
    let mut seen = HashSet::new();
    for id in answered {
        if !seen.insert(*id) {
            return Err(LoopError::ProtocolDesync(format!(
                "turn {index} answers invocation '{id}' more than once"
            )));
        }
        if !invoked.contains(id) {
            return Err(LoopError::ProtocolDesync(format!(
                "turn {index} answers unknown invocation '{id}'"
            )));
        }
    }
    if let Some(missing) = invoked.iter().find(|id| !seen.contains(*id)) {
        return Err(LoopError::ProtocolDesync(format!(
            "invocation '{missing}' has no result in turn {index}"
        )));
    }
    Ok(())
}
