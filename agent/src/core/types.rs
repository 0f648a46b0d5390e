//! Shared deterministic types for the agent round loop.
//!
//! These types define the stable contracts between the engine, the dispatcher
//! and the completion client. They carry no I/O and no handler references.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Speaker of a transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    ToolResult,
}

/// A model-requested invocation of a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Identifier assigned by the model/API, unique within a round.
    pub id: String,
    /// Name of the requested tool.
    pub name: String,
    /// Structured arguments, expected to match the tool's parameter schema.
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Answer to exactly one [`ToolCallRequest`].
///
/// Failures are still delivered to the model as text so it can adapt;
/// `is_error` only distinguishes handler failure from success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub output: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self {
            call_id: call_id.into(),
            output: format!("Error: {message}"),
            is_error: true,
        }
    }
}

/// One entry of the transcript. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    ToolResult(ToolResult),
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Turn::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Turn::User {
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Turn::System { .. } => Role::System,
            Turn::User { .. } => Role::User,
            Turn::Assistant { .. } => Role::Assistant,
            Turn::ToolResult(_) => Role::ToolResult,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Turn::System { content } | Turn::User { content } | Turn::Assistant { content, .. } => {
                content
            }
            Turn::ToolResult(result) => &result.output,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Turn::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// Response of the completion endpoint for one round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantTurn {
    /// Final content, or commentary accompanying tool calls.
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    /// Extended-thinking text some models return. Never sent back.
    pub reasoning: Option<String>,
}

impl AssistantTurn {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls,
            ..Self::default()
        }
    }

    pub fn into_turn(self) -> Turn {
        Turn::Assistant {
            content: self.content.unwrap_or_default(),
            tool_calls: self.tool_calls,
        }
    }
}

/// Catalog entry sent to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}
