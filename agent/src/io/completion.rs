//! Completion client abstraction.
//!
//! The [`CompletionClient`] trait decouples the round loop from the model
//! backend (an OpenAI-compatible HTTP endpoint in production). Tests use
//! scripted clients that return predetermined turns without network access.

use async_trait::async_trait;

use crate::core::coerce::OutputSchema;
use crate::core::types::{AssistantTurn, ToolDescriptor, Turn};

/// Everything the endpoint sees for one round.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    /// Agent name, used for logging and usage accounting.
    pub agent: &'a str,
    pub model: &'a str,
    /// Sent ahead of the transcript on every request.
    pub system_prompt: &'a str,
    pub transcript: &'a [Turn],
    pub tools: &'a [ToolDescriptor],
    pub output_schema: Option<&'a OutputSchema>,
}

/// Endpoint failure. Terminal for the requesting agent; never retried here.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion endpoint returned status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("completion transport failed: {0}")]
    Transport(String),
    #[error("invalid completion response: {0}")]
    InvalidResponse(String),
    #[error("completion stopped with unexpected finish reason '{0}'")]
    BadFinishReason(String),
}

impl CompletionError {
    /// HTTP status of the failed request, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            CompletionError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Abstraction over completion backends. One call per round, atomic from the
/// engine's perspective.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        request: CompletionRequest<'_>,
    ) -> Result<AssistantTurn, CompletionError>;
}
