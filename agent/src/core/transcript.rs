//! Append-only conversation transcript.

use crate::core::types::{Role, ToolResult, Turn};

/// Ordered sequence of turns sent to the completion endpoint every round.
///
/// There is no API to remove or edit a turn; the transcript only grows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Append one tool-result turn per result, in the given order.
    pub fn extend_results(&mut self, results: Vec<ToolResult>) {
        self.turns.extend(results.into_iter().map(Turn::ToolResult));
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Content of the most recent assistant turn with non-empty content.
    pub fn last_assistant_content(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .filter(|turn| turn.role() == Role::Assistant)
            .map(Turn::content)
            .find(|content| !content.trim().is_empty())
    }

    pub fn count_role(&self, role: Role) -> usize {
        self.turns.iter().filter(|turn| turn.role() == role).count()
    }
}
