//! Agent-local TODO list mutated through the `set_todos` pseudo-tool.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub text: String,
    #[serde(default)]
    pub done: bool,
}

impl TodoItem {
    pub fn new(text: impl Into<String>, done: bool) -> Self {
        Self {
            text: text.into(),
            done,
        }
    }
}

/// Ordered TODO items owned by one agent instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoList {
    items: Vec<TodoItem>,
}

impl TodoList {
    /// Replace the whole list. Calls are idempotent replacements, never appends.
    pub fn replace(&mut self, items: Vec<TodoItem>) {
        self.items = items;
    }

    pub fn items(&self) -> &[TodoItem] {
        &self.items
    }

    /// Checklist rendering, one item per line.
    pub fn render(&self) -> String {
        self.items
            .iter()
            .map(|item| {
                let marker = if item.done { "[x]" } else { "[ ]" };
                format!("{marker} {}", item.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
