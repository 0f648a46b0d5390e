//! Pseudo tools: tool-shaped calls that mutate agent-local state.
//!
//! They never reach a handler. The dispatcher applies them directly, in the
//! order received, before any real tool runs.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

use crate::core::todos::{TodoItem, TodoList};
use crate::core::types::{ToolCallRequest, ToolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoTool {
    SetTodos,
    UpdateUser,
}

impl PseudoTool {
    pub const ALL: [PseudoTool; 2] = [PseudoTool::SetTodos, PseudoTool::UpdateUser];

    pub fn name(self) -> &'static str {
        match self {
            PseudoTool::SetTodos => "set_todos",
            PseudoTool::UpdateUser => "update_user",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            PseudoTool::SetTodos => {
                "Replace your TODO list. Always send the complete list, including finished items \
                 marked done. Use it to plan multi-step work and track progress."
            }
            PseudoTool::UpdateUser => {
                "Send a short progress update to the user. Use it when starting or finishing a \
                 significant step."
            }
        }
    }

    pub fn parameters(self) -> Value {
        match self {
            PseudoTool::SetTodos => json!({
                "type": "object",
                "required": ["todos"],
                "properties": {
                    "todos": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["text"],
                            "properties": {
                                "text": {"type": "string"},
                                "done": {"type": "boolean"}
                            }
                        }
                    }
                }
            }),
            PseudoTool::UpdateUser => json!({
                "type": "object",
                "required": ["msg"],
                "properties": {
                    "msg": {"type": "string"}
                }
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SetTodosArgs {
    todos: Vec<TodoItem>,
}

#[derive(Debug, Deserialize)]
struct UpdateUserArgs {
    msg: String,
}

/// Side-channel notification emitted by an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Message { agent: String, msg: String },
    TodosUpdated { agent: String, todos: Vec<TodoItem> },
}

/// Receiver of status events. Implementations must not block.
pub trait StatusSink: Send + Sync {
    fn emit(&self, event: StatusEvent);
}

/// Default sink: status events become `info` log records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn emit(&self, event: StatusEvent) {
        match event {
            StatusEvent::Message { agent, msg } => info!(%agent, %msg, "status update"),
            StatusEvent::TodosUpdated { agent, todos } => {
                let done = todos.iter().filter(|item| item.done).count();
                info!(%agent, total = todos.len(), done, "todo list updated");
            }
        }
    }
}

/// Forwards events into a channel; dropped receivers are ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: UnboundedSender<StatusEvent>,
}

impl ChannelSink {
    pub fn new(sender: UnboundedSender<StatusEvent>) -> Self {
        Self { sender }
    }
}

impl StatusSink for ChannelSink {
    fn emit(&self, event: StatusEvent) {
        let _ = self.sender.send(event);
    }
}

/// Engine state a pseudo call may touch.
pub struct PseudoState<'a> {
    pub agent: &'a str,
    pub todos: &'a mut TodoList,
    pub sink: &'a dyn StatusSink,
}

/// Apply one pseudo call. Arguments were validated by the dispatcher.
pub fn apply(tool: PseudoTool, call: &ToolCallRequest, state: &mut PseudoState<'_>) -> ToolResult {
    match apply_inner(tool, call, state) {
        Ok(output) => ToolResult::success(&call.id, output),
        Err(err) => ToolResult::error(&call.id, format!("{err:#}")),
    }
}

fn apply_inner(tool: PseudoTool, call: &ToolCallRequest, state: &mut PseudoState<'_>) -> Result<String> {
    match tool {
        PseudoTool::SetTodos => {
            let args: SetTodosArgs = serde_json::from_value(call.arguments.clone())
                .context("decode set_todos arguments")?;
            let count = args.todos.len();
            state.todos.replace(args.todos);
            state.sink.emit(StatusEvent::TodosUpdated {
                agent: state.agent.to_string(),
                todos: state.todos.items().to_vec(),
            });
            Ok(format!("TODO list updated with {count} items"))
        }
        PseudoTool::UpdateUser => {
            let args: UpdateUserArgs = serde_json::from_value(call.arguments.clone())
                .context("decode update_user arguments")?;
            state.sink.emit(StatusEvent::Message {
                agent: state.agent.to_string(),
                msg: args.msg,
            });
            Ok(String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<StatusEvent>>);

    impl StatusSink for Recorder {
        fn emit(&self, event: StatusEvent) {
            self.0.lock().expect("lock").push(event);
        }
    }

    #[test]
    fn set_todos_replaces_list_and_notifies() {
        let recorder = Recorder::default();
        let mut todos = TodoList::default();
        todos.replace(vec![TodoItem::new("old", false)]);
        let mut state = PseudoState {
            agent: "main",
            todos: &mut todos,
            sink: &recorder,
        };
        let call = ToolCallRequest::new(
            "c1",
            "set_todos",
            json!({"todos": [{"text": "new", "done": true}]}),
        );

        let result = apply(PseudoTool::SetTodos, &call, &mut state);

        assert!(!result.is_error);
        assert_eq!(result.output, "TODO list updated with 1 items");
        assert_eq!(todos.items(), &[TodoItem::new("new", true)]);
        let events = recorder.0.lock().expect("lock");
        assert!(matches!(&events[0], StatusEvent::TodosUpdated { todos, .. } if todos.len() == 1));
    }

    #[test]
    fn update_user_returns_empty_success() {
        let recorder = Recorder::default();
        let mut todos = TodoList::default();
        let mut state = PseudoState {
            agent: "main",
            todos: &mut todos,
            sink: &recorder,
        };
        let call = ToolCallRequest::new("c2", "update_user", json!({"msg": "halfway"}));

        let result = apply(PseudoTool::UpdateUser, &call, &mut state);

        assert_eq!(result, ToolResult::success("c2", ""));
        assert_eq!(
            recorder.0.lock().expect("lock").as_slice(),
            &[StatusEvent::Message {
                agent: "main".to_string(),
                msg: "halfway".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn channel_sink_forwards_events() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);
        sink.emit(StatusEvent::Message {
            agent: "a".to_string(),
            msg: "hi".to_string(),
        });
        let event = rx.recv().await.expect("event");
        assert!(matches!(event, StatusEvent::Message { msg, .. } if msg == "hi"));
    }
}
