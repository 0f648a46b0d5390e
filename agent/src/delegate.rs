//! `delegate_task`: hand a sub-task to a fresh child agent.
//!
//! The parent owns the child for the duration of one call. The child gets its
//! own transcript and TODO list, runs a full loop and only its final output
//! comes back. Every child failure, endpoint errors included, is returned as
//! an error so the dispatcher turns it into an error tool result.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::engine::{Agent, AgentConfig};
use crate::io::completion::CompletionClient;
use crate::io::prompt::render_delegate_prompt;
use crate::tools::pseudo::{StatusSink, TracingSink};
use crate::tools::registry::{ToolHandler, ToolRegistry, ToolSpec};

pub const DELEGATE_TOOL_NAME: &str = "delegate_task";

/// Settings copied into every child agent.
#[derive(Debug, Clone)]
pub struct DelegateSettings {
    /// Child agent name; the task label is appended.
    pub name: String,
    pub model: String,
    pub system_prompt: String,
    pub max_rounds: u32,
    /// Levels of delegation still allowed. At 1 the child cannot delegate.
    pub depth: u32,
    /// Rendered into each child's initial turn, e.g. a repository overview.
    pub shared_context: Option<String>,
    pub todo_reminders: bool,
    pub max_concurrent_tools: usize,
    pub tool_output_limit_bytes: usize,
}

#[derive(Debug, Deserialize)]
struct DelegateArgs {
    task: String,
    description: String,
}

pub struct DelegateTool {
    client: Arc<dyn CompletionClient>,
    base: ToolRegistry,
    settings: DelegateSettings,
    sink: Arc<dyn StatusSink>,
}

impl DelegateTool {
    /// `base` is the catalog children receive; any `delegate_task` in it is
    /// dropped and re-added only while depth remains.
    pub fn new(client: Arc<dyn CompletionClient>, base: &ToolRegistry, settings: DelegateSettings) -> Self {
        Self {
            client,
            base: base.without(&[DELEGATE_TOOL_NAME]),
            settings,
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn into_spec(self) -> Result<ToolSpec> {
        Ok(ToolSpec::new(
            DELEGATE_TOOL_NAME,
            "Delegate a self-contained task to a sub-agent with the same workspace tools. \
             `task` is a 3-5 word label; `description` must contain everything the sub-agent \
             needs. Returns the sub-agent's final answer.",
            json!({
                "type": "object",
                "required": ["task", "description"],
                "properties": {
                    "task": {"type": "string"},
                    "description": {"type": "string"}
                }
            }),
            Arc::new(self),
        )?
        .concurrency_safe())
    }

    fn child_registry(&self) -> Result<ToolRegistry> {
        if self.settings.depth <= 1 {
            return Ok(self.base.clone());
        }
        let nested = DelegateTool {
            client: self.client.clone(),
            base: self.base.clone(),
            settings: DelegateSettings {
                depth: self.settings.depth - 1,
                ..self.settings.clone()
            },
            sink: self.sink.clone(),
        };
        self.base.with(nested.into_spec()?)
    }
}

#[async_trait]
impl ToolHandler for DelegateTool {
    async fn invoke(&self, arguments: Value) -> Result<String> {
        let args: DelegateArgs =
            serde_json::from_value(arguments).context("decode delegate_task arguments")?;
        let prompt =
            render_delegate_prompt(&args.description, self.settings.shared_context.as_deref())?;

        let mut config = AgentConfig::new(
            format!("{}:{}", self.settings.name, args.task),
            self.settings.model.clone(),
            self.settings.system_prompt.clone(),
            self.child_registry()?,
        )
        .with_max_rounds(self.settings.max_rounds)
        .with_todo_reminders(self.settings.todo_reminders);
        config.max_concurrent_tools = self.settings.max_concurrent_tools;
        config.tool_output_limit_bytes = self.settings.tool_output_limit_bytes;

        info!(task = %args.task, depth = self.settings.depth, "delegating task");
        let mut child = Agent::new(config, self.client.clone()).with_status_sink(self.sink.clone());
        match child.run(&prompt).await {
            Ok(output) => {
                info!(task = %args.task, rounds = child.rounds_used(), "delegated task finished");
                Ok(output.into_text())
            }
            Err(err) => {
                warn!(task = %args.task, error = %format!("{err:#}"), "delegated task failed");
                Err(err.context(format!("delegated task '{}' failed", args.task)))
            }
        }
    }
}
