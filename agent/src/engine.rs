//! The agent round loop.
//!
//! One [`Agent`] owns one transcript and one TODO list for one task. Each
//! round sends the transcript to the completion client; tool calls are
//! dispatched and answered, final content is coerced against the optional
//! output schema, and rejected content is fed back as a corrective turn.
//! Only endpoint errors and round exhaustion leave the loop as errors.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::RoundBudget;
use crate::core::coerce::{OutputSchema, ValidationError, into_typed};
use crate::core::todos::{TodoItem, TodoList};
use crate::core::transcript::Transcript;
use crate::core::types::{ToolDescriptor, Turn};
use crate::dispatch::{DEFAULT_MAX_CONCURRENT_TOOLS, DEFAULT_TOOL_OUTPUT_LIMIT_BYTES, Dispatcher};
use crate::io::completion::{CompletionClient, CompletionError, CompletionRequest};
use crate::io::prompt::render_todo_reminder;
use crate::tools::pseudo::{PseudoState, StatusSink, TracingSink};
use crate::tools::registry::ToolRegistry;

pub const DEFAULT_MAX_ROUNDS: u32 = 50;

/// Per-agent settings. Built by the caller for a top-level run, or by the
/// delegation controller for a child.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Name used in logs and usage accounting.
    pub name: String,
    pub model: String,
    pub system_prompt: String,
    pub max_rounds: u32,
    /// Absent: the final text is returned verbatim.
    pub output_schema: Option<OutputSchema>,
    pub registry: ToolRegistry,
    /// Append a TODO summary system turn before every completion request.
    pub todo_reminders: bool,
    pub max_concurrent_tools: usize,
    pub tool_output_limit_bytes: usize,
}

impl AgentConfig {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        registry: ToolRegistry,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            system_prompt: system_prompt.into(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            output_schema: None,
            registry,
            todo_reminders: true,
            max_concurrent_tools: DEFAULT_MAX_CONCURRENT_TOOLS,
            tool_output_limit_bytes: DEFAULT_TOOL_OUTPUT_LIMIT_BYTES,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_todo_reminders(mut self, enabled: bool) -> Self {
        self.todo_reminders = enabled;
        self
    }
}

/// Terminal value of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutput {
    /// Validated against the output schema.
    Structured(Value),
    /// Verbatim final text; no schema was configured.
    Text(String),
}

impl RunOutput {
    /// Text form handed back to a delegating parent or printed by the CLI.
    pub fn into_text(self) -> String {
        match self {
            RunOutput::Structured(value) => {
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
            }
            RunOutput::Text(text) => text,
        }
    }
}

/// The round ceiling was reached without an acceptable final answer.
#[derive(Debug, Clone, thiserror::Error)]
#[error(
    "agent '{agent}' exhausted {max_rounds} rounds without a valid final answer{}",
    violation_suffix(.last_violation)
)]
pub struct IterationsExhaustedError {
    pub agent: String,
    pub max_rounds: u32,
    pub rounds_used: u32,
    pub todos: Vec<TodoItem>,
    /// Most recent non-empty assistant content.
    pub last_content: Option<String>,
    /// Why the most recent final answer was rejected, if one was.
    pub last_violation: Option<String>,
}

fn violation_suffix(violation: &Option<String>) -> String {
    violation
        .as_deref()
        .map(|v| format!(" (last problem: {v})"))
        .unwrap_or_default()
}

/// Coarse error classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentFailure {
    /// Transport, auth or protocol failure of the completion endpoint.
    Endpoint,
    /// Round ceiling reached.
    Exhausted,
    Other,
}

impl AgentFailure {
    pub fn classify(err: &anyhow::Error) -> Self {
        if err.downcast_ref::<CompletionError>().is_some() {
            return AgentFailure::Endpoint;
        }
        if err.downcast_ref::<IterationsExhaustedError>().is_some() {
            return AgentFailure::Exhausted;
        }
        AgentFailure::Other
    }
}

pub struct Agent {
    config: AgentConfig,
    client: Arc<dyn CompletionClient>,
    sink: Arc<dyn StatusSink>,
    transcript: Transcript,
    todos: TodoList,
    budget: RoundBudget,
    last_violation: Option<String>,
    started: bool,
}

impl Agent {
    pub fn new(config: AgentConfig, client: Arc<dyn CompletionClient>) -> Self {
        let budget = RoundBudget::new(config.max_rounds);
        Self {
            config,
            client,
            sink: Arc::new(TracingSink),
            transcript: Transcript::new(),
            todos: TodoList::default(),
            budget,
            last_violation: None,
            started: false,
        }
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn todos(&self) -> &TodoList {
        &self.todos
    }

    pub fn rounds_used(&self) -> u32 {
        self.budget.used()
    }

    /// Run the loop to completion. An agent runs at most once.
    #[instrument(skip_all, fields(agent = %self.config.name, model = %self.config.model))]
    pub async fn run(&mut self, task: &str) -> Result<RunOutput> {
        if self.started {
            bail!("agent '{}' has already run", self.config.name);
        }
        self.started = true;
        info!(max_rounds = self.config.max_rounds, "agent started");

        self.transcript.push(Turn::user(task));
        let tools = self.config.registry.descriptors();

        while let Some(round) = self.budget.next_round() {
            if let Some(output) = self.run_round(round, &tools).await? {
                info!(rounds = round, "agent finished");
                return Ok(output);
            }
        }

        warn!(rounds = self.budget.used(), "round ceiling reached");
        Err(IterationsExhaustedError {
            agent: self.config.name.clone(),
            max_rounds: self.config.max_rounds,
            rounds_used: self.budget.used(),
            todos: self.todos.items().to_vec(),
            last_content: self.transcript.last_assistant_content().map(str::to_string),
            last_violation: self.last_violation.clone(),
        }
        .into())
    }

    /// Run and deserialize the validated output into `T`.
    pub async fn run_as<T: DeserializeOwned>(&mut self, task: &str) -> Result<T> {
        match self.run(task).await? {
            RunOutput::Structured(value) => into_typed(value),
            RunOutput::Text(text) => {
                serde_json::from_str(&text).context("deserialize final text output")
            }
        }
    }

    #[instrument(skip(self, tools))]
    async fn run_round(&mut self, round: u32, tools: &[ToolDescriptor]) -> Result<Option<RunOutput>> {
        if self.config.todo_reminders {
            self.transcript.push(Turn::system(render_todo_reminder(&self.todos)?));
        }

        let request = CompletionRequest {
            agent: &self.config.name,
            model: &self.config.model,
            system_prompt: &self.config.system_prompt,
            transcript: self.transcript.turns(),
            tools,
            output_schema: self.config.output_schema.as_ref(),
        };
        let response = self
            .client
            .complete(request)
            .await
            .with_context(|| format!("agent '{}' round {round}", self.config.name))?;

        if let Some(reasoning) = response.reasoning.as_deref() {
            debug!(%reasoning, "model reasoning");
        }
        let calls = response.tool_calls.clone();
        let content = response.content.clone().unwrap_or_default();
        self.transcript.push(response.into_turn());

        if !calls.is_empty() {
            if !content.trim().is_empty() {
                debug!(%content, "assistant commentary");
            }
            let dispatcher = Dispatcher::new(&self.config.registry)
                .max_concurrent(self.config.max_concurrent_tools)
                .output_limit(self.config.tool_output_limit_bytes);
            let mut state = PseudoState {
                agent: &self.config.name,
                todos: &mut self.todos,
                sink: self.sink.as_ref(),
            };
            let results = dispatcher.dispatch(&calls, &mut state).await;
            let failed = results.iter().filter(|result| result.is_error).count();
            debug!(calls = calls.len(), failed, "tool calls answered");
            self.transcript.extend_results(results);
            return Ok(None);
        }

        match self.finalize(&content) {
            Ok(output) => Ok(Some(output)),
            Err(rejection) => {
                warn!(error = %rejection, "final answer rejected");
                let schema_name = self.config.output_schema.as_ref().map(OutputSchema::name);
                self.transcript
                    .push(Turn::user(rejection.corrective_prompt(schema_name)));
                self.last_violation = Some(rejection.to_string());
                Ok(None)
            }
        }
    }

    fn finalize(&self, content: &str) -> Result<RunOutput, ValidationError> {
        match &self.config.output_schema {
            Some(schema) => schema.coerce(content).map(RunOutput::Structured),
            None if content.trim().is_empty() => Err(ValidationError::Empty),
            None => Ok(RunOutput::Text(content.to_string())),
        }
    }
}
