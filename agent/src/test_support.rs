//! Test-only helpers: scripted completion clients, closure tools and temp
//! workspaces.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::core::types::{AssistantTurn, ToolCallRequest, Turn};
use crate::io::completion::{CompletionClient, CompletionError, CompletionRequest};
use crate::tools::pseudo::{StatusEvent, StatusSink};
use crate::tools::registry::{ToolHandler, ToolSpec};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owned snapshot of one completion request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub agent: String,
    pub model: String,
    pub system_prompt: String,
    pub transcript: Vec<Turn>,
    pub tools: Vec<String>,
    pub output_schema: Option<String>,
}

type Script = VecDeque<Result<AssistantTurn, CompletionError>>;

/// Completion client that replays predetermined responses.
///
/// Requests are answered from the first route whose prefix matches the
/// agent name, otherwise from the default script. An exhausted script
/// repeats its fallback turn, or fails with an invalid-response error.
#[derive(Default)]
pub struct ScriptedClient {
    default: Mutex<Script>,
    routes: Mutex<Vec<(String, Script)>>,
    fallback: Option<AssistantTurn>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedClient {
    pub fn new(script: Vec<Result<AssistantTurn, CompletionError>>) -> Self {
        Self {
            default: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// Answer every request with `turn`.
    pub fn repeating(turn: AssistantTurn) -> Self {
        Self {
            fallback: Some(turn),
            ..Self::default()
        }
    }

    /// Answer agents whose name starts with `prefix` from their own script.
    pub fn route(self, prefix: &str, script: Vec<Result<AssistantTurn, CompletionError>>) -> Self {
        lock(&self.routes).push((prefix.to_string(), script.into()));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    pub fn requests_for(&self, agent_prefix: &str) -> Vec<RecordedRequest> {
        lock(&self.requests)
            .iter()
            .filter(|request| request.agent.starts_with(agent_prefix))
            .cloned()
            .collect()
    }

    fn next(&self, agent: &str) -> Result<AssistantTurn, CompletionError> {
        let routed = {
            let mut routes = lock(&self.routes);
            routes
                .iter_mut()
                .find(|(prefix, _)| agent.starts_with(prefix.as_str()))
                .map(|(_, script)| script.pop_front())
        };
        let next = match routed {
            Some(next) => next,
            None => lock(&self.default).pop_front(),
        };
        match (next, &self.fallback) {
            (Some(response), _) => response,
            (None, Some(turn)) => Ok(turn.clone()),
            (None, None) => Err(CompletionError::InvalidResponse(format!(
                "script exhausted for agent '{agent}'"
            ))),
        }
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(
        &self,
        request: CompletionRequest<'_>,
    ) -> Result<AssistantTurn, CompletionError> {
        lock(&self.requests).push(RecordedRequest {
            agent: request.agent.to_string(),
            model: request.model.to_string(),
            system_prompt: request.system_prompt.to_string(),
            transcript: request.transcript.to_vec(),
            tools: request.tools.iter().map(|tool| tool.name.clone()).collect(),
            output_schema: request.output_schema.map(|schema| schema.name().to_string()),
        });
        self.next(request.agent)
    }
}

pub fn text_turn(content: &str) -> AssistantTurn {
    AssistantTurn::text(content)
}

pub fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest::new(id, name, arguments)
}

pub fn calls_turn(calls: Vec<ToolCallRequest>) -> AssistantTurn {
    AssistantTurn::calls(calls)
}

type SyncFn = dyn Fn(Value) -> Result<String> + Send + Sync;

/// Tool backed by a synchronous closure.
pub struct FnTool {
    f: Box<SyncFn>,
}

#[async_trait]
impl ToolHandler for FnTool {
    async fn invoke(&self, arguments: Value) -> Result<String> {
        (self.f)(arguments)
    }
}

/// Build a concurrency-safe tool spec with a permissive object schema.
pub fn fn_tool(
    name: &str,
    f: impl Fn(Value) -> Result<String> + Send + Sync + 'static,
) -> ToolSpec {
    ToolSpec::new(
        name,
        format!("test tool {name}"),
        serde_json::json!({"type": "object"}),
        Arc::new(FnTool { f: Box::new(f) }),
    )
    .expect("fn tool spec")
    .concurrency_safe()
}

/// Sink that keeps every event for later assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StatusEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<StatusEvent> {
        lock(&self.events).clone()
    }
}

impl StatusSink for RecordingSink {
    fn emit(&self, event: StatusEvent) {
        lock(&self.events).push(event);
    }
}

/// Temporary workspace directory that is removed on drop.
pub struct TempWorkspace {
    dir: tempfile::TempDir,
}

impl TempWorkspace {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp workspace")?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}
