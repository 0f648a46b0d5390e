//! End-to-end tests of the round loop against scripted completion clients.
//!
//! No network: every completion is replayed from a script, and tools are
//! closures or small handlers defined here.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use agent::core::coerce::OutputSchema;
use agent::core::todos::TodoItem;
use agent::core::types::{Role, ToolResult, Turn};
use agent::delegate::{DelegateSettings, DelegateTool};
use agent::engine::{Agent, AgentConfig, AgentFailure, IterationsExhaustedError, RunOutput};
use agent::io::completion::CompletionError;
use agent::test_support::{RecordingSink, ScriptedClient, call, calls_turn, fn_tool, text_turn};
use agent::tools::pseudo::StatusEvent;
use agent::tools::registry::{ToolHandler, ToolRegistry, ToolSpec};
use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Barrier;

fn answer_schema() -> OutputSchema {
    OutputSchema::new(
        "answer",
        json!({
            "type": "object",
            "required": ["answer"],
            "properties": {"answer": {"type": "string"}}
        }),
    )
    .expect("schema")
}

fn echo_registry() -> ToolRegistry {
    ToolRegistry::builder()
        .tool(fn_tool("echo", |args| Ok(args.to_string())))
        .tool(fn_tool("fail", |_| bail!("no such file")))
        .build()
        .expect("registry")
}

fn config(registry: ToolRegistry) -> AgentConfig {
    AgentConfig::new("main", "test-model", "system", registry).with_todo_reminders(false)
}

fn tool_results(turns: &[Turn]) -> Vec<&ToolResult> {
    turns
        .iter()
        .filter_map(|turn| match turn {
            Turn::ToolResult(result) => Some(result),
            _ => None,
        })
        .collect()
}

/// Verifies each tool call is answered by one result with its id before the
/// next request, and a failing handler does not stop its sibling.
#[tokio::test]
async fn tool_calls_are_answered_before_next_round() {
    let client = Arc::new(ScriptedClient::new(vec![
        Ok(calls_turn(vec![
            call("a", "echo", json!({"x": 1})),
            call("b", "fail", json!({})),
        ])),
        Ok(text_turn("done")),
    ]));
    let mut agent = Agent::new(config(echo_registry()), client.clone());

    let output = agent.run("task").await.expect("run");

    assert_eq!(output, RunOutput::Text("done".to_string()));
    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    let results = tool_results(&requests[1].transcript);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].call_id, "a");
    assert_eq!(results[0].output, r#"{"x":1}"#);
    assert_eq!(results[1].call_id, "b");
    assert!(results[1].is_error);
    assert_eq!(results[1].output, "Error: no such file");
    assert_eq!(
        requests[0].tools,
        vec!["echo", "fail", "set_todos", "update_user"]
    );
}

/// Verifies a model that never validates exhausts after exactly N rounds.
#[tokio::test]
async fn exhaustion_after_exactly_max_rounds() {
    let client = Arc::new(ScriptedClient::repeating(text_turn("not json")));
    let mut agent = Agent::new(
        config(echo_registry())
            .with_max_rounds(4)
            .with_output_schema(answer_schema()),
        client.clone(),
    );

    let err = agent.run("task").await.expect_err("exhausted");

    assert_eq!(AgentFailure::classify(&err), AgentFailure::Exhausted);
    assert_eq!(client.requests().len(), 4);
    let exhausted = err
        .downcast_ref::<IterationsExhaustedError>()
        .expect("exhaustion error");
    assert_eq!(exhausted.max_rounds, 4);
    assert_eq!(exhausted.rounds_used, 4);
    assert_eq!(exhausted.last_content.as_deref(), Some("not json"));
    assert!(
        exhausted
            .last_violation
            .as_deref()
            .is_some_and(|v| v.contains("invalid json"))
    );
}

/// Verifies an invalid answer followed by a valid one succeeds, with the
/// corrective turn between the two attempts and both rounds counted.
#[tokio::test]
async fn corrective_turn_precedes_valid_answer() {
    let client = Arc::new(ScriptedClient::new(vec![
        Ok(text_turn(r#"{"wrong": 1}"#)),
        Ok(text_turn(r#"{"answer": "42"}"#)),
    ]));
    let mut agent = Agent::new(
        config(echo_registry()).with_output_schema(answer_schema()),
        client,
    );

    let output = agent.run("task").await.expect("run");

    assert_eq!(output, RunOutput::Structured(json!({"answer": "42"})));
    assert_eq!(agent.rounds_used(), 2);
    let roles: Vec<Role> = agent.transcript().turns().iter().map(Turn::role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    let corrective = agent.transcript().turns()[2].content();
    assert!(corrective.contains("'answer'"));
    assert!(corrective.contains("answer"));
}

#[tokio::test]
async fn run_as_deserializes_validated_output() {
    #[derive(Deserialize)]
    struct Answer {
        answer: String,
    }

    let client = Arc::new(ScriptedClient::new(vec![Ok(text_turn(
        "```json\n{\"answer\": \"yes\"}\n```",
    ))]));
    let mut agent = Agent::new(
        config(echo_registry()).with_output_schema(answer_schema()),
        client,
    );

    let answer: Answer = agent.run_as("task").await.expect("run");
    assert_eq!(answer.answer, "yes");
}

#[tokio::test]
async fn empty_final_answer_gets_corrective_turn() {
    let client = Arc::new(ScriptedClient::new(vec![
        Ok(text_turn("   ")),
        Ok(text_turn("real answer")),
    ]));
    let mut agent = Agent::new(config(echo_registry()), client);

    let output = agent.run("task").await.expect("run");

    assert_eq!(output, RunOutput::Text("real answer".to_string()));
    assert_eq!(agent.transcript().count_role(Role::User), 2);
}

/// Verifies endpoint failures propagate unchanged and classify separately
/// from exhaustion.
#[tokio::test]
async fn endpoint_errors_propagate() {
    let client = Arc::new(ScriptedClient::new(vec![Err(CompletionError::Http {
        status: 401,
        body: "unauthorized".to_string(),
    })]));
    let mut agent = Agent::new(config(echo_registry()), client);

    let err = agent.run("task").await.expect_err("endpoint error");

    assert_eq!(AgentFailure::classify(&err), AgentFailure::Endpoint);
    let endpoint = err
        .downcast_ref::<CompletionError>()
        .expect("completion error");
    assert_eq!(endpoint.status(), Some(401));
}

#[tokio::test]
async fn agent_runs_only_once() {
    let client = Arc::new(ScriptedClient::repeating(text_turn("ok")));
    let mut agent = Agent::new(config(echo_registry()), client);
    agent.run("first").await.expect("first run");

    let err = agent.run("second").await.expect_err("second run");
    assert!(err.to_string().contains("already run"));
    assert_eq!(AgentFailure::classify(&err), AgentFailure::Other);
}

/// Verifies `set_todos` replaces the list, `update_user` answers with an empty
/// success, and the reminder before each request reflects the current list.
#[tokio::test]
async fn pseudo_tools_update_state_and_reminders() {
    let client = Arc::new(ScriptedClient::new(vec![
        Ok(calls_turn(vec![
            call("t1", "set_todos", json!({"todos": [{"text": "a"}, {"text": "b"}]})),
            call("u1", "update_user", json!({"msg": "starting"})),
        ])),
        Ok(calls_turn(vec![call(
            "t2",
            "set_todos",
            json!({"todos": [{"text": "a", "done": true}]}),
        )])),
        Ok(text_turn("finished")),
    ]));
    let sink = Arc::new(RecordingSink::default());
    let mut agent = Agent::new(config(echo_registry()).with_todo_reminders(true), client.clone())
        .with_status_sink(sink.clone());

    agent.run("task").await.expect("run");

    assert_eq!(agent.todos().items(), &[TodoItem::new("a", true)]);

    let requests = client.requests();
    let reminder = |index: usize| requests[index].transcript.last().expect("turn").clone();
    assert_eq!(
        reminder(0),
        Turn::system("Reminder: you currently have no items in your TODO list")
    );
    assert_eq!(
        reminder(1),
        Turn::system("Reminder: You are currently doing the following:\n[ ] a\n[ ] b")
    );
    assert_eq!(
        reminder(2),
        Turn::system("Reminder: You are currently doing the following:\n[x] a")
    );

    let results = tool_results(&requests[1].transcript);
    assert_eq!(results[1], &ToolResult::success("u1", ""));

    let events = sink.events();
    assert!(events.contains(&StatusEvent::Message {
        agent: "main".to_string(),
        msg: "starting".to_string(),
    }));
    assert_eq!(
        events
            .iter()
            .filter(|event| matches!(event, StatusEvent::TodosUpdated { .. }))
            .count(),
        2
    );
}

struct BarrierTool(Arc<Barrier>);

#[async_trait]
impl ToolHandler for BarrierTool {
    async fn invoke(&self, _arguments: Value) -> Result<String> {
        self.0.wait().await;
        Ok("released".to_string())
    }
}

/// Verifies concurrency-safe calls overlap: both wait on one barrier, which
/// only opens if they run at the same time.
#[tokio::test]
async fn safe_calls_run_concurrently() {
    let barrier = Arc::new(Barrier::new(2));
    let registry = ToolRegistry::builder()
        .tool(
            ToolSpec::new(
                "wait",
                "waits for a peer",
                json!({"type": "object"}),
                Arc::new(BarrierTool(barrier)),
            )
            .expect("spec")
            .concurrency_safe(),
        )
        .build()
        .expect("registry");
    let client = Arc::new(ScriptedClient::new(vec![
        Ok(calls_turn(vec![
            call("w1", "wait", json!({})),
            call("w2", "wait", json!({})),
        ])),
        Ok(text_turn("done")),
    ]));
    let mut agent = Agent::new(config(registry), client);

    let output = tokio::time::timeout(Duration::from_secs(5), agent.run("task"))
        .await
        .expect("safe calls should not deadlock")
        .expect("run");

    assert_eq!(output, RunOutput::Text("done".to_string()));
    let results = tool_results(agent.transcript().turns());
    assert!(results.iter().all(|result| result.output == "released"));
}

struct TrackedTool {
    in_flight: Arc<AtomicUsize>,
    overlapped: Arc<AtomicBool>,
    exclusive: bool,
}

#[async_trait]
impl ToolHandler for TrackedTool {
    async fn invoke(&self, _arguments: Value) -> Result<String> {
        let before = self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.exclusive && before != 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.exclusive && after != 1 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        Ok("ok".to_string())
    }
}

/// Verifies exclusive calls never overlap any other call in the round.
#[tokio::test]
async fn exclusive_calls_never_overlap() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let overlapped = Arc::new(AtomicBool::new(false));
    let tracked = |exclusive: bool| TrackedTool {
        in_flight: in_flight.clone(),
        overlapped: overlapped.clone(),
        exclusive,
    };
    let registry = ToolRegistry::builder()
        .tool(
            ToolSpec::new(
                "write",
                "exclusive",
                json!({"type": "object"}),
                Arc::new(tracked(true)),
            )
            .expect("write"),
        )
        .tool(
            ToolSpec::new(
                "read",
                "safe",
                json!({"type": "object"}),
                Arc::new(tracked(false)),
            )
            .expect("read")
            .concurrency_safe(),
        )
        .build()
        .expect("registry");
    let client = Arc::new(ScriptedClient::new(vec![
        Ok(calls_turn(vec![
            call("1", "write", json!({})),
            call("2", "read", json!({})),
            call("3", "read", json!({})),
            call("4", "write", json!({})),
            call("5", "read", json!({})),
        ])),
        Ok(text_turn("done")),
    ]));
    let mut agent = Agent::new(config(registry), client);

    agent.run("task").await.expect("run");

    assert!(!overlapped.load(Ordering::SeqCst));
    let ids: Vec<&str> = tool_results(agent.transcript().turns())
        .iter()
        .map(|result| result.call_id.as_str())
        .collect();
    assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
}

fn delegating_registry(client: Arc<ScriptedClient>, child_max_rounds: u32) -> ToolRegistry {
    let base = echo_registry();
    let delegate = DelegateTool::new(
        client,
        &base,
        DelegateSettings {
            name: "delegate".to_string(),
            model: "small-model".to_string(),
            system_prompt: "child system".to_string(),
            max_rounds: child_max_rounds,
            depth: 1,
            shared_context: None,
            todo_reminders: false,
            max_concurrent_tools: 4,
            tool_output_limit_bytes: 10_000,
        },
    );
    base.with(delegate.into_spec().expect("delegate spec"))
        .expect("registry")
}

/// Verifies a child that exhausts its ceiling yields one error tool result and
/// costs the parent exactly one round.
#[tokio::test]
async fn delegated_exhaustion_becomes_one_error_result() {
    let client = Arc::new(
        ScriptedClient::new(vec![
            Ok(calls_turn(vec![call(
                "d1",
                "delegate_task",
                json!({"task": "scan docs", "description": "Summarise docs/"}),
            )])),
            Ok(text_turn("parent done")),
        ])
        .route("delegate", vec![Ok(text_turn("")), Ok(text_turn(""))]),
    );
    let registry = delegating_registry(client.clone(), 2);
    let mut agent = Agent::new(config(registry), client.clone());

    let output = agent.run("task").await.expect("parent run");

    assert_eq!(output, RunOutput::Text("parent done".to_string()));
    assert_eq!(agent.rounds_used(), 2);
    let results = tool_results(agent.transcript().turns());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].call_id, "d1");
    assert!(results[0].is_error);
    assert!(results[0].output.contains("exhausted 2 rounds"));

    let child_requests = client.requests_for("delegate");
    assert_eq!(child_requests.len(), 2);
    assert_eq!(child_requests[0].model, "small-model");
    assert!(!child_requests[0].tools.contains(&"delegate_task".to_string()));
}

#[tokio::test]
async fn delegated_endpoint_failure_is_downgraded() {
    let client = Arc::new(
        ScriptedClient::new(vec![
            Ok(calls_turn(vec![call(
                "d1",
                "delegate_task",
                json!({"task": "scan", "description": "look around"}),
            )])),
            Ok(text_turn("recovered")),
        ])
        .route(
            "delegate",
            vec![Err(CompletionError::Transport("connection reset".to_string()))],
        ),
    );
    let registry = delegating_registry(client.clone(), 5);
    let mut agent = Agent::new(config(registry), client);

    let output = agent.run("task").await.expect("parent survives");

    assert_eq!(output, RunOutput::Text("recovered".to_string()));
    let results = tool_results(agent.transcript().turns());
    assert!(results[0].is_error);
    assert!(results[0].output.contains("connection reset"));
}

#[tokio::test]
async fn delegated_success_returns_only_final_output() {
    let client = Arc::new(
        ScriptedClient::new(vec![
            Ok(calls_turn(vec![call(
                "d1",
                "delegate_task",
                json!({"task": "scan", "description": "look around"}),
            )])),
            Ok(text_turn("parent done")),
        ])
        .route(
            "delegate",
            vec![
                Ok(calls_turn(vec![call("c1", "echo", json!({"deep": true}))])),
                Ok(text_turn("child summary")),
            ],
        ),
    );
    let registry = delegating_registry(client.clone(), 5);
    let mut agent = Agent::new(config(registry), client);

    agent.run("task").await.expect("run");

    let results = tool_results(agent.transcript().turns());
    assert_eq!(results, vec![&ToolResult::success("d1", "child summary")]);
}
