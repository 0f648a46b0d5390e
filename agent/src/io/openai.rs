//! Completion client for OpenAI-compatible chat-completions endpoints.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use crate::core::coerce::OutputSchema;
use crate::core::types::{AssistantTurn, ToolCallRequest, ToolDescriptor, Turn};
use crate::io::completion::{CompletionClient, CompletionError, CompletionRequest};
use crate::io::usage::{UsageReport, UsageTracker};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

pub struct OpenAiClient {
    http: Client,
    endpoint: String,
    api_key: String,
    usage: Arc<UsageTracker>,
}

impl OpenAiClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self, CompletionError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| CompletionError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            usage: Arc::new(UsageTracker::new()),
        })
    }

    /// Share a tracker across clients, or read it after the run.
    pub fn with_usage(mut self, usage: Arc<UsageTracker>) -> Self {
        self.usage = usage;
        self
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    #[instrument(skip_all, fields(agent = request.agent, model = request.model))]
    async fn complete(
        &self,
        request: CompletionRequest<'_>,
    ) -> Result<AssistantTurn, CompletionError> {
        let payload = build_payload(&request);
        info!(
            turns = request.transcript.len(),
            tools = request.tools.len(),
            "sending completion request"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| CompletionError::Transport(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| CompletionError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(CompletionError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let (turn, usage) = parse_response(&body)?;
        if let Some(usage) = usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "completion usage"
            );
            self.usage.record(request.agent, &usage);
        }
        Ok(turn)
    }
}

/// Chat-completions request body for one round.
pub fn build_payload(request: &CompletionRequest<'_>) -> Value {
    let mut messages = Vec::with_capacity(request.transcript.len() + 1);
    messages.push(json!({"role": "system", "content": request.system_prompt}));
    messages.extend(request.transcript.iter().map(wire_message));

    let mut payload = json!({
        "model": request.model,
        "messages": messages,
        "usage": {"include": true},
    });
    if !request.tools.is_empty() {
        payload["tools"] = Value::Array(request.tools.iter().map(wire_tool).collect());
    }
    if let Some(schema) = request.output_schema {
        payload["response_format"] = response_format(schema);
    }
    payload
}

fn wire_message(turn: &Turn) -> Value {
    match turn {
        Turn::System { content } => json!({"role": "system", "content": content}),
        Turn::User { content } => json!({"role": "user", "content": content}),
        Turn::Assistant {
            content,
            tool_calls,
        } => {
            let mut message = json!({"role": "assistant", "content": content});
            if !tool_calls.is_empty() {
                message["tool_calls"] = Value::Array(tool_calls.iter().map(wire_tool_call).collect());
            }
            message
        }
        Turn::ToolResult(result) => json!({
            "role": "tool",
            "tool_call_id": result.call_id,
            "content": result.output,
        }),
    }
}

fn wire_tool_call(call: &ToolCallRequest) -> Value {
    let arguments = match &call.arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    };
    json!({
        "id": call.id,
        "type": "function",
        "function": {"name": call.name, "arguments": arguments},
    })
}

fn wire_tool(tool: &ToolDescriptor) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn response_format(schema: &OutputSchema) -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": schema.name(),
            "strict": schema.is_strict(),
            "schema": schema.schema(),
        }
    })
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<UsageReport>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Decode a chat-completions body into an assistant turn and its usage.
///
/// Arguments that are not valid JSON are kept as a raw string so the
/// dispatcher can report them back to the model.
pub fn parse_response(body: &str) -> Result<(AssistantTurn, Option<UsageReport>), CompletionError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|err| CompletionError::InvalidResponse(format!("decode body: {err}")))?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CompletionError::InvalidResponse("response has no choices".to_string()))?;

    match choice.finish_reason.as_deref() {
        None | Some("stop") | Some("tool_calls") => {}
        Some(other) => return Err(CompletionError::BadFinishReason(other.to_string())),
    }

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            let arguments = if call.function.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments))
            };
            ToolCallRequest::new(call.id, call.function.name, arguments)
        })
        .collect();

    let turn = AssistantTurn {
        content: choice.message.content,
        tool_calls,
        reasoning: choice.message.reasoning,
    };
    Ok((turn, response.usage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ToolResult;

    #[test]
    fn payload_prepends_system_prompt_and_maps_roles() {
        let transcript = vec![
            Turn::user("task"),
            Turn::Assistant {
                content: String::new(),
                tool_calls: vec![ToolCallRequest::new("c1", "ls", json!({"glob": "*"}))],
            },
            Turn::ToolResult(ToolResult::success("c1", "README.md")),
        ];
        let tools = vec![ToolDescriptor {
            name: "ls".to_string(),
            description: "list".to_string(),
            parameters: json!({"type": "object"}),
        }];
        let schema = OutputSchema::new("answer", json!({"type": "object"}))
            .expect("schema")
            .strict(true);
        let request = CompletionRequest {
            agent: "main",
            model: "m",
            system_prompt: "sys",
            transcript: &transcript,
            tools: &tools,
            output_schema: Some(&schema),
        };

        let payload = build_payload(&request);

        assert_eq!(payload["model"], "m");
        assert_eq!(payload["usage"]["include"], true);
        let messages = payload["messages"].as_array().expect("messages");
        assert_eq!(messages[0], json!({"role": "system", "content": "sys"}));
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[2]["tool_calls"][0]["function"]["arguments"], r#"{"glob":"*"}"#);
        assert_eq!(messages[3]["role"], "tool");
        assert_eq!(messages[3]["tool_call_id"], "c1");
        assert_eq!(payload["tools"][0]["function"]["name"], "ls");
        assert_eq!(payload["response_format"]["json_schema"]["name"], "answer");
        assert_eq!(payload["response_format"]["json_schema"]["strict"], true);
    }

    #[test]
    fn parses_tool_calls_and_usage() {
        let body = json!({
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "content": null,
                    "tool_calls": [
                        {"id": "a", "type": "function", "function": {"name": "ls", "arguments": "{\"glob\":\"*\"}"}},
                        {"id": "b", "type": "function", "function": {"name": "grep", "arguments": "{broken"}}
                    ]
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12, "cost": 0.01}
        })
        .to_string();

        let (turn, usage) = parse_response(&body).expect("parse");

        assert_eq!(turn.content, None);
        assert_eq!(turn.tool_calls[0].arguments, json!({"glob": "*"}));
        assert_eq!(turn.tool_calls[1].arguments, json!("{broken"));
        assert_eq!(usage.expect("usage").total_tokens, 12);
    }

    #[test]
    fn rejects_unexpected_finish_reason_and_empty_choices() {
        let body = json!({
            "choices": [{"finish_reason": "length", "message": {"content": "partial"}}]
        })
        .to_string();
        assert!(matches!(
            parse_response(&body),
            Err(CompletionError::BadFinishReason(reason)) if reason == "length"
        ));

        assert!(matches!(
            parse_response(r#"{"choices": []}"#),
            Err(CompletionError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_response("<html>"),
            Err(CompletionError::InvalidResponse(_))
        ));
    }
}
