//! Tool-call dispatch for one round.
//!
//! Order within a round: pseudo calls in received order, then the batch of
//! concurrency-safe calls, then exclusive calls one at a time. Every call
//! yields exactly one [`ToolResult`]; a failing call never aborts its siblings.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, stream};
use tracing::{debug, instrument, warn};

use crate::core::types::{ToolCallRequest, ToolResult};
use crate::tools::pseudo::{self, PseudoState};
use crate::tools::registry::{Concurrency, ToolHandler, ToolKind, ToolRegistry};

/// Default bound on concurrently running safe calls.
pub const DEFAULT_MAX_CONCURRENT_TOOLS: usize = 10;
/// Default size above which a tool output is truncated.
pub const DEFAULT_TOOL_OUTPUT_LIMIT_BYTES: usize = 100_000;

pub struct Dispatcher<'a> {
    registry: &'a ToolRegistry,
    max_concurrent: usize,
    output_limit: usize,
}

impl<'a> Dispatcher<'a> {
    pub fn new(registry: &'a ToolRegistry) -> Self {
        Self {
            registry,
            max_concurrent: DEFAULT_MAX_CONCURRENT_TOOLS,
            output_limit: DEFAULT_TOOL_OUTPUT_LIMIT_BYTES,
        }
    }

    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn output_limit(mut self, output_limit: usize) -> Self {
        self.output_limit = output_limit;
        self
    }

    /// Execute every call and return one result per call, in input order.
    #[instrument(skip_all, fields(calls = calls.len()))]
    pub async fn dispatch(
        &self,
        calls: &[ToolCallRequest],
        state: &mut PseudoState<'_>,
    ) -> Vec<ToolResult> {
        let mut results: Vec<(usize, ToolResult)> = Vec::with_capacity(calls.len());
        let mut concurrent = Vec::new();
        let mut exclusive = Vec::new();

        for (position, call) in calls.iter().enumerate() {
            match self.resolve(call) {
                Err(rejected) => {
                    warn!(tool = %call.name, call_id = %call.id, output = %rejected.output, "tool call rejected");
                    results.push((position, rejected));
                }
                Ok(ToolKind::Pseudo(tool)) => {
                    let result = pseudo::apply(*tool, call, state);
                    debug!(tool = %call.name, call_id = %call.id, is_error = result.is_error, "pseudo tool applied");
                    results.push((position, result));
                }
                Ok(ToolKind::Real {
                    handler,
                    concurrency: Concurrency::Safe,
                }) => concurrent.push((position, handler.clone())),
                Ok(ToolKind::Real {
                    handler,
                    concurrency: Concurrency::Exclusive,
                }) => exclusive.push((position, handler.clone())),
            }
        }

        let output_limit = self.output_limit;
        // Boxed so the nested delegate future stays provably `Send`.
        let pending: Vec<BoxFuture<'_, (usize, ToolResult)>> = concurrent
            .into_iter()
            .map(|(position, handler)| {
                async move { (position, invoke(handler, &calls[position], output_limit).await) }
                    .boxed()
            })
            .collect();
        let batch: Vec<(usize, ToolResult)> = stream::iter(pending)
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;
        results.extend(batch);

        for (position, handler) in exclusive {
            results.push((position, invoke(handler, &calls[position], output_limit).await));
        }

        results.sort_by_key(|(position, _)| *position);
        results.into_iter().map(|(_, result)| result).collect()
    }

    /// Look up the tool and validate arguments. Rejections become error results.
    fn resolve(&self, call: &ToolCallRequest) -> Result<&'a ToolKind, ToolResult> {
        let Some(spec) = self.registry.get(&call.name) else {
            return Err(ToolResult::error(
                &call.id,
                format!("unknown tool '{}'", call.name),
            ));
        };
        if let Some(raw) = call.arguments.as_str() {
            return Err(ToolResult::error(
                &call.id,
                format!("arguments for '{}' are not a JSON object: {raw}", call.name),
            ));
        }
        let violations = spec.argument_violations(&call.arguments);
        if !violations.is_empty() {
            return Err(ToolResult::error(
                &call.id,
                format!(
                    "invalid arguments for '{}': {}",
                    call.name,
                    violations.join("; ")
                ),
            ));
        }
        Ok(spec.kind())
    }
}

#[instrument(skip_all, fields(tool = %call.name, call_id = %call.id))]
async fn invoke(handler: Arc<dyn ToolHandler>, call: &ToolCallRequest, output_limit: usize) -> ToolResult {
    let started = Instant::now();
    let outcome = AssertUnwindSafe(handler.invoke(call.arguments.clone()))
        .catch_unwind()
        .await;
    let result = match outcome {
        Ok(Ok(output)) => ToolResult::success(&call.id, truncate_output(output, output_limit)),
        Ok(Err(err)) => ToolResult::error(&call.id, format!("{err:#}")),
        Err(panic) => ToolResult::error(
            &call.id,
            format!("tool '{}' panicked: {}", call.name, panic_message(panic.as_ref())),
        ),
    };
    debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        is_error = result.is_error,
        "tool finished"
    );
    result
}

fn truncate_output(output: String, limit: usize) -> String {
    if output.len() <= limit {
        return output;
    }
    let mut cut = limit;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n[truncated {} bytes]",
        &output[..cut],
        output.len() - cut
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic payload".to_string()
}
