//! Stable exit codes for agent CLI commands.

use crate::engine::AgentFailure;

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid input, configuration or any other failure.
pub const INVALID: i32 = 1;
/// The agent exhausted its round ceiling without a valid answer.
pub const EXHAUSTED: i32 = 2;
/// The completion endpoint failed (transport, auth or protocol).
pub const ENDPOINT: i32 = 3;

/// Exit code for a failed command.
pub fn for_error(err: &anyhow::Error) -> i32 {
    match AgentFailure::classify(err) {
        AgentFailure::Endpoint => ENDPOINT,
        AgentFailure::Exhausted => EXHAUSTED,
        AgentFailure::Other => INVALID,
    }
}
