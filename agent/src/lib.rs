//! Round-based LLM agent runtime.
//!
//! An [`engine::Agent`] repeatedly sends its transcript to a completion
//! endpoint, executes the tool calls the model requests and stops once the
//! model produces a final answer that satisfies the caller's output schema,
//! or once its round ceiling is reached. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (transcript, TODOs, round budget,
//!   output coercion). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (HTTP completions, config files,
//!   prompt templates, repository context). Isolated to enable scripted
//!   clients in tests.
//!
//! Orchestration modules ([`engine`], [`dispatch`], [`delegate`]) coordinate
//! core logic with I/O and the [`tools`] catalog.

pub mod core;
pub mod delegate;
pub mod dispatch;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
