//! Deterministic, pure logic shared by the agent runtime.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod coerce;
pub mod todos;
pub mod transcript;
pub mod types;
