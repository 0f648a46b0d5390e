//! I/O boundaries of the agent runtime: completion endpoints, configuration,
//! prompt templates and repository context.

pub mod completion;
pub mod config;
pub mod context;
pub mod openai;
pub mod prompt;
pub mod usage;
