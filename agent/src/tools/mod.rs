//! Tool catalog, pseudo tools and the built-in workspace tools.

pub mod fs;
pub mod pseudo;
pub mod registry;
