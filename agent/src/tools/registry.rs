//! Statically declared tool catalog.
//!
//! A [`ToolRegistry`] is built once per agent instance and is read-only
//! afterwards, so it can be shared by every concurrent call in a round.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use jsonschema::Validator;
use serde_json::Value;

use crate::core::coerce::{compile_schema, schema_violations};
use crate::core::types::ToolDescriptor;
use crate::tools::pseudo::PseudoTool;

/// Handler behind a real tool.
///
/// Arguments arrive already validated against the tool's parameter schema.
/// Handlers must not reach into engine state; engine-visible effects go
/// through pseudo tools.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, arguments: Value) -> Result<String>;
}

/// Whether a real tool may overlap with other calls in the same round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// May run concurrently with other safe calls.
    Safe,
    /// Runs alone: never overlaps any other call in the round.
    Exclusive,
}

/// The two call kinds, dispatched through separate code paths.
#[derive(Clone)]
pub enum ToolKind {
    Pseudo(PseudoTool),
    Real {
        handler: Arc<dyn ToolHandler>,
        concurrency: Concurrency,
    },
}

impl fmt::Debug for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolKind::Pseudo(tool) => f.debug_tuple("Pseudo").field(tool).finish(),
            ToolKind::Real { concurrency, .. } => f
                .debug_struct("Real")
                .field("concurrency", concurrency)
                .finish_non_exhaustive(),
        }
    }
}

/// One catalog entry.
#[derive(Clone)]
pub struct ToolSpec {
    name: String,
    description: String,
    parameters: Value,
    kind: ToolKind,
    validator: Arc<Validator>,
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl ToolSpec {
    /// Declare a real tool. Exclusive until marked concurrency-safe.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<Self> {
        Self::with_kind(
            name.into(),
            description.into(),
            parameters,
            ToolKind::Real {
                handler,
                concurrency: Concurrency::Exclusive,
            },
        )
    }

    pub(crate) fn pseudo(tool: PseudoTool) -> Result<Self> {
        Self::with_kind(
            tool.name().to_string(),
            tool.description().to_string(),
            tool.parameters(),
            ToolKind::Pseudo(tool),
        )
    }

    fn with_kind(name: String, description: String, parameters: Value, kind: ToolKind) -> Result<Self> {
        if name.trim().is_empty() {
            bail!("tool name must be non-empty");
        }
        let validator = compile_schema(&parameters)
            .with_context(|| format!("parameter schema for tool '{name}'"))?;
        Ok(Self {
            name,
            description,
            parameters,
            kind,
            validator: Arc::new(validator),
        })
    }

    /// Mark a real tool as safe to run concurrently with other safe calls.
    pub fn concurrency_safe(mut self) -> Self {
        if let ToolKind::Real { concurrency, .. } = &mut self.kind {
            *concurrency = Concurrency::Safe;
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    pub fn kind(&self) -> &ToolKind {
        &self.kind
    }

    pub fn is_pseudo(&self) -> bool {
        matches!(self.kind, ToolKind::Pseudo(_))
    }

    /// Schema violations of `arguments`; empty when they conform.
    pub fn argument_violations(&self, arguments: &Value) -> Vec<String> {
        schema_violations(&self.validator, arguments)
    }

    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Immutable name → spec catalog. Always contains the pseudo tools.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder { specs: Vec::new() }
    }

    fn from_specs(specs: Vec<ToolSpec>) -> Result<Self> {
        let mut index = HashMap::with_capacity(specs.len());
        for (position, spec) in specs.iter().enumerate() {
            if index.insert(spec.name.clone(), position).is_some() {
                bail!("duplicate tool name '{}'", spec.name);
            }
        }
        Ok(Self { specs, index })
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|&position| &self.specs[position])
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|spec| spec.name.as_str()).collect()
    }

    /// Catalog sent to the completion endpoint, in registration order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.specs.iter().map(ToolSpec::descriptor).collect()
    }

    /// Narrowed copy without the named real tools. Pseudo tools always stay.
    pub fn without(&self, names: &[&str]) -> Self {
        let specs: Vec<ToolSpec> = self
            .specs
            .iter()
            .filter(|spec| spec.is_pseudo() || !names.contains(&spec.name.as_str()))
            .cloned()
            .collect();
        let index = specs
            .iter()
            .enumerate()
            .map(|(position, spec)| (spec.name.clone(), position))
            .collect();
        Self { specs, index }
    }

    /// Copy with one more tool appended.
    pub fn with(&self, spec: ToolSpec) -> Result<Self> {
        let mut specs = self.specs.clone();
        specs.push(spec);
        Self::from_specs(specs)
    }
}

pub struct RegistryBuilder {
    specs: Vec<ToolSpec>,
}

impl RegistryBuilder {
    pub fn tool(mut self, spec: ToolSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn tools(mut self, specs: impl IntoIterator<Item = ToolSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    /// Validate names and append the pseudo tools.
    pub fn build(self) -> Result<ToolRegistry> {
        let mut specs = self.specs;
        for tool in PseudoTool::ALL {
            specs.push(ToolSpec::pseudo(tool)?);
        }
        ToolRegistry::from_specs(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn invoke(&self, arguments: Value) -> Result<String> {
            Ok(arguments.to_string())
        }
    }

    fn echo_spec(name: &str) -> ToolSpec {
        ToolSpec::new(
            name,
            "echo arguments",
            json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            Arc::new(Echo),
        )
        .expect("spec")
    }

    #[test]
    fn build_appends_pseudo_tools_after_real_tools() {
        let registry = ToolRegistry::builder()
            .tool(echo_spec("echo"))
            .build()
            .expect("registry");
        assert_eq!(registry.names(), vec!["echo", "set_todos", "update_user"]);
        assert!(registry.get("set_todos").expect("set_todos").is_pseudo());
        assert!(!registry.get("echo").expect("echo").is_pseudo());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = ToolRegistry::builder()
            .tool(echo_spec("echo"))
            .tool(echo_spec("echo"))
            .build()
            .expect_err("duplicate");
        assert!(err.to_string().contains("duplicate tool name 'echo'"));

        let err = ToolRegistry::builder()
            .tool(echo_spec("set_todos"))
            .build()
            .expect_err("clashes with pseudo tool");
        assert!(err.to_string().contains("set_todos"));
    }

    #[test]
    fn without_keeps_pseudo_tools() {
        let registry = ToolRegistry::builder()
            .tool(echo_spec("a"))
            .tool(echo_spec("b"))
            .build()
            .expect("registry");
        let narrowed = registry.without(&["a", "set_todos"]);
        assert_eq!(narrowed.names(), vec!["b", "set_todos", "update_user"]);
        assert!(narrowed.get("a").is_none());
        assert!(narrowed.get("b").is_some());
    }

    #[test]
    fn tools_default_to_exclusive() {
        let spec = echo_spec("echo");
        assert!(matches!(
            spec.kind(),
            ToolKind::Real {
                concurrency: Concurrency::Exclusive,
                ..
            }
        ));
        let spec = spec.concurrency_safe();
        assert!(matches!(
            spec.kind(),
            ToolKind::Real {
                concurrency: Concurrency::Safe,
                ..
            }
        ));
    }

    #[test]
    fn argument_violations_reports_type_mismatch() {
        let spec = echo_spec("echo");
        assert!(spec.argument_violations(&json!({"text": "hi"})).is_empty());
        let violations = spec.argument_violations(&json!({"text": 3}));
        assert_eq!(violations.len(), 1);
    }
}
