//! Output coercion: parse and validate final model content against a target
//! JSON Schema.
//!
//! Validation failures are not fatal. The engine renders them back into the
//! transcript so the model can correct itself on the next round.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Draft, Validator};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Compile a JSON Schema (Draft 2020-12).
pub fn compile_schema(schema: &Value) -> Result<Validator> {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| anyhow!("compile json schema: {err}"))
}

/// Collect every schema violation of `instance`, one message per violation.
pub fn schema_violations(validator: &Validator, instance: &Value) -> Vec<String> {
    validator
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect()
}

/// Caller-supplied target schema for the final answer.
#[derive(Clone)]
pub struct OutputSchema {
    name: String,
    schema: Value,
    strict: bool,
    validator: Arc<Validator>,
}

impl fmt::Debug for OutputSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSchema")
            .field("name", &self.name)
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Result<Self> {
        let name = name.into();
        let validator =
            compile_schema(&schema).with_context(|| format!("output schema '{name}'"))?;
        Ok(Self {
            name,
            schema,
            strict: false,
            validator: Arc::new(validator),
        })
    }

    /// Ask the endpoint to enforce the schema strictly, when it supports that.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn coerce(&self, text: &str) -> Result<Value, ValidationError> {
        coerce(text, self)
    }
}

/// Why a final answer was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The content was empty or whitespace.
    Empty,
    /// The content was not valid JSON.
    Parse(String),
    /// The content was JSON but violated the schema.
    Schema(Vec<String>),
}

impl ValidationError {
    /// Corrective message appended to the transcript for the next round.
    pub fn corrective_prompt(&self, schema_name: Option<&str>) -> String {
        let target = schema_name
            .map(|name| format!("the required '{name}' output schema"))
            .unwrap_or_else(|| "the required output format".to_string());
        match self {
            ValidationError::Empty => format!(
                "Your last response was empty. Respond again with a final answer matching {target}."
            ),
            ValidationError::Parse(err) => format!(
                "Your last response could not be parsed as JSON ({err}). Respond again with only a JSON document matching {target}."
            ),
            ValidationError::Schema(violations) => format!(
                "Your last response did not match {target}:\n- {}\nFix these problems and respond again with the complete JSON document.",
                violations.join("\n- ")
            ),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Empty => write!(f, "empty response"),
            ValidationError::Parse(err) => write!(f, "invalid json: {err}"),
            ValidationError::Schema(violations) => {
                write!(f, "schema validation failed: {}", violations.join("; "))
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Parse `text` as JSON and validate it against `schema`.
pub fn coerce(text: &str, schema: &OutputSchema) -> Result<Value, ValidationError> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Err(ValidationError::Empty);
    }
    let value: Value =
        serde_json::from_str(body).map_err(|err| ValidationError::Parse(err.to_string()))?;
    let violations = schema_violations(&schema.validator, &value);
    if !violations.is_empty() {
        return Err(ValidationError::Schema(violations));
    }
    Ok(value)
}

/// Deserialize an already validated value into a caller type.
pub fn into_typed<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).context("deserialize validated output")
}

/// Strip a single surrounding Markdown code fence, with or without a language tag.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return trimmed;
    };
    match inner.split_once('\n') {
        Some((lang, body)) if lang.trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
            body.trim()
        }
        _ => inner.trim(),
    }
}
