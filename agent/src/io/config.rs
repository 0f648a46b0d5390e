//! Agent configuration stored in `agent.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::dispatch::{DEFAULT_MAX_CONCURRENT_TOOLS, DEFAULT_TOOL_OUTPUT_LIMIT_BYTES};
use crate::engine::DEFAULT_MAX_ROUNDS;

pub const DEFAULT_CONFIG_FILE: &str = "agent.toml";

/// Agent configuration (TOML).
///
/// Missing fields take their defaults; CLI flags override file values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentSettings {
    /// Model used by the top-level agent.
    pub model: String,

    /// Model used by delegated children.
    pub delegate_model: String,

    /// OpenAI-compatible chat-completions URL.
    pub endpoint: String,

    /// Environment variable holding the bearer token.
    pub api_key_env: String,

    pub max_rounds: u32,
    pub delegate_max_rounds: u32,

    /// Nesting levels of `delegate_task`. 0 disables delegation.
    pub delegation_depth: u32,

    pub max_concurrent_tools: usize,

    /// Truncate tool outputs beyond this many bytes.
    pub tool_output_limit_bytes: usize,

    pub todo_reminders: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: "openai/gpt-5.1".to_string(),
            delegate_model: "openai/gpt-5.1-codex-mini".to_string(),
            endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            api_key_env: "COMPLETIONS_API_KEY".to_string(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            delegate_max_rounds: DEFAULT_MAX_ROUNDS,
            delegation_depth: 1,
            max_concurrent_tools: DEFAULT_MAX_CONCURRENT_TOOLS,
            tool_output_limit_bytes: DEFAULT_TOOL_OUTPUT_LIMIT_BYTES,
            todo_reminders: true,
        }
    }
}

impl AgentSettings {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must be non-empty"));
        }
        if self.delegate_model.trim().is_empty() {
            return Err(anyhow!("delegate_model must be non-empty"));
        }
        if self.endpoint.trim().is_empty() {
            return Err(anyhow!("endpoint must be non-empty"));
        }
        if self.max_rounds == 0 {
            return Err(anyhow!("max_rounds must be > 0"));
        }
        if self.delegate_max_rounds == 0 {
            return Err(anyhow!("delegate_max_rounds must be > 0"));
        }
        if self.max_concurrent_tools == 0 {
            return Err(anyhow!("max_concurrent_tools must be > 0"));
        }
        if self.tool_output_limit_bytes == 0 {
            return Err(anyhow!("tool_output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key_from_env(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("missing API key: set {} or pass --api-key", self.api_key_env))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentSettings::default()`.
pub fn load_config(path: &Path) -> Result<AgentSettings> {
    if !path.exists() {
        let cfg = AgentSettings::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentSettings =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentSettings) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
