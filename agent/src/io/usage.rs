//! Token and cost accounting shared by every agent of a run.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Mutex, PoisonError};

use serde::Deserialize;

/// Usage block as reported by the endpoint for one completion.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct UsageReport {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    pub prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PromptTokensDetails {
    pub cached_tokens: u64,
}

/// Accumulated usage for one agent, or for the whole run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentUsage {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cached_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
}

impl AgentUsage {
    fn add(&mut self, report: &UsageReport) {
        self.calls += 1;
        self.prompt_tokens += report.prompt_tokens;
        self.completion_tokens += report.completion_tokens;
        self.total_tokens += report.total_tokens;
        self.cost += report.cost;
        if let Some(details) = &report.prompt_tokens_details {
            self.cached_tokens += details.cached_tokens;
        }
    }

    fn merge(&mut self, other: &AgentUsage) {
        self.calls += other.calls;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.cached_tokens += other.cached_tokens;
        self.total_tokens += other.total_tokens;
        self.cost += other.cost;
    }
}

#[derive(Debug, Default)]
pub struct UsageTracker {
    agents: Mutex<BTreeMap<String, AgentUsage>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, agent: &str, report: &UsageReport) {
        let mut agents = self.agents.lock().unwrap_or_else(PoisonError::into_inner);
        agents.entry(agent.to_string()).or_default().add(report);
    }

    pub fn agent(&self, agent: &str) -> AgentUsage {
        let agents = self.agents.lock().unwrap_or_else(PoisonError::into_inner);
        agents.get(agent).cloned().unwrap_or_default()
    }

    pub fn totals(&self) -> AgentUsage {
        let agents = self.agents.lock().unwrap_or_else(PoisonError::into_inner);
        let mut total = AgentUsage::default();
        for usage in agents.values() {
            total.merge(usage);
        }
        total
    }

    /// Human-readable per-agent and total summary.
    pub fn summary(&self) -> String {
        let agents = self.agents.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let mut out = String::from("Usage summary\n");
        for (agent, usage) in &agents {
            let _ = writeln!(
                out,
                "  {agent}: {} calls, {} prompt / {} completion tokens",
                usage.calls, usage.prompt_tokens, usage.completion_tokens
            );
            if usage.cached_tokens > 0 {
                let _ = writeln!(out, "    cached: {}", usage.cached_tokens);
            }
            if usage.cost > 0.0 {
                let _ = writeln!(out, "    cost: ${:.6}", usage.cost);
            }
        }
        let total = self.totals();
        let _ = write!(
            out,
            "  total: {} calls, {} tokens",
            total.calls, total.total_tokens
        );
        if total.cached_tokens > 0 && total.prompt_tokens > 0 {
            let rate = total.cached_tokens as f64 / total.prompt_tokens as f64 * 100.0;
            let _ = write!(out, ", {rate:.1}% cache hit rate");
        }
        if total.cost > 0.0 {
            let _ = write!(out, ", ${:.6}", total.cost);
        }
        out
    }
}
