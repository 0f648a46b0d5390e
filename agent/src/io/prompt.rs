//! Prompt templates for the agent runtime.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::todos::TodoList;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const TASK_TEMPLATE: &str = include_str!("prompts/task.md");
const DELEGATE_TEMPLATE: &str = include_str!("prompts/delegate.md");
const TODO_REMINDER_TEMPLATE: &str = include_str!("prompts/todo_reminder.md");

static ENGINE: LazyLock<PromptEngine> = LazyLock::new(PromptEngine::new);

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .expect("system template should be valid");
        env.add_template("task", TASK_TEMPLATE)
            .expect("task template should be valid");
        env.add_template("delegate", DELEGATE_TEMPLATE)
            .expect("delegate template should be valid");
        env.add_template("todo_reminder", TODO_REMINDER_TEMPLATE)
            .expect("todo reminder template should be valid");
        Self { env }
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(ctx)
            .with_context(|| format!("render {name} prompt"))?;
        Ok(rendered.trim().to_string())
    }
}

/// Default system prompt for a workspace agent.
pub fn render_system_prompt(tools: &[&str], structured: bool) -> Result<String> {
    ENGINE.render(
        "system",
        context! {
            tools => tools,
            delegation => tools.contains(&"delegate_task"),
            structured => structured,
        },
    )
}

/// Initial user turn for a top-level run.
pub fn render_task_prompt(task: &str, repo_context: Option<&str>) -> Result<String> {
    ENGINE.render(
        "task",
        context! {
            task => task.trim(),
            context => non_empty(repo_context),
        },
    )
}

/// Initial user turn for a delegated child agent.
pub fn render_delegate_prompt(description: &str, repo_context: Option<&str>) -> Result<String> {
    ENGINE.render(
        "delegate",
        context! {
            description => description.trim(),
            context => non_empty(repo_context),
        },
    )
}

/// System turn summarising the TODO list, appended before each completion.
pub fn render_todo_reminder(todos: &TodoList) -> Result<String> {
    ENGINE.render("todo_reminder", context! { todos => todos.items() })
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|s| !s.is_empty())
}
