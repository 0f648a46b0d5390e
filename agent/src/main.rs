//! Workspace agent CLI.
//!
//! Runs a top-level agent with the read-only workspace tools and
//! `delegate_task` against an OpenAI-compatible completion endpoint.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent::core::coerce::OutputSchema;
use agent::core::todos::TodoList;
use agent::delegate::{DELEGATE_TOOL_NAME, DelegateSettings, DelegateTool};
use agent::engine::{Agent, AgentConfig, RunOutput};
use agent::exit_codes;
use agent::io::completion::CompletionClient;
use agent::io::config::{AgentSettings, DEFAULT_CONFIG_FILE, load_config};
use agent::io::context::gather_repo_context;
use agent::io::openai::OpenAiClient;
use agent::io::prompt::{render_system_prompt, render_task_prompt};
use agent::io::usage::UsageTracker;
use agent::logging;
use agent::tools::fs::workspace_tools;
use agent::tools::pseudo::{StatusEvent, StatusSink};
use agent::tools::registry::ToolRegistry;
use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "agent",
    version,
    about = "Round-based LLM agent over a workspace"
)]
struct Cli {
    /// Log this crate's debug events to stderr (`RUST_LOG` overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an agent on a task and print its final answer.
    Run(RunArgs),
    /// Print the tool catalog offered to the top-level agent.
    Tools(ToolsArgs),
}

#[derive(Args)]
struct WorkspaceArgs {
    /// Workspace directory the tools are rooted at.
    #[arg(short = 'C', long = "dir", default_value = ".")]
    dir: PathBuf,

    /// Config file, relative to the workspace unless absolute.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    workspace: WorkspaceArgs,

    /// Task description.
    #[arg(long, required_unless_present = "task_file", conflicts_with = "task_file")]
    task: Option<String>,

    /// Read the task description from a file.
    #[arg(long)]
    task_file: Option<PathBuf>,

    /// JSON Schema the final answer must satisfy.
    #[arg(long)]
    output_schema: Option<PathBuf>,

    #[arg(long, env = "AGENT_MODEL")]
    model: Option<String>,

    #[arg(long, env = "AGENT_DELEGATE_MODEL")]
    delegate_model: Option<String>,

    #[arg(long, env = "COMPLETIONS_ENDPOINT")]
    endpoint: Option<String>,

    /// Bearer token; defaults to the variable named by `api_key_env`.
    #[arg(long)]
    api_key: Option<String>,

    #[arg(long)]
    max_rounds: Option<u32>,

    /// Do not offer `delegate_task`.
    #[arg(long)]
    no_delegation: bool,
}

#[derive(Args)]
struct ToolsArgs {
    #[command(flatten)]
    workspace: WorkspaceArgs,

    /// Print descriptors as JSON.
    #[arg(long)]
    json: bool,
}

/// Prints status updates to stderr, next to the tracing output.
struct StderrSink;

impl StatusSink for StderrSink {
    fn emit(&self, event: StatusEvent) {
        match event {
            StatusEvent::Message { agent, msg } => eprintln!("[{agent}] {msg}"),
            StatusEvent::TodosUpdated { agent, todos } => {
                let mut list = TodoList::default();
                list.replace(todos);
                eprintln!("[{agent}] TODO list:\n{}", list.render());
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli).await {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::for_error(&err)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => cmd_run(args).await,
        Command::Tools(args) => cmd_tools(&args),
    }
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let root = workspace_root(&args.workspace.dir)?;
    let mut settings = load_config(&config_path(&root, &args.workspace.config))?;
    apply_overrides(&mut settings, &args);
    settings.validate()?;

    let api_key = match &args.api_key {
        Some(key) => key.clone(),
        None => settings.api_key_from_env()?,
    };
    let task = match (&args.task, &args.task_file) {
        (Some(task), _) => task.clone(),
        (None, Some(path)) => {
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
        }
        (None, None) => bail!("either --task or --task-file is required"),
    };
    if task.trim().is_empty() {
        bail!("task must be non-empty");
    }
    let output_schema = args
        .output_schema
        .as_deref()
        .map(load_output_schema)
        .transpose()?;

    let usage = Arc::new(UsageTracker::new());
    let client: Arc<dyn CompletionClient> =
        Arc::new(OpenAiClient::new(&settings.endpoint, api_key)?.with_usage(usage.clone()));
    let sink: Arc<dyn StatusSink> = Arc::new(StderrSink);
    let repo_context = gather_repo_context(&root);

    let registry = build_registry(&root, &settings, client.clone(), sink.clone(), &repo_context)?;
    let system_prompt = render_system_prompt(&registry.names(), output_schema.is_some())?;
    let mut config = AgentConfig::new("main", &settings.model, system_prompt, registry)
        .with_max_rounds(settings.max_rounds)
        .with_todo_reminders(settings.todo_reminders);
    config.max_concurrent_tools = settings.max_concurrent_tools;
    config.tool_output_limit_bytes = settings.tool_output_limit_bytes;
    if let Some(schema) = output_schema {
        config = config.with_output_schema(schema);
    }

    let prompt = render_task_prompt(&task, Some(&repo_context))?;
    let mut agent = Agent::new(config, client).with_status_sink(sink);
    let outcome = agent.run(&prompt).await;
    eprintln!("{}", usage.summary());

    match outcome? {
        RunOutput::Structured(value) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&value).context("serialize output")?
            );
        }
        RunOutput::Text(text) => println!("{text}"),
    }
    Ok(())
}

fn cmd_tools(args: &ToolsArgs) -> Result<()> {
    let root = workspace_root(&args.workspace.dir)?;
    let settings = load_config(&config_path(&root, &args.workspace.config))?;
    // Never called: listing only needs the catalog.
    let client: Arc<dyn CompletionClient> = Arc::new(OpenAiClient::new(&settings.endpoint, "")?);
    let registry = build_registry(&root, &settings, client, Arc::new(StderrSink), "")?;

    if args.json {
        let descriptors = registry.descriptors();
        println!(
            "{}",
            serde_json::to_string_pretty(&descriptors).context("serialize descriptors")?
        );
        return Ok(());
    }
    for spec in registry.specs() {
        let kind = if spec.is_pseudo() { " (pseudo)" } else { "" };
        println!("{}{kind}\n    {}", spec.name(), spec.description());
    }
    Ok(())
}

/// Workspace tools, plus `delegate_task` when delegation depth allows it.
fn build_registry(
    root: &Path,
    settings: &AgentSettings,
    client: Arc<dyn CompletionClient>,
    sink: Arc<dyn StatusSink>,
    repo_context: &str,
) -> Result<ToolRegistry> {
    let base = ToolRegistry::builder()
        .tools(workspace_tools(root)?)
        .build()?;
    if settings.delegation_depth == 0 {
        return Ok(base);
    }

    let mut child_tools = base.names();
    if settings.delegation_depth > 1 {
        child_tools.push(DELEGATE_TOOL_NAME);
    }
    let delegate = DelegateTool::new(
        client,
        &base,
        DelegateSettings {
            name: "delegate".to_string(),
            model: settings.delegate_model.clone(),
            system_prompt: render_system_prompt(&child_tools, false)?,
            max_rounds: settings.delegate_max_rounds,
            depth: settings.delegation_depth,
            shared_context: Some(repo_context.to_string()).filter(|c| !c.trim().is_empty()),
            todo_reminders: settings.todo_reminders,
            max_concurrent_tools: settings.max_concurrent_tools,
            tool_output_limit_bytes: settings.tool_output_limit_bytes,
        },
    )
    .with_status_sink(sink);
    base.with(delegate.into_spec()?)
}

fn apply_overrides(settings: &mut AgentSettings, args: &RunArgs) {
    if let Some(model) = &args.model {
        settings.model = model.clone();
    }
    if let Some(model) = &args.delegate_model {
        settings.delegate_model = model.clone();
    }
    if let Some(endpoint) = &args.endpoint {
        settings.endpoint = endpoint.clone();
    }
    if let Some(max_rounds) = args.max_rounds {
        settings.max_rounds = max_rounds;
    }
    if args.no_delegation {
        settings.delegation_depth = 0;
    }
}

fn workspace_root(dir: &Path) -> Result<PathBuf> {
    let root = dir
        .canonicalize()
        .with_context(|| format!("resolve workspace {}", dir.display()))?;
    if !root.is_dir() {
        bail!("workspace {} is not a directory", root.display());
    }
    debug!(root = %root.display(), "workspace resolved");
    Ok(root)
}

fn config_path(root: &Path, config: &Path) -> PathBuf {
    if config.is_absolute() {
        config.to_path_buf()
    } else {
        root.join(config)
    }
}

/// Load a JSON Schema file; the schema is named after the file stem.
fn load_output_schema(path: &Path) -> Result<OutputSchema> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let schema: Value =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.trim_end_matches(".schema"))
        .filter(|stem| !stem.is_empty())
        .unwrap_or("output");
    OutputSchema::new(name, schema)
}
