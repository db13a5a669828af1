// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Read as _;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, Mutex};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, IsTerminal, OutputFormatArg, PackageCommands};
use turnkit_core::{Agent, AgentEvent, AgentRuntimeContext};
use turnkit_manifest::ManifestStore;
use turnkit_memory::MemoryLoader;
use turnkit_sandbox::os_sandbox::{OsSandboxBackend, SandboxOptions};
use turnkit_tools::{
    events::ToolEvent, DeleteFileTool, EditFileTool, FindFileTool, GrepTool, ListDirTool,
    PermissionChecker, ReadFileTool, ReadImageTool, RunTerminalCommandTool, SwitchModeTool,
    TodoItem, TodoWriteTool, ToolRegistry, WebFetchTool, WebSearchTool, WriteTool,
};

/// Exit codes per the agent's terminal state.
const EXIT_OK: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_BUDGET_EXCEEDED: i32 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(cmd) = &cli.command {
        return run_command(cmd, &cli).await;
    }

    let mut config = turnkit_config::load(cli.config.as_deref())?;
    if let Some(name) = &cli.model {
        if let Some(provider_cfg) = config.providers.get(name) {
            config.model = provider_cfg.clone();
        } else {
            config.model.name = name.clone();
        }
    }
    if let Some(mode) = cli.permission_mode {
        config.permission.mode = mode;
    }
    if let Some(max_turns) = cli.max_turns {
        config.agent.max_turns = max_turns;
    }
    config.agent.default_mode = cli.mode;

    let work_dir = cli
        .work_dir
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
    config.sandbox.work_dir = Some(work_dir.to_string_lossy().to_string());
    if cli.allow_network {
        config.sandbox.allow_network = true;
    }

    let prompt = resolve_prompt(&cli)?;
    if prompt.trim().is_empty() {
        anyhow::bail!("no prompt given — pass one as an argument or pipe it on stdin");
    }

    let mut agent = build_agent(&config).await?;
    let code = run_turn(&mut agent, &prompt, cli.output_format).await?;
    std::process::exit(code);
}

async fn run_command(cmd: &Commands, cli: &Cli) -> anyhow::Result<()> {
    match cmd {
        Commands::Completions { shell } => {
            cli::print_completions(*shell);
            Ok(())
        }
        Commands::ShowConfig => {
            let config = turnkit_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Commands::ListModels { provider, refresh, json } => {
            let config = turnkit_config::load(cli.config.as_deref())?;
            list_models(&config, provider.as_deref(), *refresh, *json).await
        }
        Commands::ListProviders { verbose, json } => list_providers(*verbose, *json),
        Commands::Package { command } => run_package_command(command),
    }
}

fn run_package_command(cmd: &PackageCommands) -> anyhow::Result<()> {
    let path = manifest_path();
    let store = ManifestStore::new(path);
    match cmd {
        PackageCommands::List => {
            let manifest = store.load()?;
            if manifest.packages.is_empty() {
                println!("No packages installed.");
                return Ok(());
            }
            for pkg in &manifest.packages {
                println!("{}  {}  {}  {}", pkg.name, pkg.version, pkg.source, pkg.path);
            }
            Ok(())
        }
        PackageCommands::Remove { name, local } => {
            if store.remove(name, *local)? {
                println!("removed {name}");
            } else {
                println!("no such package: {name}");
            }
            Ok(())
        }
    }
}

fn manifest_path() -> std::path::PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("turnkit")
        .join("packages.json")
}

/// Reads the prompt from argv, falling back to stdin when it is not a TTY.
fn resolve_prompt(cli: &Cli) -> anyhow::Result<String> {
    if let Some(p) = &cli.prompt {
        return Ok(p.clone());
    }
    if !std::io::stdin().is_terminal() {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
        return Ok(buf);
    }
    Ok(String::new())
}

/// Assemble a fully wired [`Agent`] from configuration: provider, sandboxed
/// builtin tools, and the mode-switch/todo event channel.
async fn build_agent(config: &turnkit_config::Config) -> anyhow::Result<Agent> {
    let model: Arc<dyn turnkit_model::ModelProvider> = Arc::from(turnkit_model::from_config(&config.model)?);
    let max_ctx = model.catalog_context_window().unwrap_or(128_000) as usize;

    let mode = Arc::new(Mutex::new(config.agent.default_mode));
    let (tool_tx, tool_rx) = mpsc::channel::<ToolEvent>(64);
    let todos: Arc<Mutex<Vec<TodoItem>>> = Arc::new(Mutex::new(Vec::new()));

    let project_root = config
        .sandbox
        .work_dir
        .clone()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
    let sandbox_opts = SandboxOptions {
        work_dir: project_root.clone(),
        additional_dirs: config.sandbox.additional_dirs.iter().map(std::path::PathBuf::from).collect(),
        allow_network: config.sandbox.allow_network,
        allowed_domains: config.sandbox.allowed_domains.clone(),
        excluded_cmds: config.sandbox.excluded_cmds.clone(),
    };

    let mut registry = ToolRegistry::new();
    registry.register(RunTerminalCommandTool {
        timeout_secs: config.tools.shell_timeout_secs,
        backend: OsSandboxBackend::for_current_os(),
        sandbox: sandbox_opts,
    });
    registry.register(ReadFileTool::new(config.agent.read_file_max_bytes));
    registry.register(ReadImageTool::new(config.agent.read_image_max_bytes));
    registry.register(WriteTool);
    registry.register(EditFileTool::new(config.agent.edit_fuzzy_threshold));
    registry.register(FindFileTool);
    registry.register(GrepTool);
    registry.register(ListDirTool);
    registry.register(DeleteFileTool);
    registry.register(WebFetchTool {
        allowed_domains: config.sandbox.allowed_domains.clone(),
    });
    registry.register(WebSearchTool {
        api_key: config.tools.web.search.api_key.clone(),
    });
    registry.register(TodoWriteTool::new(todos, tool_tx.clone()));
    registry.register(SwitchModeTool::new(mode.clone(), tool_tx));
    tracing::debug!(tool_count = registry.len(), "tool registry built");

    let home_dir = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
    let memory_entries = MemoryLoader::new(project_root.clone(), home_dir)
        .load(&[])
        .await
        .unwrap_or_default();

    let runtime = AgentRuntimeContext {
        project_root: Some(project_root.clone()),
        memory_entries,
        ..AgentRuntimeContext::default()
    };
    let permission = Arc::new(PermissionChecker::new(
        &config.permission.rules,
        config.permission.mode,
    ));
    let sandbox = Arc::new(turnkit_sandbox::PathSandbox::new(
        project_root.clone(),
        config.sandbox.additional_dirs.iter().map(std::path::PathBuf::from).collect(),
    ));
    let agent = Agent::new(
        model.clone(),
        Arc::new(registry),
        Arc::new(config.agent.clone()),
        permission,
        sandbox,
        runtime,
        mode,
        tool_rx,
        max_ctx,
    );
    let agent = if config.agent.context_transform_enabled {
        agent.with_context_transform(Arc::new(turnkit_core::DistributorTransform::new(
            model,
            config.agent.context_transform_max_workers,
            config.agent.context_transform_keep_recent,
        )))
    } else {
        agent
    };
    Ok(agent)
}

/// Submit one prompt and stream the resulting [`AgentEvent`]s to stdout.
/// Returns the process exit code for the run's terminal state.
async fn run_turn(agent: &mut Agent, prompt: &str, format: OutputFormatArg) -> anyhow::Result<i32> {
    let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
    let submit = agent.submit(prompt, tx);

    let mut saw_error = false;
    let mut budget_exceeded = false;
    let drain = async {
        while let Some(event) = rx.recv().await {
            match format {
                OutputFormatArg::Jsonl => {
                    if let Ok(line) = serde_json::to_string(&event_to_json(&event)) {
                        println!("{line}");
                    }
                }
                OutputFormatArg::Text => render_text(&event),
            }
            match &event {
                AgentEvent::Error(msg) => {
                    saw_error = true;
                    if msg.contains("turn limit") || msg.contains("budget") {
                        budget_exceeded = true;
                    }
                }
                AgentEvent::TurnComplete => break,
                _ => {}
            }
        }
        (saw_error, budget_exceeded)
    };

    let (result, (saw_error, budget_exceeded)) = tokio::join!(submit, drain);
    result?;

    Ok(if budget_exceeded {
        EXIT_BUDGET_EXCEEDED
    } else if saw_error {
        EXIT_ERROR
    } else {
        EXIT_OK
    })
}

fn render_text(event: &AgentEvent) {
    use std::io::Write as _;
    match event {
        AgentEvent::TextDelta(chunk) => {
            print!("{chunk}");
            let _ = std::io::stdout().flush();
        }
        AgentEvent::ToolCallStarted(call) => {
            eprintln!("\n[tool] {} {}", call.name, call.args);
        }
        AgentEvent::ToolCallFinished { tool_name, is_error, .. } if *is_error => {
            eprintln!("[tool:error] {tool_name}");
        }
        AgentEvent::ContextCompacted { tokens_before, tokens_after, .. } => {
            eprintln!("[compacted] {tokens_before} -> {tokens_after} tokens");
        }
        AgentEvent::Error(msg) => {
            eprintln!("\n[error] {msg}");
        }
        AgentEvent::TurnComplete => {
            println!();
        }
        _ => {}
    }
}

fn event_to_json(event: &AgentEvent) -> serde_json::Value {
    serde_json::json!({ "event": format!("{event:?}") })
}

async fn list_models(
    config: &turnkit_config::Config,
    provider_filter: Option<&str>,
    refresh: bool,
    as_json: bool,
) -> anyhow::Result<()> {
    if let Some(prov) = provider_filter {
        if turnkit_model::get_driver(prov).is_none() {
            eprintln!("Unknown provider: {prov:?}");
            anyhow::bail!("invalid provider: {prov}");
        }
    }

    let entries = if refresh {
        let mut model_cfg = config.model.clone();
        if let Some(prov) = provider_filter {
            model_cfg.provider = prov.to_string();
        }
        let model = turnkit_model::from_config(&model_cfg)?;
        let mut live = model.list_models().await?;
        if let Some(prov) = provider_filter {
            live.retain(|e| e.provider == prov);
        }
        live
    } else {
        let mut all = turnkit_model::catalog::static_catalog();
        if let Some(prov) = provider_filter {
            all.retain(|e| e.provider == prov);
        }
        all.sort_by(|a, b| a.provider.cmp(&b.provider).then(a.id.cmp(&b.id)));
        all
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No models found.");
        return Ok(());
    }
    for e in &entries {
        let thinking = if e.supports_extended_thinking { " [thinking]" } else { "" };
        println!("{:<30}  {:<10}  ctx={}{thinking}", e.id, e.provider, e.context_window);
    }
    Ok(())
}

fn list_providers(verbose: bool, as_json: bool) -> anyhow::Result<()> {
    let drivers = turnkit_model::list_drivers();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&drivers.iter().map(|d| d.id).collect::<Vec<_>>())?);
        return Ok(());
    }
    for d in drivers {
        if verbose {
            println!("{} — {}\n  {}", d.id, d.name, d.description);
        } else {
            println!("{:<12} {}", d.id, d.name);
        }
    }
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
