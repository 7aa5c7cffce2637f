use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use fluux_actions::bridge::{ComplexityTier, ExecutionMode, StreamEvent, Task, TaskBridge};
use fluux_actions::browser::BrowserRunner;
use fluux_actions::config::{AgentLauncher, Config};
use fluux_actions::git::GitOperator;
use fluux_actions::session::{Dispatch, QueuedMessage, SessionGate, SessionRegistry};
use fluux_actions::skills::builtin::{code_task::format_result, register_builtins};
use fluux_actions::skills::SkillRegistry;
use fluux_actions::workspace::WorkspaceManager;

/// Session key used for one-shot runs from the command line.
const CLI_SESSION: &str = "cli";

const DEFAULT_CONFIG_PATH: &str = "config/actions.toml";

fn print_help() {
    println!(
        "\
fluux-actions v{}

Sandboxed action execution for Fluux Agent: coding tasks, git pushes and
browser automation.

USAGE:
    fluux-actions [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: {DEFAULT_CONFIG_PATH}]

OPTIONS:
    -h, --help           Print this help message and exit
    -V, --version        Print version and exit
        --task <PROMPT>  Run a single coding task and print the result
        --tier <TIER>    Task tier: simple, standard, complex [default: standard]
        --stream         Use the agent's streaming output (progress + turn count)

Without --task, runs the periodic workspace sweep until Ctrl-C.

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG              Log level filter for tracing
                          (e.g. debug, fluux_actions=debug,warn)
    ANTHROPIC_API_KEY     Forwarded to the coding agent (bridge.env_passthrough)
    GITHUB_TOKEN          Access token for git pushes and repo creation.
                          Never visible to the coding agent.

EXAMPLES:
    fluux-actions                                    # sweep, config/actions.toml
    fluux-actions --task \"add a README\" --tier simple
    RUST_LOG=debug fluux-actions /etc/fluux/actions.toml",
        env!("CARGO_PKG_VERSION"),
    );
}

#[derive(Debug, PartialEq)]
struct CliArgs {
    config_path: String,
    task: Option<String>,
    tier: ComplexityTier,
    stream: bool,
}

fn parse_args<I>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = CliArgs {
        config_path: DEFAULT_CONFIG_PATH.to_string(),
        task: None,
        tier: ComplexityTier::default(),
        stream: false,
    };
    let mut config_seen = false;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--task" => {
                let prompt = args.next().ok_or_else(|| anyhow!("--task needs a prompt"))?;
                parsed.task = Some(prompt);
            }
            "--tier" => {
                let tier = args.next().ok_or_else(|| anyhow!("--tier needs a value"))?;
                parsed.tier = ComplexityTier::from_name(&tier);
            }
            "--stream" => parsed.stream = true,
            other if other.starts_with('-') => bail!("Unknown option: {other}"),
            path => {
                if config_seen {
                    bail!("Unexpected argument: {path}");
                }
                parsed.config_path = path.to_string();
                config_seen = true;
            }
        }
    }

    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("fluux-actions v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    let args = parse_args(std::env::args().skip(1))?;

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fluux_actions=info")),
        )
        .init();

    info!("Loading configuration from {}", args.config_path);
    let config = Config::load(&args.config_path)?;

    info!("Workspaces: {}", config.workspace.root.display());
    info!(
        "Coding agent: {}{}",
        config.bridge.agent_command,
        config
            .bridge
            .model
            .as_deref()
            .map(|m| format!(" (model {m})"))
            .unwrap_or_default()
    );
    match config.bridge.launcher {
        AgentLauncher::Container => info!("Agent image: {}", config.bridge.image),
        AgentLauncher::Host => info!("Agent launcher: host"),
    }
    info!("Browser image: {}", config.browser.image);

    // Components shared by every session
    let workspaces = Arc::new(WorkspaceManager::new(config.workspace.root.clone()));
    let bridge = Arc::new(TaskBridge::new(config.bridge.clone(), Arc::clone(&workspaces)));
    let browser = Arc::new(BrowserRunner::new(config.browser.clone()));
    let git = config.git.clone().map(|git_config| {
        info!("Git: {} as {} <{}>", git_config.org_url, git_config.name, git_config.email);
        Arc::new(GitOperator::new(git_config))
    });
    if git.is_none() {
        info!("Git: not configured, git_push disabled");
    }

    let mut skills = SkillRegistry::new();
    register_builtins(&mut skills, Arc::clone(&bridge), git, browser);
    info!("Skills: {} registered ({})", skills.len(), skills.names().join(", "));

    let gate = SessionGate::new(Arc::new(SessionRegistry::new()));

    match args.task {
        Some(prompt) => {
            let mode = if args.stream {
                ExecutionMode::Streaming
            } else {
                ExecutionMode::Plain
            };
            run_once(&bridge, &gate, prompt, args.tier, mode).await
        }
        None => sweep_workspaces(&config, workspaces).await,
    }
}

/// Runs one task through the CLI session. Ctrl-C stops it the same way a
/// "stop" message from a chat would.
async fn run_once(
    bridge: &TaskBridge,
    gate: &SessionGate,
    prompt: String,
    tier: ComplexityTier,
    mode: ExecutionMode,
) -> Result<()> {
    let message = QueuedMessage::new(prompt.clone()).trusted();
    let run = match gate.dispatch(CLI_SESSION, message).await {
        Dispatch::Run(run) => run,
        other => bail!("CLI session not available: {other:?}"),
    };
    let cancel: CancellationToken = run.cancel_token().clone();

    let task = Task::new(prompt).with_tier(tier);
    let budget = tier.budget();
    info!(
        "Task {} ({tier}: {} turns, {}s)",
        task.id,
        budget.max_turns,
        budget.timeout.as_secs()
    );

    let progress = |event: StreamEvent| match event {
        StreamEvent::Thinking => debug!("Agent thinking"),
        StreamEvent::ToolUse { name } => info!("Agent using {name}"),
        StreamEvent::Complete => info!("Agent finished"),
    };

    let execution = bridge.execute(&task, mode, Some(&progress), &cancel);
    tokio::pin!(execution);

    let result = tokio::select! {
        result = &mut execution => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping task");
            gate.dispatch(CLI_SESSION, QueuedMessage::new("stop")).await;
            execution.await?
        }
    };
    let _ = run.next().await;

    println!("{}", format_result(&task.id, &result));

    if result.is_success() || result.was_cancelled() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

// ── Workspace sweep ────────────────────────────────────────────

/// Removes stale workspaces on a fixed interval until Ctrl-C.
async fn sweep_workspaces(config: &Config, workspaces: Arc<WorkspaceManager>) -> Result<()> {
    let max_age = config.workspace.max_age();
    let mut interval = tokio::time::interval(config.workspace.cleanup_interval());
    info!(
        "Sweeping workspaces older than {}h every {} min",
        config.workspace.max_age_hours,
        config.workspace.cleanup_interval().as_secs() / 60
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let manager = Arc::clone(&workspaces);
                match tokio::task::spawn_blocking(move || manager.cleanup_old(max_age)).await {
                    Ok(0) => debug!("Workspace sweep: nothing to remove"),
                    Ok(removed) => info!("Workspace sweep: removed {removed} workspace(s)"),
                    Err(e) => warn!("Workspace sweep failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, exiting");
                return Ok(());
            }
        }
    }
}
