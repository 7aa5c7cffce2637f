//! Task bridge: runs a coding task through an external coding agent.
//!
//! Lifecycle of one task:
//!
//!   Created -> WorkspaceReady -> ContextWritten -> Executing
//!           -> Completed | TimedOut | Failed | Cancelled
//!
//! Only the first two transitions can fail structurally (`BridgeError`).
//! Everything that goes wrong once the agent is running is reported inside
//! the `TaskResult`, together with whatever output was produced so far.

mod context;
mod stream;
mod task;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{AgentLauncher, BridgeConfig};
use crate::sandbox::{
    container_name, run_lines, untrusted_command, ContainerEngine, SandboxEnv, Termination,
    ENGINE_ENV,
};
use crate::sanitize::OutputSanitizer;
use crate::workspace::{Workspace, WorkspaceManager};

pub use context::{write_context, CONTEXT_FILE};
pub use stream::{ProgressFn, StreamEvent};
pub use task::{ComplexityTier, MemoryContext, Task, TierBudget};

use stream::StreamCollector;

/// Structural failures: the task never reached the agent.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to create workspace for task {task_id}: {source}")]
    Workspace {
        task_id: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write context for task {task_id}: {source}")]
    Context {
        task_id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Why a task that reached the agent did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskFailure {
    #[error("{0}")]
    Execution(String),
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

/// Outcome of one agent run.
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Sanitized agent output
    pub output: String,
    /// Files in the workspace, relative to it
    pub files: Vec<PathBuf>,
    pub workspace: PathBuf,
    /// Agent turns, as reported in streaming mode (0 otherwise)
    pub turns_used: u32,
    pub duration: Duration,
    pub warnings: Vec<String>,
    pub sanitized: bool,
    pub error: Option<TaskFailure>,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.error, Some(TaskFailure::Timeout(_)))
    }

    pub fn was_cancelled(&self) -> bool {
        matches!(self.error, Some(TaskFailure::Cancelled))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Plain text on stdout
    #[default]
    Plain,
    /// Line-delimited JSON events with progress callbacks
    Streaming,
}

/// Mount point of the workspace inside the agent container.
const CONTAINER_WORKDIR: &str = "/workspace";

/// Variables of the base allow-list that describe the host, not the
/// container, and are never forwarded into it.
const HOST_DESCRIBING_VARS: &[&str] = &["PATH", "HOME", "USER", "TMPDIR"];

/// How the agent process is started.
enum Launcher {
    Container(ContainerEngine),
    Host(SandboxEnv),
}

pub struct TaskBridge {
    config: BridgeConfig,
    workspaces: Arc<WorkspaceManager>,
    sanitizer: OutputSanitizer,
    launcher: Launcher,
}

impl TaskBridge {
    pub fn new(config: BridgeConfig, workspaces: Arc<WorkspaceManager>) -> Self {
        let launcher = match config.launcher {
            AgentLauncher::Container => Launcher::Container(ContainerEngine::new(
                &config.docker_command,
                &config.env_passthrough,
            )),
            AgentLauncher::Host => {
                warn!("Coding agent runs directly on the host and can read this process's environment");
                Launcher::Host(SandboxEnv::from_host(&config.env_passthrough))
            }
        };
        let sanitizer = OutputSanitizer::new(config.max_output_chars);
        Self {
            config,
            workspaces,
            sanitizer,
            launcher,
        }
    }

    pub fn workspaces(&self) -> &Arc<WorkspaceManager> {
        &self.workspaces
    }

    /// Runs `task` in a fresh workspace.
    pub async fn execute(
        &self,
        task: &Task,
        mode: ExecutionMode,
        progress: Option<&ProgressFn<'_>>,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, BridgeError> {
        let workspace = self
            .workspaces
            .create(&task.id)
            .map_err(|source| BridgeError::Workspace {
                task_id: task.id.clone(),
                source,
            })?;
        self.execute_in(&workspace, task, mode, progress, cancel).await
    }

    /// Runs `task` in an existing workspace (follow-up on earlier work).
    pub async fn execute_in(
        &self,
        workspace: &Workspace,
        task: &Task,
        mode: ExecutionMode,
        progress: Option<&ProgressFn<'_>>,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, BridgeError> {
        write_context(&workspace.path, task, &self.config.allowed_tools).map_err(|source| {
            BridgeError::Context {
                task_id: task.id.clone(),
                source,
            }
        })?;

        let budget = task.tier.budget();
        let args = build_agent_args(&self.config, task, mode, budget.max_turns);
        info!(
            task_id = %task.id,
            tier = %task.tier,
            "Starting coding agent: {}",
            truncate(&task.prompt, 80)
        );

        let started = Instant::now();
        let (raw_output, turns_used, error) = match &self.launcher {
            Launcher::Host(env) => {
                let spawned =
                    untrusted_command(&self.config.agent_command, &args, Some(&workspace.path), env)
                        .spawn();
                match spawned {
                    Ok(child) => self.supervise(child, mode, budget, progress, cancel).await,
                    Err(e) => spawn_failure(&self.config.agent_command, e),
                }
            }
            Launcher::Container(engine) => {
                let name = container_name("agent");
                let container_args = agent_container_args(
                    &self.config,
                    &workspace.path,
                    &name,
                    engine.env(),
                    &args,
                );
                match engine.command(&container_args).and_then(|mut cmd| cmd.spawn()) {
                    Ok(child) => {
                        let outcome = self.supervise(child, mode, budget, progress, cancel).await;
                        if matches!(
                            outcome.2,
                            Some(TaskFailure::Timeout(_) | TaskFailure::Cancelled)
                        ) {
                            engine.kill(&name).await;
                        }
                        outcome
                    }
                    Err(e) => spawn_failure(engine.program(), e),
                }
            }
        };
        let duration = started.elapsed();

        let clean = self.sanitizer.sanitize(&raw_output);
        let files = self.workspaces.collect_files(workspace);

        match &error {
            None => info!(
                task_id = %task.id,
                "Task completed in {:.1}s ({} files, {turns_used} turns)",
                duration.as_secs_f64(),
                files.len()
            ),
            Some(failure) => warn!(task_id = %task.id, "Task ended early: {failure}"),
        }

        Ok(TaskResult {
            output: clean.text,
            files,
            workspace: workspace.path.clone(),
            turns_used,
            duration,
            warnings: clean.warnings,
            sanitized: clean.sanitized,
            error,
        })
    }

    async fn supervise(
        &self,
        child: tokio::process::Child,
        mode: ExecutionMode,
        budget: TierBudget,
        progress: Option<&ProgressFn<'_>>,
        cancel: &CancellationToken,
    ) -> (String, u32, Option<TaskFailure>) {
        let mut lines = Vec::new();
        let mut collector = StreamCollector::default();

        let termination = run_lines(
            child,
            "coding agent",
            budget.timeout,
            cancel,
            |line| match mode {
                ExecutionMode::Plain => lines.push(line.to_string()),
                ExecutionMode::Streaming => collector.feed(line, progress),
            },
        )
        .await;

        let (output, turns) = match mode {
            ExecutionMode::Plain => (lines.join("\n"), 0),
            ExecutionMode::Streaming => (collector.output(), collector.turns.unwrap_or(0)),
        };

        let error = match termination {
            Ok(Termination::Exited(status)) if status.success() => collector
                .reported_error
                .take()
                .map(|kind| TaskFailure::Execution(format!("agent reported {kind}"))),
            Ok(Termination::Exited(status)) => Some(TaskFailure::Execution(match status.code() {
                Some(code) => format!("agent exited with code {code}"),
                None => "agent terminated by signal".to_string(),
            })),
            Ok(Termination::TimedOut) => Some(TaskFailure::Timeout(budget.timeout)),
            Ok(Termination::Cancelled) => Some(TaskFailure::Cancelled),
            Err(e) => Some(TaskFailure::Execution(format!("agent I/O error: {e}"))),
        };

        (output, turns, error)
    }
}

/// Arguments for the coding agent: configured prefix, then the prompt and
/// budget, then mode-specific flags.
pub fn build_agent_args(
    config: &BridgeConfig,
    task: &Task,
    mode: ExecutionMode,
    max_turns: u32,
) -> Vec<String> {
    let mut prompt = task.prompt.clone();
    if task.has_context() {
        prompt.push_str(&format!(
            "\n\nRead {CONTEXT_FILE} in the working directory for background on this task."
        ));
    }

    let mut args = config.agent_args.clone();
    args.extend(["-p".to_string(), prompt]);
    args.extend(["--max-turns".to_string(), max_turns.to_string()]);
    if let Some(ref model) = config.model {
        args.extend(["--model".to_string(), model.clone()]);
    }
    if mode == ExecutionMode::Streaming {
        args.extend([
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ]);
    }
    args
}

/// `docker run` arguments for one agent run.
///
/// Only the workspace is mounted. The container runs as the workspace's
/// owner so files it writes stay usable on the host, and receives the
/// passthrough variables (copied from the engine client by name) plus a
/// writable `HOME`.
pub fn agent_container_args(
    config: &BridgeConfig,
    workspace: &Path,
    name: &str,
    env: &SandboxEnv,
    agent_args: &[String],
) -> Vec<String> {
    let mut args: Vec<String> = ["run", "--rm", "--name", name]
        .into_iter()
        .map(str::to_string)
        .collect();
    args.extend([
        "--cap-drop".to_string(),
        "ALL".to_string(),
        "--security-opt".to_string(),
        "no-new-privileges".to_string(),
        "-v".to_string(),
        format!("{}:{CONTAINER_WORKDIR}", workspace.display()),
        "-w".to_string(),
        CONTAINER_WORKDIR.to_string(),
    ]);
    if let Some((uid, gid)) = owner_of(workspace) {
        args.extend(["--user".to_string(), format!("{uid}:{gid}")]);
    }
    args.extend(["-e".to_string(), "HOME=/tmp".to_string()]);
    for key in env
        .keys()
        .filter(|k| !HOST_DESCRIBING_VARS.contains(k) && !ENGINE_ENV.contains(k))
    {
        args.extend(["-e".to_string(), key.to_string()]);
    }
    args.push(config.image.clone());
    args.push(config.agent_command.clone());
    args.extend(agent_args.iter().cloned());
    args
}

#[cfg(unix)]
fn owner_of(path: &Path) -> Option<(u32, u32)> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path).ok().map(|m| (m.uid(), m.gid()))
}

#[cfg(not(unix))]
fn owner_of(_path: &Path) -> Option<(u32, u32)> {
    None
}

fn spawn_failure(program: &str, e: std::io::Error) -> (String, u32, Option<TaskFailure>) {
    (
        String::new(),
        0,
        Some(TaskFailure::Execution(format!("failed to start {program}: {e}"))),
    )
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Bridge whose "agent" is a shell script; generated args land in $@.
    fn sh_bridge(root: &std::path::Path, script: &str) -> TaskBridge {
        let config = BridgeConfig {
            launcher: AgentLauncher::Host,
            agent_command: "/bin/sh".to_string(),
            agent_args: vec!["-c".to_string(), script.to_string(), "agent".to_string()],
            env_passthrough: vec![],
            ..BridgeConfig::default()
        };
        TaskBridge::new(config, Arc::new(WorkspaceManager::new(root)))
    }

    // ── Argument building ───────────────────────────────

    #[test]
    fn test_args_plain() {
        let config = BridgeConfig::default();
        let task = Task::new("fix the bug");
        let args = build_agent_args(&config, &task, ExecutionMode::Plain, 25);
        assert_eq!(args, vec!["-p", "fix the bug", "--max-turns", "25"]);
    }

    #[test]
    fn test_args_streaming_with_model_and_context() {
        let config = BridgeConfig {
            agent_args: vec!["--dangerously-skip-nothing".to_string()],
            model: Some("sonnet".to_string()),
            ..BridgeConfig::default()
        };
        let task = Task::new("build it").with_hints("use tokio");
        let args = build_agent_args(&config, &task, ExecutionMode::Streaming, 50);

        assert_eq!(args[0], "--dangerously-skip-nothing");
        assert_eq!(args[1], "-p");
        assert!(args[2].starts_with("build it"));
        assert!(args[2].contains(CONTEXT_FILE));
        let tail = &args[3..];
        assert_eq!(
            tail,
            ["--max-turns", "50", "--model", "sonnet", "--output-format", "stream-json", "--verbose"]
        );
    }

    #[test]
    fn test_agent_container_args() {
        let config = BridgeConfig::default();
        let env = SandboxEnv::from_lookup(
            &["ANTHROPIC_API_KEY".to_string(), "DOCKER_HOST".to_string()],
            |k| match k {
                "PATH" => Some("/usr/bin".to_string()),
                "HOME" => Some("/home/fluux".to_string()),
                "LANG" => Some("C.UTF-8".to_string()),
                "ANTHROPIC_API_KEY" => Some("sk-ant-1".to_string()),
                "DOCKER_HOST" => Some("unix:///run/docker.sock".to_string()),
                _ => None,
            },
        );
        let agent_args = vec!["-p".to_string(), "go".to_string()];
        let args = agent_container_args(
            &config,
            Path::new("/srv/ws/t1"),
            "fluux-agent-1",
            &env,
            &agent_args,
        );

        assert_eq!(&args[..4], ["run", "--rm", "--name", "fluux-agent-1"]);
        let mount = args.iter().position(|a| a == "-v").unwrap();
        assert_eq!(args[mount + 1], "/srv/ws/t1:/workspace");
        let workdir = args.iter().position(|a| a == "-w").unwrap();
        assert_eq!(args[workdir + 1], "/workspace");
        assert!(args.windows(2).any(|w| w == ["-e", "ANTHROPIC_API_KEY"]));
        assert!(args.windows(2).any(|w| w == ["-e", "LANG"]));
        assert!(args.windows(2).any(|w| w == ["-e", "HOME=/tmp"]));
        // Host paths and engine settings stay out of the container
        assert!(!args.iter().any(|a| a == "PATH" || a == "DOCKER_HOST"));
        // Values travel through the engine's environment, not the command line
        assert!(!args.iter().any(|a| a.contains("sk-ant-1")));
        assert_eq!(
            &args[args.len() - 4..],
            ["fluux-coding-agent:latest", "claude", "-p", "go"]
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("héllo wörld", 5), "héllo...");
    }

    // ── Execution ───────────────────────────────────────

    #[tokio::test]
    async fn test_plain_success_collects_files() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = sh_bridge(dir.path(), "echo hello; echo world; echo data > out.txt");
        let task = Task::new("write out.txt").with_id("plain-1");

        let result = bridge
            .execute(&task, ExecutionMode::Plain, None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.output, "hello\nworld");
        assert_eq!(result.files, vec![PathBuf::from("out.txt")]);
        assert_eq!(result.turns_used, 0);
        assert!(result.workspace.join(CONTEXT_FILE).exists());
        assert!(result.workspace.join(".claude/settings.json").exists());
    }

    #[tokio::test]
    async fn test_agent_receives_generated_args() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = sh_bridge(dir.path(), r#"printf '%s|%s|%s|%s\n' "$1" "$2" "$3" "$4""#);
        let task = Task::new("go")
            .with_id("args-1")
            .with_tier(ComplexityTier::Simple);

        let result = bridge
            .execute(&task, ExecutionMode::Plain, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.output, "-p|go|--max-turns|10");
    }

    #[tokio::test]
    async fn test_non_zero_exit_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = sh_bridge(dir.path(), "echo partial; exit 3");
        let task = Task::new("fail").with_id("fail-1");

        let result = bridge
            .execute(&task, ExecutionMode::Plain, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.output, "partial");
        assert_eq!(
            result.error,
            Some(TaskFailure::Execution("agent exited with code 3".to_string()))
        );
        assert!(!result.is_timeout());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig {
            launcher: AgentLauncher::Host,
            agent_command: "/nonexistent/coding-agent".to_string(),
            ..BridgeConfig::default()
        };
        let bridge = TaskBridge::new(config, Arc::new(WorkspaceManager::new(dir.path())));

        let result = bridge
            .execute(&Task::new("x"), ExecutionMode::Plain, None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(result.error, Some(TaskFailure::Execution(ref m)) if m.contains("failed to start")));
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_kills_agent() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = sh_bridge(dir.path(), "echo started; sleep 30; echo never");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let result = bridge
            .execute(&Task::new("slow"), ExecutionMode::Plain, None, &cancel)
            .await
            .unwrap();

        assert!(result.was_cancelled());
        assert_eq!(result.output, "started");
        assert!(result.duration < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_streaming_events_and_turns() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"cat <<'EOF'
{"type":"system","subtype":"init"}
{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Write","input":{}},{"type":"text","text":"hi"}]}}
garbage line
{"type":"result","subtype":"success","is_error":false,"num_turns":3,"result":"done"}
EOF"#;
        let bridge = sh_bridge(dir.path(), script);
        let events = Mutex::new(Vec::new());

        let result = {
            let progress = |e: StreamEvent| events.lock().unwrap().push(e);
            bridge
                .execute(
                    &Task::new("stream"),
                    ExecutionMode::Streaming,
                    Some(&progress),
                    &CancellationToken::new(),
                )
                .await
                .unwrap()
        };

        assert!(result.is_success());
        assert_eq!(result.output, "hi");
        assert_eq!(result.turns_used, 3);
        assert_eq!(
            events.into_inner().unwrap(),
            vec![
                StreamEvent::Thinking,
                StreamEvent::ToolUse { name: "Write".to_string() },
                StreamEvent::Complete,
            ]
        );
    }

    #[tokio::test]
    async fn test_streaming_reported_error_fails_task() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"echo '{"type":"result","subtype":"error_max_turns","is_error":true,"num_turns":10}'"#;
        let bridge = sh_bridge(dir.path(), script);

        let result = bridge
            .execute(&Task::new("x"), ExecutionMode::Streaming, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            result.error,
            Some(TaskFailure::Execution("agent reported error_max_turns".to_string()))
        );
        assert_eq!(result.turns_used, 10);
    }

    #[tokio::test]
    async fn test_output_is_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let token = format!("ghp_{}", "b".repeat(36));
        let bridge = sh_bridge(dir.path(), &format!("echo 'found {token}'"));

        let result = bridge
            .execute(&Task::new("x"), ExecutionMode::Plain, None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.output.contains(&token));
        assert!(result.sanitized);
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_host_secrets_not_inherited() {
        std::env::set_var("FLUUX_BRIDGE_TEST_SECRET", "leaky");
        let dir = tempfile::tempdir().unwrap();
        let bridge = sh_bridge(dir.path(), r#"echo "secret=${FLUUX_BRIDGE_TEST_SECRET:-unset}""#);

        let result = bridge
            .execute(&Task::new("x"), ExecutionMode::Plain, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.output, "secret=unset");
    }

    #[tokio::test]
    async fn test_workspace_failure_is_structural() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        let bridge = sh_bridge(&blocker, "true");

        let err = bridge
            .execute(&Task::new("x"), ExecutionMode::Plain, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Workspace { .. }));
    }

    // ── Container launcher (fake engine) ────────────────

    /// Bridge using the default container launcher, with `sh <engine>` as
    /// the container engine.
    fn container_bridge(root: &std::path::Path, engine: &str) -> TaskBridge {
        let script = root.join("engine.sh");
        std::fs::write(&script, engine).unwrap();
        let config = BridgeConfig {
            docker_command: format!("/bin/sh {}", script.display()),
            agent_command: "/bin/sh".to_string(),
            agent_args: vec![
                "-c".to_string(),
                "tr '\\0' '\\n' < /proc/$PPID/environ".to_string(),
            ],
            env_passthrough: vec![],
            ..BridgeConfig::default()
        };
        TaskBridge::new(config, Arc::new(WorkspaceManager::new(root.join("ws"))))
    }

    #[tokio::test]
    async fn test_agent_runs_through_container_engine_by_default() {
        let dir = tempfile::tempdir().unwrap();
        // The engine only reports how it was invoked
        let bridge = container_bridge(dir.path(), "for a; do printf '%s\\n' \"$a\"; done\n");
        let task = Task::new("inspect").with_id("boxed-1");

        let result = bridge
            .execute(&task, ExecutionMode::Plain, None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.is_success());
        let lines: Vec<&str> = result.output.lines().collect();
        assert_eq!(&lines[..3], ["run", "--rm", "--name"]);
        assert!(lines[3].starts_with("fluux-agent-"));
        let mount = format!("{}:/workspace", result.workspace.display());
        assert!(lines.contains(&mount.as_str()));
        assert!(lines.contains(&"fluux-coding-agent:latest"));
        // The agent command was handed to the engine, never run on the host
        assert!(!result.output.contains("PATH="));
    }

    #[tokio::test]
    async fn test_cancelled_container_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("killed");
        let engine = format!(
            "if [ \"$1\" = kill ]; then printf '%s' \"$2\" > {}; exit 0; fi\nsleep 10\n",
            marker.display()
        );
        let bridge = container_bridge(dir.path(), &engine);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = bridge
            .execute(&Task::new("slow"), ExecutionMode::Plain, None, &cancel)
            .await
            .unwrap();

        assert!(result.was_cancelled());
        let killed = std::fs::read_to_string(&marker).unwrap();
        assert!(killed.starts_with("fluux-agent-"));
    }

    #[tokio::test]
    async fn test_missing_engine_is_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig {
            docker_command: "/nonexistent/docker".to_string(),
            ..BridgeConfig::default()
        };
        let bridge = TaskBridge::new(config, Arc::new(WorkspaceManager::new(dir.path())));

        let result = bridge
            .execute(&Task::new("x"), ExecutionMode::Plain, None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(
            matches!(result.error, Some(TaskFailure::Execution(ref m)) if m.contains("/nonexistent/docker"))
        );
    }

    #[tokio::test]
    async fn test_execute_in_reuses_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = sh_bridge(dir.path(), "ls");
        let workspace = bridge.workspaces().create("reuse-1").unwrap();
        std::fs::write(workspace.path.join("earlier.txt"), "x").unwrap();

        let result = bridge
            .execute_in(
                &workspace,
                &Task::new("follow up").with_id("reuse-1"),
                ExecutionMode::Plain,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.output.contains("earlier.txt"));
        assert_eq!(result.files, vec![PathBuf::from("earlier.txt")]);
    }
}
