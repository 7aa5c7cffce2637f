use std::io;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use super::env::{untrusted_command, SandboxEnv};

/// Host variables the container engine client may see.
pub const ENGINE_ENV: &[&str] = &["DOCKER_HOST", "DOCKER_CONFIG", "XDG_RUNTIME_DIR"];

/// Upper bound for `docker kill`.
const KILL_TIMEOUT: Duration = Duration::from_secs(15);

/// Unique container name, so a run can be killed by name.
pub fn container_name(kind: &str) -> String {
    format!("fluux-{kind}-{}", Uuid::new_v4().simple())
}

/// The container engine CLI (`docker`, `podman`, ...).
///
/// The client runs with a rebuilt environment like any untrusted process:
/// the base allow-list, the engine's own connection variables and the
/// given passthrough names. Containers only receive the variables named
/// with `-e` on their command line.
#[derive(Debug, Clone)]
pub struct ContainerEngine {
    program: String,
    prefix: Vec<String>,
    env: SandboxEnv,
}

impl ContainerEngine {
    /// `docker_command` may carry leading arguments, e.g. `"sudo docker"`.
    pub fn new(docker_command: &str, passthrough: &[String]) -> Self {
        let mut parts = docker_command.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        let names: Vec<String> = ENGINE_ENV
            .iter()
            .map(|v| v.to_string())
            .chain(passthrough.iter().cloned())
            .collect();

        Self {
            program,
            prefix: parts.collect(),
            env: SandboxEnv::from_host(&names),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Environment of the engine client. `-e NAME` without a value makes
    /// the engine copy `NAME` from here into the container.
    pub fn env(&self) -> &SandboxEnv {
        &self.env
    }

    pub fn command(&self, args: &[String]) -> io::Result<Command> {
        if self.program.is_empty() {
            return Err(io::Error::other("container engine command is empty"));
        }
        Ok(untrusted_command(
            &self.program,
            self.prefix.iter().chain(args),
            None,
            &self.env,
        ))
    }

    /// Kills a running container. Killing the engine client alone leaves
    /// a `--rm` container running, so timeouts and cancellations call this.
    pub async fn kill(&self, name: &str) {
        let mut cmd = match self.command(&["kill".to_string(), name.to_string()]) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!("Cannot kill container {name}: {e}");
                return;
            }
        };

        match tokio::time::timeout(KILL_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => debug!("Killed container {name}"),
            Ok(Ok(output)) => warn!(
                "Killing container {name} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Ok(Err(e)) => warn!("Killing container {name} failed: {e}"),
            Err(_) => warn!("Killing container {name} timed out"),
        }
    }
}
