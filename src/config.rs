use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::git::GitConfig;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// Git integration is off when the section is absent
    #[serde(default)]
    pub git: Option<GitConfig>,
    #[serde(default)]
    pub browser: BrowserConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
    /// Workspaces untouched for longer than this are swept
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,
    #[serde(default = "default_cleanup_interval_mins")]
    pub cleanup_interval_mins: u64,
}

/// Where the coding agent process runs.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentLauncher {
    /// In a throwaway container with only the workspace mounted
    #[default]
    Container,
    /// Directly on the host. The agent then shares this process's uid and
    /// can read its environment, so only use it for local development.
    Host,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    #[serde(default)]
    pub launcher: AgentLauncher,
    /// Image holding the coding agent (container launcher)
    #[serde(default = "default_agent_image")]
    pub image: String,
    #[serde(default = "default_docker_command")]
    pub docker_command: String,
    /// Coding agent executable (inside the image for the container launcher)
    #[serde(default = "default_agent_command")]
    pub agent_command: String,
    /// Arguments placed before the generated ones
    #[serde(default)]
    pub agent_args: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Host variables forwarded into the agent's environment, on top of
    /// the base allow-list
    #[serde(default = "default_env_passthrough")]
    pub env_passthrough: Vec<String>,
    /// Tools the agent may use without interactive approval
    #[serde(default = "default_allowed_tools")]
    pub allowed_tools: Vec<String>,
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrowserConfig {
    #[serde(default = "default_browser_image")]
    pub image: String,
    #[serde(default = "default_browser_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_shm_size")]
    pub shm_size: String,
    #[serde(default = "default_docker_command")]
    pub docker_command: String,
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("./data/workspaces")
}

fn default_max_age_hours() -> u64 {
    72
}

fn default_cleanup_interval_mins() -> u64 {
    60
}

fn default_agent_command() -> String {
    "claude".to_string()
}

fn default_agent_image() -> String {
    "fluux-coding-agent:latest".to_string()
}

fn default_env_passthrough() -> Vec<String> {
    vec!["ANTHROPIC_API_KEY".to_string()]
}

fn default_allowed_tools() -> Vec<String> {
    ["Bash(*)", "Read", "Edit(*)", "Write(*)", "Glob", "Grep"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_output_chars() -> usize {
    crate::sanitize::DEFAULT_MAX_OUTPUT_CHARS
}

fn default_browser_image() -> String {
    "fluux-browser:latest".to_string()
}

fn default_browser_timeout_secs() -> u64 {
    60
}

fn default_shm_size() -> String {
    "2g".to_string()
}

fn default_docker_command() -> String {
    "docker".to_string()
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            max_age_hours: default_max_age_hours(),
            cleanup_interval_mins: default_cleanup_interval_mins(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            launcher: AgentLauncher::default(),
            image: default_agent_image(),
            docker_command: default_docker_command(),
            agent_command: default_agent_command(),
            agent_args: Vec::new(),
            model: None,
            env_passthrough: default_env_passthrough(),
            allowed_tools: default_allowed_tools(),
            max_output_chars: default_max_output_chars(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            image: default_browser_image(),
            timeout_secs: default_browser_timeout_secs(),
            shm_size: default_shm_size(),
            docker_command: default_docker_command(),
        }
    }
}

impl WorkspaceConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours * 3600)
    }

    /// Sweep interval, never below one minute
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_mins.max(1) * 60)
    }
}

impl BrowserConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses TOML after expanding environment variables like ${GITHUB_TOKEN}
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }
}
