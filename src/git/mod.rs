//! Credential-isolated git operations.
//!
//! All git and repository-host calls run on the host, never inside the
//! coding agent's sandbox. The access token is only ever
//!
//! 1. embedded in a URL passed on a `git` command line, or
//! 2. placed in the environment of a single `gh` subprocess.
//!
//! It is never written into a workspace file: clones get their `origin`
//! rewritten to the token-free URL, and pushes go to the authenticated URL
//! directly instead of through a configured remote.
//!
//! The repositories themselves are agent-controlled. Before the host runs
//! git in one, `.git` must be a plain directory and its local config is
//! cut down to an allow-list, so hooks, filters, credential helpers, URL
//! rewrites and the like planted by the agent never run with host
//! privileges. Every git call also disables hooks and fsmonitor on the
//! command line and runs with a minimal environment.

mod token;

use std::collections::BTreeSet;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

pub use token::AccessToken;

use crate::workspace::BRIDGE_FILES;

/// Branch used by `push_changes` when the caller does not name one.
pub const DEFAULT_BRANCH: &str = "agent/changes";

/// Commit message for automated changes.
pub const COMMIT_MESSAGE: &str = "Automated changes by Fluux Agent";

/// Hash of git's empty tree, used to diff repositories without commits.
const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Upper bound for a single git/gh invocation.
const GIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Username paired with the token in authenticated HTTPS URLs.
const TOKEN_USER: &str = "x-access-token";

/// Host variables git and gh may see.
const HOST_TOOL_ENV: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "TMPDIR",
    "HTTPS_PROXY",
    "HTTP_PROXY",
    "NO_PROXY",
];

/// Overrides placed before every git subcommand.
const GIT_OVERRIDES: &[&str] = &[
    "-c",
    "core.hooksPath=/dev/null",
    "-c",
    "core.fsmonitor=false",
    "-c",
    "core.pager=cat",
    "-c",
    "protocol.ext.allow=never",
];

/// Local config keys left in an agent-touched repository.
static SAFE_LOCAL_CONFIG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(core\.(repositoryformatversion|filemode|bare|logallrefupdates|ignorecase|precomposeunicode|symlinks)|extensions\.objectformat|user\.(name|email)|remote\.origin\.(url|fetch)|branch\..+\.(remote|merge)|init\.defaultbranch)$",
    )
    .expect("local config allow-list must compile")
});

#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    /// Committer name
    pub name: String,
    /// Committer email
    pub email: String,
    /// Organization URL, e.g. "https://github.com/my-org"
    pub org_url: String,
    /// Supports ${ENV_VAR} substitution
    pub token: AccessToken,
}

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("failed to run {op}: {source}")]
    Spawn {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{op} failed: {message}")]
    Command { op: &'static str, message: String },
    #[error("{op} timed out after {}s", GIT_TIMEOUT.as_secs())]
    Timeout { op: &'static str },
    #[error("invalid organization URL: {0}")]
    InvalidUrl(String),
    #[error("invalid name '{0}'")]
    InvalidName(String),
    #[error("refusing to operate on {0}")]
    UnsafeRepo(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Host-side git operator.
///
/// Holds only configuration, so one operator can serve concurrent calls
/// on different workspaces.
pub struct GitOperator {
    config: GitConfig,
}

impl GitOperator {
    pub fn new(config: GitConfig) -> Self {
        if config.token.is_empty() {
            warn!("Git operator configured without an access token, pushes will fail");
        }
        Self { config }
    }

    /// Clones `repo` from the organization into `path`.
    ///
    /// When the host reports the repository as missing, an empty local
    /// repository is initialised instead so first-time projects work.
    pub async fn clone_repo(&self, repo: &str, path: &Path) -> Result<(), GitError> {
        let auth_url = self.repo_url(repo, true)?;
        let target = path.to_string_lossy();

        let mut cmd = self.git(None);
        cmd.args(["clone", "--quiet", "--", auth_url.as_str(), &*target]);
        match self.run(cmd, "git clone").await {
            Ok(_) => {
                // Drop the token from .git/config right away.
                let public_url = self.repo_url(repo, false)?;
                self.run_git(path, "git remote", &["remote", "set-url", "origin", &public_url])
                    .await?;
                self.prepare_repo(path).await?;
                info!("Cloned {repo} into {}", path.display());
                Ok(())
            }
            Err(GitError::Command { message, .. }) if is_missing_repo(&message) => {
                info!("Repository {repo} not found on remote, initialising locally");
                self.init_repo(path, repo).await
            }
            Err(e) => Err(e),
        }
    }

    /// Initialises an empty repository with the configured identity and a
    /// token-free `origin`.
    pub async fn init_repo(&self, path: &Path, repo: &str) -> Result<(), GitError> {
        tokio::fs::create_dir_all(path).await?;
        self.run_git(path, "git init", &["init", "--quiet"]).await?;
        self.prepare_repo(path).await?;
        let public_url = self.repo_url(repo, false)?;
        self.set_origin(path, &public_url).await?;
        info!("Initialised repository {repo} at {}", path.display());
        Ok(())
    }

    /// Commits everything in `path` onto `branch` and force-pushes it.
    ///
    /// Returns `Ok(false)` without touching the repository when there is
    /// nothing to commit.
    pub async fn push_changes(
        &self,
        path: &Path,
        repo: &str,
        branch: Option<&str>,
    ) -> Result<bool, GitError> {
        // The agent may have run `git init` itself
        self.prepare_repo(path).await?;
        if !self.has_changes(path).await? {
            debug!("No changes in {}, nothing to push", path.display());
            return Ok(false);
        }

        let branch = branch.filter(|b| !b.trim().is_empty()).unwrap_or(DEFAULT_BRANCH);
        validate_branch(branch)?;
        let auth_url = self.repo_url(repo, true)?;
        let public_url = self.repo_url(repo, false)?;

        if self.has_head(path).await {
            self.run_git(path, "git checkout", &["checkout", "-B", branch]).await?;
        } else {
            // Unborn repository: just point HEAD at the branch
            let head_ref = format!("refs/heads/{branch}");
            self.run_git(path, "git symbolic-ref", &["symbolic-ref", "HEAD", &head_ref])
                .await?;
        }
        self.run_git(path, "git add", &["add", "-A"]).await?;

        let name = format!("user.name={}", self.config.name);
        let email = format!("user.email={}", self.config.email);
        let commit = self
            .run_git(
                path,
                "git commit",
                &["-c", &name, "-c", &email, "commit", "--quiet", "-m", COMMIT_MESSAGE],
            )
            .await;
        match commit {
            Ok(_) => {}
            Err(GitError::Command { message, .. }) if message.contains("nothing to commit") => {
                debug!("Nothing to commit in {} after staging", path.display());
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        self.set_origin(path, &public_url).await?;

        let refspec = format!("HEAD:refs/heads/{branch}");
        self.run_git(path, "git push", &["push", "--force", "--quiet", &auth_url, &refspec])
            .await?;

        info!("Pushed {} to {repo} on branch {branch}", path.display());
        Ok(true)
    }

    /// Creates a repository in the configured organization with the
    /// repository-host CLI. Returns the CLI's output (the new repo URL).
    pub async fn create_repo(&self, name: &str, private: bool) -> Result<String, GitError> {
        validate_repo_name(name)?;
        let org = self.org_name()?;
        let full_name = format!("{org}/{name}");
        let visibility = if private { "--private" } else { "--public" };

        let mut cmd = host_command("gh", None);
        cmd.args(["repo", "create", full_name.as_str(), visibility])
            .env("GH_TOKEN", self.config.token.expose());
        let out = self.run(cmd, "gh repo create").await?;

        info!("Created repository {full_name} ({})", if private { "private" } else { "public" });
        Ok(out.trim().to_string())
    }

    /// True when `git status` reports anything (tracked or untracked).
    pub async fn has_changes(&self, path: &Path) -> Result<bool, GitError> {
        self.guard_repo(path).await?;
        let status = self.run_git(path, "git status", &["status", "--porcelain"]).await?;
        Ok(!status.trim().is_empty())
    }

    /// Diff of the working tree against `HEAD`, or against the empty tree
    /// when the repository has no commits yet.
    pub async fn get_diff(&self, path: &Path) -> Result<String, GitError> {
        self.guard_repo(path).await?;
        let base = if self.has_head(path).await { "HEAD" } else { EMPTY_TREE };
        self.run_git(path, "git diff", &["diff", "--no-ext-diff", "--no-textconv", base])
            .await
    }

    /// Makes a repository safe for host-side git and keeps the bridge's own
    /// files (CONTEXT.md, agent settings) out of commits. Idempotent.
    pub async fn prepare_repo(&self, path: &Path) -> Result<(), GitError> {
        self.guard_repo(path).await?;
        self.run_git(path, "git config", &["config", "user.name", &self.config.name])
            .await?;
        self.run_git(path, "git config", &["config", "user.email", &self.config.email])
            .await?;

        let info_dir = path.join(".git").join("info");
        tokio::fs::create_dir_all(&info_dir).await?;
        let exclude = info_dir.join("exclude");
        let mut patterns = tokio::fs::read_to_string(&exclude).await.unwrap_or_default();
        for file in BRIDGE_FILES {
            let line = format!("/{file}");
            if !patterns.lines().any(|l| l.trim() == line) {
                if !patterns.is_empty() && !patterns.ends_with('\n') {
                    patterns.push('\n');
                }
                patterns.push_str(&line);
                patterns.push('\n');
            }
        }
        tokio::fs::write(&exclude, patterns).await?;
        Ok(())
    }

    // ── Internals ──────────────────────────────────────

    async fn has_head(&self, path: &Path) -> bool {
        self.run_git(path, "git rev-parse", &["rev-parse", "--verify", "--quiet", "HEAD"])
            .await
            .is_ok()
    }

    fn git(&self, cwd: Option<&Path>) -> Command {
        let mut cmd = host_command("git", cwd);
        cmd.args(GIT_OVERRIDES);
        cmd
    }

    async fn run_git(&self, cwd: &Path, op: &'static str, args: &[&str]) -> Result<String, GitError> {
        let mut cmd = self.git(Some(cwd));
        cmd.args(args);
        self.run(cmd, op).await
    }

    async fn run(&self, mut cmd: Command, op: &'static str) -> Result<String, GitError> {
        let output = tokio::time::timeout(GIT_TIMEOUT, cmd.output())
            .await
            .map_err(|_| GitError::Timeout { op })?
            .map_err(|source| GitError::Spawn { op, source })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let raw = if stderr.trim().is_empty() { stdout.as_str() } else { stderr.as_ref() };
        Err(GitError::Command {
            op,
            message: self.redact(raw.trim()),
        })
    }

    /// Refuses `.git` files and symlinks, then strips every local config
    /// key outside the allow-list.
    async fn guard_repo(&self, path: &Path) -> Result<(), GitError> {
        let git_dir = path.join(".git");
        let meta = tokio::fs::symlink_metadata(&git_dir).await?;
        if !meta.is_dir() {
            return Err(GitError::UnsafeRepo(format!(
                "{}: not a plain directory",
                git_dir.display()
            )));
        }
        let config = git_dir.join("config");
        if let Ok(meta) = tokio::fs::symlink_metadata(&config).await {
            if !meta.is_file() {
                return Err(GitError::UnsafeRepo(format!(
                    "{}: not a regular file",
                    config.display()
                )));
            }
        }

        let listed = self
            .run_git(path, "git config", &["config", "--local", "--name-only", "--list"])
            .await
            .unwrap_or_default();
        let unsafe_keys: BTreeSet<&str> = listed
            .lines()
            .map(str::trim)
            .filter(|key| !key.is_empty() && !SAFE_LOCAL_CONFIG.is_match(key))
            .collect();
        for key in unsafe_keys {
            warn!("Removing {key} from repository config in {}", path.display());
            self.run_git(path, "git config", &["config", "--local", "--unset-all", key])
                .await?;
        }
        Ok(())
    }

    async fn set_origin(&self, path: &Path, url: &str) -> Result<(), GitError> {
        let exists = self
            .run_git(path, "git remote", &["remote", "get-url", "origin"])
            .await
            .is_ok();
        let verb = if exists { "set-url" } else { "add" };
        self.run_git(path, "git remote", &["remote", verb, "origin", url])
            .await
            .map(|_| ())
    }

    /// `{org_url}/{repo}.git`, optionally with the token as userinfo.
    fn repo_url(&self, repo: &str, authenticated: bool) -> Result<String, GitError> {
        let repo = repo.trim().trim_end_matches(".git");
        validate_repo_name(repo)?;

        let mut url = Url::parse(&self.config.org_url)
            .map_err(|e| GitError::InvalidUrl(format!("{}: {e}", self.config.org_url)))?;
        url.path_segments_mut()
            .map_err(|_| GitError::InvalidUrl(self.config.org_url.clone()))?
            .pop_if_empty()
            .push(&format!("{repo}.git"));

        if authenticated {
            url.set_username(TOKEN_USER)
                .and_then(|_| url.set_password(Some(self.config.token.expose())))
                .map_err(|_| GitError::InvalidUrl(self.config.org_url.clone()))?;
        }

        Ok(url.to_string())
    }

    /// Last path segment of the organization URL.
    fn org_name(&self) -> Result<String, GitError> {
        let url = Url::parse(&self.config.org_url)
            .map_err(|e| GitError::InvalidUrl(format!("{}: {e}", self.config.org_url)))?;
        url.path_segments()
            .and_then(|segs| segs.filter(|s| !s.is_empty()).last())
            .map(str::to_string)
            .ok_or_else(|| GitError::InvalidUrl(self.config.org_url.clone()))
    }

    fn redact(&self, text: &str) -> String {
        let secret = self.config.token.expose();
        if secret.is_empty() {
            text.to_string()
        } else {
            text.replace(secret, "***")
        }
    }
}

/// Host-side launcher for git and gh: a minimal environment (credentials
/// are passed per call, never inherited) and no prompts.
fn host_command(program: &str, cwd: Option<&Path>) -> Command {
    let mut cmd = Command::new(program);
    cmd.env_clear()
        .envs(HOST_TOOL_ENV.iter().filter_map(|k| std::env::var(k).ok().map(|v| (*k, v))))
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd
}

fn is_missing_repo(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("not found") || lower.contains("does not exist")
}

fn validate_repo_name(name: &str) -> Result<(), GitError> {
    let valid = !name.is_empty()
        && !name.starts_with('-')
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(GitError::InvalidName(name.to_string()))
    }
}

fn validate_branch(branch: &str) -> Result<(), GitError> {
    let valid = !branch.starts_with('-')
        && !branch.contains("..")
        && branch
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    if valid {
        Ok(())
    } else {
        Err(GitError::InvalidName(branch.to_string()))
    }
}
