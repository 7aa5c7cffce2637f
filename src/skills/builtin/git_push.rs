//! Builtin skill: publish a task's workspace to the organization's git host.
//!
//! Runs entirely on the host side; the coding agent that produced the
//! workspace never sees the credentials.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::git::{GitError, GitOperator, DEFAULT_BRANCH};
use crate::skills::{Skill, SkillContext};
use crate::workspace::WorkspaceManager;

pub struct GitPushSkill {
    git: Arc<GitOperator>,
    workspaces: Arc<WorkspaceManager>,
}

impl GitPushSkill {
    pub fn new(git: Arc<GitOperator>, workspaces: Arc<WorkspaceManager>) -> Self {
        Self { git, workspaces }
    }
}

#[async_trait]
impl Skill for GitPushSkill {
    fn name(&self) -> &str {
        "git_push"
    }

    fn description(&self) -> &str {
        "Commit and push the result of a previous code_task to a repository in \
         the organization. Optionally creates the repository first. Pushes to a \
         separate branch (default agent/changes) so nothing lands on main \
         without review."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "string",
                    "description": "Id of the code_task whose workspace to push"
                },
                "repo": {
                    "type": "string",
                    "description": "Repository name inside the organization"
                },
                "branch": {
                    "type": "string",
                    "description": "Target branch (default agent/changes)"
                },
                "create_repo": {
                    "type": "boolean",
                    "description": "Create the repository before pushing"
                },
                "private": {
                    "type": "boolean",
                    "description": "Visibility when creating (default true)"
                }
            },
            "required": ["task_id", "repo"]
        })
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["network:git".to_string(), "credentials:git-token".to_string()]
    }

    fn privileged(&self) -> bool {
        true
    }

    async fn execute(&self, params: Value, _context: &SkillContext) -> anyhow::Result<String> {
        let task_id = required(&params, "task_id")?;
        let repo = required(&params, "repo")?;
        let branch = params["branch"].as_str().map(str::trim).filter(|b| !b.is_empty());
        let create = params["create_repo"].as_bool().unwrap_or(false);
        let private = params["private"].as_bool().unwrap_or(true);

        let workspace = self
            .workspaces
            .locate(task_id)
            .ok_or_else(|| anyhow::anyhow!("No workspace found for task {task_id}"))?;

        if create {
            match self.git.create_repo(repo, private).await {
                Ok(_) => {}
                Err(GitError::Command { message, .. }) if message.contains("already exists") => {
                    warn!("Repository {repo} already exists, pushing to it");
                }
                Err(e) => return Err(e.into()),
            }
        }

        if !workspace.path.join(".git").exists() {
            self.git.init_repo(&workspace.path, repo).await?;
        }

        let pushed = self.git.push_changes(&workspace.path, repo, branch).await?;
        Ok(if pushed {
            format!(
                "Pushed task {task_id} to {repo} on branch {}.",
                branch.unwrap_or(DEFAULT_BRANCH)
            )
        } else {
            format!("Nothing to push: workspace of task {task_id} has no changes.")
        })
    }
}

fn required<'a>(params: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    params[key]
        .as_str()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {key}"))
}
