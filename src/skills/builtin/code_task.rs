//! Builtin skill: hand a coding task to the external coding agent.
//!
//! The task runs in a fresh workspace. When a target repository is given
//! and git is configured, the repository is cloned into the workspace
//! first so the agent works on the existing code.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::bridge::{
    ComplexityTier, ExecutionMode, MemoryContext, StreamEvent, Task, TaskBridge, TaskFailure,
    TaskResult,
};
use crate::git::GitOperator;
use crate::sanitize::OutputSanitizer;
use crate::skills::{Skill, SkillContext};

/// Files listed in the result before eliding the rest.
const MAX_LISTED_FILES: usize = 50;

/// Bound on the diff appended for cloned repositories.
const MAX_DIFF_CHARS: usize = 4_000;

pub struct CodeTaskSkill {
    bridge: Arc<TaskBridge>,
    git: Option<Arc<GitOperator>>,
    diff_sanitizer: OutputSanitizer,
}

impl CodeTaskSkill {
    pub fn new(bridge: Arc<TaskBridge>, git: Option<Arc<GitOperator>>) -> Self {
        Self {
            bridge,
            git,
            diff_sanitizer: OutputSanitizer::new(MAX_DIFF_CHARS),
        }
    }
}

#[async_trait]
impl Skill for CodeTaskSkill {
    fn name(&self) -> &str {
        "code_task"
    }

    fn description(&self) -> &str {
        "Run a coding task (write code, fix a bug, scaffold a project) with an \
         autonomous coding agent in an isolated workspace. Returns the agent's \
         summary, the files it produced and the task id, which git_push needs \
         to publish the result. Pick the smallest tier that fits the job."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "What the coding agent should do"
                },
                "tier": {
                    "type": "string",
                    "enum": ["simple", "standard", "complex"],
                    "description": "Size of the task; bounds turns and run time"
                },
                "repo": {
                    "type": "string",
                    "description": "Existing repository to work on (cloned first)"
                },
                "hints": {
                    "type": "string",
                    "description": "Extra guidance for the coding agent"
                },
                "context": {
                    "type": "object",
                    "description": "Relevant memory about the user",
                    "properties": {
                        "preferences": { "type": "array", "items": { "type": "string" } },
                        "facts": { "type": "array", "items": { "type": "string" } },
                        "constraints": { "type": "array", "items": { "type": "string" } }
                    }
                }
            },
            "required": ["prompt"]
        })
    }

    fn capabilities(&self) -> Vec<String> {
        vec![
            "process:coding-agent".to_string(),
            "filesystem:workspaces:write".to_string(),
        ]
    }

    fn privileged(&self) -> bool {
        true
    }

    async fn execute(&self, params: Value, context: &SkillContext) -> anyhow::Result<String> {
        let prompt = params["prompt"]
            .as_str()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Missing required parameter: prompt"))?;

        let tier = params["tier"]
            .as_str()
            .map(ComplexityTier::from_name)
            .unwrap_or_default();
        let mut task = Task::new(prompt).with_tier(tier);
        if let Some(repo) = non_empty(&params["repo"]) {
            task = task.with_repo(repo);
        }
        if let Some(hints) = non_empty(&params["hints"]) {
            task = task.with_hints(hints);
        }
        if params["context"].is_object() {
            let memory: MemoryContext = serde_json::from_value(params["context"].clone())?;
            task = task.with_context(memory);
        }

        let workspace = self.bridge.workspaces().create(&task.id)?;

        let git = match (task.repo.as_deref(), &self.git) {
            (Some(repo), Some(git)) => {
                git.clone_repo(repo, &workspace.path).await?;
                Some(git)
            }
            _ => None,
        };

        let task_id = task.id.clone();
        let progress = move |event: StreamEvent| match event {
            StreamEvent::ToolUse { name } => info!("Task {task_id}: agent using {name}"),
            StreamEvent::Thinking => debug!("Task {task_id}: agent thinking"),
            StreamEvent::Complete => debug!("Task {task_id}: agent done"),
        };

        let result = self
            .bridge
            .execute_in(
                &workspace,
                &task,
                ExecutionMode::Streaming,
                Some(&progress),
                &context.cancel,
            )
            .await?;

        let mut summary = format_result(&task.id, &result);

        if let Some(git) = git {
            if !result.was_cancelled() {
                match git.get_diff(&workspace.path).await {
                    Ok(diff) if !diff.trim().is_empty() => {
                        let diff = self.diff_sanitizer.sanitize(&diff);
                        summary.push_str(&format!("\n\nDiff:\n{}", diff.text));
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Task {}: no diff available ({e})", task.id),
                }
            }
        }

        Ok(summary)
    }
}

fn non_empty(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// Renders a task result as the text handed back to the LLM.
pub fn format_result(task_id: &str, result: &TaskResult) -> String {
    let mut out = match &result.error {
        None => format!(
            "Task {task_id} completed in {}s ({} turns).",
            result.duration.as_secs(),
            result.turns_used
        ),
        Some(TaskFailure::Cancelled) => format!("Task {task_id} was stopped."),
        Some(TaskFailure::Timeout(limit)) => format!(
            "Task {task_id} timed out after {}s. Partial output below.",
            limit.as_secs()
        ),
        Some(TaskFailure::Execution(e)) => format!("Task {task_id} failed: {e}"),
    };

    if !result.files.is_empty() {
        out.push_str("\n\nFiles:");
        for file in result.files.iter().take(MAX_LISTED_FILES) {
            out.push_str(&format!("\n- {}", file.display()));
        }
        if result.files.len() > MAX_LISTED_FILES {
            out.push_str(&format!(
                "\n- ... and {} more",
                result.files.len() - MAX_LISTED_FILES
            ));
        }
    }

    if !result.warnings.is_empty() {
        out.push_str(&format!("\n\nWarnings: {}", result.warnings.join("; ")));
    }

    if !result.output.trim().is_empty() {
        out.push_str(&format!("\n\nOutput:\n{}", result.output.trim()));
    }

    out
}
