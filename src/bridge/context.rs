use std::fs;
use std::io;
use std::path::Path;

use serde_json::json;

use super::task::Task;

/// Name of the context file the coding agent is told to read.
pub const CONTEXT_FILE: &str = "CONTEXT.md";

/// Writes the task's memory context and the agent's permission settings
/// into the workspace.
///
/// `CONTEXT.md` carries preferences, facts, constraints and hints as
/// markdown. `.claude/settings.json` lists the tools the agent may use
/// without interactive approval; anything not listed would need approval,
/// which never arrives in a non-interactive run.
pub fn write_context(dir: &Path, task: &Task, allowed_tools: &[String]) -> io::Result<()> {
    fs::write(dir.join(CONTEXT_FILE), render_context(task))?;

    let settings_dir = dir.join(".claude");
    fs::create_dir_all(&settings_dir)?;
    fs::write(
        settings_dir.join("settings.json"),
        build_permission_settings(allowed_tools)?,
    )?;

    Ok(())
}

pub(crate) fn render_context(task: &Task) -> String {
    let mut out = format!("# Task context\n\nTask: {}\nTier: {}\n", task.id, task.tier);

    if let Some(ref repo) = task.repo {
        out.push_str(&format!("Target repository: {repo}\n"));
    }

    if let Some(ref ctx) = task.context {
        push_section(&mut out, "User preferences", &ctx.preferences);
        push_section(&mut out, "Relevant facts", &ctx.facts);
        push_section(&mut out, "Constraints", &ctx.constraints);
    }

    if let Some(hints) = task.hints.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
        out.push_str(&format!("\n## System hints\n\n{hints}\n"));
    }

    out
}

fn push_section(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("\n## {title}\n\n"));
    for item in items {
        out.push_str(&format!("- {}\n", item.trim()));
    }
}

fn build_permission_settings(allowed_tools: &[String]) -> io::Result<String> {
    let settings = json!({
        "permissions": {
            "allow": allowed_tools,
        }
    });
    serde_json::to_string_pretty(&settings).map_err(io::Error::other)
}
