pub mod builtin;
pub mod registry;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Runtime context passed to skill execution.
pub struct SkillContext {
    /// Session the invoking message belongs to.
    pub session_key: String,
    /// Whether the sender may trigger privileged actions.
    pub trusted: bool,
    /// Fires when the session's action is superseded or stopped.
    pub cancel: CancellationToken,
}

impl SkillContext {
    pub fn new(session_key: impl Into<String>, trusted: bool, cancel: CancellationToken) -> Self {
        Self {
            session_key: session_key.into(),
            trusted,
            cancel,
        }
    }
}

/// A skill that the LLM can invoke via tool_use.
///
/// The conversational runtime calls `execute()` when the LLM requests a
/// tool_use; the returned string goes back as the `tool_result`.
#[async_trait]
pub trait Skill: Send + Sync {
    /// Unique identifier used in the `tools[]` array.
    /// Must be lowercase alphanumeric + underscores (e.g. "code_task").
    fn name(&self) -> &str;

    /// Human-readable description shown to the LLM so it knows
    /// when to invoke this skill.
    fn description(&self) -> &str;

    /// JSON Schema describing the parameters this skill accepts.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Declarative capabilities, e.g. "process:coding-agent", "network:git".
    fn capabilities(&self) -> Vec<String> {
        vec![]
    }

    /// Privileged skills only run for trusted senders.
    fn privileged(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        context: &SkillContext,
    ) -> anyhow::Result<String>;
}

pub use registry::SkillRegistry;
