use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use super::{Skill, SkillContext};

/// Skills available to the conversational agent, keyed by name.
#[derive(Default)]
pub struct SkillRegistry {
    skills: BTreeMap<String, Arc<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a skill, replacing any previous one with the same name.
    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        let name = skill.name().to_string();
        if self.skills.insert(name.clone(), skill).is_some() {
            warn!("Skill '{name}' registered twice, keeping the latest");
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Skill>> {
        self.skills.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.skills.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Tool definitions in the `{name, description, input_schema}` shape
    /// LLM providers expect.
    pub fn definitions(&self) -> Vec<Value> {
        self.skills
            .values()
            .map(|skill| {
                json!({
                    "name": skill.name(),
                    "description": skill.description(),
                    "input_schema": skill.parameters_schema(),
                })
            })
            .collect()
    }

    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        context: &SkillContext,
    ) -> anyhow::Result<String> {
        let skill = self
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown skill: {name}"))?;

        if skill.privileged() && !context.trusted {
            warn!("Refusing privileged skill '{name}' for untrusted session {}", context.session_key);
            anyhow::bail!("Skill '{name}' requires a trusted sender");
        }

        info!("Executing skill '{name}' for session {}", context.session_key);
        skill.execute(params, context).await
    }
}
