use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Coarse size of a coding task. Each tier maps to a fixed budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityTier {
    Simple,
    #[default]
    Standard,
    Complex,
}

/// Turn and wall-clock limits for one agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierBudget {
    pub max_turns: u32,
    pub timeout: Duration,
}

impl ComplexityTier {
    pub const ALL: [ComplexityTier; 3] = [Self::Simple, Self::Standard, Self::Complex];

    /// Parses a tier name case-insensitively. Unknown names fall back to `Standard`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "simple" => Self::Simple,
            "complex" => Self::Complex,
            _ => Self::Standard,
        }
    }

    pub fn budget(self) -> TierBudget {
        match self {
            Self::Simple => TierBudget {
                max_turns: 10,
                timeout: Duration::from_secs(5 * 60),
            },
            Self::Standard => TierBudget {
                max_turns: 25,
                timeout: Duration::from_secs(15 * 60),
            },
            Self::Complex => TierBudget {
                max_turns: 50,
                timeout: Duration::from_secs(30 * 60),
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Standard => "standard",
            Self::Complex => "complex",
        }
    }
}

impl std::fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the memory store knows that is relevant to a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryContext {
    #[serde(default)]
    pub preferences: Vec<String>,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl MemoryContext {
    pub fn is_empty(&self) -> bool {
        self.preferences.is_empty() && self.facts.is_empty() && self.constraints.is_empty()
    }
}

/// A coding task submitted by the conversational agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub prompt: String,
    pub tier: ComplexityTier,
    pub context: Option<MemoryContext>,
    /// Repository the result is meant for, if any.
    pub repo: Option<String>,
    pub hints: Option<String>,
}

impl Task {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            tier: ComplexityTier::default(),
            context: None,
            repo: None,
            hints: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_tier(mut self, tier: ComplexityTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_context(mut self, context: MemoryContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    pub fn with_hints(mut self, hints: impl Into<String>) -> Self {
        self.hints = Some(hints.into());
        self
    }

    /// True when the bridge has something to write into CONTEXT.md
    /// beyond the task id.
    pub fn has_context(&self) -> bool {
        self.context.as_ref().is_some_and(|c| !c.is_empty())
            || self.hints.as_deref().is_some_and(|h| !h.trim().is_empty())
            || self.repo.is_some()
    }
}
