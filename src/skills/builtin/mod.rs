pub mod browser;
pub mod code_task;
pub mod git_push;

use std::sync::Arc;

pub use browser::BrowserSkill;
pub use code_task::CodeTaskSkill;
pub use git_push::GitPushSkill;

use crate::bridge::TaskBridge;
use crate::browser::BrowserRunner;
use crate::git::GitOperator;
use crate::skills::SkillRegistry;

/// Registers the action skills. `git_push` is only offered when git is
/// configured.
pub fn register_builtins(
    registry: &mut SkillRegistry,
    bridge: Arc<TaskBridge>,
    git: Option<Arc<GitOperator>>,
    browser: Arc<BrowserRunner>,
) {
    if let Some(ref git) = git {
        registry.register(Arc::new(GitPushSkill::new(
            Arc::clone(git),
            Arc::clone(bridge.workspaces()),
        )));
    }
    registry.register(Arc::new(CodeTaskSkill::new(bridge, git)));
    registry.register(Arc::new(BrowserSkill::new(browser)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BridgeConfig, BrowserConfig};
    use crate::workspace::WorkspaceManager;

    #[test]
    fn test_register_without_git() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = TaskBridge::new(
            BridgeConfig::default(),
            Arc::new(WorkspaceManager::new(dir.path())),
        );
        let mut registry = SkillRegistry::new();
        register_builtins(
            &mut registry,
            Arc::new(bridge),
            None,
            Arc::new(BrowserRunner::new(BrowserConfig::default())),
        );
        assert_eq!(registry.names(), vec!["browser", "code_task"]);
    }
}
