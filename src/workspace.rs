use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Files written by the bridge itself; never reported as task output.
pub const BRIDGE_FILES: &[&str] = &["CONTEXT.md", ".claude"];

/// A per-task working directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Workspace {
    pub task_id: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Creates, locates and reaps per-task workspaces.
///
/// Layout:
///   {root}/{task_id}/            — one directory per task
///   {root}/{task_id}/CONTEXT.md  — memory context written by the bridge
///
/// Workspaces outlive the task that created them so follow-up requests
/// (review the diff, push, build an image) can reuse the artifacts.
/// `cleanup_old()` is the only code path that deletes them.
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a fresh directory keyed by the task id.
    ///
    /// Task ids are used verbatim as directory names, so they are limited
    /// to `[A-Za-z0-9_-]`. Fails if the workspace already exists: two tasks
    /// never share a directory.
    pub fn create(&self, task_id: &str) -> io::Result<Workspace> {
        let path = self.root.join(dir_name(task_id).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid task id '{}'", task_id.escape_debug()),
            )
        })?);
        fs::create_dir_all(&self.root)?;
        fs::create_dir(&path)?;
        info!("Workspace created for task {task_id} at {}", path.display());

        Ok(Workspace {
            task_id: task_id.to_string(),
            path,
            created_at: Utc::now(),
        })
    }

    /// Finds the workspace of a previous task, if it still exists.
    pub fn locate(&self, task_id: &str) -> Option<Workspace> {
        let path = self.root.join(dir_name(task_id)?);
        let metadata = fs::metadata(&path).ok()?;
        if !metadata.is_dir() {
            return None;
        }

        let created_at = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Some(Workspace {
            task_id: task_id.to_string(),
            path,
            created_at,
        })
    }

    /// Lists the files produced in a workspace, relative to its root.
    ///
    /// Best-effort: unreadable directories are skipped. The `.git`
    /// directory and the bridge's own context files are not reported.
    pub fn collect_files(&self, workspace: &Workspace) -> Vec<PathBuf> {
        let mut files = Vec::new();
        walk(&workspace.path, &workspace.path, &mut files);
        files.sort();
        files
    }

    /// Removes every workspace whose modification time is older than `max_age`.
    /// Returns the number of workspaces removed.
    pub fn cleanup_old(&self, max_age: Duration) -> usize {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Workspace root {} not readable: {e}", self.root.display());
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let age = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified.elapsed().unwrap_or_default(),
                Err(e) => {
                    warn!("Cannot stat workspace {}: {e}", path.display());
                    continue;
                }
            };

            if age <= max_age {
                continue;
            }

            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!(
                        "Removed workspace {} (idle {}h)",
                        path.display(),
                        age.as_secs() / 3600
                    );
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove workspace {}: {e}", path.display()),
            }
        }

        removed
    }
}

/// The task id itself, if it is usable as a directory name.
fn dir_name(task_id: &str) -> Option<&str> {
    let valid = !task_id.is_empty()
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then_some(task_id)
}

fn walk(root: &Path, dir: &Path, files: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Skipping unreadable directory {}: {e}", dir.display());
            return;
        }
    };

    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if dir == root && (name == ".git" || BRIDGE_FILES.contains(&name.as_ref())) {
            continue;
        }

        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_symlink() {
            continue;
        }

        if file_type.is_dir() {
            walk(root, &path, files);
        } else if let Ok(relative) = path.strip_prefix(root) {
            files.push(relative.to_path_buf());
        }
    }
}
