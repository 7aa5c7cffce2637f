use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::warn;

/// Variables every sandboxed process may inherit from the host.
pub const BASE_ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "LANG", "LC_ALL", "TERM", "TMPDIR", "USER"];

/// Variables that belong to the trusted host side only. They are refused
/// even when a configuration lists them as passthrough.
pub const HOST_ONLY_VARS: &[&str] = &[
    "GH_TOKEN",
    "GITHUB_TOKEN",
    "GIT_ASKPASS",
    "SSH_AUTH_SOCK",
    "GIT_CREDENTIALS",
];

/// An explicit environment for an untrusted process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SandboxEnv {
    vars: BTreeMap<String, String>,
}

impl SandboxEnv {
    /// Builds the environment from the host, keeping only the base
    /// allow-list plus the given passthrough names.
    pub fn from_host(passthrough: &[String]) -> Self {
        Self::from_lookup(passthrough, |key| std::env::var(key).ok())
    }

    /// Same as `from_host`, with an explicit variable source.
    pub fn from_lookup<F>(passthrough: &[String], lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut vars = BTreeMap::new();
        let names = BASE_ENV_ALLOWLIST
            .iter()
            .map(|s| s.to_string())
            .chain(passthrough.iter().cloned());

        for name in names {
            if HOST_ONLY_VARS.contains(&name.as_str()) {
                warn!("Refusing to pass host-only variable {name} into the sandbox");
                continue;
            }
            if let Some(value) = lookup(&name) {
                vars.insert(name, value);
            }
        }

        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Builds a command for an untrusted process.
///
/// The host environment is cleared and replaced by `env`; stdout and
/// stderr are piped, stdin is closed, and the child is killed if the
/// handle is dropped.
pub fn untrusted_command<I, S>(program: &str, args: I, cwd: Option<&Path>, env: &SandboxEnv) -> Command
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .env_clear()
        .envs(&env.vars)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    cmd
}
