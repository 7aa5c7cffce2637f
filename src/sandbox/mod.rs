//! Untrusted execution context.
//!
//! Everything launched from here (the coding agent, the container engine
//! CLI) is treated as hostile: its prompt or command line is influenced by
//! LLM output. Processes get a rebuilt environment containing only
//! allow-listed variables, so host credentials are never inherited.
//!
//! A clean environment does not isolate a process that shares our uid: it
//! can still read `/proc/<parent>/environ`. The coding agent and the
//! browser therefore run inside containers started through
//! `ContainerEngine`, with only the task workspace mounted.
//!
//! The git/repository-host launcher lives in `crate::git` and is the only
//! code path that can read an access token; nothing in this module can.

mod container;
mod env;
mod process;

pub use container::{container_name, ContainerEngine, ENGINE_ENV};
pub use env::{untrusted_command, SandboxEnv, BASE_ENV_ALLOWLIST, HOST_ONLY_VARS};
pub use process::{run_lines, Termination};
