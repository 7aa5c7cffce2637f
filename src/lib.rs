//! Action-execution core for a personal AI agent.
//!
//! Runs side-effecting actions requested by a conversational model under
//! isolation and resource bounds: coding tasks in per-task workspaces,
//! host-side git publishing, and a sandboxed headless browser. A
//! per-session gate keeps at most one action in flight per conversation.

pub mod bridge;
pub mod browser;
pub mod config;
pub mod git;
pub mod sandbox;
pub mod sanitize;
pub mod session;
pub mod skills;
pub mod workspace;
