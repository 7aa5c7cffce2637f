//! Output sanitization for untrusted action results.
//!
//! Everything a sandboxed process prints ends up in an LLM context and
//! possibly in a chat message, so captured output is scanned for
//! credential-shaped strings before it leaves the core. Matches are
//! redacted in place and reported as warnings; sanitization never fails.

use regex::Regex;
use tracing::warn;

/// Default bound on the amount of text handed back to the caller.
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 20_000;

/// A named pattern for credential-shaped substrings.
#[derive(Debug, Clone)]
pub struct LeakPattern {
    pub name: &'static str,
    pub regex: Regex,
}

/// Result of sanitizing a piece of output.
#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized {
    pub text: String,
    pub warnings: Vec<String>,
    /// True when `text` differs from the input.
    pub sanitized: bool,
}

/// Redacts secrets and bounds output length.
pub struct OutputSanitizer {
    patterns: Vec<LeakPattern>,
    max_chars: usize,
}

impl OutputSanitizer {
    pub fn new(max_chars: usize) -> Self {
        Self {
            patterns: default_patterns(),
            max_chars,
        }
    }

    pub fn sanitize(&self, input: &str) -> Sanitized {
        let mut text = input.to_string();
        let mut warnings = Vec::new();

        for pattern in &self.patterns {
            let count = pattern.regex.find_iter(&text).count();
            if count == 0 {
                continue;
            }
            let replacement = format!("[REDACTED:{}]", pattern.name);
            text = pattern
                .regex
                .replace_all(&text, replacement.as_str())
                .into_owned();
            warn!(pattern = pattern.name, count, "Redacted credential-shaped output");
            warnings.push(format!("redacted {count} {} match(es)", pattern.name));
        }

        if text.chars().count() > self.max_chars {
            text = text.chars().take(self.max_chars).collect();
            text.push_str(&format!("\n\n[Output truncated at {} characters]", self.max_chars));
            warnings.push(format!("output truncated to {} characters", self.max_chars));
        }

        Sanitized {
            sanitized: !warnings.is_empty(),
            text,
            warnings,
        }
    }
}

impl Default for OutputSanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTPUT_CHARS)
    }
}

fn pattern(name: &'static str, re: &str) -> LeakPattern {
    LeakPattern {
        name,
        regex: Regex::new(re).expect("built-in leak pattern must compile"),
    }
}

// Ordered so that more specific patterns run first.
fn default_patterns() -> Vec<LeakPattern> {
    vec![
        pattern("private_key", r"-----BEGIN [A-Z ]*PRIVATE KEY-----"),
        pattern("url_credentials", r"[a-zA-Z][a-zA-Z0-9+.-]*://[^/\s:@]+:[^/\s@]+@"),
        pattern("anthropic_api_key", r"sk-ant-[A-Za-z0-9_-]{20,}"),
        pattern("openai_api_key", r"sk-(?:proj-)?[A-Za-z0-9]{20,}"),
        pattern("github_token", r"gh[pousr]_[A-Za-z0-9]{36,}"),
        pattern("github_pat", r"github_pat_[A-Za-z0-9_]{40,}"),
        pattern("aws_access_key", r"AKIA[0-9A-Z]{16}"),
        pattern("slack_token", r"xox[baprs]-[0-9A-Za-z-]{10,}"),
        pattern("google_api_key", r"AIza[0-9A-Za-z_-]{35}"),
        pattern("bearer_token", r"(?i)bearer\s+[A-Za-z0-9._~+/-]{20,}=*"),
        pattern(
            "secret_assignment",
            r#"(?i)\b(?:api[_-]?key|secret|password|passwd|access[_-]?token)\s*[:=]\s*['"]?[^\s'"]{8,}"#,
        ),
    ]
}
