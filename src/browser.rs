//! Sandboxed headless browser.
//!
//! Browser commands come from the LLM, so they are untrusted. Each batch is
//! validated as a whole, rendered into a single `agent-browser` script and
//! run in a throwaway container. Validation allows a fixed verb list and no
//! shell metacharacters; on top of that every word is re-quoted when the
//! script is built, so selectors like `#id` or `a ~ b` reach the CLI as
//! literal arguments.

use std::borrow::Cow;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::BrowserConfig;
use crate::sandbox::{container_name, run_lines, ContainerEngine, Termination};

/// First word of every accepted command.
pub const ALLOWED_VERBS: &[&str] = &[
    "open",
    "click",
    "fill",
    "type",
    "press",
    "hover",
    "scroll",
    "wait",
    "get",
    "find",
    "is",
    "close",
    "snapshot",
    "screenshot",
];

/// Characters that could chain, substitute or redirect in a shell.
const FORBIDDEN_CHARS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '<', '>', '\\', '\n', '\r',
];

/// CLI invoked inside the container for each command.
const BROWSER_CLI: &str = "agent-browser";

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("invalid browser command: {0}")]
    Validation(String),
    #[error("browser timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("browser command failed: {0}")]
    Execution(String),
    #[error("browser run cancelled")]
    Cancelled,
    #[error("failed to start container: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Checks one browser command against the verb allow-list and the
/// metacharacter deny-list.
pub fn validate_command(cmd: &str) -> Result<(), BrowserError> {
    let trimmed = cmd.trim();
    let verb = trimmed
        .split_whitespace()
        .next()
        .ok_or_else(|| BrowserError::Validation("empty command".to_string()))?;

    if !ALLOWED_VERBS.contains(&verb) {
        return Err(BrowserError::Validation(format!("unknown verb '{verb}'")));
    }

    if let Some(c) = cmd.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(BrowserError::Validation(format!(
            "forbidden character {c:?} in '{}'",
            trimmed.escape_debug()
        )));
    }

    words(trimmed).map(|_| ())
}

/// Splits a command into words, honouring quotes.
fn words(cmd: &str) -> Result<Vec<String>, BrowserError> {
    shell_words::split(cmd.trim()).map_err(|e| {
        BrowserError::Validation(format!("cannot parse '{}': {e}", cmd.trim().escape_debug()))
    })
}

/// Quotes a word for `sh` unless it only holds characters the shell
/// treats literally.
fn quote_word(word: &str) -> Cow<'_, str> {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+,-./:_".contains(c));
    if plain {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', r"'\''")))
    }
}

/// Joins validated commands into one shell script, one quoted
/// `agent-browser` call per command.
pub fn build_script<S: AsRef<str>>(commands: &[S]) -> Result<String, BrowserError> {
    let mut calls = Vec::with_capacity(commands.len());
    for cmd in commands {
        let quoted: Vec<String> = words(cmd.as_ref())?
            .iter()
            .map(|w| quote_word(w).into_owned())
            .collect();
        calls.push(format!("{BROWSER_CLI} {}", quoted.join(" ")));
    }
    Ok(calls.join(" && "))
}

/// `docker run` arguments for one script.
pub fn container_args(config: &BrowserConfig, name: &str, script: &str) -> Vec<String> {
    vec![
        "run".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        name.to_string(),
        "--network".to_string(),
        "host".to_string(),
        "--shm-size".to_string(),
        config.shm_size.clone(),
        config.image.clone(),
        "sh".to_string(),
        "-c".to_string(),
        script.to_string(),
    ]
}

pub struct BrowserRunner {
    config: BrowserConfig,
    engine: ContainerEngine,
}

impl BrowserRunner {
    pub fn new(config: BrowserConfig) -> Self {
        let engine = ContainerEngine::new(&config.docker_command, &[]);
        Self { config, engine }
    }

    /// Validates every command, then runs them all in one container.
    ///
    /// Nothing is started if any command is rejected. On timeout or
    /// cancellation the container itself is killed, not just the client.
    pub async fn run<S: AsRef<str>>(
        &self,
        commands: &[S],
        cancel: &CancellationToken,
    ) -> Result<String, BrowserError> {
        if commands.is_empty() {
            return Err(BrowserError::Validation("no commands given".to_string()));
        }
        for cmd in commands {
            validate_command(cmd.as_ref())?;
        }

        let script = build_script(commands)?;
        let name = container_name("browser");
        let args = container_args(&self.config, &name, &script);

        info!("Browser: {} command(s) in {}", commands.len(), self.config.image);
        debug!("Browser script: {script}");

        let child = self
            .engine
            .command(&args)
            .and_then(|mut cmd| cmd.spawn())
            .map_err(BrowserError::Spawn)?;

        let timeout = self.config.timeout();
        let mut lines = Vec::new();
        let termination = run_lines(child, "browser", timeout, cancel, |line| {
            lines.push(line.to_string())
        })
        .await
        .map_err(|e| BrowserError::Execution(e.to_string()))?;
        let output = lines.join("\n");

        match termination {
            Termination::Exited(status) if status.success() => Ok(output),
            Termination::Exited(status) => {
                let code = status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string());
                warn!("Browser container exited with {code}");
                Err(BrowserError::Execution(if output.is_empty() {
                    format!("exit {code}")
                } else {
                    format!("exit {code}: {output}")
                }))
            }
            Termination::TimedOut => {
                self.engine.kill(&name).await;
                Err(BrowserError::Timeout(timeout))
            }
            Termination::Cancelled => {
                self.engine.kill(&name).await;
                Err(BrowserError::Cancelled)
            }
        }
    }

    /// Opens `url` and returns the accessibility snapshot.
    pub async fn browse(&self, url: &str, cancel: &CancellationToken) -> Result<String, BrowserError> {
        let parsed = Url::parse(url.trim())
            .map_err(|e| BrowserError::Validation(format!("invalid URL '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BrowserError::Validation(format!(
                "only http(s) URLs can be opened, got '{}'",
                parsed.scheme()
            )));
        }
        let open = format!("open {}", literal(url.trim())?);
        self.run(&[open, "snapshot".to_string()], cancel).await
    }

    /// Clicks `selector` and returns the resulting snapshot.
    pub async fn click(&self, selector: &str, cancel: &CancellationToken) -> Result<String, BrowserError> {
        let click = format!("click {}", literal(selector)?);
        self.run(&[click, "snapshot".to_string()], cancel).await
    }

    pub async fn fill(
        &self,
        selector: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<String, BrowserError> {
        self.run(&[fill_command(selector, text)?], cancel).await
    }

    pub async fn get_text(&self, selector: &str, cancel: &CancellationToken) -> Result<String, BrowserError> {
        self.run(&[format!("get text {}", literal(selector)?)], cancel)
            .await
    }
}

fn fill_command(selector: &str, text: &str) -> Result<String, BrowserError> {
    Ok(format!("fill {} {}", literal(selector)?, literal(text)?))
}

/// Wraps a value in quotes so it stays one word in a command line.
fn literal(value: &str) -> Result<String, BrowserError> {
    if !value.contains('\'') {
        Ok(format!("'{value}'"))
    } else if !value.contains('"') {
        Ok(format!("\"{value}\""))
    } else {
        Err(BrowserError::Validation(
            "value must not mix single and double quotes".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Validation ──────────────────────────────────────

    #[test]
    fn test_accepts_allowed_verbs() {
        assert!(validate_command("click e3").is_ok());
        assert!(validate_command("open https://example.com/page?q=rust").is_ok());
        assert!(validate_command("  snapshot ").is_ok());
        assert!(validate_command("fill @e2 \"hello world\"").is_ok());
        assert!(validate_command("get text #title").is_ok());
    }

    #[test]
    fn test_rejects_unknown_verb() {
        assert!(matches!(
            validate_command("rm -rf /"),
            Err(BrowserError::Validation(_))
        ));
        assert!(validate_command("eval document.cookie").is_err());
        assert!(validate_command("OPEN https://x").is_err());
    }

    #[test]
    fn test_rejects_empty() {
        assert!(validate_command("").is_err());
        assert!(validate_command("   ").is_err());
    }

    #[test]
    fn test_rejects_injection() {
        assert!(validate_command("open \"http://x\"; rm -rf /").is_err());
        assert!(validate_command("open http://x && curl evil").is_err());
        assert!(validate_command("open http://x | sh").is_err());
        assert!(validate_command("open $(whoami)").is_err());
        assert!(validate_command("open `id`").is_err());
        assert!(validate_command("open http://x > /etc/passwd").is_err());
        assert!(validate_command("click e1\nrm -rf /").is_err());
        assert!(validate_command("click e1\\").is_err());
        assert!(validate_command("open ${HOME}").is_err());
    }

    #[test]
    fn test_rejects_unbalanced_quotes() {
        assert!(matches!(
            validate_command("fill @e1 'open"),
            Err(BrowserError::Validation(_))
        ));
    }

    #[test]
    fn test_fill_command_quoting() {
        assert_eq!(fill_command("@e1", "hi there").unwrap(), "fill '@e1' 'hi there'");
        assert_eq!(fill_command("@e1", "it's").unwrap(), "fill '@e1' \"it's\"");
        assert_eq!(
            fill_command("@e1", "say \"hi\"").unwrap(),
            "fill '@e1' 'say \"hi\"'"
        );
        assert!(fill_command("@e1", "it's \"mixed\"").is_err());
    }

    // ── Script building ─────────────────────────────────

    #[test]
    fn test_build_script() {
        let script = build_script(&["open https://example.com", "snapshot"]).unwrap();
        assert_eq!(
            script,
            "agent-browser open https://example.com && agent-browser snapshot"
        );
    }

    #[test]
    fn test_build_script_quotes_shell_sensitive_words() {
        let script = build_script(&["click #submit", "get text 'a ~ b'", "fill @e1 \"it's\""]).unwrap();
        assert_eq!(
            script,
            "agent-browser click '#submit' && agent-browser get text 'a ~ b' \
             && agent-browser fill @e1 'it'\\''s'"
        );
    }

    #[test]
    fn test_container_args() {
        let config = BrowserConfig::default();
        let args = container_args(&config, "fluux-browser-1", "agent-browser snapshot");
        assert_eq!(
            args,
            vec![
                "run",
                "--rm",
                "--name",
                "fluux-browser-1",
                "--network",
                "host",
                "--shm-size",
                "2g",
                "fluux-browser:latest",
                "sh",
                "-c",
                "agent-browser snapshot",
            ]
        );
    }

    // ── Running (fake container engine) ─────────────────

    /// Runner whose "docker" is `sh <script>`, so the fake engine never
    /// has to be executable.
    fn fake_runner(dir: &std::path::Path, engine: &str, timeout_secs: u64) -> BrowserRunner {
        let path = dir.join("fake-docker.sh");
        std::fs::write(&path, engine).unwrap();
        BrowserRunner::new(BrowserConfig {
            docker_command: format!("/bin/sh {}", path.display()),
            timeout_secs,
            ..BrowserConfig::default()
        })
    }

    /// Prints the script the container would have run (the last argument).
    const ECHO_SCRIPT: &str = "for a; do last=$a; done; printf '%s\\n' \"$last\"\n";

    #[tokio::test]
    async fn test_browse_runs_single_script() {
        let dir = tempfile::tempdir().unwrap();
        let runner = fake_runner(dir.path(), ECHO_SCRIPT, 10);
        let out = runner
            .browse("https://example.com", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            out,
            "agent-browser open https://example.com && agent-browser snapshot"
        );
    }

    #[tokio::test]
    async fn test_browse_rejects_non_http() {
        let dir = tempfile::tempdir().unwrap();
        let runner = fake_runner(dir.path(), ECHO_SCRIPT, 10);
        let cancel = CancellationToken::new();
        assert!(matches!(
            runner.browse("file:///etc/passwd", &cancel).await,
            Err(BrowserError::Validation(_))
        ));
        assert!(runner.browse("javascript:alert(1)", &cancel).await.is_err());
        assert!(runner.browse("not a url", &cancel).await.is_err());
    }

    #[tokio::test]
    async fn test_batch_rejected_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let engine = format!("touch {}\n", marker.display());
        let runner = fake_runner(dir.path(), &engine, 10);

        let result = runner
            .run(&["click e1", "rm -rf /"], &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(BrowserError::Validation(_))));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_click_and_get_text_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let runner = fake_runner(dir.path(), ECHO_SCRIPT, 10);
        let cancel = CancellationToken::new();
        assert_eq!(
            runner.click("@e3", &cancel).await.unwrap(),
            "agent-browser click @e3 && agent-browser snapshot"
        );
        assert_eq!(
            runner.get_text("@e4", &cancel).await.unwrap(),
            "agent-browser get text @e4"
        );
        assert_eq!(
            runner.fill("@e5", "rust", &cancel).await.unwrap(),
            "agent-browser fill @e5 rust"
        );
    }

    /// Engine that really runs the script, against an `agent-browser` stub
    /// that echoes its arguments.
    fn shell_engine(dir: &std::path::Path) -> String {
        let bin = dir.join("bin");
        format!(
            r#"for a; do last=$a; done
mkdir -p {bin}
printf '#!/bin/sh\nprintf "ran: %%s\\n" "$*"\n' > {bin}/agent-browser
chmod +x {bin}/agent-browser
PATH={bin}:$PATH sh -c "$last"
"#,
            bin = bin.display()
        )
    }

    #[tokio::test]
    async fn test_selectors_reach_cli_literally() {
        let dir = tempfile::tempdir().unwrap();
        let runner = fake_runner(dir.path(), &shell_engine(dir.path()), 10);
        let cancel = CancellationToken::new();

        // An unquoted '#' would start a comment and drop the snapshot
        assert_eq!(
            runner.click("#submit", &cancel).await.unwrap(),
            "ran: click #submit\nran: snapshot"
        );
        assert_eq!(
            runner.get_text("ul ~ p", &cancel).await.unwrap(),
            "ran: get text ul ~ p"
        );
        assert_eq!(
            runner.fill("@e1", "it's *done*", &cancel).await.unwrap(),
            "ran: fill @e1 it's *done*"
        );
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let runner = fake_runner(dir.path(), ECHO_SCRIPT, 10);
        let none: [&str; 0] = [];
        assert!(runner.run(&none, &CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_failure_is_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = fake_runner(dir.path(), "echo 'no such element'\nexit 2\n", 10);
        let err = runner
            .run(&["click e9"], &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            BrowserError::Execution(msg) => {
                assert!(msg.contains("exit 2"));
                assert!(msg.contains("no such element"));
            }
            other => panic!("expected execution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_distinct_from_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = fake_runner(dir.path(), "[ \"$1\" = kill ] && exit 0\nsleep 10\n", 1);
        let err = runner
            .run(&["snapshot"], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::Timeout(d) if d == Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let runner = fake_runner(dir.path(), "[ \"$1\" = kill ] && exit 0\nsleep 10\n", 30);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = runner.run(&["snapshot"], &cancel).await.unwrap_err();
        assert!(matches!(err, BrowserError::Cancelled));
    }

    /// Records `docker kill <name>` calls and otherwise hangs.
    fn killable_engine(marker: &std::path::Path) -> String {
        format!(
            "if [ \"$1\" = kill ]; then printf '%s' \"$2\" > {}; exit 0; fi\nsleep 10\n",
            marker.display()
        )
    }

    #[tokio::test]
    async fn test_timeout_kills_container() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("killed");
        let runner = fake_runner(dir.path(), &killable_engine(&marker), 1);

        let err = runner
            .run(&["snapshot"], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::Timeout(_)));
        let killed = std::fs::read_to_string(&marker).unwrap();
        assert!(killed.starts_with("fluux-browser-"));
    }

    #[tokio::test]
    async fn test_cancel_kills_container() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("killed");
        let runner = fake_runner(dir.path(), &killable_engine(&marker), 30);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = runner.run(&["snapshot"], &cancel).await.unwrap_err();
        assert!(matches!(err, BrowserError::Cancelled));
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_missing_engine_is_spawn_error() {
        let runner = BrowserRunner::new(BrowserConfig {
            docker_command: "/nonexistent/docker".to_string(),
            ..BrowserConfig::default()
        });
        let err = runner
            .run(&["snapshot"], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::Spawn(_)));
    }
}
