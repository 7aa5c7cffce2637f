//! Builtin skill: drive a sandboxed headless browser.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::browser::{BrowserError, BrowserRunner};
use crate::sanitize::OutputSanitizer;
use crate::skills::{Skill, SkillContext};

pub struct BrowserSkill {
    runner: Arc<BrowserRunner>,
    sanitizer: OutputSanitizer,
}

impl BrowserSkill {
    pub fn new(runner: Arc<BrowserRunner>) -> Self {
        Self {
            runner,
            sanitizer: OutputSanitizer::default(),
        }
    }
}

#[async_trait]
impl Skill for BrowserSkill {
    fn name(&self) -> &str {
        "browser"
    }

    fn description(&self) -> &str {
        "Control a headless browser in a disposable container. Use 'browse' to \
         open a page and get an accessibility snapshot with element refs \
         (e.g. @e3), then 'click', 'fill' or 'get_text' with those refs. Each \
         call starts a fresh browser; 'run' executes several agent-browser \
         commands in one session."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["browse", "click", "fill", "get_text", "run"]
                },
                "url": { "type": "string", "description": "For browse: http(s) URL" },
                "selector": { "type": "string", "description": "Element ref or CSS selector" },
                "text": { "type": "string", "description": "For fill: text to enter" },
                "commands": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "For run: agent-browser commands, e.g. [\"open https://example.com\", \"snapshot\"]"
                }
            },
            "required": ["action"]
        })
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["process:container".to_string(), "network:*".to_string()]
    }

    fn privileged(&self) -> bool {
        true
    }

    async fn execute(&self, params: Value, context: &SkillContext) -> anyhow::Result<String> {
        let action = param(&params, "action")?;
        let cancel = &context.cancel;

        let outcome = match action {
            "browse" => self.runner.browse(param(&params, "url")?, cancel).await,
            "click" => self.runner.click(param(&params, "selector")?, cancel).await,
            "fill" => {
                let selector = param(&params, "selector")?;
                let text = params["text"]
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("Missing required parameter: text"))?;
                self.runner.fill(selector, text, cancel).await
            }
            "get_text" => self.runner.get_text(param(&params, "selector")?, cancel).await,
            "run" => {
                let commands: Vec<String> = params["commands"]
                    .as_array()
                    .ok_or_else(|| anyhow::anyhow!("Missing required parameter: commands"))?
                    .iter()
                    .map(|c| c.as_str().unwrap_or_default().to_string())
                    .collect();
                self.runner.run(&commands, cancel).await
            }
            other => anyhow::bail!("Unknown browser action: {other}"),
        };

        match outcome {
            Ok(output) => {
                let clean = self.sanitizer.sanitize(&output);
                Ok(if clean.text.trim().is_empty() {
                    "(no output)".to_string()
                } else {
                    clean.text
                })
            }
            Err(BrowserError::Cancelled) => Ok("Browser run stopped.".to_string()),
            // Failure output comes from the page too
            Err(BrowserError::Execution(output)) => Err(BrowserError::Execution(
                self.sanitizer.sanitize(&output).text,
            )
            .into()),
            Err(e) => Err(e.into()),
        }
    }
}

fn param<'a>(params: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    params[key]
        .as_str()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {key}"))
}
