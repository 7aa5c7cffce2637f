//! Decoding of the coding agent's `stream-json` output.
//!
//! The agent emits one JSON object per line:
//!
//!   system    -> session init (ignored)
//!   assistant -> message.content[] holding text / tool_use blocks
//!   user      -> tool results (ignored)
//!   result    -> final summary (is_error, num_turns, result text)
//!
//! Lines are decoded into a closed set of variants. Anything that does not
//! match a known shape, including malformed JSON, is a no-op.

use serde::Deserialize;
use tracing::debug;

/// Progress notification raised while a streaming task runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The agent produced an assistant message.
    Thinking,
    /// The agent invoked a tool.
    ToolUse { name: String },
    /// The agent reported its final result.
    Complete,
}

/// Synchronous progress callback. Must return quickly; callers that need
/// async delivery buffer on their side.
pub type ProgressFn<'a> = dyn Fn(StreamEvent) + Send + Sync + 'a;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AgentLine {
    #[serde(rename = "assistant")]
    Assistant { message: AssistantMessage },
    #[serde(rename = "result")]
    Final(ResultSummary),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse { name: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct ResultSummary {
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    num_turns: Option<u32>,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

/// Accumulates the output of a streaming run.
#[derive(Debug, Default)]
pub(crate) struct StreamCollector {
    texts: Vec<String>,
    final_text: Option<String>,
    pub(crate) turns: Option<u32>,
    /// Set when the result event reports an error (e.g. `error_max_turns`).
    pub(crate) reported_error: Option<String>,
}

impl StreamCollector {
    pub(crate) fn feed(&mut self, line: &str, progress: Option<&ProgressFn<'_>>) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let event = match serde_json::from_str::<AgentLine>(line) {
            Ok(event) => event,
            Err(e) => {
                debug!("Skipping undecodable agent line ({e})");
                return;
            }
        };

        let emit = |event: StreamEvent| {
            if let Some(progress) = progress {
                progress(event);
            }
        };

        match event {
            AgentLine::Assistant { message } => {
                emit(StreamEvent::Thinking);
                for block in message.content {
                    match block {
                        ContentBlock::Text { text } if !text.is_empty() => self.texts.push(text),
                        ContentBlock::ToolUse { name } => emit(StreamEvent::ToolUse { name }),
                        _ => {}
                    }
                }
            }
            AgentLine::Final(summary) => {
                self.turns = summary.num_turns.or(self.turns);
                self.final_text = summary
                    .result
                    .as_ref()
                    .and_then(|v| v.as_str())
                    .filter(|t| !t.is_empty())
                    .map(str::to_string);
                if summary.is_error {
                    self.reported_error =
                        Some(summary.subtype.unwrap_or_else(|| "error".to_string()));
                }
                emit(StreamEvent::Complete);
            }
            AgentLine::Unknown => {}
        }
    }

    /// Assistant text joined by newlines, or the result text when the
    /// agent produced no assistant text.
    pub(crate) fn output(&self) -> String {
        if self.texts.is_empty() {
            self.final_text.clone().unwrap_or_default()
        } else {
            self.texts.join("\n")
        }
    }
}
