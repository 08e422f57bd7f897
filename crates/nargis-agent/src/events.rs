//! Inbound event types and normalisation of raw frames

use nargis_realtime::Inbound;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::sanitize::normalize_assistant_text;

/// Typed events pushed by the gateway, one JSON object per frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Final transcript of what the user said
    Transcript { content: String },

    /// Intermediate reasoning step
    Thought {
        #[serde(default)]
        content: String,
    },

    /// The agent invoked a tool
    ToolUse {
        tool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<String>,
    },

    /// A tool finished; results may arrive as `result` or `output`
    ToolResult {
        tool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },

    /// Assistant answer for the current turn
    Response {
        #[serde(default)]
        content: String,
    },

    /// Server-side failure for the current turn
    Error {
        #[serde(default)]
        content: String,
    },

    /// End of turn, optionally with a reason such as `canceled`
    End {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
}

impl AgentEvent {
    /// Build an event of a known `kind` from a frame's fields.
    ///
    /// Producers are loosely typed, so fields are coerced rather than
    /// validated: a missing or null text field reads as empty and any other
    /// non-string value is rendered as JSON. Optional details (`input`,
    /// `result`, `output`) are kept only when they are strings.
    fn from_fields(kind: &str, object: &Map<String, Value>) -> Option<Self> {
        let text = |key: &str| object.get(key).map(display_value).unwrap_or_default();
        let detail = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);

        Some(match kind {
            "transcript" => AgentEvent::Transcript {
                content: text("content"),
            },
            "thought" => AgentEvent::Thought {
                content: text("content"),
            },
            "tool_use" => AgentEvent::ToolUse {
                tool: text("tool"),
                input: detail("input"),
            },
            "tool_result" => AgentEvent::ToolResult {
                tool: text("tool"),
                result: detail("result"),
                output: detail("output"),
            },
            "response" => AgentEvent::Response {
                content: text("content"),
            },
            "error" => AgentEvent::Error {
                content: text("content"),
            },
            "end" => AgentEvent::End {
                content: object
                    .get("content")
                    .filter(|v| !v.is_null())
                    .map(display_value),
            },
            _ => return None,
        })
    }
}

/// An inbound frame after classification, ready for the reducer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A typed agent event
    Event(AgentEvent),
    /// Plain text: a live, interim transcript
    Interim(String),
    /// Legacy `{transcript, llm}` payload: user utterance and reply together
    Exchange { transcript: String, reply: String },
    /// Legacy `{choices: [{message: {content}}]}` payload
    Reply(String),
    /// Legacy `{error}` or `{detail}` payload
    Failure(String),
    /// Anything else
    Ignored,
}

impl Incoming {
    /// Classify a parsed frame
    pub fn from_inbound(inbound: &Inbound) -> Self {
        match inbound {
            Inbound::Text(text) => Incoming::Interim(text.clone()),
            Inbound::Json(Value::String(text)) => Incoming::Interim(text.clone()),
            Inbound::Json(value) => Self::from_json(value),
            Inbound::Binary(bytes) => {
                tracing::debug!("Ignoring {} byte binary frame", bytes.len());
                Incoming::Ignored
            }
        }
    }

    fn from_json(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            tracing::debug!("Ignoring non-object JSON frame: {}", value);
            return Incoming::Ignored;
        };

        if let Some(event) = object
            .get("type")
            .and_then(Value::as_str)
            .and_then(|kind| AgentEvent::from_fields(kind, object))
        {
            return Incoming::Event(event);
        }

        if let (Some(transcript), Some(llm)) =
            (object.get("transcript").and_then(Value::as_str), object.get("llm"))
        {
            return Incoming::Exchange {
                transcript: transcript.to_string(),
                reply: extract_assistant_text(llm),
            };
        }

        if let Some(choices) = object.get("choices").and_then(Value::as_array) {
            if let Some(content) = choices
                .first()
                .and_then(|choice| choice.pointer("/message/content"))
                .filter(|content| is_truthy(content))
            {
                return Incoming::Reply(extract_assistant_text(content));
            }
        }

        if let Some(detail) = ["detail", "error"]
            .iter()
            .filter_map(|key| object.get(*key))
            .find(|v| is_truthy(v))
        {
            return Incoming::Failure(display_value(detail));
        }

        tracing::debug!("Ignoring unrecognised frame: {}", value);
        Incoming::Ignored
    }
}

/// Pull readable assistant text out of a legacy model payload
fn extract_assistant_text(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Object(object) => {
            let from_choices = object
                .get("choices")
                .and_then(Value::as_array)
                .and_then(|choices| choices.first())
                .and_then(|choice| choice.pointer("/message/content"));
            match from_choices {
                Some(content) => display_value(content),
                None => ["reply", "output", "text"]
                    .iter()
                    .find_map(|key| object.get(*key).and_then(Value::as_str))
                    .map(str::to_string)
                    .unwrap_or_else(|| value.to_string()),
            }
        }
        other => display_value(other),
    };
    normalize_assistant_text(&text)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}
