//! Conversation state: message history, turn accumulator, and the reducer
//! that folds inbound events into it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    events::{AgentEvent, Incoming},
    sanitize::sanitize,
};

/// Phase label shown for a thought with no content
pub const THINKING_LABEL: &str = "Thinking…";

/// Error text used when the gateway reports an error without details
pub const UNKNOWN_ERROR: &str = "The assistant reported an error";

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A finalized entry in the conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    /// Milliseconds since the Unix epoch
    pub ts: i64,
    /// Annotations gathered during the turn, in arrival order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thoughts: Vec<String>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            ts: now_millis(),
            thoughts: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>, thoughts: Vec<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            ts: now_millis(),
            thoughts,
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Side effects of an event that collaborators should react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Server-reported failure for the turn
    Error(String),
    /// The turn ended with a cancellation reason
    Cancelled,
    /// A tool finished; domain data it touched may be stale
    ToolCompleted { tool: String, result: String },
}

/// What the machine did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// State was updated
    Accepted,
    /// Dropped because the turn already ended
    Sealed,
    /// Nothing to do for this event
    Ignored,
}

/// Result of [`ConversationMachine::apply`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub disposition: Disposition,
    pub notices: Vec<Notice>,
}

impl Applied {
    fn accepted() -> Self {
        Self::with(Disposition::Accepted)
    }

    fn with(disposition: Disposition) -> Self {
        Self {
            disposition,
            notices: Vec::new(),
        }
    }

    fn notice(mut self, notice: Notice) -> Self {
        self.notices.push(notice);
        self
    }

    pub fn is_accepted(&self) -> bool {
        self.disposition == Disposition::Accepted
    }
}

/// Where the current turn stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// No turn in progress
    Idle,
    /// Annotations are being collected
    Accumulating,
    /// An `end` was seen; events are dropped until the next reset
    Sealed,
}

/// Read-only view handed to subscribers.
///
/// `messages` is only replaced when history changes, so
/// `Arc::ptr_eq` on two snapshots tells whether history moved.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSnapshot {
    pub processing: bool,
    pub current_phase: Option<String>,
    /// Latest transcript, interim or final
    pub transcript: Option<String>,
    pub last_error: Option<String>,
    pub sealed: bool,
    pub messages: Arc<[ChatMessage]>,
}

/// Reduces the inbound event stream into conversation state.
///
/// Turn boundaries are inferred from event order: annotations accumulate
/// until a `response` finalizes them into a message, and `end` seals the
/// turn until [`reset_turn`](Self::reset_turn).
#[derive(Debug, Clone)]
pub struct ConversationMachine {
    messages: Arc<[ChatMessage]>,
    pending: Vec<String>,
    processing: bool,
    current_phase: Option<String>,
    transcript: Option<String>,
    last_error: Option<String>,
    sealed: bool,
}

impl Default for ConversationMachine {
    fn default() -> Self {
        Self::with_history(Vec::new())
    }
}

impl ConversationMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously saved history
    pub fn with_history(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages: messages.into(),
            pending: Vec::new(),
            processing: false,
            current_phase: None,
            transcript: None,
            last_error: None,
            sealed: false,
        }
    }

    /// Fold one event into the state
    pub fn apply(&mut self, incoming: Incoming) -> Applied {
        if self.sealed {
            if incoming != Incoming::Ignored {
                tracing::debug!("Turn sealed, dropping late event: {:?}", incoming);
            }
            return Applied::with(Disposition::Sealed);
        }

        match incoming {
            Incoming::Event(event) => self.apply_event(event),
            Incoming::Interim(text) => {
                self.transcript = Some(sanitize(&text));
                Applied::accepted()
            }
            Incoming::Exchange { transcript, reply } => {
                let transcript = sanitize(&transcript);
                if !transcript.is_empty() {
                    self.append(ChatMessage::user(transcript.clone()));
                    self.transcript = Some(transcript);
                }
                self.append(ChatMessage::assistant(reply, Vec::new()));
                self.finish_processing();
                Applied::accepted()
            }
            Incoming::Reply(reply) => {
                self.append(ChatMessage::assistant(reply, Vec::new()));
                self.finish_processing();
                Applied::accepted()
            }
            Incoming::Failure(detail) => {
                let message = format!("Error from AI: {detail}");
                self.last_error = Some(message.clone());
                self.finish_processing();
                Applied::accepted().notice(Notice::Error(message))
            }
            Incoming::Ignored => Applied::with(Disposition::Ignored),
        }
    }

    fn apply_event(&mut self, event: AgentEvent) -> Applied {
        match event {
            AgentEvent::Transcript { content } => {
                let text = sanitize(&content);
                if text.is_empty() {
                    return Applied::with(Disposition::Ignored);
                }
                self.append(ChatMessage::user(text.clone()));
                self.transcript = Some(text);
                Applied::accepted()
            }
            AgentEvent::Thought { content } => {
                let text = content.trim();
                if text.is_empty() {
                    self.current_phase = Some(THINKING_LABEL.to_string());
                } else {
                    self.pending.push(text.to_string());
                    self.current_phase = Some(text.to_string());
                }
                self.processing = true;
                Applied::accepted()
            }
            AgentEvent::ToolUse { tool, input } => {
                let tool = match tool.trim() {
                    "" => "a tool",
                    name => name,
                };
                let label = match input.as_deref().map(str::trim) {
                    Some(detail) if !detail.is_empty() => format!("Using {tool} ({detail})…"),
                    _ => format!("Using {tool}…"),
                };
                self.pending.push(label.clone());
                self.current_phase = Some(label);
                self.processing = true;
                Applied::accepted()
            }
            AgentEvent::ToolResult {
                tool,
                result,
                output,
            } => {
                tracing::debug!("Tool completed: {}", tool);
                let result = result.or(output).unwrap_or_default();
                Applied::accepted().notice(Notice::ToolCompleted { tool, result })
            }
            AgentEvent::Response { content } => {
                let thoughts = std::mem::take(&mut self.pending);
                self.append(ChatMessage::assistant(sanitize(&content), thoughts));
                self.finish_processing();
                Applied::accepted()
            }
            AgentEvent::Error { content } => {
                let message = match content.trim() {
                    "" => UNKNOWN_ERROR.to_string(),
                    _ => content,
                };
                self.pending.clear();
                self.last_error = Some(message.clone());
                self.finish_processing();
                Applied::accepted().notice(Notice::Error(message))
            }
            AgentEvent::End { content } => {
                self.sealed = true;
                self.finish_processing();
                let cancelled = content
                    .as_deref()
                    .is_some_and(|reason| reason.to_lowercase().contains("cancel"));
                if cancelled {
                    Applied::accepted().notice(Notice::Cancelled)
                } else {
                    Applied::accepted()
                }
            }
        }
    }

    fn append(&mut self, message: ChatMessage) {
        let mut messages = self.messages.to_vec();
        messages.push(message);
        self.messages = messages.into();
    }

    fn finish_processing(&mut self) {
        self.processing = false;
        self.current_phase = None;
    }

    /// Clear the turn accumulator and unseal, ready for a new turn.
    /// History is untouched.
    pub fn reset_turn(&mut self) {
        self.sealed = false;
        self.pending.clear();
        self.processing = false;
        self.current_phase = None;
        self.transcript = None;
        self.last_error = None;
    }

    /// Empty the history. Returns false if it was already empty.
    pub fn clear_messages(&mut self) -> bool {
        if self.messages.is_empty() {
            return false;
        }
        self.messages = Vec::<ChatMessage>::new().into();
        true
    }

    /// Record a message the user typed. Returns false if it sanitises to nothing.
    pub fn push_user_message(&mut self, text: &str) -> bool {
        let text = sanitize(text);
        if text.trim().is_empty() {
            return false;
        }
        self.append(ChatMessage::user(text));
        true
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            processing: self.processing,
            current_phase: self.current_phase.clone(),
            transcript: self.transcript.clone(),
            last_error: self.last_error.clone(),
            sealed: self.sealed,
            messages: Arc::clone(&self.messages),
        }
    }

    pub fn turn_state(&self) -> TurnState {
        if self.sealed {
            TurnState::Sealed
        } else if self.processing || !self.pending.is_empty() {
            TurnState::Accumulating
        } else {
            TurnState::Idle
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Annotations waiting for the next `response`
    pub fn pending_thoughts(&self) -> &[String] {
        &self.pending
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn current_phase(&self) -> Option<&str> {
        self.current_phase.as_deref()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event: AgentEvent) -> Incoming {
        Incoming::Event(event)
    }

    fn thought(content: &str) -> Incoming {
        event(AgentEvent::Thought {
            content: content.into(),
        })
    }

    fn tool_use(tool: &str, input: Option<&str>) -> Incoming {
        event(AgentEvent::ToolUse {
            tool: tool.into(),
            input: input.map(String::from),
        })
    }

    fn response(content: &str) -> Incoming {
        event(AgentEvent::Response {
            content: content.into(),
        })
    }

    fn end(content: Option<&str>) -> Incoming {
        event(AgentEvent::End {
            content: content.map(String::from),
        })
    }

    #[test]
    fn test_turn_accumulates_annotations_into_message() {
        let mut machine = ConversationMachine::new();
        machine.apply(thought("Starting chain…"));
        machine.apply(tool_use("search", Some("query")));
        machine.apply(response("Here is the answer."));
        machine.apply(end(Some("done")));

        let messages = machine.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].text, "Here is the answer.");
        assert_eq!(
            messages[0].thoughts,
            vec!["Starting chain…", "Using search (query)…"]
        );
        assert!(!machine.is_processing());
        assert!(machine.current_phase().is_none());
    }

    #[test]
    fn test_phase_tracks_latest_annotation() {
        let mut machine = ConversationMachine::new();
        machine.apply(thought("  Looking up tasks  "));
        assert!(machine.is_processing());
        assert_eq!(machine.current_phase(), Some("Looking up tasks"));
        assert_eq!(machine.turn_state(), TurnState::Accumulating);

        machine.apply(tool_use("list_tasks", None));
        assert_eq!(machine.current_phase(), Some("Using list_tasks…"));

        machine.apply(tool_use("search", Some("   ")));
        assert_eq!(machine.current_phase(), Some("Using search…"));
    }

    #[test]
    fn test_empty_thought_shows_default_label_without_buffering() {
        let mut machine = ConversationMachine::new();
        machine.apply(thought("   "));
        assert_eq!(machine.current_phase(), Some(THINKING_LABEL));
        assert!(machine.is_processing());
        assert!(machine.pending_thoughts().is_empty());
    }

    #[test]
    fn test_response_clears_buffer_between_turns() {
        let mut machine = ConversationMachine::new();
        machine.apply(thought("first"));
        machine.apply(response("one"));
        machine.apply(thought("second"));
        machine.apply(response("two"));

        let messages = machine.messages();
        assert_eq!(messages[0].thoughts, vec!["first"]);
        assert_eq!(messages[1].thoughts, vec!["second"]);
        assert_eq!(machine.turn_state(), TurnState::Idle);
    }

    #[test]
    fn test_response_without_annotations() {
        let mut machine = ConversationMachine::new();
        machine.apply(response("Hi"));
        assert_eq!(machine.messages()[0].text, "Hi");
        assert!(machine.messages()[0].thoughts.is_empty());
    }

    #[test]
    fn test_sealed_turn_drops_late_events() {
        let mut machine = ConversationMachine::new();
        machine.apply(response("answer"));
        let applied = machine.apply(end(None));
        assert!(applied.is_accepted());
        assert_eq!(machine.turn_state(), TurnState::Sealed);

        let applied = machine.apply(thought("late"));
        assert_eq!(applied.disposition, Disposition::Sealed);
        let applied = machine.apply(response("late answer"));
        assert_eq!(applied.disposition, Disposition::Sealed);

        assert_eq!(machine.messages().len(), 1);
        assert!(machine.pending_thoughts().is_empty());
        assert!(!machine.is_processing());
    }

    #[test]
    fn test_reset_turn_unseals() {
        let mut machine = ConversationMachine::new();
        machine.apply(end(None));
        machine.reset_turn();
        assert!(!machine.is_sealed());

        machine.apply(thought("again"));
        machine.apply(response("second answer"));
        assert_eq!(machine.messages().len(), 1);
        assert_eq!(machine.messages()[0].thoughts, vec!["again"]);
    }

    #[test]
    fn test_end_does_not_touch_history() {
        let mut machine = ConversationMachine::new();
        machine.apply(thought("half way"));
        let before = machine.snapshot();
        machine.apply(end(Some("done")));
        let after = machine.snapshot();
        assert!(Arc::ptr_eq(&before.messages, &after.messages));
        assert!(!after.processing);
        assert!(after.current_phase.is_none());
    }

    #[test]
    fn test_cancelled_end_emits_notice() {
        for reason in ["canceled", "Cancelled by user"] {
            let mut machine = ConversationMachine::new();
            let applied = machine.apply(end(Some(reason)));
            assert_eq!(applied.notices, vec![Notice::Cancelled]);
        }

        let mut machine = ConversationMachine::new();
        assert!(machine.apply(end(Some("done"))).notices.is_empty());
    }

    #[test]
    fn test_error_stops_processing_and_surfaces_content() {
        let mut machine = ConversationMachine::new();
        machine.apply(thought("working"));
        let applied = machine.apply(event(AgentEvent::Error {
            content: "upstream timeout".into(),
        }));

        assert_eq!(applied.notices, vec![Notice::Error("upstream timeout".into())]);
        assert!(!machine.is_processing());
        assert!(machine.pending_thoughts().is_empty());
        assert_eq!(machine.snapshot().last_error.as_deref(), Some("upstream timeout"));
        // An error does not seal the turn
        assert!(!machine.is_sealed());
    }

    fn wire(value: serde_json::Value) -> Incoming {
        Incoming::from_inbound(&nargis_realtime::Inbound::Json(value))
    }

    #[test]
    fn test_loosely_typed_error_still_ends_processing() {
        for content in [serde_json::json!({"code": 503}), serde_json::Value::Null] {
            let mut machine = ConversationMachine::new();
            machine.apply(thought("working"));

            let applied = machine.apply(wire(serde_json::json!({"type": "error", "content": content})));
            assert!(applied.is_accepted());
            assert!(!machine.is_processing());
            assert_eq!(machine.current_phase(), None);
            assert!(machine.pending_thoughts().is_empty());

            let snapshot = machine.snapshot();
            let message = snapshot.last_error.clone().unwrap();
            assert!(!message.is_empty());
            assert_eq!(applied.notices, vec![Notice::Error(message)]);
        }
    }

    #[test]
    fn test_blank_error_uses_fallback_text() {
        let mut machine = ConversationMachine::new();
        machine.apply(wire(serde_json::json!({"type": "error", "content": null})));
        assert_eq!(machine.snapshot().last_error.as_deref(), Some(UNKNOWN_ERROR));
    }

    #[test]
    fn test_loosely_typed_end_still_seals() {
        let mut machine = ConversationMachine::new();
        machine.apply(thought("working"));

        let applied = machine.apply(wire(
            serde_json::json!({"type": "end", "content": {"reason": "canceled"}}),
        ));
        assert!(applied.is_accepted());
        assert!(machine.is_sealed());
        assert!(!machine.is_processing());
        assert_eq!(applied.notices, vec![Notice::Cancelled]);
    }

    #[test]
    fn test_null_thought_shows_default_label() {
        let mut machine = ConversationMachine::new();
        let applied = machine.apply(wire(serde_json::json!({"type": "thought", "content": null})));
        assert!(applied.is_accepted());
        assert!(machine.is_processing());
        assert_eq!(machine.current_phase(), Some(THINKING_LABEL));
    }

    #[test]
    fn test_tool_use_without_name() {
        let mut machine = ConversationMachine::new();
        machine.apply(wire(serde_json::json!({"type": "tool_use"})));
        assert_eq!(machine.current_phase(), Some("Using a tool…"));
    }

    #[test]
    fn test_transcript_appends_user_message() {
        let mut machine = ConversationMachine::new();
        let applied = machine.apply(event(AgentEvent::Transcript {
            content: "add  milk\u{0}".into(),
        }));
        assert!(applied.is_accepted());
        assert_eq!(machine.messages()[0].role, Role::User);
        assert_eq!(machine.messages()[0].text, "add milk");
        assert!(!machine.is_processing());

        let applied = machine.apply(event(AgentEvent::Transcript {
            content: "\u{1}".into(),
        }));
        assert_eq!(applied.disposition, Disposition::Ignored);
        assert_eq!(machine.messages().len(), 1);
    }

    #[test]
    fn test_interim_transcript_is_not_history() {
        let mut machine = ConversationMachine::new();
        machine.apply(Incoming::Interim("remind me".into()));
        let snapshot = machine.snapshot();
        assert_eq!(snapshot.transcript.as_deref(), Some("remind me"));
        assert!(snapshot.messages.is_empty());
    }

    #[test]
    fn test_tool_result_notice() {
        let mut machine = ConversationMachine::new();
        let applied = machine.apply(event(AgentEvent::ToolResult {
            tool: "create_task".into(),
            result: None,
            output: Some("created".into()),
        }));
        assert_eq!(
            applied.notices,
            vec![Notice::ToolCompleted {
                tool: "create_task".into(),
                result: "created".into()
            }]
        );
        assert!(machine.messages().is_empty());
    }

    #[test]
    fn test_legacy_payloads() {
        let mut machine = ConversationMachine::new();
        machine.apply(Incoming::Exchange {
            transcript: "hi".into(),
            reply: "Hello!".into(),
        });
        machine.apply(Incoming::Reply("Anything else?".into()));
        let applied = machine.apply(Incoming::Failure("quota".into()));

        let roles: Vec<Role> = machine.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Assistant]);
        assert_eq!(applied.notices, vec![Notice::Error("Error from AI: quota".into())]);
    }

    #[test]
    fn test_snapshot_messages_change_only_with_history() {
        let mut machine = ConversationMachine::new();
        let first = machine.snapshot();
        machine.apply(thought("step"));
        let second = machine.snapshot();
        assert!(Arc::ptr_eq(&first.messages, &second.messages));

        machine.apply(response("done"));
        let third = machine.snapshot();
        assert!(!Arc::ptr_eq(&second.messages, &third.messages));
        // Earlier snapshots are unaffected
        assert!(second.messages.is_empty());
        assert_eq!(third.messages.len(), 1);
    }

    #[test]
    fn test_clear_and_push_user_message() {
        let mut machine = ConversationMachine::with_history(vec![ChatMessage::user("old")]);
        assert!(machine.push_user_message("new one"));
        assert!(!machine.push_user_message(" \t "));
        assert_eq!(machine.messages().len(), 2);

        let before = machine.snapshot();
        assert!(machine.clear_messages());
        assert!(machine.messages().is_empty());
        let cleared = machine.snapshot();
        assert!(!Arc::ptr_eq(&before.messages, &cleared.messages));

        assert!(!machine.clear_messages());
        assert!(Arc::ptr_eq(&cleared.messages, &machine.snapshot().messages));
    }

    #[test]
    fn test_ignored_is_ignored() {
        let mut machine = ConversationMachine::new();
        let applied = machine.apply(Incoming::Ignored);
        assert_eq!(applied.disposition, Disposition::Ignored);
    }

    #[test]
    fn test_message_serialization() {
        let message = ChatMessage {
            role: Role::Assistant,
            text: "ok".into(),
            ts: 1_700_000_000_000,
            thoughts: vec![],
        };
        assert_eq!(
            serde_json::to_string(&message).unwrap(),
            r#"{"role":"assistant","text":"ok","ts":1700000000000}"#
        );
    }
}
