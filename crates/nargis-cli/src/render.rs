//! Terminal rendering of conversation snapshots, notices and status

use std::sync::Arc;

use nargis_agent::{ChatMessage, ConversationSnapshot, Notice, Role};
use nargis_realtime::ConnectionStatus;

use crate::utils::truncate_chars;

/// Turns successive snapshots into printable lines, emitting only what changed
pub struct Renderer {
    messages: Arc<[ChatMessage]>,
    phase: Option<String>,
    transcript: Option<String>,
}

impl Renderer {
    /// Start from `initial` so history that is already on screen (or was
    /// loaded from disk) is not printed again
    pub fn new(initial: &ConversationSnapshot) -> Self {
        Self {
            messages: Arc::clone(&initial.messages),
            phase: initial.current_phase.clone(),
            transcript: initial.transcript.clone(),
        }
    }

    pub fn update(&mut self, snapshot: &ConversationSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        if snapshot.current_phase != self.phase {
            if let Some(phase) = &snapshot.current_phase {
                lines.push(format!("  … {}", phase));
            }
            self.phase = snapshot.current_phase.clone();
        }

        if !Arc::ptr_eq(&self.messages, &snapshot.messages) {
            // A shorter list means history was cleared; nothing new to show
            if snapshot.messages.len() > self.messages.len() {
                for message in &snapshot.messages[self.messages.len()..] {
                    lines.extend(render_message(message));
                }
            }
            self.messages = Arc::clone(&snapshot.messages);
        }

        if snapshot.transcript != self.transcript {
            if let Some(transcript) = &snapshot.transcript {
                let committed = snapshot
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .is_some_and(|m| &m.text == transcript);
                if !committed {
                    lines.push(format!("  ~ {}", transcript));
                }
            }
            self.transcript = snapshot.transcript.clone();
        }

        lines
    }
}

/// Lines for one finalized message, thoughts first
pub fn render_message(message: &ChatMessage) -> Vec<String> {
    match message.role {
        Role::User => vec![format!("you: {}", message.text)],
        Role::Assistant => {
            let mut lines: Vec<String> = message
                .thoughts
                .iter()
                .map(|thought| format!("  · {}", truncate_chars(thought, 120)))
                .collect();
            lines.push(format!("nargis: {}", message.text));
            lines
        }
    }
}

pub fn render_notice(notice: &Notice) -> String {
    match notice {
        Notice::Error(message) => format!("Error: {}", message),
        Notice::Cancelled => "[canceled]".to_string(),
        Notice::ToolCompleted { tool, result } if result.is_empty() => {
            format!("[{} done]", tool)
        }
        Notice::ToolCompleted { tool, result } => {
            format!("[{} done: {}]", tool, truncate_chars(result, 60).replace('\n', " "))
        }
    }
}

/// Short badge for a status transition
pub fn status_badge(status: ConnectionStatus) -> String {
    match status {
        ConnectionStatus::Open => "[connected]".to_string(),
        ConnectionStatus::Retrying => "[reconnecting…]".to_string(),
        ConnectionStatus::Closed => "[disconnected]".to_string(),
        other => format!("[{}]", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(messages: Vec<ChatMessage>) -> ConversationSnapshot {
        ConversationSnapshot {
            processing: false,
            current_phase: None,
            transcript: None,
            last_error: None,
            sealed: false,
            messages: messages.into(),
        }
    }

    #[test]
    fn test_only_new_messages_are_rendered() {
        let initial = snapshot(vec![ChatMessage::user("old")]);
        let mut renderer = Renderer::new(&initial);
        assert!(renderer.update(&initial).is_empty());

        let mut messages = initial.messages.to_vec();
        messages.push(ChatMessage::assistant(
            "Here is the answer.",
            vec!["Starting chain…".into(), "Using search (query)…".into()],
        ));
        let lines = renderer.update(&snapshot(messages));
        assert_eq!(
            lines,
            vec![
                "  · Starting chain…",
                "  · Using search (query)…",
                "nargis: Here is the answer.",
            ]
        );
    }

    #[test]
    fn test_phase_changes_are_rendered_once() {
        let mut state = snapshot(vec![]);
        let mut renderer = Renderer::new(&state);
        state.current_phase = Some("Thinking…".into());
        assert_eq!(renderer.update(&state), vec!["  … Thinking…"]);
        assert!(renderer.update(&state).is_empty());
    }

    #[test]
    fn test_interim_transcript_shown_until_committed() {
        let mut state = snapshot(vec![]);
        let mut renderer = Renderer::new(&state);
        state.transcript = Some("remind me".into());
        assert_eq!(renderer.update(&state), vec!["  ~ remind me"]);

        let mut committed = snapshot(vec![ChatMessage::user("remind me to call")]);
        committed.transcript = Some("remind me to call".into());
        assert_eq!(renderer.update(&committed), vec!["you: remind me to call"]);
    }

    #[test]
    fn test_cleared_history_prints_nothing() {
        let initial = snapshot(vec![ChatMessage::user("a"), ChatMessage::user("b")]);
        let mut renderer = Renderer::new(&initial);
        assert!(renderer.update(&snapshot(vec![])).is_empty());
    }

    #[test]
    fn test_notices_and_badges() {
        assert_eq!(render_notice(&Notice::Cancelled), "[canceled]");
        assert_eq!(
            render_notice(&Notice::ToolCompleted {
                tool: "create_task".into(),
                result: String::new()
            }),
            "[create_task done]"
        );
        assert_eq!(render_notice(&Notice::Error("boom".into())), "Error: boom");
        assert_eq!(status_badge(ConnectionStatus::Open), "[connected]");
        assert_eq!(status_badge(ConnectionStatus::Error), "[error]");
    }
}
