//! /status command - connection and turn status

use super::CommandContext;

pub struct StatusCommand;

impl StatusCommand {
    pub fn describe(ctx: &CommandContext<'_>) -> String {
        let snapshot = ctx.snapshot;
        let turn = if snapshot.sealed {
            "ended"
        } else if snapshot.processing {
            "in progress"
        } else {
            "idle"
        };

        let mut output = format!(
            "Gateway:    {}\nConnection: {}\nVoice mode: {}\nTurn:       {}\nMessages:   {}",
            ctx.url,
            ctx.status,
            ctx.mode,
            turn,
            snapshot.messages.len()
        );
        if let Some(phase) = &snapshot.current_phase {
            output.push_str(&format!("\nPhase:      {}", phase));
        }
        if let Some(error) = &snapshot.last_error {
            output.push_str(&format!("\nLast error: {}", error));
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nargis_agent::{ChatMessage, ConversationSnapshot, VoiceMode};
    use nargis_realtime::ConnectionStatus;

    #[test]
    fn test_describe_in_progress_turn() {
        let snapshot = ConversationSnapshot {
            processing: true,
            current_phase: Some("Using search…".into()),
            transcript: None,
            last_error: None,
            sealed: false,
            messages: vec![ChatMessage::user("hi")].into(),
        };
        let ctx = CommandContext {
            url: "ws://localhost:8080/ws",
            status: ConnectionStatus::Retrying,
            mode: VoiceMode::Agent,
            allow_agent_mode: true,
            snapshot: &snapshot,
        };
        let text = StatusCommand::describe(&ctx);
        assert!(text.contains("Connection: retrying"));
        assert!(text.contains("Voice mode: agent"));
        assert!(text.contains("Turn:       in progress"));
        assert!(text.contains("Messages:   1"));
        assert!(text.contains("Phase:      Using search…"));
        assert!(!text.contains("Last error"));
    }
}
