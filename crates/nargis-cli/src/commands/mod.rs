//! Slash commands for interactive mode

mod history;
mod mode;
mod status;

pub use history::HistoryCommand;
pub use mode::ModeCommand;
pub use status::StatusCommand;

use std::path::PathBuf;

use nargis_agent::{ConversationSnapshot, VoiceMode};
use nargis_realtime::ConnectionStatus;

/// Session state a command may read
pub struct CommandContext<'a> {
    pub url: &'a str,
    pub status: ConnectionStatus,
    pub mode: VoiceMode,
    pub allow_agent_mode: bool,
    pub snapshot: &'a ConversationSnapshot,
}

/// Result of executing a slash command
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// Start a spoken turn, optionally streaming an audio file
    Listen(Option<PathBuf>),
    /// Cancel the current turn
    Stop,
    /// Switch voice mode
    ChangeMode(VoiceMode),
    /// Clear the conversation
    Clear,
    /// Show a message to the user (not sent to the gateway)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command
pub fn execute_command(input: &str, ctx: &CommandContext<'_>) -> Option<CommandResult> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let (command, args) = match rest.split_once(char::is_whitespace) {
        Some((command, args)) => (command, args.trim()),
        None => (rest, ""),
    };
    let command = command.to_lowercase();

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "listen" | "l" => {
            CommandResult::Listen((!args.is_empty()).then(|| PathBuf::from(args)))
        }

        "stop" => CommandResult::Stop,

        "mode" | "m" => ModeCommand::execute(args, ctx.mode, ctx.allow_agent_mode),

        "status" | "s" => CommandResult::Message(StatusCommand::describe(ctx)),

        "history" | "hist" => HistoryCommand::execute(args, &ctx.snapshot.messages),

        "clear" | "c" => CommandResult::Clear,

        "quit" | "exit" | "q" => CommandResult::Exit,

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?          Show this help message
  /listen, /l [file]     Start a voice turn; streams an audio file if given
  /stop                  Cancel the current turn
  /mode, /m [mode]       Show or set voice mode (chat/agent)
  /status, /s            Show connection and turn status
  /history [n]           Show the last n messages (default 20)
  /clear, /c             Clear conversation history
  /quit, /exit, /q       Exit nargis

Anything else is sent as a text message.

Examples:
  /listen note.webm      Send a recorded clip as one utterance
  /mode agent            Let the assistant use tools
  /history 5             Show the last five messages"#
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ConversationSnapshot {
        ConversationSnapshot {
            processing: false,
            current_phase: None,
            transcript: None,
            last_error: None,
            sealed: false,
            messages: Vec::<nargis_agent::ChatMessage>::new().into(),
        }
    }

    fn run(input: &str) -> Option<CommandResult> {
        let snapshot = snapshot();
        let ctx = CommandContext {
            url: "ws://localhost:8080/ws",
            status: ConnectionStatus::Open,
            mode: VoiceMode::Chat,
            allow_agent_mode: true,
            snapshot: &snapshot,
        };
        execute_command(input, &ctx)
    }

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(run("hello there"), None);
    }

    #[test]
    fn test_basic_commands() {
        assert_eq!(run("/stop"), Some(CommandResult::Stop));
        assert_eq!(run("/clear"), Some(CommandResult::Clear));
        assert_eq!(run("/QUIT"), Some(CommandResult::Exit));
        assert_eq!(run("/q"), Some(CommandResult::Exit));
        assert!(matches!(run("/help"), Some(CommandResult::Message(_))));
    }

    #[test]
    fn test_listen_with_and_without_file() {
        assert_eq!(run("/listen"), Some(CommandResult::Listen(None)));
        assert_eq!(
            run("/l  clip.webm "),
            Some(CommandResult::Listen(Some(PathBuf::from("clip.webm"))))
        );
    }

    #[test]
    fn test_mode_switch() {
        assert_eq!(
            run("/mode agent"),
            Some(CommandResult::ChangeMode(VoiceMode::Agent))
        );
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            run("/dance now"),
            Some(CommandResult::Unknown("dance".into()))
        );
    }
}
