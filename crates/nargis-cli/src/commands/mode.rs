//! /mode command - show and set voice mode

use super::CommandResult;
use nargis_agent::VoiceMode;

pub struct ModeCommand;

impl ModeCommand {
    pub fn execute(args: &str, current: VoiceMode, allow_agent_mode: bool) -> CommandResult {
        if args.is_empty() {
            return CommandResult::Message(show_modes(current, allow_agent_mode));
        }

        match args.parse::<VoiceMode>() {
            Ok(VoiceMode::Agent) if !allow_agent_mode => CommandResult::Message(
                "Agent mode is disabled.\nEnable it with allow_agent_mode = true under [agent] in the config file."
                    .to_string(),
            ),
            Ok(mode) => CommandResult::ChangeMode(mode),
            Err(e) => CommandResult::Message(e),
        }
    }
}

fn show_modes(current: VoiceMode, allow_agent_mode: bool) -> String {
    let modes = [
        (VoiceMode::Chat, "Conversational replies"),
        (VoiceMode::Agent, "Assistant may use tools"),
    ];

    let mut output = String::from("Voice modes:\n\n");

    for (mode, desc) in modes {
        let marker = if mode == current { " *" } else { "" };
        let note = if mode == VoiceMode::Agent && !allow_agent_mode {
            " (disabled)"
        } else {
            ""
        };
        output.push_str(&format!("  {:<8} {}{}{}\n", mode, desc, note, marker));
    }

    output.push_str("\nSet with: /mode <mode>");
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_marks_current() {
        let CommandResult::Message(text) = ModeCommand::execute("", VoiceMode::Chat, false) else {
            panic!("expected message");
        };
        assert!(text.contains("chat     Conversational replies *"));
        assert!(text.contains("(disabled)"));
    }

    #[test]
    fn test_agent_requires_opt_in() {
        assert!(matches!(
            ModeCommand::execute("agent", VoiceMode::Chat, false),
            CommandResult::Message(_)
        ));
        assert_eq!(
            ModeCommand::execute("agent", VoiceMode::Chat, true),
            CommandResult::ChangeMode(VoiceMode::Agent)
        );
    }

    #[test]
    fn test_unknown_mode() {
        let CommandResult::Message(text) = ModeCommand::execute("loud", VoiceMode::Chat, true)
        else {
            panic!("expected message");
        };
        assert!(text.contains("unknown voice mode 'loud'"));
    }
}
