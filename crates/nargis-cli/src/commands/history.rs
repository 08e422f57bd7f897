//! /history command - show recent messages

use super::CommandResult;
use crate::utils::{format_timestamp, truncate_chars};
use nargis_agent::{ChatMessage, Role};

const DEFAULT_LIMIT: usize = 20;
const PREVIEW_CHARS: usize = 100;

pub struct HistoryCommand;

impl HistoryCommand {
    pub fn execute(args: &str, messages: &[ChatMessage]) -> CommandResult {
        let limit = if args.is_empty() {
            DEFAULT_LIMIT
        } else {
            match args.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return CommandResult::Message(format!(
                        "Invalid count: '{}'\nUsage: /history [n]",
                        args
                    ));
                }
            }
        };
        CommandResult::Message(render(messages, limit))
    }
}

fn render(messages: &[ChatMessage], limit: usize) -> String {
    if messages.is_empty() {
        return "No messages yet.".to_string();
    }

    let start = messages.len().saturating_sub(limit);
    let mut output = format!("Showing {} of {} messages:\n", messages.len() - start, messages.len());
    for (i, message) in messages.iter().enumerate().skip(start) {
        let role = match message.role {
            Role::User => "you",
            Role::Assistant => "nargis",
        };
        let preview = truncate_chars(&message.text, PREVIEW_CHARS).replace('\n', " ");
        output.push_str(&format!(
            "\n  {:>3} {} [{}] {}",
            i,
            format_timestamp(message.ts),
            role,
            preview
        ));
        if !message.thoughts.is_empty() {
            output.push_str(&format!(" ({} steps)", message.thoughts.len()));
        }
    }
    output
}
