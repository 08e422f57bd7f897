//! nargis - terminal client for the nargis voice gateway

mod commands;
mod config;
mod history;
mod render;
mod utils;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use nargis_agent::{ChatMessage, RealtimeSession, SessionConfig, VoiceMode};
use nargis_realtime::{ConnectionConfig, RetryConfig};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use crate::commands::{CommandContext, CommandResult};
use crate::history::HistoryStore;
use crate::render::Renderer;

/// Bytes per audio frame when streaming a file
const AUDIO_CHUNK_BYTES: usize = 16 * 1024;

/// nargis - talk to your assistant from the terminal
#[derive(Parser, Debug)]
#[command(name = "nargis")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Gateway WebSocket URL (default: ws://localhost:8080/ws)
    #[arg(short, long)]
    url: Option<String>,

    /// Voice mode (chat, agent)
    #[arg(short, long)]
    mode: Option<VoiceMode>,

    /// Consecutive reconnect attempts before giving up
    #[arg(long)]
    max_retries: Option<u32>,

    /// First reconnect delay in milliseconds
    #[arg(long)]
    base_delay_ms: Option<u64>,

    /// Send one text message, print the reply and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Stream an audio file as one spoken turn and exit
    #[arg(long, conflicts_with = "command")]
    audio: Option<std::path::PathBuf>,

    /// History key (default: $USER)
    #[arg(long)]
    user: Option<String>,

    /// Do not load or save conversation history
    #[arg(long)]
    no_history: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing; logs go to stderr so replies stay pipeable
    let filter = if args.verbose {
        EnvFilter::new("nargis=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    // Load config file
    let cfg = config::Config::load();

    // Merge config with CLI args (CLI takes precedence)
    let url = args
        .url
        .or(cfg.url.clone())
        .unwrap_or_else(|| config::DEFAULT_URL.to_string());

    let mode = match args.mode {
        Some(mode) => mode,
        None => match cfg.mode.as_deref().map(str::parse::<VoiceMode>) {
            Some(Ok(mode)) => mode,
            Some(Err(e)) => {
                eprintln!("Warning: {} in config, using chat", e);
                VoiceMode::Chat
            }
            None => VoiceMode::Chat,
        },
    };

    let retry = RetryConfig {
        max_retries: args
            .max_retries
            .or(cfg.connection.max_retries)
            .unwrap_or(config::DEFAULT_MAX_RETRIES),
        initial_delay: Duration::from_millis(
            args.base_delay_ms
                .or(cfg.connection.base_delay_ms)
                .unwrap_or(config::DEFAULT_BASE_DELAY_MS),
        ),
        ..Default::default()
    };
    let retry = match cfg.connection.max_delay_ms {
        Some(ms) => RetryConfig {
            max_delay: Some(Duration::from_millis(ms)),
            ..retry
        },
        None => retry,
    };

    let mut connection = ConnectionConfig::new(url).with_retry(retry);
    if let Some(max_queued) = cfg.connection.max_queued {
        connection = connection.with_max_queued(max_queued);
    }

    let store = if args.no_history || cfg.history == Some(false) {
        None
    } else {
        let user = args
            .user
            .or(cfg.user.clone())
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "default".to_string());
        Some(HistoryStore::for_user(&user))
    };

    let mut session_config = SessionConfig {
        mode,
        allow_agent_mode: cfg.agent.allow_agent_mode.unwrap_or(false),
        history: store.as_ref().map(HistoryStore::load).unwrap_or_default(),
        ..Default::default()
    };
    if let Some(ms) = cfg.agent.open_timeout_ms {
        session_config.open_timeout = Duration::from_millis(ms);
    }
    let turn_timeout = Duration::from_secs(
        cfg.agent
            .turn_timeout_secs
            .unwrap_or(config::DEFAULT_TURN_TIMEOUT_SECS),
    );

    let session = Arc::new(RealtimeSession::websocket(connection, session_config)?);

    if let Some(text) = args.command {
        let result = run_command(&session, &text, turn_timeout).await;
        save_history(store.as_ref(), &session.snapshot().messages);
        session.close();
        if let Err(e) = result {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        return Ok(());
    }

    if let Some(path) = args.audio {
        let result = run_audio(&session, &path, turn_timeout).await;
        save_history(store.as_ref(), &session.snapshot().messages);
        session.close();
        if let Err(e) = result {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        return Ok(());
    }

    let result = run_interactive(Arc::clone(&session), store).await;
    session.close();
    result
}

/// Send one text message and print everything the turn produced
async fn run_command(
    session: &RealtimeSession,
    text: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let mut renderer = Renderer::new(&session.snapshot());
    session.send_text(text)?;
    finish_turn(session, &mut renderer, timeout).await
}

/// Stream an audio file as one utterance and print the turn
async fn run_audio(session: &RealtimeSession, path: &Path, timeout: Duration) -> anyhow::Result<()> {
    let mut renderer = Renderer::new(&session.snapshot());
    session.start_listening().await?;
    stream_audio(session, path).await?;
    finish_turn(session, &mut renderer, timeout).await
}

async fn finish_turn(
    session: &RealtimeSession,
    renderer: &mut Renderer,
    timeout: Duration,
) -> anyhow::Result<()> {
    let snapshot = session.wait_for_turn_end(timeout).await?;
    for line in renderer.update(&snapshot) {
        println!("{}", line);
    }
    if let Some(error) = snapshot.last_error {
        anyhow::bail!(error);
    }
    Ok(())
}

/// Send a file as binary frames, then mark the end of the utterance
async fn stream_audio(session: &RealtimeSession, path: &Path) -> anyhow::Result<()> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
    let mut buf = vec![0u8; AUDIO_CHUNK_BYTES];
    let mut total = 0usize;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        session.send_audio(&buf[..n]);
        total += n;
    }
    tracing::debug!("Streamed {} bytes from {}", total, path.display());
    session.end_utterance();
    Ok(())
}

fn save_history(store: Option<&HistoryStore>, messages: &[ChatMessage]) {
    if let Some(store) = store {
        if let Err(e) = store.save(messages) {
            tracing::warn!("Failed to save history to {}: {}", store.path().display(), e);
        }
    }
}

/// Print snapshot changes, notices and status transitions until the
/// session goes away. History is saved whenever the message list changes.
async fn render_loop(session: Arc<RealtimeSession>, store: Option<HistoryStore>) {
    let mut snapshots = session.subscribe();
    let mut notices = session.notices();
    let mut statuses = session.status_updates();

    let initial = snapshots.borrow_and_update().clone();
    let mut renderer = Renderer::new(&initial);
    let mut saved = Arc::clone(&initial.messages);
    drop(session);

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                for line in renderer.update(&snapshot) {
                    println!("{}", line);
                }
                if !Arc::ptr_eq(&saved, &snapshot.messages) {
                    save_history(store.as_ref(), &snapshot.messages);
                    saved = Arc::clone(&snapshot.messages);
                }
            }
            notice = notices.recv() => match notice {
                Ok(notice) => eprintln!("{}", render::render_notice(&notice)),
                Err(RecvError::Lagged(n)) => tracing::warn!("Dropped {} notices", n),
                Err(RecvError::Closed) => break,
            },
            changed = statuses.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *statuses.borrow_and_update();
                eprintln!("{}", render::status_badge(status));
            }
        }
    }
}

async fn run_interactive(
    session: Arc<RealtimeSession>,
    store: Option<HistoryStore>,
) -> anyhow::Result<()> {
    let allow_agent_mode = session.allows_agent_mode();

    // Show minimal startup info (only if TTY)
    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        eprintln!("nargis ({}) {}", session.voice_mode(), session.url());
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    let renderer = tokio::spawn(render_loop(Arc::clone(&session), store));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                // First Ctrl-C cancels a running turn, a second one exits
                if session.snapshot().processing {
                    session.stop();
                    continue;
                }
                break;
            }
        };

        // EOF
        let Some(line) = line else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        // Handle slash commands
        if input.starts_with('/') {
            let snapshot = session.snapshot();
            let ctx = CommandContext {
                url: session.url(),
                status: session.status(),
                mode: session.voice_mode(),
                allow_agent_mode,
                snapshot: &snapshot,
            };
            let Some(result) = commands::execute_command(input, &ctx) else {
                continue;
            };
            match result {
                CommandResult::Listen(path) => {
                    if let Err(e) = session.start_listening().await {
                        eprintln!("Error: {}", e);
                        if e.is_transient() {
                            eprintln!("The connection is still retrying; try /listen again shortly.");
                        }
                        continue;
                    }
                    match path {
                        Some(path) => {
                            if let Err(e) = stream_audio(&session, &path).await {
                                eprintln!("Error: {}", e);
                            }
                        }
                        None => eprintln!("Listening. Use /stop to cancel."),
                    }
                }
                CommandResult::Stop => session.stop(),
                CommandResult::ChangeMode(mode) => match session.set_voice_mode(mode) {
                    Ok(()) => println!("Voice mode: {}", mode),
                    Err(e) => eprintln!("Error: {}", e),
                },
                CommandResult::Clear => {
                    session.clear_messages();
                    println!("Conversation cleared.");
                }
                CommandResult::Message(message) => println!("{}", message),
                CommandResult::Exit => break,
                CommandResult::Unknown(command) => {
                    eprintln!("Unknown command: /{}. Type /help for commands.", command);
                }
            }
            continue;
        }

        if let Err(e) = session.send_text(input) {
            eprintln!("Error: {}", e);
        }
    }

    renderer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "nargis",
            "--url",
            "wss://gateway.example/ws",
            "--mode",
            "agent",
            "--max-retries",
            "3",
            "-c",
            "what's on my list?",
        ])
        .unwrap();
        assert_eq!(args.url.as_deref(), Some("wss://gateway.example/ws"));
        assert_eq!(args.mode, Some(VoiceMode::Agent));
        assert_eq!(args.max_retries, Some(3));
        assert_eq!(args.command.as_deref(), Some("what's on my list?"));
        assert!(!args.no_history);
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        assert!(Args::try_parse_from(["nargis", "--mode", "shout"]).is_err());
    }

    #[test]
    fn test_command_and_audio_conflict() {
        assert!(Args::try_parse_from(["nargis", "-c", "hi", "--audio", "clip.webm"]).is_err());
    }
}
