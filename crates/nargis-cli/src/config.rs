//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Gateway endpoint used when neither the flag nor the config names one
pub const DEFAULT_URL: &str = "ws://localhost:8080/ws";

/// Reconnect ceiling used by the web client
pub const DEFAULT_MAX_RETRIES: u32 = 6;

pub const DEFAULT_BASE_DELAY_MS: u64 = 500;

pub const DEFAULT_TURN_TIMEOUT_SECS: u64 = 120;

/// Configuration for nargis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gateway WebSocket URL
    pub url: Option<String>,
    /// Default voice mode (chat, agent)
    pub mode: Option<String>,
    /// Key for per-user history
    pub user: Option<String>,
    /// Whether to persist conversation history
    pub history: Option<bool>,
    /// Reconnect and queueing settings
    #[serde(default)]
    pub connection: ConnectionSettings,
    /// Conversation settings
    #[serde(default)]
    pub agent: AgentSettings,
}

/// Connection settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub max_queued: Option<usize>,
}

/// Conversation settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Allow switching to agent voice mode
    pub allow_agent_mode: Option<bool>,
    /// How long to wait for the channel before listening, in milliseconds
    pub open_timeout_ms: Option<u64>,
    /// How long `-c` waits for a reply, in seconds
    pub turn_timeout_secs: Option<u64>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nargis")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("NARGIS_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Self::default()
            }),
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Parse config from TOML text
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            url: Some(DEFAULT_URL.to_string()),
            mode: Some("chat".to_string()),
            user: None,
            history: Some(true),
            connection: ConnectionSettings {
                max_retries: Some(DEFAULT_MAX_RETRIES),
                base_delay_ms: Some(DEFAULT_BASE_DELAY_MS),
                max_delay_ms: None,
                max_queued: None,
            },
            agent: AgentSettings {
                allow_agent_mode: Some(false),
                open_timeout_ms: None,
                turn_timeout_secs: Some(DEFAULT_TURN_TIMEOUT_SECS),
            },
        };

        default_config.save()?;
        Ok(path)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# nargis configuration file
# Place at ~/.config/nargis/config.toml (Linux/Mac) or %APPDATA%\nargis\config.toml (Windows)

# Gateway WebSocket endpoint
url = "ws://localhost:8080/ws"

# Default voice mode (chat, agent)
mode = "chat"

# History key; conversations are saved per user
# user = "me"

# Persist conversation history between runs
history = true

[connection]
# Consecutive reconnect attempts before giving up
max_retries = 6
# First reconnect delay; doubles on each consecutive failure
base_delay_ms = 500
# Optional upper bound on a single delay (unbounded when unset)
# max_delay_ms = 60000
# Messages held while disconnected (overflow is dropped)
# max_queued = 64

[agent]
# Agent mode runs tools on the gateway
allow_agent_mode = false
# open_timeout_ms = 4000
turn_timeout_secs = 120
"#
}
