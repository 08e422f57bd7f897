//! Per-user conversation history, persisted between runs

use nargis_agent::ChatMessage;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Bumped when the file layout changes; older files are ignored
const HISTORY_VERSION: u32 = 1;

/// On-disk layout
#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    version: u32,
    user: String,
    saved_at: i64,
    messages: Vec<ChatMessage>,
}

/// History store for one user
pub struct HistoryStore {
    user: String,
    path: PathBuf,
}

impl HistoryStore {
    /// Get the history directory
    pub fn history_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nargis")
            .join("history")
    }

    /// Store for `user` under the default directory
    pub fn for_user(user: &str) -> Self {
        Self::in_dir(&Self::history_dir(), user)
    }

    /// Store for `user` under `dir`
    pub fn in_dir(dir: &Path, user: &str) -> Self {
        Self {
            user: user.to_string(),
            path: dir.join(format!("{}.json", file_stem(user))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load saved messages. A missing or unreadable file yields no history.
    pub fn load(&self) -> Vec<ChatMessage> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!("Failed to read history {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<HistoryFile>(&content) {
            Ok(file) if file.version == HISTORY_VERSION => file.messages,
            Ok(file) => {
                tracing::warn!("Ignoring history file with version {}", file.version);
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("Failed to parse history {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    /// Replace the saved history with `messages`
    pub fn save(&self, messages: &[ChatMessage]) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = HistoryFile {
            version: HISTORY_VERSION,
            user: self.user.clone(),
            saved_at: chrono::Utc::now().timestamp_millis(),
            messages: messages.to_vec(),
        };
        let content = serde_json::to_string_pretty(&file)?;

        // Write then rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)
    }
}

/// Map a user key to a safe file name
fn file_stem(user: &str) -> String {
    let stem: String = user
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "default".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nargis_agent::Role;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "nargis-history-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_save_then_load() {
        let dir = temp_dir("roundtrip");
        let store = HistoryStore::in_dir(&dir, "sam");
        let messages = vec![
            ChatMessage::user("add milk"),
            ChatMessage::assistant("Added.", vec!["Using create_task…".into()]),
        ];
        store.save(&messages).unwrap();

        let loaded = HistoryStore::in_dir(&dir, "sam").load();
        assert_eq!(loaded, messages);
        assert_eq!(loaded[1].role, Role::Assistant);

        // Other users are separate
        assert!(HistoryStore::in_dir(&dir, "alex").load().is_empty());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = temp_dir("missing");
        assert!(HistoryStore::in_dir(&dir, "nobody").load().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = temp_dir("corrupt");
        let store = HistoryStore::in_dir(&dir, "sam");
        fs::create_dir_all(&dir).unwrap();
        fs::write(store.path(), "{not json").unwrap();
        assert!(store.load().is_empty());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_stem_is_sanitized() {
        assert_eq!(file_stem("user@example.com"), "user_example_com");
        assert_eq!(file_stem("../etc"), "___etc");
        assert_eq!(file_stem(""), "default");
    }
}
