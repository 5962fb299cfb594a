//! Conversation state owned by the caller.
//!
//! The compression pipeline is stateless; agents that want continuity
//! between turns keep a [`SessionState`] per conversation in a
//! [`SessionStore`] they inject. Two stores ship with the crate: an
//! in-memory map for tests and single-process agents, and a file-backed
//! store with one directory per session:
//!
//! ```text
//! sessions_dir/
//!   chat-7f3a/
//!     state.json
//!   chat-91bc/
//!     state.json
//! ```

use crate::Message;
use crate::context::{CompressionInfo, CompressionResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

const STATE_FILE: &str = "state.json";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Everything remembered about one conversation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_compression: Option<CompressionInfo>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            last_compression: None,
            updated_at: Utc::now(),
        }
    }

    /// Replace the messages with a middleware result, remembering the
    /// compression stats when one happened.
    pub fn apply(&mut self, result: CompressionResult) {
        self.messages = result.messages;
        if let Some(info) = result.compression_info {
            self.last_compression = Some(info);
        }
        self.updated_at = Utc::now();
    }
}

/// Keyed storage for [`SessionState`].
pub trait SessionStore: Send + Sync {
    /// `Ok(None)` when no session exists under `id`.
    fn get(&self, id: &str) -> io::Result<Option<SessionState>>;
    fn put(&self, id: &str, state: &SessionState) -> io::Result<()>;
}

/// A process-local store.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, id: &str) -> io::Result<Option<SessionState>> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.get(id).cloned())
    }

    fn put(&self, id: &str, state: &SessionState) -> io::Result<()> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), state.clone());
        Ok(())
    }
}

/// One directory per session under a root directory.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    sessions_dir: PathBuf,
}

impl FileSessionStore {
    /// Create a store, ensuring the root directory exists.
    pub fn new(sessions_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let sessions_dir = sessions_dir.into();
        std::fs::create_dir_all(&sessions_dir)?;
        Ok(Self { sessions_dir })
    }

    pub fn dir(&self) -> &Path {
        &self.sessions_dir
    }

    fn state_path(&self, id: &str) -> io::Result<PathBuf> {
        validate_id(id)?;
        Ok(self.sessions_dir.join(id).join(STATE_FILE))
    }

    /// Ids of every session with a readable state file, sorted.
    pub fn list_ids(&self) -> io::Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.sessions_dir)? {
            let entry = entry?;
            if !entry.file_type().is_ok_and(|ft| ft.is_dir()) {
                continue;
            }
            if entry.path().join(STATE_FILE).is_file() {
                ids.push(entry.file_name().to_string_lossy().to_string());
            } else {
                debug!("Skipping {} (no {STATE_FILE})", entry.path().display());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Delete a session's directory. Missing sessions are not an error.
    pub fn remove(&self, id: &str) -> io::Result<()> {
        validate_id(id)?;
        let dir = self.sessions_dir.join(id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, id: &str) -> io::Result<Option<SessionState>> {
        let path = self.state_path(id)?;
        let json = match std::fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        serde_json::from_str(&json).map(Some).map_err(|e| {
            warn!("Malformed session state at {}: {e}", path.display());
            io::Error::new(io::ErrorKind::InvalidData, e)
        })
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    fn put(&self, id: &str, state: &SessionState) -> io::Result<()> {
        let final_path = self.state_path(id)?;
        let dir = self.sessions_dir.join(id);
        std::fs::create_dir_all(&dir)?;

        // Unique per writer, so concurrent puts never rename each other's file.
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp_path = dir.join(format!(".{STATE_FILE}.{}.{seq}.tmp", std::process::id()));
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &final_path)
    }
}

/// Session ids become directory names, so they must be a single plain
/// path component.
fn validate_id(id: &str) -> io::Result<()> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\'])
        || id.contains('\0');
    if bad {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid session id '{id}'"),
        ));
    }
    Ok(())
}
