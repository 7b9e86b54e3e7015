use crate::provider::{ChatTurn, Role};
use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Title every session starts with until the first reply completes.
pub const NEW_CHAT_TITLE: &str = "New chat";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSession {
    pub id: String,
    pub title: String,
    /// Set by the one-time rewrite, whatever text it wrote.
    #[serde(default)]
    pub titled: bool,
    #[serde(default)]
    pub turns: Vec<ChatTurn>,
    pub created_at: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: NEW_CHAT_TITLE.to_string(),
            titled: false,
            turns: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn needs_title(&self) -> bool {
        !self.titled
    }

    /// Replace the placeholder title. Returns false if a title was already set.
    pub fn set_title_once(&mut self, title: impl Into<String>) -> bool {
        if self.titled {
            return false;
        }
        self.title = title.into();
        self.titled = true;
        true
    }

    pub fn first_user_message(&self) -> Option<&str> {
        self.turns
            .iter()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }

    pub fn push_turn(&mut self, turn: ChatTurn) {
        self.turns.push(turn);
    }

    /// Streaming append: only ever touches the most recent assistant turn.
    pub fn append_to_last_assistant(&mut self, text: &str) -> bool {
        match self.turns.iter_mut().rev().find(|t| t.role == Role::Assistant) {
            Some(turn) => {
                turn.content.push_str(text);
                true
            }
            None => false,
        }
    }
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}

/// All sessions plus which one is active, kept in one JSON file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SessionStore {
    #[serde(skip)]
    path: PathBuf,
    #[serde(default)]
    active: Option<String>,
    #[serde(default)]
    sessions: Vec<ConversationSession>,
}

impl SessionStore {
    /// Load the store, or start an empty one if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut store = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice::<SessionStore>(&bytes)
                .with_context(|| format!("failed to parse sessions: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SessionStore::default(),
            Err(e) => {
                return Err(anyhow!(e)).with_context(|| format!("failed to read sessions: {}", path.display()))
            }
        };
        store.path = path.to_path_buf();
        Ok(store)
    }

    /// Write atomically: temp file, then rename over the old one.
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create session directory: {}", dir.display()))?;

        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(self).context("failed to serialize sessions")?;
        std::fs::write(&tmp, bytes).with_context(|| format!("failed to write temp sessions: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to move sessions into place: {}", self.path.display()))?;
        Ok(())
    }

    /// Start a new session and make it active.
    pub fn create(&mut self) -> &mut ConversationSession {
        let session = ConversationSession::new();
        self.active = Some(session.id.clone());
        self.sessions.push(session);
        let last = self.sessions.len() - 1;
        &mut self.sessions[last]
    }

    /// The active session, creating one if there is none.
    pub fn active_mut(&mut self) -> &mut ConversationSession {
        let idx = self
            .active
            .as_deref()
            .and_then(|id| self.sessions.iter().position(|s| s.id == id));
        match idx {
            Some(i) => &mut self.sessions[i],
            None => self.create(),
        }
    }

    pub fn list(&self) -> &[ConversationSession] {
        &self.sessions
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.as_deref() == Some(id)
    }
}
