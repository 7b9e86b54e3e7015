pub mod cloud;
pub mod local;

use crate::error::RelayError;
use futures_core::future::BoxFuture;
use futures_core::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Normalized reply: plain text pieces in arrival order.
pub type TextStream = BoxStream<'static, Result<String, RelayError>>;

/// Which upstream serves a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Self-hosted model on the managed instance.
    #[default]
    Local,
    /// Hosted OpenAI-compatible API.
    Cloud,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    #[serde(default = "new_turn_id")]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Encoded images: data URLs, http(s) URLs or bare base64.
    #[serde(
        default,
        rename = "attachedImages",
        alias = "images",
        skip_serializing_if = "Option::is_none"
    )]
    pub attached_images: Option<Vec<String>>,
}

fn new_turn_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_turn_id(),
            role,
            content: content.into(),
            attached_images: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.attached_images = if images.is_empty() { None } else { Some(images) };
        self
    }

    pub fn images(&self) -> &[String] {
        self.attached_images.as_deref().unwrap_or_default()
    }
}

/// Chat-completion backend.
///
/// `stream` resolves once the upstream accepted the request; connection and
/// non-2xx failures surface there, before any text is produced.
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start streaming a reply.
    fn stream(&self, turns: Vec<ChatTurn>) -> BoxFuture<'static, Result<TextStream, RelayError>>;

    /// One non-streaming completion.
    fn complete(&self, turns: Vec<ChatTurn>) -> BoxFuture<'static, Result<String, RelayError>>;
}
