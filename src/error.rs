//! Typed failures for the relay, title and power boundaries.
//!
//! Upstream details are logged where they happen; the `Display` strings here
//! are what callers get to see.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The local instance is not running or has no reachable address.
    #[error("Local model service unavailable: instance is not running")]
    Unavailable,

    /// A credential the selected provider needs is not configured.
    #[error("{0} is not configured")]
    MissingCredential(&'static str),

    /// A credential is configured but cannot be sent as-is.
    #[error("{0} is not a valid HTTP header value")]
    InvalidCredential(&'static str),

    /// The upstream call failed before streaming started (connect error, non-2xx).
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    /// The upstream stream broke after it had started.
    #[error("Upstream stream error: {0}")]
    Stream(String),

    #[error("No messages provided")]
    EmptyConversation,
}

impl RelayError {
    pub fn upstream(e: impl std::fmt::Display) -> Self {
        Self::Upstream(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum PowerError {
    #[error("Invalid password")]
    InvalidCredential,

    /// No shared secret or no instance id configured; nothing can match.
    #[error("Power control is not configured")]
    MissingCredential,

    /// Provider-side failure. The message is for logs only.
    #[error("Failed to change instance state")]
    Provider(String),
}
