//! Best-effort session titles.

use crate::error::RelayError;
use crate::provider::{ChatTurn, Provider};
use crate::relay::Relay;
use crate::session::NEW_CHAT_TITLE;

const MAX_TITLE_CHARS: usize = 50;
const FALLBACK_CHARS: usize = 40;

fn title_prompt(message: &str) -> String {
    format!(
        "Generate a concise title of 3 to 6 words for a conversation that starts with the \
         message below. Reply with the title only, no quotes or punctuation at the end.\n\n{message}"
    )
}

/// Ask the selected provider for a title and clean it up.
pub async fn generate(relay: &Relay, message: &str, provider: Provider) -> Result<String, RelayError> {
    let raw = relay
        .complete(provider, vec![ChatTurn::user(title_prompt(message))])
        .await?;
    let title = clean_title(&raw);
    if title.is_empty() {
        return Err(RelayError::upstream("empty title"));
    }
    Ok(title)
}

/// [`generate`], falling back to the message prefix on any failure.
pub async fn title_or_fallback(relay: &Relay, message: &str, provider: Provider) -> String {
    if message.trim().is_empty() {
        return NEW_CHAT_TITLE.to_string();
    }
    match generate(relay, message, provider).await {
        Ok(title) => title,
        Err(e) => {
            tracing::warn!(error = %e, provider = provider.as_str(), "title generation failed; using message prefix");
            fallback_title(message)
        }
    }
}

pub fn fallback_title(message: &str) -> String {
    message.chars().take(FALLBACK_CHARS).collect()
}

/// Drop echoed reasoning, wrapping quotes and newlines; cap the length.
pub fn clean_title(raw: &str) -> String {
    let stripped = strip_think(raw);
    let unquoted = stripped
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`' | '\u{201c}' | '\u{201d}'));
    let title = unquoted
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if title.chars().count() > MAX_TITLE_CHARS {
        let cut: String = title.chars().take(MAX_TITLE_CHARS).collect();
        format!("{}...", cut.trim_end())
    } else {
        title
    }
}

fn strip_think(raw: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut s = raw.to_string();

    // A closing marker with no opener: everything before it was reasoning.
    if let Some(end) = s.find(CLOSE) {
        if !s[..end].contains(OPEN) {
            s.replace_range(..end + CLOSE.len(), "");
        }
    }

    while let Some(start) = s.find(OPEN) {
        match s[start..].find(CLOSE) {
            Some(rel) => s.replace_range(start..start + rel + CLOSE.len(), ""),
            // Unterminated: the rest is reasoning.
            None => s.truncate(start),
        }
    }
    s
}
