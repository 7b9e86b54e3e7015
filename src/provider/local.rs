use super::{ChatBackend, ChatTurn, Role, TextStream};
use crate::error::RelayError;
use futures_core::future::BoxFuture;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// Self-hosted model server speaking newline-delimited JSON on `/api/chat`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    http: reqwest::Client,
    chat_url: Url,
    model: String,
}

impl LocalBackend {
    pub fn new(http: reqwest::Client, base_url: &str, model: impl Into<String>) -> Result<Self, RelayError> {
        let base = Url::parse(base_url).map_err(|e| {
            tracing::error!(base_url, error = %e, "invalid local backend URL");
            RelayError::Unavailable
        })?;
        let chat_url = base.join("/api/chat").map_err(RelayError::upstream)?;
        Ok(Self {
            http,
            chat_url,
            model: model.into(),
        })
    }

    /// Backend for a running instance reachable at `address`.
    pub fn for_address(
        http: reqwest::Client,
        scheme: &str,
        address: &str,
        port: u16,
        model: impl Into<String>,
    ) -> Result<Self, RelayError> {
        Self::new(http, &format!("{scheme}://{address}:{port}/"), model)
    }

    fn body(&self, turns: &[ChatTurn], stream: bool) -> LocalChatRequest {
        // Image attachments are not forwarded to this backend.
        let messages = turns
            .iter()
            .map(|t| LocalMessage {
                role: t.role,
                content: t.content.clone(),
            })
            .collect();
        LocalChatRequest {
            model: self.model.clone(),
            messages,
            stream,
        }
    }

    async fn send(&self, body: &LocalChatRequest) -> Result<reqwest::Response, RelayError> {
        let resp = self
            .http
            .post(self.chat_url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(url = %self.chat_url, error = %e, "local backend request failed");
                RelayError::upstream("could not reach local model service")
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            tracing::error!(%status, body = %text, "local backend returned an error");
            return Err(RelayError::Upstream(format!("local model service returned HTTP {status}")));
        }
        Ok(resp)
    }
}

impl ChatBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn stream(&self, turns: Vec<ChatTurn>) -> BoxFuture<'static, Result<TextStream, RelayError>> {
        let this = self.clone();

        Box::pin(async move {
            let body = this.body(&turns, true);
            let resp = this.send(&body).await?;

            let (tx, rx) = mpsc::channel::<Result<String, RelayError>>(64);

            tokio::spawn(async move {
                let mut stream = resp.bytes_stream();
                let mut decoder = NdjsonDecoder::new();

                loop {
                    let item = tokio::select! {
                        item = stream.next() => item,
                        // Receiver gone: drop the upstream connection even while it is silent.
                        _ = tx.closed() => {
                            tracing::debug!("client went away; closing local stream");
                            return;
                        }
                    };
                    let Some(item) = item else { break };

                    let bytes = match item {
                        Ok(b) => b,
                        Err(e) => {
                            tracing::error!(error = %e, "local backend stream broke");
                            let _ = tx.send(Err(RelayError::Stream("connection to local model lost".into()))).await;
                            return;
                        }
                    };

                    for text in decoder.push(&bytes) {
                        if tx.send(Ok(text)).await.is_err() {
                            tracing::debug!("client went away; closing local stream");
                            return;
                        }
                    }
                }

                if let Some(text) = decoder.finish() {
                    let _ = tx.send(Ok(text)).await;
                }
            });

            Ok(Box::pin(ReceiverStream::new(rx)) as TextStream)
        })
    }

    fn complete(&self, turns: Vec<ChatTurn>) -> BoxFuture<'static, Result<String, RelayError>> {
        let this = self.clone();

        Box::pin(async move {
            let body = this.body(&turns, false);
            let resp = this.send(&body).await?;
            let chunk: LocalChunk = resp.json().await.map_err(|e| {
                tracing::error!(error = %e, "failed to parse local completion");
                RelayError::upstream("malformed response from local model service")
            })?;
            Ok(chunk.text().unwrap_or_default())
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct LocalChatRequest {
    model: String,
    messages: Vec<LocalMessage>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalMessage {
    role: Role,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LocalChunk {
    #[serde(default)]
    message: Option<LocalChunkMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LocalChunkMessage {
    #[serde(default)]
    content: Option<String>,
}

impl LocalChunk {
    fn text(self) -> Option<String> {
        self.message?.content.filter(|c| !c.is_empty())
    }
}

/// Incremental newline-delimited JSON decoder.
///
/// Bytes are buffered until a `\n` completes a line; each complete line is
/// parsed on its own. Lines that fail to parse are logged and skipped.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buf: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network read; returns the text fragments of every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(text) = parse_line(&line) {
                out.push(text);
            }
        }

        out
    }

    /// Flush whatever is left after the upstream closed.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        parse_line(&rest)
    }
}

fn parse_line(line: &[u8]) -> Option<String> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_slice::<LocalChunk>(line) {
        Ok(chunk) => {
            if let Some(err) = &chunk.error {
                tracing::warn!(error = %err, "local backend reported an error line");
            }
            chunk.text()
        }
        Err(e) => {
            tracing::warn!(error = %e, line = %String::from_utf8_lossy(line), "skipping malformed NDJSON line");
            None
        }
    }
}
