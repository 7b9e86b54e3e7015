use super::{ChatBackend, ChatTurn, Role, TextStream};
use crate::error::RelayError;
use futures_core::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

pub const IMAGE_ONLY_PROMPT: &str = "Describe this image.";

/// Hosted OpenAI-compatible chat-completions API.
#[derive(Clone)]
pub struct CloudBackend {
    http: reqwest::Client,
    api_key: String,
    api_base: Url,
    model: String,
}

impl std::fmt::Debug for CloudBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudBackend")
            .field("api_base", &self.api_base.as_str())
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl CloudBackend {
    pub fn new(
        http: reqwest::Client,
        api_base: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let base = if api_base.ends_with('/') {
            api_base.to_string()
        } else {
            format!("{api_base}/")
        };
        Ok(Self {
            http,
            api_key: api_key.into(),
            api_base: Url::parse(&base)?,
            model: model.into(),
        })
    }

    fn headers(&self) -> Result<HeaderMap, RelayError> {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let v = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| RelayError::InvalidCredential("cloud API key"))?;
        h.insert(AUTHORIZATION, v);
        Ok(h)
    }

    async fn send(&self, body: &ChatCompletionRequest) -> Result<reqwest::Response, RelayError> {
        let url = self
            .api_base
            .join("chat/completions")
            .map_err(RelayError::upstream)?;

        let resp = self
            .http
            .post(url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "cloud request failed");
                RelayError::upstream("could not reach cloud model API")
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            tracing::error!(%status, body = %text, "cloud API returned an error");
            return Err(RelayError::Upstream(format!("cloud model API returned HTTP {status}")));
        }
        Ok(resp)
    }
}

impl ChatBackend for CloudBackend {
    fn name(&self) -> &'static str {
        "cloud"
    }

    fn stream(&self, turns: Vec<ChatTurn>) -> BoxFuture<'static, Result<TextStream, RelayError>> {
        let this = self.clone();

        Box::pin(async move {
            let body = ChatCompletionRequest {
                model: this.model.clone(),
                messages: to_cloud_messages(&turns),
                stream: true,
            };
            let resp = this.send(&body).await?;

            let (tx, rx) = mpsc::channel::<Result<String, RelayError>>(64);

            tokio::spawn(async move {
                let mut stream = resp.bytes_stream();
                let mut parser = SseParser::new();

                loop {
                    let item = tokio::select! {
                        item = stream.next() => item,
                        // Receiver gone: drop the upstream connection even if it is idle.
                        _ = tx.closed() => {
                            tracing::debug!("client went away; closing cloud stream");
                            return;
                        }
                    };
                    let Some(item) = item else { break };

                    let bytes = match item {
                        Ok(b) => b,
                        Err(e) => {
                            tracing::error!(error = %e, "cloud stream broke");
                            let _ = tx.send(Err(RelayError::Stream("connection to cloud API lost".into()))).await;
                            return;
                        }
                    };

                    for data in parser.push(&bytes) {
                        if !forward_event(&tx, &data).await {
                            return;
                        }
                    }
                }

                if let Some(data) = parser.finish() {
                    forward_event(&tx, &data).await;
                }
            });

            Ok(Box::pin(ReceiverStream::new(rx)) as TextStream)
        })
    }

    fn complete(&self, turns: Vec<ChatTurn>) -> BoxFuture<'static, Result<String, RelayError>> {
        let this = self.clone();

        Box::pin(async move {
            let body = ChatCompletionRequest {
                model: this.model.clone(),
                messages: to_cloud_messages(&turns),
                stream: false,
            };
            let resp = this.send(&body).await?;
            let parsed: ChatCompletionResponse = resp.json().await.map_err(|e| {
                tracing::error!(error = %e, "failed to parse cloud completion");
                RelayError::upstream("malformed response from cloud model API")
            })?;

            Ok(parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default())
        })
    }
}

/// Send one SSE payload downstream. Returns false once the stream is over.
async fn forward_event(tx: &mpsc::Sender<Result<String, RelayError>>, data: &str) -> bool {
    match parse_event(data) {
        Delta::Text(text) => {
            if tx.send(Ok(text)).await.is_err() {
                tracing::debug!("client went away; closing cloud stream");
                return false;
            }
            true
        }
        Delta::Empty => true,
        Delta::Done => false,
        Delta::Failed(msg) => {
            tracing::error!(error = %msg, "cloud API reported an error mid-stream");
            let _ = tx.send(Err(RelayError::Stream("cloud model API reported an error".into()))).await;
            false
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<CloudMessage>,
    stream: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloudMessage {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    ImageUrl { image_url: ImageUrl },
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Translate turns into the multimodal message format. User turns carrying
/// images become `[image.., text]`; everything else stays plain text.
pub fn to_cloud_messages(turns: &[ChatTurn]) -> Vec<CloudMessage> {
    turns
        .iter()
        .map(|t| {
            let images = t.images();
            let content = if t.role == Role::User && !images.is_empty() {
                let text = if t.content.trim().is_empty() {
                    IMAGE_ONLY_PROMPT.to_string()
                } else {
                    t.content.clone()
                };
                let mut parts: Vec<ContentPart> = images
                    .iter()
                    .map(|img| ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image_reference(img),
                        },
                    })
                    .collect();
                parts.push(ContentPart::Text { text });
                MessageContent::Parts(parts)
            } else {
                MessageContent::Text(t.content.clone())
            };
            CloudMessage { role: t.role, content }
        })
        .collect()
}

/// Bare base64 payloads are wrapped as JPEG data URLs; URLs pass through.
fn image_reference(img: &str) -> String {
    let img = img.trim();
    if img.starts_with("data:") || img.starts_with("https://") || img.starts_with("http://") {
        img.to_string()
    } else {
        format!("data:image/jpeg;base64,{img}")
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, PartialEq)]
enum Delta {
    Text(String),
    Empty,
    Done,
    Failed(String),
}

fn parse_event(data: &str) -> Delta {
    let data = data.trim();
    if data.is_empty() {
        return Delta::Empty;
    }
    if data == "[DONE]" {
        return Delta::Done;
    }

    match serde_json::from_str::<ChatCompletionChunk>(data) {
        Ok(chunk) => {
            if let Some(err) = chunk.error {
                return Delta::Failed(err.to_string());
            }
            match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
                Some(text) if !text.is_empty() => Delta::Text(text),
                _ => Delta::Empty,
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, %data, "skipping malformed SSE event");
            Delta::Empty
        }
    }
}

/// Minimal SSE parser.
///
/// - Collects UTF-8 lines
/// - Yields the joined `data:` payload when a blank line ends an event
struct SseParser {
    buf: Vec<u8>,
    cur_data: String,
}

impl SseParser {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            cur_data: String::new(),
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.drain(..=pos).collect::<Vec<u8>>();
            line.pop();
            if let Some(data) = self.feed_line(&line) {
                out.push(data);
            }
        }

        out
    }

    /// End of body: an unterminated line and any pending `data:` lines form a last event.
    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        if let Some(data) = self.feed_line(&rest) {
            return Some(data);
        }
        self.take_event()
    }

    fn feed_line(&mut self, line: &[u8]) -> Option<String> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            return self.take_event();
        }

        let Ok(s) = std::str::from_utf8(line) else {
            tracing::warn!("SSE line is not valid UTF-8");
            return None;
        };

        // Other fields (event:, id:, retry:, comments) carry nothing we use.
        if let Some(rest) = s.strip_prefix("data:") {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            self.cur_data.push_str(rest);
            self.cur_data.push('\n');
        }
        None
    }

    fn take_event(&mut self) -> Option<String> {
        if self.cur_data.is_empty() {
            return None;
        }
        if self.cur_data.ends_with('\n') {
            self.cur_data.pop();
        }
        Some(std::mem::take(&mut self.cur_data))
    }
}
