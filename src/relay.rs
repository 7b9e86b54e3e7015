//! Provider selection in front of the two chat backends.

use crate::error::RelayError;
use crate::instance::Monitor;
use crate::provider::cloud::CloudBackend;
use crate::provider::local::LocalBackend;
use crate::provider::{ChatBackend, ChatTurn, Provider, TextStream};
use std::sync::Arc;

/// Where the local model listens once the instance has an address.
#[derive(Debug, Clone)]
pub struct LocalTarget {
    pub scheme: String,
    pub port: u16,
    pub model: String,
}

pub struct Relay {
    http: reqwest::Client,
    monitor: Monitor,
    local: LocalTarget,
    cloud: Option<Arc<CloudBackend>>,
}

impl Relay {
    /// `cloud` is `None` when no API key is configured.
    pub fn new(http: reqwest::Client, monitor: Monitor, local: LocalTarget, cloud: Option<CloudBackend>) -> Self {
        Self {
            http,
            monitor,
            local,
            cloud: cloud.map(Arc::new),
        }
    }

    /// Resolve the backend for `provider`, checking its preconditions.
    pub async fn backend(&self, provider: Provider) -> Result<Arc<dyn ChatBackend>, RelayError> {
        match provider {
            Provider::Local => {
                let status = self.monitor.get_status().await;
                let Some(address) = status.reachable_address() else {
                    tracing::info!(state = %status.state, "local backend requested while instance is not running");
                    return Err(RelayError::Unavailable);
                };
                let backend = LocalBackend::for_address(
                    self.http.clone(),
                    &self.local.scheme,
                    address,
                    self.local.port,
                    self.local.model.clone(),
                )?;
                Ok(Arc::new(backend) as Arc<dyn ChatBackend>)
            }
            Provider::Cloud => match &self.cloud {
                Some(cloud) => Ok(cloud.clone() as Arc<dyn ChatBackend>),
                None => Err(RelayError::MissingCredential("OpenAI API key")),
            },
        }
    }

    /// Stream the assistant reply to `turns` as plain text pieces.
    pub async fn stream(&self, provider: Provider, turns: Vec<ChatTurn>) -> Result<TextStream, RelayError> {
        if turns.is_empty() {
            return Err(RelayError::EmptyConversation);
        }
        let backend = self.backend(provider).await?;
        tracing::debug!(backend = backend.name(), turns = turns.len(), "relaying chat");
        backend.stream(turns).await
    }

    /// Non-streaming completion through the same provider selection.
    pub async fn complete(&self, provider: Provider, turns: Vec<ChatTurn>) -> Result<String, RelayError> {
        if turns.is_empty() {
            return Err(RelayError::EmptyConversation);
        }
        self.backend(provider).await?.complete(turns).await
    }
}
