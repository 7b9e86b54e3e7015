use super::{InstanceApi, InstanceState, InstanceStatus};
use anyhow::{anyhow, Context};
use futures_core::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{StatusCode, Url};
use serde::Deserialize;

/// JSON control-plane client:
///
/// - `GET  {base}/instances/{id}`        -> `{ "state": "...", "publicAddress": "..." }`
/// - `POST {base}/instances/{id}/start`
/// - `POST {base}/instances/{id}/stop`
#[derive(Debug, Clone)]
pub struct HttpInstanceApi {
    http: reqwest::Client,
    api_base: Url,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeResponse {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    public_address: Option<String>,
}

impl HttpInstanceApi {
    pub fn new(http: reqwest::Client, api_base: &str, token: Option<String>) -> anyhow::Result<Self> {
        // Url::join drops the last path segment unless the base ends with '/'.
        let base = if api_base.ends_with('/') {
            api_base.to_string()
        } else {
            format!("{api_base}/")
        };
        Ok(Self {
            http,
            api_base: Url::parse(&base).with_context(|| format!("invalid instance API URL: {api_base}"))?,
            token,
        })
    }

    fn url(&self, id: &str, action: Option<&str>) -> anyhow::Result<Url> {
        let mut url = self.api_base.join("instances/")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("instance API URL cannot be a base"))?
            .pop_if_empty()
            .push(id)
            .extend(action);
        Ok(url)
    }

    fn headers(&self) -> anyhow::Result<HeaderMap> {
        let mut h = HeaderMap::new();
        if let Some(tok) = &self.token {
            let v = HeaderValue::from_str(&format!("Bearer {tok}")).map_err(|e| anyhow!(e))?;
            h.insert(AUTHORIZATION, v);
        }
        Ok(h)
    }

    async fn power(&self, id: &str, action: &str) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(self.url(id, Some(action))?)
            .headers(self.headers()?)
            .send()
            .await
            .with_context(|| format!("failed to send {action} request"))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("instance {action} failed: HTTP {status}: {text}"));
        }
        Ok(())
    }
}

impl InstanceApi for HttpInstanceApi {
    fn describe<'a>(&'a self, id: &'a str) -> BoxFuture<'a, anyhow::Result<Option<InstanceStatus>>> {
        Box::pin(async move {
            let resp = self
                .http
                .get(self.url(id, None)?)
                .headers(self.headers()?)
                .send()
                .await
                .context("failed to describe instance")?;

            let status = resp.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(anyhow!("describe failed: HTTP {status}: {text}"));
            }

            let body: DescribeResponse = resp.json().await.context("failed to parse describe JSON")?;
            let state = body
                .state
                .as_deref()
                .map(InstanceState::parse)
                .unwrap_or(InstanceState::Unknown);

            Ok(Some(InstanceStatus {
                state,
                public_address: body.public_address.filter(|a| !a.is_empty()),
            }))
        })
    }

    fn start<'a>(&'a self, id: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(self.power(id, "start"))
    }

    fn stop<'a>(&'a self, id: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(self.power(id, "stop"))
    }
}
