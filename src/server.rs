//! HTTP surface: instance status/power, streaming chat and titles.

use crate::error::{PowerError, RelayError};
use crate::instance::{InstanceStatus, Monitor, PowerAction, PowerOutcome};
use crate::provider::{ChatTurn, Provider};
use crate::relay::Relay;
use crate::title;
use anyhow::Context;
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub monitor: Monitor,
    pub relay: Arc<Relay>,
}

#[derive(Debug, Deserialize)]
pub struct PowerRequest {
    pub action: PowerAction,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatTurn>,
    #[serde(default)]
    pub provider: Provider,
}

#[derive(Debug, Deserialize)]
pub struct TitleRequest {
    pub message: String,
    #[serde(default)]
    pub provider: Provider,
}

#[derive(Debug, Serialize)]
pub struct TitleResponse {
    pub title: String,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::MissingCredential(_) | RelayError::InvalidCredential(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Upstream(_) | RelayError::Stream(_) => StatusCode::BAD_GATEWAY,
            RelayError::EmptyConversation => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/instance", get(get_instance).post(set_power))
        .route("/api/chat", post(chat))
        .route("/api/title", post(generate_title))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn serve(bind: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .context("server error")
}

async fn health() -> &'static str {
    "ok"
}

async fn get_instance(State(state): State<AppState>) -> Json<InstanceStatus> {
    Json(state.monitor.get_status().await)
}

async fn set_power(State(state): State<AppState>, Json(req): Json<PowerRequest>) -> (StatusCode, Json<PowerOutcome>) {
    let res = state.monitor.set_power(req.action, &req.password).await;
    let status = match &res {
        Ok(()) => StatusCode::OK,
        Err(PowerError::InvalidCredential) => StatusCode::UNAUTHORIZED,
        Err(PowerError::MissingCredential | PowerError::Provider(_)) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(PowerOutcome::from(&res)))
}

async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Result<Response, RelayError> {
    let stream = state.relay.stream(req.provider, req.messages).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

async fn generate_title(State(state): State<AppState>, Json(req): Json<TitleRequest>) -> Json<TitleResponse> {
    let title = title::title_or_fallback(&state.relay, &req.message, req.provider).await;
    Json(TitleResponse { title })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::tests::FakeApi;
    use crate::instance::{InstanceApi, InstanceState};
    use crate::provider::cloud::CloudBackend;
    use crate::relay::LocalTarget;
    use axum::http::Request;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn state(api: Arc<FakeApi>, cloud: Option<CloudBackend>) -> AppState {
        let monitor = Monitor::new(
            Some(api as Arc<dyn InstanceApi>),
            Some("i-1".into()),
            Some("pw".into()),
        );
        let relay = Relay::new(
            reqwest::Client::new(),
            monitor.clone(),
            LocalTarget {
                scheme: "http".into(),
                port: 11434,
                model: "llama3.2".into(),
            },
            cloud,
        );
        AppState {
            monitor,
            relay: Arc::new(relay),
        }
    }

    fn stopped_api() -> Arc<FakeApi> {
        Arc::new(FakeApi::with_status(InstanceStatus {
            state: InstanceState::Stopped,
            public_address: None,
        }))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_string(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn instance_status_is_json() {
        let app = router(state(stopped_api(), None));
        let resp = app
            .oneshot(Request::get("/api/instance").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(v, json!({ "state": "stopped", "publicAddress": null }));
    }

    #[tokio::test]
    async fn wrong_password_is_401_without_side_effect() {
        let api = stopped_api();
        let app = router(state(api.clone(), None));

        let resp = app
            .oneshot(post_json("/api/instance", json!({ "action": "start", "password": "nope" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let v: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(v, json!({ "success": false, "error": "Invalid password" }));
        assert_eq!(api.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn right_password_starts_instance() {
        let api = stopped_api();
        let app = router(state(api.clone(), None));

        let resp = app
            .oneshot(post_json("/api/instance", json!({ "action": "start", "password": "pw" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, r#"{"success":true}"#);
        assert_eq!(api.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn local_chat_while_stopped_is_503() {
        let app = router(state(stopped_api(), None));
        let resp = app
            .oneshot(post_json(
                "/api/chat",
                json!({ "messages": [{ "role": "user", "content": "hi" }], "provider": "local" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let app = router(state(stopped_api(), None));
        let resp = app
            .oneshot(post_json(
                "/api/chat",
                json!({ "messages": [{ "role": "user", "content": "hi" }], "provider": "gemini" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn cloud_chat_streams_plain_text() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let cloud = CloudBackend::new(reqwest::Client::new(), &server.uri(), "sk-test", "m").unwrap();
        let app = router(state(stopped_api(), Some(cloud)));

        let resp = app
            .oneshot(post_json(
                "/api/chat",
                json!({ "messages": [{ "role": "user", "content": "hi" }], "provider": "cloud" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_string(resp).await, "Hello there");
    }

    #[tokio::test]
    async fn cloud_chat_without_key_is_500() {
        let app = router(state(stopped_api(), None));
        let resp = app
            .oneshot(post_json(
                "/api/chat",
                json!({ "messages": [{ "role": "user", "content": "hi" }], "provider": "cloud" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(resp).await, "OpenAI API key is not configured");
    }

    #[tokio::test]
    async fn cloud_chat_with_unusable_key_is_500() {
        let server = MockServer::start().await;
        let cloud = CloudBackend::new(reqwest::Client::new(), &server.uri(), "sk-\nbroken", "m").unwrap();
        let app = router(state(stopped_api(), Some(cloud)));

        let resp = app
            .oneshot(post_json(
                "/api/chat",
                json!({ "messages": [{ "role": "user", "content": "hi" }], "provider": "cloud" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(resp).await, "cloud API key is not a valid HTTP header value");
    }

    #[tokio::test]
    async fn title_falls_back_when_provider_unavailable() {
        let app = router(state(stopped_api(), None));
        let resp = app
            .oneshot(post_json(
                "/api/title",
                json!({ "message": "How do I set up a reverse proxy with nginx?", "provider": "cloud" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(v["title"], "How do I set up a reverse proxy with ngi");
    }
}
