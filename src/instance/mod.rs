//! Remote instance lifecycle: status queries, gated power transitions and the
//! caller-side poll heuristic.

pub mod http;

use crate::error::PowerError;
use futures_core::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Cadence of the caller-side status poll.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
    Unknown,
}

impl InstanceState {
    /// Lenient parse; anything unrecognised is `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "shutting-down" | "shutting_down" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        }
    }

    /// `running` and `stopped` are stable; every other state keeps the poll
    /// indicator active.
    pub fn is_transitional(self) -> bool {
        !matches!(self, Self::Running | Self::Stopped)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    pub state: InstanceState,
    pub public_address: Option<String>,
}

impl InstanceStatus {
    pub fn unknown() -> Self {
        Self {
            state: InstanceState::Unknown,
            public_address: None,
        }
    }

    /// Address of a running instance, if it exposes one.
    pub fn reachable_address(&self) -> Option<&str> {
        if self.state != InstanceState::Running {
            return None;
        }
        self.public_address.as_deref().filter(|a| !a.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Start,
    Stop,
}

impl PowerAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

/// Control-plane collaborator keyed by a single resource identifier.
pub trait InstanceApi: Send + Sync {
    /// `Ok(None)` when the provider has no matching resource.
    fn describe<'a>(&'a self, id: &'a str) -> BoxFuture<'a, anyhow::Result<Option<InstanceStatus>>>;

    fn start<'a>(&'a self, id: &'a str) -> BoxFuture<'a, anyhow::Result<()>>;

    fn stop<'a>(&'a self, id: &'a str) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Wire shape of a power toggle result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Result<(), PowerError>> for PowerOutcome {
    fn from(r: &Result<(), PowerError>) -> Self {
        match r {
            Ok(()) => Self {
                success: true,
                error: None,
            },
            Err(e) => Self {
                success: false,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Clone)]
pub struct Monitor {
    api: Option<Arc<dyn InstanceApi>>,
    instance_id: Option<String>,
    password: Option<String>,
}

impl Monitor {
    pub fn new(
        api: Option<Arc<dyn InstanceApi>>,
        instance_id: Option<String>,
        password: Option<String>,
    ) -> Self {
        Self {
            api,
            instance_id,
            password,
        }
    }

    fn target(&self) -> Option<(&dyn InstanceApi, &str)> {
        Some((self.api.as_deref()?, self.instance_id.as_deref()?))
    }

    /// Single best-effort describe. Never fails: every error becomes `unknown`.
    pub async fn get_status(&self) -> InstanceStatus {
        let Some((api, id)) = self.target() else {
            tracing::warn!("instance control is not configured; reporting unknown");
            return InstanceStatus::unknown();
        };

        match api.describe(id).await {
            Ok(Some(status)) => status,
            Ok(None) => {
                tracing::warn!(instance = id, "no matching instance");
                InstanceStatus::unknown()
            }
            Err(e) => {
                tracing::error!(instance = id, error = ?e, "failed to describe instance");
                InstanceStatus::unknown()
            }
        }
    }

    /// Gated start/stop. The secret is checked before anything touches the
    /// provider.
    pub async fn set_power(&self, action: PowerAction, supplied: &str) -> Result<(), PowerError> {
        let Some(expected) = self.password.as_deref() else {
            tracing::warn!("power password is not configured; rejecting");
            return Err(PowerError::MissingCredential);
        };
        if supplied != expected {
            tracing::warn!(action = action.as_str(), "rejected power request: bad password");
            return Err(PowerError::InvalidCredential);
        }

        let Some((api, id)) = self.target() else {
            return Err(PowerError::MissingCredential);
        };

        let res = match action {
            PowerAction::Start => api.start(id).await,
            PowerAction::Stop => api.stop(id).await,
        };

        match res {
            Ok(()) => {
                tracing::info!(instance = id, action = action.as_str(), "power request accepted");
                Ok(())
            }
            Err(e) => {
                tracing::error!(instance = id, action = action.as_str(), error = ?e, "power request failed");
                Err(PowerError::Provider(format!("{e:#}")))
            }
        }
    }
}

/// Tracks whether the "still changing" indicator should be shown between polls.
#[derive(Debug, Default, Clone)]
pub struct PollTracker {
    active: bool,
}

impl PollTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one poll result and return whether the indicator is active.
    pub fn observe(&mut self, status: &InstanceStatus) -> bool {
        self.active = status.state.is_transitional();
        self.active
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory control plane recording every call.
    #[derive(Default)]
    pub(crate) struct FakeApi {
        pub status: Mutex<Option<InstanceStatus>>,
        pub fail: bool,
        pub starts: AtomicUsize,
        pub stops: AtomicUsize,
    }

    impl FakeApi {
        pub(crate) fn with_status(status: InstanceStatus) -> Self {
            Self {
                status: Mutex::new(Some(status)),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.starts.load(Ordering::SeqCst) + self.stops.load(Ordering::SeqCst)
        }
    }

    impl InstanceApi for FakeApi {
        fn describe<'a>(&'a self, _id: &'a str) -> BoxFuture<'a, anyhow::Result<Option<InstanceStatus>>> {
            Box::pin(async move {
                if self.fail {
                    anyhow::bail!("describe exploded");
                }
                Ok(self.status.lock().unwrap().clone())
            })
        }

        fn start<'a>(&'a self, _id: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
            Box::pin(async move {
                self.starts.fetch_add(1, Ordering::SeqCst);
                if self.fail {
                    anyhow::bail!("start exploded: secret-internal-detail");
                }
                Ok(())
            })
        }

        fn stop<'a>(&'a self, _id: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
            Box::pin(async move {
                self.stops.fetch_add(1, Ordering::SeqCst);
                if self.fail {
                    anyhow::bail!("stop exploded");
                }
                Ok(())
            })
        }
    }

    fn monitor(api: Arc<FakeApi>) -> Monitor {
        Monitor::new(
            Some(api as Arc<dyn InstanceApi>),
            Some("i-123".into()),
            Some("open-sesame".into()),
        )
    }

    fn status(state: InstanceState) -> InstanceStatus {
        InstanceStatus {
            state,
            public_address: None,
        }
    }

    #[tokio::test]
    async fn wrong_password_never_reaches_provider() {
        let api = Arc::new(FakeApi::with_status(status(InstanceState::Stopped)));
        let m = monitor(api.clone());

        for action in [PowerAction::Start, PowerAction::Stop] {
            let res = m.set_power(action, "open-sesame ").await;
            assert!(matches!(res, Err(PowerError::InvalidCredential)));
            let outcome = PowerOutcome::from(&res);
            assert!(!outcome.success);
            assert_eq!(outcome.error.as_deref(), Some("Invalid password"));
        }
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test]
    async fn unconfigured_password_rejects_everything() {
        let api = Arc::new(FakeApi::default());
        let m = Monitor::new(Some(api.clone() as Arc<dyn InstanceApi>), Some("i-123".into()), None);

        let res = m.set_power(PowerAction::Start, "").await;
        assert!(matches!(res, Err(PowerError::MissingCredential)));
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test]
    async fn correct_password_issues_matching_call() {
        let api = Arc::new(FakeApi::default());
        let m = monitor(api.clone());

        m.set_power(PowerAction::Start, "open-sesame").await.unwrap();
        m.set_power(PowerAction::Stop, "open-sesame").await.unwrap();

        assert_eq!(api.starts.load(Ordering::SeqCst), 1);
        assert_eq!(api.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn provider_failure_is_opaque() {
        let api = Arc::new(FakeApi {
            fail: true,
            ..Default::default()
        });
        let m = monitor(api);

        let res = m.set_power(PowerAction::Start, "open-sesame").await;
        let outcome = PowerOutcome::from(&res);
        assert!(!outcome.success);
        let msg = outcome.error.unwrap();
        assert_eq!(msg, "Failed to change instance state");
        assert!(!msg.contains("secret-internal-detail"));
    }

    #[tokio::test]
    async fn get_status_collapses_errors_to_unknown() {
        let api = Arc::new(FakeApi {
            fail: true,
            ..Default::default()
        });
        assert_eq!(monitor(api).get_status().await, InstanceStatus::unknown());

        let missing = Arc::new(FakeApi::default());
        assert_eq!(monitor(missing).get_status().await, InstanceStatus::unknown());

        let unconfigured = Monitor::new(None, None, None);
        assert_eq!(unconfigured.get_status().await, InstanceStatus::unknown());
    }

    #[tokio::test]
    async fn get_status_passes_through_provider_state() {
        let running = InstanceStatus {
            state: InstanceState::Running,
            public_address: Some("203.0.113.7".into()),
        };
        let api = Arc::new(FakeApi::with_status(running.clone()));
        let got = monitor(api).get_status().await;
        assert_eq!(got, running);
        assert_eq!(got.reachable_address(), Some("203.0.113.7"));
    }

    #[test]
    fn pending_then_running_turns_indicator_off() {
        let mut tracker = PollTracker::new();
        let seq = [
            InstanceState::Pending,
            InstanceState::Pending,
            InstanceState::Running,
            InstanceState::Running,
        ];
        let indicators: Vec<bool> = seq.iter().map(|s| tracker.observe(&status(*s))).collect();
        assert_eq!(indicators, vec![true, true, false, false]);
    }

    #[test]
    fn only_running_and_stopped_are_stable() {
        assert!(!InstanceState::Running.is_transitional());
        assert!(!InstanceState::Stopped.is_transitional());
        for s in [
            InstanceState::Pending,
            InstanceState::Stopping,
            InstanceState::ShuttingDown,
            InstanceState::Terminated,
            InstanceState::Unknown,
        ] {
            assert!(s.is_transitional(), "{s}");
        }
    }

    #[test]
    fn parse_is_lenient() {
        assert_eq!(InstanceState::parse("shutting-down"), InstanceState::ShuttingDown);
        assert_eq!(InstanceState::parse("RUNNING"), InstanceState::Running);
        assert_eq!(InstanceState::parse("rebooting"), InstanceState::Unknown);
    }

    #[test]
    fn status_serializes_camel_case() {
        let v = serde_json::to_value(InstanceStatus::unknown()).unwrap();
        assert_eq!(v, serde_json::json!({ "state": "unknown", "publicAddress": null }));
    }
}
