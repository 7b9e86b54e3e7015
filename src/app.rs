use crate::config::Settings;
use crate::instance::http::HttpInstanceApi;
use crate::instance::{InstanceApi, Monitor, PollTracker, PowerAction, PowerOutcome, POLL_INTERVAL};
use crate::provider::cloud::CloudBackend;
use crate::provider::{ChatTurn, Provider};
use crate::relay::{LocalTarget, Relay};
use crate::session::SessionStore;
use crate::title;
use anyhow::Context;
use base64::Engine;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_stream::StreamExt;

pub fn build_monitor(http: &reqwest::Client, settings: &Settings) -> anyhow::Result<Monitor> {
    let api = match &settings.instance_api_base {
        Some(base) => {
            let api = HttpInstanceApi::new(http.clone(), base, settings.instance_api_token.clone())?;
            Some(Arc::new(api) as Arc<dyn InstanceApi>)
        }
        None => {
            tracing::warn!("no instance API configured; status will always be unknown");
            None
        }
    };

    Ok(Monitor::new(
        api,
        settings.instance_id.clone(),
        settings.power_password.clone(),
    ))
}

pub fn build_relay(http: &reqwest::Client, settings: &Settings, monitor: Monitor) -> anyhow::Result<Relay> {
    let cloud = match &settings.cloud_api_key {
        Some(key) => Some(
            CloudBackend::new(http.clone(), &settings.cloud_api_base, key.clone(), settings.cloud_model.clone())
                .context("invalid cloud API base URL")?,
        ),
        None => None,
    };

    let local = LocalTarget {
        scheme: settings.local_scheme.clone(),
        port: settings.local_port,
        model: settings.local_model.clone(),
    };

    Ok(Relay::new(http.clone(), monitor, local, cloud))
}

pub async fn cmd_status(monitor: &Monitor) -> anyhow::Result<()> {
    let status = monitor.get_status().await;
    println!("state:   {}", status.state);
    println!("address: {}", status.public_address.as_deref().unwrap_or("-"));
    Ok(())
}

pub async fn cmd_power(monitor: &Monitor, action: PowerAction, password: &str) -> anyhow::Result<()> {
    let outcome = PowerOutcome::from(&monitor.set_power(action, password).await);
    if !outcome.success {
        anyhow::bail!("{} failed: {}", action.as_str(), outcome.error.unwrap_or_default());
    }
    println!("{} requested", action.as_str());
    Ok(())
}

pub async fn cmd_watch(monitor: &Monitor) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut tracker = PollTracker::new();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = monitor.get_status().await;
                let changing = tracker.observe(&status);
                println!(
                    "{}  {:<14} {:<16} {}",
                    chrono::Local::now().format("%H:%M:%S"),
                    status.state.as_str(),
                    status.public_address.as_deref().unwrap_or("-"),
                    if changing { "(changing)" } else { "" },
                );
            }
            _ = &mut ctrl_c => break,
        }
    }
    Ok(())
}

pub async fn cmd_chat(
    relay: &Relay,
    sessions_path: &Path,
    provider: Provider,
    new_session: bool,
    images: &[PathBuf],
    prompt: String,
) -> anyhow::Result<()> {
    let mut store = SessionStore::load(sessions_path)?;
    if new_session {
        store.create();
    }

    let images = images
        .iter()
        .map(|p| encode_image(p))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let turn = ChatTurn::user(prompt).with_images(images);
    send_turn(relay, &mut store, provider, turn, &mut std::io::stdout()).await
}

/// Relay one user turn in the active session and record the reply.
///
/// The session is only written once the provider has accepted the request,
/// so a rejected send can be retried without duplicating the user turn.
pub async fn send_turn<W: Write>(
    relay: &Relay,
    store: &mut SessionStore,
    provider: Provider,
    turn: ChatTurn,
    out: &mut W,
) -> anyhow::Result<()> {
    let mut turns = store.active_mut().turns.clone();
    turns.push(turn.clone());

    let mut stream = relay
        .stream(provider, turns)
        .await
        .context("failed to start streaming")?;

    {
        let session = store.active_mut();
        session.push_turn(turn);
        session.push_turn(ChatTurn::assistant(""));
    }

    let mut failure: Option<anyhow::Error> = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(text) => {
                store.active_mut().append_to_last_assistant(&text);
                if let Err(e) = write!(out, "{text}").and_then(|_| out.flush()) {
                    failure = Some(anyhow::Error::new(e).context("failed to write reply"));
                    break;
                }
            }
            Err(e) => {
                failure = Some(anyhow::Error::new(e).context("stream interrupted"));
                break;
            }
        }
    }
    writeln!(out).ok();

    // Keep whatever arrived, even on failure.
    store.save()?;
    if let Some(e) = failure {
        return Err(e);
    }

    let session = store.active_mut();
    if session.needs_title() {
        let first = session.first_user_message().unwrap_or_default().to_string();
        let title = title::title_or_fallback(relay, &first, provider).await;
        tracing::info!(%title, "titled session");
        store.active_mut().set_title_once(title);
        store.save()?;
    }

    Ok(())
}

pub fn cmd_sessions(sessions_path: &Path) -> anyhow::Result<()> {
    let store = SessionStore::load(sessions_path)?;
    if store.list().is_empty() {
        println!("(no sessions)");
        return Ok(());
    }
    for s in store.list() {
        println!(
            "{} {}\t{}\t{} turns\t{}",
            if store.is_active(&s.id) { "*" } else { " " },
            s.id,
            s.created_at.format("%Y-%m-%d %H:%M"),
            s.turns.len(),
            s.title
        );
    }
    Ok(())
}

fn encode_image(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read image: {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let mime = match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    };
    Ok(format!(
        "data:{mime};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    ))
}
