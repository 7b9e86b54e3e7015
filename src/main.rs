mod app;
mod cli;
mod config;
mod error;
mod instance;
mod paths;
mod provider;
mod relay;
mod server;
mod session;
mod title;

use anyhow::Context;
use clap::Parser;
use cli::Command;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so streamed replies on stdout stay clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let dirs = paths::Dirs::resolve()?;
    let cfg = config::Config::load_optional(dirs.config_file())?;
    let settings = config::Settings::resolve(cfg.as_ref());
    tracing::debug!(?dirs, ?settings, "resolved config");

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let monitor = app::build_monitor(&http, &settings)?;

    match args.cmd {
        Command::Serve { bind } => {
            let relay = app::build_relay(&http, &settings, monitor.clone())?;
            let state = server::AppState {
                monitor,
                relay: Arc::new(relay),
            };
            server::serve(bind.as_deref().unwrap_or(&settings.bind), state).await
        }
        Command::Status => app::cmd_status(&monitor).await,
        Command::Power { action, password } => app::cmd_power(&monitor, action, &password).await,
        Command::Watch => app::cmd_watch(&monitor).await,
        Command::Chat {
            provider,
            new,
            images,
            prompt,
        } => {
            let prompt = prompt.join(" ");
            if prompt.trim().is_empty() && images.is_empty() {
                anyhow::bail!("No prompt provided. Try: switchboard chat \"Hello\"");
            }
            let relay = app::build_relay(&http, &settings, monitor)?;
            app::cmd_chat(&relay, &dirs.sessions_file(), provider, new, &images, prompt).await
        }
        Command::Sessions => app::cmd_sessions(&dirs.sessions_file()),
    }
}
