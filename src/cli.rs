use crate::instance::PowerAction;
use crate::provider::Provider;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Personal chat relay with a gated remote model instance
#[derive(Debug, Parser)]
#[command(name = "switchboard")]
#[command(version)]
#[command(about = "Personal chat relay with a gated remote model instance", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP relay
    Serve {
        /// Listen address (default: config server.bind or 127.0.0.1:3000)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print the instance state once
    Status,

    /// Start or stop the instance
    Power {
        #[arg(value_enum)]
        action: PowerAction,

        /// Shared power password
        #[arg(long)]
        password: String,
    },

    /// Poll the instance state every 5 seconds until interrupted
    Watch,

    /// Send a message in the active session and stream the reply
    Chat {
        #[arg(long, value_enum, default_value_t = Provider::Local)]
        provider: Provider,

        /// Start a fresh session first
        #[arg(long)]
        new: bool,

        /// Attach an image (repeatable)
        #[arg(long = "image", value_name = "PATH")]
        images: Vec<PathBuf>,

        /// Message text
        #[arg(value_name = "PROMPT")]
        prompt: Vec<String>,
    },

    /// List stored sessions
    Sessions,
}
