//! Where config and session state live on disk.

use anyhow::Context;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Dirs {
    pub config: PathBuf,
    pub state: PathBuf,
}

impl Dirs {
    /// `$SWITCHBOARD_HOME/{config,state}` when set, otherwise the platform's
    /// per-user project directories. Both are created if missing.
    pub fn resolve() -> anyhow::Result<Self> {
        let dirs = match std::env::var_os("SWITCHBOARD_HOME") {
            Some(home) => Self::under(home),
            None => Self::platform()?,
        };
        ensure_dir(&dirs.config)?;
        ensure_dir(&dirs.state)?;
        Ok(dirs)
    }

    fn under(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            config: home.join("config"),
            state: home.join("state"),
        }
    }

    fn platform() -> anyhow::Result<Self> {
        let proj = ProjectDirs::from("", "", "switchboard").context("could not determine home directory")?;
        // state_dir is Linux-only; elsewhere local data is the closest match.
        let state = proj.state_dir().unwrap_or_else(|| proj.data_local_dir());
        Ok(Self {
            config: proj.config_dir().to_path_buf(),
            state: state.to_path_buf(),
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }

    pub fn sessions_file(&self) -> PathBuf {
        self.state.join("sessions.json")
    }
}

fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}
