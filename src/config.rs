use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_LOCAL_MODEL: &str = "llama3.2";
pub const DEFAULT_LOCAL_PORT: u16 = 11434;
pub const DEFAULT_CLOUD_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_CLOUD_API_BASE: &str = "https://api.openai.com/v1/";

/// On-disk `config.toml`. Every field is optional; see [`Settings::resolve`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Shared secret gating instance start/stop.
    pub power_password: Option<String>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub instance: InstanceConfig,

    #[serde(default)]
    pub local: LocalConfig,

    #[serde(default)]
    pub cloud: CloudConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    pub bind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InstanceConfig {
    /// Resource identifier understood by the control-plane API.
    pub id: Option<String>,
    /// Base URL of the control-plane API.
    pub api_base: Option<String>,
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LocalConfig {
    pub model: Option<String>,
    pub port: Option<u16>,
    pub scheme: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CloudConfig {
    pub model: Option<String>,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
}

impl Config {
    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let cfg: Config = toml::from_str(&s)
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        Ok(Some(cfg))
    }
}

/// Read-only settings resolved once at startup.
///
/// Missing credentials stay `None`; the code path that needs them reports the
/// precondition failure at request time.
#[derive(Clone)]
pub struct Settings {
    pub bind: String,
    pub power_password: Option<String>,
    pub instance_id: Option<String>,
    pub instance_api_base: Option<String>,
    pub instance_api_token: Option<String>,
    pub local_model: String,
    pub local_port: u16,
    pub local_scheme: String,
    pub cloud_model: String,
    pub cloud_api_base: String,
    pub cloud_api_key: Option<String>,
}

impl Settings {
    /// Merge the optional file with environment overrides.
    pub fn resolve(cfg: Option<&Config>) -> Self {
        Self::resolve_with(cfg, |key| std::env::var(key).ok())
    }

    pub(crate) fn resolve_with(cfg: Option<&Config>, env: impl Fn(&str) -> Option<String>) -> Self {
        let cfg = cfg.cloned().unwrap_or_default();
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        Self {
            bind: cfg.server.bind.unwrap_or_else(|| DEFAULT_BIND.to_string()),
            power_password: env("SWITCHBOARD_PASSWORD").or(cfg.power_password),
            instance_id: env("SWITCHBOARD_INSTANCE_ID").or(cfg.instance.id),
            instance_api_base: env("SWITCHBOARD_INSTANCE_API").or(cfg.instance.api_base),
            instance_api_token: env("SWITCHBOARD_INSTANCE_TOKEN").or(cfg.instance.api_token),
            local_model: env("SWITCHBOARD_LOCAL_MODEL")
                .or(cfg.local.model)
                .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string()),
            local_port: cfg.local.port.unwrap_or(DEFAULT_LOCAL_PORT),
            local_scheme: cfg.local.scheme.unwrap_or_else(|| "http".to_string()),
            cloud_model: env("SWITCHBOARD_CLOUD_MODEL")
                .or(cfg.cloud.model)
                .unwrap_or_else(|| DEFAULT_CLOUD_MODEL.to_string()),
            cloud_api_base: env("OPENAI_BASE_URL")
                .or(cfg.cloud.api_base)
                .unwrap_or_else(|| DEFAULT_CLOUD_API_BASE.to_string()),
            cloud_api_key: env("OPENAI_API_KEY").or(cfg.cloud.api_key),
        }
    }
}

fn redact(v: &Option<String>) -> &'static str {
    if v.is_some() {
        "<set>"
    } else {
        "<unset>"
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("bind", &self.bind)
            .field("power_password", &redact(&self.power_password))
            .field("instance_id", &self.instance_id)
            .field("instance_api_base", &self.instance_api_base)
            .field("instance_api_token", &redact(&self.instance_api_token))
            .field("local_model", &self.local_model)
            .field("local_port", &self.local_port)
            .field("local_scheme", &self.local_scheme)
            .field("cloud_model", &self.cloud_model)
            .field("cloud_api_base", &self.cloud_api_base)
            .field("cloud_api_key", &redact(&self.cloud_api_key))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parses_sections_from_toml() {
        let cfg: Config = toml::from_str(
            r#"
            power_password = "hunter2"

            [instance]
            id = "i-0abc"

            [local]
            model = "qwen3"
            port = 8080
            "#,
        )
        .unwrap();

        assert_eq!(cfg.power_password.as_deref(), Some("hunter2"));
        assert_eq!(cfg.instance.id.as_deref(), Some("i-0abc"));
        assert_eq!(cfg.local.port, Some(8080));
        assert!(cfg.cloud.api_key.is_none());
    }

    #[test]
    fn env_overrides_file_and_defaults_fill_gaps() {
        let cfg = Config {
            power_password: Some("from-file".into()),
            local: LocalConfig {
                model: Some("qwen3".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let env: HashMap<&str, &str> = [
            ("SWITCHBOARD_PASSWORD", "from-env"),
            ("OPENAI_API_KEY", "sk-test"),
            ("SWITCHBOARD_INSTANCE_ID", "  "),
        ]
        .into_iter()
        .collect();

        let s = Settings::resolve_with(Some(&cfg), |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(s.power_password.as_deref(), Some("from-env"));
        assert_eq!(s.cloud_api_key.as_deref(), Some("sk-test"));
        assert_eq!(s.local_model, "qwen3");
        assert_eq!(s.local_port, DEFAULT_LOCAL_PORT);
        assert_eq!(s.bind, DEFAULT_BIND);
        assert_eq!(s.cloud_model, DEFAULT_CLOUD_MODEL);
        // Blank env values do not count as set.
        assert!(s.instance_id.is_none());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let s = Settings::resolve_with(None, |k| match k {
            "OPENAI_API_KEY" => Some("sk-secret".into()),
            _ => None,
        });
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<set>"));
    }
}
