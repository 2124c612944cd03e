use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::util::write_atomic;

const CONFIG_FILE_NAME: &str = "config.toml";

// ── Top-level config ──────────────────────────────────────────────

/// Top-level relay configuration, loaded from `config.toml`.
///
/// Resolution order: `--config-dir` → `SESSIONRELAY_CONFIG_DIR` env → `~/.sessionrelay`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Data directory for session documents and the database - computed, not serialized
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Path to config.toml - computed, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Session storage backend (`[storage]`).
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP/WebSocket gateway (`[gateway]`).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Live event fan-out (`[events]`).
    #[serde(default)]
    pub events: EventsConfig,
}

// ── Storage ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One JSON document per session under `<data_dir>/sessions/`.
    #[default]
    File,
    /// Normalized SQLite database at `<data_dir>/<database_file>`.
    Sqlite,
}

impl StorageBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Sqlite => "sqlite",
        }
    }

    pub fn from_str_opt(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "file" => Some(Self::File),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// Storage configuration (`[storage]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StorageConfig {
    /// `"file"` or `"sqlite"` (default: file)
    #[serde(default)]
    pub backend: StorageBackend,
    /// Database file name inside the data directory (default: sessions.db)
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

fn default_database_file() -> String {
    "sessions.db".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            database_file: default_database_file(),
        }
    }
}

// ── Gateway ──────────────────────────────────────────────────────

/// Gateway server configuration (`[gateway]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GatewayConfig {
    /// Gateway port (default: 42618)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Gateway host (default: 127.0.0.1)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Per-request timeout for HTTP routes.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum accepted request body size.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_gateway_port() -> u16 {
    42618
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            host: default_gateway_host(),
            request_timeout_secs: default_request_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

// ── Events ───────────────────────────────────────────────────────

/// Event fan-out configuration (`[events]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EventsConfig {
    /// Queue depth per subscriber and lane. Events beyond it are dropped for
    /// that subscriber only.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn default_subscriber_buffer() -> usize {
    256
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

// ── Config impl ──────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        let home =
            UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());
        let relay_dir = home.join(".sessionrelay");

        Self {
            data_dir: relay_dir.join("data"),
            config_path: relay_dir.join(CONFIG_FILE_NAME),
            storage: StorageConfig::default(),
            gateway: GatewayConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".sessionrelay"))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ConfigResolutionSource {
    CliFlag,
    EnvConfigDir,
    DefaultConfigDir,
}

impl ConfigResolutionSource {
    const fn as_str(self) -> &'static str {
        match self {
            Self::CliFlag => "--config-dir",
            Self::EnvConfigDir => "SESSIONRELAY_CONFIG_DIR",
            Self::DefaultConfigDir => "default",
        }
    }
}

fn resolve_config_dir(explicit: Option<&Path>) -> Result<(PathBuf, ConfigResolutionSource)> {
    if let Some(dir) = explicit {
        return Ok((dir.to_path_buf(), ConfigResolutionSource::CliFlag));
    }

    if let Ok(custom_config_dir) = std::env::var("SESSIONRELAY_CONFIG_DIR") {
        let custom_config_dir = custom_config_dir.trim();
        if !custom_config_dir.is_empty() {
            return Ok((
                PathBuf::from(custom_config_dir),
                ConfigResolutionSource::EnvConfigDir,
            ));
        }
    }

    Ok((default_config_dir()?, ConfigResolutionSource::DefaultConfigDir))
}

impl Config {
    /// Load `config.toml` from the resolved config directory, writing a
    /// default one first if none exists.
    pub async fn load_or_init(config_dir: Option<&Path>) -> Result<Self> {
        let (relay_dir, resolution_source) = resolve_config_dir(config_dir)?;
        let config_path = relay_dir.join(CONFIG_FILE_NAME);

        fs::create_dir_all(&relay_dir).await.with_context(|| {
            format!("Failed to create config directory: {}", relay_dir.display())
        })?;

        let initialized = !fs::try_exists(&config_path).await.unwrap_or(false);
        let mut config = if initialized {
            let mut config = Config::default();
            config.config_path = config_path.clone();
            config.save().await?;

            #[cfg(unix)]
            {
                use std::{fs::Permissions, os::unix::fs::PermissionsExt};
                let _ = fs::set_permissions(&config_path, Permissions::from_mode(0o600)).await;
            }
            config
        } else {
            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path.clone();
            config
        };

        config.data_dir = relay_dir.join("data");
        config.apply_env_overrides();
        config.validate()?;

        fs::create_dir_all(&config.data_dir)
            .await
            .context("Failed to create data directory")?;

        tracing::info!(
            path = %config.config_path.display(),
            data_dir = %config.data_dir.display(),
            backend = config.storage.backend.as_str(),
            source = resolution_source.as_str(),
            initialized,
            "Config loaded"
        );
        Ok(config)
    }

    /// Absolute path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.database_file)
    }

    /// Validate configuration values that would cause runtime failures.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.host.trim().is_empty() {
            anyhow::bail!("gateway.host must not be empty");
        }
        if self.gateway.request_timeout_secs == 0 {
            anyhow::bail!("gateway.request_timeout_secs must be greater than 0");
        }
        if self.events.subscriber_buffer == 0 {
            anyhow::bail!("events.subscriber_buffer must be greater than 0");
        }
        let database_file = self.storage.database_file.trim();
        if database_file.is_empty() {
            anyhow::bail!("storage.database_file must not be empty");
        }
        if database_file.contains('/') || database_file.contains('\\') {
            anyhow::bail!("storage.database_file must be a plain file name ({database_file})");
        }
        Ok(())
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        // Storage backend: SESSIONRELAY_STORAGE_BACKEND
        if let Ok(raw) = std::env::var("SESSIONRELAY_STORAGE_BACKEND") {
            match StorageBackend::from_str_opt(&raw) {
                Some(backend) => self.storage.backend = backend,
                None => tracing::warn!(
                    backend = %raw,
                    "Ignoring invalid SESSIONRELAY_STORAGE_BACKEND (valid: file|sqlite)"
                ),
            }
        }

        // Data directory: SESSIONRELAY_DATA_DIR
        if let Ok(dir) = std::env::var("SESSIONRELAY_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir.trim());
            }
        }

        // Gateway port: SESSIONRELAY_GATEWAY_PORT or PORT
        if let Ok(port_str) =
            std::env::var("SESSIONRELAY_GATEWAY_PORT").or_else(|_| std::env::var("PORT"))
        {
            if let Ok(port) = port_str.parse::<u16>() {
                self.gateway.port = port;
            }
        }

        // Gateway host: SESSIONRELAY_GATEWAY_HOST or HOST
        if let Ok(host) =
            std::env::var("SESSIONRELAY_GATEWAY_HOST").or_else(|_| std::env::var("HOST"))
        {
            if !host.is_empty() {
                self.gateway.host = host;
            }
        }
    }

    pub async fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        write_atomic(&self.config_path, toml_str.as_bytes())
            .await
            .with_context(|| format!("Failed to save config: {}", self.config_path.display()))
    }
}
