//! Contracts the relay relies on from the external agent client.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::watch;

use crate::sessions::Attachment;

/// A live conversation inside the external agent process.
///
/// Owned exclusively by the session registry's active map. Implementations
/// are not `Clone`; everything else addresses a session by id.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Identifier the agent assigned to this session.
    fn session_id(&self) -> &str;

    /// Queue a prompt. Returns the agent's message id for the turn.
    async fn send(&self, prompt: &str, attachments: &[Attachment]) -> Result<String>;

    /// Abort the in-flight turn, if any.
    async fn abort(&self) -> Result<()>;

    /// Release the session inside the agent. Called once when the handle
    /// leaves the registry.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Connection state published by the agent connection manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }

    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Read side of the connection status contract.
pub trait ConnectionMonitor: Send + Sync {
    fn status(&self) -> ConnectionStatus;
    fn name(&self) -> &str;
}

/// Status cell backed by a `watch` channel so waiters can observe transitions.
pub struct SharedConnectionStatus {
    tx: watch::Sender<ConnectionStatus>,
}

impl SharedConnectionStatus {
    pub fn new(initial: ConnectionStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn set(&self, status: ConnectionStatus) {
        let previous = self.tx.send_replace(status);
        if previous != status {
            tracing::info!(
                from = previous.as_str(),
                to = status.as_str(),
                "Agent connection status changed"
            );
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }
}

impl Default for SharedConnectionStatus {
    fn default() -> Self {
        Self::new(ConnectionStatus::Disconnected)
    }
}

impl ConnectionMonitor for SharedConnectionStatus {
    fn status(&self) -> ConnectionStatus {
        *self.tx.borrow()
    }

    fn name(&self) -> &str {
        "watch"
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Stdio,
    Tcp,
}

impl TransportMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Tcp => "tcp",
        }
    }

    pub fn from_str_opt(raw: &str) -> Option<Self> {
        match raw {
            "stdio" => Some(Self::Stdio),
            "tcp" => Some(Self::Tcp),
            _ => None,
        }
    }
}

/// How to reach the external agent CLI. Persisted as a singleton by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_url: Option<String>,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub transport: TransportMode,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_true")]
    pub auto_start: bool,
    #[serde(default = "default_true")]
    pub auto_restart: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cli_path: None,
            cli_url: None,
            port: 0,
            transport: TransportMode::default(),
            log_level: default_log_level(),
            auto_start: true,
            auto_restart: true,
            cwd: None,
            environment: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_status_reports_latest_value() {
        let status = SharedConnectionStatus::default();
        assert_eq!(status.status(), ConnectionStatus::Disconnected);

        let mut rx = status.subscribe();
        status.set(ConnectionStatus::Connecting);
        status.set(ConnectionStatus::Connected);

        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectionStatus::Connected);
        assert!(status.status().is_connected());
    }

    #[test]
    fn client_config_defaults_when_fields_missing() {
        let config: ClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert!(config.auto_start);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn client_config_round_trips_environment() {
        let mut config = ClientConfig {
            cli_path: Some("/usr/local/bin/agent".into()),
            transport: TransportMode::Tcp,
            port: 4321,
            ..ClientConfig::default()
        };
        config.environment.insert("HTTPS_PROXY".into(), "http://proxy:8080".into());

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"cliPath\""));
        let parsed: ClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
