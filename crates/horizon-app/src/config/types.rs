//! Configuration types for Horizon
//!
//! Defines:
//! - `Settings` - Application settings (`config.toml`)
//! - Per-section sub-types and enums

use std::time::Duration;

use serde::{Deserialize, Serialize};

use horizon_core::prelude::*;
use horizon_stream::{BackoffConfig, HeartbeatStyle, StreamConfig, WsConnector};

use crate::context_search::SearchMethod;

/// Application settings (config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub connection: ConnectionSettings,

    #[serde(default)]
    pub chat: ChatSettings,

    #[serde(default)]
    pub tags: TagSettings,

    #[serde(default)]
    pub search: SearchSettings,
}

/// Remote origins
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    /// Origin of the assistant and context-search endpoints
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Origin of the tag service (HTTP bootstrap and WebSocket feed)
    #[serde(default = "default_tags_base_url")]
    pub tags_base_url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            tags_base_url: default_tags_base_url(),
        }
    }
}

fn default_base_url() -> String {
    "https://itzerhypergalaxy.online".to_string()
}

fn default_tags_base_url() -> String {
    "https://test-server-7w76.onrender.com".to_string()
}

/// Timing shared by every streaming connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionSettings {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// How long a transport ping may wait for its pong
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_drain_ms")]
    pub drain_ms: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            monitor_interval_secs: default_monitor_interval_secs(),
            pong_timeout_secs: default_pong_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_secs: default_backoff_cap_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            drain_ms: default_drain_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_monitor_interval_secs() -> u64 {
    10
}

fn default_pong_timeout_secs() -> u64 {
    10
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_cap_secs() -> u64 {
    30
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_drain_ms() -> u64 {
    100
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl ConnectionSettings {
    /// Reject values the runtime cannot schedule.
    ///
    /// A zero interval would make the heartbeat or the monitor spin, and a
    /// zero cap or attempt budget would leave nothing to retry with. Use
    /// `heartbeat = "disabled"` to turn probing off.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("monitor_interval_secs", self.monitor_interval_secs),
            ("pong_timeout_secs", self.pong_timeout_secs),
            ("backoff_base_ms", self.backoff_base_ms),
            ("backoff_cap_secs", self.backoff_cap_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, value)| *value == 0) {
            return Err(Error::config_invalid(format!(
                "connection.{name} must be greater than zero"
            )));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(Error::config_invalid(
                "connection.max_reconnect_attempts must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    /// WebSocket connector whose pings wait `pong_timeout_secs` for a pong.
    pub fn connector(&self) -> Result<WsConnector> {
        self.validate()?;
        Ok(WsConnector::new(self.pong_timeout()))
    }

    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_millis(self.backoff_base_ms),
            cap: Duration::from_secs(self.backoff_cap_secs),
            max_attempts: self.max_reconnect_attempts,
        }
    }

    /// Runtime parameters for one connection, after [`validate`](Self::validate).
    pub fn stream_config(
        &self,
        label: impl Into<String>,
        url: impl Into<String>,
        heartbeat: HeartbeatMode,
    ) -> Result<StreamConfig> {
        self.validate()?;
        let mut config = StreamConfig::new(label, url)
            .with_heartbeat(heartbeat.into())
            .with_backoff(self.backoff());
        config.heartbeat_interval = Duration::from_secs(self.heartbeat_interval_secs);
        config.monitor_interval = Duration::from_secs(self.monitor_interval_secs);
        config.drain_interval = Duration::from_millis(self.drain_ms);
        config.connect_timeout = Duration::from_secs(self.connect_timeout_secs);
        Ok(config)
    }
}

/// Heartbeat style as written in config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatMode {
    /// Transport-level ping frames
    Ping,
    /// Application-level `"ping"` text frames
    Text,
    Disabled,
}

impl From<HeartbeatMode> for HeartbeatStyle {
    fn from(mode: HeartbeatMode) -> Self {
        match mode {
            HeartbeatMode::Ping => HeartbeatStyle::TransportPing,
            HeartbeatMode::Text => HeartbeatStyle::text_ping(),
            HeartbeatMode::Disabled => HeartbeatStyle::Disabled,
        }
    }
}

impl std::fmt::Display for HeartbeatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeartbeatMode::Ping => write!(f, "ping"),
            HeartbeatMode::Text => write!(f, "text"),
            HeartbeatMode::Disabled => write!(f, "disabled"),
        }
    }
}

/// AI chat settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatSettings {
    #[serde(default = "default_chat_path")]
    pub path: String,

    /// Default for the per-message smarter-analysis flag
    #[serde(default)]
    pub smarter_analysis: bool,

    #[serde(default = "default_chat_heartbeat")]
    pub heartbeat: HeartbeatMode,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            path: default_chat_path(),
            smarter_analysis: false,
            heartbeat: default_chat_heartbeat(),
        }
    }
}

fn default_chat_path() -> String {
    "/horizon/assist/chat-ws".to_string()
}

fn default_chat_heartbeat() -> HeartbeatMode {
    HeartbeatMode::Ping
}

/// Tag feed settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TagSettings {
    /// Tenant identity supplied by the authentication layer
    #[serde(default)]
    pub tenant_name: String,

    #[serde(default = "default_tags_heartbeat")]
    pub heartbeat: HeartbeatMode,
}

impl Default for TagSettings {
    fn default() -> Self {
        Self {
            tenant_name: String::new(),
            heartbeat: default_tags_heartbeat(),
        }
    }
}

fn default_tags_heartbeat() -> HeartbeatMode {
    HeartbeatMode::Text
}

/// Context search settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchSettings {
    #[serde(default)]
    pub method: SearchMethod,

    #[serde(default)]
    pub tenant_name: String,

    #[serde(default = "default_search_heartbeat")]
    pub heartbeat: HeartbeatMode,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            method: SearchMethod::default(),
            tenant_name: String::new(),
            heartbeat: default_search_heartbeat(),
        }
    }
}

fn default_search_heartbeat() -> HeartbeatMode {
    HeartbeatMode::Disabled
}
