//! Connection lifecycle domain types

use chrono::{DateTime, Local};
use serde::Serialize;

/// Lifecycle state of a streaming connection.
///
/// Owned exclusively by the connection controller; everything else only
/// observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket and no attempt in flight.
    Disconnected,
    /// A socket open is in flight.
    Connecting,
    /// A socket is open and the background activities are running.
    Connected,
    /// The previous socket failed; the reconnection policy is retrying.
    Reconnecting {
        /// The current reconnection attempt number (1-indexed).
        attempt: u32,
    },
    /// `graceful_disconnect` is draining in-flight writes.
    ShuttingDown,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether a fresh socket may be opened from this state.
    pub fn accepts_open(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Reconnecting { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting { .. } => "reconnecting",
            ConnectionState::ShuttingDown => "shutting down",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting ({attempt})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Debugging snapshot of a connection manager.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub label: String,
    pub state: ConnectionState,
    pub connected: bool,
    pub maintain_connection: bool,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub last_connected_at: Option<DateTime<Local>>,
}

impl std::fmt::Display for ConnectionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Connection: {}", self.label)?;
        writeln!(f, "State: {}", self.state)?;
        writeln!(f, "Connected: {}", self.connected)?;
        writeln!(f, "Should Maintain: {}", self.maintain_connection)?;
        write!(
            f,
            "Reconnection Attempts: {}/{}",
            self.reconnect_attempts, self.max_reconnect_attempts
        )?;
        if let Some(at) = self.last_connected_at {
            write!(f, "\nLast Connected: {}", at.format("%Y-%m-%d %H:%M:%S"))?;
        }
        Ok(())
    }
}
