//! Application error types with rich context

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ─────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Not connected to server")]
    NotConnected,

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Gave up reconnecting after {attempts} attempts")]
    MaxAttemptsExceeded { attempts: u32 },

    #[error("Invalid endpoint: {url}")]
    InvalidEndpoint { url: String },

    // ─────────────────────────────────────────────────────────────
    // Wire Format Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to decode inbound payload: {message}")]
    Decode { message: String },

    #[error("Failed to encode outbound payload: {message}")]
    Encode { message: String },

    #[error("HTTP error: {message}")]
    Http { message: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    pub fn http(message: impl Into<String>) -> Self {
        Self::Http {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    pub fn invalid_endpoint(url: impl Into<String>) -> Self {
        Self::InvalidEndpoint { url: url.into() }
    }

    /// Check if this is a recoverable error
    ///
    /// Recoverable errors leave the connection manager usable: the caller may
    /// retry, or the manager heals itself in the background.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NotConnected
                | Error::Transport { .. }
                | Error::Decode { .. }
                | Error::Http { .. }
                | Error::MaxAttemptsExceeded { .. }
                | Error::Io(_)
        )
    }

    /// Check if this error is evidence of a dead channel.
    ///
    /// Only transport failures feed the reconnection policy; a malformed
    /// payload says nothing about the health of the connection.
    pub fn triggers_reconnect(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Io(_))
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Log the error with `context` and convert it
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }
}
