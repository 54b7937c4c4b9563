//! Transport abstraction for the streaming connection.
//!
//! Decouples the connection controller from the platform networking stack.
//! The controller only needs a narrow full-duplex message channel: open a
//! socket for a URL, send and receive whole frames, check liveness, and close
//! with a code. [`crate::websocket`] provides the production implementation
//! over `tokio-tungstenite`; tests script the channel in memory.

use std::future::Future;

use horizon_core::prelude::*;

/// WebSocket close code for a normal, intentional closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// WebSocket close code sent when the endpoint is going away.
pub const GOING_AWAY: u16 = 1001;

/// One discrete message unit delivered by the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
}

impl Frame {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// The frame's text, if it is a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text),
            Frame::Binary(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An open full-duplex message channel.
///
/// All methods take `&self` so the receive loop, the heartbeat and callers of
/// `send` can share one handle concurrently. Implementations serialize
/// access to each half internally.
#[trait_variant::make(Socket: Send)]
pub trait LocalSocket {
    /// Write one frame.
    async fn send(&self, frame: Frame) -> Result<()>;

    /// Suspend until the next data frame arrives.
    ///
    /// Returns `Ok(None)` when the remote closed the channel cleanly and
    /// [`Error::Transport`] on I/O failure.
    async fn receive(&self) -> Result<Option<Frame>>;

    /// Send a transport-level liveness ping and wait for its reply.
    ///
    /// Fails when the remote stays silent past the transport's own ping
    /// timeout.
    async fn ping(&self) -> Result<()>;

    /// Close the channel with a WebSocket close code.
    ///
    /// Closing an already-closed channel is not an error.
    async fn close(&self, code: u16, reason: &str) -> Result<()>;
}

/// Opens sockets for the connection controller.
pub trait Connector: Send + Sync + 'static {
    /// The socket type produced by [`open`](Connector::open).
    type Socket: Socket + Sync + 'static;

    /// Open a channel to `url`, completing any handshake.
    fn open(&self, url: &str) -> impl Future<Output = Result<Self::Socket>> + Send;
}
