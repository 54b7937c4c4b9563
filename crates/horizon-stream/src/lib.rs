//! # horizon-stream - Resilient Streaming Connection Manager
//!
//! Keeps one long-lived, full-duplex streaming connection alive across
//! network flaps and host backgrounding, and turns the streamed frames of
//! each exchange into a stable display string.
//!
//! ## Public API
//!
//! ### Transport (`transport`, `websocket`)
//! - [`Socket`] / [`Connector`] - The narrow channel the controller drives
//! - [`WsConnector`] - `tokio-tungstenite` implementation
//!
//! ### Connection (`controller`)
//! - [`ConnectionController`] - Lifecycle state machine, generic over a [`StreamHandler`]
//! - [`StreamConfig`] - Endpoint, heartbeat, backoff and timing parameters
//!
//! ### Building Blocks
//! - [`ReconnectPolicy`] - Exponential backoff with a bounded attempt counter
//! - [`HeartbeatStyle`] - Transport ping, text sentinel, or none
//! - [`Reassembler`] - Replace-vs-append reassembly of streamed responses
//! - [`classify()`] - Sentinel / structured / chunk classification
//!
//! ### Lifecycle (`lifecycle`)
//! - [`LifecycleHook`] - Foreground/background notifications
//! - [`BackgroundExecution`] - Host hook extending execution while backgrounded
//!
//! ## Testing
//!
//! Enable the `test-helpers` feature for [`test_utils::MockConnector`], a
//! scripted in-memory transport.

pub mod backoff;
pub mod controller;
pub mod frame;
pub mod heartbeat;
pub mod lifecycle;
pub mod reassembler;
pub mod receive;
pub mod transport;
pub mod websocket;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use backoff::{
    compute_backoff, BackoffConfig, ReconnectPolicy, RetryDecision, INITIAL_BACKOFF, MAX_BACKOFF,
    MAX_RECONNECT_ATTEMPTS,
};
pub use controller::{ConnectionController, StreamConfig, StreamHandler};
pub use frame::{classify, Inbound, Sentinel, INIT_ACK, PONG};
pub use heartbeat::{HeartbeatStyle, HEARTBEAT_INTERVAL, PING_TEXT};
pub use lifecycle::{
    noop_background, BackgroundExecution, BackgroundToken, LifecycleHook,
    NoopBackgroundExecution,
};
pub use reassembler::{reassemble, Reassembler, StreamAccumulator, StreamUpdate};
pub use transport::{Connector, Frame, Socket, NORMAL_CLOSURE};
pub use websocket::{WsConnector, WsSocket};
