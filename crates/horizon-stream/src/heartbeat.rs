//! Heartbeat scheduler.
//!
//! Periodically pings the open socket so a silently dead connection is
//! noticed before the next read would time out. Two heartbeat styles exist
//! because the endpoints disagree: the chat endpoint answers transport-level
//! pings, the tag endpoint expects an application-level `"ping"` text frame
//! (and may answer `"pong"`, which the receive loop swallows).

use std::time::Duration;

use tokio::time::MissedTickBehavior;

use horizon_core::prelude::*;

use crate::transport::{Frame, Socket};

/// Default heartbeat interval.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Application-level heartbeat text.
pub const PING_TEXT: &str = "ping";

/// How liveness is checked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HeartbeatStyle {
    /// Transport ping; fails when no pong arrives in time.
    #[default]
    TransportPing,
    /// Application text sentinel; fails only when the write fails.
    Text(String),
    /// No heartbeat.
    Disabled,
}

impl HeartbeatStyle {
    pub fn text_ping() -> Self {
        Self::Text(PING_TEXT.to_string())
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, HeartbeatStyle::Disabled)
    }
}

/// Send one heartbeat.
pub async fn beat<S: Socket + Sync>(socket: &S, style: &HeartbeatStyle) -> Result<()> {
    match style {
        HeartbeatStyle::TransportPing => socket.ping().await,
        HeartbeatStyle::Text(text) => socket.send(Frame::text(text.clone())).await,
        HeartbeatStyle::Disabled => Ok(()),
    }
}

/// Beat every `interval` until a beat fails or `keep_running` turns false.
///
/// Returns the failed beat's error, or `None` for a clean stop. A zero `interval`
/// behaves like [`HeartbeatStyle::Disabled`]. The first beat goes
/// out one full interval after the call. Cancellation is by dropping or
/// aborting the future; the socket is only borrowed.
pub async fn run_heartbeat<S, F>(
    socket: &S,
    style: &HeartbeatStyle,
    interval: Duration,
    keep_running: F,
) -> Option<Error>
where
    S: Socket + Sync,
    F: Fn() -> bool,
{
    if !style.is_enabled() {
        return None;
    }
    if interval.is_zero() {
        warn!("Heartbeat: zero interval, not scheduling {:?}", style);
        return None;
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // consume the immediate first tick

    loop {
        ticker.tick().await;
        if !keep_running() {
            return None;
        }

        trace!("Heartbeat: probing ({:?})", style);
        if let Err(err) = beat(socket, style).await {
            warn!("Heartbeat: beat failed: {}", err);
            return Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockConnector;
    use crate::transport::Connector;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_transport_ping_every_interval() {
        let connector = MockConnector::new();
        let socket = connector.open("ws://test").await.unwrap();
        let remote = connector.remote(0);

        let style = HeartbeatStyle::TransportPing;
        let run = run_heartbeat(&socket, &style, Duration::from_secs(30), || true);
        let outcome = tokio::time::timeout(Duration::from_secs(95), run).await;

        assert!(outcome.is_err(), "heartbeat should still be running");
        assert_eq!(remote.ping_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_beat_sends_sentinel() {
        let connector = MockConnector::new();
        let socket = connector.open("ws://test").await.unwrap();
        let remote = connector.remote(0);

        let style = HeartbeatStyle::text_ping();
        let run = run_heartbeat(&socket, &style, Duration::from_secs(30), || true);
        let _ = tokio::time::timeout(Duration::from_secs(31), run).await;

        assert_eq!(remote.sent_texts(), vec!["ping".to_string()]);
        assert_eq!(remote.ping_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_beat_returns_error() {
        let connector = MockConnector::new();
        let socket = connector.open("ws://test").await.unwrap();
        connector.remote(0).fail_pings(true);

        let err = run_heartbeat(
            &socket,
            &HeartbeatStyle::TransportPing,
            Duration::from_secs(30),
            || true,
        )
        .await;

        assert!(matches!(err, Some(Error::Transport { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_maintain_cleared() {
        let connector = MockConnector::new();
        let socket = connector.open("ws://test").await.unwrap();
        let maintain = AtomicBool::new(false);

        let outcome = run_heartbeat(
            &socket,
            &HeartbeatStyle::TransportPing,
            Duration::from_secs(30),
            || maintain.load(Ordering::SeqCst),
        )
        .await;

        assert!(outcome.is_none());
        assert_eq!(connector.remote(0).ping_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_returns_immediately() {
        let connector = MockConnector::new();
        let socket = connector.open("ws://test").await.unwrap();
        let outcome = run_heartbeat(
            &socket,
            &HeartbeatStyle::Disabled,
            Duration::from_secs(30),
            || true,
        )
        .await;
        assert!(outcome.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_treated_as_disabled() {
        let connector = MockConnector::new();
        let socket = connector.open("ws://test").await.unwrap();
        let outcome = run_heartbeat(
            &socket,
            &HeartbeatStyle::TransportPing,
            Duration::ZERO,
            || true,
        )
        .await;
        assert!(outcome.is_none());
        assert_eq!(connector.remote(0).ping_count(), 0);
    }
}
