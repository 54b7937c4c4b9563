//! Receive loop.
//!
//! Pulls frames from the socket, classifies them, and hands each classified
//! payload to a dispatch callback. The loop owns no state: the controller
//! supplies the callback, which serializes the write into shared state.

use serde::de::DeserializeOwned;

use horizon_core::prelude::*;

use crate::frame::{classify, preview, Inbound};
use crate::transport::Socket;

/// Why the receive loop stopped.
#[derive(Debug)]
pub enum ReceiveExit {
    /// The remote closed the channel.
    Closed,
    /// `receive()` failed.
    Failed(Error),
}

impl ReceiveExit {
    /// Convert to the failure signal handed to the reconnection policy.
    ///
    /// A stopped loop always means a dead channel, so the result always
    /// [triggers a reconnect](Error::triggers_reconnect).
    pub fn into_error(self) -> Error {
        match self {
            ReceiveExit::Closed => Error::transport("connection closed by remote"),
            ReceiveExit::Failed(err) if err.triggers_reconnect() => err,
            ReceiveExit::Failed(err) => Error::transport(format!("receive failed: {err}")),
        }
    }
}

/// Receive until the channel closes or fails.
///
/// Every classified frame, malformed ones included, goes to `dispatch`; a
/// malformed frame never ends the loop.
/// Cancellation is by aborting the task running this future.
pub async fn run_receive_loop<S, R, F>(socket: &S, mut dispatch: F) -> ReceiveExit
where
    S: Socket + Sync,
    R: DeserializeOwned,
    F: FnMut(Inbound<R>),
{
    loop {
        let frame = match socket.receive().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("Receive loop: channel closed");
                return ReceiveExit::Closed;
            }
            Err(err) => {
                debug!("Receive loop: {}", err);
                return ReceiveExit::Failed(err);
            }
        };

        if let Some(text) = frame.as_text() {
            trace!("Receive loop: <- {}", preview(text));
        }

        dispatch(classify::<R>(frame));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Sentinel;
    use crate::test_utils::MockConnector;
    use crate::transport::Connector;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Reply {
        content: String,
        #[allow(dead_code)]
        is_complete: bool,
    }

    #[tokio::test]
    async fn test_dispatches_in_order_and_stops_on_close() {
        let connector = MockConnector::new();
        let socket = connector.open("ws://test").await.unwrap();
        let remote = connector.remote(0);

        remote.push_text("|INIT|");
        remote.push_text(r#"{"content":"Hi","isComplete":false}"#);
        remote.push_text(" there");
        remote.push_binary(vec![0xde, 0xad]);
        remote.push_text("pong");
        remote.close_from_server();

        let mut seen = Vec::new();
        let exit = run_receive_loop::<_, Reply, _>(&socket, |inbound| {
            seen.push(match inbound {
                Inbound::Sentinel(Sentinel::InitAck) => "init".to_string(),
                Inbound::Sentinel(Sentinel::Pong) => "pong".to_string(),
                Inbound::Structured(reply) => format!("reply:{}", reply.content),
                Inbound::Chunk(text) => format!("chunk:{text}"),
                Inbound::Malformed(_) => "malformed".to_string(),
            })
        })
        .await;

        assert!(matches!(exit, ReceiveExit::Closed));
        assert_eq!(
            seen,
            vec!["init", "reply:Hi", "chunk: there", "malformed", "pong"]
        );
    }

    #[tokio::test]
    async fn test_loop_waits_for_frames() {
        let connector = MockConnector::new();
        let socket = connector.open("ws://test").await.unwrap();
        let remote = connector.remote(0);

        let mut task =
            tokio_test::task::spawn(run_receive_loop::<_, Reply, _>(&socket, |_| {}));
        tokio_test::assert_pending!(task.poll());

        remote.close_from_server();
        let exit = tokio_test::assert_ready!(task.poll());
        assert!(matches!(exit, ReceiveExit::Closed));
    }

    #[tokio::test]
    async fn test_failure_is_reported() {
        let connector = MockConnector::new();
        let socket = connector.open("ws://test").await.unwrap();
        connector.remote(0).drop_connection();

        let exit = run_receive_loop::<_, Reply, _>(&socket, |_| {}).await;
        let err = exit.into_error();
        assert!(err.triggers_reconnect());
    }

    #[test]
    fn test_clean_close_becomes_transport_failure() {
        assert!(matches!(
            ReceiveExit::Closed.into_error(),
            Error::Transport { .. }
        ));
    }

    #[test]
    fn test_any_receive_failure_triggers_reconnect() {
        let exit = ReceiveExit::Failed(Error::decode("bad utf-8"));
        assert!(exit.into_error().triggers_reconnect());

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(
            ReceiveExit::Failed(io.into()).into_error(),
            Error::Io(_)
        ));
    }
}
