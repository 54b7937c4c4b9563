//! `tokio-tungstenite` implementation of the transport traits.
//!
//! The WebSocket stream is split into a write half and a read half, each
//! behind its own async mutex, so the receive loop can sit in `receive()`
//! while the heartbeat and callers of `send` write concurrently.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, Notify};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use horizon_core::prelude::*;

use crate::transport::{Connector, Frame, Socket};

/// Default time a transport ping may wait for its pong.
pub const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Opens [`WsSocket`]s with `connect_async`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    pong_timeout: Duration,
}

impl WsConnector {
    pub fn new(pong_timeout: Duration) -> Self {
        Self { pong_timeout }
    }

    /// How long each opened socket's ping waits for its pong.
    pub fn pong_timeout(&self) -> Duration {
        self.pong_timeout
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_PONG_TIMEOUT)
    }
}

impl Connector for WsConnector {
    type Socket = WsSocket;

    async fn open(&self, url: &str) -> Result<WsSocket> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|err| Error::transport(format!("Failed to connect to {url}: {err}")))?;
        let (sink, stream) = ws_stream.split();

        Ok(WsSocket {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            pong: Notify::new(),
            pong_timeout: self.pong_timeout,
        })
    }
}

/// An open WebSocket connection.
pub struct WsSocket {
    sink: Mutex<SplitSink<WsStream, WsMessage>>,
    stream: Mutex<SplitStream<WsStream>>,
    /// Woken by the read half whenever a pong frame arrives.
    pong: Notify,
    pong_timeout: Duration,
}

impl std::fmt::Debug for WsSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsSocket")
            .field("pong_timeout", &self.pong_timeout)
            .finish()
    }
}

impl WsSocket {
    async fn write(&self, message: WsMessage) -> Result<()> {
        self.sink
            .lock()
            .await
            .send(message)
            .await
            .map_err(|err| Error::transport(format!("WebSocket write failed: {err}")))
    }
}

impl Socket for WsSocket {
    async fn send(&self, frame: Frame) -> Result<()> {
        let message = match frame {
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Binary(bytes) => WsMessage::Binary(bytes.into()),
        };
        self.write(message).await
    }

    async fn receive(&self) -> Result<Option<Frame>> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return Ok(Some(Frame::Text(text.as_str().to_owned())));
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    return Ok(Some(Frame::Binary(data.to_vec())));
                }
                Some(Ok(WsMessage::Pong(_))) => {
                    self.pong.notify_waiters();
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!("WebSocket: received Close frame: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(_)) => {
                    // Ping (answered by tungstenite) and raw frames
                }
                Some(Err(err)) => {
                    return Err(Error::transport(format!("WebSocket read error: {err}")));
                }
                None => {
                    debug!("WebSocket: stream ended");
                    return Ok(None);
                }
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        // Register interest before the ping leaves so a fast pong is not missed.
        let pong = self.pong.notified();
        tokio::pin!(pong);
        pong.as_mut().enable();

        self.write(WsMessage::Ping(Vec::new().into())).await?;

        tokio::time::timeout(self.pong_timeout, pong)
            .await
            .map_err(|_| {
                Error::transport(format!("no pong within {:?}", self.pong_timeout))
            })
    }

    async fn close(&self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };

        let mut sink = self.sink.lock().await;
        if let Err(err) = sink.send(WsMessage::Close(Some(frame))).await {
            debug!("WebSocket: close frame not sent: {}", err);
        }
        let _ = sink.close().await;
        Ok(())
    }
}
