//! Scripted in-memory transport for tests.
//!
//! [`MockConnector`] hands out [`MockSocket`]s and keeps a [`MockRemote`]
//! for each one, so a test can play the server side: push inbound frames,
//! drop the connection, and inspect what the client wrote. Open calls are
//! timestamped with `tokio::time::Instant`, which follows the paused clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use horizon_core::prelude::*;

use crate::lifecycle::{BackgroundExecution, BackgroundToken};
use crate::transport::{Connector, Frame, Socket};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug)]
enum Scripted {
    Frame(Frame),
    Close,
    Fail(String),
}

#[derive(Default)]
struct ConnectorState {
    remotes: Vec<MockRemote>,
    opened_at: Vec<Instant>,
    attempted_at: Vec<Instant>,
    fail_all: bool,
    fail_next: usize,
    open_delay: Option<Duration>,
}

/// Connector whose sockets are driven by the test.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent open fail with a transport error.
    pub fn fail_all_opens(&self, fail: bool) {
        lock(&self.state).fail_all = fail;
    }

    /// Make the next `n` opens fail.
    pub fn fail_next_opens(&self, n: usize) {
        lock(&self.state).fail_next = n;
    }

    /// Delay every open by `delay` of virtual time.
    pub fn set_open_delay(&self, delay: Duration) {
        lock(&self.state).open_delay = Some(delay);
    }

    /// Number of open calls, successful or not.
    pub fn open_calls(&self) -> usize {
        lock(&self.state).attempted_at.len()
    }

    /// Number of sockets successfully opened.
    pub fn open_count(&self) -> usize {
        lock(&self.state).remotes.len()
    }

    /// Virtual timestamps of every open call.
    pub fn attempted_at(&self) -> Vec<Instant> {
        lock(&self.state).attempted_at.clone()
    }

    /// Virtual timestamps of every successful open.
    pub fn opened_at(&self) -> Vec<Instant> {
        lock(&self.state).opened_at.clone()
    }

    /// Server side of the `index`-th successfully opened socket.
    pub fn remote(&self, index: usize) -> MockRemote {
        lock(&self.state).remotes[index].clone()
    }

    /// Server side of the most recently opened socket.
    pub fn last_remote(&self) -> Option<MockRemote> {
        lock(&self.state).remotes.last().cloned()
    }
}

impl Connector for MockConnector {
    type Socket = MockSocket;

    async fn open(&self, url: &str) -> Result<MockSocket> {
        let delay = {
            let mut state = lock(&self.state);
            state.attempted_at.push(Instant::now());
            state.open_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        if state.fail_all {
            return Err(Error::transport(format!("scripted open failure for {url}")));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(Error::transport(format!("scripted open failure for {url}")));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let remote = MockRemote {
            inner: Arc::new(RemoteInner {
                url: url.to_string(),
                tx,
                sent: Mutex::new(Vec::new()),
                pings: AtomicUsize::new(0),
                fail_pings: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                close_code: Mutex::new(None),
            }),
        };
        state.opened_at.push(Instant::now());
        state.remotes.push(remote.clone());

        Ok(MockSocket {
            remote,
            inbound: tokio::sync::Mutex::new(rx),
        })
    }
}

struct RemoteInner {
    url: String,
    tx: mpsc::UnboundedSender<Scripted>,
    sent: Mutex<Vec<Frame>>,
    pings: AtomicUsize,
    fail_pings: AtomicBool,
    closed: AtomicBool,
    close_code: Mutex<Option<u16>>,
}

/// The server end of one [`MockSocket`].
#[derive(Clone)]
pub struct MockRemote {
    inner: Arc<RemoteInner>,
}

impl MockRemote {
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.inner.tx.send(Scripted::Frame(Frame::Text(text.into())));
    }

    pub fn push_binary(&self, bytes: impl Into<Vec<u8>>) {
        let _ = self.inner.tx.send(Scripted::Frame(Frame::Binary(bytes.into())));
    }

    /// Close the channel cleanly from the server side.
    pub fn close_from_server(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let _ = self.inner.tx.send(Scripted::Close);
    }

    /// Break the channel: the pending read fails and later writes fail.
    pub fn drop_connection(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let _ = self
            .inner
            .tx
            .send(Scripted::Fail("connection reset by peer".to_string()));
    }

    /// Make transport pings fail as if no pong arrived.
    pub fn fail_pings(&self, fail: bool) {
        self.inner.fail_pings.store(fail, Ordering::SeqCst);
    }

    pub fn sent_frames(&self) -> Vec<Frame> {
        lock(&self.inner.sent).clone()
    }

    /// Text frames written by the client, in order.
    pub fn sent_texts(&self) -> Vec<String> {
        lock(&self.inner.sent)
            .iter()
            .filter_map(|frame| frame.as_text().map(str::to_string))
            .collect()
    }

    pub fn ping_count(&self) -> usize {
        self.inner.pings.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Close code sent by the client, if it closed the socket.
    pub fn close_code(&self) -> Option<u16> {
        *lock(&self.inner.close_code)
    }
}

/// Client end handed to the controller.
pub struct MockSocket {
    remote: MockRemote,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Scripted>>,
}

impl MockSocket {
    fn ensure_open(&self) -> Result<()> {
        if self.remote.is_closed() {
            return Err(Error::transport("socket is closed"));
        }
        Ok(())
    }
}

impl Socket for MockSocket {
    async fn send(&self, frame: Frame) -> Result<()> {
        self.ensure_open()?;
        lock(&self.remote.inner.sent).push(frame);
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Frame>> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some(Scripted::Frame(frame)) => Ok(Some(frame)),
            Some(Scripted::Close) | None => Ok(None),
            Some(Scripted::Fail(reason)) => Err(Error::transport(reason)),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_open()?;
        if self.remote.inner.fail_pings.load(Ordering::SeqCst) {
            return Err(Error::transport("no pong within timeout"));
        }
        self.remote.inner.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self, code: u16, _reason: &str) -> Result<()> {
        let mut close_code = lock(&self.remote.inner.close_code);
        if close_code.is_none() {
            *close_code = Some(code);
        }
        self.remote.inner.closed.store(true, Ordering::SeqCst);
        let _ = self.remote.inner.tx.send(Scripted::Close);
        Ok(())
    }
}

/// Background-execution hook that records outstanding requests.
#[derive(Default)]
pub struct RecordingBackground {
    next: AtomicUsize,
    active: Mutex<VecDeque<BackgroundToken>>,
    begun: AtomicUsize,
}

impl RecordingBackground {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Requests begun and not yet ended.
    pub fn active(&self) -> usize {
        lock(&self.active).len()
    }

    /// Total requests ever begun.
    pub fn begun(&self) -> usize {
        self.begun.load(Ordering::SeqCst)
    }
}

impl BackgroundExecution for RecordingBackground {
    fn begin(&self, _label: &str) -> BackgroundToken {
        let token = BackgroundToken(self.next.fetch_add(1, Ordering::SeqCst) as u64 + 1);
        self.begun.fetch_add(1, Ordering::SeqCst);
        lock(&self.active).push_back(token);
        token
    }

    fn end(&self, token: BackgroundToken) {
        lock(&self.active).retain(|t| *t != token);
    }
}
