//! Connection controller.
//!
//! Owns one socket's lifecycle and composes the heartbeat, the receive loop,
//! the reconnection policy and the connection monitor around it.
//!
//! ## State machine
//!
//! ```text
//! Disconnected --connect()--> Connecting --open ok--> Connected
//! Connected --failure--> Reconnecting --backoff, open ok--> Connected
//! Reconnecting --max attempts--> Disconnected (counter reset)
//! any --graceful_disconnect()--> ShuttingDown --drain--> Disconnected
//! ```
//!
//! All shared state sits behind one `std::sync::Mutex` that is never held
//! across an await. Every background activity is tagged with the socket
//! generation it was spawned for; signals from an older generation are
//! ignored, so a late failure report cannot tear down a newer socket.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use horizon_core::prelude::*;
use horizon_core::{ConnectionReport, ConnectionState};

use crate::backoff::{BackoffConfig, ReconnectPolicy, RetryDecision};
use crate::frame::{Inbound, Sentinel};
use crate::heartbeat::{run_heartbeat, HeartbeatStyle, HEARTBEAT_INTERVAL};
use crate::lifecycle::{noop_background, BackgroundExecution, BackgroundToken, LifecycleHook};
use crate::receive::run_receive_loop;
use crate::transport::{Connector, Frame, Socket, GOING_AWAY, NORMAL_CLOSURE};

/// Default connection monitor interval.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// Default drain wait between cancelling activities and closing the socket.
pub const DRAIN_INTERVAL: Duration = Duration::from_millis(100);

/// Default bound on a single socket open, and on `send` waiting for one.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-specialization wire types and dispatch callbacks.
///
/// Callbacks run inside the controller's serialization point with the state
/// lock held: keep them synchronous and short.
pub trait StreamHandler: Send + 'static {
    /// Outbound payload written by [`ConnectionController::send`].
    type Request: Serialize + Sync;
    /// Structured inbound payload.
    type Response: DeserializeOwned + Send + 'static;

    /// A structured response arrived.
    fn on_response(&mut self, response: Self::Response);

    /// A text frame that is neither a sentinel nor a structured response.
    fn on_text(&mut self, text: String) {
        debug!("Dropping unstructured text frame ({} bytes)", text.len());
    }

    /// The connection state changed.
    fn on_state_change(&mut self, _state: ConnectionState) {}

    /// Frame written right after each socket open, before activities start.
    fn handshake(&self) -> Option<Frame> {
        None
    }
}

/// Runtime parameters for one controller.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Name used in logs and reports.
    pub label: String,
    /// Full WebSocket URL including query.
    pub url: String,
    pub heartbeat: HeartbeatStyle,
    pub heartbeat_interval: Duration,
    pub monitor_interval: Duration,
    pub backoff: BackoffConfig,
    pub drain_interval: Duration,
    pub connect_timeout: Duration,
}

impl StreamConfig {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            heartbeat: HeartbeatStyle::default(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            monitor_interval: MONITOR_INTERVAL,
            backoff: BackoffConfig::default(),
            drain_interval: DRAIN_INTERVAL,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatStyle) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Handles of the activities bound to one socket.
#[derive(Default)]
struct SessionTasks {
    heartbeat: Option<JoinHandle<()>>,
    receiver: Option<JoinHandle<()>>,
}

impl SessionTasks {
    fn abort(&mut self) {
        for handle in [self.heartbeat.take(), self.receiver.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

struct Shared<S, H> {
    state: ConnectionState,
    maintain: bool,
    policy: ReconnectPolicy,
    socket: Option<Arc<S>>,
    generation: u64,
    session: SessionTasks,
    monitor: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    background: Option<BackgroundToken>,
    last_connected_at: Option<DateTime<Local>>,
    handler: H,
}

impl<S, H> Shared<S, H> {
    fn abort_all(&mut self) {
        self.session.abort();
        if let Some(handle) = self.monitor.take() {
            handle.abort();
        }
        if let Some(handle) = self.reconnect.take() {
            handle.abort();
        }
    }

    fn reconnect_running(&self) -> bool {
        self.reconnect
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

struct Inner<C: Connector, H: StreamHandler> {
    connector: C,
    config: StreamConfig,
    background: Arc<dyn BackgroundExecution>,
    status: watch::Sender<ConnectionState>,
    shared: Mutex<Shared<C::Socket, H>>,
}

/// Generic manager for one long-lived streaming connection.
///
/// Dropping the controller clears the maintain flag and aborts every
/// background activity.
pub struct ConnectionController<C: Connector, H: StreamHandler> {
    inner: Arc<Inner<C, H>>,
}

impl<C: Connector, H: StreamHandler> ConnectionController<C, H> {
    pub fn new(connector: C, config: StreamConfig, handler: H) -> Self {
        Self::with_background(connector, config, handler, noop_background())
    }

    pub fn with_background(
        connector: C,
        config: StreamConfig,
        handler: H,
        background: Arc<dyn BackgroundExecution>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionState::Disconnected);
        let policy = ReconnectPolicy::new(config.backoff);
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                background,
                status,
                shared: Mutex::new(Shared {
                    state: ConnectionState::Disconnected,
                    maintain: true,
                    policy,
                    socket: None,
                    generation: 0,
                    session: SessionTasks::default(),
                    monitor: None,
                    reconnect: None,
                    background: None,
                    last_connected_at: None,
                    handler,
                }),
            }),
        }
    }

    /// Open the socket if the controller is `Disconnected` and still
    /// maintaining its connection; otherwise a no-op.
    ///
    /// A failed open leaves the controller `Disconnected` and schedules no
    /// retry.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    /// Serialize `request` and write it as one text frame, connecting first
    /// if needed.
    pub async fn send(&self, request: &H::Request) -> Result<()> {
        self.inner.send(request).await
    }

    /// Stop for good: cancel activities, drain, close with a normal-closure
    /// code, and settle in `Disconnected`.
    pub async fn graceful_disconnect(&self) {
        self.inner.graceful_disconnect().await
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn maintains_connection(&self) -> bool {
        self.inner.lock().maintain
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().policy.attempts()
    }

    /// Subscribe to state transitions.
    pub fn status(&self) -> watch::Receiver<ConnectionState> {
        self.inner.status.subscribe()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    /// Run `f` against the handler inside the serialization point.
    pub fn with_handler<T>(&self, f: impl FnOnce(&mut H) -> T) -> T {
        f(&mut self.inner.lock().handler)
    }

    pub fn connection_report(&self) -> ConnectionReport {
        let shared = self.inner.lock();
        ConnectionReport {
            label: self.inner.config.label.clone(),
            state: shared.state,
            connected: shared.state.is_connected(),
            maintain_connection: shared.maintain,
            reconnect_attempts: shared.policy.attempts(),
            max_reconnect_attempts: shared.policy.config().max_attempts,
            last_connected_at: shared.last_connected_at,
        }
    }
}

impl<C: Connector, H: StreamHandler> LifecycleHook for ConnectionController<C, H> {
    async fn on_enter_background(&self) {
        self.inner.enter_background();
    }

    async fn on_enter_foreground(&self) {
        self.inner.end_background();
        let wanted = {
            let shared = self.inner.lock();
            shared.maintain && shared.state == ConnectionState::Disconnected
        };
        if wanted {
            info!("{}: foregrounded while disconnected, reconnecting", self.inner.config.label);
            if let Err(err) = self.inner.connect().await {
                warn!("{}: foreground reconnect failed: {}", self.inner.config.label, err);
            }
        }
    }
}

impl<C: Connector, H: StreamHandler> Drop for ConnectionController<C, H> {
    fn drop(&mut self) {
        let mut shared = self.inner.lock();
        shared.maintain = false;
        shared.abort_all();
        if let Some(token) = shared.background.take() {
            self.inner.background.end(token);
        }
    }
}

impl<C: Connector, H: StreamHandler> Inner<C, H> {
    fn lock(&self) -> MutexGuard<'_, Shared<C::Socket, H>> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn label(&self) -> &str {
        &self.config.label
    }

    fn set_state(&self, shared: &mut Shared<C::Socket, H>, state: ConnectionState) {
        if shared.state == state {
            return;
        }
        debug!("{}: {} -> {}", self.label(), shared.state, state);
        shared.state = state;
        shared.handler.on_state_change(state);
        self.status.send_replace(state);
    }

    async fn connect(self: &Arc<Self>) -> Result<()> {
        {
            let mut shared = self.lock();
            if !shared.maintain || shared.state != ConnectionState::Disconnected {
                trace!(
                    "{}: connect() ignored in state {} (maintain={})",
                    self.label(),
                    shared.state,
                    shared.maintain
                );
                return Ok(());
            }
            self.set_state(&mut shared, ConnectionState::Connecting);
        }

        match self.establish().await {
            Ok(()) => Ok(()),
            Err(err) => {
                let mut shared = self.lock();
                if shared.state == ConnectionState::Connecting {
                    self.set_state(&mut shared, ConnectionState::Disconnected);
                }
                warn!("{}: connect failed: {}", self.label(), err);
                Err(err)
            }
        }
    }

    /// Open a socket and install it. The caller has already moved the state
    /// to `Connecting` or `Reconnecting`.
    async fn establish(self: &Arc<Self>) -> Result<()> {
        info!("{}: connecting to {}", self.label(), self.config.url);

        let opened =
            tokio::time::timeout(self.config.connect_timeout, self.connector.open(&self.config.url))
                .await;
        let socket = match opened {
            Ok(Ok(socket)) => Arc::new(socket),
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(Error::transport(format!(
                    "open timed out after {:?}",
                    self.config.connect_timeout
                )))
            }
        };

        let handshake = self.lock().handler.handshake();
        if let Some(frame) = handshake {
            if let Err(err) = socket.send(frame).await {
                let _ = socket.close(GOING_AWAY, "handshake failed").await;
                return Err(err);
            }
        }

        let installed = {
            let mut shared = self.lock();
            let opening = matches!(
                shared.state,
                ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
            );
            if shared.maintain && opening {
                self.install(&mut shared, Arc::clone(&socket));
                true
            } else {
                false
            }
        };

        if !installed {
            debug!("{}: discarding socket opened during shutdown", self.label());
            let _ = socket.close(NORMAL_CLOSURE, "superseded").await;
            return Err(Error::NotConnected);
        }

        info!("{}: connected", self.label());
        Ok(())
    }

    fn install(self: &Arc<Self>, shared: &mut Shared<C::Socket, H>, socket: Arc<C::Socket>) {
        shared.generation += 1;
        let generation = shared.generation;

        shared.session.abort();
        shared.socket = Some(Arc::clone(&socket));
        shared.policy.reset();
        shared.last_connected_at = Some(Local::now());
        // Dropping our own handle detaches the reconnect task; it returns next.
        shared.reconnect = None;
        self.set_state(shared, ConnectionState::Connected);

        shared.session.heartbeat = Some(self.spawn_heartbeat(Arc::clone(&socket), generation));
        shared.session.receiver = Some(self.spawn_receiver(socket, generation));
        let idle = shared.monitor.as_ref().map_or(true, |handle| handle.is_finished());
        if idle && !self.config.monitor_interval.is_zero() {
            shared.monitor = Some(self.spawn_monitor());
        } else if idle {
            warn!("{}: monitor interval is zero, watchdog disabled", self.label());
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let shared = self.lock();
        shared.maintain
            && shared.generation == generation
            && shared.state == ConnectionState::Connected
    }

    fn spawn_heartbeat(self: &Arc<Self>, socket: Arc<C::Socket>, generation: u64) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let failure = run_heartbeat(
                &*socket,
                &inner.config.heartbeat,
                inner.config.heartbeat_interval,
                || inner.is_current(generation),
            )
            .await;
            if let Some(err) = failure {
                inner.report_failure(generation, &err);
            }
        })
    }

    fn spawn_receiver(self: &Arc<Self>, socket: Arc<C::Socket>, generation: u64) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let exit = run_receive_loop::<_, H::Response, _>(&*socket, |inbound| {
                inner.dispatch(generation, inbound)
            })
            .await;
            inner.report_failure(generation, &exit.into_error());
        })
    }

    fn spawn_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.monitor_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let wanted = {
                    let mut shared = inner.lock();
                    if !shared.maintain {
                        return;
                    }
                    let state = shared.state;
                    match state {
                        ConnectionState::Disconnected => !shared.reconnect_running(),
                        ConnectionState::Reconnecting { attempt } if !shared.reconnect_running() => {
                            // Retry loop vanished without installing a socket.
                            warn!(
                                "{}: reconnect stalled at attempt {}, starting over",
                                inner.label(),
                                attempt
                            );
                            shared.reconnect = None;
                            inner.set_state(&mut shared, ConnectionState::Disconnected);
                            true
                        }
                        _ => false,
                    }
                };
                if wanted {
                    info!("{}: monitor found connection down, reconnecting", inner.label());
                    if let Err(err) = inner.connect().await {
                        debug!("{}: monitor reconnect failed: {}", inner.label(), err);
                    }
                }
            }
        })
    }

    /// The single serialization point for inbound payloads.
    fn dispatch(&self, generation: u64, inbound: Inbound<H::Response>) {
        let mut shared = self.lock();
        if shared.generation != generation {
            return;
        }
        match inbound {
            Inbound::Structured(response) => shared.handler.on_response(response),
            Inbound::Chunk(text) => shared.handler.on_text(text),
            Inbound::Sentinel(Sentinel::InitAck) => {
                debug!("{}: server acknowledged init", self.label());
            }
            Inbound::Sentinel(Sentinel::Pong) => trace!("{}: pong", self.label()),
            Inbound::Malformed(err) => {
                warn!("{}: dropping malformed frame: {}", self.label(), err);
            }
        }
    }

    /// Failure signal from an activity bound to `generation`.
    ///
    /// Only errors that [trigger a reconnect](Error::triggers_reconnect)
    /// tear the socket down.
    fn report_failure(self: &Arc<Self>, generation: u64, err: &Error) {
        if !err.triggers_reconnect() {
            debug!("{}: not a channel failure, keeping socket: {}", self.label(), err);
            return;
        }
        let mut shared = self.lock();
        if shared.generation != generation
            || shared.state != ConnectionState::Connected
            || !shared.maintain
        {
            trace!("{}: ignoring stale failure: {}", self.label(), err);
            return;
        }

        warn!("{}: connection lost: {}", self.label(), err);
        shared.session.abort();
        let previous = shared.socket.take();
        let decision = self.next_attempt(&mut shared);
        if let RetryDecision::Retry { .. } = decision {
            shared.reconnect = Some(self.spawn_reconnect(previous, decision));
        } else {
            drop(shared);
            self.log_give_up(decision);
        }
    }

    /// Apply the policy to one failure and move the state accordingly.
    fn next_attempt(&self, shared: &mut Shared<C::Socket, H>) -> RetryDecision {
        let decision = shared.policy.on_failure();
        match decision {
            RetryDecision::Retry { attempt, .. } => {
                self.set_state(shared, ConnectionState::Reconnecting { attempt });
            }
            RetryDecision::GiveUp { .. } => {
                self.set_state(shared, ConnectionState::Disconnected);
                if let Some(monitor) = shared.monitor.take() {
                    monitor.abort();
                }
            }
        }
        decision
    }

    fn log_give_up(&self, decision: RetryDecision) {
        if let RetryDecision::GiveUp { attempts } = decision {
            error!(
                "{}: {}; waiting for foreground or explicit connect",
                self.label(),
                Error::MaxAttemptsExceeded { attempts }
            );
        }
    }

    fn spawn_reconnect(
        self: &Arc<Self>,
        previous: Option<Arc<C::Socket>>,
        first: RetryDecision,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(socket) = previous {
                let _ = socket.close(GOING_AWAY, "reconnecting").await;
            }

            let mut decision = first;
            while let RetryDecision::Retry { attempt, delay } = decision {
                warn!(
                    "{}: reconnecting in {:?} (attempt {}/{})",
                    inner.label(),
                    delay,
                    attempt,
                    inner.config.backoff.max_attempts
                );
                tokio::time::sleep(delay).await;

                match inner.establish().await {
                    Ok(()) => return,
                    Err(err) => warn!("{}: attempt {} failed: {}", inner.label(), attempt, err),
                }

                let mut shared = inner.lock();
                if !shared.maintain || !shared.state.accepts_open() {
                    return;
                }
                decision = inner.next_attempt(&mut shared);
                if let RetryDecision::GiveUp { .. } = decision {
                    shared.reconnect = None;
                }
            }
            inner.log_give_up(decision);
        })
    }

    async fn send(self: &Arc<Self>, request: &H::Request) -> Result<()> {
        let payload = serde_json::to_string(request).map_err(|e| Error::encode(e.to_string()))?;
        let (socket, generation) = self.ready_socket().await?;

        if let Err(err) = socket.send(Frame::Text(payload)).await {
            warn!("{}: send failed: {}", self.label(), err);
            self.report_failure(generation, &err);
            return Err(err);
        }
        Ok(())
    }

    fn current_socket(&self) -> Option<(Arc<C::Socket>, u64)> {
        let shared = self.lock();
        if !shared.state.is_connected() {
            return None;
        }
        shared
            .socket
            .as_ref()
            .map(|socket| (Arc::clone(socket), shared.generation))
    }

    async fn ready_socket(self: &Arc<Self>) -> Result<(Arc<C::Socket>, u64)> {
        if let Some(ready) = self.current_socket() {
            return Ok(ready);
        }

        if let Err(err) = self.connect().await {
            debug!("{}: send could not connect: {}", self.label(), err);
            return Err(Error::NotConnected);
        }

        // Another caller may own the attempt in flight.
        let mut status = self.status.subscribe();
        let settled = status.wait_for(|state| *state != ConnectionState::Connecting);
        let _ = tokio::time::timeout(self.config.connect_timeout, settled).await;

        self.current_socket().ok_or(Error::NotConnected)
    }

    async fn graceful_disconnect(self: &Arc<Self>) {
        let socket = {
            let mut shared = self.lock();
            shared.maintain = false;
            shared.abort_all();
            shared.generation += 1;
            self.set_state(&mut shared, ConnectionState::ShuttingDown);
            shared.socket.take()
        };

        tokio::time::sleep(self.config.drain_interval).await;

        if let Some(socket) = socket {
            if let Err(err) = socket.close(NORMAL_CLOSURE, "client disconnect").await {
                debug!("{}: close failed: {}", self.label(), err);
            }
        }

        let mut shared = self.lock();
        self.set_state(&mut shared, ConnectionState::Disconnected);
        if let Some(token) = shared.background.take() {
            self.background.end(token);
        }
        info!("{}: disconnected", self.label());
    }

    fn enter_background(&self) {
        let mut shared = self.lock();
        if !shared.maintain || shared.background.is_some() {
            return;
        }
        shared.background = Some(self.background.begin(&self.config.label));
        debug!("{}: holding background execution", self.label());
    }

    fn end_background(&self) {
        let token = self.lock().background.take();
        if let Some(token) = token {
            self.background.end(token);
            debug!("{}: released background execution", self.label());
        }
    }
}
