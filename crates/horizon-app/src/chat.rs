//! AI chat specialization.
//!
//! Each exchange writes the whole conversation history and streams the
//! assistant's reply back, either as `{content, isComplete}` snapshots or as
//! raw text chunks. The reply is reassembled into `current_stream_text` and
//! published, together with the history, on a `watch` channel for the
//! renderer.
//!
//! Only completed turns go back to the server. A chunk-streamed reply never
//! completes, so when the next message starts it is kept in the display
//! transcript and left out of the request history.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use horizon_core::prelude::*;
use horizon_core::{websocket_url, ConnectionReport, ConnectionState};
use horizon_stream::{
    BackgroundExecution, ConnectionController, Connector, LifecycleHook, Reassembler,
    StreamConfig, StreamHandler, StreamUpdate,
};

use crate::config::Settings;

pub const USER_ROLE: &str = "user";
pub const ASSISTANT_ROLE: &str = "assistant";

/// One conversation turn on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>, metadata: Option<MessageMetadata>) -> Self {
        Self {
            role: USER_ROLE.to_string(),
            content: content.into(),
            metadata,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ASSISTANT_ROLE.to_string(),
            content: content.into(),
            metadata: None,
        }
    }
}

/// Screen context attached to a user turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<String>,
}

/// Outbound request: full history plus side payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Base64-encoded screenshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_bytes: Option<String>,
    pub smarter_analysis_enabled: bool,
}

/// Structured inbound snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub content: String,
    pub is_complete: bool,
}

/// Context captured by the host when the user sends a message.
#[derive(Debug, Clone, Default)]
pub struct OutboundContext {
    pub ocr_text: Option<String>,
    pub selected_text: Option<String>,
    pub image: Option<Vec<u8>>,
}

impl OutboundContext {
    fn metadata(&self) -> Option<MessageMetadata> {
        let non_blank = |text: &Option<String>| text.clone().filter(|t| !t.trim().is_empty());
        let metadata = MessageMetadata {
            ocr_text: non_blank(&self.ocr_text),
            selected_text: non_blank(&self.selected_text),
        };
        (metadata != MessageMetadata::default()).then_some(metadata)
    }

    fn image_base64(&self) -> Option<String> {
        self.image.as_deref().map(|bytes| BASE64.encode(bytes))
    }
}

/// Snapshot published to the renderer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatView {
    pub connected: bool,
    pub receiving: bool,
    pub current_stream_text: String,
    /// Completed turns, as sent to the server.
    pub history: Arc<[ChatMessage]>,
    /// Everything shown to the user, including replies cut off by a new
    /// message.
    pub transcript: Arc<[ChatMessage]>,
}

/// Chat state mutated inside the controller's dispatch step.
pub struct ChatHandler {
    reassembler: Reassembler,
    history: Vec<ChatMessage>,
    transcript: Vec<ChatMessage>,
    // Shared with published views; rebuilt only when a turn is added or removed.
    history_view: Arc<[ChatMessage]>,
    transcript_view: Arc<[ChatMessage]>,
    receiving: bool,
    connected: bool,
    view: watch::Sender<ChatView>,
}

impl ChatHandler {
    fn new(view: watch::Sender<ChatView>) -> Self {
        Self {
            reassembler: Reassembler::new(),
            history: Vec::new(),
            transcript: Vec::new(),
            history_view: Arc::default(),
            transcript_view: Arc::default(),
            receiving: false,
            connected: false,
            view,
        }
    }

    /// Append a turn that is part of the conversation sent to the server.
    fn push_turn(&mut self, turn: ChatMessage) {
        self.transcript.push(turn.clone());
        self.history.push(turn);
        self.turns_changed();
    }

    fn turns_changed(&mut self) {
        self.history_view = Arc::from(self.history.as_slice());
        self.transcript_view = Arc::from(self.transcript.as_slice());
    }

    fn publish(&self) {
        self.view.send_replace(ChatView {
            connected: self.connected,
            receiving: self.receiving,
            current_stream_text: self.reassembler.current_text().to_string(),
            history: Arc::clone(&self.history_view),
            transcript: Arc::clone(&self.transcript_view),
        });
    }

    /// Record the user turn and build the request for it.
    fn begin_exchange(
        &mut self,
        text: &str,
        context: &OutboundContext,
        smarter_analysis: bool,
    ) -> ChatRequest {
        let unfinished = self.reassembler.current_text();
        if !unfinished.is_empty() {
            self.transcript.push(ChatMessage::assistant(unfinished));
        }
        self.reassembler.begin_exchange();

        self.push_turn(ChatMessage::user(text, context.metadata()));
        self.receiving = true;
        self.publish();

        ChatRequest {
            messages: self.history.clone(),
            image_bytes: context.image_base64(),
            smarter_analysis_enabled: smarter_analysis,
        }
    }

    /// Undo [`begin_exchange`](Self::begin_exchange) after a failed send.
    fn abandon_exchange(&mut self) {
        let is_user = |turn: &ChatMessage| turn.role == USER_ROLE;
        if self.history.last().is_some_and(is_user) {
            self.history.pop();
        }
        if self.transcript.last().is_some_and(is_user) {
            self.transcript.pop();
        }
        self.turns_changed();
        self.receiving = false;
        self.publish();
    }

    fn clear(&mut self) {
        self.history.clear();
        self.transcript.clear();
        self.turns_changed();
        self.reassembler.begin_exchange();
        self.receiving = false;
        self.publish();
    }
}

impl StreamHandler for ChatHandler {
    type Request = ChatRequest;
    type Response = ChatResponse;

    fn on_response(&mut self, response: ChatResponse) {
        let completed = self.reassembler.apply(StreamUpdate::Snapshot {
            content: response.content,
            is_complete: response.is_complete,
        });
        match completed {
            Some(content) => {
                self.push_turn(ChatMessage::assistant(content));
                self.receiving = false;
            }
            None => self.receiving = true,
        }
        self.publish();
    }

    fn on_text(&mut self, text: String) {
        self.reassembler.apply(StreamUpdate::Chunk(text));
        self.receiving = true;
        self.publish();
    }

    fn on_state_change(&mut self, state: ConnectionState) {
        self.connected = state.is_connected();
        if !self.connected {
            self.receiving = false;
        }
        self.publish();
    }
}

/// The AI assistant connection.
pub struct ChatSession<C: Connector> {
    controller: ConnectionController<C, ChatHandler>,
    view: watch::Receiver<ChatView>,
    smarter_analysis_default: bool,
}

impl<C: Connector> ChatSession<C> {
    pub fn new(connector: C, config: StreamConfig) -> Self {
        Self::with_background(connector, config, horizon_stream::noop_background())
    }

    pub fn with_background(
        connector: C,
        config: StreamConfig,
        background: Arc<dyn BackgroundExecution>,
    ) -> Self {
        let (tx, view) = watch::channel(ChatView::default());
        Self {
            controller: ConnectionController::with_background(
                connector,
                config,
                ChatHandler::new(tx),
                background,
            ),
            view,
            smarter_analysis_default: false,
        }
    }

    /// Build from settings: `<base_url><chat.path>` over WS(S).
    pub fn from_settings(
        connector: C,
        settings: &Settings,
        background: Arc<dyn BackgroundExecution>,
    ) -> Result<Self> {
        let url = websocket_url(&settings.server.base_url, &settings.chat.path, &[])?;
        let config = settings
            .connection
            .stream_config("chat", url, settings.chat.heartbeat)?;
        let mut session = Self::with_background(connector, config, background);
        session.smarter_analysis_default = settings.chat.smarter_analysis;
        Ok(session)
    }

    pub async fn connect(&self) -> Result<()> {
        self.controller.connect().await
    }

    /// Append a user turn and send the whole history.
    ///
    /// On failure the user turn is removed again and `receiving` cleared.
    pub async fn send_message(
        &self,
        text: &str,
        context: OutboundContext,
        smarter_analysis: bool,
    ) -> Result<()> {
        let request = self
            .controller
            .with_handler(|chat| chat.begin_exchange(text, &context, smarter_analysis));

        if let Err(err) = self.controller.send(&request).await {
            self.controller.with_handler(ChatHandler::abandon_exchange);
            return Err(err);
        }
        debug!("chat: sent {} turns", request.messages.len());
        Ok(())
    }

    /// [`send_message`](Self::send_message) with the configured
    /// smarter-analysis default.
    pub async fn send_text(&self, text: &str, context: OutboundContext) -> Result<()> {
        self.send_message(text, context, self.smarter_analysis_default)
            .await
    }

    pub fn clear_conversation(&self) {
        self.controller.with_handler(ChatHandler::clear);
    }

    pub fn view(&self) -> watch::Receiver<ChatView> {
        self.view.clone()
    }

    pub fn snapshot(&self) -> ChatView {
        self.view.borrow().clone()
    }

    /// Completed turns, as the next request will carry them.
    pub fn history(&self) -> Arc<[ChatMessage]> {
        self.controller
            .with_handler(|chat| Arc::clone(&chat.history_view))
    }

    /// Every turn shown to the user, including cut-off replies.
    pub fn transcript(&self) -> Arc<[ChatMessage]> {
        self.controller
            .with_handler(|chat| Arc::clone(&chat.transcript_view))
    }

    pub fn connection_report(&self) -> ConnectionReport {
        self.controller.connection_report()
    }

    pub async fn graceful_disconnect(&self) {
        self.controller.graceful_disconnect().await;
    }

    pub fn controller(&self) -> &ConnectionController<C, ChatHandler> {
        &self.controller
    }
}

impl<C: Connector> LifecycleHook for ChatSession<C> {
    async fn on_enter_background(&self) {
        self.controller.on_enter_background().await;
    }

    async fn on_enter_foreground(&self) {
        self.controller.on_enter_foreground().await;
    }
}
