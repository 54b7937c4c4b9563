//! Context search specialization.
//!
//! Sends the OCR text of the user's screen and receives the notes the
//! backend considers related. The socket is opened with an `{"init":true}`
//! handshake which the server acknowledges with `|INIT|`.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::watch;

use horizon_core::prelude::*;
use horizon_core::{websocket_url, ConnectionReport, ConnectionState};
use horizon_stream::{
    BackgroundExecution, ConnectionController, Connector, Frame, LifecycleHook, StreamHandler,
};

use crate::config::Settings;
use crate::tags::Tag;

/// How the backend derives search queries from the screen text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    TopicExtraction,
    #[default]
    SentenceChunks,
}

impl SearchMethod {
    pub fn path(&self) -> &'static str {
        match self {
            SearchMethod::TopicExtraction => "/horizon/context/context-search-ws-topic-extraction",
            SearchMethod::SentenceChunks => "/horizon/context/context-search-ws-sentence-chunks",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextSearchRequest {
    pub screen_ocr: String,
    pub tenant_name: String,
}

/// A note returned by context search.
///
/// The backend sends either a flat object or `{uniqueid, properties: {..}}`;
/// both decode to the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "serde_json::Value")]
pub struct Note {
    pub uniqueid: String,
    pub title: String,
    pub content: String,
    pub file_path: String,
    pub tags: Vec<Tag>,
    pub created: i64,
    pub last_modified: i64,
    pub last_update_device: String,
    pub last_update_device_id: String,
    pub incoming_connections: Vec<String>,
    pub outgoing_connections: Vec<String>,
    pub tag_ids: Vec<String>,
    pub file_data: Option<String>,
    pub file_type: Option<String>,
    pub file_text: Option<String>,
    pub note_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NoteFields {
    title: String,
    content: String,
    #[serde(default)]
    file_path: String,
    #[serde(default)]
    tags: Vec<Tag>,
    created: i64,
    last_modified: i64,
    #[serde(default)]
    last_update_device: String,
    #[serde(default)]
    last_update_device_id: String,
    #[serde(default, deserialize_with = "connection_ids")]
    incoming_connections: Vec<String>,
    #[serde(default, deserialize_with = "connection_ids")]
    outgoing_connections: Vec<String>,
    #[serde(default)]
    tag_ids: Vec<String>,
    file_data: Option<String>,
    file_type: Option<String>,
    file_text: Option<String>,
    note_type: Option<String>,
}

/// Connections arrive as ids or as objects carrying `uniqueid`, `id` or
/// `target`; anything else decodes to an empty list.
fn connection_ids<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let Some(serde_json::Value::Array(items)) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .iter()
        .filter_map(|item| match item {
            serde_json::Value::String(id) => Some(id.clone()),
            serde_json::Value::Object(map) => ["uniqueid", "id", "target"]
                .iter()
                .find_map(|key| map.get(*key).and_then(|v| v.as_str()))
                .map(str::to_string),
            _ => None,
        })
        .collect())
}

impl TryFrom<serde_json::Value> for Note {
    type Error = String;

    fn try_from(value: serde_json::Value) -> std::result::Result<Self, Self::Error> {
        let uniqueid = value
            .get("uniqueid")
            .and_then(|v| v.as_str())
            .ok_or("note without uniqueid")?
            .to_string();

        let source = match value.get("properties") {
            Some(properties) => properties.clone(),
            None => value,
        };
        let fields: NoteFields =
            serde_json::from_value(source).map_err(|e| format!("note {uniqueid}: {e}"))?;

        Ok(Self {
            uniqueid,
            title: fields.title,
            content: fields.content,
            file_path: fields.file_path,
            tags: fields.tags,
            created: fields.created,
            last_modified: fields.last_modified,
            last_update_device: fields.last_update_device,
            last_update_device_id: fields.last_update_device_id,
            incoming_connections: fields.incoming_connections,
            outgoing_connections: fields.outgoing_connections,
            tag_ids: fields.tag_ids,
            file_data: fields.file_data,
            file_type: fields.file_type,
            file_text: fields.file_text,
            note_type: fields.note_type,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContextSearchResponse {
    pub results: Vec<Note>,
    #[serde(default)]
    pub search_queries_used: Option<Vec<String>>,
    #[serde(default)]
    pub sentence_chunks_used: Option<Vec<String>>,
    pub total_results: u32,
}

/// Inbound reply: results, or a server-side error message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SearchReply {
    Results(ContextSearchResponse),
    Failed { error: String },
}

/// Snapshot published to observers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchView {
    pub connected: bool,
    pub searching: bool,
    pub results: Option<ContextSearchResponse>,
    pub last_error: Option<String>,
}

pub struct SearchHandler {
    state: SearchView,
    view: watch::Sender<SearchView>,
}

impl SearchHandler {
    fn publish(&self) {
        self.view.send_replace(self.state.clone());
    }

    fn begin_search(&mut self) {
        self.state.searching = true;
        self.state.last_error = None;
        self.publish();
    }

    fn fail(&mut self, message: String) {
        self.state.searching = false;
        self.state.last_error = Some(message);
        self.publish();
    }
}

impl StreamHandler for SearchHandler {
    type Request = ContextSearchRequest;
    type Response = SearchReply;

    fn on_response(&mut self, reply: SearchReply) {
        match reply {
            SearchReply::Results(response) => {
                info!("search: received {} results", response.total_results);
                self.state.searching = false;
                self.state.results = Some(response);
                self.publish();
            }
            SearchReply::Failed { error } => {
                warn!("search: server error: {}", error);
                self.fail(error);
            }
        }
    }

    fn on_text(&mut self, text: String) {
        warn!("search: undecodable reply ({} bytes)", text.len());
        self.fail("Failed to decode context search response".to_string());
    }

    fn on_state_change(&mut self, state: ConnectionState) {
        self.state.connected = state.is_connected();
        self.publish();
    }

    fn handshake(&self) -> Option<Frame> {
        Some(Frame::text(serde_json::json!({ "init": true }).to_string()))
    }
}

/// Context search connection for one method and tenant.
pub struct ContextSearch<C: Connector> {
    controller: ConnectionController<C, SearchHandler>,
    view: watch::Receiver<SearchView>,
    method: SearchMethod,
    tenant_name: String,
}

impl<C: Connector> ContextSearch<C> {
    pub fn new(
        connector: C,
        settings: &Settings,
        method: SearchMethod,
        tenant_name: &str,
        background: Arc<dyn BackgroundExecution>,
    ) -> Result<Self> {
        let tenant_name = tenant_name.trim();
        if tenant_name.is_empty() {
            return Err(Error::config("Tenant name not set"));
        }

        let url = websocket_url(&settings.server.base_url, method.path(), &[])?;
        let config = settings
            .connection
            .stream_config("search", url, settings.search.heartbeat)?;
        let (tx, view) = watch::channel(SearchView::default());

        Ok(Self {
            controller: ConnectionController::with_background(
                connector,
                config,
                SearchHandler {
                    state: SearchView::default(),
                    view: tx,
                },
                background,
            ),
            view,
            method,
            tenant_name: tenant_name.to_string(),
        })
    }

    pub fn from_settings(
        connector: C,
        settings: &Settings,
        background: Arc<dyn BackgroundExecution>,
    ) -> Result<Self> {
        Self::new(
            connector,
            settings,
            settings.search.method,
            &settings.search.tenant_name,
            background,
        )
    }

    pub fn method(&self) -> SearchMethod {
        self.method
    }

    pub async fn connect(&self) -> Result<()> {
        self.controller.connect().await
    }

    /// Submit the screen text; results arrive on [`view`](Self::view).
    pub async fn search(&self, screen_ocr: &str) -> Result<()> {
        self.controller.with_handler(SearchHandler::begin_search);

        let request = ContextSearchRequest {
            screen_ocr: screen_ocr.to_string(),
            tenant_name: self.tenant_name.clone(),
        };
        if let Err(err) = self.controller.send(&request).await {
            let message = err.to_string();
            self.controller.with_handler(|h| h.fail(message));
            return Err(err);
        }
        Ok(())
    }

    pub fn view(&self) -> watch::Receiver<SearchView> {
        self.view.clone()
    }

    pub fn results(&self) -> Vec<Note> {
        self.view
            .borrow()
            .results
            .as_ref()
            .map(|r| r.results.clone())
            .unwrap_or_default()
    }

    pub fn connection_report(&self) -> ConnectionReport {
        self.controller.connection_report()
    }

    pub async fn graceful_disconnect(&self) {
        self.controller.graceful_disconnect().await;
    }

    pub fn controller(&self) -> &ConnectionController<C, SearchHandler> {
        &self.controller
    }
}

impl<C: Connector> LifecycleHook for ContextSearch<C> {
    async fn on_enter_background(&self) {
        self.controller.on_enter_background().await;
    }

    async fn on_enter_foreground(&self) {
        self.controller.on_enter_foreground().await;
    }
}
