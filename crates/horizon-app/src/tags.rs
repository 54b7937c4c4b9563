//! Tag update specialization.
//!
//! Bootstraps the tenant's tag directory over HTTP, then keeps it current
//! from a WebSocket feed of `tag_update` events. Changes are published as a
//! [`TagView`] snapshot and as discrete [`TagEvent`]s.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::{broadcast, watch};

use horizon_core::prelude::*;
use horizon_core::{http_url, websocket_url, ConnectionReport, ConnectionState};
use horizon_stream::{
    BackgroundExecution, ConnectionController, Connector, HeartbeatStyle, LifecycleHook,
    StreamHandler,
};

use crate::config::Settings;

/// WebSocket feed path; the tenant goes in the `tenant_name` query parameter.
pub const TAG_FEED_PATH: &str = "/constella_db/tag/ws";

/// REST path returning every tag for a tenant.
pub const GET_ALL_TAGS_PATH: &str = "/constella_db/tag/get_all_tags_for_user";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_CAPACITY: usize = 64;

/// A tag as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub uniqueid: String,
    pub name: String,
    pub color: String,
}

/// Tag payload of a feed event. Name and color are absent on deletes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TagData {
    pub uniqueid: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub color: Option<String>,
}

impl TagData {
    pub fn to_tag(&self) -> Option<Tag> {
        Some(Tag {
            uniqueid: self.uniqueid.clone(),
            name: self.name.clone()?,
            color: self.color.clone()?,
        })
    }
}

/// Accept any JSON value; keep it only when it is a string.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_str().map(str::to_string)))
}

/// One message on the tag feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TagUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub data: Option<TagData>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tenant_name: Option<String>,
}

/// Discrete directory change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagEvent {
    Created(Tag),
    Updated(Tag),
    /// Carries the removed tag's id.
    Deleted(String),
}

/// Snapshot published to observers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagView {
    pub connected: bool,
    pub loading: bool,
    pub tags: Vec<Tag>,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetAllTagsRequest<'a> {
    tenant_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct GetAllTagsResponse {
    results: Vec<Tag>,
}

/// Tag directory state mutated inside the controller's dispatch step.
pub struct TagHandler {
    tags: Vec<Tag>,
    connected: bool,
    loading: bool,
    last_error: Option<String>,
    last_update: Option<TagUpdate>,
    events: broadcast::Sender<TagEvent>,
    view: watch::Sender<TagView>,
}

impl TagHandler {
    fn new(events: broadcast::Sender<TagEvent>, view: watch::Sender<TagView>) -> Self {
        Self {
            tags: Vec::new(),
            connected: false,
            loading: false,
            last_error: None,
            last_update: None,
            events,
            view,
        }
    }

    fn publish(&self) {
        self.view.send_replace(TagView {
            connected: self.connected,
            loading: self.loading,
            tags: self.tags.clone(),
            last_error: self.last_error.clone(),
        });
    }

    fn emit(&self, event: TagEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn upsert(&mut self, tag: Tag) {
        match self.tags.iter_mut().find(|t| t.uniqueid == tag.uniqueid) {
            Some(existing) => {
                debug!("tags: updated {}", tag.name);
                *existing = tag;
            }
            None => {
                debug!("tags: added {}", tag.name);
                self.tags.push(tag);
            }
        }
    }

    fn remove(&mut self, uniqueid: &str) {
        if let Some(index) = self.tags.iter().position(|t| t.uniqueid == uniqueid) {
            let removed = self.tags.remove(index);
            debug!("tags: removed {}", removed.name);
        }
    }

    fn apply_tag_update(&mut self, action: &str, data: Option<TagData>) {
        let Some(data) = data else {
            debug!("tags: {} without data", action);
            return;
        };
        match action {
            "created" | "updated" => {
                let Some(tag) = data.to_tag() else {
                    debug!("tags: {} for {} missing name or color", action, data.uniqueid);
                    return;
                };
                self.upsert(tag.clone());
                self.emit(if action == "created" {
                    TagEvent::Created(tag)
                } else {
                    TagEvent::Updated(tag)
                });
            }
            "deleted" => {
                self.remove(&data.uniqueid);
                self.emit(TagEvent::Deleted(data.uniqueid));
            }
            other => debug!("tags: ignoring action {}", other),
        }
    }

    fn begin_fetch(&mut self) {
        self.loading = true;
        self.last_error = None;
        self.publish();
    }

    fn finish_fetch(&mut self, outcome: std::result::Result<Vec<Tag>, String>) {
        self.loading = false;
        match outcome {
            Ok(tags) => {
                info!("tags: loaded {} tags", tags.len());
                self.tags = tags;
            }
            Err(message) => self.last_error = Some(message),
        }
        self.publish();
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn last_update(&self) -> Option<&TagUpdate> {
        self.last_update.as_ref()
    }
}

impl StreamHandler for TagHandler {
    type Request = serde_json::Value;
    type Response = TagUpdate;

    fn on_response(&mut self, update: TagUpdate) {
        self.last_update = Some(update.clone());
        match update.kind.as_str() {
            "connection" => info!(
                "tags: feed connected ({})",
                update.status.as_deref().unwrap_or("")
            ),
            "tag_update" => match update.action.as_deref() {
                Some(action) => self.apply_tag_update(action, update.data),
                None => debug!("tags: tag_update without action"),
            },
            "ping" => {}
            other => debug!("tags: unknown update type {}", other),
        }
        self.publish();
    }

    fn on_state_change(&mut self, state: ConnectionState) {
        self.connected = state.is_connected();
        self.publish();
    }
}

/// Live tag directory for one tenant.
pub struct TagFeed<C: Connector> {
    controller: ConnectionController<C, TagHandler>,
    http: reqwest::Client,
    fetch_url: String,
    tenant_name: String,
    events: broadcast::Sender<TagEvent>,
    view: watch::Receiver<TagView>,
}

impl<C: Connector> TagFeed<C> {
    /// Build a feed for `tenant_name` against `[server].tags_base_url`.
    ///
    /// Fails with [`Error::Config`] when the tenant is empty.
    pub fn new(
        connector: C,
        settings: &Settings,
        tenant_name: &str,
        background: Arc<dyn BackgroundExecution>,
    ) -> Result<Self> {
        let tenant_name = tenant_name.trim();
        if tenant_name.is_empty() {
            return Err(Error::config("Tenant name not set"));
        }

        let base_url = &settings.server.tags_base_url;
        let url = websocket_url(base_url, TAG_FEED_PATH, &[("tenant_name", tenant_name)])?;
        let config = settings
            .connection
            .stream_config("tags", url, settings.tags.heartbeat)?;

        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {e}")))?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (view_tx, view) = watch::channel(TagView::default());

        Ok(Self {
            controller: ConnectionController::with_background(
                connector,
                config,
                TagHandler::new(events.clone(), view_tx),
                background,
            ),
            http,
            fetch_url: http_url(base_url, GET_ALL_TAGS_PATH),
            tenant_name: tenant_name.to_string(),
            events,
            view,
        })
    }

    /// Build with the tenant from `[tags]`.
    pub fn from_settings(
        connector: C,
        settings: &Settings,
        background: Arc<dyn BackgroundExecution>,
    ) -> Result<Self> {
        Self::new(connector, settings, &settings.tags.tenant_name, background)
    }

    pub fn tenant_name(&self) -> &str {
        &self.tenant_name
    }

    /// Load the directory over HTTP, then open the live feed.
    pub async fn initialize(&self) -> Result<()> {
        self.fetch_all_tags().await?;
        self.connect().await
    }

    pub async fn connect(&self) -> Result<()> {
        self.controller.connect().await
    }

    /// Replace the directory with the server's full tag list.
    pub async fn fetch_all_tags(&self) -> Result<usize> {
        self.controller.with_handler(TagHandler::begin_fetch);

        let outcome = self.request_all_tags().await;
        let report = match &outcome {
            Ok(tags) => Ok(tags.clone()),
            Err(err) => Err(err.to_string()),
        };
        self.controller
            .with_handler(|handler| handler.finish_fetch(report));

        outcome.map(|tags| tags.len())
    }

    /// [`fetch_all_tags`](Self::fetch_all_tags), logging instead of failing.
    pub async fn refresh_tags(&self) {
        if let Err(err) = self.fetch_all_tags().await {
            warn!("tags: refresh failed: {}", err);
        }
    }

    async fn request_all_tags(&self) -> Result<Vec<Tag>> {
        debug!("tags: fetching all tags from {}", self.fetch_url);
        let response = self
            .http
            .post(&self.fetch_url)
            .json(&GetAllTagsRequest {
                tenant_name: &self.tenant_name,
            })
            .send()
            .await
            .map_err(|e| Error::http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::http(format!("HTTP {}", status.as_u16())));
        }

        let body: GetAllTagsResponse = response
            .json()
            .await
            .map_err(|e| Error::decode(format!("tag list: {e}")))?;
        Ok(body.results)
    }

    pub fn tags(&self) -> Vec<Tag> {
        self.controller.with_handler(|h| h.tags.clone())
    }

    pub fn tag(&self, uniqueid: &str) -> Option<Tag> {
        self.controller
            .with_handler(|h| h.tags.iter().find(|t| t.uniqueid == uniqueid).cloned())
    }

    /// Tags whose name contains `text`, ignoring case. Empty text matches all.
    pub fn search(&self, text: &str) -> Vec<Tag> {
        let needle = text.to_lowercase();
        self.controller.with_handler(|h| {
            h.tags
                .iter()
                .filter(|t| needle.is_empty() || t.name.to_lowercase().contains(&needle))
                .cloned()
                .collect()
        })
    }

    pub fn last_update(&self) -> Option<TagUpdate> {
        self.controller.with_handler(|h| h.last_update.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TagEvent> {
        self.events.subscribe()
    }

    pub fn view(&self) -> watch::Receiver<TagView> {
        self.view.clone()
    }

    pub fn heartbeat(&self) -> &HeartbeatStyle {
        &self.controller.config().heartbeat
    }

    pub fn connection_report(&self) -> ConnectionReport {
        self.controller.connection_report()
    }

    pub async fn graceful_disconnect(&self) {
        self.controller.graceful_disconnect().await;
    }

    pub fn controller(&self) -> &ConnectionController<C, TagHandler> {
        &self.controller
    }
}

impl<C: Connector> LifecycleHook for TagFeed<C> {
    async fn on_enter_background(&self) {
        self.controller.on_enter_background().await;
    }

    async fn on_enter_foreground(&self) {
        self.controller.on_enter_foreground().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horizon_stream::test_utils::MockConnector;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn feed(connector: &MockConnector, settings: &Settings) -> TagFeed<MockConnector> {
        TagFeed::new(
            connector.clone(),
            settings,
            "acme",
            horizon_stream::noop_background(),
        )
        .unwrap()
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    /// Serve one HTTP response and hand back the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let origin = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some((head, body)) = text.split_once("\r\n\r\n") {
                    let length = head
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if body.len() >= length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (origin, handle)
    }

    #[test]
    fn test_empty_tenant_is_config_error() {
        let result = TagFeed::new(
            MockConnector::new(),
            &Settings::default(),
            "  ",
            horizon_stream::noop_background(),
        );
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_feed_url_carries_encoded_tenant() {
        let feed = TagFeed::new(
            MockConnector::new(),
            &Settings::default(),
            "team a&b",
            horizon_stream::noop_background(),
        )
        .unwrap();
        assert_eq!(
            feed.controller().config().url,
            "wss://test-server-7w76.onrender.com/constella_db/tag/ws?tenant_name=team%20a%26b"
        );
        assert_eq!(feed.heartbeat(), &HeartbeatStyle::text_ping());
    }

    #[test]
    fn test_tag_data_tolerates_bad_fields() {
        let data: TagData =
            serde_json::from_str(r##"{"uniqueid":"t1","name":42,"color":"#fff"}"##).unwrap();
        assert_eq!(data.name, None);
        assert!(data.to_tag().is_none());

        let update: TagUpdate =
            serde_json::from_str(r#"{"type":"connection","status":"ok","tenant_name":"acme"}"#)
                .unwrap();
        assert_eq!(update.kind, "connection");
        assert!(update.data.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_applies_create_update_delete() {
        let connector = MockConnector::new();
        let feed = feed(&connector, &Settings::default());
        let mut events = feed.subscribe();
        feed.connect().await.unwrap();
        let remote = connector.remote(0);

        remote.push_text(r#"{"type":"connection","status":"connected"}"#);
        remote.push_text(
            r##"{"type":"tag_update","action":"created","data":{"uniqueid":"t1","name":"Work","color":"#EA9280"}}"##,
        );
        remote.push_text(
            r##"{"type":"tag_update","action":"created","data":{"uniqueid":"t2","name":"Home","color":"#65BA75"}}"##,
        );
        remote.push_text(
            r##"{"type":"tag_update","action":"updated","data":{"uniqueid":"t1","name":"Deep Work","color":"#EA9280"}}"##,
        );
        remote.push_text(r#"{"type":"tag_update","action":"deleted","data":{"uniqueid":"t2"}}"#);
        remote.push_text("pong");
        settle().await;

        assert_eq!(feed.tags().len(), 1);
        assert_eq!(feed.tag("t1").unwrap().name, "Deep Work");
        assert!(feed.tag("t2").is_none());

        assert!(matches!(events.try_recv().unwrap(), TagEvent::Created(t) if t.uniqueid == "t1"));
        assert!(matches!(events.try_recv().unwrap(), TagEvent::Created(t) if t.uniqueid == "t2"));
        assert!(matches!(events.try_recv().unwrap(), TagEvent::Updated(t) if t.name == "Deep Work"));
        assert_eq!(events.try_recv().unwrap(), TagEvent::Deleted("t2".to_string()));

        let view = feed.view().borrow().clone();
        assert!(view.connected);
        assert_eq!(view.tags.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_heartbeat_sends_ping_sentinel() {
        let connector = MockConnector::new();
        let feed = feed(&connector, &Settings::default());
        feed.connect().await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;

        assert_eq!(connector.remote(0).sent_texts(), vec!["ping".to_string()]);
        assert_eq!(connector.remote(0).ping_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_is_case_insensitive() {
        let connector = MockConnector::new();
        let feed = feed(&connector, &Settings::default());
        feed.controller().with_handler(|h| {
            h.finish_fetch(Ok(vec![
                Tag {
                    uniqueid: "a".into(),
                    name: "Research".into(),
                    color: "#000".into(),
                },
                Tag {
                    uniqueid: "b".into(),
                    name: "Personal".into(),
                    color: "#fff".into(),
                },
            ]))
        });

        assert_eq!(feed.search("SEARCH").len(), 1);
        assert_eq!(feed.search("").len(), 2);
        assert!(feed.search("zzz").is_empty());
    }

    #[tokio::test]
    async fn test_fetch_all_tags_replaces_directory() {
        let (origin, server) = serve_once(
            "200 OK",
            r##"{"results":[{"uniqueid":"t1","name":"Work","color":"#EA9280"}]}"##,
        )
        .await;
        let mut settings = Settings::default();
        settings.server.tags_base_url = origin;

        let feed = feed(&MockConnector::new(), &settings);
        let count = feed.fetch_all_tags().await.unwrap();

        assert_eq!(count, 1);
        assert_eq!(feed.tags()[0].name, "Work");
        assert!(!feed.view().borrow().loading);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /constella_db/tag/get_all_tags_for_user"));
        assert!(request.contains(r#"{"tenant_name":"acme"}"#));
    }

    #[tokio::test]
    async fn test_fetch_http_error_is_reported() {
        let (origin, server) = serve_once("500 Internal Server Error", "{}").await;
        let mut settings = Settings::default();
        settings.server.tags_base_url = origin;

        let feed = feed(&MockConnector::new(), &settings);
        let err = feed.fetch_all_tags().await.unwrap_err();
        assert!(matches!(err, Error::Http { .. }));
        assert!(err.to_string().contains("500"));
        assert!(feed.view().borrow().last_error.is_some());
        let _ = server.await;
    }
}
