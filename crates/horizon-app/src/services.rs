//! Composition root.
//!
//! Owns one manager per backend feature and fans platform lifecycle
//! notifications out to each of them. Tag updates and context search need a
//! tenant; when none is configured they are left out and logged.

use std::sync::Arc;

use horizon_core::prelude::*;
use horizon_core::ConnectionReport;
use horizon_stream::{BackgroundExecution, Connector, LifecycleHook, WsConnector};

use crate::chat::ChatSession;
use crate::config::Settings;
use crate::context_search::ContextSearch;
use crate::tags::TagFeed;

pub struct HorizonServices<C: Connector + Clone> {
    chat: ChatSession<C>,
    tags: Option<TagFeed<C>>,
    search: Option<ContextSearch<C>>,
}

impl<C: Connector + Clone> HorizonServices<C> {
    /// Build every manager from `settings`, sharing `connector` and
    /// `background`.
    pub fn from_settings(
        connector: C,
        settings: &Settings,
        background: Arc<dyn BackgroundExecution>,
    ) -> Result<Self> {
        let chat = ChatSession::from_settings(connector.clone(), settings, background.clone())?;

        let tags = match TagFeed::from_settings(connector.clone(), settings, background.clone()) {
            Ok(feed) => Some(feed),
            Err(Error::Config { message }) => {
                info!("Tag updates disabled: {}", message);
                None
            }
            Err(e) => return Err(e),
        };

        let search = match ContextSearch::from_settings(connector, settings, background) {
            Ok(search) => Some(search),
            Err(Error::Config { message }) => {
                info!("Context search disabled: {}", message);
                None
            }
            Err(e) => return Err(e),
        };

        Ok(Self { chat, tags, search })
    }

    pub fn chat(&self) -> &ChatSession<C> {
        &self.chat
    }

    pub fn tags(&self) -> Option<&TagFeed<C>> {
        self.tags.as_ref()
    }

    pub fn search(&self) -> Option<&ContextSearch<C>> {
        self.search.as_ref()
    }

    /// Open every live manager. Tag updates load the directory first.
    ///
    /// Individual failures are logged; the monitor of each manager keeps
    /// retrying once it has connected at least once.
    pub async fn start(&self) {
        if let Err(e) = self.chat.connect().await {
            warn!("chat: initial connect failed: {}", e);
        }
        if let Some(tags) = &self.tags {
            if let Err(e) = tags.initialize().await {
                warn!("tags: initialization failed: {}", e);
            }
        }
        if let Some(search) = &self.search {
            if let Err(e) = search.connect().await {
                warn!("search: initial connect failed: {}", e);
            }
        }
    }

    /// Gracefully disconnect every manager.
    pub async fn shutdown(&self) {
        info!("Shutting down Horizon services");
        let tags = async {
            if let Some(tags) = &self.tags {
                tags.graceful_disconnect().await;
            }
        };
        let search = async {
            if let Some(search) = &self.search {
                search.graceful_disconnect().await;
            }
        };
        tokio::join!(self.chat.graceful_disconnect(), tags, search);
    }

    pub fn connection_reports(&self) -> Vec<ConnectionReport> {
        let mut reports = vec![self.chat.connection_report()];
        reports.extend(self.tags.iter().map(|t| t.connection_report()));
        reports.extend(self.search.iter().map(|s| s.connection_report()));
        reports
    }
}

impl HorizonServices<WsConnector> {
    /// Build every manager over real WebSockets, using the connector timing
    /// from `settings.connection`.
    pub fn with_websocket(
        settings: &Settings,
        background: Arc<dyn BackgroundExecution>,
    ) -> Result<Self> {
        let connector = settings.connection.connector()?;
        debug!("WebSocket pong timeout: {:?}", connector.pong_timeout());
        Self::from_settings(connector, settings, background)
    }
}

impl<C: Connector + Clone> LifecycleHook for HorizonServices<C> {
    async fn on_enter_background(&self) {
        debug!("Forwarding background notification");
        self.chat.on_enter_background().await;
        if let Some(tags) = &self.tags {
            tags.on_enter_background().await;
        }
        if let Some(search) = &self.search {
            search.on_enter_background().await;
        }
    }

    async fn on_enter_foreground(&self) {
        debug!("Forwarding foreground notification");
        self.chat.on_enter_foreground().await;
        if let Some(tags) = &self.tags {
            tags.on_enter_foreground().await;
        }
        if let Some(search) = &self.search {
            search.on_enter_foreground().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horizon_core::ConnectionState;
    use horizon_stream::test_utils::{MockConnector, RecordingBackground};

    fn tenant_settings() -> Settings {
        let mut settings = Settings::default();
        settings.tags.tenant_name = "acme".to_string();
        settings.search.tenant_name = "acme".to_string();
        settings
    }

    #[test]
    fn test_tenantless_features_are_skipped() {
        let services = HorizonServices::from_settings(
            MockConnector::new(),
            &Settings::default(),
            horizon_stream::noop_background(),
        )
        .unwrap();

        assert!(services.tags().is_none());
        assert!(services.search().is_none());
        assert_eq!(services.connection_reports().len(), 1);
    }

    #[test]
    fn test_zero_timing_is_rejected_up_front() {
        let mut settings = tenant_settings();
        settings.connection.monitor_interval_secs = 0;
        let err = HorizonServices::with_websocket(&settings, horizon_stream::noop_background())
            .err()
            .unwrap();
        assert!(matches!(err, Error::ConfigInvalid { .. }));

        let mut settings = tenant_settings();
        settings.connection.max_reconnect_attempts = 0;
        let err = HorizonServices::from_settings(
            MockConnector::new(),
            &settings,
            horizon_stream::noop_background(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
    }

    #[tokio::test]
    async fn test_websocket_services_build_from_settings() {
        let services =
            HorizonServices::with_websocket(&tenant_settings(), horizon_stream::noop_background())
                .unwrap();
        assert_eq!(services.connection_reports().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_is_forwarded_to_every_manager() {
        let connector = MockConnector::new();
        let background = RecordingBackground::new();
        let services =
            HorizonServices::from_settings(connector.clone(), &tenant_settings(), background.clone())
                .unwrap();

        services.chat().connect().await.unwrap();
        services.tags().unwrap().connect().await.unwrap();
        services.search().unwrap().connect().await.unwrap();
        assert_eq!(connector.open_count(), 3);

        services.on_enter_background().await;
        assert_eq!(background.active(), 3);

        services.on_enter_foreground().await;
        assert_eq!(background.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_everything() {
        let connector = MockConnector::new();
        let services = HorizonServices::from_settings(
            connector.clone(),
            &tenant_settings(),
            horizon_stream::noop_background(),
        )
        .unwrap();

        services.chat().connect().await.unwrap();
        services.search().unwrap().connect().await.unwrap();
        services.shutdown().await;

        for report in services.connection_reports() {
            assert_eq!(report.state, ConnectionState::Disconnected);
            assert!(!report.maintain_connection);
        }
        assert!(connector.remote(0).is_closed());
        assert!(connector.remote(1).is_closed());
    }
}
