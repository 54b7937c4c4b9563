//! Integration tests for the composition root: settings on disk, feature
//! wiring and lifecycle forwarding.

use std::time::Duration;

use tempfile::tempdir;
use tokio_test::assert_ok;

use constella_horizon::config::{init_config_dir, load_settings, save_settings};
use constella_horizon::tags::TagEvent;
use constella_horizon::{ConnectionState, HorizonServices, LifecycleHook, SearchMethod};
use horizon_stream::test_utils::{MockConnector, RecordingBackground};

async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

fn services_from_disk(
    connector: &MockConnector,
    background: std::sync::Arc<RecordingBackground>,
) -> HorizonServices<MockConnector> {
    let temp = tempdir().unwrap();
    init_config_dir(temp.path()).unwrap();

    let mut settings = load_settings(temp.path());
    settings.server.base_url = "http://localhost:8000".to_string();
    settings.server.tags_base_url = "http://localhost:9000".to_string();
    settings.tags.tenant_name = "acme".to_string();
    settings.search.tenant_name = "acme".to_string();
    settings.search.method = SearchMethod::TopicExtraction;
    save_settings(temp.path(), &settings).unwrap();

    HorizonServices::from_settings(connector.clone(), &load_settings(temp.path()), background)
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_features_use_configured_endpoints() {
    let connector = MockConnector::new();
    let services = services_from_disk(&connector, RecordingBackground::new());

    assert_ok!(services.chat().connect().await);
    assert_ok!(services.tags().unwrap().connect().await);
    assert_ok!(services.search().unwrap().connect().await);

    assert_eq!(
        connector.remote(0).url(),
        "ws://localhost:8000/horizon/assist/chat-ws"
    );
    assert_eq!(
        connector.remote(1).url(),
        "ws://localhost:9000/constella_db/tag/ws?tenant_name=acme"
    );
    assert_eq!(
        connector.remote(2).url(),
        "ws://localhost:8000/horizon/context/context-search-ws-topic-extraction"
    );
}

#[tokio::test(start_paused = true)]
async fn test_tag_events_reach_subscribers() {
    let connector = MockConnector::new();
    let services = services_from_disk(&connector, RecordingBackground::new());
    let tags = services.tags().unwrap();
    let mut events = tags.subscribe();

    assert_ok!(tags.connect().await);
    connector.remote(0).push_text(
        r##"{"type":"tag_update","action":"created","data":{"uniqueid":"t1","name":"Work","color":"#fff"}}"##,
    );
    settle().await;

    match events.try_recv().unwrap() {
        TagEvent::Created(tag) => assert_eq!(tag.name, "Work"),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(tags.search("work").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_round_trip_keeps_connections() {
    let connector = MockConnector::new();
    let background = RecordingBackground::new();
    let services = services_from_disk(&connector, background.clone());

    assert_ok!(services.chat().connect().await);
    assert_ok!(services.search().unwrap().connect().await);

    services.on_enter_background().await;
    assert_eq!(background.active(), 3);

    connector.remote(0).drop_connection();
    tokio::time::sleep(Duration::from_millis(1001)).await;
    settle().await;
    assert!(services.chat().snapshot().connected);

    services.on_enter_foreground().await;
    assert_eq!(background.active(), 0);
    assert_eq!(background.begun(), 3);

    services.shutdown().await;
    for report in services.connection_reports() {
        assert_eq!(report.state, ConnectionState::Disconnected);
    }
}
