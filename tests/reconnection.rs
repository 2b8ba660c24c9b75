//! Resynchronization after the transport reconnects, and the idle watchdog.

use futures_util::FutureExt;
use pubsync::{
    ClientConfig, ClientEvent, CollectionEvent, ManualClock, MemoryConnector, PublicationClient,
    SubscriptionEvent, SubscriptionPhase, DEFAULT_LAST_DATA_TIMEOUT, IDLE_TIMEOUT_REASON,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn connected_client_with(config: ClientConfig) -> (PublicationClient, MemoryConnector, Arc<ManualClock>) {
    init_tracing();
    let clock = Arc::new(ManualClock::new());
    let connector = MemoryConnector::new();
    let client =
        PublicationClient::with_clock("mem://provider", config, connector.clone(), clock.clone())
            .unwrap();
    connector.deliver(json!({"msg": "connected"})).unwrap();
    connector.sent();
    (client, connector, clock)
}

fn connected_client() -> (PublicationClient, MemoryConnector) {
    let (client, connector, _clock) = connected_client_with(ClientConfig::default());
    (client, connector)
}

fn count(sent: &[Value], kind: &str) -> usize {
    sent.iter().filter(|m| m["msg"] == kind).count()
}

fn add_doc(connector: &MemoryConnector, collection: &str, id: &str) {
    connector
        .deliver(json!({"msg": "added", "collection": collection, "id": id, "fields": {}}))
        .unwrap();
}

// --- Transport Lifecycle ---

#[test]
fn test_reconnect_clears_collections_and_resubscribes_once() {
    let (client, connector) = connected_client();
    let a = client.subscribe("a", vec![]).unwrap();
    let b = client.subscribe("b", vec![json!(1)]).unwrap();
    add_doc(&connector, "orgs", "1");
    add_doc(&connector, "users", "2");
    connector.deliver(json!({"msg": "ready", "subs": [a.id(), b.id()]})).unwrap();
    connector.sent();

    let orgs_events = client.get_collection("orgs").listen();

    connector.reconnecting().unwrap();
    connector.reconnected().unwrap();

    assert!(client.get_collection("orgs").is_empty());
    assert!(client.get_collection("users").is_empty());
    assert_eq!(orgs_events.drain(), vec![CollectionEvent::Cleared]);

    // The sub messages wait for the provider to acknowledge the handshake.
    let before_connected = connector.sent();
    assert_eq!(before_connected, vec![json!({"msg": "connect", "version": "1"})]);
    assert_eq!(a.phase(), SubscriptionPhase::Starting);

    connector.deliver(json!({"msg": "connected"})).unwrap();
    let sent = connector.sent();
    assert_eq!(count(&sent, "sub"), 2);
    assert!(sent.contains(&json!({"msg": "sub", "id": a.id(), "name": "a", "params": []})));
    assert!(sent.contains(&json!({"msg": "sub", "id": b.id(), "name": "b", "params": [1]})));
}

#[test]
fn test_reconnect_while_flagged_connected_resends_immediately() {
    let (client, connector) = connected_client();
    let sub = client.subscribe("orgs", vec![]).unwrap();
    connector.sent();

    connector.reconnected().unwrap();
    let sent = connector.sent();
    assert_eq!(count(&sent, "connect"), 1);
    assert_eq!(count(&sent, "sub"), 1);

    // The later acknowledgement does not send it a second time.
    connector.deliver(json!({"msg": "connected"})).unwrap();
    assert_eq!(count(&connector.sent(), "sub"), 0);
    assert_eq!(sub.phase(), SubscriptionPhase::Starting);
}

#[test]
fn test_disconnected_is_edge_triggered() {
    let (client, connector) = connected_client();
    let events = client.listen();

    connector.reconnecting().unwrap();
    connector.reconnecting().unwrap();

    assert!(!client.is_connected());
    assert_eq!(events.drain(), vec![ClientEvent::Disconnected]);
}

#[test]
fn test_pending_ready_survives_reconnect() {
    let (client, connector) = connected_client();
    let sub = client.subscribe("orgs", vec![]).unwrap();
    let sub_events = sub.listen();
    let pending = sub.ready();

    connector.reconnecting().unwrap();
    connector.reconnected().unwrap();
    connector.deliver(json!({"msg": "connected"})).unwrap();
    connector.deliver(json!({"msg": "ready", "subs": [sub.id()]})).unwrap();

    assert_eq!(pending.now_or_never(), Some(Ok(())));
    assert_eq!(
        sub_events.drain(),
        vec![SubscriptionEvent::Reconnected, SubscriptionEvent::Ready]
    );
}

#[test]
fn test_ready_subscription_restarts_after_reconnect() {
    let (client, connector) = connected_client();
    let sub = client.subscribe("orgs", vec![]).unwrap();
    connector.deliver(json!({"msg": "ready", "subs": [sub.id()]})).unwrap();
    assert!(sub.is_ready());

    connector.reconnecting().unwrap();
    connector.reconnected().unwrap();

    assert_eq!(sub.phase(), SubscriptionPhase::Starting);
    assert!(sub.ready().now_or_never().is_none());
}

#[test]
fn test_stopped_subscription_is_not_resumed() {
    let (client, connector) = connected_client();
    let sub = client.subscribe("orgs", vec![]).unwrap();
    sub.stop();
    connector.sent();

    connector.reconnected().unwrap();
    assert_eq!(count(&connector.sent(), "sub"), 0);
}

// --- Idle Watchdog ---

#[test]
fn test_reconnect_if_idle_noop_within_threshold() {
    let (client, connector, clock) =
        connected_client_with(ClientConfig::paranoid(Duration::from_secs(10)));
    let events = client.listen();

    clock.advance(Duration::from_secs(10));
    assert_eq!(client.reconnect_if_idle("focus"), Ok(false));

    assert_eq!(connector.connection_count(), 1);
    assert!(!connector.is_ended(0));
    assert!(connector.sent().is_empty());
    assert!(events.drain().is_empty());
}

#[test]
fn test_reconnect_if_idle_forces_new_transport() {
    let (client, connector, clock) =
        connected_client_with(ClientConfig::paranoid(Duration::from_secs(10)));
    let sub = client.subscribe("orgs", vec![]).unwrap();
    add_doc(&connector, "orgs", "1");
    connector.sent();
    let events = client.listen();

    clock.advance(Duration::from_secs(11));
    assert_eq!(client.reconnect_if_idle("focus"), Ok(true));

    assert_eq!(connector.connection_count(), 2);
    assert!(connector.is_ended(0));
    assert!(client.get_collection("orgs").is_empty());

    let sent = connector.sent();
    assert_eq!(count(&sent, "connect"), 1);
    assert_eq!(count(&sent, "sub"), 1);
    assert_eq!(sub.phase(), SubscriptionPhase::Starting);
    assert_eq!(
        events.drain(),
        vec![ClientEvent::ProactivelyReconnected {
            reason: "focus".to_string()
        }]
    );
}

#[test]
fn test_inbound_data_resets_idle_timer() {
    let (client, connector, clock) =
        connected_client_with(ClientConfig::paranoid(Duration::from_secs(10)));

    clock.advance(Duration::from_secs(8));
    connector.deliver(json!({"msg": "ping"})).unwrap();
    clock.advance(Duration::from_secs(8));

    assert_eq!(client.reconnect_if_idle("focus"), Ok(false));
}

#[test]
fn test_reconnecting_signal_resets_idle_timer() {
    let (client, connector, clock) =
        connected_client_with(ClientConfig::paranoid(Duration::from_secs(10)));

    clock.advance(Duration::from_secs(8));
    connector.reconnecting().unwrap();
    clock.advance(Duration::from_secs(8));

    assert_eq!(client.reconnect_if_idle("focus"), Ok(false));
}

#[test]
fn test_zero_threshold_uses_default() {
    let config: ClientConfig =
        serde_json::from_value(json!({"paranoid": true, "lastDataTimeout": 0})).unwrap();
    assert_eq!(config.idle_timeout(), Some(DEFAULT_LAST_DATA_TIMEOUT));

    let (client, connector, clock) = connected_client_with(config);
    clock.advance(Duration::from_secs(1));
    assert_eq!(client.reconnect_if_idle("focus"), Ok(false));
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(connector.connection_count(), 1);

    clock.advance(DEFAULT_LAST_DATA_TIMEOUT);
    assert_eq!(client.reconnect_if_idle("focus"), Ok(true));
    assert_eq!(connector.connection_count(), 2);
}

#[test]
fn test_watchdog_backstop_fires_on_its_own() {
    init_tracing();
    let connector = MemoryConnector::new();
    let client = PublicationClient::connect(
        "mem://provider",
        ClientConfig::paranoid(Duration::from_millis(20)),
        connector.clone(),
    )
    .unwrap();
    let events = client.listen();

    let event = events.recv_timeout(Duration::from_secs(30)).unwrap();
    assert_eq!(
        event,
        ClientEvent::ProactivelyReconnected {
            reason: IDLE_TIMEOUT_REASON.to_string()
        }
    );
    assert!(connector.connection_count() >= 2);

    client.stop();
}

#[test]
fn test_stop_cancels_watchdog() {
    init_tracing();
    let connector = MemoryConnector::new();
    let client = PublicationClient::connect(
        "mem://provider",
        ClientConfig::paranoid(Duration::from_millis(500)),
        connector.clone(),
    )
    .unwrap();
    let events = client.listen();

    client.stop();

    // The backstop would have fired after 1.5s.
    assert!(events.recv_timeout(Duration::from_secs(3)).is_err());
    assert_eq!(connector.connection_count(), 1);
}
