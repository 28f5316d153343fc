//! Integration tests for BrokerTransport.
//!
//! These tests verify:
//! - Publishes travel through the send pool to subscribed clients
//! - Incoming messages reach the upstream listener on receive-pool workers
//! - Connection loss is reported once and recovered by reconnecting
//! - Filters are restored after a reconnect
//! - Publishes taken while disconnected wait for the reconnect, or fail loudly


use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use broker::{BrokerClient, BrokerError, BrokerTransport, EmbeddedBroker, QoS};
use test_helpers::{fast_settings, wait_for, FlakyClient, RecordingListener};

/// Transport whose maintenance task stays out of the way of the test
fn start_transport(broker: &EmbeddedBroker) -> (BrokerTransport, Arc<RecordingListener>) {
    let listener = Arc::new(RecordingListener::default());
    let transport = BrokerTransport::start(
        "test",
        Arc::new(broker.clone()),
        fast_settings().with_reconnect_interval(Duration::from_secs(60)),
        listener.clone(),
    )
    .unwrap();
    (transport, listener)
}

#[test]
fn test_publish_reaches_subscribed_client() {
    let broker = EmbeddedBroker::new();
    let (transport, _listener) = start_transport(&broker);
    assert!(transport.is_listening());

    let client = broker.connect_client("viewer").unwrap();
    client.subscribe("v1.0/Things(5)/Datastreams").unwrap();

    assert!(transport.publish(
        "v1.0/Things(5)/Datastreams",
        br#"{"@iot.id":1}"#.to_vec(),
        QoS::AtLeastOnce
    ));

    let message = client.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(message.topic, "v1.0/Things(5)/Datastreams");
    assert_eq!(message.payload_str(), r#"{"@iot.id":1}"#);
    transport.shutdown();
}

#[test]
fn test_incoming_messages_reach_upstream() {
    let broker = EmbeddedBroker::new();
    let (transport, listener) = start_transport(&broker);
    transport.subscribe("v1.0/#", QoS::AtLeastOnce).unwrap();

    let client = broker.connect_client("sensor").unwrap();
    client
        .publish("v1.0/Datastreams(1)/Observations", r#"{"result":1}"#)
        .unwrap();

    assert!(wait_for(Duration::from_secs(2), || listener.message_count() == 1));
    let (topic, payload) = listener.messages.lock()[0].clone();
    assert_eq!(topic, "v1.0/Datastreams(1)/Observations");
    assert_eq!(payload, r#"{"result":1}"#);

    transport.shutdown();
}

#[test]
fn test_client_interest_is_forwarded() {
    let broker = EmbeddedBroker::new();
    let (transport, listener) = start_transport(&broker);
    assert!(transport.reports_client_interest());

    let client = broker.connect_client("viewer").unwrap();
    client.subscribe("v1.0/Things").unwrap();
    let rejected = client.subscribe("forbidden/topic").unwrap_err();
    assert!(matches!(rejected, BrokerError::SubscriptionRejected { .. }));

    assert_eq!(
        *listener.client_subscribes.lock(),
        vec![("viewer".to_string(), "v1.0/Things".to_string())]
    );

    drop(client);
    assert_eq!(*listener.client_disconnects.lock(), vec!["viewer".to_string()]);
    transport.shutdown();
}

#[test]
fn test_connection_loss_is_reported_once() {
    let broker = EmbeddedBroker::new();
    let (transport, listener) = start_transport(&broker);

    broker.drop_connection("network down");
    broker.drop_connection("network still down");
    assert!(!transport.is_listening());
    assert_eq!(listener.connection_losses.load(Ordering::SeqCst), 1);

    transport.connect();
    assert!(transport.is_listening());
    transport.shutdown();
}

#[test]
fn test_maintenance_task_reconnects() {
    let broker = EmbeddedBroker::new();
    let flaky = FlakyClient::new(broker.clone(), 2);
    let listener = Arc::new(RecordingListener::default());

    let transport =
        BrokerTransport::start("flaky", flaky.clone(), fast_settings(), listener.clone()).unwrap();
    assert!(!transport.is_listening());

    assert!(wait_for(Duration::from_secs(3), || transport.is_listening()));
    assert!(flaky.attempts.load(Ordering::SeqCst) >= 3);
    assert_eq!(listener.connects.load(Ordering::SeqCst), 1);
    transport.shutdown();
}

#[test]
fn test_filters_are_restored_after_reconnect() {
    let broker = EmbeddedBroker::new();
    let (transport, _listener) = start_transport(&broker);
    transport.subscribe("v1.0/#", QoS::AtLeastOnce).unwrap();
    assert_eq!(broker.server_filters(), vec!["v1.0/#".to_string()]);

    // The broker forgets the session while the connection is down
    broker.drop_connection("restart");
    broker.unsubscribe("v1.0/#").unwrap();
    assert!(broker.server_filters().is_empty());

    transport.connect();
    assert!(wait_for(Duration::from_secs(2), || broker.server_filters()
        == vec!["v1.0/#".to_string()]));
    assert_eq!(transport.active_filters(), vec!["v1.0/#".to_string()]);

    transport.unsubscribe("v1.0/#").unwrap();
    assert!(broker.server_filters().is_empty());
    transport.shutdown();
}

#[test]
fn test_publish_waits_for_reconnect() {
    let broker = EmbeddedBroker::new();
    let listener = Arc::new(RecordingListener::default());
    let transport = BrokerTransport::start(
        "waiting",
        Arc::new(broker.clone()),
        fast_settings()
            .with_connect_timeout(Duration::from_secs(3))
            .with_reconnect_interval(Duration::from_secs(60)),
        listener,
    )
    .unwrap();

    let client = broker.connect_client("viewer").unwrap();
    client.subscribe("v1.0/Things").unwrap();

    broker.drop_connection("blip");
    assert!(transport.publish("v1.0/Things", b"{}".to_vec(), QoS::AtLeastOnce));
    std::thread::sleep(Duration::from_millis(50));
    assert!(client.try_recv().is_none());

    transport.connect();
    assert!(client.recv_timeout(Duration::from_secs(2)).is_some());
    transport.shutdown();
}

#[test]
fn test_first_retry_waits_a_full_interval() {
    let flaky = FlakyClient::new(EmbeddedBroker::new(), 1);
    let listener = Arc::new(RecordingListener::default());
    let transport = BrokerTransport::start(
        "patient",
        flaky.clone(),
        fast_settings().with_reconnect_interval(Duration::from_secs(60)),
        listener,
    )
    .unwrap();

    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(flaky.attempts.load(Ordering::SeqCst), 1);
    assert!(!transport.is_listening());

    transport.connect();
    assert_eq!(flaky.attempts.load(Ordering::SeqCst), 2);
    assert!(transport.is_listening());
    transport.shutdown();
}

#[test]
fn test_publish_while_disconnected_is_counted_as_failed() {
    let failing = FlakyClient::new(EmbeddedBroker::new(), usize::MAX);
    let listener = Arc::new(RecordingListener::default());
    let offline = BrokerTransport::start("offline", failing, fast_settings(), listener).unwrap();
    assert!(!offline.is_listening());

    assert!(offline.publish("v1.0/Things", b"{}".to_vec(), QoS::AtLeastOnce));
    assert!(wait_for(Duration::from_secs(3), || {
        offline.pool_statuses()[0].failed == 1
    }));
    assert_eq!(offline.pool_statuses()[0].processed, 1);

    offline.shutdown();
}

#[test]
fn test_shutdown_disconnects_and_stops_accepting() {
    let broker = EmbeddedBroker::new();
    let (transport, _listener) = start_transport(&broker);

    transport.shutdown();
    assert!(!broker.is_connected());
    assert!(!transport.is_listening());
    assert!(!transport.publish("v1.0/Things", b"{}".to_vec(), QoS::AtLeastOnce));

    // Idempotent
    transport.shutdown();
}
