//! Snapshot capture, on-disk round trips and restore.

use tempfile::TempDir;
use tidemq::{
    BackgroundSaver, Broker, BrokerConfig, BrokerError, ChannelFlags, ClientId, Delivery,
    QueueFlags, QueueSettings, RouteFlags, SaveSchedule, SharedBuffer, SnapshotFile, Timestamp,
};

type Recorded = Vec<(ClientId, Delivery)>;

fn durable() -> QueueSettings {
    QueueSettings::new(100, 1024).with_flags(QueueFlags {
        durable: true,
        ..Default::default()
    })
}

fn durable_route() -> RouteFlags {
    RouteFlags {
        durable: true,
        ..Default::default()
    }
}

fn populated() -> Broker<Recorded> {
    let mut b = Broker::with_time(BrokerConfig::default(), Vec::new(), Timestamp(1_000)).unwrap();

    let orders = b.create_queue("orders", durable()).unwrap();
    let scratch = b.create_queue("scratch", QueueSettings::new(10, 1024)).unwrap();
    let events = b.create_route("events", durable_route()).unwrap();
    b.create_route("temp", RouteFlags::default()).unwrap();
    b.create_channel("news", ChannelFlags::default()).unwrap();

    b.bind(events, orders, "eu").unwrap();
    b.bind(events, scratch, "eu").unwrap();
    b.bind(events, scratch, "us").unwrap();

    b.push(orders, SharedBuffer::from("first"), 0).unwrap();
    b.push(orders, SharedBuffer::from("second"), 60_000).unwrap();
    b.push(orders, SharedBuffer::from("third"), 0).unwrap();
    b.push(scratch, SharedBuffer::from("gone"), 0).unwrap();
    b
}

#[test]
fn test_snapshot_selects_durable_state() {
    let b = populated();
    let snapshot = b.snapshot();

    assert_eq!(snapshot.taken_at, Timestamp(1_000));
    assert_eq!(snapshot.queues.len(), 1);
    let payloads: Vec<Vec<u8>> = snapshot.queues[0]
        .messages
        .iter()
        .map(|m| m.payload.clone())
        .collect();
    assert_eq!(payloads, vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]);
    assert_eq!(snapshot.queues[0].messages[1].expires_at, Some(Timestamp(61_000)));

    assert_eq!(snapshot.routes.len(), 1);
    let bindings = &snapshot.routes[0].bindings;
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].key, "eu");
    assert_eq!(bindings[0].queues, vec!["orders".to_string()]);

    assert_eq!(snapshot.channels.len(), 1);
}

#[test]
fn test_unconfirmed_messages_not_captured() {
    let mut b = populated();
    let orders = b.queue_id("orders").unwrap();
    b.pop(orders, 5_000).unwrap();

    let snapshot = b.snapshot();
    assert_eq!(snapshot.queues[0].messages.len(), 2);
}

#[test]
fn test_save_load_restore() {
    let dir = TempDir::new().unwrap();
    let file = SnapshotFile::new(dir.path().join("broker.snapshot"));
    file.save(&populated().snapshot()).unwrap();

    let loaded = file.load().unwrap().unwrap();
    let mut restored = Broker::restore(BrokerConfig::default(), Recorded::new(), loaded).unwrap();

    let orders = restored.queue_id("orders").unwrap();
    assert!(!restored.queue_exists("scratch"));
    assert!(restored.route_exists("events"));
    assert!(!restored.route_exists("temp"));
    assert!(restored.channel_exists("news"));

    let events = restored.route_id("events").unwrap();
    assert!(restored.route(events).unwrap().is_bound(orders, "eu"));

    let mut bodies = Vec::new();
    while let Some(message) = restored.pop(orders, 0).unwrap() {
        bodies.push(message.payload().to_vec());
    }
    assert_eq!(bodies, vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]);
}

#[test]
fn test_restored_ttl_is_absolute() {
    let mut snapshot = populated().snapshot();
    snapshot.taken_at = Timestamp(1_000);

    let mut restored =
        Broker::restore(BrokerConfig::default(), Recorded::new(), snapshot).unwrap();
    let orders = restored.queue_id("orders").unwrap();

    // The "second" message expired at 61_000, long before now.
    let stats = restored.tick(Timestamp::now());
    assert_eq!(stats.expired, 1);
    assert_eq!(restored.queue(orders).unwrap().len(), 2);
}

#[test]
fn test_config_snapshot_path() {
    let dir = TempDir::new().unwrap();
    let config = BrokerConfig {
        snapshot_path: dir.path().join("from-config"),
        ..Default::default()
    };
    let file = SnapshotFile::from_config(&config);
    assert!(file.load().unwrap().is_none());

    file.save(&populated().snapshot()).unwrap();
    assert!(config.snapshot_path.exists());
}

#[test]
fn test_one_background_save_at_a_time() {
    let dir = TempDir::new().unwrap();
    let saver = BackgroundSaver::new(SnapshotFile::new(dir.path().join("bg.snapshot")));
    let snapshot = populated().snapshot();

    saver.start(snapshot.clone()).unwrap();
    match saver.start(snapshot.clone()) {
        // The first save may already be done on a fast machine.
        Ok(()) | Err(BrokerError::SnapshotInProgress) => {}
        Err(e) => panic!("unexpected error: {e}"),
    }
    saver.wait().unwrap();

    assert_eq!(saver.file().load().unwrap(), Some(snapshot));
}

#[test]
fn test_periodic_save_from_config() {
    let dir = TempDir::new().unwrap();
    let config = BrokerConfig {
        snapshot_path: dir.path().join("periodic"),
        save_interval_secs: 30,
        ..Default::default()
    };
    let mut b = populated();
    let saver = BackgroundSaver::new(SnapshotFile::from_config(&config));
    let mut schedule = SaveSchedule::from_config(&config, Timestamp(1_000));

    b.tick(Timestamp(20_000));
    assert!(!saver.save_if_due(&mut schedule, b.now(), || b.snapshot()).unwrap());

    b.tick(Timestamp(31_001));
    assert!(saver.save_if_due(&mut schedule, b.now(), || b.snapshot()).unwrap());
    saver.wait().unwrap();

    let saved = saver.file().load().unwrap().unwrap();
    assert_eq!(saved.taken_at, Timestamp(31_001));
    assert_eq!(saved.message_count(), 3);
}
