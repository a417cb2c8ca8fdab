// End-to-end: producer -> queue -> physics task -> engine -> bridge ->
// FTMS encoder -> loopback clients.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;

use rowmon::ble::connection::ConnectionManager;
use rowmon::ble::ftms::ROWER_DATA_LEN;
use rowmon::ble::loopback::{LoopbackAdvertiser, LoopbackConnection};
use rowmon::bridge::RowerBridge;
use rowmon::config::{RowingSettings, UUID_ROWER_DATA};
use rowmon::events::{ActivityEvent, Phase, StrokeEvent};
use rowmon::impulse::{impulse_queue, ImpulseProducer};
use rowmon::physics::RowingEngine;
use rowmon::tasks::physics::physics_task;
use rowmon::tasks::replay::{self, replay_task, Replay, ReplayStats};

fn clock() -> u32 {
    90_000
}

struct Monitor {
    engine: Arc<RowingEngine>,
    producer: Arc<ImpulseProducer>,
    connections: Arc<ConnectionManager<LoopbackConnection>>,
    bridge: RowerBridge<LoopbackConnection>,
    activity: mpsc::Receiver<ActivityEvent>,
}

fn monitor(queue_capacity: usize) -> Monitor {
    let engine = Arc::new(RowingEngine::with_clock(RowingSettings::default(), clock));
    let (producer, consumer) = impulse_queue(queue_capacity);
    let producer = Arc::new(producer);

    let physics_engine = Arc::clone(&engine);
    thread::spawn(move || physics_task(physics_engine, consumer));

    let connections = Arc::new(
        ConnectionManager::new(Arc::new(LoopbackAdvertiser::default()), Duration::from_millis(10))
            .unwrap(),
    );
    let (activity_tx, activity) = mpsc::channel();
    let bridge = RowerBridge::new(
        Arc::clone(&engine),
        Arc::clone(&connections),
        Arc::clone(&producer),
        Duration::from_millis(500),
    )
    .with_clock(clock)
    .with_activity_listener(activity_tx);

    Monitor { engine, producer, connections, bridge, activity }
}

/// Wait until the physics task has consumed `seconds` of flywheel time.
/// Edges carry microsecond timestamps, so the engine's sum drifts from the
/// exact one by well under one interval.
fn wait_for_engine_time(engine: &RowingEngine, seconds: f64) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while (engine.snapshot().total_time - seconds).abs() > 1e-3 {
        assert!(Instant::now() < deadline, "physics task did not drain the queue");
        thread::sleep(Duration::from_millis(5));
    }
}

fn stroke_count(payload: &[u8]) -> u16 {
    u16::from_le_bytes([payload[3], payload[4]])
}

fn distance(payload: &[u8]) -> u32 {
    u32::from_le_bytes([payload[6], payload[7], payload[8], 0])
}

#[test]
fn rowing_session_reaches_subscribed_client() {
    let mut m = monitor(2_048);
    let subscribed = Arc::new(LoopbackConnection::new(1));
    let silent = Arc::new(LoopbackConnection::new(2));
    m.connections.on_connected(Arc::clone(&subscribed));
    m.connections.on_connected(Arc::clone(&silent));
    m.connections.set_subscribed(1, true);

    let t0 = Instant::now();
    m.bridge.tick(t0);
    assert!(!m.producer.is_paused());
    assert!(m.engine.snapshot().session_active);

    let deltas = replay::synthetic_session(6);
    let expected_time: f64 = deltas.iter().sum();
    let stats = replay_task(Arc::clone(&m.producer), Replay::new(deltas).time_scale(0.0));
    assert_eq!(stats, ReplayStats { queued: 792, dropped: 0, ignored: 0 });
    wait_for_engine_time(&m.engine, expected_time);

    let snapshot = m.engine.snapshot();
    assert_eq!(snapshot.stroke_count, 6);
    assert_eq!(snapshot.stroke_sample_count, 5);
    assert_eq!(snapshot.phase, Phase::Drive);
    assert!((snapshot.spm - 23.9).abs() < 0.5, "spm {}", snapshot.spm);
    assert!(snapshot.distance > 40.0 && snapshot.distance < 60.0, "distance {}", snapshot.distance);

    let report = m.bridge.tick(t0 + Duration::from_secs(1)).expect("update due");
    assert_eq!(report.delivered, 1);
    assert_eq!(report.unsubscribed, 1);

    let received = subscribed.received();
    let (uuid, payload) = received.last().unwrap();
    assert_eq!(*uuid, UUID_ROWER_DATA);
    assert_eq!(payload.len(), ROWER_DATA_LEN);
    assert_eq!(stroke_count(payload), 6);
    assert_eq!(distance(payload), snapshot.distance as u32);
    assert!(silent.received().is_empty());

    let events: Vec<_> = m.activity.try_iter().collect();
    assert_eq!(events.first(), Some(&ActivityEvent::ClientConnected));
    assert!(events.contains(&ActivityEvent::Rowing));
}

#[test]
fn last_disconnect_ends_session_and_pauses_sensor() {
    let mut m = monitor(2_048);
    m.connections.on_connected(Arc::new(LoopbackConnection::new(1)));
    m.connections.on_connected(Arc::new(LoopbackConnection::new(2)));
    m.bridge.tick(Instant::now());

    let deltas = replay::synthetic_session(3);
    let expected_time: f64 = deltas.iter().sum();
    replay_task(Arc::clone(&m.producer), Replay::new(deltas).time_scale(0.0));
    wait_for_engine_time(&m.engine, expected_time);

    m.connections.on_disconnected(1);
    m.bridge.tick(Instant::now());
    assert!(m.engine.snapshot().session_active);
    assert!(!m.producer.is_paused());

    m.connections.on_disconnected(2);
    m.bridge.tick(Instant::now());
    let snapshot = m.engine.snapshot();
    assert!(!snapshot.session_active);
    assert!(m.producer.is_paused());
    // Metrics stay readable after the session ends.
    assert_eq!(snapshot.stroke_count, 3);
    assert!(snapshot.distance > 0.0);

    // Edges while paused never reach the engine.
    let stats = replay_task(Arc::clone(&m.producer), Replay::new(vec![0.02; 10]).time_scale(0.0));
    assert_eq!(stats.queued, 0);

    let events: Vec<_> = m.activity.try_iter().collect();
    assert_eq!(events, vec![ActivityEvent::ClientConnected, ActivityEvent::ClientsGone]);
}

#[test]
fn stroke_events_follow_phase_changes() {
    let m = monitor(2_048);
    let (tx, rx) = mpsc::channel();
    m.engine.set_stroke_listener(tx);
    m.producer.resume();

    let deltas = replay::synthetic_session(2);
    let expected_time: f64 = deltas.iter().sum();
    replay_task(Arc::clone(&m.producer), Replay::new(deltas).time_scale(0.0));
    wait_for_engine_time(&m.engine, expected_time);

    let phases: Vec<_> = rx
        .try_iter()
        .map(|event| match event {
            StrokeEvent::DriveStarted(r) => (Phase::Drive, r.stroke_count),
            StrokeEvent::RecoveryStarted(r) => (Phase::Recovery, r.stroke_count),
        })
        .collect();
    assert_eq!(
        phases,
        vec![(Phase::Drive, 1), (Phase::Recovery, 1), (Phase::Drive, 2)]
    );
}

#[test]
fn recording_file_replays_like_synthetic_session() {
    let deltas = replay::synthetic_session(2);
    let mut text = String::from("# two strokes\n");
    for dt in &deltas {
        text.push_str(&format!("{dt}\n"));
    }
    let path = std::env::temp_dir().join(format!("rowmon-recording-{}.txt", std::process::id()));
    std::fs::write(&path, text).unwrap();

    let loaded = replay::load_recording(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded, deltas);
}
