// RowMon - Firmware Entry Point
//
// On the device:
//   1. Create the physics engine and the impulse queue (paused).
//   2. Spawn the physics task (queue consumer) and the impulse task (GPIO).
//   3. Bring up the BLE GATT server; advertising starts once it is ready.
//   4. Spawn the bridge task: the first client starts the session, the last
//      one to leave ends it.
//
// On a host the same pipeline runs as a replay tool: a recorded (or
// synthetic) impulse stream is fed through the producer while one loopback
// client receives the telemetry.

#[cfg(all(target_os = "espidf", not(feature = "experimental")))]
compile_error!("the firmware needs the `experimental` feature for the Bluedroid GATT server");

use std::sync::Arc;
use std::thread;

use rowmon::config::*;
use rowmon::impulse::impulse_queue;
use rowmon::physics::RowingEngine;
use rowmon::tasks;

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------
#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use std::time::Duration;

    use esp_idf_hal::gpio::IOPin;
    use esp_idf_hal::prelude::*;
    use esp_idf_svc::bt::BtDriver;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use rowmon::ble::esp::FtmsServer;
    use rowmon::bridge::RowerBridge;

    // Link esp-idf-sys runtime patches and initialise logging.
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    log::info!("RowMon firmware starting…");

    let peripherals = Peripherals::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    // ---- Physics pipeline -------------------------------------------------
    let engine = Arc::new(RowingEngine::new(RowingSettings::default()));
    let (producer, consumer) = impulse_queue(IMPULSE_QUEUE_SIZE);
    let producer = Arc::new(producer);

    let physics_engine = Arc::clone(&engine);
    thread::Builder::new()
        .name("physics".into())
        .stack_size(STACK_PHYSICS)
        .spawn(move || {
            tasks::physics::physics_task(physics_engine, consumer);
        })?;

    // Impulse sensor on GPIO PIN_IMPULSE_SENSOR (pull-up, falling edge).
    let sensor_pin = peripherals.pins.gpio4.downgrade();
    let sensor_producer = Arc::clone(&producer);
    thread::Builder::new()
        .name("impulse".into())
        .stack_size(STACK_IMPULSE)
        .spawn(move || {
            tasks::impulse::impulse_task(sensor_pin, sensor_producer);
        })?;

    // ---- Bluetooth LE -----------------------------------------------------
    let bt = Arc::new(BtDriver::new(peripherals.modem, Some(nvs))?);
    let (_server, connections) = FtmsServer::start(bt)?;

    // ---- Session control --------------------------------------------------
    let bridge = RowerBridge::new(engine, connections, producer, BRIDGE_UPDATE_INTERVAL);
    thread::Builder::new()
        .name("bridge".into())
        .stack_size(STACK_BRIDGE)
        .spawn(move || {
            tasks::bridge::bridge_task(bridge);
        })?;

    log::info!("Boot complete, waiting for a client");

    // All work happens in the spawned tasks.
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

// ---------------------------------------------------------------------------
// Host replay tool
// ---------------------------------------------------------------------------
#[cfg(not(target_os = "espidf"))]
#[derive(clap::Parser)]
#[command(name = "rowmon", about = "Replay flywheel impulses through the rowing monitor pipeline")]
struct Cli {
    /// Recording with one impulse interval (seconds) per line. Without it a
    /// synthetic session is replayed.
    recording: Option<std::path::PathBuf>,

    /// Strokes in the synthetic session
    #[arg(long, default_value_t = 20)]
    strokes: usize,

    /// Replay speed-up factor (0.01 to 1000)
    #[arg(long, default_value_t = 1.0, value_parser = rowmon::tasks::replay::parse_speed)]
    speed: f64,

    /// Start over at the end of the recording
    #[arg(long = "loop")]
    looping: bool,
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use clap::Parser;
    use rowmon::ble::connection::ConnectionManager;
    use rowmon::ble::loopback::{LoopbackAdvertiser, LoopbackConnection};
    use rowmon::bridge::RowerBridge;
    use rowmon::events::StrokeEvent;
    use rowmon::tasks::replay::{self, Replay};

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let deltas = match &cli.recording {
        Some(path) => replay::load_recording(path)?,
        None => replay::synthetic_session(cli.strokes),
    };
    log::info!("RowMon replay: {} impulses at {}x", deltas.len(), cli.speed);

    // ---- Physics pipeline -------------------------------------------------
    let engine = Arc::new(RowingEngine::new(RowingSettings::default()));
    let (producer, consumer) = impulse_queue(IMPULSE_QUEUE_SIZE);
    let producer = Arc::new(producer);

    let (stroke_tx, stroke_rx) = mpsc::channel();
    engine.set_stroke_listener(stroke_tx);
    thread::Builder::new().name("strokes".into()).spawn(move || {
        for event in stroke_rx {
            if let StrokeEvent::RecoveryStarted(r) = event {
                log::info!(
                    "Stroke {}: {:.1} spm, drive {:.2} s, recovery {:.2} s, {:.0} W, {:.0} m",
                    r.stroke_count,
                    r.spm,
                    r.drive_duration,
                    r.recovery_duration,
                    r.inst_power,
                    r.distance
                );
            }
        }
    })?;

    let physics_engine = Arc::clone(&engine);
    let physics = thread::Builder::new()
        .name("physics".into())
        .stack_size(STACK_PHYSICS)
        .spawn(move || tasks::physics::physics_task(physics_engine, consumer))?;

    // ---- Loopback link with one subscribed client -------------------------
    let connections = Arc::new(ConnectionManager::new(
        Arc::new(LoopbackAdvertiser::default()),
        ADV_RESTART_DELAY,
    )?);
    connections.start_advertising();
    let client = Arc::new(LoopbackConnection::new(0));
    connections.on_connected(Arc::clone(&client));
    connections.set_subscribed(0, true);

    let mut bridge = RowerBridge::new(
        Arc::clone(&engine),
        Arc::clone(&connections),
        Arc::clone(&producer),
        BRIDGE_UPDATE_INTERVAL,
    );
    // Picks up the connection: resumes the producer, starts the session.
    bridge.tick(Instant::now());

    let replay = Replay::new(deltas).looping(cli.looping).time_scale(1.0 / cli.speed);
    let replay_producer = Arc::clone(&producer);
    let replayer = thread::Builder::new()
        .name("replay".into())
        .stack_size(STACK_REPLAY)
        .spawn(move || tasks::replay::replay_task(replay_producer, replay))?;

    // ---- Control loop -----------------------------------------------------
    let poll = Duration::from_millis(CONTROL_POLL_INTERVAL_MS);
    while !replayer.is_finished() {
        if let Some(report) = bridge.tick(Instant::now()) {
            if let Some((_, payload)) = client.received().last() {
                log::debug!("Rower Data ({} delivered): {:02X?}", report.delivered, payload);
            }
        }
        thread::sleep(poll);
    }

    let stats = replayer
        .join()
        .map_err(|_| anyhow::anyhow!("replay task panicked"))?;

    // Let the physics task drain the queue, then close the session.
    drop(bridge);
    drop(producer);
    let physics_stats = physics
        .join()
        .map_err(|_| anyhow::anyhow!("physics task panicked"))?;
    engine.end_session();

    let r = engine.snapshot();
    log::info!(
        "Replayed {} impulses ({} dropped, {} discarded by physics)",
        stats.queued,
        stats.dropped,
        physics_stats.discarded
    );
    log::info!(
        "Session: {} strokes, {:.0} m, avg {:.1} spm, avg {:.1} W, drag {:.6}",
        r.stroke_count,
        r.distance,
        r.avg_spm,
        r.avg_power,
        r.drag_factor
    );
    Ok(())
}
