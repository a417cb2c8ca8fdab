// RowMon - Replay Task
//
// Feeds recorded impulse intervals into the same producer the sensor
// interrupt uses, so a session can be reproduced without a rower attached.
//
// Recording format: one interval in seconds per line. Blank lines and lines
// starting with '#' are ignored. Intervals must be finite and positive.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::{REPLAY_SPEED_MAX, REPLAY_SPEED_MIN};
use crate::error::{ImpulseError, ReplayError};
use crate::impulse::{ImpulseOutcome, ImpulseProducer};

pub fn parse_recording(text: &str) -> Result<Vec<f64>, ReplayError> {
    let mut deltas = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let dt = line
            .parse::<f64>()
            .ok()
            .filter(|dt| dt.is_finite() && *dt > 0.0)
            .ok_or_else(|| ReplayError::Parse {
                line: index + 1,
                text: line.to_string(),
            })?;
        deltas.push(dt);
    }

    if deltas.is_empty() {
        return Err(ReplayError::Empty);
    }
    Ok(deltas)
}

/// Command-line speed-up factor, kept within what the pacing can express.
pub fn parse_speed(arg: &str) -> Result<f64, String> {
    let speed: f64 = arg.trim().parse().map_err(|e| format!("{e}"))?;
    if (REPLAY_SPEED_MIN..=REPLAY_SPEED_MAX).contains(&speed) {
        Ok(speed)
    } else {
        Err(format!("must be between {REPLAY_SPEED_MIN} and {REPLAY_SPEED_MAX}"))
    }
}

pub fn load_recording(path: impl AsRef<Path>) -> Result<Vec<f64>, ReplayError> {
    let text = std::fs::read_to_string(path)?;
    parse_recording(&text)
}

fn ramp(from: f64, to: f64, steps: usize) -> impl Iterator<Item = f64> {
    let span = (steps.max(2) - 1) as f64;
    (0..steps).map(move |i| from + (to - from) * i as f64 / span)
}

/// A steady piece at roughly 24 spm: each stroke is a coasting recovery
/// (intervals lengthening) followed by a drive (intervals shortening).
pub fn synthetic_session(strokes: usize) -> Vec<f64> {
    let mut deltas = Vec::with_capacity(strokes * 132);
    for _ in 0..strokes {
        deltas.extend(ramp(0.016, 0.022, 90));
        deltas.extend(ramp(0.022, 0.016, 42));
    }
    deltas
}

#[derive(Debug, Clone)]
pub struct Replay {
    pub deltas: Vec<f64>,
    /// Start over at the end of the recording.
    pub looping: bool,
    /// Wall-clock seconds per recorded second; 0 replays without pacing.
    pub time_scale: f64,
}

impl Replay {
    pub fn new(deltas: Vec<f64>) -> Self {
        Self { deltas, looping: false, time_scale: 1.0 }
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn time_scale(mut self, scale: f64) -> Self {
        self.time_scale = scale.max(0.0);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub queued: u32,
    pub dropped: u32,
    pub ignored: u32,
}

/// Replay `replay` into `producer`. Edges carry a virtual timestamp that
/// advances by exactly the recorded interval, independent of pacing jitter.
/// Returns when the recording ends (or never, when looping, until the
/// physics task is gone).
pub fn replay_task(producer: Arc<ImpulseProducer>, replay: Replay) -> ReplayStats {
    log::info!(
        "Replay task started: {} impulses{}",
        replay.deltas.len(),
        if replay.looping { ", looping" } else { "" }
    );

    let mut stats = ReplayStats::default();
    let mut timestamp_us = crate::now_us();
    producer.on_edge(timestamp_us);

    loop {
        for &dt in &replay.deltas {
            if replay.time_scale > 0.0 {
                match Duration::try_from_secs_f64(dt.max(0.0) * replay.time_scale) {
                    Ok(pause) => thread::sleep(pause),
                    Err(e) => log::warn!("Replay: cannot pace interval {} s: {}", dt, e),
                }
            }
            timestamp_us = timestamp_us.wrapping_add((dt.max(0.0) * 1_000_000.0).round() as u64);

            match producer.on_edge(timestamp_us) {
                ImpulseOutcome::Queued => stats.queued += 1,
                ImpulseOutcome::Baseline | ImpulseOutcome::Paused => stats.ignored += 1,
                ImpulseOutcome::Dropped(ImpulseError::QueueFull) => {
                    stats.dropped += 1;
                    log::warn!("Replay: impulse queue full, interval {:.4} s dropped", dt);
                }
                ImpulseOutcome::Dropped(ImpulseError::Disconnected) => {
                    log::warn!("Replay: physics task gone, stopping");
                    return stats;
                }
            }
        }

        if !replay.looping {
            break;
        }
    }

    log::info!(
        "Replay finished: {} queued, {} dropped, {} ignored",
        stats.queued,
        stats.dropped,
        stats.ignored
    );
    stats
}
