// RowMon - Physics Task
//
// Sole consumer of the impulse queue. Blocks until an interval arrives and
// hands it to the engine; never blocks the producer. Keeps simple load
// accounting and reports it periodically.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::*;
use crate::impulse::ImpulseConsumer;
use crate::physics::RowingEngine;

/// Impulse processing statistics for one reporting window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhysicsStats {
    pub processed: u32,
    pub discarded: u32,
    pub max_processing: Duration,
}

impl PhysicsStats {
    fn record(&mut self, accepted: bool, took: Duration) {
        if accepted {
            self.processed += 1;
        } else {
            self.discarded += 1;
        }
        self.max_processing = self.max_processing.max(took);
    }
}

/// Runs until the producer side of the queue is gone. Returns the totals.
pub fn physics_task(engine: Arc<RowingEngine>, impulses: ImpulseConsumer) -> PhysicsStats {
    log::info!("Physics task started");

    let report_interval = Duration::from_millis(PHYSICS_REPORT_INTERVAL_MS);
    let mut window = PhysicsStats::default();
    let mut totals = PhysicsStats::default();
    let mut window_start = Instant::now();
    let mut dropped_seen = 0u32;

    while let Ok(event) = impulses.recv() {
        let started = Instant::now();
        let accepted = engine.handle_rotation_impulse(event.dt);
        let took = started.elapsed();
        window.record(accepted, took);
        totals.record(accepted, took);

        // The producer cannot log from interrupt context; report for it.
        let dropped = impulses.dropped_total();
        if dropped != dropped_seen {
            log::warn!(
                "Impulse queue overflow: {} event(s) dropped ({} total)",
                dropped.wrapping_sub(dropped_seen),
                dropped
            );
            dropped_seen = dropped;
        }

        if window_start.elapsed() >= report_interval {
            log::debug!(
                "Physics: {} impulses ({} discarded) in {} s, max {} us, {}",
                window.processed,
                window.discarded,
                window_start.elapsed().as_secs(),
                window.max_processing.as_micros(),
                engine.snapshot().phase.display_name()
            );
            window = PhysicsStats::default();
            window_start = Instant::now();
        }
    }

    log::info!("Impulse queue closed, exiting physics task");
    totals
}
