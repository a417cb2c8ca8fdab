// RowMon - Impulse Pipeline
//
// Producer side runs in the sensor interrupt (or the replay task): it turns
// an edge timestamp into "seconds since the previous edge" and enqueues it
// without ever blocking. The physics task blocks on the consumer side.
//
// Overflow policy: drop the newest event. The hardware cannot be stalled, and
// the oldest queued intervals are already part of a flank in progress.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::error::ImpulseError;
use crate::events::ImpulseEvent;

/// What happened to one sensor edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpulseOutcome {
    /// Interval handed to the physics task.
    Queued,
    /// First edge after start/resume, only sets the baseline.
    Baseline,
    /// Pipeline paused, edge ignored.
    Paused,
    Dropped(ImpulseError),
}

pub struct ImpulseProducer {
    tx: Sender<ImpulseEvent>,
    paused: AtomicBool,
    first_pulse: AtomicBool,
    last_edge_us: AtomicU64,
    dropped: Arc<AtomicU32>,
}

/// Latest sensor edge captured in interrupt context, plus how many edges
/// arrived since the task last looked. Lets the task notice bursts that a
/// single wake-up would otherwise merge into one long interval.
#[derive(Debug, Default)]
pub struct EdgeLatch {
    timestamp_us: AtomicU64,
    pending: AtomicU32,
}

impl EdgeLatch {
    /// Interrupt side: remember the edge, then count it.
    pub fn record(&self, timestamp_us: u64) {
        self.timestamp_us.store(timestamp_us, Ordering::Release);
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Task side: `(edges, newest timestamp)` since the last call, or `None`
    /// when nothing arrived. Retries if an edge lands mid-read.
    pub fn take(&self) -> Option<(u32, u64)> {
        loop {
            let edges = self.pending.load(Ordering::Acquire);
            if edges == 0 {
                return None;
            }
            let timestamp_us = self.timestamp_us.load(Ordering::Acquire);
            if self
                .pending
                .compare_exchange(edges, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some((edges, timestamp_us));
            }
        }
    }
}

pub struct ImpulseConsumer {
    rx: Receiver<ImpulseEvent>,
    dropped: Arc<AtomicU32>,
}

/// Create the fixed-capacity impulse queue. The producer starts paused.
pub fn impulse_queue(capacity: usize) -> (ImpulseProducer, ImpulseConsumer) {
    let (tx, rx) = bounded(capacity);
    let dropped = Arc::new(AtomicU32::new(0));

    let producer = ImpulseProducer {
        tx,
        paused: AtomicBool::new(true),
        first_pulse: AtomicBool::new(true),
        last_edge_us: AtomicU64::new(0),
        dropped: Arc::clone(&dropped),
    };
    (producer, ImpulseConsumer { rx, dropped })
}

impl ImpulseProducer {
    /// Handle one sensor edge captured at `timestamp_us` (monotonic clock).
    /// Safe to call from interrupt context: no locks, no allocation, no logging.
    pub fn on_edge(&self, timestamp_us: u64) -> ImpulseOutcome {
        if self.paused.load(Ordering::Acquire) {
            return ImpulseOutcome::Paused;
        }

        let previous = self.last_edge_us.swap(timestamp_us, Ordering::AcqRel);
        if self.first_pulse.swap(false, Ordering::AcqRel) {
            return ImpulseOutcome::Baseline;
        }

        let dt = timestamp_us.wrapping_sub(previous) as f64 / 1_000_000.0;
        match self.tx.try_send(ImpulseEvent { dt }) {
            Ok(()) => ImpulseOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                ImpulseOutcome::Dropped(ImpulseError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => ImpulseOutcome::Dropped(ImpulseError::Disconnected),
        }
    }

    /// Handle `edges` edges seen in one go, the newest at `timestamp_us`.
    /// Only that timestamp survived, so the intervals leading up to it are
    /// counted as dropped and the newest edge becomes the baseline.
    pub fn on_edges(&self, edges: u32, timestamp_us: u64) -> ImpulseOutcome {
        if edges > 1 && !self.paused.load(Ordering::Acquire) {
            let lost = if self.first_pulse.swap(true, Ordering::AcqRel) { edges - 1 } else { edges };
            self.dropped.fetch_add(lost, Ordering::Relaxed);
        }
        self.on_edge(timestamp_us)
    }

    /// Ignore edges until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        log::info!("Impulse pipeline PAUSED");
    }

    /// Accept edges again. The next edge only re-establishes the baseline so
    /// the time spent paused never shows up as one huge interval.
    pub fn resume(&self) {
        self.first_pulse.store(true, Ordering::Release);
        self.paused.store(false, Ordering::Release);
        log::info!("Impulse pipeline RESUMED");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}

impl ImpulseConsumer {
    /// Block until the next interval arrives.
    pub fn recv(&self) -> Result<ImpulseEvent, ImpulseError> {
        self.rx.recv().map_err(|_| ImpulseError::Disconnected)
    }

    /// Total number of events dropped on a full queue.
    pub fn dropped_total(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}
