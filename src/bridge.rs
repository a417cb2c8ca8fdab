// RowMon - Rower Bridge
//
// Glue between the physics engine and the link. Polled from the control
// task: follows the connection state to start/stop sessions (and the
// impulse pipeline with them), and forwards at most one telemetry sample per
// update interval to the connected clients.

use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::ble::connection::ConnectionManager;
use crate::ble::ftms::{self, BroadcastReport};
use crate::ble::LinkConnection;
use crate::events::ActivityEvent;
use crate::impulse::ImpulseProducer;
use crate::physics::RowingEngine;

pub struct RowerBridge<C> {
    engine: Arc<RowingEngine>,
    connections: Arc<ConnectionManager<C>>,
    impulses: Arc<ImpulseProducer>,
    activity_tx: Option<Sender<ActivityEvent>>,
    interval: Duration,
    last_update: Option<Instant>,
    was_connected: bool,
    clock: fn() -> u32,
}

impl<C: LinkConnection> RowerBridge<C> {
    pub fn new(
        engine: Arc<RowingEngine>,
        connections: Arc<ConnectionManager<C>>,
        impulses: Arc<ImpulseProducer>,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            connections,
            impulses,
            activity_tx: None,
            interval,
            last_update: None,
            was_connected: false,
            clock: crate::now_ms,
        }
    }

    /// Forward connection and rowing activity to the power-state collaborator.
    pub fn with_activity_listener(mut self, tx: Sender<ActivityEvent>) -> Self {
        self.activity_tx = Some(tx);
        self
    }

    /// Take elapsed-time stamps from `clock` (ms) instead of the system timer.
    pub fn with_clock(mut self, clock: fn() -> u32) -> Self {
        self.clock = clock;
        self
    }

    /// One pass of the control loop.
    pub fn tick(&mut self, now: Instant) -> Option<BroadcastReport> {
        let connected = self.connections.is_connected();

        if connected && !self.was_connected {
            self.impulses.resume();
            self.engine.start_session();
            self.emit(ActivityEvent::ClientConnected);
            self.was_connected = true;
        } else if !connected && self.was_connected {
            self.impulses.pause();
            self.engine.end_session();
            self.emit(ActivityEvent::ClientsGone);
            self.was_connected = false;
        }

        if connected {
            self.update(now)
        } else {
            None
        }
    }

    /// Broadcast the current snapshot unless the last one went out less than
    /// one interval ago.
    pub fn update(&mut self, now: Instant) -> Option<BroadcastReport> {
        if let Some(last) = self.last_update {
            if now.saturating_duration_since(last) < self.interval {
                return None;
            }
        }
        self.last_update = Some(now);

        let data = self.engine.snapshot();
        let report = ftms::notify_rowing_data(&self.connections, &data, (self.clock)());

        if data.session_active && report.delivered > 0 {
            self.emit(ActivityEvent::Rowing);
        }
        Some(report)
    }

    fn emit(&self, event: ActivityEvent) {
        if let Some(tx) = &self.activity_tx {
            let _ = tx.send(event);
        }
    }
}
