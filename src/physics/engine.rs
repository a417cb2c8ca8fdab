// RowMon - Rowing Physics Engine
//
// Single consumer of the impulse queue. Every accepted impulse updates
// torque and angular acceleration, feeds the flank detector and may move the
// stroke state machine:
//
//   IDLE/RECOVERY --(powered flank, recovery >= minimum)--> DRIVE
//   DRIVE         --(unpowered flank, drive >= minimum)---> RECOVERY
//
// Phase boundaries are placed where the current flank began, not at the
// impulse that confirmed it. All state sits behind one mutex; readers get a
// full `TelemetryRecord` copy.

use std::sync::mpsc::Sender;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::*;
use crate::events::{Phase, StrokeEvent, TelemetryRecord};
use crate::physics::averager::MovingAverager;
use crate::physics::flank::FlankDetector;

pub struct RowingEngine {
    core: Mutex<EngineCore>,
}

struct EngineCore {
    settings: RowingSettings,
    flank: FlankDetector,
    drag_averager: MovingAverager,
    data: TelemetryRecord,

    angle_per_impulse: f64,
    total_angle: f64,
    previous_angular_velocity: f64,

    // Flank-adjusted phase starts (engine time, rad)
    drive_start_time: f64,
    drive_start_angle: f64,
    recovery_start_time: f64,
    recovery_start_angle: f64,
    last_recovery_angle: f64,

    // Drag samples collected since the last recovery began
    recovery_drag_sum: f64,
    recovery_drag_samples: u32,

    stroke_tx: Option<Sender<StrokeEvent>>,
    clock: fn() -> u32,
}

impl RowingEngine {
    pub fn new(settings: RowingSettings) -> Self {
        Self::with_clock(settings, crate::now_ms)
    }

    /// Build an engine whose session timestamps come from `clock` (ms).
    pub fn with_clock(settings: RowingSettings, clock: fn() -> u32) -> Self {
        log::info!(
            "Rowing engine: inertia {:.4} kg·m², drag {:.6}, magic {:.2}, {} impulses/rev, auto-drag {}",
            settings.flywheel_inertia,
            settings.drag_factor,
            settings.magic_constant,
            settings.impulses_per_revolution,
            settings.auto_adjust_drag_factor
        );

        let mut core = EngineCore {
            settings,
            flank: FlankDetector::new(&settings),
            drag_averager: MovingAverager::new(settings.damping_constant_smoothing, settings.drag_factor),
            data: TelemetryRecord::default(),
            angle_per_impulse: settings.angular_displacement_per_impulse(),
            total_angle: 0.0,
            previous_angular_velocity: 0.0,
            drive_start_time: 0.0,
            drive_start_angle: 0.0,
            recovery_start_time: 0.0,
            recovery_start_angle: 0.0,
            last_recovery_angle: 0.0,
            recovery_drag_sum: 0.0,
            recovery_drag_samples: 0,
            stroke_tx: None,
            clock,
        };
        core.reset_session();

        Self { core: Mutex::new(core) }
    }

    /// Publish `StrokeEvent`s at every phase change.
    pub fn set_stroke_listener(&self, tx: Sender<StrokeEvent>) {
        self.lock().stroke_tx = Some(tx);
    }

    /// Consistent copy of the live record.
    pub fn snapshot(&self) -> TelemetryRecord {
        self.lock().data
    }

    /// Current (possibly auto-calibrated) drag factor.
    pub fn drag_factor(&self) -> f64 {
        self.lock().settings.drag_factor
    }

    /// Feed one inter-impulse interval (seconds). Returns `false` when the
    /// interval was discarded as implausible.
    pub fn handle_rotation_impulse(&self, dt: f64) -> bool {
        let mut core = self.lock();
        if !core.settings.is_plausible_interval(dt) {
            return false;
        }
        core.process_impulse(dt);
        true
    }

    /// Reset session metrics and start counting. No-op while a session runs.
    pub fn start_session(&self) {
        let mut core = self.lock();
        if core.data.session_active {
            return;
        }
        core.reset_session();
        core.data.session_active = true;
        core.data.session_start_ms = (core.clock)();
        log::info!("Session started (drag {:.6})", core.settings.drag_factor);
    }

    /// Stop counting. Metrics and drag calibration stay readable until the
    /// next start. No-op when no session runs.
    pub fn end_session(&self) {
        let mut core = self.lock();
        if !core.data.session_active {
            return;
        }
        core.data.session_active = false;
        log::info!(
            "Session ended: {} strokes, {:.0} m, avg {:.1} W",
            core.data.stroke_count,
            core.data.distance,
            core.data.avg_power
        );
    }

    fn lock(&self) -> MutexGuard<'_, EngineCore> {
        // A panic elsewhere must not stall the real-time loop.
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EngineCore {
    fn process_impulse(&mut self, dt: f64) {
        self.data.total_time += dt;
        self.total_angle += self.angle_per_impulse;
        self.flank.push_value(dt);

        let velocity = self.angle_per_impulse / dt;
        let alpha = (velocity - self.previous_angular_velocity) / dt;
        self.previous_angular_velocity = velocity;

        self.data.angular_acceleration = alpha;
        self.data.inst_torque = self.settings.flywheel_inertia * alpha
            + self.settings.drag_factor * velocity * velocity;

        if self.settings.auto_adjust_drag_factor {
            self.sample_drag(velocity, alpha);
        }

        match self.data.phase {
            Phase::Drive => {
                if self.flank.is_flywheel_unpowered()
                    && self.flank_start_time() - self.drive_start_time >= self.settings.minimum_drive_time
                {
                    self.start_recovery_phase();
                }
            }
            Phase::Idle | Phase::Recovery => {
                if self.flank.is_flywheel_powered()
                    && self.flank_start_time() - self.recovery_start_time
                        >= self.settings.minimum_recovery_time
                {
                    self.start_drive_phase();
                }
            }
        }
    }

    // k = I·(−α)/ω², only while coasting fast enough to be above noise.
    fn sample_drag(&mut self, velocity: f64, alpha: f64) {
        if alpha >= 0.0 || velocity <= DRAG_SAMPLE_MIN_ANGULAR_VELOCITY {
            return;
        }
        let raw = (self.settings.flywheel_inertia * -alpha) / (velocity * velocity);
        if raw > 0.0 && raw < DRAG_SAMPLE_MAX {
            self.recovery_drag_sum += raw;
            self.recovery_drag_samples += 1;
        }
    }

    fn flank_start_time(&self) -> f64 {
        self.data.total_time - self.flank.time_to_begin_of_flank()
    }

    fn flank_start_angle(&self) -> f64 {
        self.total_angle - self.flank.flank_length() as f64 * self.angle_per_impulse
    }

    fn start_drive_phase(&mut self) {
        let end_time = self.flank_start_time();
        let end_angle = self.flank_start_angle();

        let recovery_len = end_time - self.recovery_start_time;
        self.last_recovery_angle = end_angle - self.recovery_start_angle;
        self.data.recovery_duration = recovery_len;

        if self.settings.auto_adjust_drag_factor && self.recovery_drag_samples > 0 {
            let recovery_drag = self.recovery_drag_sum / self.recovery_drag_samples as f64;
            self.drag_averager.push_value(recovery_drag);
            self.settings.drag_factor = self.drag_averager.average();
            self.data.recovery_drag_factor = recovery_drag;
            log::debug!(
                "Drag recalibrated: recovery {:.6} ({} samples), smoothed {:.6}",
                recovery_drag,
                self.recovery_drag_samples,
                self.settings.drag_factor
            );
        }
        self.data.drag_factor = self.settings.drag_factor;

        let cycle_time = self.data.drive_duration + recovery_len;
        if cycle_time > 0.0 {
            self.data.last_stroke_time = cycle_time;
            self.data.spm = 60.0 / cycle_time;
        }

        self.data.phase = Phase::Drive;
        self.data.stroke_count += 1;
        self.drive_start_time = end_time;
        self.drive_start_angle = end_angle;

        self.publish(StrokeEvent::DriveStarted(self.data));
    }

    fn start_recovery_phase(&mut self) {
        let end_time = self.flank_start_time();
        let end_angle = self.flank_start_angle();

        let drive_angle = end_angle - self.drive_start_angle;
        self.data.drive_duration = end_time - self.drive_start_time;
        self.data.phase = Phase::Recovery;

        let cycle_time = self.data.drive_duration + self.data.recovery_duration;
        let cycle_angle = drive_angle + self.last_recovery_angle;
        let speed = self.linear_velocity(cycle_angle, cycle_time);
        let power = self.cycle_power(cycle_angle, cycle_time);

        if !self.data.session_active && speed > SESSION_AUTOSTART_SPEED {
            self.clear_session_metrics();
            self.data.session_active = true;
            self.data.session_start_ms = (self.clock)();
            log::info!("Session auto-started at {:.2} m/s", speed);
        }

        if self.data.session_active {
            let d = &mut self.data;
            d.inst_speed = speed;
            d.inst_power = power;
            d.distance += speed * cycle_time;

            d.stroke_sample_count += 1;
            d.total_spm_sum += d.spm;
            d.total_speed_sum += speed;
            d.total_power_sum += power;

            let n = d.stroke_sample_count as f64;
            d.avg_spm = d.total_spm_sum / n;
            d.avg_speed = d.total_speed_sum / n;
            d.avg_power = d.total_power_sum / n;
        }

        self.recovery_start_time = end_time;
        self.recovery_start_angle = end_angle;
        self.recovery_drag_sum = 0.0;
        self.recovery_drag_samples = 0;

        self.publish(StrokeEvent::RecoveryStarted(self.data));
    }

    // v = (k / c)^(1/3) · θ / t
    fn linear_velocity(&self, angle: f64, cycle_time: f64) -> f64 {
        if cycle_time <= 0.0 {
            return 0.0;
        }
        (self.settings.drag_factor / self.settings.magic_constant).cbrt() * (angle / cycle_time)
    }

    // P = k · ω̄³
    fn cycle_power(&self, angle: f64, cycle_time: f64) -> f64 {
        if cycle_time <= 0.0 {
            return 0.0;
        }
        self.settings.drag_factor * (angle / cycle_time).powi(3)
    }

    fn clear_session_metrics(&mut self) {
        let d = &mut self.data;
        d.distance = 0.0;
        d.inst_speed = 0.0;
        d.inst_power = 0.0;
        d.total_spm_sum = 0.0;
        d.total_speed_sum = 0.0;
        d.total_power_sum = 0.0;
        d.stroke_sample_count = 0;
        d.avg_spm = 0.0;
        d.avg_speed = 0.0;
        d.avg_power = 0.0;
    }

    // Full reset to the pre-stroke state. The drag calibration survives.
    fn reset_session(&mut self) {
        self.data = TelemetryRecord {
            drag_factor: self.settings.drag_factor,
            ..Default::default()
        };
        self.flank.reset();
        self.total_angle = 0.0;
        self.previous_angular_velocity = 0.0;
        self.recovery_drag_sum = 0.0;
        self.recovery_drag_samples = 0;

        // Seed the recovery far enough back that the first powered flank is
        // accepted as a drive.
        self.drive_start_time = 0.0;
        self.drive_start_angle = 0.0;
        self.recovery_start_time = -2.0 * self.settings.minimum_recovery_time;
        self.recovery_start_angle = 0.0;
        self.last_recovery_angle = 0.0;
    }

    fn publish(&self, event: StrokeEvent) {
        if let Some(tx) = &self.stroke_tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn fixed_clock() -> u32 {
        5_000
    }

    fn test_settings() -> RowingSettings {
        RowingSettings::default()
            .with_phase_minimums(0.15, 0.2)
            .with_flank(3, 0)
    }

    fn engine(settings: RowingSettings) -> RowingEngine {
        RowingEngine::with_clock(settings, fixed_clock)
    }

    /// `n` evenly spaced values from `from` to `to` inclusive.
    fn ramp(from: f64, to: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| from + (to - from) * i as f64 / (n - 1) as f64)
            .collect()
    }

    /// One full stroke: recovery slows the flywheel, drive speeds it up.
    fn stroke() -> Vec<f64> {
        let mut deltas = ramp(0.02, 0.05, 8);
        deltas.extend(ramp(0.05, 0.015, 6));
        deltas
    }

    #[test]
    fn one_stroke_enters_drive_once() {
        let e = engine(test_settings());
        let (tx, rx) = mpsc::channel();
        e.set_stroke_listener(tx);

        for dt in stroke() {
            assert!(e.handle_rotation_impulse(dt));
        }

        let drives = rx
            .try_iter()
            .filter(|ev| matches!(ev, StrokeEvent::DriveStarted(_)))
            .count();
        let snap = e.snapshot();
        assert_eq!(drives, 1);
        assert_eq!(snap.stroke_count, 1);
        assert_eq!(snap.phase, Phase::Drive);
        assert!(snap.spm > 0.0);
    }

    #[test]
    fn implausible_interval_is_discarded() {
        let e = engine(test_settings());
        for dt in ramp(0.02, 0.05, 8) {
            e.handle_rotation_impulse(dt);
        }
        let before = e.snapshot();

        assert!(!e.handle_rotation_impulse(10.0));
        assert!(!e.handle_rotation_impulse(0.0001));

        let after = e.snapshot();
        assert_eq!(after, before);
    }

    #[test]
    fn torque_tracks_every_impulse() {
        let e = engine(test_settings());
        e.handle_rotation_impulse(0.05);
        let first = e.snapshot();
        e.handle_rotation_impulse(0.04);
        let second = e.snapshot();

        let s = test_settings();
        let w1 = s.angular_displacement_per_impulse() / 0.05;
        let w2 = s.angular_displacement_per_impulse() / 0.04;
        let alpha = (w2 - w1) / 0.04;
        let torque = s.flywheel_inertia * alpha + s.drag_factor * w2 * w2;

        assert_ne!(first.inst_torque, second.inst_torque);
        assert!((second.angular_acceleration - alpha).abs() < 1e-9);
        assert!((second.inst_torque - torque).abs() < 1e-9);
    }

    #[test]
    fn short_drive_does_not_end() {
        // The first drive is accepted thanks to the seeded recovery; a quick
        // deceleration right after must not start a recovery.
        let e = engine(RowingSettings::default().with_phase_minimums(1.0, 1.0).with_flank(3, 0));
        for dt in stroke() {
            e.handle_rotation_impulse(dt);
        }
        assert_eq!(e.snapshot().phase, Phase::Drive);

        for dt in ramp(0.02, 0.05, 8) {
            e.handle_rotation_impulse(dt);
        }
        let snap = e.snapshot();
        assert_eq!(snap.phase, Phase::Drive);
        assert_eq!(snap.stroke_count, 1);
    }

    #[test]
    fn short_recovery_does_not_start_drive() {
        let e = engine(RowingSettings::default().with_phase_minimums(0.15, 1.0).with_flank(3, 0));
        for dt in stroke() {
            e.handle_rotation_impulse(dt);
        }
        // Long enough drive, then a brief coast and another push.
        for dt in ramp(0.015, 0.015, 10) {
            e.handle_rotation_impulse(dt);
        }
        for dt in ramp(0.016, 0.03, 6) {
            e.handle_rotation_impulse(dt);
        }
        assert_eq!(e.snapshot().phase, Phase::Recovery);

        for dt in ramp(0.029, 0.015, 6) {
            e.handle_rotation_impulse(dt);
        }
        let snap = e.snapshot();
        assert_eq!(snap.phase, Phase::Recovery);
        assert_eq!(snap.stroke_count, 1);
    }

    #[test]
    fn strokes_accumulate_distance_and_averages() {
        let e = engine(test_settings());
        let (tx, rx) = mpsc::channel();
        e.set_stroke_listener(tx);
        e.start_session();
        for _ in 0..4 {
            for dt in stroke() {
                e.handle_rotation_impulse(dt);
            }
        }
        let snap = e.snapshot();

        assert_eq!(snap.stroke_count, 4);
        assert!(snap.stroke_sample_count >= 3);
        assert!(snap.distance > 0.0);

        // Averages equal sum / count after every counted stroke, not just the last.
        let recoveries: Vec<TelemetryRecord> = rx
            .try_iter()
            .filter_map(|event| match event {
                StrokeEvent::RecoveryStarted(r) if r.stroke_sample_count > 0 => Some(r),
                _ => None,
            })
            .collect();
        let counts: Vec<u32> = recoveries.iter().map(|r| r.stroke_sample_count).collect();
        assert_eq!(counts, (1..=snap.stroke_sample_count).collect::<Vec<_>>());
        for r in &recoveries {
            let n = r.stroke_sample_count as f64;
            assert!((r.avg_spm - r.total_spm_sum / n).abs() < 1e-12, "spm at {n}");
            assert!((r.avg_speed - r.total_speed_sum / n).abs() < 1e-12, "speed at {n}");
            assert!((r.avg_power - r.total_power_sum / n).abs() < 1e-12, "power at {n}");
        }
    }

    #[test]
    fn movement_auto_starts_session() {
        let e = engine(test_settings());
        for _ in 0..2 {
            for dt in stroke() {
                e.handle_rotation_impulse(dt);
            }
        }
        let snap = e.snapshot();
        assert!(snap.session_active);
        assert_eq!(snap.session_start_ms, 5_000);
        assert!(snap.distance > 0.0);
    }

    #[test]
    fn no_distance_without_session_or_motion() {
        let e = engine(test_settings());
        for dt in ramp(0.02, 0.05, 8) {
            e.handle_rotation_impulse(dt);
        }
        let snap = e.snapshot();
        assert!(!snap.session_active);
        assert_eq!(snap.distance, 0.0);
    }

    #[test]
    fn session_control_is_idempotent() {
        let e = engine(test_settings());
        e.start_session();
        for dt in stroke() {
            e.handle_rotation_impulse(dt);
        }
        let started = e.snapshot();

        e.start_session();
        assert_eq!(e.snapshot(), started);

        e.end_session();
        let ended = e.snapshot();
        assert!(!ended.session_active);
        assert_eq!(ended.stroke_count, started.stroke_count);

        e.end_session();
        assert_eq!(e.snapshot(), ended);
    }

    #[test]
    fn restart_clears_metrics_but_keeps_drag() {
        let e = engine(test_settings());
        e.start_session();
        for _ in 0..6 {
            for dt in stroke() {
                e.handle_rotation_impulse(dt);
            }
        }
        let calibrated = e.drag_factor();
        e.end_session();
        e.start_session();

        let snap = e.snapshot();
        assert!(snap.session_active);
        assert_eq!(snap.stroke_count, 0);
        assert_eq!(snap.stroke_sample_count, 0);
        assert_eq!(snap.distance, 0.0);
        assert_eq!(snap.drag_factor, calibrated);
    }

    #[test]
    fn recovery_recalibrates_drag() {
        let seed = RowingSettings::default().drag_factor;
        let e = engine(test_settings());
        for _ in 0..3 {
            for dt in stroke() {
                e.handle_rotation_impulse(dt);
            }
        }
        let snap = e.snapshot();
        assert!(snap.recovery_drag_factor > 0.0);
        assert!(snap.recovery_drag_factor < DRAG_SAMPLE_MAX);
        assert_ne!(e.drag_factor(), seed);
        assert_eq!(snap.drag_factor, e.drag_factor());
    }

    #[test]
    fn fixed_drag_when_auto_adjust_off() {
        let settings = test_settings().with_auto_drag(false);
        let e = engine(settings);
        for _ in 0..3 {
            for dt in stroke() {
                e.handle_rotation_impulse(dt);
            }
        }
        assert_eq!(e.drag_factor(), settings.drag_factor);
        assert_eq!(e.snapshot().recovery_drag_factor, 0.0);
    }

    #[test]
    fn stroke_count_steps_by_one_per_drive() {
        let e = engine(test_settings());
        let (tx, rx) = mpsc::channel();
        e.set_stroke_listener(tx);

        let mut last = 0;
        for _ in 0..5 {
            for dt in stroke() {
                e.handle_rotation_impulse(dt);
                let count = e.snapshot().stroke_count;
                assert!(count >= last);
                last = count;
            }
        }

        let drives = rx
            .try_iter()
            .filter(|ev| matches!(ev, StrokeEvent::DriveStarted(_)))
            .count() as u32;
        assert_eq!(drives, last);
    }
}
