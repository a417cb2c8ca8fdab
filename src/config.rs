// RowMon - Hardware, Link & Rower Configuration
// Target: ESP32-S3 with a reed/hall impulse sensor on the flywheel

use std::time::Duration;

// ---------------------------------------------------------------------------
// GPIO Pin Definitions
// ---------------------------------------------------------------------------
pub const PIN_IMPULSE_SENSOR: i32 = 4; // Reed switch / hall sensor (INPUT_PULLUP, active LOW)

// ---------------------------------------------------------------------------
// Task Stack Sizes (bytes)
// ---------------------------------------------------------------------------
pub const STACK_IMPULSE: usize = 4096;
pub const STACK_PHYSICS: usize = 8192;
pub const STACK_BRIDGE: usize = 8192;
pub const STACK_ADVERTISING: usize = 4096;
pub const STACK_REPLAY: usize = 4096;

// ---------------------------------------------------------------------------
// Impulse Pipeline
// ---------------------------------------------------------------------------
pub const IMPULSE_QUEUE_SIZE: usize = 30; // ~10 revolutions at 3 impulses/rev
pub const PHYSICS_REPORT_INTERVAL_MS: u64 = 30_000;

// ---------------------------------------------------------------------------
// Timing (milliseconds)
// ---------------------------------------------------------------------------
pub const BRIDGE_UPDATE_INTERVAL_MS: u64 = 500;  // 2 notifications per second
pub const CONTROL_POLL_INTERVAL_MS: u64 = 100;   // Session control loop
pub const ADV_RESTART_DELAY_MS: u64 = 100;       // Settle after connect before advertising

pub const BRIDGE_UPDATE_INTERVAL: Duration = Duration::from_millis(BRIDGE_UPDATE_INTERVAL_MS);
pub const ADV_RESTART_DELAY: Duration = Duration::from_millis(ADV_RESTART_DELAY_MS);

// Host replay speed-up range
pub const REPLAY_SPEED_MIN: f64 = 0.01;
pub const REPLAY_SPEED_MAX: f64 = 1000.0;

// ---------------------------------------------------------------------------
// Bluetooth LE / Fitness Machine Service
// ---------------------------------------------------------------------------
pub const DEVICE_NAME: &str = "RowMon";
pub const MAX_CONNECTIONS: usize = 2;

pub const UUID_FTMS_SERVICE: u16 = 0x1826;
pub const UUID_ROWER_DATA: u16 = 0x2AD1;
pub const UUID_FITNESS_MACHINE_FEATURE: u16 = 0x2ACC;
pub const UUID_CCCD: u16 = 0x2902;

pub const FTMS_FEATURE_ROWER: u32 = 1 << 4;
pub const FTMS_FEATURES: u32 = 0x0000_082D | FTMS_FEATURE_ROWER;

// ---------------------------------------------------------------------------
// Physics Thresholds
// ---------------------------------------------------------------------------
pub const DRAG_SAMPLE_MIN_ANGULAR_VELOCITY: f64 = 10.0; // rad/s, below this is noise
pub const DRAG_SAMPLE_MAX: f64 = 0.1;                   // Rowers sit around 0.0001 - 0.005
pub const SESSION_AUTOSTART_SPEED: f64 = 0.1;           // m/s
pub const PACE_REFERENCE_DISTANCE: f64 = 500.0;         // Pace is reported per 500 m
pub const PACE_MIN_SPEED: f64 = 0.1;                    // m/s, below this pace reads 0
pub const MAX_DRAG_SMOOTHING: usize = 50;

// ---------------------------------------------------------------------------
// Rower Profile
// ---------------------------------------------------------------------------

/// Machine constants for the physics engine. Everything is fixed at
/// construction except `drag_factor`, which the engine overwrites when
/// `auto_adjust_drag_factor` is set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowingSettings {
    /// Moment of inertia of the flywheel (kg·m²).
    pub flywheel_inertia: f64,
    /// Seed for the drag coefficient (N·m·s²).
    pub drag_factor: f64,
    /// Relation between drag and boat speed (Concept2 uses 2.8).
    pub magic_constant: f64,
    pub impulses_per_revolution: u32,
    pub minimum_drive_time: f64,
    pub minimum_recovery_time: f64,
    /// Shorter intervals are sensor bounce.
    pub minimum_time_between_impulses: f64,
    /// Longer intervals mean the flywheel stopped.
    pub maximum_time_between_impulses: f64,
    /// Number of strokes the drag averager smooths over.
    pub damping_constant_smoothing: usize,
    pub auto_adjust_drag_factor: bool,
    /// Consecutive intervals a trend must hold before the flank detector trusts it.
    pub flank_length: usize,
    pub number_of_errors_allowed: usize,
}

impl Default for RowingSettings {
    fn default() -> Self {
        Self {
            flywheel_inertia: 0.1001,
            drag_factor: 0.00011,
            magic_constant: 2.8,
            impulses_per_revolution: 3,
            minimum_drive_time: 0.3,
            minimum_recovery_time: 0.5,
            minimum_time_between_impulses: 0.005,
            maximum_time_between_impulses: 3.0,
            damping_constant_smoothing: 5,
            auto_adjust_drag_factor: true,
            flank_length: 3,
            number_of_errors_allowed: 0,
        }
    }
}

impl RowingSettings {
    pub fn with_phase_minimums(mut self, drive: f64, recovery: f64) -> Self {
        self.minimum_drive_time = drive;
        self.minimum_recovery_time = recovery;
        self
    }

    pub fn with_auto_drag(mut self, enabled: bool) -> Self {
        self.auto_adjust_drag_factor = enabled;
        self
    }

    pub fn with_flank(mut self, length: usize, errors_allowed: usize) -> Self {
        self.flank_length = length;
        self.number_of_errors_allowed = errors_allowed;
        self
    }

    /// Angle the flywheel turns between two impulses (rad).
    pub fn angular_displacement_per_impulse(&self) -> f64 {
        2.0 * std::f64::consts::PI / self.impulses_per_revolution.max(1) as f64
    }

    /// Whether an inter-impulse interval is physically plausible.
    pub fn is_plausible_interval(&self, dt: f64) -> bool {
        dt >= self.minimum_time_between_impulses && dt <= self.maximum_time_between_impulses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plausible_interval_bounds_are_inclusive() {
        let s = RowingSettings::default();
        assert!(s.is_plausible_interval(s.minimum_time_between_impulses));
        assert!(s.is_plausible_interval(s.maximum_time_between_impulses));
        assert!(!s.is_plausible_interval(0.001));
        assert!(!s.is_plausible_interval(10.0));
        assert!(!s.is_plausible_interval(f64::NAN));
    }

    #[test]
    fn displacement_per_impulse_splits_a_revolution() {
        let s = RowingSettings::default();
        let full_turn = s.angular_displacement_per_impulse() * s.impulses_per_revolution as f64;
        assert!((full_turn - 2.0 * std::f64::consts::PI).abs() < 1e-12);
    }

    #[test]
    fn feature_mask_advertises_rower() {
        assert_ne!(FTMS_FEATURES & FTMS_FEATURE_ROWER, 0);
    }
}
