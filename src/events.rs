// RowMon - Telemetry Record & System Events

// ---------------------------------------------------------------------------
// Stroke Phase
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Before the first stroke of a power-up.
    #[default]
    Idle,
    Drive,
    Recovery,
}

impl Phase {
    /// Label used in log lines.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Idle     => "idle",
            Self::Drive    => "drive",
            Self::Recovery => "recovery",
        }
    }
}

// ---------------------------------------------------------------------------
// Telemetry Record - canonical live state, copied out whole by readers
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetryRecord {
    pub phase: Phase,

    // Time (seconds)
    pub total_time: f64,
    pub last_stroke_time: f64,
    pub drive_duration: f64,
    pub recovery_duration: f64,

    // Drag: live smoothed value, and the raw average of the last recovery
    pub drag_factor: f64,
    pub recovery_drag_factor: f64,

    // Per-stroke results
    pub distance: f64,
    pub inst_speed: f64,
    pub inst_power: f64,

    // Live (per impulse)
    pub inst_torque: f64,
    pub angular_acceleration: f64,
    pub spm: f64,
    pub stroke_count: u32,

    // Session
    pub session_active: bool,
    pub session_start_ms: u32,

    // Running sums since session start
    pub total_spm_sum: f64,
    pub total_speed_sum: f64,
    pub total_power_sum: f64,
    pub stroke_sample_count: u32,

    // Averages, always sum / count
    pub avg_spm: f64,
    pub avg_speed: f64,
    pub avg_power: f64,
}

impl TelemetryRecord {
    /// Seconds since the session started, 0 when no session is running.
    pub fn elapsed_secs(&self, now_ms: u32) -> f64 {
        if !self.session_active {
            return 0.0;
        }
        now_ms.wrapping_sub(self.session_start_ms) as f64 / 1000.0
    }
}

// ---------------------------------------------------------------------------
// Impulse - one flywheel rotation increment
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpulseEvent {
    /// Seconds since the previous impulse.
    pub dt: f64,
}

// ---------------------------------------------------------------------------
// Stroke Events - published by the physics engine at phase boundaries
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy)]
pub enum StrokeEvent {
    DriveStarted(TelemetryRecord),
    RecoveryStarted(TelemetryRecord),
}

// ---------------------------------------------------------------------------
// Activity Events - sent to the power-state collaborator
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityEvent {
    /// First client connected, session started.
    ClientConnected,
    /// Last client left, session ended.
    ClientsGone,
    /// A telemetry sample went out while rowing.
    Rowing,
}
