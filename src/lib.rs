// RowMon - Rowing Performance Monitor
//
// Turns flywheel impulse timing into stroke physics and streams it to
// fitness apps over the Bluetooth LE Fitness Machine Service.
//
//   impulse sensor ─► impulse queue ─► physics task (RowingEngine)
//                                            │ snapshot
//   BLE clients ◄─ FTMS encoder ◄─ bridge ◄──┘

pub mod ble;
pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod impulse;
pub mod physics;
pub mod tasks;

#[cfg(target_os = "espidf")]
pub mod drivers;

// ---------------------------------------------------------------------------
// Utility: milliseconds since boot (wraps at ~49 days, elapsed math uses wrapping_sub)
// ---------------------------------------------------------------------------
#[cfg(target_os = "espidf")]
pub fn now_ms() -> u32 {
    (now_us() / 1000) as u32
}

/// Microseconds since boot from the ESP high-resolution timer.
#[cfg(target_os = "espidf")]
pub fn now_us() -> u64 {
    // SAFETY: esp_timer_get_time only reads the system timer and is callable
    // from any context, including ISRs.
    unsafe { esp_idf_sys::esp_timer_get_time() as u64 }
}

#[cfg(not(target_os = "espidf"))]
pub fn now_ms() -> u32 {
    (now_us() / 1000) as u32
}

/// Microseconds since the first call (host stand-in for the boot timer).
#[cfg(not(target_os = "espidf"))]
pub fn now_us() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static BOOT: OnceLock<Instant> = OnceLock::new();
    BOOT.get_or_init(Instant::now).elapsed().as_micros() as u64
}
