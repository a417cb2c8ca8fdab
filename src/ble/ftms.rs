// RowMon - FTMS Rower Data Encoder
//
// Serializes a telemetry snapshot into the 19-byte Rower Data notification
// and pushes it to every subscribed client.
//
// Layout (little-endian):
//   [0..2)   flags                      u16  bits 1-6, 11 set (bit 0 clear)
//   [2]      inst. stroke rate          u8   0.5 spm
//   [3..5)   stroke count               u16
//   [5]      avg. stroke rate           u8   0.5 spm
//   [6..9)   total distance             u24  m
//   [9..11)  inst. pace                 u16  s / 500 m
//   [11..13) avg. pace                  u16  s / 500 m
//   [13..15) inst. power                i16  W
//   [15..17) avg. power                 i16  W
//   [17..19) elapsed time               u16  s

use crate::ble::connection::ConnectionManager;
use crate::ble::LinkConnection;
use crate::config::*;
use crate::events::TelemetryRecord;

pub const ROWER_DATA_LEN: usize = 19;

pub const FLAG_AVG_STROKE_RATE: u16 = 1 << 1;
pub const FLAG_TOTAL_DISTANCE: u16 = 1 << 2;
pub const FLAG_INST_PACE: u16 = 1 << 3;
pub const FLAG_AVG_PACE: u16 = 1 << 4;
pub const FLAG_INST_POWER: u16 = 1 << 5;
pub const FLAG_AVG_POWER: u16 = 1 << 6;
pub const FLAG_ELAPSED_TIME: u16 = 1 << 11;

pub const ROWER_DATA_FLAGS: u16 = FLAG_AVG_STROKE_RATE
    | FLAG_TOTAL_DISTANCE
    | FLAG_INST_PACE
    | FLAG_AVG_PACE
    | FLAG_INST_POWER
    | FLAG_AVG_POWER
    | FLAG_ELAPSED_TIME;

const U24_MAX: u32 = 0x00FF_FFFF;

// Float-to-int `as` casts saturate at the target range and map NaN to 0.
fn clamp_u8(v: f64) -> u8 {
    v as u8
}

fn clamp_u16(v: f64) -> u16 {
    v as u16
}

fn clamp_u24(v: f64) -> u32 {
    (v as u32).min(U24_MAX)
}

fn clamp_i16(v: f64) -> i16 {
    v as i16
}

/// Seconds per 500 m, 0 when the rower is (nearly) standing still.
fn pace(speed: f64) -> f64 {
    if speed > PACE_MIN_SPEED {
        PACE_REFERENCE_DISTANCE / speed
    } else {
        0.0
    }
}

/// Encode `data` as a Rower Data payload. `now_ms` is the clock the session
/// start was taken from.
pub fn encode_rower_data(data: &TelemetryRecord, now_ms: u32) -> [u8; ROWER_DATA_LEN] {
    let mut buf = [0u8; ROWER_DATA_LEN];

    buf[0..2].copy_from_slice(&ROWER_DATA_FLAGS.to_le_bytes());
    buf[2] = clamp_u8(data.spm * 2.0);
    buf[3..5].copy_from_slice(&clamp_u16(data.stroke_count as f64).to_le_bytes());
    buf[5] = clamp_u8(data.avg_spm * 2.0);
    buf[6..9].copy_from_slice(&clamp_u24(data.distance).to_le_bytes()[..3]);
    buf[9..11].copy_from_slice(&clamp_u16(pace(data.inst_speed)).to_le_bytes());
    buf[11..13].copy_from_slice(&clamp_u16(pace(data.avg_speed)).to_le_bytes());
    buf[13..15].copy_from_slice(&clamp_i16(data.inst_power).to_le_bytes());
    buf[15..17].copy_from_slice(&clamp_i16(data.avg_power).to_le_bytes());
    buf[17..19].copy_from_slice(&clamp_u16(data.elapsed_secs(now_ms)).to_le_bytes());

    buf
}

/// How clients may reach a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Pushed to subscribers only; no direct read or write.
    Notify,
    Read,
}

/// `(uuid, access)` for every characteristic of the service, in
/// registration order.
pub const CHARACTERISTICS: [(u16, Access); 2] = [
    (UUID_ROWER_DATA, Access::Notify),
    (UUID_FITNESS_MACHINE_FEATURE, Access::Read),
];

/// Value of the read-only Fitness Machine Feature characteristic.
pub fn feature_value() -> [u8; 4] {
    FTMS_FEATURES.to_le_bytes()
}

/// Outcome of one broadcast round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub unsubscribed: usize,
    pub failed: usize,
}

/// Notify every subscribed client with the current snapshot. A failed send
/// drops this sample for that client only; the next broadcast follows soon.
pub fn notify_rowing_data<C: LinkConnection>(
    connections: &ConnectionManager<C>,
    data: &TelemetryRecord,
    now_ms: u32,
) -> BroadcastReport {
    let payload = encode_rower_data(data, now_ms);
    let mut report = BroadcastReport::default();

    connections.for_each_connection(|conn, subscribed| {
        if !subscribed {
            report.unsubscribed += 1;
            return;
        }
        match conn.notify(UUID_ROWER_DATA, &payload) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                log::debug!("Notify failed for client {}: {}", conn.conn_id(), e);
                report.failed += 1;
            }
        }
    });

    report
}
