// RowMon - Bridge Task
//
// Session control loop: polls the connection state and pushes telemetry at
// the bridge's own rate.

use std::thread;
use std::time::{Duration, Instant};

use crate::ble::LinkConnection;
use crate::bridge::RowerBridge;
use crate::config::*;

pub fn bridge_task<C: LinkConnection>(mut bridge: RowerBridge<C>) -> ! {
    log::info!("Bridge task started");

    let poll = Duration::from_millis(CONTROL_POLL_INTERVAL_MS);
    loop {
        bridge.tick(Instant::now());
        thread::sleep(poll);
    }
}
