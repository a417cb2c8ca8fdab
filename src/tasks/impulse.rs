// RowMon - Impulse Task
//
// Highest-priority task: turns sensor edges into queued intervals. The
// sensor is created here because the edge notification wakes the task that
// set it up.

use std::sync::Arc;

use esp_idf_hal::gpio::AnyIOPin;

use crate::drivers::impulse_sensor::ImpulseSensor;
use crate::impulse::ImpulseProducer;

/// Runs until sensor setup fails. Edge bursts the task could not keep up
/// with are counted as dropped by the producer.
pub fn impulse_task(pin: AnyIOPin, producer: Arc<ImpulseProducer>) {
    log::info!("Impulse task started");

    let mut sensor = match ImpulseSensor::new(pin) {
        Ok(sensor) => sensor,
        Err(e) => {
            log::error!("Impulse sensor init failed: {}", e);
            return;
        }
    };

    loop {
        let (edges, timestamp_us) = sensor.wait_edges();
        producer.on_edges(edges, timestamp_us);
    }
}
