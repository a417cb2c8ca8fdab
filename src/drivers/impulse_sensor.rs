// RowMon - Flywheel Impulse Sensor Driver
//
// Reed switch / hall sensor on a GPIO with pull-up, one falling edge per
// magnet pass. The interrupt handler only latches the edge and wakes the
// waiting task; the interval math runs in task context.

use std::num::NonZeroU32;
use std::sync::Arc;

use esp_idf_hal::delay::BLOCK;
use esp_idf_hal::gpio::{AnyIOPin, Input, InterruptType, PinDriver, Pull};
use esp_idf_hal::sys::{gpio_intr_enable, EspError};
use esp_idf_hal::task::notification::Notification;

use crate::impulse::EdgeLatch;

pub struct ImpulseSensor<'d> {
    _pin: PinDriver<'d, AnyIOPin, Input>,
    notification: Notification,
    latch: Arc<EdgeLatch>,
}

impl<'d> ImpulseSensor<'d> {
    pub fn new(pin: AnyIOPin) -> Result<Self, EspError> {
        let mut pin = PinDriver::input(pin)?;
        pin.set_pull(Pull::Up)?;
        pin.set_interrupt_type(InterruptType::NegEdge)?;

        let notification = Notification::new();
        let notifier = notification.notifier();
        let latch = Arc::new(EdgeLatch::default());
        let isr_latch = Arc::clone(&latch);
        let gpio = pin.pin();

        // SAFETY: the callback makes ISR-safe calls only.
        unsafe {
            pin.subscribe(move || {
                isr_latch.record(crate::now_us());
                // The HAL disarms the pin before calling us. Re-arm so edges
                // before the task wakes are still counted.
                gpio_intr_enable(gpio);
                notifier.notify_and_yield(NonZeroU32::MIN);
            })?;
        }
        pin.enable_interrupt()?;

        Ok(Self { _pin: pin, notification, latch })
    }

    /// Block until at least one edge arrived and return how many edges came
    /// in since the last call together with the newest timestamp (us since
    /// boot).
    pub fn wait_edges(&mut self) -> (u32, u64) {
        loop {
            self.notification.wait(BLOCK);
            if let Some(edges) = self.latch.take() {
                return edges;
            }
        }
    }
}
