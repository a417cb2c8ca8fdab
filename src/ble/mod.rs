// RowMon - Bluetooth LE Fitness Machine Service
//
// The link layer is reached through two small traits so the connection
// bookkeeping and the wire format can run (and be tested) without a radio.
// `esp` binds them to the Bluedroid GATT server on the device; `loopback`
// binds them to an in-memory link for the host replay tool and tests.

pub mod advertising;
pub mod connection;
pub mod ftms;
pub mod loopback;

#[cfg(all(target_os = "espidf", feature = "experimental"))]
pub mod esp;

use crate::error::LinkError;

/// Link-layer connection identifier.
pub type ConnId = u16;

/// One connected client as seen by the link layer.
pub trait LinkConnection: Send + Sync {
    fn conn_id(&self) -> ConnId;

    /// Push `payload` as a notification on the characteristic `uuid`.
    fn notify(&self, uuid: u16, payload: &[u8]) -> Result<(), LinkError>;
}

/// Starts connectable, discoverable advertising.
pub trait Advertiser: Send + Sync {
    fn start_advertising(&self) -> Result<(), LinkError>;
}
