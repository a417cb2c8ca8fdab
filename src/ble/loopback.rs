// RowMon - Loopback Link
//
// In-memory stand-in for the radio: connections keep every payload they were
// sent, the advertiser only counts restarts. Used by the host replay tool
// and by tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::ble::{Advertiser, ConnId, LinkConnection};
use crate::error::LinkError;

pub struct LoopbackConnection {
    id: ConnId,
    congested: AtomicBool,
    sent: Mutex<Vec<(u16, Vec<u8>)>>,
}

impl LoopbackConnection {
    pub fn new(id: ConnId) -> Self {
        Self {
            id,
            congested: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Make every following notify fail as if the link were congested.
    pub fn set_congested(&self, congested: bool) {
        self.congested.store(congested, Ordering::Relaxed);
    }

    /// Payloads received so far, oldest first.
    pub fn received(&self) -> Vec<(u16, Vec<u8>)> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl LinkConnection for LoopbackConnection {
    fn conn_id(&self) -> ConnId {
        self.id
    }

    fn notify(&self, uuid: u16, payload: &[u8]) -> Result<(), LinkError> {
        if self.congested.load(Ordering::Relaxed) {
            return Err(LinkError::Congested);
        }
        log::debug!("conn {} <- {:04X}: {:02X?}", self.id, uuid, payload);
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((uuid, payload.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
pub struct LoopbackAdvertiser {
    starts: AtomicU32,
}

impl LoopbackAdvertiser {
    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }
}

impl Advertiser for LoopbackAdvertiser {
    fn start_advertising(&self) -> Result<(), LinkError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
