// RowMon - Connection Manager
//
// Fixed table of client slots. Each occupied slot owns one reference to the
// link connection plus the client's notify subscription. Link callbacks only
// touch this table, never the physics lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::ble::advertising::AdvertisingScheduler;
use crate::ble::{Advertiser, ConnId, LinkConnection};
use crate::config::MAX_CONNECTIONS;

struct Slot<C> {
    conn: Arc<C>,
    subscribed: bool,
}

struct SlotTable<C> {
    slots: [Option<Slot<C>>; MAX_CONNECTIONS],
    active: usize,
}

impl<C: LinkConnection> SlotTable<C> {
    fn position(&self, id: ConnId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.conn.conn_id() == id))
    }
}

pub struct ConnectionManager<C> {
    table: Mutex<SlotTable<C>>,
    advertising: AdvertisingScheduler,
    restart_delay: Duration,
}

impl<C: LinkConnection> ConnectionManager<C> {
    /// `restart_delay` is how long to wait after a connect before advertising
    /// again for the next client.
    pub fn new(advertiser: Arc<dyn Advertiser>, restart_delay: Duration) -> std::io::Result<Self> {
        Ok(Self {
            table: Mutex::new(SlotTable {
                slots: std::array::from_fn(|_| None),
                active: 0,
            }),
            advertising: AdvertisingScheduler::spawn(advertiser)?,
            restart_delay,
        })
    }

    /// Begin advertising at boot.
    pub fn start_advertising(&self) {
        self.advertising.start_now();
    }

    pub fn on_connected(&self, conn: Arc<C>) {
        let id = conn.conn_id();
        let slots_left = {
            let mut table = self.lock();
            if table.position(id).is_some() {
                log::warn!("Connection {} already tracked", id);
                return;
            }
            let Some(free) = table.slots.iter().position(Option::is_none) else {
                // The link layer enforces its own ceiling; nothing to track.
                log::warn!("Connection table full, connection {} not tracked", id);
                return;
            };
            table.slots[free] = Some(Slot { conn, subscribed: false });
            table.active += 1;
            log::info!("Connected: {} ({}/{})", id, table.active, MAX_CONNECTIONS);
            table.active < MAX_CONNECTIONS
        };

        if slots_left {
            self.advertising.schedule(self.restart_delay);
        } else {
            self.advertising.cancel();
        }
    }

    pub fn on_disconnected(&self, id: ConnId) {
        {
            let mut table = self.lock();
            if let Some(index) = table.position(id) {
                table.slots[index] = None;
                table.active = table.active.saturating_sub(1);
                log::info!("Disconnected: {} ({}/{})", id, table.active, MAX_CONNECTIONS);
            }
        }
        // The link is idle again, no settling needed.
        self.advertising.start_now();
    }

    /// Record a client's CCCD write. Returns `false` for an untracked client.
    pub fn set_subscribed(&self, id: ConnId, subscribed: bool) -> bool {
        let mut table = self.lock();
        let Some(index) = table.position(id) else {
            return false;
        };
        if let Some(slot) = table.slots[index].as_mut() {
            slot.subscribed = subscribed;
        }
        log::info!(
            "Client {} changed notifications to: {}",
            id,
            if subscribed { "ENABLED" } else { "DISABLED" }
        );
        true
    }

    pub fn is_connected(&self) -> bool {
        self.lock().active > 0
    }

    pub fn active_count(&self) -> usize {
        self.lock().active
    }

    /// Run `action(conn, subscribed)` for every tracked client without
    /// holding the table lock. Each connection is kept alive for the duration
    /// of the call even if it disconnects meanwhile.
    pub fn for_each_connection(&self, mut action: impl FnMut(&C, bool)) {
        let held: [Option<(Arc<C>, bool)>; MAX_CONNECTIONS] = {
            let table = self.lock();
            std::array::from_fn(|i| {
                table.slots[i]
                    .as_ref()
                    .map(|slot| (Arc::clone(&slot.conn), slot.subscribed))
            })
        };

        for (conn, subscribed) in held.iter().flatten() {
            action(conn, *subscribed);
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotTable<C>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
