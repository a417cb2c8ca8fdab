// RowMon - Advertising Restart Scheduler
//
// After a connect the link layer needs a moment to settle before advertising
// can be restarted, so the restart is deferred. A newer connect/disconnect
// replaces or cancels a restart that has not fired yet.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::ble::Advertiser;
use crate::config::STACK_ADVERTISING;

pub struct AdvertisingScheduler {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

struct Shared {
    advertiser: Arc<dyn Advertiser>,
    state: Mutex<State>,
    wake: Condvar,
}

#[derive(Default)]
struct State {
    deadline: Option<Instant>,
    shutdown: bool,
}

impl AdvertisingScheduler {
    pub fn spawn(advertiser: Arc<dyn Advertiser>) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            advertiser,
            state: Mutex::new(State::default()),
            wake: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("adv".into())
            .stack_size(STACK_ADVERTISING)
            .spawn(move || worker_shared.run())?;

        Ok(Self { shared, worker: Some(worker) })
    }

    /// Restart advertising after `delay`, replacing any pending restart.
    pub fn schedule(&self, delay: Duration) {
        self.shared.lock().deadline = Some(Instant::now() + delay);
        self.shared.wake.notify_one();
    }

    /// Drop a pending restart, if any.
    pub fn cancel(&self) {
        self.shared.lock().deadline = None;
        self.shared.wake.notify_one();
    }

    /// Cancel any pending restart and advertise right away.
    pub fn start_now(&self) {
        self.cancel();
        self.shared.start();
    }

    #[cfg(test)]
    fn is_pending(&self) -> bool {
        self.shared.lock().deadline.is_some()
    }
}

impl Drop for AdvertisingScheduler {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_one();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(&self) {
        match self.advertiser.start_advertising() {
            Ok(()) => log::info!("Advertising started"),
            Err(e) => log::error!("{}", e),
        }
    }

    fn run(&self) {
        let mut state = self.lock();
        loop {
            if state.shutdown {
                return;
            }
            let deadline = state.deadline;
            match deadline {
                None => {
                    state = self.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.deadline = None;
                        drop(state);
                        self.start();
                        state = self.lock();
                    } else {
                        state = self
                            .wake
                            .wait_timeout(state, deadline - now)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::loopback::LoopbackAdvertiser;

    fn scheduler() -> (Arc<LoopbackAdvertiser>, AdvertisingScheduler) {
        let advertiser = Arc::new(LoopbackAdvertiser::default());
        let scheduler = AdvertisingScheduler::spawn(advertiser.clone()).unwrap();
        (advertiser, scheduler)
    }

    #[test]
    fn scheduled_restart_fires_after_delay() {
        let (advertiser, scheduler) = scheduler();
        scheduler.schedule(Duration::from_millis(20));
        assert_eq!(advertiser.starts(), 0);
        assert!(scheduler.is_pending());

        thread::sleep(Duration::from_millis(200));
        assert_eq!(advertiser.starts(), 1);
        assert!(!scheduler.is_pending());
    }

    #[test]
    fn cancel_prevents_restart() {
        let (advertiser, scheduler) = scheduler();
        scheduler.schedule(Duration::from_millis(30));
        scheduler.cancel();

        thread::sleep(Duration::from_millis(150));
        assert_eq!(advertiser.starts(), 0);
    }

    #[test]
    fn reschedule_replaces_pending_restart() {
        let (advertiser, scheduler) = scheduler();
        scheduler.schedule(Duration::from_millis(30));
        scheduler.schedule(Duration::from_millis(40));

        thread::sleep(Duration::from_millis(250));
        assert_eq!(advertiser.starts(), 1);
    }

    #[test]
    fn start_now_supersedes_pending() {
        let (advertiser, scheduler) = scheduler();
        scheduler.schedule(Duration::from_millis(30));
        scheduler.start_now();
        assert_eq!(advertiser.starts(), 1);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(advertiser.starts(), 1);
    }
}
