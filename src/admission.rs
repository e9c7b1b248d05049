//! Process-wide admission control (spec.md §4.6): bounds the number of
//! concurrent client sessions and serves as the teardown rendezvous.

use parking_lot::Mutex;
use tokio::sync::Notify;

pub struct Admission {
    active: Mutex<usize>,
    max: usize,
    notify: Notify,
}

impl Admission {
    pub fn new(max: usize) -> Self {
        Self {
            active: Mutex::new(0),
            max,
            notify: Notify::new(),
        }
    }

    /// Waits while `active >= max`, then admits one session.
    pub async fn acquire(&self) {
        loop {
            {
                let mut active = self.active.lock();
                if *active < self.max {
                    *active += 1;
                    return;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Releases one session's slot and wakes a waiter, if any.
    pub fn release(&self) {
        {
            let mut active = self.active.lock();
            *active = active.saturating_sub(1);
        }
        self.notify.notify_one();
    }

    pub fn active(&self) -> usize {
        *self.active.lock()
    }
}
