//! Condition registry and the get-when primitive (spec.md §4.4).
//!
//! A `ConditionSlot` lives inside the `DataShard` that owns the watched
//! key, so every membership change and every signal happens while that
//! shard's `RwLock` is write-locked — exactly as spec.md requires.
//! parking_lot's `Condvar` only pairs with its own `Mutex`, so the
//! *blocking wait* itself cannot park directly on the shard's
//! `RwLockWriteGuard`; each slot therefore also carries a small
//! `Mutex<()>`/`Condvar` pair used purely as the parking primitive
//! (DESIGN.md has the full rationale).

use super::{shard_index, DataShard, Store};
use crate::proto::{types, Demux};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::proto::wire::PayloadWriter;

pub struct ConditionSlot {
    waiting_tags: VecDeque<i32>,
    notify: Arc<(Mutex<()>, Condvar)>,
}

impl ConditionSlot {
    fn new() -> Self {
        Self {
            waiting_tags: VecDeque::new(),
            notify: Arc::new((Mutex::new(()), Condvar::new())),
        }
    }

    fn register(&mut self, tag: i32) {
        self.waiting_tags.push_back(tag);
    }

    fn pop_front(&mut self) -> Option<i32> {
        self.waiting_tags.pop_front()
    }

    fn notify_handle(&self) -> Arc<(Mutex<()>, Condvar)> {
        self.notify.clone()
    }

    /// Invoked under the owning shard's write lock, after a write.
    fn signal(&self) {
        self.notify.1.notify_all();
    }
}

/// Invoked under the write lock of the shard owning `key`, right after
/// a write lands. No-op if nobody has ever registered a wait on `key`.
pub(super) fn notify_if_present(shard: &mut DataShard, key: &str) {
    if let Some(slot) = shard.conditions.get(key) {
        slot.signal();
    }
}

/// Result of a get-when call's synchronous phase.
pub enum GetWhenOutcome {
    /// Resolved immediately; reply with `tag` and `value` (`None` = absent).
    Immediate { tag: i32, value: Option<Vec<u8>> },
    /// No tag was satisfied synchronously; a background waiter is now
    /// running and will reply (or abandon) later.
    Deferred,
}

impl Store {
    /// spec.md §4.4: two-phase get-when.
    pub fn get_when(
        self: &Arc<Self>,
        key_target: &str,
        key_cond: &str,
        value_cond: &[u8],
        tag: i32,
        demux: Demux,
        cancelled: Arc<AtomicBool>,
    ) -> GetWhenOutcome {
        let cond_idx = shard_index(key_cond, self.data_shards.len());

        let (resolved, wait_handle) = {
            let mut shard = self.data_shards[cond_idx].write();
            let slot = shard
                .conditions
                .entry(key_cond.to_string())
                .or_insert_with(ConditionSlot::new);
            slot.register(tag);

            let satisfied = shard.data.get(key_cond).map(|v| v.as_slice()) == Some(value_cond);
            if satisfied {
                let popped = shard.conditions.get_mut(key_cond).and_then(|s| s.pop_front());
                (popped, None)
            } else {
                let handle = shard
                    .conditions
                    .get(key_cond)
                    .expect("just inserted")
                    .notify_handle();
                (None, Some(handle))
            }
        };

        if let Some(popped_tag) = resolved {
            let target_idx = shard_index(key_target, self.data_shards.len());
            let value = self.data_shards[target_idx].read().data.get(key_target).cloned();
            return GetWhenOutcome::Immediate {
                tag: popped_tag,
                value,
            };
        }

        let wait_handle = wait_handle.expect("deferred path always yields a wait handle");
        spawn_waiter(
            self.clone(),
            key_target.to_string(),
            key_cond.to_string(),
            value_cond.to_vec(),
            cond_idx,
            wait_handle,
            demux,
            cancelled,
        );
        GetWhenOutcome::Deferred
    }
}

/// Background waiter bound to one session. Blocks a dedicated OS thread
/// until the predicate holds or the session tears down.
fn spawn_waiter(
    store: Arc<Store>,
    key_target: String,
    key_cond: String,
    value_cond: Vec<u8>,
    cond_idx: usize,
    mut wait_handle: Arc<(Mutex<()>, Condvar)>,
    demux: Demux,
    cancelled: Arc<AtomicBool>,
) {
    let rt = tokio::runtime::Handle::current();
    tokio::task::spawn_blocking(move || loop {
        if cancelled.load(Ordering::Relaxed) || demux.is_closed() {
            return; // ABANDONED: must not send.
        }

        let popped_tag = {
            let mut shard = store.data_shards[cond_idx].write();
            let satisfied =
                shard.data.get(&key_cond).map(|v| v.as_slice()) == Some(value_cond.as_slice());
            let popped = satisfied
                .then(|| shard.conditions.get_mut(&key_cond).and_then(|s| s.pop_front()))
                .flatten();

            match popped {
                Some(t) => t,
                None => {
                    // Either not yet satisfied, or satisfied but the head
                    // tag was already claimed by another resolver — park
                    // again and re-check on the next signal.
                    wait_handle = shard
                        .conditions
                        .get(&key_cond)
                        .map(|s| s.notify_handle())
                        .unwrap_or(wait_handle);
                    drop(shard);
                    let mut guard = wait_handle.0.lock();
                    wait_handle.1.wait_for(&mut guard, Duration::from_millis(200));
                    continue;
                }
            }
        };

        // Fetch the target value only after releasing the condition
        // shard's write lock (spec.md §9).
        let target_idx = shard_index(&key_target, store.data_shards.len());
        let fetched = store.data_shards[target_idx].read().data.get(&key_target).cloned();

        let mut payload = Vec::new();
        match &fetched {
            Some(bytes) => payload.write_bytes32(bytes),
            None => payload.write_i32(0),
        }

        if cancelled.load(Ordering::Relaxed) {
            return;
        }
        let _ = rt.block_on(demux.send(popped_tag, types::GET_WHEN, &payload));
        return;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::read_frame;
    use crate::proto::wire::PayloadReader;
    use std::sync::atomic::AtomicBool;
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn slot_fifo_registers_and_pops_in_order() {
        let mut slot = ConditionSlot::new();
        slot.register(1);
        slot.register(2);
        assert_eq!(slot.pop_front(), Some(1));
        assert_eq!(slot.pop_front(), Some(2));
        assert_eq!(slot.pop_front(), None);
    }

    /// Demonstrates the documented FIFO tag-stealing quirk (DESIGN.md's
    /// `store/conditions.rs` entry, spec.md §4.4 "Tag accounting"): a
    /// waiter registered first on a `key_cond` still owns the head of
    /// that key's tag queue even after a *different*, later-registered
    /// waiter is the one whose own predicate becomes satisfied. The
    /// later waiter's background task pops and replies under the
    /// earlier waiter's tag, carrying the later waiter's own
    /// `key_target` value — not the earlier waiter's.
    #[tokio::test]
    async fn fifo_queue_can_steal_a_reply_for_a_different_waiters_tag() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_socket, _) = listener.accept().await.unwrap();

        let (mut client_read, _client_write) = client.into_split();
        let (_server_read, server_write) = server_socket.into_split();
        let demux = Demux::new(server_write);

        let store = Arc::new(Store::new(1, 1));
        let cancelled = Arc::new(AtomicBool::new(false));

        // Registered first, wants `cond == "Y"` — never satisfied below.
        let outcome1 = store.get_when("target_a", "cond", b"Y", 1, demux.clone(), cancelled.clone());
        assert!(matches!(outcome1, GetWhenOutcome::Deferred));

        // Registered second, wants `cond == "X"`.
        let outcome2 = store.get_when("target_b", "cond", b"X", 2, demux.clone(), cancelled.clone());
        assert!(matches!(outcome2, GetWhenOutcome::Deferred));

        store.put("target_b", b"B-VALUE".to_vec());
        // Satisfies tag 2's predicate, not tag 1's.
        store.put("cond", b"X".to_vec());

        let frame = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut client_read))
            .await
            .expect("a reply should arrive")
            .unwrap()
            .unwrap();
        assert_eq!(
            frame.tag, 1,
            "the reply is tagged for tag 1, the earlier-registered and still-unsatisfied waiter"
        );
        let mut reader = PayloadReader::new(&frame.payload);
        assert_eq!(
            reader.read_bytes32().unwrap(),
            b"B-VALUE",
            "but carries tag 2's own key_target value, not tag 1's"
        );

        // Let tag 1's still-parked background waiter exit cleanly.
        cancelled.store(true, Ordering::Relaxed);
    }
}
