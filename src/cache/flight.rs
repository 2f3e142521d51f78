//! Single-flight Module
//!
//! Per-key coordination so that concurrent misses on one key run the
//! producer once inside this process. Followers wait for the leader, then
//! look the key up again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::cache::CacheKey;

#[derive(Debug, Default)]
struct Slot {
    done: Mutex<bool>,
    finished: Condvar,
}

/// Outcome of joining the flight for a key.
#[derive(Debug)]
pub(crate) enum Flight<'a> {
    /// No computation was running; the caller now owns the key until the
    /// guard drops.
    Leader(FlightGuard<'a>),
    /// Another caller's computation finished while we waited.
    Followed,
    /// The bounded wait elapsed with the leader still running.
    TimedOut,
}

// == Flight Group ==
#[derive(Debug, Default)]
pub(crate) struct FlightGroup {
    slots: Mutex<HashMap<CacheKey, Arc<Slot>>>,
    /// Bumped every time a leader finishes
    epoch: AtomicU64,
}

impl FlightGroup {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of flights that have completed so far. A caller that sees the
    /// same epoch before its lookup and after taking leadership knows no
    /// other flight stored anything in between.
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Becomes leader for `key`, or waits (at most `timeout`) for the
    /// current leader to finish.
    pub(crate) fn join(&self, key: &CacheKey, timeout: Option<Duration>) -> Flight<'_> {
        let slot = {
            let mut slots = self.slots.lock();
            match slots.get(key) {
                Some(slot) => Arc::clone(slot),
                None => {
                    let slot = Arc::new(Slot::default());
                    slots.insert(*key, Arc::clone(&slot));
                    return Flight::Leader(FlightGuard {
                        group: self,
                        key: *key,
                        slot,
                    });
                }
            }
        };

        let mut done = slot.done.lock();
        match timeout {
            None => {
                while !*done {
                    slot.finished.wait(&mut done);
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !*done {
                    if slot.finished.wait_until(&mut done, deadline).timed_out() && !*done {
                        return Flight::TimedOut;
                    }
                }
            }
        }
        Flight::Followed
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.slots.lock().len()
    }
}

// == Flight Guard ==
/// Leadership of one key; dropping it (also on panic) wakes the followers.
#[derive(Debug)]
pub(crate) struct FlightGuard<'a> {
    group: &'a FlightGroup,
    key: CacheKey,
    slot: Arc<Slot>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.group.epoch.fetch_add(1, Ordering::AcqRel);
        {
            let mut slots = self.group.slots.lock();
            if slots
                .get(&self.key)
                .is_some_and(|slot| Arc::ptr_eq(slot, &self.slot))
            {
                slots.remove(&self.key);
            }
        }
        *self.slot.done.lock() = true;
        self.slot.finished.notify_all();
    }
}
