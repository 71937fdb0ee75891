use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default capacity, matching the size of the in-kernel `start` hash map.
pub const MAX_ENTRIES: usize = 10240;

const SHARDS: usize = 16;

/// Start timestamps of in-flight operations keyed by thread id.
///
/// The table is sharded by thread id so that handlers running on different
/// CPUs rarely contend on the same lock. The capacity bounds the whole table:
/// inserting a new thread once `capacity` threads are live fails just as an
/// update to a full BPF hash map does.
pub struct StartTimes {
    shards: Box<[Mutex<HashMap<u32, u64>>]>,
    capacity: usize,
    live: AtomicUsize,
}

impl StartTimes {
    pub fn new(capacity: usize) -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            capacity,
            live: AtomicUsize::new(0),
        }
    }

    fn shard(&self, tid: u32) -> &Mutex<HashMap<u32, u64>> {
        &self.shards[tid as usize % SHARDS]
    }

    /// Records the start time for a thread, replacing any earlier value.
    /// Returns false if the thread had no entry and there is no room for one.
    pub fn insert(&self, tid: u32, timestamp: u64) -> bool {
        let mut shard = self.shard(tid).lock();

        if let Some(start) = shard.get_mut(&tid) {
            *start = timestamp;
            return true;
        }

        // reserve a slot before inserting, released again by `take`
        let reserved = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.capacity).then_some(live + 1)
            })
            .is_ok();

        if reserved {
            shard.insert(tid, timestamp);
        }

        reserved
    }

    /// Removes and returns the start time for a thread.
    pub fn take(&self, tid: u32) -> Option<u64> {
        let start = self.shard(tid).lock().remove(&tid)?;
        self.live.fetch_sub(1, Ordering::AcqRel);
        Some(start)
    }

    pub fn contains(&self, tid: u32) -> bool {
        self.shard(tid).lock().contains_key(&tid)
    }

    pub fn len(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StartTimes {
    fn default() -> Self {
        Self::new(MAX_ENTRIES)
    }
}
