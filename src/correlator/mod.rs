//! Entry/return correlation for probed kernel functions.
//!
//! An entry handler stores a start timestamp for the current thread. The
//! matching return handler consumes it, converts the elapsed time to the
//! display unit and records it in the histogram table. Nothing here can fail:
//! filtered calls, missing start records and clock anomalies are counted and
//! dropped.

mod start;

pub use start::{StartTimes, MAX_ENTRIES};

use crate::common::{Clock, DisplayUnit};
use crate::histogram::{bucket, HistogramTable, Operation};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What a probe handler knows about the call that triggered it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    /// Process id (thread group id) of the calling thread.
    pub tgid: u32,
    /// Thread id of the calling thread.
    pub tid: u32,
    /// Address of the operation table bound to the file being read. Only
    /// available to the read entry handler on the generic path.
    pub file_ops: Option<u64>,
}

impl EventContext {
    pub fn new(tgid: u32, tid: u32) -> Self {
        Self {
            tgid,
            tid,
            file_ops: None,
        }
    }

    /// Splits a `bpf_get_current_pid_tgid()` style value.
    pub fn from_pid_tgid(pid_tgid: u64) -> Self {
        Self::new((pid_tgid >> 32) as u32, pid_tgid as u32)
    }

    pub fn with_file_ops(mut self, file_ops: u64) -> Self {
        self.file_ops = Some(file_ops);
        self
    }
}

/// Filters applied by the entry handlers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Filter {
    /// Only time calls made by this process.
    pub tgid: Option<u32>,
    /// Only time reads of files bound to this operation table.
    pub file_ops: Option<u64>,
}

/// Counts of events which were discarded.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DropCounts {
    /// Entries rejected by the process or operation table filter.
    pub filtered: u64,
    /// Returns with no recorded start time.
    pub missed_start: u64,
    /// Returns which computed a negative elapsed time.
    pub negative: u64,
    /// Entries which could not be stored because the start table was full.
    pub table_full: u64,
}

impl std::fmt::Display for DropCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "filtered: {} missed start: {} negative: {} table full: {}",
            self.filtered, self.missed_start, self.negative, self.table_full
        )
    }
}

#[derive(Default)]
struct Drops {
    filtered: AtomicU64,
    missed_start: AtomicU64,
    negative: AtomicU64,
    table_full: AtomicU64,
}

impl Drops {
    fn counts(&self) -> DropCounts {
        DropCounts {
            filtered: self.filtered.load(Ordering::Relaxed),
            missed_start: self.missed_start.load(Ordering::Relaxed),
            negative: self.negative.load(Ordering::Relaxed),
            table_full: self.table_full.load(Ordering::Relaxed),
        }
    }
}

pub struct Correlator {
    filter: Filter,
    unit: DisplayUnit,
    starts: StartTimes,
    table: Arc<dyn HistogramTable>,
    clock: Arc<dyn Clock>,
    drops: Drops,
}

impl Correlator {
    pub fn new(
        filter: Filter,
        unit: DisplayUnit,
        table: Arc<dyn HistogramTable>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            filter,
            unit,
            starts: StartTimes::default(),
            table,
            clock,
            drops: Drops::default(),
        }
    }

    pub fn starts(&self) -> &StartTimes {
        &self.starts
    }

    pub fn drops(&self) -> DropCounts {
        self.drops.counts()
    }

    /// Entry handler for open, write, fsync and the dedicated read function.
    pub fn on_entry(&self, ctx: &EventContext) {
        if !self.admit(ctx) {
            self.drops.filtered.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.record_start(ctx);
    }

    /// Entry handler for the generic read function, which is shared by every
    /// filesystem. Calls on files bound to another operation table are
    /// ignored.
    pub fn on_read_entry(&self, ctx: &EventContext) {
        if !self.admit(ctx) {
            self.drops.filtered.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if let Some(file_ops) = self.filter.file_ops {
            if ctx.file_ops != Some(file_ops) {
                self.drops.filtered.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        self.record_start(ctx);
    }

    /// Return handler shared by all operations.
    pub fn on_return(&self, ctx: &EventContext, op: Operation) {
        let Some(start) = self.starts.take(ctx.tid) else {
            self.drops.missed_start.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let delta = self.clock.now().wrapping_sub(start) as i64;

        if delta < 0 {
            self.drops.negative.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let value = self.unit.convert(delta as u64);

        self.table.increment(op, bucket(value));
    }

    fn admit(&self, ctx: &EventContext) -> bool {
        self.filter.tgid.map_or(true, |tgid| tgid == ctx.tgid)
    }

    fn record_start(&self, ctx: &EventContext) {
        if !self.starts.insert(ctx.tid, self.clock.now()) {
            self.drops.table_full.fetch_add(1, Ordering::Relaxed);
        }
    }
}
