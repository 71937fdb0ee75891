//! Per-operation log2 latency histograms.
//!
//! The table is a fixed grid of `OPERATIONS x BUCKETS` counters. The same
//! layout is used by the in-process table and by the BPF array map, where the
//! counter for a key lives at index `op * BUCKETS + bucket`.

mod atomic;

pub use atomic::{AtomicTable, Cells};

use std::collections::BTreeMap;

/// Number of traced operations.
pub const OPERATIONS: usize = 4;

/// Number of log2 buckets per operation. This covers the full `u64` range.
pub const BUCKETS: usize = 64;

/// Total number of counters in a histogram table.
pub const CELLS: usize = OPERATIONS * BUCKETS;

/// The filesystem operations which are timed. The declaration order is the
/// order sections are rendered in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    Open,
    Read,
    Write,
    Fsync,
}

impl Operation {
    pub const ALL: [Operation; OPERATIONS] = [
        Operation::Open,
        Operation::Read,
        Operation::Write,
        Operation::Fsync,
    ];

    /// Row of this operation in the histogram table. Must match the `OP_*`
    /// constants in the BPF program.
    pub const fn index(self) -> usize {
        match self {
            Self::Open => 0,
            Self::Read => 1,
            Self::Write => 2,
            Self::Fsync => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Read => "read",
            Self::Write => "write",
            Self::Fsync => "fsync",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns the log2 bucket for a value: `floor(log2(value))`, with values
/// below one landing in bucket zero.
pub fn bucket(value: u64) -> usize {
    value.max(1).ilog2() as usize
}

/// Flat index of a key within the table. Out of range buckets are clamped to
/// the last bucket.
pub const fn cell_index(op: Operation, bucket: usize) -> usize {
    let bucket = if bucket < BUCKETS { bucket } else { BUCKETS - 1 };
    op.index() * BUCKETS + bucket
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HistogramKey {
    pub op: Operation,
    pub bucket: usize,
}

impl HistogramKey {
    pub const fn new(op: Operation, bucket: usize) -> Self {
        Self { op, bucket }
    }
}

/// A point-in-time copy of a histogram table. Only non-zero counts are held.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    counts: BTreeMap<HistogramKey, u64>,
}

impl Snapshot {
    /// Builds a snapshot from `(cell index, count)` pairs. Zero counts and
    /// indices outside the table are skipped.
    pub fn from_cells(cells: impl IntoIterator<Item = (usize, u64)>) -> Self {
        let counts = cells
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .filter_map(|(index, count)| {
                let op = Operation::from_index(index / BUCKETS)?;
                Some((HistogramKey::new(op, index % BUCKETS), count))
            })
            .collect();

        Self { counts }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn get(&self, op: Operation, bucket: usize) -> u64 {
        self.counts
            .get(&HistogramKey::new(op, bucket))
            .copied()
            .unwrap_or(0)
    }

    /// Operations with at least one count, in canonical order.
    pub fn operations(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self.counts.keys().map(|k| k.op).collect();
        ops.dedup();
        ops
    }

    /// Non-zero `(bucket, count)` pairs for one operation in ascending bucket
    /// order.
    pub fn buckets(&self, op: Operation) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.counts
            .range(HistogramKey::new(op, 0)..=HistogramKey::new(op, BUCKETS - 1))
            .map(|(key, count)| (key.bucket, *count))
    }

    pub fn total(&self, op: Operation) -> u64 {
        self.buckets(op).map(|(_, count)| count).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HistogramKey, &u64)> {
        self.counts.iter()
    }
}

/// A concurrent counting map from `(operation, bucket)` to a count.
///
/// Increments come from probe handlers on any number of threads. Only the
/// reporting loop reads and clears the table.
pub trait HistogramTable: Send + Sync {
    /// Adds one to the count for the key.
    fn increment(&self, op: Operation, bucket: usize);

    /// Copies the current counts without modifying them.
    fn read(&self) -> Snapshot;

    /// Resets every count to zero.
    fn clear(&self);

    /// Copies and resets the counts. Every increment is observed by exactly
    /// one drain.
    fn drain(&self) -> Snapshot;
}
