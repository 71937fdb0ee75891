use super::*;

use std::sync::atomic::{AtomicU64, Ordering};

/// Storage for a histogram table as a flat slice of atomic counters laid out
/// by `cell_index`. Anything which can lend out such a slice is a
/// `HistogramTable`.
pub trait Cells: Send + Sync {
    fn cells(&self) -> &[AtomicU64];
}

impl<T: Cells> HistogramTable for T {
    fn increment(&self, op: Operation, bucket: usize) {
        if let Some(cell) = self.cells().get(cell_index(op, bucket)) {
            cell.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn read(&self) -> Snapshot {
        Snapshot::from_cells(
            self.cells()
                .iter()
                .enumerate()
                .map(|(index, cell)| (index, cell.load(Ordering::Relaxed))),
        )
    }

    fn clear(&self) {
        for cell in self.cells() {
            cell.store(0, Ordering::Relaxed);
        }
    }

    fn drain(&self) -> Snapshot {
        // swapping each cell means a racing increment lands either before the
        // swap (this snapshot) or after it (the next one)
        Snapshot::from_cells(
            self.cells()
                .iter()
                .enumerate()
                .map(|(index, cell)| (index, cell.swap(0, Ordering::Relaxed))),
        )
    }
}

/// An in-process histogram table backed by heap allocated atomics.
pub struct AtomicTable {
    cells: Box<[AtomicU64]>,
}

impl AtomicTable {
    pub fn new() -> Self {
        Self {
            cells: (0..CELLS).map(|_| AtomicU64::new(0)).collect(),
        }
    }
}

impl Default for AtomicTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Cells for AtomicTable {
    fn cells(&self) -> &[AtomicU64] {
        &self.cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn increment_read_clear() {
        let table = AtomicTable::new();

        for _ in 0..5 {
            table.increment(Operation::Read, 4);
        }

        assert_eq!(table.read().get(Operation::Read, 4), 5);
        // reading is not destructive
        assert_eq!(table.read().get(Operation::Read, 4), 5);

        table.clear();
        assert!(table.read().is_empty());

        table.increment(Operation::Read, 4);
        assert_eq!(table.read().get(Operation::Read, 4), 1);
    }

    #[test]
    fn drain_resets_counts() {
        let table = AtomicTable::new();
        table.increment(Operation::Open, 0);
        table.increment(Operation::Fsync, 10);

        let drained = table.drain();
        assert_eq!(drained.get(Operation::Open, 0), 1);
        assert_eq!(drained.get(Operation::Fsync, 10), 1);
        assert!(table.read().is_empty());
        assert!(table.drain().is_empty());
    }

    #[test]
    fn out_of_range_bucket_is_clamped() {
        let table = AtomicTable::new();
        table.increment(Operation::Write, 1000);
        assert_eq!(table.read().get(Operation::Write, BUCKETS - 1), 1);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let table = Arc::new(AtomicTable::new());
        let threads = 8;
        let per_thread = 10_000;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let table = table.clone();
                std::thread::spawn(move || {
                    for i in 0..per_thread {
                        table.increment(Operation::Write, 3);
                        table.increment(Operation::ALL[(t + i) % OPERATIONS], 7);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = table.read();
        assert_eq!(snapshot.get(Operation::Write, 3), (threads * per_thread) as u64);

        let sevens: u64 = Operation::ALL.iter().map(|op| snapshot.get(*op, 7)).sum();
        assert_eq!(sevens, (threads * per_thread) as u64);
    }

    #[test]
    fn drain_during_increments_loses_nothing() {
        let table = Arc::new(AtomicTable::new());
        let total = 50_000u64;

        let writer = {
            let table = table.clone();
            std::thread::spawn(move || {
                for _ in 0..total {
                    table.increment(Operation::Read, 1);
                }
            })
        };

        let mut seen = 0;
        while !writer.is_finished() {
            seen += table.drain().get(Operation::Read, 1);
        }
        writer.join().unwrap();
        seen += table.drain().get(Operation::Read, 1);

        assert_eq!(seen, total);
    }
}
