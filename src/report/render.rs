//! Text rendering of log2 histograms.

use crate::common::DisplayUnit;
use crate::histogram::{Operation, Snapshot, BUCKETS};

use std::fmt::Write;

const BAR_WIDTH: usize = 40;

// from this bucket on the ranges no longer fit in the narrow columns
const NARROW_BUCKETS: usize = 32;

/// Lowest value counted in a bucket.
pub fn bucket_low(bucket: usize) -> u64 {
    if bucket == 0 {
        0
    } else {
        1 << bucket.min(BUCKETS - 1)
    }
}

/// Highest value counted in a bucket.
pub fn bucket_high(bucket: usize) -> u64 {
    u64::MAX >> (BUCKETS - 1 - bucket.min(BUCKETS - 1))
}

fn bar(count: u64, max: u64, width: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let stars = (width as u128 * count as u128 / max as u128).min(width as u128);
    "*".repeat(stars as usize)
}

/// Appends one `operation = <op>` section for `op` to `out`. Empty
/// operations render nothing.
pub fn section(out: &mut String, snapshot: &Snapshot, op: Operation, unit: DisplayUnit) {
    let mut buckets = [0u64; BUCKETS];
    for (bucket, count) in snapshot.buckets(op) {
        buckets[bucket] = count;
    }

    let Some(highest) = buckets.iter().rposition(|count| *count > 0) else {
        return;
    };

    let max = buckets[..=highest].iter().copied().max().unwrap_or(0);

    let _ = writeln!(out, "\noperation = {op}");

    if highest < NARROW_BUCKETS {
        let _ = writeln!(out, "     {:<19} : count     distribution", unit.label());
    } else {
        let _ = writeln!(
            out,
            "               {:<29} : count     distribution",
            unit.label()
        );
    }

    for (bucket, count) in buckets.iter().enumerate().take(highest + 1) {
        let low = bucket_low(bucket);
        let high = bucket_high(bucket);

        if highest < NARROW_BUCKETS {
            let _ = writeln!(
                out,
                "{low:>10} -> {high:<10} : {count:<8} |{:<width$}|",
                bar(*count, max, BAR_WIDTH),
                width = BAR_WIDTH
            );
        } else {
            let _ = writeln!(
                out,
                "{low:>20} -> {high:<20} : {count:<8} |{:<width$}|",
                bar(*count, max, BAR_WIDTH / 2),
                width = BAR_WIDTH / 2
            );
        }
    }
}

/// Renders every operation present in the snapshot, in canonical order.
pub fn histograms(out: &mut String, snapshot: &Snapshot, unit: DisplayUnit) {
    for op in snapshot.operations() {
        section(out, snapshot, op, unit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::{AtomicTable, HistogramTable};

    fn snapshot(entries: &[(Operation, usize, u64)]) -> Snapshot {
        let table = AtomicTable::new();
        for (op, bucket, count) in entries {
            for _ in 0..*count {
                table.increment(*op, *bucket);
            }
        }
        table.read()
    }

    #[test]
    fn ranges() {
        assert_eq!((bucket_low(0), bucket_high(0)), (0, 1));
        assert_eq!((bucket_low(1), bucket_high(1)), (2, 3));
        assert_eq!((bucket_low(4), bucket_high(4)), (16, 31));
        assert_eq!(bucket_high(63), u64::MAX);
        assert_eq!(bucket_low(63), 1 << 63);
    }

    #[test]
    fn bars() {
        assert_eq!(bar(0, 10, 40), "");
        assert_eq!(bar(10, 10, 40), "*".repeat(40));
        assert_eq!(bar(5, 10, 40), "*".repeat(20));
        // rounds down
        assert_eq!(bar(1, 3, 40), "*".repeat(13));
        assert_eq!(bar(u64::MAX, u64::MAX, 40).len(), 40);
    }

    #[test]
    fn narrow_layout() {
        let snapshot = snapshot(&[(Operation::Read, 4, 3), (Operation::Read, 2, 1)]);

        let mut out = String::new();
        histograms(&mut out, &snapshot, DisplayUnit::Microseconds);

        let expected = [
            "",
            "operation = read",
            "     usecs               : count     distribution",
            "         0 -> 1          : 0        |                                        |",
            "         2 -> 3          : 0        |                                        |",
            "         4 -> 7          : 1        |*************                           |",
            "         8 -> 15         : 0        |                                        |",
            "        16 -> 31         : 3        |****************************************|",
        ];

        assert_eq!(out.lines().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn wide_layout() {
        let snapshot = snapshot(&[(Operation::Fsync, 40, 2)]);

        let mut out = String::new();
        histograms(&mut out, &snapshot, DisplayUnit::Milliseconds);

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[1], "operation = fsync");
        assert_eq!(
            lines[2],
            "               msecs                         : count     distribution"
        );
        assert_eq!(
            lines.last().copied(),
            Some("       1099511627776 -> 2199023255551        : 2        |********************|")
        );
        // blank, header, column header, buckets 0 through 40
        assert_eq!(lines.len(), 3 + 41);
    }

    #[test]
    fn wide_layout_starts_at_bucket_32() {
        let header = |bucket| {
            let snapshot = snapshot(&[(Operation::Read, bucket, 1)]);
            let mut out = String::new();
            histograms(&mut out, &snapshot, DisplayUnit::Microseconds);
            out.lines().nth(2).map(str::to_string)
        };

        assert_eq!(
            header(31).as_deref(),
            Some("     usecs               : count     distribution")
        );
        assert_eq!(
            header(32).as_deref(),
            Some("               usecs                         : count     distribution")
        );
    }

    #[test]
    fn sections_in_canonical_order() {
        let snapshot = snapshot(&[
            (Operation::Fsync, 0, 1),
            (Operation::Open, 0, 1),
            (Operation::Write, 0, 1),
        ]);

        let mut out = String::new();
        histograms(&mut out, &snapshot, DisplayUnit::Microseconds);

        let headers: Vec<&str> = out
            .lines()
            .filter(|line| line.starts_with("operation = "))
            .collect();

        assert_eq!(
            headers,
            ["operation = open", "operation = write", "operation = fsync"]
        );
    }

    #[test]
    fn empty_snapshot() {
        let mut out = String::new();
        histograms(&mut out, &Snapshot::default(), DisplayUnit::Microseconds);
        assert!(out.is_empty());
    }
}
