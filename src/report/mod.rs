//! The reporting loop.
//!
//! Once per interval, or once at termination when no interval is set, the
//! histogram table is drained and rendered to the output.

mod render;
mod signal;

pub use signal::SignalWaiter;

use crate::common::DisplayUnit;
use crate::histogram::HistogramTable;

use tracing::trace;

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

/// Default number of reports when only an interval is given.
pub const DEFAULT_COUNT: u64 = 99_999_999;

const TIMESTAMP_FORMAT: &str = "%H:%M:%S:";

/// Why a `Waiter` returned.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Wake {
    /// The interval elapsed.
    Interval,
    /// Termination was requested.
    Terminate,
}

/// Blocks the reporting loop between reports.
pub trait Waiter {
    /// Waits for `interval`, or until termination when there is none.
    fn wait(&mut self, interval: Option<Duration>) -> Wake;

    /// True once termination has been requested, including while no wait
    /// was in progress.
    fn terminated(&self) -> bool;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReportConfig {
    pub interval: Option<Duration>,
    pub count: u64,
    pub timestamp: bool,
    pub unit: DisplayUnit,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            interval: None,
            count: DEFAULT_COUNT,
            timestamp: true,
            unit: DisplayUnit::default(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Reporting,
    Draining,
    Done,
}

pub struct Reporter<W> {
    config: ReportConfig,
    table: Arc<dyn HistogramTable>,
    output: W,
    state: State,
    remaining: u64,
    terminating: bool,
}

impl<W: Write> Reporter<W> {
    pub fn new(config: ReportConfig, table: Arc<dyn HistogramTable>, output: W) -> Self {
        Self {
            remaining: config.count,
            config,
            table,
            output,
            state: State::Idle,
            terminating: false,
        }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Runs until the report count is exhausted or termination is requested.
    /// Returns the number of reports written.
    pub fn run(&mut self, waiter: &mut impl Waiter) -> io::Result<usize> {
        let mut reports = 0;

        loop {
            let next = match self.state {
                State::Idle => {
                    if waiter.wait(self.config.interval) == Wake::Terminate {
                        self.terminating = true;
                    }
                    State::Reporting
                }
                State::Reporting => {
                    self.report()?;
                    reports += 1;
                    State::Draining
                }
                State::Draining => {
                    self.remaining = self.remaining.saturating_sub(1);
                    // a signal may have arrived while the report was written
                    if waiter.terminated() {
                        self.terminating = true;
                    }
                    if self.remaining == 0 || self.terminating {
                        State::Done
                    } else {
                        State::Idle
                    }
                }
                State::Done => return Ok(reports),
            };

            trace!("reporter: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn report(&mut self) -> io::Result<()> {
        let snapshot = self.table.drain();

        let mut out = String::from("\n");

        if self.config.interval.is_some() && self.config.timestamp {
            out.push_str(&chrono::Local::now().format(TIMESTAMP_FORMAT).to_string());
            out.push('\n');
        }

        render::histograms(&mut out, &snapshot, self.config.unit);

        self.output.write_all(out.as_bytes())?;
        self.output.flush()
    }
}
