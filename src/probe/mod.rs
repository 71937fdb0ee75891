//! Probe registration.
//!
//! A `ProbePlan` lists which handler runs at the entry and return of each
//! traced kernel function. The plan is applied to an `Attach` implementation:
//! either the in-process dispatcher in `local` or the BPF backend.

pub mod local;

#[cfg(all(feature = "bpf", target_os = "linux"))]
pub mod bpf;

use crate::correlator::DropCounts;
use crate::histogram::{HistogramTable, Operation};
use crate::symbols::ReadProbe;

use thiserror::Error;
use tracing::debug;

use std::sync::Arc;

pub const F2FS_OPEN: &str = "f2fs_file_open";
pub const F2FS_WRITE: &str = "f2fs_file_write_iter";
pub const F2FS_FSYNC: &str = "f2fs_sync_file";

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to attach {kind} probe to {target}: {reason}")]
    Attach {
        kind: &'static str,
        target: &'static str,
        reason: String,
    },
    #[error("failed to load probes: {0}")]
    Load(String),
    #[error("this build of f2fsdist has no BPF support\nHINT: rebuild with `--features bpf`")]
    Unsupported,
}

/// Handler run when a traced function is entered.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntryHandler {
    /// Record the start time for the current thread.
    Plain,
    /// Record the start time only if the file being read is bound to the
    /// resolved operation table.
    FileOpsFiltered,
}

/// Handler run when a traced function returns.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReturnHandler {
    /// Complete the timing for the current thread and count it against the
    /// operation.
    Return(Operation),
}

impl ReturnHandler {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Return(op) => *op,
        }
    }
}

/// The capability to run handlers when named kernel functions are entered
/// and return. An implementation must deliver every invocation of an attached
/// function, with each thread's entry seen before its own return.
pub trait Attach {
    fn attach_entry(&mut self, target: &'static str, handler: EntryHandler)
        -> Result<(), ProbeError>;

    fn attach_return(
        &mut self,
        target: &'static str,
        handler: ReturnHandler,
    ) -> Result<(), ProbeError>;
}

/// A set of attached probes together with the state they share with the
/// reporting loop. Dropping it detaches everything.
pub trait Probes: Attach {
    fn table(&self) -> Arc<dyn HistogramTable>;

    fn drops(&self) -> DropCounts;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub target: &'static str,
    pub entry: EntryHandler,
    pub exit: ReturnHandler,
}

/// The probes needed to time all four operations on the running kernel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbePlan {
    read: ReadProbe,
    registrations: Vec<Registration>,
}

impl ProbePlan {
    pub fn new(read: &ReadProbe) -> Self {
        let registrations = vec![
            Registration {
                target: read.function(),
                entry: read.entry_handler(),
                exit: ReturnHandler::Return(Operation::Read),
            },
            Registration {
                target: F2FS_WRITE,
                entry: EntryHandler::Plain,
                exit: ReturnHandler::Return(Operation::Write),
            },
            Registration {
                target: F2FS_OPEN,
                entry: EntryHandler::Plain,
                exit: ReturnHandler::Return(Operation::Open),
            },
            Registration {
                target: F2FS_FSYNC,
                entry: EntryHandler::Plain,
                exit: ReturnHandler::Return(Operation::Fsync),
            },
        ];

        Self {
            read: read.clone(),
            registrations,
        }
    }

    pub fn read(&self) -> &ReadProbe {
        &self.read
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    /// Attaches every entry handler and then every return handler. Stops at
    /// the first failure.
    pub fn install<A: Attach + ?Sized>(&self, attach: &mut A) -> Result<(), ProbeError> {
        for r in &self.registrations {
            debug!("attaching {:?} entry handler to {}", r.entry, r.target);
            attach.attach_entry(r.target, r.entry)?;
        }

        for r in &self.registrations {
            debug!("attaching {:?} return handler to {}", r.exit, r.target);
            attach.attach_return(r.target, r.exit)?;
        }

        Ok(())
    }
}

impl std::fmt::Display for ProbePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "read probe: {}", self.read)?;

        for r in &self.registrations {
            let entry = match r.entry {
                EntryHandler::Plain => "trace_entry",
                EntryHandler::FileOpsFiltered => "trace_read_entry",
            };

            writeln!(
                f,
                "kprobe:{} -> {entry}\nkretprobe:{} -> trace_{}_return",
                r.target,
                r.target,
                r.exit.operation()
            )?;
        }

        Ok(())
    }
}

/// Opens the kernel probe backend.
#[cfg(all(feature = "bpf", target_os = "linux"))]
pub fn open(
    filter: crate::correlator::Filter,
    unit: crate::common::DisplayUnit,
) -> Result<Box<dyn Probes>, ProbeError> {
    Ok(Box::new(bpf::BpfProbes::open(filter, unit)?))
}

/// Opens the kernel probe backend.
#[cfg(not(all(feature = "bpf", target_os = "linux")))]
pub fn open(
    _filter: crate::correlator::Filter,
    _unit: crate::common::DisplayUnit,
) -> Result<Box<dyn Probes>, ProbeError> {
    Err(ProbeError::Unsupported)
}
