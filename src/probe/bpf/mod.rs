//! Kernel probes using BPF. The program in `mod.bpf.c` implements the same
//! entry/return correlation as `crate::correlator` and aggregates directly
//! into an mmapped array map laid out like `histogram::AtomicTable`.

mod skel {
    include!(concat!(env!("OUT_DIR"), "/f2fsdist.bpf.rs"));
}

use skel::*;

use super::*;
use crate::common::DisplayUnit;
use crate::correlator::Filter;
use crate::histogram::{Cells, CELLS};

use libbpf_rs::skel::{OpenSkel, SkelBuilder};
use libbpf_rs::{Link, OpenObject};
use memmap2::{MmapMut, MmapOptions};

use std::mem::MaybeUninit;
use std::os::fd::{AsFd, AsRawFd};
use std::sync::atomic::{AtomicU64, Ordering};

const PAGE_SIZE: usize = 4096;

// indices into the config map, must match `mod.bpf.c`
const CONFIG_FILTER_TGID: usize = 0;
const CONFIG_TGID: usize = 1;
const CONFIG_FACTOR: usize = 2;
const CONFIG_FILTER_FILE_OPS: usize = 3;
const CONFIG_FILE_OPS: usize = 4;
const CONFIG_ENTRIES: usize = 8;

// indices into the drops map
const DROP_FILTERED: usize = 0;
const DROP_MISSED_START: usize = 1;
const DROP_NEGATIVE: usize = 2;
const DROP_TABLE_FULL: usize = 3;
const DROP_ENTRIES: usize = 8;

fn whole_pages<T>(count: usize) -> usize {
    (count * std::mem::size_of::<T>()).div_ceil(PAGE_SIZE)
}

/// Maps a `BPF_F_MMAPABLE` array map of `u64` values into our address space.
fn mmap(map: &libbpf_rs::Map, entries: usize) -> Result<MmapMut, ProbeError> {
    let len = whole_pages::<u64>(entries) * PAGE_SIZE;
    let fd = map.as_fd().as_raw_fd();

    unsafe { MmapOptions::new().len(len).map_mut(fd) }
        .map_err(|e| ProbeError::Load(format!("failed to mmap() bpf map: {e}")))
}

/// View a mapped region as atomic `u64` words. BPF programs update the same
/// memory with atomic adds.
fn words(mmap: &MmapMut) -> &[AtomicU64] {
    let (_prefix, words, _suffix) = unsafe { mmap.align_to::<AtomicU64>() };
    words
}

/// The kernel side histogram table.
pub struct BpfTable {
    mmap: MmapMut,
}

impl BpfTable {
    fn new(mmap: MmapMut) -> Result<Self, ProbeError> {
        // check the alignment
        if words(&mmap).len() < CELLS {
            return Err(ProbeError::Load(
                "mmap region not aligned or width doesn't match".into(),
            ));
        }

        Ok(Self { mmap })
    }
}

impl Cells for BpfTable {
    fn cells(&self) -> &[AtomicU64] {
        &words(&self.mmap)[..CELLS]
    }
}

pub struct BpfProbes {
    // links are declared first so they are dropped, and detached, before the
    // programs they refer to
    links: Vec<Link>,
    table: Arc<BpfTable>,
    drops: MmapMut,
    skel: ModSkel<'static>,
}

impl BpfProbes {
    /// Loads the BPF program and configures it. Nothing is attached until the
    /// plan is installed.
    pub fn open(filter: Filter, unit: DisplayUnit) -> Result<Self, ProbeError> {
        // storage for the BPF object file
        let open_object: &'static mut MaybeUninit<OpenObject> =
            Box::leak(Box::new(MaybeUninit::uninit()));

        let skel = ModSkelBuilder::default()
            .open(open_object)
            .and_then(|s| s.load())
            .map_err(|e| ProbeError::Load(e.to_string()))?;

        log_prog_instructions(&skel);

        let config = mmap(&skel.maps.config, CONFIG_ENTRIES)?;
        {
            let values = words(&config);
            if values.len() < CONFIG_ENTRIES {
                return Err(ProbeError::Load("config map is too small".into()));
            }

            if let Some(tgid) = filter.tgid {
                values[CONFIG_TGID].store(tgid.into(), Ordering::Relaxed);
                values[CONFIG_FILTER_TGID].store(1, Ordering::Relaxed);
            }

            if let Some(file_ops) = filter.file_ops {
                values[CONFIG_FILE_OPS].store(file_ops, Ordering::Relaxed);
                values[CONFIG_FILTER_FILE_OPS].store(1, Ordering::Relaxed);
            }

            values[CONFIG_FACTOR].store(unit.factor(), Ordering::Relaxed);
        }

        let table = BpfTable::new(mmap(&skel.maps.latency, CELLS)?)?;

        let drops = mmap(&skel.maps.drops, DROP_ENTRIES)?;
        if words(&drops).len() < DROP_ENTRIES {
            return Err(ProbeError::Load("drops map is too small".into()));
        }

        Ok(Self {
            links: Vec::new(),
            table: Arc::new(table),
            drops,
            skel,
        })
    }
}

fn log_prog_instructions(skel: &ModSkel) {
    debug!(
        "trace_entry() BPF instruction count: {}",
        skel.progs.trace_entry.insn_cnt()
    );
    debug!(
        "trace_read_entry() BPF instruction count: {}",
        skel.progs.trace_read_entry.insn_cnt()
    );
    debug!(
        "trace_read_return() BPF instruction count: {}",
        skel.progs.trace_read_return.insn_cnt()
    );
}

impl Attach for BpfProbes {
    fn attach_entry(
        &mut self,
        target: &'static str,
        handler: EntryHandler,
    ) -> Result<(), ProbeError> {
        let prog = match handler {
            EntryHandler::Plain => &self.skel.progs.trace_entry,
            EntryHandler::FileOpsFiltered => &self.skel.progs.trace_read_entry,
        };

        let link = prog
            .attach_kprobe(false, target)
            .map_err(|e| ProbeError::Attach {
                kind: "kprobe",
                target,
                reason: e.to_string(),
            })?;

        self.links.push(link);
        Ok(())
    }

    fn attach_return(
        &mut self,
        target: &'static str,
        handler: ReturnHandler,
    ) -> Result<(), ProbeError> {
        let prog = match handler.operation() {
            Operation::Open => &self.skel.progs.trace_open_return,
            Operation::Read => &self.skel.progs.trace_read_return,
            Operation::Write => &self.skel.progs.trace_write_return,
            Operation::Fsync => &self.skel.progs.trace_fsync_return,
        };

        let link = prog
            .attach_kprobe(true, target)
            .map_err(|e| ProbeError::Attach {
                kind: "kretprobe",
                target,
                reason: e.to_string(),
            })?;

        self.links.push(link);
        Ok(())
    }
}

impl Probes for BpfProbes {
    fn table(&self) -> Arc<dyn HistogramTable> {
        self.table.clone()
    }

    fn drops(&self) -> DropCounts {
        let drops = words(&self.drops);

        DropCounts {
            filtered: drops[DROP_FILTERED].load(Ordering::Relaxed),
            missed_start: drops[DROP_MISSED_START].load(Ordering::Relaxed),
            negative: drops[DROP_NEGATIVE].load(Ordering::Relaxed),
            table_full: drops[DROP_TABLE_FULL].load(Ordering::Relaxed),
        }
    }
}
