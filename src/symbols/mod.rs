//! Kernel symbol table access and selection of the read probe target.

mod resolve;

pub use resolve::{resolve_read_probe, ReadProbe};
pub use resolve::{F2FS_FILE_OPERATIONS, F2FS_READ, GENERIC_READ};

use tracing::{debug, warn};

use thiserror::Error;

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

pub const KALLSYMS: &str = "/proc/kallsyms";
pub const KPROBE_BLACKLIST: &str = "/sys/kernel/debug/kprobes/blacklist";

#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("failed to read kernel symbols from {}: {source}", .path.display())]
    SymbolTable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("neither {} nor {} can be probed on this kernel", F2FS_READ, GENERIC_READ)]
    ReadProbeNotFound,
    #[error(
        "no {} in {}\nHINT: the kernel should be built with CONFIG_KALLSYMS_ALL",
        F2FS_FILE_OPERATIONS,
        KALLSYMS
    )]
    FileOperationsNotFound,
    #[error(
        "the address of {symbol} is hidden\nHINT: run as root or lower kernel.kptr_restrict"
    )]
    AddressHidden { symbol: &'static str },
}

/// One entry from `/proc/kallsyms`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    pub address: u64,
    pub kind: char,
    pub name: String,
}

impl Symbol {
    /// Parses a line of the form `<hex address> <type> <name>[\t[module]]`.
    /// The module column is not kept.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();

        let address = u64::from_str_radix(parts.next()?, 16).ok()?;

        let mut kind = parts.next()?.chars();
        let k = kind.next()?;
        if kind.next().is_some() {
            return None;
        }

        let name = parts.next()?.to_string();

        Some(Self {
            address,
            kind: k,
            name,
        })
    }

    /// Text (code) symbols are the only ones a kprobe can attach to.
    pub fn is_text(&self) -> bool {
        matches!(self.kind, 't' | 'T')
    }
}

/// The running kernel's symbol table, read once at startup.
#[derive(Default)]
pub struct KernelSymbols {
    symbols: HashMap<String, Vec<Symbol>>,
    blacklist: HashSet<String>,
}

impl KernelSymbols {
    /// Loads `/proc/kallsyms` and, if readable, the kprobe blacklist.
    pub fn load() -> Result<Self, ResolutionError> {
        let symbols = Self::load_from(KALLSYMS)?;

        match Self::load_blacklist(KPROBE_BLACKLIST) {
            Ok(blacklist) => Ok(symbols.with_blacklist(blacklist)),
            Err(e) => {
                debug!("kprobe blacklist unavailable: {e}");
                Ok(symbols)
            }
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ResolutionError> {
        let path = path.as_ref();

        let error = |source| ResolutionError::SymbolTable {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(error)?;
        let symbols = Self::parse(BufReader::new(file)).map_err(error)?;

        if symbols.is_empty() {
            warn!("no kernel symbols in {}", path.display());
        } else {
            debug!("loaded {} kernel symbols from {}", symbols.len(), path.display());
        }

        Ok(symbols)
    }

    /// Parses a symbol table. Lines which don't parse are skipped.
    pub fn parse<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut symbols: HashMap<String, Vec<Symbol>> = HashMap::new();

        for line in reader.lines() {
            if let Some(symbol) = Symbol::parse(&line?) {
                symbols.entry(symbol.name.clone()).or_default().push(symbol);
            }
        }

        Ok(Self {
            symbols,
            blacklist: HashSet::new(),
        })
    }

    /// Reads function names from the kprobe blacklist. Each line has the form
    /// `0x<start>-0x<end>\t<name>`.
    pub fn load_blacklist(path: impl AsRef<Path>) -> io::Result<HashSet<String>> {
        let file = File::open(path)?;
        let mut blacklist = HashSet::new();

        for line in BufReader::new(file).lines() {
            if let Some(name) = line?.split_whitespace().nth(1) {
                blacklist.insert(name.to_string());
            }
        }

        Ok(blacklist)
    }

    pub fn with_blacklist(mut self, blacklist: impl IntoIterator<Item = String>) -> Self {
        self.blacklist.extend(blacklist);
        self
    }

    /// Number of distinct symbol names.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name).and_then(|s| s.first())
    }

    /// Address of the first symbol with exactly this name.
    pub fn address_of(&self, name: &str) -> Option<u64> {
        self.get(name).map(|s| s.address)
    }

    /// True if a kprobe can be attached to the named function.
    pub fn is_probeable(&self, name: &str) -> bool {
        !self.blacklist.contains(name)
            && self
                .symbols
                .get(name)
                .is_some_and(|s| s.iter().any(Symbol::is_text))
    }
}
