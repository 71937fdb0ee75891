use super::*;
use crate::probe::EntryHandler;

/// f2fs's own `read_iter`, present since Linux 4.10.
pub const F2FS_READ: &str = "f2fs_file_read_iter";

/// The generic `read_iter` used by f2fs on older kernels. It is shared by
/// many filesystems so reads must be filtered by operation table.
pub const GENERIC_READ: &str = "generic_file_read_iter";

/// The `struct file_operations` f2fs binds to regular files.
pub const F2FS_FILE_OPERATIONS: &str = "f2fs_file_operations";

/// How the read operation is instrumented on the running kernel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadProbe {
    /// Attach to f2fs's dedicated read function. Every call is an f2fs read.
    Dedicated { function: &'static str },
    /// Attach to the generic read function and only time calls on files whose
    /// `f_op` equals `file_ops`.
    Generic {
        function: &'static str,
        file_ops: u64,
    },
}

impl ReadProbe {
    /// Name of the kernel function to probe.
    pub fn function(&self) -> &'static str {
        match self {
            Self::Dedicated { function } | Self::Generic { function, .. } => function,
        }
    }

    /// Operation table address used to filter reads, if any.
    pub fn file_ops(&self) -> Option<u64> {
        match self {
            Self::Dedicated { .. } => None,
            Self::Generic { file_ops, .. } => Some(*file_ops),
        }
    }

    /// Handler to run when the read function is entered.
    pub fn entry_handler(&self) -> EntryHandler {
        match self {
            Self::Dedicated { .. } => EntryHandler::Plain,
            Self::Generic { .. } => EntryHandler::FileOpsFiltered,
        }
    }
}

impl std::fmt::Display for ReadProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dedicated { function } => write!(f, "{function}"),
            Self::Generic { function, file_ops } => {
                write!(f, "{function} (f_op == 0x{file_ops:016x})")
            }
        }
    }
}

/// Chooses the read probe for the running kernel.
///
/// Newer kernels give f2fs its own `read_iter`. Older ones route f2fs reads
/// through `generic_file_read_iter`, in which case the address of
/// `f2fs_file_operations` is needed to tell f2fs reads apart from those of
/// other filesystems.
pub fn resolve_read_probe(symbols: &KernelSymbols) -> Result<ReadProbe, ResolutionError> {
    if symbols.is_probeable(F2FS_READ) {
        debug!("using dedicated read function: {F2FS_READ}");
        return Ok(ReadProbe::Dedicated {
            function: F2FS_READ,
        });
    }

    if !symbols.is_probeable(GENERIC_READ) {
        return Err(ResolutionError::ReadProbeNotFound);
    }

    let file_ops = symbols
        .address_of(F2FS_FILE_OPERATIONS)
        .ok_or(ResolutionError::FileOperationsNotFound)?;

    // kallsyms reports zero addresses to readers without privilege
    if file_ops == 0 {
        return Err(ResolutionError::AddressHidden {
            symbol: F2FS_FILE_OPERATIONS,
        });
    }

    debug!("using generic read function: {GENERIC_READ} with {F2FS_FILE_OPERATIONS} at 0x{file_ops:x}");

    Ok(ReadProbe::Generic {
        function: GENERIC_READ,
        file_ops,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(table: &str) -> KernelSymbols {
        KernelSymbols::parse(table.as_bytes()).unwrap()
    }

    #[test]
    fn prefers_dedicated_read() {
        let symbols = symbols(
            "ffffffff813a1b20 T generic_file_read_iter\n\
             ffffffffc0a41100 t f2fs_file_read_iter\t[f2fs]\n\
             ffffffffc0a6e040 d f2fs_file_operations\t[f2fs]\n",
        );

        let probe = resolve_read_probe(&symbols).unwrap();
        assert_eq!(
            probe,
            ReadProbe::Dedicated {
                function: F2FS_READ
            }
        );
        assert_eq!(probe.entry_handler(), EntryHandler::Plain);
        assert_eq!(probe.file_ops(), None);
        assert_eq!(probe.to_string(), "f2fs_file_read_iter");
    }

    #[test]
    fn falls_back_to_generic_read_with_table_filter() {
        let symbols = symbols(
            "ffffffff813a1b20 T generic_file_read_iter\n\
             ffffffffc0a6e040 d f2fs_file_operations\t[f2fs]\n",
        );

        let probe = resolve_read_probe(&symbols).unwrap();
        assert_eq!(probe.function(), GENERIC_READ);
        assert_eq!(probe.file_ops(), Some(0xffffffffc0a6e040));
        assert_eq!(probe.entry_handler(), EntryHandler::FileOpsFiltered);
        assert_eq!(
            probe.to_string(),
            "generic_file_read_iter (f_op == 0xffffffffc0a6e040)"
        );
    }

    #[test]
    fn blacklisted_dedicated_read_falls_back() {
        let symbols = symbols(
            "ffffffff813a1b20 T generic_file_read_iter\n\
             ffffffffc0a41100 t f2fs_file_read_iter\t[f2fs]\n\
             ffffffffc0a6e040 d f2fs_file_operations\t[f2fs]\n",
        )
        .with_blacklist(vec![F2FS_READ.to_string()]);

        let probe = resolve_read_probe(&symbols).unwrap();
        assert_eq!(probe.function(), GENERIC_READ);
    }

    #[test]
    fn missing_read_function_and_table_is_an_error() {
        let symbols = symbols(
            "ffffffff813a1b20 T generic_file_read_iter\n\
             ffffffffc0a41230 t f2fs_file_open\t[f2fs]\n",
        );

        let error = resolve_read_probe(&symbols).unwrap_err();
        assert!(matches!(error, ResolutionError::FileOperationsNotFound));
        assert!(error.to_string().contains("CONFIG_KALLSYMS_ALL"));
    }

    #[test]
    fn missing_everything_is_an_error() {
        let symbols = symbols("ffffffff81000000 T _stext\n");

        assert!(matches!(
            resolve_read_probe(&symbols),
            Err(ResolutionError::ReadProbeNotFound)
        ));
    }

    #[test]
    fn hidden_addresses_are_rejected() {
        let symbols = symbols(
            "0000000000000000 T generic_file_read_iter\n\
             0000000000000000 d f2fs_file_operations\t[f2fs]\n",
        );

        assert!(matches!(
            resolve_read_probe(&symbols),
            Err(ResolutionError::AddressHidden {
                symbol: F2FS_FILE_OPERATIONS
            })
        ));
    }
}
