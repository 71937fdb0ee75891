// Time units with base unit as nanoseconds
pub const SECONDS: u64 = 1_000 * MILLISECONDS;
pub const MILLISECONDS: u64 = 1_000 * MICROSECONDS;
pub const MICROSECONDS: u64 = 1_000 * NANOSECONDS;
pub const NANOSECONDS: u64 = 1;

/// The unit latencies are reported in. Elapsed nanoseconds are converted by
/// truncating integer division, so sub-unit remainders are dropped.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DisplayUnit {
    #[default]
    Microseconds,
    Milliseconds,
}

impl DisplayUnit {
    /// Nanoseconds per unit.
    pub const fn factor(self) -> u64 {
        match self {
            Self::Microseconds => MICROSECONDS,
            Self::Milliseconds => MILLISECONDS,
        }
    }

    /// Column label used when rendering histograms.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Microseconds => "usecs",
            Self::Milliseconds => "msecs",
        }
    }

    pub const fn convert(self, nanoseconds: u64) -> u64 {
        nanoseconds / self.factor()
    }
}
