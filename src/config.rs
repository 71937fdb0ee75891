use crate::common::DisplayUnit;
use crate::correlator::Filter;
use crate::report::{ReportConfig, DEFAULT_COUNT};
use crate::symbols::ReadProbe;

use clap::{Arg, ArgAction, ArgMatches, Command};
use thiserror::Error;

use std::time::Duration;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("interval must be positive")]
    ZeroInterval,
    #[error("count must be positive")]
    ZeroCount,
    #[error("invalid {name}: {value:?} is not a non-negative integer")]
    InvalidNumber { name: &'static str, value: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub interval: Option<Duration>,
    pub count: u64,
    pub timestamp: bool,
    pub unit: DisplayUnit,
    pub pid: Option<u32>,
    pub verbose: u8,
    pub ebpf: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: None,
            count: DEFAULT_COUNT,
            timestamp: true,
            unit: DisplayUnit::Microseconds,
            pid: None,
            verbose: 0,
            ebpf: false,
        }
    }
}

fn number<T: std::str::FromStr>(
    args: &ArgMatches,
    id: &str,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    args.get_one::<String>(id)
        .map(|value| {
            value.parse::<T>().map_err(|_| ConfigError::InvalidNumber {
                name,
                value: value.clone(),
            })
        })
        .transpose()
}

impl TryFrom<ArgMatches> for Config {
    type Error = ConfigError;

    fn try_from(args: ArgMatches) -> Result<Self, Self::Error> {
        let interval = match number::<u64>(&args, "INTERVAL", "interval")? {
            Some(0) => return Err(ConfigError::ZeroInterval),
            Some(seconds) => Some(Duration::from_secs(seconds)),
            None => None,
        };

        let count = match number::<u64>(&args, "COUNT", "count")? {
            Some(0) => return Err(ConfigError::ZeroCount),
            Some(count) => count,
            None => DEFAULT_COUNT,
        };

        let unit = if args.get_flag("MILLISECONDS") {
            DisplayUnit::Milliseconds
        } else {
            DisplayUnit::Microseconds
        };

        Ok(Config {
            interval,
            count,
            timestamp: !args.get_flag("NOTIMESTAMP"),
            unit,
            pid: number::<u32>(&args, "PID", "PID")?,
            verbose: *args.get_one::<u8>("VERBOSE").unwrap_or(&0),
            ebpf: args.get_flag("EBPF"),
        })
    }
}

impl Config {
    pub fn report(&self) -> ReportConfig {
        ReportConfig {
            interval: self.interval,
            count: self.count,
            timestamp: self.timestamp,
            unit: self.unit,
        }
    }

    /// Event filter for the resolved read strategy.
    pub fn filter(&self, read: &ReadProbe) -> Filter {
        Filter {
            tgid: self.pid,
            file_ops: read.file_ops(),
        }
    }
}

pub fn command() -> Command {
    Command::new(env!("CARGO_BIN_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .about("Summarize f2fs operation latency")
        .after_help(
            "examples:\n    \
             f2fsdist            # show operation latency as a histogram\n    \
             f2fsdist -p 181     # trace PID 181 only\n    \
             f2fsdist 1 10       # print 1 second summaries, 10 times\n    \
             f2fsdist -m 5       # 5s summaries, milliseconds",
        )
        .arg(
            Arg::new("NOTIMESTAMP")
                .long("notimestamp")
                .short('T')
                .help("Don't include timestamp on interval output")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("MILLISECONDS")
                .long("milliseconds")
                .short('m')
                .help("Output in milliseconds")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("PID")
                .long("pid")
                .short('p')
                .help("Trace this PID only")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("VERBOSE")
                .long("verbose")
                .short('v')
                .help("Increase the verbosity")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("EBPF")
                .long("ebpf")
                .help("Print the probe plan and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("INTERVAL")
                .help("Output interval, in seconds")
                .action(ArgAction::Set)
                .index(1),
        )
        .arg(
            Arg::new("COUNT")
                .help("Number of outputs")
                .action(ArgAction::Set)
                .index(2),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, ConfigError> {
        let matches = command()
            .try_get_matches_from(std::iter::once("f2fsdist").chain(args.iter().copied()))
            .unwrap();
        Config::try_from(matches)
    }

    #[test]
    fn defaults() {
        assert_eq!(parse(&[]).unwrap(), Config::default());
    }

    #[test]
    fn all_options() {
        let config = parse(&["-T", "-m", "-p", "181", "-vv", "--ebpf", "5", "10"]).unwrap();

        assert_eq!(
            config,
            Config {
                interval: Some(Duration::from_secs(5)),
                count: 10,
                timestamp: false,
                unit: DisplayUnit::Milliseconds,
                pid: Some(181),
                verbose: 2,
                ebpf: true,
            }
        );

        assert_eq!(
            config.report(),
            ReportConfig {
                interval: Some(Duration::from_secs(5)),
                count: 10,
                timestamp: false,
                unit: DisplayUnit::Milliseconds,
            }
        );
    }

    #[test]
    fn interval_without_count() {
        let config = parse(&["1"]).unwrap();
        assert_eq!(config.interval, Some(Duration::from_secs(1)));
        assert_eq!(config.count, DEFAULT_COUNT);
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert_eq!(parse(&["0"]), Err(ConfigError::ZeroInterval));
    }

    #[test]
    fn zero_count_is_rejected() {
        assert_eq!(parse(&["1", "0"]), Err(ConfigError::ZeroCount));
    }

    #[test]
    fn invalid_numbers() {
        assert_eq!(
            parse(&["soon"]),
            Err(ConfigError::InvalidNumber {
                name: "interval",
                value: "soon".into(),
            })
        );
        assert!(matches!(
            parse(&["1", "3x"]),
            Err(ConfigError::InvalidNumber { name: "count", .. })
        ));
        assert!(matches!(
            parse(&["-p", "init"]),
            Err(ConfigError::InvalidNumber { name: "PID", .. })
        ));
    }

    #[test]
    fn filter_follows_read_strategy() {
        let config = parse(&["-p", "181"]).unwrap();

        let dedicated = ReadProbe::Dedicated {
            function: "f2fs_file_read_iter",
        };
        assert_eq!(
            config.filter(&dedicated),
            Filter {
                tgid: Some(181),
                file_ops: None,
            }
        );

        let generic = ReadProbe::Generic {
            function: "generic_file_read_iter",
            file_ops: 0xffffffffc0a6e040,
        };
        assert_eq!(config.filter(&generic).file_ops, Some(0xffffffffc0a6e040));
    }
}
