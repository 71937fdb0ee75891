use anyhow::Context;
use backtrace::Backtrace;
use tracing::{debug, info, Level};

mod common;
mod config;
mod correlator;
mod histogram;
mod probe;
mod report;
mod symbols;

use config::Config;
use probe::ProbePlan;
use report::{Reporter, SignalWaiter};
use symbols::KernelSymbols;

fn main() {
    // custom panic hook to terminate whole process after unwinding
    std::panic::set_hook(Box::new(|s| {
        eprintln!("{s}");
        eprintln!("{:?}", Backtrace::new());
        std::process::exit(101);
    }));

    let config: Config = match config::command().get_matches().try_into() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {e}");
            std::process::exit(1);
        }
    };

    init_logging(config.verbose);

    if let Err(e) = run(config) {
        eprintln!("ERROR: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(level > Level::INFO)
        .init();
}

fn run(config: Config) -> anyhow::Result<()> {
    let symbols = KernelSymbols::load()?;
    let read = symbols::resolve_read_probe(&symbols)?;

    debug!("read probe: {read}");

    let plan = ProbePlan::new(&read);

    if config.ebpf {
        print!("{plan}");
        return Ok(());
    }

    let mut waiter = SignalWaiter::new();
    waiter.install().context("failed to set ctrl-c handler")?;

    let mut probes = probe::open(config.filter(&read), config.unit)?;
    plan.install(probes.as_mut())?;

    info!("attached {} probes", plan.registrations().len() * 2);

    println!("Tracing f2fs operation latency... Hit Ctrl-C to end.");

    let mut reporter = Reporter::new(config.report(), probes.table(), std::io::stdout().lock());
    let reports = reporter.run(&mut waiter).context("failed to write report")?;

    debug!("emitted {reports} reports");
    debug!("dropped events: {}", probes.drops());

    Ok(())
}
