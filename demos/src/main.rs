//! Runs the classic user-level thread scenarios.
//!
//! ```bash
//! # Every scenario, cooperatively
//! cargo run -p sthread-demos
//!
//! # Producers and consumer under a 2 ms timer, with scheduler events
//! cargo run -p sthread-demos -- producer-consumer --timer --quantum-ms 2 -v
//! ```
//!
//! The process exits with the status of the first scenario that did not
//! finish cleanly: 1 for a deadlock, 2 for a configuration error.

mod scenarios;

use clap::{Parser, ValueEnum};
use scenarios::Scenario;
use sthread::{ExitStatus, SchedError, Scheduler, Termination};
use std::{process::ExitCode, time::Duration};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sthread-demos")]
#[command(about = "Runs the classic user-level thread scenarios", long_about = None)]
struct Cli {
    /// Scenarios to run, in order (all of them if none is given)
    #[arg(value_enum)]
    scenarios: Vec<Scenario>,

    /// Preempt the running thread with a timer
    #[arg(long)]
    timer: bool,

    /// Timer quantum in milliseconds
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    quantum_ms: u64,

    /// Stack size of every thread in KiB
    #[arg(long, default_value_t = 1024)]
    stack_kib: usize,

    /// Log scheduler events
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn scheduler_for(&self, scenario: Scenario) -> Result<Scheduler, SchedError> {
        let builder = Scheduler::builder().stack_size(self.stack_kib.saturating_mul(1024));
        let builder = match self.timer || scenario.needs_timer() {
            true => builder.preemptive(Duration::from_millis(self.quantum_ms)),
            false => builder,
        };
        builder.build()
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(cli: &Cli, scenario: Scenario) -> Result<Termination, SchedError> {
    let scheduler = cli.scheduler_for(scenario)?;
    scenario.populate(&scheduler)?;
    scheduler.run()
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let scenarios = match cli.scenarios.is_empty() {
        true => Scenario::value_variants().to_vec(),
        false => cli.scenarios.clone(),
    };
    let mut status = ExitStatus::AllFinished;
    for scenario in scenarios {
        println!("== {scenario} ==");
        match run(&cli, scenario) {
            Ok(termination) => {
                info!(%scenario, ?termination, "scenario is over");
                if status == ExitStatus::AllFinished {
                    status = termination.exit_status();
                }
            }
            Err(e) => {
                error!(%scenario, "failed to run: {e}");
                return ExitCode::from(2);
            }
        }
    }
    ExitCode::from(i32::from(status) as u8)
}
