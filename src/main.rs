use std::{
    sync::mpsc::{self, Receiver, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use libc::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use philosophers::{
    config::{
        jittered_pause, DEFAULT_DEADLOCK_MS, DEFAULT_EAT_MS, DEFAULT_FORK_MS, DEFAULT_ITERATIONS,
        DEFAULT_PHILOSOPHERS, DEFAULT_STATUS_MS, DEFAULT_THINK_MS,
    },
    report, DeadlockDetector, DinnerConfig, Table, Timing,
};

#[derive(Parser)]
#[command(name = "philosophers")]
#[command(version)]
#[command(about = "Dining philosophers: threads, forks and deadlock")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a dinner with the given parameters and deadlock detection
    Dinner(DinnerArgs),

    /// Run a dinner with default parameters and no deadlock detection
    Simple,
}

#[derive(Args)]
struct DinnerArgs {
    /// Number of philosophers (at least 2)
    #[arg(short, long, default_value_t = DEFAULT_PHILOSOPHERS)]
    philosophers: usize,

    /// Think time (milliseconds)
    #[arg(short, long, default_value_t = DEFAULT_THINK_MS)]
    think_time: u64,

    /// Eat time (milliseconds)
    #[arg(short, long, default_value_t = DEFAULT_EAT_MS)]
    eat_time: u64,

    /// Time needed to pick up or put down a fork (milliseconds)
    #[arg(short, long, default_value_t = DEFAULT_FORK_MS)]
    fork_time: u64,

    /// Status interval (milliseconds)
    #[arg(short, long, default_value_t = DEFAULT_STATUS_MS)]
    status_time: u64,

    /// Deadlock detection interval (milliseconds)
    #[arg(short, long, default_value_t = DEFAULT_DEADLOCK_MS)]
    deadlock_time: u64,

    /// Pause between philosopher launches (milliseconds) [default: fork time +- a few ms]
    #[arg(short, long)]
    wait_time: Option<u64>,

    /// Number of status iterations
    #[arg(short, long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: usize,
}

impl From<DinnerArgs> for DinnerConfig {
    fn from(args: DinnerArgs) -> Self {
        let fork = Duration::from_millis(args.fork_time);
        let pause = args
            .wait_time
            .map(Duration::from_millis)
            .unwrap_or_else(|| jittered_pause(fork));

        DinnerConfig {
            philosophers: args.philosophers,
            timing: Timing {
                think: Duration::from_millis(args.think_time),
                eat: Duration::from_millis(args.eat_time),
                fork,
                pause,
            },
            status_interval: Duration::from_millis(args.status_time),
            deadlock_interval: Duration::from_millis(args.deadlock_time),
            iterations: args.iterations,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let signals = watch_signals()?;

    match cli.command {
        Commands::Dinner(args) => dine(&DinnerConfig::from(args), true, &signals),
        Commands::Simple => dine(&DinnerConfig::default(), false, &signals),
    }
}

// SIGINT, SIGTERM を受けたらチャネルに流す
fn watch_signals() -> Result<Receiver<i32>> {
    let (tx, rx) = mpsc::channel();
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::spawn(move || {
        for sig in signals.forever() {
            if tx.send(sig).is_err() {
                break;
            }
        }
    });
    Ok(rx)
}

fn dine(config: &DinnerConfig, detect_deadlock: bool, signals: &Receiver<i32>) -> Result<()> {
    let mut table = Table::with_timing(config.philosophers, config.timing)?;
    table.populate()?;

    println!("{}", report::configuration(config, detect_deadlock));

    let started = Instant::now();
    table.start()?;

    let mut detector = detect_deadlock.then(|| DeadlockDetector::new(config.deadlock_interval));
    for _ in 0..config.iterations {
        match signals.recv_timeout(config.status_interval) {
            Ok(sig) => {
                info!(signal = sig, "signal received, ending the dinner early");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => thread::sleep(config.status_interval),
        }

        println!("{}", table.status());

        if let Some(detector) = detector.as_mut() {
            if detector.poll(table.total_meals()) {
                warn!("Deadlock detected. Shutdown may generate error messages.");
                break;
            }
        }
    }

    // フォークを解放して全員を帰す
    table.stop();

    let elapsed = (!detect_deadlock).then(|| started.elapsed());
    println!("{}", report::summary(&table, elapsed));
    Ok(())
}
