//! dbmetrics: collect metrics from SQL databases as JSON events.
//!
//! Events go to stdout, one JSON document per line. Logs go to stderr.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dbmetrics::collector::probe_version;
use dbmetrics::driver::{Connector, DuckDbConnector, SessionProfile};
use dbmetrics::runner::{log_report, EventSink, JsonLinesSink, Runner};
use dbmetrics::ModuleConfig;

#[derive(Parser)]
#[command(name = "dbmetrics")]
#[command(about = "Collect metrics from SQL databases as JSON events")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one collection cycle per metricset and host, then exit
    Collect {
        /// Path to the JSON configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Only collect this metricset
        #[arg(short, long)]
        metricset: Option<String>,

        /// Only collect from this host
        #[arg(long)]
        host: Option<String>,
    },
    /// Collect every period until interrupted
    Run {
        /// Path to the JSON configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Stop after this many ticks
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        ticks: Option<u64>,
    },
    /// Print the engine version reported by a host
    Version {
        /// Database locator
        #[arg(long)]
        host: String,
    },
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .init();
    install_panic_hook();
}

/// Report panics through the log instead of the default stderr hook.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        tracing::error!("{info}");
    }));
}

fn load_runner(config: &Path) -> Result<(ModuleConfig, Runner)> {
    let config = ModuleConfig::load(config)?;
    let collectors = config.collectors(config.connector());
    let runner = Runner::new(collectors, config.hosts.clone(), config.period());
    Ok((config, runner))
}

fn run_collect(config: PathBuf, metricset: Option<String>, host: Option<String>) -> Result<()> {
    let (_, mut runner) = load_runner(&config)?;
    runner.retain(metricset.as_deref(), host.as_deref());
    if runner.cycles_per_tick() == 0 {
        bail!("No metricset/host pair matches the given filters");
    }

    let mut sink = JsonLinesSink::new(io::stdout().lock());
    let mut failed = 0;
    for report in runner.tick() {
        log_report(&report);
        if !report.result.is_ok() {
            failed += 1;
        }
        sink.publish(&report)?;
    }

    if failed > 0 {
        bail!("{failed} collection cycle(s) failed");
    }
    Ok(())
}

fn run_periodic(config: PathBuf, ticks: Option<u64>) -> Result<()> {
    let (config, runner) = load_runner(&config)?;

    let (stop_tx, stop_rx) = channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("Error setting Ctrl-C handler")?;

    eprintln!(
        "Collecting {} metricset(s) from {} host(s) every {}s, Ctrl-C to stop",
        config.metricsets.len(),
        config.hosts.len(),
        config.period_secs
    );
    let mut sink = JsonLinesSink::new(io::stdout().lock());
    let ran = runner.run(&mut sink, &stop_rx, ticks)?;
    eprintln!("Stopped after {ran} tick(s)");
    Ok(())
}

fn run_version(host: String) -> Result<()> {
    let connector = DuckDbConnector {
        read_only: true,
        ..DuckDbConnector::default()
    };
    let mut session = connector.connect(&host, &SessionProfile::default())?;
    let version = probe_version(&connector, session.as_mut());
    session.close()?;
    println!("{}", version?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Collect {
            config,
            metricset,
            host,
        } => run_collect(config, metricset, host),
        Commands::Run { config, ticks } => run_periodic(config, ticks),
        Commands::Version { host } => run_version(host),
    }
}
