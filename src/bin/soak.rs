//! WolfStream Soak Runner
//!
//! Repeatedly allocates a log, publishes into it and tears it down again,
//! to surface leaks in the create/close lifecycle.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use rand::Rng;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfstream::buffer::{RawLog, RawLogFactory};
use wolfstream::config::{LoggingConfig, WolfStreamConfig};
use wolfstream::diagnostics::DistinctErrorLog;
use wolfstream::logbuffer::{clean_term, PARTITION_COUNT};
use wolfstream::publication::{LocalConductor, Publication, PublicationLimit};
use wolfstream::OfferError;

const CHANNEL: &str = "udp://localhost:40124";
const STREAM_ID: i32 = 10;

/// WolfStream soak runner
#[derive(Parser)]
#[command(name = "wolfstream-soak")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults are used when absent)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Number of create/publish/close cycles (runs until Ctrl+C when absent)
    #[arg(short, long)]
    iterations: Option<u64>,

    /// Messages offered per cycle
    #[arg(short, long, default_value = "10000")]
    messages: usize,

    /// Largest message payload in bytes
    #[arg(long, default_value = "256")]
    max_payload: usize,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    init_logging(&config.logging);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    run(&config, &cli, &running)
}

/// Load the configuration file (or defaults) and apply command line overrides
fn load_config(cli: &Cli) -> anyhow::Result<WolfStreamConfig> {
    let mut config = match &cli.config {
        Some(path) => WolfStreamConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => WolfStreamConfig::default(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.driver.data_dir = data_dir.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

fn init_logging(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.as_str().into());

    let compact = logging.is_compact();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(compact.then(|| tracing_subscriber::fmt::layer().compact()))
        .with((!compact).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

fn run(config: &WolfStreamConfig, cli: &Cli, running: &AtomicBool) -> anyhow::Result<()> {
    let error_log = Arc::new(DistinctErrorLog::new());
    let factory = RawLogFactory::from_config(config, error_log.clone())?;
    let conductor = Arc::new(LocalConductor::from_config(config));
    let mut rng = rand::thread_rng();

    tracing::info!(
        "Soaking in {:?} ({} messages per cycle, term length {})",
        config.data_dir(),
        cli.messages,
        config.buffers.publication_term_buffer_length
    );

    let started = Instant::now();
    let mut iteration: u64 = 0;
    let mut total_messages: u64 = 0;

    while running.load(Ordering::SeqCst) && cli.iterations.map_or(true, |max| iteration < max) {
        let session_id: i32 = rng.gen();
        let raw_log = factory.new_network_publication(CHANNEL, session_id, STREAM_ID, iteration as i64)?;
        raw_log.initialise(rng.gen(), config.driver.mtu_length)?;

        let publication = Publication::new(
            conductor.clone(),
            CHANNEL,
            iteration as i64,
            Arc::new(PublicationLimit::new(i64::MAX)),
            raw_log.log_buffers().clone(),
        )?;

        let payload = vec![0x5Au8; cli.max_payload.min(publication.max_message_length())];
        for _ in 0..cli.messages {
            let length = rng.gen_range(0..=payload.len());
            offer_with_retry(&publication, &raw_log, &payload[..length])?;
        }
        total_messages += cli.messages as u64;

        publication.close();
        raw_log.delete()?;
        iteration += 1;

        if iteration % 100 == 0 {
            let elapsed = started.elapsed().as_secs_f64();
            tracing::info!(
                "{} cycles, {} messages, {:.0} msg/s, {} distinct errors",
                iteration,
                total_messages,
                total_messages as f64 / elapsed,
                error_log.distinct_count()
            );
        }
    }

    tracing::info!("Soak finished after {} cycles", iteration);
    Ok(())
}

/// Offer one message, cleaning drained terms when rotation is blocked on them
fn offer_with_retry(publication: &Publication, raw_log: &RawLog, payload: &[u8]) -> anyhow::Result<i64> {
    loop {
        match publication.offer(payload) {
            Ok(position) => return Ok(position),
            Err(OfferError::AdminAction) => clean_terms(raw_log)?,
            Err(e) if e.is_retryable() => std::thread::yield_now(),
            Err(e) => bail!("offer failed at {:?}: {}", raw_log.location(), e),
        }
    }
}

fn clean_terms(raw_log: &RawLog) -> anyhow::Result<()> {
    let Some(region) = raw_log.log_buffers().acquire() else {
        bail!("log buffer {:?} closed while publishing", raw_log.location());
    };
    for partition in 0..PARTITION_COUNT {
        clean_term(&region, partition);
    }
    Ok(())
}
