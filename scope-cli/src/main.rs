//! # Harmonic Scope - Terminal Front-end
//!
//! Runs the acquisition-and-analysis pipeline against a line source and
//! prints the harmonic summary of every frame.
//!
//! ## Architecture
//! - **Ingestion thread**: reads ADC codes from a file, device node, stdin or
//!   the synthetic generator
//! - **Tick thread**: analyses the latest window on a fixed interval
//! - **Main thread**: receives frames over a bounded crossbeam channel and
//!   prints them; a slow terminal delays ticks instead of queueing frames

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use scope_core::config::SpectrumSource;
use scope_core::filter::{FilterKind, FilterSpec};
use scope_core::pipeline::channel_sink;
use scope_core::source::{LineSource, SampleSource, SyntheticConfig, SyntheticSource};
use scope_core::{Pipeline, ScopeConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How long to keep printing frames after the source runs dry.
const DRAIN_AFTER_EOF: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(
    name = "harmonic-scope",
    about = "Real-time spectrum and harmonic readout for a 10-bit ADC sample stream"
)]
struct Cli {
    /// JSON configuration file (defaults are used for missing fields)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    filter: FilterArgs,

    /// Transform the filtered window instead of the unfiltered one
    #[arg(long, global = true)]
    analyze_filtered: bool,

    /// Stop after this many seconds (runs until the source ends otherwise)
    #[arg(long, global = true)]
    duration_secs: Option<f64>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct FilterArgs {
    /// Filter type: none, lowpass, highpass or bandpass
    #[arg(long, global = true)]
    filter: Option<FilterKind>,

    /// Lowpass cutoff and lower bandpass edge, in Hz
    #[arg(long, global = true)]
    low: Option<f64>,

    /// Highpass cutoff and upper bandpass edge, in Hz
    #[arg(long, global = true)]
    high: Option<f64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read one ADC code per line from a file or device node ("-" for stdin)
    Read {
        #[arg(default_value = "-")]
        input: PathBuf,
    },
    /// Generate a noisy sine wave in place of the acquisition board
    Synthetic {
        /// Tone frequency in Hz
        #[arg(long, default_value_t = 50.0)]
        freq: f64,
        /// Tone amplitude in volts at the probe
        #[arg(long, default_value_t = 5.0)]
        amp: f64,
        /// Peak noise amplitude in volts
        #[arg(long, default_value_t = 0.1)]
        noise: f64,
        #[arg(long, default_value_t = 0x5eed)]
        seed: u64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli)?;

    match cli.command {
        Commands::Read { ref input } => {
            if input.as_os_str() == "-" {
                run_pipeline(config, LineSource::stdin(), cli.duration_secs)
            } else {
                run_pipeline(config, LineSource::open(input)?, cli.duration_secs)
            }
        }
        Commands::Synthetic {
            freq,
            amp,
            noise,
            seed,
        } => {
            info!("[MAIN] Synthetic source: {freq} Hz, {amp} V, noise {noise} V");
            let source = SyntheticSource::new(SyntheticConfig {
                frequency_hz: freq,
                amplitude: amp,
                noise,
                sample_rate: config.acquisition.sample_rate,
                calibration: config.calibration,
                paced: true,
                seed,
            });
            run_pipeline(config, source, cli.duration_secs)
        }
    }
}

/// Loads the config file if given and applies command-line overrides.
fn build_config(cli: &Cli) -> Result<ScopeConfig> {
    let mut config = match &cli.config {
        Some(path) => ScopeConfig::load_from_file(path)?,
        None => ScopeConfig::default(),
    };

    let filter = &mut config.filter;
    if let Some(kind) = cli.filter.filter {
        filter.kind = kind;
    }
    if let Some(low) = cli.filter.low {
        filter.cutoff_low_hz = low;
    }
    if let Some(high) = cli.filter.high {
        filter.cutoff_high_hz = high;
    }
    if cli.analyze_filtered {
        config.analysis.spectrum_source = SpectrumSource::Filtered;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn describe_filter(spec: &FilterSpec) -> String {
    match spec.kind {
        FilterKind::None => "none".to_string(),
        FilterKind::Lowpass => format!("lowpass {} Hz", spec.cutoff_low_hz),
        FilterKind::Highpass => format!("highpass {} Hz", spec.cutoff_high_hz),
        FilterKind::Bandpass => {
            format!("bandpass {}-{} Hz", spec.cutoff_low_hz, spec.cutoff_high_hz)
        }
    }
}

fn run_pipeline<S>(config: ScopeConfig, source: S, duration_secs: Option<f64>) -> Result<()>
where
    S: SampleSource + 'static,
{
    let deadline = duration_secs
        .map(|secs| {
            Duration::try_from_secs_f64(secs)
                .with_context(|| format!("invalid duration {secs} s"))
        })
        .transpose()?
        .map(|duration| Instant::now() + duration);
    let tick = config.acquisition.tick_interval();

    info!("[MAIN] Filter: {}", describe_filter(&config.filter));

    let (frame_tx, frame_rx) = crossbeam_channel::bounded(1);
    let mut pipeline = Pipeline::new(config, source, channel_sink(frame_tx))
        .context("failed to build pipeline")?;
    pipeline.start().context("failed to start pipeline")?;

    let mut source_ended_at: Option<Instant> = None;
    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("[MAIN] Duration elapsed");
            break;
        }
        match source_ended_at {
            Some(at) if at.elapsed() >= DRAIN_AFTER_EOF => break,
            None if !pipeline.ingestion_active() => {
                info!("[MAIN] Source ended, draining last frames");
                source_ended_at = Some(Instant::now());
            }
            _ => {}
        }

        match frame_rx.recv_timeout(tick * 4) {
            Ok(frame) => {
                let marker = if frame.filter_fell_back {
                    " [filter bypassed]"
                } else {
                    ""
                };
                println!("#{:<6} {}{}", frame.sequence, frame.summary(), marker);
            }
            Err(RecvTimeoutError::Timeout) => warn!("[MAIN] No frame within {:?}", tick * 4),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Let a tick blocked on the channel finish before joining.
    drop(frame_rx);
    pipeline.stop();
    Ok(())
}
