//! Phase Control - live phase stabilization loop
//!
//! Reads a line-delimited spectrum stream from stdin or a spawned acquisition
//! process, fits the phase of every frame it keeps up with, and drives the
//! actuator until Ctrl+C or end of stream. A recorded file given with
//! `--input` is replayed frame by frame, so every recorded spectrum is fitted.

use anyhow::{Context, Result};
use clap::Parser;
use phase_control::control::actuator::{Actuator, DryRunActuator, SimulatedRotator};
use phase_control::control::engine::StepReport;
use phase_control::control::runner::{replay, run_control_loop, spawn_reader, LoopExit, StopSignal};
use phase_control::stream::process::StreamClient;
use phase_control::stream::protocol::StreamMeta;
use phase_control::{
    AnalysisConfig, AnalysisEngine, ChirpedFringeModel, FrameBuffer, SessionConfig, SpectralModel,
    StreamReader,
};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "phase-control")]
#[command(about = "Closed-loop stabilization of a spectral interference phase", long_about = None)]
#[command(version)]
struct Cli {
    /// Session config file (default: user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Recorded stream to replay instead of reading stdin
    #[arg(long, conflicts_with = "spawn")]
    input: Option<PathBuf>,

    /// Acquisition program and its arguments, e.g. `--spawn python -- acquire.py`
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    spawn: Vec<String>,

    /// Stop after this many processed frames
    #[arg(long)]
    max_steps: Option<u64>,

    /// Only log actuator commands
    #[arg(long)]
    dry_run: bool,

    /// Write the accepted fit parameters back to the config file on exit
    #[arg(long)]
    save_on_exit: bool,

    /// Skip the bootstrap and fit phase only from the parameters in the config
    #[arg(long)]
    resume: bool,

    /// Print the default config as JSON and exit
    #[arg(long)]
    print_default_config: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(log_filter())
        .init();

    let cli = Cli::parse();

    if cli.print_default_config {
        println!("{}", serde_json::to_string_pretty(&SessionConfig::default())?);
        return Ok(());
    }

    let config_path = cli.config.clone().unwrap_or_else(SessionConfig::default_path);
    let mut session = if cli.config.is_some() {
        SessionConfig::load(&config_path)
            .with_context(|| format!("Failed to load config {}", config_path.display()))?
    } else {
        SessionConfig::load_or_default(&config_path)
    };
    if cli.dry_run {
        session.actuator.dry_run = true;
    }

    eprintln!("Phase Control v{}", phase_control::VERSION);

    // Set up Ctrl+C handler
    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.stop()).context("Failed to install Ctrl+C handler")?;
    }

    let accepted = if let Some((program, args)) = cli.spawn.split_first() {
        let mut client = StreamClient::spawn(program, args)?;
        let reader = client
            .take_reader()
            .context("Acquisition reader already taken")?;
        let result = run(reader, &session, &cli, &stop);
        client.stop();
        result?
    } else if let Some(path) = &cli.input {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let reader = StreamReader::open(BufReader::new(file))
            .with_context(|| format!("Failed to read stream header from {}", path.display()))?;
        replay_file(reader, &session, &cli, &stop)?
    } else {
        let reader = StreamReader::open(BufReader::new(io::stdin()))
            .context("Failed to read stream header from stdin")?;
        run(reader, &session, &cli, &stop)?
    };

    if cli.save_on_exit {
        session.analysis = accepted;
        session
            .save(&config_path)
            .with_context(|| format!("Failed to save config {}", config_path.display()))?;
    }

    Ok(())
}

/// `RUST_LOG` when set, otherwise info for this crate and its core
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("phase_control=info,phase_control_core=info"))
}

/// Engine over a fresh buffer for `meta`, with the configured actuator
fn build_engine(
    meta: &StreamMeta,
    session: &SessionConfig,
    cli: &Cli,
) -> Result<AnalysisEngine<ChirpedFringeModel, Box<dyn Actuator>>> {
    let buffer = Arc::new(FrameBuffer::new(meta.clone()));

    let settings = &session.actuator;
    let actuator: Box<dyn Actuator> = if settings.dry_run {
        Box::new(DryRunActuator::new(&settings.device_id))
    } else {
        Box::new(SimulatedRotator::new(&settings.device_id, settings.travel_limit_rad))
    };

    let mut engine = AnalysisEngine::new(
        buffer,
        ChirpedFringeModel,
        actuator,
        session.analysis.clone(),
        session.corrector,
    )
    .context("Invalid session config")?
    .with_notify_capacity(session.control.notify_capacity);
    if cli.resume {
        engine.resume_locked();
    }
    Ok(engine)
}

/// Log every config snapshot the engine publishes
fn spawn_config_watcher<M, A>(engine: &mut AnalysisEngine<M, A>) -> Result<JoinHandle<()>>
where
    M: SpectralModel,
    A: Actuator,
{
    let snapshots = engine.subscribe();
    thread::Builder::new()
        .name("config-watcher".into())
        .spawn(move || {
            for config in snapshots.iter() {
                debug!(
                    "Config snapshot: carrier {}, bandwidth {}, phase {}",
                    config.params.carrier_wavelength, config.params.bandwidth, config.params.phase
                );
            }
        })
        .context("Failed to start config watcher")
}

/// Run producer and control loop on a live stream
///
/// Returns the analysis config as it stood when the loop ended.
fn run<R>(
    reader: StreamReader<R>,
    session: &SessionConfig,
    cli: &Cli,
    stop: &StopSignal,
) -> Result<AnalysisConfig>
where
    R: BufRead + Send + 'static,
{
    let mut engine = build_engine(reader.meta(), session, cli)?;
    let watcher = spawn_config_watcher(&mut engine)?;

    let producer = spawn_reader(reader, Arc::clone(engine.buffer()), stop.clone())
        .context("Failed to start stream reader")?;

    eprintln!("Loop running. Press Ctrl+C to stop.");
    eprintln!("────────────────────────────────────────");

    let loop_settings = session.control.loop_settings(cli.max_steps);
    let exit = run_control_loop(&mut engine, &loop_settings, stop, print_status);
    report_exit(exit);
    stop.stop();

    if producer.is_finished() {
        match producer.join() {
            Ok(Some(e)) => warn!("Stream ended with error: {}", e),
            Ok(None) => {}
            Err(_) => error!("Stream reader thread panicked"),
        }
    } else {
        info!("Stream reader still blocked on input, not waiting for it");
    }

    Ok(finish(engine, watcher))
}

/// Process every frame of a recorded stream in order
///
/// Returns the analysis config as it stood after the last frame.
fn replay_file<R: BufRead>(
    mut reader: StreamReader<R>,
    session: &SessionConfig,
    cli: &Cli,
    stop: &StopSignal,
) -> Result<AnalysisConfig> {
    let mut engine = build_engine(reader.meta(), session, cli)?;
    let watcher = spawn_config_watcher(&mut engine)?;

    eprintln!("Replaying recording. Press Ctrl+C to stop.");
    eprintln!("────────────────────────────────────────");

    let (exit, error) = replay(&mut reader, &mut engine, cli.max_steps, stop, print_status);
    report_exit(exit);
    if let Some(e) = error {
        warn!("Recording ended with error: {}", e);
    }

    Ok(finish(engine, watcher))
}

fn report_exit(exit: LoopExit) {
    match exit {
        LoopExit::Stopped => eprintln!("Stopping..."),
        LoopExit::EndOfStream => eprintln!("End of stream."),
        LoopExit::StepLimit => eprintln!("Step limit reached."),
    }
}

/// Drop the engine, wait for the watcher and print the summary
fn finish<M, A>(engine: AnalysisEngine<M, A>, watcher: JoinHandle<()>) -> AnalysisConfig
where
    M: SpectralModel,
    A: Actuator,
{
    let stats = engine.stats().clone();
    let accepted = engine.config();
    drop(engine);
    if watcher.join().is_err() {
        error!("Config watcher thread panicked");
    }

    eprintln!(
        "Steps: {} | Frames: {} | Fit failures: {} | Commits: {} | Rejected: {} | Corrections: {} | Actuator errors: {} | Uptime: {}s",
        stats.steps,
        stats.frames_processed,
        stats.fit_failures,
        stats.commits,
        stats.rejections,
        stats.corrections,
        stats.actuator_errors,
        stats.uptime_seconds()
    );

    accepted
}

fn print_status(report: &StepReport) {
    let phase = match report.estimate {
        Some(e) => format!(
            "{:>+8.4} rad (std {:>5.2} deg)",
            e.phase.radians(),
            e.phase_std.degrees()
        ),
        None => "        -- collecting --     ".to_string(),
    };
    let residual = report
        .fit
        .as_ref()
        .map(|u| format!("{:>8.4}", u.fit.residual))
        .unwrap_or_else(|| "  failed".to_string());
    let actuator = if report.actuator_error.is_some() { " REFUSED" } else { "" };

    println!(
        "Frame {:>6} | {} | {:<9} | Phase: {} | Residual: {} | Cmd: {:>+8.4} rad{}",
        report.sequence,
        report.timestamp.format("%H:%M:%S%.3f"),
        format!("{:?}", report.state),
        phase,
        residual,
        report.command.angle.radians(),
        actuator
    );
}
