//! Synthetic spectrum stream
//!
//! Writes a meta record followed by frames of a chirped fringe pattern whose
//! phase drifts slowly, in the same line-delimited format the acquisition
//! process produces. Pipe it into `phase-control` to exercise the loop
//! without hardware:
//!
//! ```bash
//! simulate-stream --frames 500 | phase-control --dry-run
//! ```

use anyhow::Result;
use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use clap::Parser;
use phase_control::analysis::model::SpectralModel;
use phase_control::stream::protocol::{StreamFrame, StreamMeta, StreamRecord};
use phase_control::units::Angle;
use phase_control::{ChirpedFringeModel, FitParameters};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::{self, BufWriter, Write};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "simulate-stream")]
#[command(about = "Emit a synthetic drifting-phase spectrum stream on stdout", long_about = None)]
struct Args {
    /// Number of frames (default: until interrupted)
    #[arg(long)]
    frames: Option<u64>,

    /// Pixels per frame
    #[arg(long, default_value = "512")]
    pixels: usize,

    /// First pixel wavelength in nm
    #[arg(long, default_value = "797.0")]
    start_nm: f64,

    /// Last pixel wavelength in nm
    #[arg(long, default_value = "808.0")]
    end_nm: f64,

    /// Phase drift per frame in radians
    #[arg(long, default_value = "0.005")]
    drift: f64,

    /// Relative noise amplitude
    #[arg(long, default_value = "0.01")]
    noise: f64,

    /// Delay between frames in milliseconds
    #[arg(long, default_value = "10")]
    interval_ms: u64,

    /// Random seed
    #[arg(long, default_value = "42")]
    seed: u64,
}

/// Detector full scale
const FULL_SCALE: f64 = 60000.0;

/// Dark offset added to every pixel
const DARK_COUNTS: f64 = 1500.0;

fn main() -> Result<()> {
    let args = Args::parse();
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let wavelengths = linear_axis(args.start_nm, args.end_nm, args.pixels);
    let meta = StreamMeta {
        device_index: 0,
        num_pixels: args.pixels,
        wavelengths: Some(wavelengths.clone()),
        exposure_ms: args.interval_ms as f64,
        average: 1,
        dark_subtraction: false,
    };
    writeln!(out, "{}", StreamRecord::Meta(meta).to_line()?)?;
    out.flush()?;

    let model = ChirpedFringeModel;
    let mut params = FitParameters::default();
    let mut rng = StdRng::seed_from_u64(args.seed);
    let start: NaiveDateTime = Utc::now().naive_utc();
    let mut k = 0u64;

    while args.frames.map_or(true, |n| k < n) {
        params.phase = Angle::from_radians(FitParameters::default().phase.radians() + args.drift * k as f64);

        let counts = model
            .curve(&wavelengths, &params)
            .iter()
            .map(|v| {
                let noisy = v + args.noise * rng.gen_range(-1.0..1.0);
                (DARK_COUNTS + noisy.clamp(0.0, 1.0) * FULL_SCALE).round() as u32
            })
            .collect();

        let frame = StreamFrame {
            timestamp: start + ChronoDuration::milliseconds((k * args.interval_ms) as i64),
            device_index: 0,
            counts,
        };

        // a closed pipe ends the simulation
        if writeln!(out, "{}", StreamRecord::Frame(frame).to_line()?).is_err() || out.flush().is_err() {
            break;
        }

        k += 1;
        if args.interval_ms > 0 {
            std::thread::sleep(Duration::from_millis(args.interval_ms));
        }
    }

    Ok(())
}

fn linear_axis(start: f64, end: f64, n: usize) -> Vec<f64> {
    if n < 2 {
        return vec![start; n];
    }
    let step = (end - start) / (n - 1) as f64;
    (0..n).map(|i| start + step * i as f64).collect()
}
