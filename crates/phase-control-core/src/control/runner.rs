//! Producer and consumer loops
//!
//! The reader thread decodes the stream into the [`FrameBuffer`]; the control
//! loop steps the engine at its own cadence. Both watch one [`StopSignal`].
//! The reader finishes its in-flight decode before exiting and the control
//! loop always completes the current step, so a stop never interrupts a
//! command on its way to the actuator.

use super::actuator::Actuator;
use super::engine::{AnalysisEngine, StepOutcome, StepReport};
use crate::analysis::model::SpectralModel;
use crate::stream::buffer::FrameBuffer;
use crate::stream::protocol::{StreamError, StreamReader};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every loop holding this signal to exit
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Control loop cadence
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    /// Pause after a processed frame
    pub step_interval: Duration,
    /// Pause when no new frame was available
    pub idle_interval: Duration,
    /// Stop after this many processed frames
    pub max_steps: Option<u64>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            step_interval: Duration::from_millis(20),
            idle_interval: Duration::from_millis(50),
            max_steps: None,
        }
    }
}

/// Why the control loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The stop signal was raised
    Stopped,
    /// The stream closed and its last frame was processed
    EndOfStream,
    /// `max_steps` frames were processed
    StepLimit,
}

/// Start the producer thread
///
/// Decodes frames into `buffer` until end of input, a transport error or a
/// stop request, then closes the buffer. The thread returns the transport
/// error that ended the stream, if any.
///
/// # Arguments
/// * `reader` - Opened stream, positioned after the meta record
/// * `buffer` - Buffer to feed
/// * `stop` - Checked between frames
pub fn spawn_reader<R>(
    mut reader: StreamReader<R>,
    buffer: Arc<FrameBuffer>,
    stop: StopSignal,
) -> std::io::Result<JoinHandle<Option<StreamError>>>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("stream-reader".into())
        .spawn(move || {
            let mut frames = 0u64;
            let mut stopped = false;
            for frame in reader.by_ref() {
                frames += 1;
                buffer.update(frame);
                if stop.is_stopped() {
                    stopped = true;
                    break;
                }
            }

            let termination = reader.take_termination();
            match &termination {
                _ if stopped => tracing::info!("Reader stopping after {} frames", frames),
                Some(e) => tracing::warn!("Stream terminated after {} frames: {}", frames, e),
                None => tracing::info!("Stream ended after {} frames", frames),
            }
            buffer.close();
            termination
        })
}

/// Step the engine until stopped, the stream ends or the step limit is hit
///
/// # Arguments
/// * `engine` - Engine to drive
/// * `settings` - Loop cadence
/// * `stop` - Checked before every step
/// * `on_report` - Called with every processed frame's report
pub fn run_control_loop<M, A, F>(
    engine: &mut AnalysisEngine<M, A>,
    settings: &LoopSettings,
    stop: &StopSignal,
    mut on_report: F,
) -> LoopExit
where
    M: SpectralModel,
    A: Actuator,
    F: FnMut(&StepReport),
{
    let mut processed = 0u64;

    loop {
        if stop.is_stopped() {
            return LoopExit::Stopped;
        }

        // read before stepping so a frame stored just before close is not missed
        let closed = engine.buffer().is_closed();

        match engine.step() {
            StepOutcome::Processed(report) => {
                processed += 1;
                on_report(&report);
                if settings.max_steps.is_some_and(|max| processed >= max) {
                    return LoopExit::StepLimit;
                }
                thread::sleep(settings.step_interval);
            }
            StepOutcome::Discarded(_) => thread::sleep(settings.step_interval),
            StepOutcome::NoData | StepOutcome::Repeated => {
                if closed {
                    return LoopExit::EndOfStream;
                }
                thread::sleep(settings.idle_interval);
            }
        }
    }
}

/// Step the engine once for every frame of a recorded stream
///
/// Unlike the live pair of [`spawn_reader`] and [`run_control_loop`], no
/// frame is skipped: each one is stored in the engine's buffer and stepped
/// before the next is decoded. Closes the buffer when done.
///
/// Returns why replay ended and the transport error that ended the stream,
/// if any.
///
/// # Arguments
/// * `reader` - Opened recording, positioned after the meta record
/// * `engine` - Engine reading from the buffer to feed
/// * `max_steps` - Stop after this many processed frames
/// * `stop` - Checked before every frame
/// * `on_report` - Called with every processed frame's report
pub fn replay<R, M, A, F>(
    reader: &mut StreamReader<R>,
    engine: &mut AnalysisEngine<M, A>,
    max_steps: Option<u64>,
    stop: &StopSignal,
    mut on_report: F,
) -> (LoopExit, Option<StreamError>)
where
    R: BufRead,
    M: SpectralModel,
    A: Actuator,
    F: FnMut(&StepReport),
{
    let buffer = Arc::clone(engine.buffer());
    let mut processed = 0u64;

    let result = loop {
        if stop.is_stopped() {
            break (LoopExit::Stopped, None);
        }
        if max_steps.is_some_and(|max| processed >= max) {
            break (LoopExit::StepLimit, None);
        }
        match reader.next_frame() {
            Ok(Some(frame)) => {
                buffer.update(frame);
                if let StepOutcome::Processed(report) = engine.step() {
                    processed += 1;
                    on_report(&report);
                }
            }
            Ok(None) => break (LoopExit::EndOfStream, None),
            Err(e) => {
                tracing::warn!("Recording ended after {} frames: {}", processed, e);
                break (LoopExit::EndOfStream, Some(e));
            }
        }
    };

    tracing::info!("Replay finished: {} frames processed", processed);
    buffer.close();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::corrector::CorrectorConfig;
    use crate::analysis::model::ChirpedFringeModel;
    use crate::analysis::params::{AnalysisConfig, FitParameters};
    use crate::control::actuator::DryRunActuator;
    use crate::stream::protocol::{StreamFrame, StreamMeta, StreamRecord};
    use std::io::{BufReader, Cursor, Read};
    use std::time::Instant;

    const PIXELS: usize = 64;

    fn meta() -> StreamMeta {
        StreamMeta {
            device_index: 0,
            num_pixels: PIXELS,
            wavelengths: Some((0..PIXELS).map(|i| 800.0 + i as f64 * 0.08).collect()),
            exposure_ms: 1.0,
            average: 1,
            dark_subtraction: false,
        }
    }

    fn frame_line() -> String {
        let params = FitParameters {
            baseline: 0.0,
            ..Default::default()
        };
        let counts = ChirpedFringeModel
            .curve(&meta().wavelength_axis(), &params)
            .iter()
            .map(|v| (v * 60000.0).round() as u32)
            .collect();
        let frame = StreamFrame {
            timestamp: Default::default(),
            device_index: 0,
            counts,
        };
        let mut line = StreamRecord::Frame(frame).to_line().unwrap();
        line.push('\n');
        line
    }

    fn recording(frames: usize) -> String {
        let mut text = StreamRecord::Meta(meta()).to_line().unwrap();
        text.push('\n');
        for _ in 0..frames {
            text.push_str(&frame_line());
        }
        text
    }

    /// Meta record followed by the same frame forever
    struct EndlessStream {
        pending: Vec<u8>,
        frame: Vec<u8>,
    }

    impl Read for EndlessStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pending.is_empty() {
                self.pending = self.frame.clone();
            }
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }

    fn engine(buffer: Arc<FrameBuffer>) -> AnalysisEngine<ChirpedFringeModel, DryRunActuator> {
        let mut config = AnalysisConfig::default();
        config.params.baseline = 0.0;
        config.set_avg_spectra(5).unwrap();
        AnalysisEngine::new(
            buffer,
            ChirpedFringeModel,
            DryRunActuator::new("test"),
            config,
            CorrectorConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_stop_signal_is_shared() {
        let a = StopSignal::new();
        let b = a.clone();
        assert!(!b.is_stopped());
        a.stop();
        assert!(b.is_stopped());
    }

    #[test]
    fn test_reader_exits_on_stop() {
        let mut header = StreamRecord::Meta(meta()).to_line().unwrap();
        header.push('\n');
        let source = EndlessStream {
            pending: header.into_bytes(),
            frame: frame_line().into_bytes(),
        };
        let reader = StreamReader::open(BufReader::new(source)).unwrap();
        let buffer = Arc::new(FrameBuffer::new(reader.meta().clone()));
        let stop = StopSignal::new();

        let handle = spawn_reader(reader, Arc::clone(&buffer), stop.clone()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while buffer.last_sequence() < 10 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        stop.stop();

        assert!(handle.join().unwrap().is_none());
        assert!(buffer.is_closed());
        assert!(buffer.last_sequence() >= 10);
    }

    #[test]
    fn test_replay_processes_every_frame() {
        let mut reader = StreamReader::open(Cursor::new(recording(25).into_bytes())).unwrap();
        let buffer = Arc::new(FrameBuffer::new(reader.meta().clone()));
        let mut engine = engine(Arc::clone(&buffer));

        let mut sequences = Vec::new();
        let (exit, error) = replay(&mut reader, &mut engine, None, &StopSignal::new(), |r| {
            sequences.push(r.sequence)
        });

        assert_eq!(exit, LoopExit::EndOfStream);
        assert!(error.is_none());
        assert_eq!(sequences, (1..=25).collect::<Vec<u64>>());
        assert_eq!(engine.stats().frames_processed, 25);
        assert_eq!(engine.stats().commits, 5);
        assert!(buffer.is_closed());
    }

    #[test]
    fn test_replay_step_limit_and_stop() {
        let mut reader = StreamReader::open(Cursor::new(recording(10).into_bytes())).unwrap();
        let buffer = Arc::new(FrameBuffer::new(reader.meta().clone()));
        let mut engine = engine(buffer);

        let (exit, _) = replay(&mut reader, &mut engine, Some(3), &StopSignal::new(), |_| {});
        assert_eq!(exit, LoopExit::StepLimit);
        assert_eq!(engine.stats().frames_processed, 3);

        let stop = StopSignal::new();
        stop.stop();
        let (exit, _) = replay(&mut reader, &mut engine, None, &stop, |_| {});
        assert_eq!(exit, LoopExit::Stopped);
        assert_eq!(engine.stats().frames_processed, 3);
    }

    #[test]
    fn test_default_cadence() {
        let s = LoopSettings::default();
        assert_eq!(s.step_interval, Duration::from_millis(20));
        assert_eq!(s.idle_interval, Duration::from_millis(50));
        assert!(s.max_steps.is_none());
    }
}
