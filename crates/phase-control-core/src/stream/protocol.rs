//! Line-delimited JSON frame transport
//!
//! An acquisition process writes one JSON object per line. The first record
//! is a `meta` header describing the device session, every following record
//! is a `frame` with raw per-pixel counts:
//!
//! ```text
//! {"type":"meta","device_index":0,"num_pixels":4,"wavelengths":[0,1,2,3],"exposure_ms":20,"average":1,"dark_subtraction":0}
//! {"type":"frame","timestamp":"2024-05-01T12:00:00.125000","device_index":0,"counts":[10,20,15,5]}
//! ```
//!
//! A malformed or out-of-sequence record ends the stream: the reader cannot
//! resynchronize safely, so the error is kept as the termination reason and
//! no further frames are produced.

use crate::analysis::spectrum::{Spectrum, SpectrumError};
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use std::io::BufRead;
use thiserror::Error;

/// Errors that end a stream
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed record on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Stream ended before the meta record")]
    MissingMeta,

    #[error("Expected meta record on line {line}, got a frame")]
    FrameBeforeMeta { line: usize },

    #[error("Unexpected second meta record on line {line}")]
    DuplicateMeta { line: usize },

    #[error("Frame on line {line} has {got} pixels, meta declared {expected}")]
    PixelCountMismatch {
        line: usize,
        expected: usize,
        got: usize,
    },
}

/// Static session header, sent once before any frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMeta {
    /// Index of the acquiring device
    pub device_index: u32,
    /// Pixels per frame
    pub num_pixels: usize,
    /// Wavelength per pixel in nanometers, if the device is calibrated
    #[serde(default)]
    pub wavelengths: Option<Vec<f64>>,
    /// Exposure time in milliseconds
    #[serde(default)]
    pub exposure_ms: f64,
    /// Hardware averaging count
    #[serde(default = "default_average")]
    pub average: u32,
    /// Whether the device subtracts its dark signal
    #[serde(default, deserialize_with = "flag")]
    pub dark_subtraction: bool,
}

fn default_average() -> u32 {
    1
}

/// Accept `true`/`false` as well as `1`/`0`
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}

impl StreamMeta {
    /// Wavelength axis in nanometers, one entry per pixel
    ///
    /// Uses the calibration array when it matches the pixel count and falls
    /// back to pixel indices otherwise.
    pub fn wavelength_axis(&self) -> Vec<f64> {
        match &self.wavelengths {
            Some(w) if w.len() == self.num_pixels => w.clone(),
            Some(w) => {
                tracing::warn!(
                    "Calibration has {} entries for {} pixels, using pixel indices",
                    w.len(),
                    self.num_pixels
                );
                pixel_axis(self.num_pixels)
            }
            None => pixel_axis(self.num_pixels),
        }
    }

    /// Calibrated, normalized spectrum of a frame
    pub fn spectrum(&self, frame: &StreamFrame) -> Result<Spectrum, SpectrumError> {
        Spectrum::from_counts(&self.wavelength_axis(), &frame.counts)
    }
}

fn pixel_axis(n: usize) -> Vec<f64> {
    (0..n).map(|i| i as f64).collect()
}

/// Evaluate a device lookup polynomial per pixel
///
/// `coefficients[k]` multiplies `i^k`; devices typically ship four
/// coefficients (cubic).
///
/// # Example
/// ```
/// use phase_control_core::stream::protocol::polynomial_axis;
///
/// assert_eq!(polynomial_axis(&[500.0, 0.5], 3), vec![500.0, 500.5, 501.0]);
/// ```
pub fn polynomial_axis(coefficients: &[f64], num_pixels: usize) -> Vec<f64> {
    (0..num_pixels)
        .map(|i| {
            let x = i as f64;
            // Horner
            coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c)
        })
        .collect()
}

/// One acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    /// Acquisition time as reported by the device host (no offset)
    pub timestamp: NaiveDateTime,
    /// Index of the acquiring device
    pub device_index: u32,
    /// Raw counts per pixel
    pub counts: Vec<u32>,
}

/// One line of the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamRecord {
    Meta(StreamMeta),
    Frame(StreamFrame),
}

impl StreamRecord {
    /// Encode as one stream line, without the trailing newline
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Decoder for a line-delimited stream
///
/// Iterating yields frames until end of input or the first transport error;
/// [`StreamReader::termination`] tells which.
pub struct StreamReader<R> {
    reader: R,
    meta: StreamMeta,
    line: usize,
    buf: String,
    termination: Option<StreamError>,
    finished: bool,
}

impl<R: BufRead> StreamReader<R> {
    /// Read the meta header and return a reader positioned at the first frame
    ///
    /// # Arguments
    /// * `reader` - Buffered source of stream lines
    pub fn open(mut reader: R) -> Result<Self, StreamError> {
        let mut buf = String::new();
        let mut line = 0;

        let record = loop {
            buf.clear();
            if reader.read_line(&mut buf)? == 0 {
                return Err(StreamError::MissingMeta);
            }
            line += 1;
            if !buf.trim().is_empty() {
                break parse_record(&buf, line)?;
            }
        };

        let meta = match record {
            StreamRecord::Meta(meta) => meta,
            StreamRecord::Frame(_) => return Err(StreamError::FrameBeforeMeta { line }),
        };

        tracing::info!(
            "Stream opened: device {}, {} pixels, exposure {} ms, calibrated: {}",
            meta.device_index,
            meta.num_pixels,
            meta.exposure_ms,
            meta.wavelengths.is_some()
        );

        Ok(Self {
            reader,
            meta,
            line,
            buf,
            termination: None,
            finished: false,
        })
    }

    /// Session header
    pub fn meta(&self) -> &StreamMeta {
        &self.meta
    }

    /// Why the stream ended, `None` for a clean end of input
    pub fn termination(&self) -> Option<&StreamError> {
        self.termination.as_ref()
    }

    /// Take the termination error out of the reader
    pub fn take_termination(&mut self) -> Option<StreamError> {
        self.termination.take()
    }

    /// Decode the next frame
    ///
    /// Returns `Ok(None)` at end of input. Blank lines are skipped.
    pub fn next_frame(&mut self) -> Result<Option<StreamFrame>, StreamError> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line += 1;
            if self.buf.trim().is_empty() {
                continue;
            }

            return match parse_record(&self.buf, self.line)? {
                StreamRecord::Meta(_) => Err(StreamError::DuplicateMeta { line: self.line }),
                StreamRecord::Frame(frame) if frame.counts.len() != self.meta.num_pixels => {
                    Err(StreamError::PixelCountMismatch {
                        line: self.line,
                        expected: self.meta.num_pixels,
                        got: frame.counts.len(),
                    })
                }
                StreamRecord::Frame(frame) => {
                    tracing::trace!("Decoded frame on line {}", self.line);
                    Ok(Some(frame))
                }
            };
        }
    }
}

impl<R: BufRead> Iterator for StreamReader<R> {
    type Item = StreamFrame;

    fn next(&mut self) -> Option<StreamFrame> {
        if self.finished {
            return None;
        }
        match self.next_frame() {
            Ok(Some(frame)) => Some(frame),
            Ok(None) => {
                tracing::info!("End of stream after {} lines", self.line);
                self.finished = true;
                None
            }
            Err(e) => {
                tracing::warn!("Stream terminated: {}", e);
                self.termination = Some(e);
                self.finished = true;
                None
            }
        }
    }
}

fn parse_record(line_text: &str, line: usize) -> Result<StreamRecord, StreamError> {
    serde_json::from_str(line_text.trim()).map_err(|source| StreamError::Malformed { line, source })
}
