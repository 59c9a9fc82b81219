//! Single-slot latest-value buffer
//!
//! Decouples the stream reader from the control loop. The producer overwrites
//! the slot on every frame and the consumer reads whatever is newest, so
//! frames arriving faster than the loop runs are dropped except the last one.
//! Each stored frame carries a sequence number assigned under the slot lock,
//! which lets the consumer tell a new frame from one it has already seen.

use super::protocol::{StreamFrame, StreamMeta};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A frame as stored in the buffer
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedFrame {
    /// 1-based arrival number; strictly increasing across updates
    pub sequence: u64,
    /// The decoded frame
    pub frame: StreamFrame,
}

#[derive(Debug, Default)]
struct Slot {
    last_sequence: u64,
    latest: Option<Arc<BufferedFrame>>,
}

/// Thread-safe latest-value store for stream frames
///
/// # Example
/// ```
/// use phase_control_core::stream::buffer::FrameBuffer;
/// use phase_control_core::stream::protocol::StreamMeta;
///
/// let meta = StreamMeta {
///     device_index: 0,
///     num_pixels: 2,
///     wavelengths: None,
///     exposure_ms: 10.0,
///     average: 1,
///     dark_subtraction: false,
/// };
/// let buffer = FrameBuffer::new(meta);
/// assert!(buffer.get_latest().is_none());
/// ```
#[derive(Debug)]
pub struct FrameBuffer {
    meta: StreamMeta,
    slot: Mutex<Slot>,
    closed: AtomicBool,
}

impl FrameBuffer {
    /// Create an empty buffer for a stream session
    pub fn new(meta: StreamMeta) -> Self {
        Self {
            meta,
            slot: Mutex::new(Slot::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Session header of the stream feeding this buffer
    pub fn meta(&self) -> &StreamMeta {
        &self.meta
    }

    /// Replace the stored frame
    ///
    /// Producer side. Holds the lock only for the swap.
    pub fn update(&self, frame: StreamFrame) {
        let previous = {
            let mut slot = self.lock();
            slot.last_sequence += 1;
            let stored = Arc::new(BufferedFrame {
                sequence: slot.last_sequence,
                frame,
            });
            slot.latest.replace(stored)
        };
        // dropped outside the lock
        drop(previous);
    }

    /// Most recent frame, `None` before the first update
    ///
    /// Consumer side. Does not consume: repeated calls return the same frame
    /// until the next update.
    pub fn get_latest(&self) -> Option<Arc<BufferedFrame>> {
        self.lock().latest.clone()
    }

    /// Sequence number of the most recent frame, 0 before the first update
    pub fn last_sequence(&self) -> u64 {
        self.lock().last_sequence
    }

    /// Mark the stream as finished; no more updates will follow
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether the producer has finished
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
