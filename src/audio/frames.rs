//! Slices an [`AudioSource`] into fixed-duration frames.

use crate::audio::source::AudioSource;
use crate::error::Result;
use crate::pipeline::types::Frame;
use std::collections::VecDeque;
use std::time::Duration;

/// Outcome of one [`AudioFrameSource::next_frame`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameRead {
    Frame(Frame),
    /// A live source had nothing yet; the caller should check cancellation and retry.
    Pending,
    /// A finite source ran out; any trailing partial frame is dropped.
    Exhausted,
}

/// Buffers arbitrary-sized reads and hands out exact frames.
///
/// `timestamp_ms` is the offset of the frame's first sample from the start of
/// the run, derived from the number of frames emitted, so it advances by
/// exactly `frame_ms` per frame regardless of how the device batches samples.
pub struct AudioFrameSource {
    source: Box<dyn AudioSource>,
    pending: VecDeque<i16>,
    frame_len: usize,
    frame_ms: u32,
    frames_emitted: u64,
}

impl AudioFrameSource {
    pub fn new(source: Box<dyn AudioSource>, sample_rate: u32, frame_ms: u32) -> Self {
        let frame_len = crate::defaults::frame_len(sample_rate, frame_ms).max(1);
        Self {
            source,
            pending: VecDeque::with_capacity(frame_len * 4),
            frame_len,
            frame_ms,
            frames_emitted: 0,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.source.start()
    }

    pub fn stop(&mut self) -> Result<()> {
        self.source.stop()
    }

    /// Samples per frame.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn is_finite(&self) -> bool {
        self.source.is_finite()
    }

    /// Returns the next full frame.
    ///
    /// For a live source with an empty buffer this sleeps one frame duration
    /// before reporting [`FrameRead::Pending`], which bounds how long
    /// cancellation can go unnoticed.
    ///
    /// # Errors
    /// Propagates read errors from the underlying source.
    pub fn next_frame(&mut self) -> Result<FrameRead> {
        while self.pending.len() < self.frame_len {
            let samples = self.source.read_samples()?;
            if samples.is_empty() {
                if self.source.is_finite() {
                    self.pending.clear();
                    return Ok(FrameRead::Exhausted);
                }
                std::thread::sleep(Duration::from_millis(self.frame_ms as u64));
                return Ok(FrameRead::Pending);
            }
            self.pending.extend(samples);
        }

        let samples: Vec<i16> = self.pending.drain(..self.frame_len).collect();
        let timestamp_ms = self.frames_emitted * self.frame_ms as u64;
        self.frames_emitted += 1;
        Ok(FrameRead::Frame(Frame::new(samples, timestamp_ms)))
    }
}
