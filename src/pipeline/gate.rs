//! Speaking-state gate coupling playback back into capture.
//!
//! The synthesizer engages the gate before it starts speaking and releases it
//! after a cool-down once playback ends. The chunker reads it on every frame and
//! discards microphone input while it is closed, so the system never
//! transcribes its own voice. Only those two components hold a reference.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Whether the microphone input is currently admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Nothing is playing; frames are classified.
    Open,
    /// Synthesized speech is playing (or decaying); frames are discarded.
    Closed,
}

/// Shared flag set while synthesized speech is being played back.
#[derive(Debug, Default)]
pub struct SpeakingState {
    speaking: AtomicBool,
    completed_cycles: AtomicU64,
}

impl SpeakingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of a synthesis cycle. Closes the gate.
    pub fn engage(&self) {
        self.speaking.store(true, Ordering::Release);
    }

    /// Engages the gate for one synthesis cycle.
    ///
    /// The returned guard waits out `cooldown` and releases the gate when
    /// dropped, so an unwinding synthesizer cannot leave capture deaf.
    pub fn hold(&self, cooldown: Duration) -> SpeakingGuard<'_> {
        self.engage();
        SpeakingGuard { gate: self, cooldown }
    }

    /// Ends the current synthesis cycle. Opens the gate.
    ///
    /// A release without a preceding engage is a no-op.
    pub fn release(&self) {
        if self.speaking.swap(false, Ordering::AcqRel) {
            self.completed_cycles.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Non-blocking read used by the chunker on every frame.
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Acquire)
    }

    pub fn state(&self) -> GateState {
        if self.is_speaking() {
            GateState::Closed
        } else {
            GateState::Open
        }
    }

    /// Number of engage/release cycles completed so far.
    pub fn completed_cycles(&self) -> u64 {
        self.completed_cycles.load(Ordering::Relaxed)
    }
}

/// Closes the gate for as long as it is alive. See [`SpeakingState::hold`].
#[must_use = "the gate reopens as soon as the guard is dropped"]
pub struct SpeakingGuard<'a> {
    gate: &'a SpeakingState,
    cooldown: Duration,
}

impl Drop for SpeakingGuard<'_> {
    fn drop(&mut self) {
        thread::sleep(self.cooldown);
        self.gate.release();
    }
}
