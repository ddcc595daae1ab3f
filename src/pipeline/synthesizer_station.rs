//! Synthesizer stage and its serialization worker.
//!
//! [`SynthesizerStation`] runs in the pipeline like any other station and
//! hands translated text to a bounded request queue without blocking. A single
//! [`SpeechWorker`] drains that queue, so playback never overlaps, and drives
//! the [`SpeakingState`] gate around every utterance:
//! engage, speak, cool down, release.

use crate::pipeline::error::StationError;
use crate::pipeline::gate::SpeakingState;
use crate::pipeline::station::{JoinOutcome, Station, join_with_timeout};
use crate::pipeline::types::{Event, EventKind};
use crate::tts::engine::SpeechEngine;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Queue and timing settings for the speech worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechWorkerConfig {
    pub queue_capacity: usize,
    /// Time the gate stays closed after playback ends.
    pub cooldown: Duration,
    pub poll_interval: Duration,
}

impl Default for SpeechWorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: crate::defaults::SPEECH_QUEUE_CAPACITY,
            cooldown: Duration::from_millis(crate::defaults::COOLDOWN_MS),
            poll_interval: Duration::from_millis(crate::defaults::POLL_INTERVAL_MS),
        }
    }
}

/// Counters shared between the queue, the worker and the orchestrator.
#[derive(Debug, Default)]
pub struct SpeechStats {
    accepted: AtomicU64,
    spoken: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl SpeechStats {
    pub fn spoken(&self) -> u64 {
        self.spoken.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Requests discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Accepted requests not yet spoken or failed, including one in playback.
    pub fn pending(&self) -> u64 {
        let done = self.spoken() + self.failed();
        self.accepted.load(Ordering::SeqCst).saturating_sub(done)
    }
}

/// Non-blocking producer side of the speech request queue.
#[derive(Debug, Clone)]
pub struct SpeechQueue {
    tx: Sender<String>,
    stats: Arc<SpeechStats>,
}

impl SpeechQueue {
    /// Enqueues `text`; returns false if it was discarded.
    pub fn submit(&self, text: String) -> bool {
        match self.tx.try_send(text) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::SeqCst);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn stats(&self) -> &SpeechStats {
        &self.stats
    }
}

/// Owns the thread that performs synthesis one request at a time.
pub struct SpeechWorker {
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    stats: Arc<SpeechStats>,
}

impl SpeechWorker {
    /// Starts the worker. The gate is only ever written from its thread.
    ///
    /// # Errors
    /// Fails if the OS refuses to spawn the thread.
    pub fn spawn(
        engine: Box<dyn SpeechEngine>,
        gate: Arc<SpeakingState>,
        config: SpeechWorkerConfig,
    ) -> std::io::Result<(Self, SpeechQueue)> {
        let (tx, rx) = bounded(config.queue_capacity.max(1));
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(SpeechStats::default());

        let handle = thread::Builder::new().name("voxrelay-speech".to_string()).spawn({
            let running = Arc::clone(&running);
            let stats = Arc::clone(&stats);
            move || speech_loop(engine, rx, gate, config, &running, &stats)
        })?;

        let worker = Self {
            handle: Some(handle),
            running,
            stats: Arc::clone(&stats),
        };
        Ok((worker, SpeechQueue { tx, stats }))
    }

    pub fn stats(&self) -> Arc<SpeechStats> {
        Arc::clone(&self.stats)
    }

    /// Asks the worker to exit after the current request and waits up to `timeout`.
    pub fn stop(mut self, timeout: Duration) -> JoinOutcome {
        self.running.store(false, Ordering::SeqCst);
        match self.handle.take() {
            Some(handle) => join_with_timeout(handle, timeout),
            None => JoinOutcome::Finished,
        }
    }
}

fn speech_loop(
    mut engine: Box<dyn SpeechEngine>,
    rx: Receiver<String>,
    gate: Arc<SpeakingState>,
    config: SpeechWorkerConfig,
    running: &AtomicBool,
    stats: &SpeechStats,
) {
    while running.load(Ordering::SeqCst) {
        let text = match rx.recv_timeout(config.poll_interval) {
            Ok(text) => text,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let started = Instant::now();
        let result = {
            let _held = gate.hold(config.cooldown);
            panic::catch_unwind(AssertUnwindSafe(|| engine.speak(&text)))
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(())) => {
                stats.spoken.fetch_add(1, Ordering::Relaxed);
                debug!(elapsed_ms, "spoke: {text}");
            }
            Ok(Err(e)) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(engine = engine.name(), "speech synthesis failed: {e}");
            }
            Err(_) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(engine = engine.name(), "speech engine panicked, skipping utterance");
            }
        }
    }

    info!(
        spoken = stats.spoken(),
        failed = stats.failed(),
        dropped = stats.dropped(),
        "speech worker stopped"
    );
}

/// Pipeline station that submits translations for playback.
///
/// Every event is forwarded downstream so the caption sink sees it whether
/// or not it was spoken.
pub struct SynthesizerStation {
    queue: SpeechQueue,
}

impl SynthesizerStation {
    pub fn new(queue: SpeechQueue) -> Self {
        Self { queue }
    }
}

impl Station for SynthesizerStation {
    type Input = Event;
    type Output = Event;

    fn name(&self) -> &'static str {
        "synthesizer"
    }

    fn process(&mut self, event: Event) -> Result<Option<Event>, StationError> {
        if event.kind == EventKind::FinalTranslation
            && !event.text.trim().is_empty()
            && !self.queue.submit(event.text.clone())
        {
            let dropped = self.queue.stats().dropped();
            if dropped == 1 {
                warn!(seq = event.seq, "speech queue full, utterance not spoken");
            } else {
                debug!(seq = event.seq, dropped, "speech queue full, utterance not spoken");
            }
        }
        Ok(Some(event))
    }
}
