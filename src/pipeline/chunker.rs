//! Voice-activity chunker: turns a frame stream into utterance-sized chunks.
//!
//! [`VoiceActivityChunker`] is the clock-free state machine. It only sees
//! frames that were already classified, so it can be driven directly in tests.
//! [`ChunkerStation`] wraps it with a [`FrameClassifier`] and the shared
//! [`SpeakingState`] gate.

use crate::audio::vad::FrameClassifier;
use crate::pipeline::error::StationError;
use crate::pipeline::gate::SpeakingState;
use crate::pipeline::station::Station;
use crate::pipeline::types::{AudioChunk, Frame};
use crossbeam_channel::{Sender, TrySendError};
use std::sync::Arc;
use tracing::{debug, warn};

/// Segmentation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub sample_rate: u32,
    pub frame_ms: u32,
    /// Chunks shorter than this are discarded unless forced by the gate.
    pub min_chunk_ms: u64,
    /// Typical utterance length; sizes the accumulation buffer up front.
    pub target_chunk_ms: u64,
    /// Hard cap; a speech run reaching it is closed without waiting for silence.
    pub max_chunk_ms: u64,
    /// The chunk closes once trailing silence exceeds this many frames.
    pub silence_frames: u32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::defaults::SAMPLE_RATE,
            frame_ms: crate::defaults::FRAME_MS,
            min_chunk_ms: crate::defaults::MIN_CHUNK_MS,
            target_chunk_ms: crate::defaults::TARGET_CHUNK_MS,
            max_chunk_ms: crate::defaults::MAX_CHUNK_MS,
            silence_frames: crate::defaults::SILENCE_FRAMES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkerState {
    Idle,
    Accumulating,
}

/// Why an in-progress chunk was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    TrailingSilence,
    MaxDuration,
    GateClosed,
    EndOfStream,
}

/// Idle/Accumulating state machine over classified frames.
#[derive(Debug)]
pub struct VoiceActivityChunker {
    config: ChunkerConfig,
    source_lang: String,
    state: ChunkerState,
    buffer: Vec<i16>,
    start_ms: u64,
    last_frame_ms: u64,
    trailing_silence: u32,
    voiced_frames: u64,
    emitted: u64,
    dropped_short: u64,
}

impl VoiceActivityChunker {
    pub fn new(config: ChunkerConfig, source_lang: impl Into<String>) -> Self {
        Self {
            config,
            source_lang: source_lang.into(),
            state: ChunkerState::Idle,
            buffer: Vec::new(),
            start_ms: 0,
            last_frame_ms: 0,
            trailing_silence: 0,
            voiced_frames: 0,
            emitted: 0,
            dropped_short: 0,
        }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// True while a speech run is being buffered.
    pub fn is_accumulating(&self) -> bool {
        self.state == ChunkerState::Accumulating
    }

    /// Chunks emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Chunks discarded for being shorter than `min_chunk_ms`.
    pub fn dropped_short(&self) -> u64 {
        self.dropped_short
    }

    /// Duration of the buffered audio in milliseconds.
    pub fn buffered_ms(&self) -> u64 {
        if self.config.sample_rate == 0 {
            return 0;
        }
        self.buffer.len() as u64 * 1000 / self.config.sample_rate as u64
    }

    /// Feeds one classified frame taken while the gate was open.
    pub fn on_frame(&mut self, frame: Frame, is_speech: bool) -> Option<AudioChunk> {
        match self.state {
            ChunkerState::Idle if !is_speech => None,
            ChunkerState::Idle => {
                self.state = ChunkerState::Accumulating;
                self.start_ms = frame.timestamp_ms;
                self.trailing_silence = 0;
                self.voiced_frames = 1;
                self.buffer.clear();
                self.buffer.reserve(self.target_samples());
                self.push(frame);
                self.close_if_over_cap()
            }
            ChunkerState::Accumulating => {
                if is_speech {
                    self.trailing_silence = 0;
                    self.voiced_frames += 1;
                } else {
                    self.trailing_silence += 1;
                }
                self.push(frame);

                if self.trailing_silence > self.config.silence_frames {
                    return self.close(CloseReason::TrailingSilence);
                }
                self.close_if_over_cap()
            }
        }
    }

    /// Called for a frame that arrived while the gate was closed.
    ///
    /// The frame itself is discarded. A chunk in progress is flushed if it
    /// meets the minimum duration, otherwise dropped.
    pub fn on_gated_frame(&mut self) -> Option<AudioChunk> {
        match self.state {
            ChunkerState::Idle => None,
            ChunkerState::Accumulating => self.close(CloseReason::GateClosed),
        }
    }

    /// Closes whatever is buffered at end of stream or shutdown.
    pub fn flush(&mut self) -> Option<AudioChunk> {
        match self.state {
            ChunkerState::Idle => None,
            ChunkerState::Accumulating => self.close(CloseReason::EndOfStream),
        }
    }

    fn push(&mut self, frame: Frame) {
        self.last_frame_ms = frame.timestamp_ms;
        self.buffer.extend_from_slice(&frame.samples);
    }

    fn target_samples(&self) -> usize {
        (self.config.target_chunk_ms * self.config.sample_rate as u64 / 1000) as usize
    }

    fn close_if_over_cap(&mut self) -> Option<AudioChunk> {
        if self.buffered_ms() >= self.config.max_chunk_ms {
            self.close(CloseReason::MaxDuration)
        } else {
            None
        }
    }

    fn close(&mut self, reason: CloseReason) -> Option<AudioChunk> {
        let duration_ms = self.buffered_ms();
        let pcm = std::mem::take(&mut self.buffer);
        self.state = ChunkerState::Idle;
        self.trailing_silence = 0;

        if duration_ms < self.config.min_chunk_ms {
            self.dropped_short += 1;
            debug!(
                ?reason,
                duration_ms,
                min_ms = self.config.min_chunk_ms,
                "discarding short chunk"
            );
            return None;
        }

        self.emitted += 1;
        debug!(?reason, duration_ms, start_ms = self.start_ms, "chunk closed");
        Some(AudioChunk {
            start_ms: self.start_ms,
            end_ms: self.last_frame_ms,
            pcm,
            source_lang: self.source_lang.clone(),
            sample_rate: self.config.sample_rate,
            voiced_ms: self.voiced_frames * self.config.frame_ms as u64,
        })
    }
}

/// Station that classifies frames and segments them, honoring the speaking gate.
pub struct ChunkerStation {
    chunker: VoiceActivityChunker,
    classifier: Box<dyn FrameClassifier>,
    gate: Arc<SpeakingState>,
    gated_frames: u64,
    /// Output channel for flushing remaining audio on shutdown.
    flush_tx: Option<Sender<AudioChunk>>,
}

impl ChunkerStation {
    pub fn new(
        chunker: VoiceActivityChunker,
        classifier: Box<dyn FrameClassifier>,
        gate: Arc<SpeakingState>,
    ) -> Self {
        Self {
            chunker,
            classifier,
            gate,
            gated_frames: 0,
            flush_tx: None,
        }
    }

    /// Set the output channel used to flush remaining audio on shutdown.
    pub fn with_flush_tx(mut self, tx: Sender<AudioChunk>) -> Self {
        self.flush_tx = Some(tx);
        self
    }

    /// Frames discarded because synthesized speech was playing.
    pub fn gated_frames(&self) -> u64 {
        self.gated_frames
    }
}

impl Station for ChunkerStation {
    type Input = Frame;
    type Output = AudioChunk;

    fn name(&self) -> &'static str {
        "chunker"
    }

    fn process(&mut self, frame: Frame) -> Result<Option<AudioChunk>, StationError> {
        // A frame queued during playback stays gated even if the gate has
        // since reopened.
        if frame.gated || self.gate.is_speaking() {
            self.gated_frames += 1;
            return Ok(self.chunker.on_gated_frame());
        }

        let is_speech = self
            .classifier
            .is_speech(&frame.samples)
            .map_err(|e| StationError::Recoverable(format!("frame classification failed: {e}")))?;

        Ok(self.chunker.on_frame(frame, is_speech))
    }

    fn shutdown(&mut self) {
        debug!(
            emitted = self.chunker.emitted(),
            dropped_short = self.chunker.dropped_short(),
            gated_frames = self.gated_frames,
            classifier = self.classifier.name(),
            "chunker finished"
        );

        if let Some(chunk) = self.chunker.flush()
            && let Some(tx) = self.flush_tx.take()
        {
            match tx.try_send(chunk) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => warn!("transcriber queue full, final chunk dropped"),
                Err(TrySendError::Disconnected(_)) => {
                    debug!("transcriber already gone, final chunk dropped")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crossbeam_channel::bounded;

    const FRAME_LEN: usize = 480;

    fn config() -> ChunkerConfig {
        ChunkerConfig::default()
    }

    /// Feeds `(count, is_speech)` runs with 30ms timestamps, collecting chunks.
    fn feed(chunker: &mut VoiceActivityChunker, runs: &[(usize, bool)]) -> Vec<AudioChunk> {
        let mut chunks = Vec::new();
        let mut ts = 0;
        for &(count, speech) in runs {
            for _ in 0..count {
                let amplitude = if speech { 8000 } else { 0 };
                let frame = Frame::new(vec![amplitude; FRAME_LEN], ts);
                chunks.extend(chunker.on_frame(frame, speech));
                ts += 30;
            }
        }
        chunks
    }

    /// Classifies by the first sample: non-zero means speech.
    struct MarkerClassifier;

    impl FrameClassifier for MarkerClassifier {
        fn is_speech(&mut self, frame: &[i16]) -> Result<bool> {
            Ok(frame.first().is_some_and(|&s| s != 0))
        }

        fn name(&self) -> &'static str {
            "marker"
        }
    }

    struct BrokenClassifier;

    impl FrameClassifier for BrokenClassifier {
        fn is_speech(&mut self, _frame: &[i16]) -> Result<bool> {
            Err(crate::error::VoxrelayError::AudioCapture {
                message: "bad frame".to_string(),
            })
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    fn station(gate: Arc<SpeakingState>) -> ChunkerStation {
        ChunkerStation::new(
            VoiceActivityChunker::new(config(), "en"),
            Box::new(MarkerClassifier),
            gate,
        )
    }

    #[test]
    fn test_speech_run_yields_one_chunk() {
        let mut chunker = VoiceActivityChunker::new(config(), "en");

        let chunks = feed(&mut chunker, &[(10, false), (40, true), (20, false)]);

        assert_eq!(chunks.len(), 1, "exactly one chunk per utterance");
        let chunk = &chunks[0];
        assert_eq!(chunk.start_ms, 300, "starts at first speech frame");
        // 40 speech frames plus the 15 silence frames that closed it
        assert_eq!(chunk.end_ms, 300 + 54 * 30);
        assert_eq!(chunk.pcm.len(), 55 * FRAME_LEN);
        assert_eq!(chunk.voiced_ms, 1200);
        assert_eq!(chunk.source_lang, "en");
        assert!(!chunker.is_accumulating());
    }

    #[test]
    fn test_fourteen_silence_frames_do_not_close() {
        let mut chunker = VoiceActivityChunker::new(config(), "en");

        let chunks = feed(&mut chunker, &[(20, true), (14, false)]);

        assert!(chunks.is_empty());
        assert!(chunker.is_accumulating());
    }

    #[test]
    fn test_speech_resets_trailing_silence() {
        let mut chunker = VoiceActivityChunker::new(config(), "en");

        let chunks = feed(
            &mut chunker,
            &[(10, true), (10, false), (10, true), (10, false), (15, false)],
        );

        assert_eq!(chunks.len(), 1, "pause shorter than threshold stays inside");
        assert_eq!(chunks[0].voiced_ms, 600);
    }

    #[test]
    fn test_short_run_is_discarded() {
        let mut chunker = VoiceActivityChunker::new(config(), "en");

        // 2 speech + 15 silence = 510ms buffered, so lift the minimum above it
        let mut strict = VoiceActivityChunker::new(
            ChunkerConfig {
                min_chunk_ms: 600,
                ..config()
            },
            "en",
        );

        assert_eq!(feed(&mut chunker, &[(2, true), (15, false)]).len(), 1);
        assert!(feed(&mut strict, &[(2, true), (15, false)]).is_empty());
        assert_eq!(strict.dropped_short(), 1);
    }

    #[test]
    fn test_two_utterances_two_chunks() {
        let mut chunker = VoiceActivityChunker::new(config(), "en");

        let chunks = feed(
            &mut chunker,
            &[(20, true), (15, false), (5, false), (20, true), (15, false)],
        );

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].end_ms < chunks[1].start_ms);
        assert_eq!(chunker.emitted(), 2);
    }

    #[test]
    fn test_max_duration_forces_close() {
        let mut chunker = VoiceActivityChunker::new(
            ChunkerConfig {
                max_chunk_ms: 600,
                ..config()
            },
            "en",
        );

        let chunks = feed(&mut chunker, &[(45, true)]);

        assert_eq!(chunks.len(), 2, "45 frames at 20 per cap");
        assert_eq!(chunks[0].pcm.len(), 20 * FRAME_LEN);
        assert_eq!(chunks[1].start_ms, 600);
        assert!(chunker.is_accumulating(), "remaining 5 frames still buffered");
    }

    #[test]
    fn test_gate_flushes_long_enough_chunk() {
        let mut chunker = VoiceActivityChunker::new(config(), "en");
        feed(&mut chunker, &[(10, true)]);

        let chunk = chunker.on_gated_frame();

        assert!(chunk.is_some(), "300ms meets the 200ms minimum");
        assert!(!chunker.is_accumulating());
    }

    #[test]
    fn test_gate_discards_short_chunk() {
        let mut chunker = VoiceActivityChunker::new(config(), "en");
        feed(&mut chunker, &[(5, true)]);

        assert!(chunker.on_gated_frame().is_none(), "150ms is below minimum");
        assert!(!chunker.is_accumulating());
        assert_eq!(chunker.dropped_short(), 1);
    }

    #[test]
    fn test_gated_frame_while_idle_is_noop() {
        let mut chunker = VoiceActivityChunker::new(config(), "en");
        assert!(chunker.on_gated_frame().is_none());
        assert_eq!(chunker.dropped_short(), 0);
    }

    #[test]
    fn test_flush_returns_partial_chunk() {
        let mut chunker = VoiceActivityChunker::new(config(), "en");
        feed(&mut chunker, &[(20, true)]);

        let chunk = chunker.flush().expect("600ms buffered");
        assert_eq!(chunk.pcm.len(), 20 * FRAME_LEN);
        assert!(chunker.flush().is_none());
    }

    #[test]
    fn test_station_emits_nothing_while_gate_closed() {
        let gate = Arc::new(SpeakingState::new());
        let mut station = station(gate.clone());
        gate.engage();

        let mut emitted = 0;
        for i in 0..60 {
            let frame = Frame::new(vec![8000; FRAME_LEN], i * 30);
            if station.process(frame).unwrap().is_some() {
                emitted += 1;
            }
        }

        assert_eq!(emitted, 0);
        assert_eq!(station.gated_frames(), 60);
    }

    #[test]
    fn test_station_flushes_when_gate_closes_mid_utterance() {
        let gate = Arc::new(SpeakingState::new());
        let mut station = station(gate.clone());

        for i in 0..10 {
            let frame = Frame::new(vec![8000; FRAME_LEN], i * 30);
            assert!(station.process(frame).unwrap().is_none());
        }
        gate.engage();

        let chunk = station
            .process(Frame::new(vec![8000; FRAME_LEN], 300))
            .unwrap()
            .expect("flushed on gate close");
        assert_eq!(chunk.start_ms, 0);
        assert_eq!(chunk.end_ms, 270, "gated frame is not buffered");
    }

    #[test]
    fn test_station_resumes_after_release() {
        let gate = Arc::new(SpeakingState::new());
        let mut station = station(gate.clone());
        gate.engage();
        station
            .process(Frame::new(vec![8000; FRAME_LEN], 0))
            .unwrap();
        gate.release();

        let mut chunks = Vec::new();
        for i in 1..=35 {
            let amplitude = if i <= 20 { 8000 } else { 0 };
            let frame = Frame::new(vec![amplitude; FRAME_LEN], i * 30);
            chunks.extend(station.process(frame).unwrap());
        }

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_ms, 30);
    }

    #[test]
    fn test_frames_captured_during_playback_stay_gated_after_release() {
        let gate = Arc::new(SpeakingState::new());
        let mut station = station(gate.clone());

        // Queued while speaking, processed after the gate reopened.
        let mut emitted = 0;
        for i in 0..60 {
            let frame = Frame::new(vec![8000; FRAME_LEN], i * 30).with_gated(true);
            if station.process(frame).unwrap().is_some() {
                emitted += 1;
            }
        }
        for i in 60..80 {
            let frame = Frame::new(vec![0; FRAME_LEN], i * 30);
            emitted += usize::from(station.process(frame).unwrap().is_some());
        }

        assert!(!gate.is_speaking());
        assert_eq!(emitted, 0, "playback audio must not become a chunk");
        assert_eq!(station.gated_frames(), 60);
    }

    #[test]
    fn test_classifier_error_is_recoverable() {
        let mut station = ChunkerStation::new(
            VoiceActivityChunker::new(config(), "en"),
            Box::new(BrokenClassifier),
            Arc::new(SpeakingState::new()),
        );

        let result = station.process(Frame::new(vec![0; FRAME_LEN], 0));
        assert!(matches!(result, Err(StationError::Recoverable(_))));
    }

    #[test]
    fn test_shutdown_flushes_to_channel() {
        let (tx, rx) = bounded(1);
        let mut station = station(Arc::new(SpeakingState::new())).with_flush_tx(tx);
        for i in 0..10 {
            station
                .process(Frame::new(vec![8000; FRAME_LEN], i * 30))
                .unwrap();
        }

        station.shutdown();

        let chunk = rx.try_recv().expect("partial utterance flushed");
        assert_eq!(chunk.pcm.len(), 10 * FRAME_LEN);
    }
}
