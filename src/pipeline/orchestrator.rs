//! Translation pipeline that runs from startup until shutdown.
//!
//! ```text
//! capture → chunker → transcriber → translator → synthesizer → sink
//!              ▲                                      │
//!              └──────────── SpeakingState ◄──────────┘
//! ```

use crate::audio::frames::{AudioFrameSource, FrameRead};
use crate::audio::source::AudioSource;
use crate::audio::vad::{ClassifierConfig, FrameClassifier, build_classifier};
use crate::error::Result;
use crate::mt::engine::TranslationEngine;
use crate::pipeline::chunker::{ChunkerConfig, ChunkerStation, VoiceActivityChunker};
use crate::pipeline::error::{ErrorReporter, LogReporter};
use crate::pipeline::gate::SpeakingState;
use crate::pipeline::sink::{CaptionSink, SinkStation};
use crate::pipeline::station::{JoinOutcome, RunControl, RunnerTiming, StationRunner, join_with_timeout};
use crate::pipeline::synthesizer_station::{SpeechWorker, SpeechWorkerConfig, SynthesizerStation};
use crate::pipeline::transcriber_station::TranscriberStation;
use crate::pipeline::translator_station::{TranslatorConfig, TranslatorStation};
use crate::pipeline::types::Frame;
use crate::stt::engine::TranscriptionEngine;
use crate::tts::engine::SpeechEngine;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Immutable run parameters.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub classifier: ClassifierConfig,
    pub chunker: ChunkerConfig,
    pub translator: TranslatorConfig,
    pub speech: SpeechWorkerConfig,
    pub timing: RunnerTiming,
    /// Language hint for transcription; `auto` lets the engine detect it.
    pub source_lang: String,
    pub target_lang: String,
    /// Capacity of every stage-to-stage channel.
    pub channel_capacity: usize,
    /// Capacity of the capture-to-chunker frame channel.
    pub frame_buffer: usize,
    /// Per-stage join timeout during shutdown.
    pub join_timeout: Duration,
    pub speech_join_timeout: Duration,
    /// Consecutive capture read errors before the device counts as failed.
    pub max_capture_errors: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            chunker: ChunkerConfig::default(),
            translator: TranslatorConfig::default(),
            speech: SpeechWorkerConfig::default(),
            timing: RunnerTiming::default(),
            source_lang: crate::defaults::SOURCE_LANGUAGE.to_string(),
            target_lang: crate::defaults::TARGET_LANGUAGE.to_string(),
            channel_capacity: crate::defaults::CHANNEL_CAPACITY,
            frame_buffer: crate::defaults::FRAME_BUFFER,
            join_timeout: Duration::from_millis(crate::defaults::JOIN_TIMEOUT_MS),
            speech_join_timeout: Duration::from_millis(crate::defaults::SPEECH_JOIN_TIMEOUT_MS),
            max_capture_errors: crate::defaults::MAX_CAPTURE_ERRORS,
        }
    }
}

/// The three external engines the pipeline drives.
pub struct Engines {
    pub transcription: Arc<dyn TranscriptionEngine>,
    pub translation: Box<dyn TranslationEngine>,
    pub speech: Box<dyn SpeechEngine>,
}

/// Frame counters kept by the capture thread.
#[derive(Debug, Default)]
struct CaptureStats {
    captured: AtomicU64,
    dropped: AtomicU64,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// The error that ended the run, if it did not end normally.
    pub fatal: Option<String>,
    /// Workers that did not stop within their join timeout.
    pub abandoned: Vec<String>,
    /// Workers that panicked, with the panic message.
    pub panicked: Vec<(String, String)>,
    pub frames_captured: u64,
    pub frames_dropped: u64,
    /// Completed engage/release cycles of the speaking gate.
    pub gate_cycles: u64,
    pub utterances_spoken: u64,
    pub speech_dropped: u64,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.fatal.is_none()
    }
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    control: RunControl,
    capture: Option<JoinHandle<()>>,
    runners: Vec<StationRunner>,
    speech: SpeechWorker,
    gate: Arc<SpeakingState>,
    capture_stats: Arc<CaptureStats>,
    join_timeout: Duration,
    speech_join_timeout: Duration,
    // Kept so the terminal station's output channel stays connected.
    _sink_output: Receiver<()>,
}

impl PipelineHandle {
    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    /// Requests cooperative shutdown without waiting.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// The fatal error recorded by any worker so far.
    pub fn fatal_error(&self) -> Option<String> {
        self.control.fatal_error()
    }

    /// True once a finite source has been fully processed and spoken.
    ///
    /// A live source never drains on its own.
    pub fn is_drained(&self) -> bool {
        let capture_done = self.capture.as_ref().is_none_or(|h| h.is_finished());
        capture_done
            && self.runners.iter().all(StationRunner::is_finished)
            && self.speech.stats().pending() == 0
            && !self.gate.is_speaking()
    }

    pub fn speaking_state(&self) -> &SpeakingState {
        &self.gate
    }

    /// Cancels the run, joins every stage with a bounded timeout, then stops
    /// the speech worker. Workers that miss their deadline are abandoned.
    pub fn stop(mut self) -> RunOutcome {
        self.control.cancel();

        let mut abandoned = Vec::new();
        let mut panicked = Vec::new();
        let mut record = |name: &str, outcome: JoinOutcome| match outcome {
            JoinOutcome::Finished => debug!(worker = name, "stopped"),
            JoinOutcome::Panicked(msg) => {
                error!(worker = name, "panicked: {msg}");
                panicked.push((name.to_string(), msg));
            }
            JoinOutcome::Abandoned => {
                warn!(worker = name, "did not stop in time, abandoning");
                abandoned.push(name.to_string());
            }
        };

        if let Some(handle) = self.capture.take() {
            record("capture", join_with_timeout(handle, self.join_timeout));
        }
        for runner in self.runners.drain(..) {
            let name = runner.name();
            record(name, runner.join_timeout(self.join_timeout));
        }

        let speech_stats = self.speech.stats();
        record("speech", self.speech.stop(self.speech_join_timeout));

        let outcome = RunOutcome {
            fatal: self.control.fatal_error(),
            abandoned,
            panicked,
            frames_captured: self.capture_stats.captured.load(Ordering::Relaxed),
            frames_dropped: self.capture_stats.dropped.load(Ordering::Relaxed),
            gate_cycles: self.gate.completed_cycles(),
            utterances_spoken: speech_stats.spoken(),
            speech_dropped: speech_stats.dropped(),
        };
        info!(
            frames = outcome.frames_captured,
            frames_dropped = outcome.frames_dropped,
            spoken = outcome.utterances_spoken,
            gate_cycles = outcome.gate_cycles,
            "pipeline stopped"
        );
        outcome
    }
}

/// Speech translation pipeline builder.
pub struct Pipeline {
    config: PipelineConfig,
    error_reporter: Arc<dyn ErrorReporter>,
    classifier: Option<Box<dyn FrameClassifier>>,
}

impl Pipeline {
    /// Creates a pipeline with the logging error reporter.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            error_reporter: Arc::new(LogReporter::new()),
            classifier: None,
        }
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    /// Uses `classifier` instead of building one from the config.
    pub fn with_classifier(mut self, classifier: Box<dyn FrameClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Starts capture and every stage.
    ///
    /// # Errors
    /// Classifier construction and audio start failures are returned before
    /// any stage processes input.
    pub fn start(
        self,
        source: Box<dyn AudioSource>,
        engines: Engines,
        sink: Box<dyn CaptionSink>,
    ) -> Result<PipelineHandle> {
        let config = self.config;
        let classifier = match self.classifier {
            Some(classifier) => classifier,
            None => build_classifier(&config.classifier)?,
        };

        let gate = Arc::new(SpeakingState::new());
        let (speech, speech_queue) =
            SpeechWorker::spawn(engines.speech, Arc::clone(&gate), config.speech)?;

        let mut frames = AudioFrameSource::new(
            source,
            config.chunker.sample_rate,
            config.chunker.frame_ms,
        );
        if let Err(e) = frames.start() {
            speech.stop(config.speech_join_timeout);
            return Err(e);
        }

        let control = RunControl::new();
        let capacity = config.channel_capacity.max(1);
        let (frame_tx, frame_rx) = bounded(config.frame_buffer.max(1));
        let (chunk_tx, chunk_rx) = bounded(capacity);
        let (transcript_tx, transcript_rx) = bounded(capacity);
        let (translation_tx, translation_rx) = bounded(capacity);
        let (caption_tx, caption_rx) = bounded(capacity);
        let (sink_tx, sink_rx) = bounded::<()>(1);

        let chunker = ChunkerStation::new(
            VoiceActivityChunker::new(config.chunker, config.source_lang.clone()),
            classifier,
            Arc::clone(&gate),
        )
        .with_flush_tx(chunk_tx.clone());
        let transcriber =
            TranscriberStation::new(engines.transcription, &config.source_lang, &config.target_lang);
        let translator = TranslatorStation::new(engines.translation, config.translator);
        let synthesizer = SynthesizerStation::new(speech_queue);
        let sink_station = SinkStation::new(sink);

        let timing = config.timing;
        let reporter = self.error_reporter;
        let runners = vec![
            StationRunner::spawn(chunker, frame_rx, chunk_tx, control.clone(), timing, reporter.clone()),
            StationRunner::spawn(
                transcriber,
                chunk_rx,
                transcript_tx,
                control.clone(),
                timing,
                reporter.clone(),
            ),
            StationRunner::spawn(
                translator,
                transcript_rx,
                translation_tx,
                control.clone(),
                timing,
                reporter.clone(),
            ),
            StationRunner::spawn(
                synthesizer,
                translation_rx,
                caption_tx,
                control.clone(),
                timing,
                reporter.clone(),
            ),
            StationRunner::spawn(sink_station, caption_rx, sink_tx, control.clone(), timing, reporter),
        ];

        let capture_stats = Arc::new(CaptureStats::default());
        let capture = thread::Builder::new().name("voxrelay-capture".to_string()).spawn({
            let control = control.clone();
            let stats = Arc::clone(&capture_stats);
            let max_errors = config.max_capture_errors.max(1);
            let gate = Arc::clone(&gate);
            let poll = config.timing.poll_interval;
            move || capture_loop(frames, frame_tx, &control, &gate, &stats, max_errors, poll)
        });
        let capture = match capture {
            Ok(handle) => Some(handle),
            Err(e) => {
                control.fail("capture", &format!("failed to spawn capture thread: {e}"));
                None
            }
        };

        info!(
            source = %config.source_lang,
            target = %config.target_lang,
            "pipeline started"
        );

        Ok(PipelineHandle {
            control,
            capture,
            runners,
            speech,
            gate,
            capture_stats,
            join_timeout: config.join_timeout,
            speech_join_timeout: config.speech_join_timeout,
            _sink_output: sink_rx,
        })
    }
}

/// Reads frames until cancellation, source exhaustion, or device failure.
///
/// Live frames are offered without waiting, since the device cannot be paused.
/// A finite source can wait for room instead, so file input is not thinned out.
fn capture_loop(
    mut frames: AudioFrameSource,
    tx: Sender<Frame>,
    control: &RunControl,
    gate: &SpeakingState,
    stats: &CaptureStats,
    max_errors: u32,
    poll: Duration,
) {
    let finite = frames.is_finite();
    let mut consecutive_errors = 0;

    while control.is_running() {
        let frame = match frames.next_frame() {
            Ok(FrameRead::Frame(frame)) => {
                consecutive_errors = 0;
                frame.with_gated(gate.is_speaking())
            }
            Ok(FrameRead::Pending) => continue,
            Ok(FrameRead::Exhausted) => {
                info!("audio source exhausted");
                break;
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors >= max_errors {
                    error!("audio capture failed {consecutive_errors} times in a row: {e}");
                    control.fail("capture", &e.to_string());
                    break;
                }
                warn!("audio read failed: {e}");
                thread::sleep(poll.min(Duration::from_millis(crate::defaults::FRAME_MS as u64)));
                continue;
            }
        };

        if finite {
            if !send_while_running(&tx, frame, control, poll) {
                break;
            }
            stats.captured.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        match tx.try_send(frame) {
            Ok(()) => {
                stats.captured.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                let dropped = stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 {
                    warn!("chunker is behind, dropping audio frames");
                } else {
                    debug!(dropped, "frame dropped");
                }
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }

    if stats.captured.load(Ordering::Relaxed) == 0 && !finite && control.fatal_error().is_none() {
        warn!("no audio frames captured; check the input device (voxrelay devices)");
    }
    if let Err(e) = frames.stop() {
        warn!("failed to stop audio capture: {e}");
    }
}

/// Blocks on a full channel, re-checking cancellation every `poll`.
fn send_while_running(tx: &Sender<Frame>, mut frame: Frame, control: &RunControl, poll: Duration) -> bool {
    loop {
        match tx.send_timeout(frame, poll) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(back)) => {
                if !control.is_running() {
                    return false;
                }
                frame = back;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::{FramePhase, MockAudioSource};
    use crate::audio::vad::EnergyClassifier;
    use crate::error::VoxrelayError;
    use crate::mt::engine::MockTranslator;
    use crate::pipeline::sink::CollectorSink;
    use crate::stt::engine::MockTranscriber;
    use crate::tts::engine::MockSpeechEngine;
    use std::time::Instant;

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            timing: RunnerTiming {
                poll_interval: Duration::from_millis(10),
                enqueue_timeout: Duration::from_millis(50),
            },
            speech: SpeechWorkerConfig {
                cooldown: Duration::from_millis(10),
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
            join_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    fn engines(transcriber: MockTranscriber) -> Engines {
        Engines {
            transcription: Arc::new(transcriber),
            translation: Box::new(MockTranslator::new("de")),
            speech: Box::new(MockSpeechEngine::new()),
        }
    }

    fn wait_drained(handle: &PipelineHandle) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if handle.is_drained() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_finite_source_runs_to_completion() {
        let source = MockAudioSource::new().with_phases(vec![
            FramePhase::silence(10),
            FramePhase::speech(40),
            FramePhase::silence(20),
        ]);
        let sink = CollectorSink::new();
        let events = sink.events();

        let handle = Pipeline::new(fast_config())
            .with_classifier(Box::new(EnergyClassifier::new(0.02)))
            .start(
                Box::new(source),
                engines(MockTranscriber::new("mock").with_response("Hello")),
                Box::new(sink),
            )
            .unwrap();

        assert!(wait_drained(&handle), "pipeline should drain a finite source");
        let outcome = handle.stop();

        assert!(outcome.is_success());
        assert_eq!(outcome.frames_captured, 70);
        assert_eq!(outcome.utterances_spoken, 1);
        assert_eq!(outcome.gate_cycles, 1);
        assert!(outcome.abandoned.is_empty());

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text, "[de] Hello.");
        assert_eq!(events[0].start_ms, 300);
    }

    #[test]
    fn test_capture_stamps_frames_with_gate_state() {
        let source = MockAudioSource::new().with_phases(vec![FramePhase::speech(3)]);
        let mut frames = AudioFrameSource::new(Box::new(source), 16000, 30);
        frames.start().unwrap();
        let (tx, rx) = bounded(8);
        let gate = SpeakingState::new();
        gate.engage();
        let stats = CaptureStats::default();

        capture_loop(frames, tx, &RunControl::new(), &gate, &stats, 3, Duration::from_millis(10));

        let stamped: Vec<bool> = rx.try_iter().map(|frame| frame.gated).collect();
        assert_eq!(stamped, vec![true, true, true]);
        assert_eq!(stats.captured.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_audio_start_failure_is_returned() {
        let source = MockAudioSource::new().with_start_failure();
        let result = Pipeline::new(fast_config()).start(
            Box::new(source),
            engines(MockTranscriber::new("mock")),
            Box::new(CollectorSink::new()),
        );
        assert!(matches!(result, Err(VoxrelayError::AudioCapture { .. })));
    }

    #[test]
    fn test_repeated_read_errors_are_fatal() {
        let source = MockAudioSource::new().live().with_read_failure();
        let handle = Pipeline::new(fast_config())
            .with_classifier(Box::new(EnergyClassifier::new(0.02)))
            .start(
                Box::new(source),
                engines(MockTranscriber::new("mock")),
                Box::new(CollectorSink::new()),
            )
            .unwrap();

        let start = Instant::now();
        while handle.is_running() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(10));
        }

        let outcome = handle.stop();
        let fatal = outcome.fatal.unwrap_or_default();
        assert!(fatal.starts_with("capture:"), "got: {fatal}");
    }

    #[test]
    fn test_transient_read_errors_are_tolerated() {
        let source = MockAudioSource::new()
            .with_transient_read_failures(3)
            .with_phases(vec![FramePhase::silence(5)]);
        let handle = Pipeline::new(fast_config())
            .with_classifier(Box::new(EnergyClassifier::new(0.02)))
            .start(
                Box::new(source),
                engines(MockTranscriber::new("mock")),
                Box::new(CollectorSink::new()),
            )
            .unwrap();

        assert!(wait_drained(&handle));
        let outcome = handle.stop();
        assert!(outcome.is_success());
        assert_eq!(outcome.frames_captured, 5);
    }

    #[test]
    fn test_live_source_stops_on_cancel() {
        let source = MockAudioSource::new().live();
        let handle = Pipeline::new(fast_config())
            .with_classifier(Box::new(EnergyClassifier::new(0.02)))
            .start(
                Box::new(source),
                engines(MockTranscriber::new("mock")),
                Box::new(CollectorSink::new()),
            )
            .unwrap();

        thread::sleep(Duration::from_millis(100));
        assert!(!handle.is_drained(), "a live source never drains");

        let started = Instant::now();
        let outcome = handle.stop();

        assert!(outcome.is_success());
        assert!(outcome.abandoned.is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
