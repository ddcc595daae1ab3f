//! Staged speech translation pipeline.
//!
//! Each station runs in its own thread, connected by bounded crossbeam
//! channels. A full channel drops the item instead of blocking upstream.

pub mod chunker;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod sink;
pub mod station;
pub mod synthesizer_station;
pub mod transcriber_station;
pub mod translator_station;
pub mod types;

pub use chunker::{ChunkerConfig, ChunkerStation, CloseReason, VoiceActivityChunker};
pub use error::{ErrorReporter, LogReporter, StationError};
pub use gate::{GateState, SpeakingState};
pub use orchestrator::{Engines, Pipeline, PipelineConfig, PipelineHandle, RunOutcome};
pub use sink::{CaptionSink, CollectorSink, StdoutSink};
pub use station::{JoinOutcome, RunControl, RunnerTiming, Station, StationRunner};
pub use synthesizer_station::{SpeechQueue, SpeechWorker, SpeechWorkerConfig, SynthesizerStation};
pub use transcriber_station::TranscriberStation;
pub use translator_station::{TranslatorConfig, TranslatorStation};
pub use types::{AudioChunk, Event, EventKind, Frame};
