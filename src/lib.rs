//! voxrelay - live speech translation
//!
//! Microphone audio is segmented into utterances, transcribed, translated and
//! spoken back, with capture gated off while the synthesizer is talking.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod mt;
pub mod pipeline;
pub mod stt;
pub mod tts;

// Composition root: engines, CLI overrides and the run loop
#[cfg(feature = "cli")]
pub mod app;

// Engine boundaries
pub use audio::source::AudioSource;
pub use mt::engine::TranslationEngine;
pub use stt::engine::{Transcription, TranscriptionEngine};
pub use tts::engine::SpeechEngine;

// Pipeline
pub use pipeline::orchestrator::{Engines, Pipeline, PipelineConfig, PipelineHandle, RunOutcome};
pub use pipeline::sink::{CaptionSink, CollectorSink, StdoutSink};
pub use pipeline::types::{AudioChunk, Event, EventKind, Frame};

// Error handling
pub use error::{Result, VoxrelayError};

// Config
pub use config::Config;

// Station framework (for advanced users)
pub use pipeline::error::{ErrorReporter, StationError};
pub use pipeline::gate::SpeakingState;
pub use pipeline::station::Station;
