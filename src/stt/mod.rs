//! Speech-to-text engine boundary.

pub mod engine;
pub mod whisper;

pub use engine::{MockTranscriber, Transcription, TranscriptionEngine, warm_up};
pub use whisper::{WhisperConfig, WhisperEngine};
