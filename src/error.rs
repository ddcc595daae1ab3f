//! Error types for voxrelay.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxrelayError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Capture device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    // Engine startup errors
    #[error("Failed to initialize {engine} engine: {message}")]
    EngineInit { engine: String, message: String },

    #[error("Model not found at {path}")]
    ModelNotFound { path: String },

    // Per-call engine errors
    #[error("Transcription error: {message}")]
    Transcription { message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("Speech synthesis error: {message}")]
    Synthesis { message: String },

    #[error("Speech synthesizer not found: {command}")]
    SynthesizerNotFound { command: String },

    // Model download errors
    #[error("Model download failed: {message}")]
    Download { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl VoxrelayError {
    /// The capture device could not be opened or read. Fatal for a run.
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            VoxrelayError::AudioDeviceNotFound { .. } | VoxrelayError::AudioCapture { .. }
        )
    }

    /// A model or engine failed to load at startup. Fatal before processing begins.
    pub fn is_engine_init_failure(&self) -> bool {
        matches!(
            self,
            VoxrelayError::EngineInit { .. }
                | VoxrelayError::ModelNotFound { .. }
                | VoxrelayError::SynthesizerNotFound { .. }
        )
    }

    /// A single engine call failed. The affected item is dropped and the stage continues.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VoxrelayError::Transcription { .. }
                | VoxrelayError::Translation { .. }
                | VoxrelayError::Synthesis { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, VoxrelayError>;
