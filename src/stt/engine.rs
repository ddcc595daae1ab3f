use crate::error::{Result, VoxrelayError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Recognized text plus the language the engine heard.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transcription {
    pub text: String,
    /// ISO 639-1 code; empty when the engine does not report one.
    pub language: String,
}

impl Transcription {
    pub fn new(text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: language.into(),
        }
    }
}

/// Trait for speech-to-text engines.
///
/// This trait allows swapping implementations (real Whisper vs mock).
pub trait TranscriptionEngine: Send + Sync {
    /// Transcribe mono samples normalized to [-1.0, 1.0].
    ///
    /// `language` is a hint; `None` lets the engine detect it. An empty
    /// result is valid (silence that was classified as speech).
    fn transcribe(&self, audio: &[f32], language: Option<&str>) -> Result<Transcription>;

    /// Engine or model name for logs and the startup banner.
    fn name(&self) -> &str;
}

impl<T: TranscriptionEngine + ?Sized> TranscriptionEngine for Arc<T> {
    fn transcribe(&self, audio: &[f32], language: Option<&str>) -> Result<Transcription> {
        (**self).transcribe(audio, language)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Runs one second of silence through the engine so model setup happens
/// before the first utterance.
///
/// # Errors
/// Any engine error is reported as `EngineInit`.
pub fn warm_up(engine: &dyn TranscriptionEngine, sample_rate: u32, language: Option<&str>) -> Result<()> {
    let silence = vec![0.0f32; sample_rate as usize];
    let started = std::time::Instant::now();
    engine
        .transcribe(&silence, language)
        .map_err(|e| VoxrelayError::EngineInit {
            engine: engine.name().to_string(),
            message: format!("warm-up failed: {e}"),
        })?;
    tracing::info!(
        engine = engine.name(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "transcription engine warmed up"
    );
    Ok(())
}

/// Scripted transcriber for testing.
///
/// Returns queued responses in order, then the fallback response. A queued
/// `None` is a failed call.
#[derive(Debug)]
pub struct MockTranscriber {
    name: String,
    script: Mutex<VecDeque<Option<String>>>,
    fallback: Option<String>,
    language: String,
    calls: Mutex<Vec<Option<String>>>,
}

impl MockTranscriber {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback: Some("mock transcription".to_string()),
            language: "en".to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Response used once the script is empty.
    pub fn with_response(mut self, response: &str) -> Self {
        self.fallback = Some(response.to_string());
        self
    }

    /// Fail every call once the script is empty.
    pub fn with_failure(mut self) -> Self {
        self.fallback = None;
        self
    }

    /// Queue per-call outcomes; `None` entries fail.
    pub fn with_script<I, S>(self, outcomes: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        if let Ok(mut script) = self.script.lock() {
            script.extend(outcomes.into_iter().map(|o| o.map(Into::into)));
        }
        self
    }

    /// Detected language reported with every result.
    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    /// Language hints received, one per call.
    pub fn calls(&self) -> Vec<Option<String>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl TranscriptionEngine for MockTranscriber {
    fn transcribe(&self, _audio: &[f32], language: Option<&str>) -> Result<Transcription> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(language.map(str::to_string));
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        let outcome = scripted.unwrap_or_else(|| self.fallback.clone());

        match outcome {
            Some(text) => Ok(Transcription::new(text, self.language.clone())),
            None => Err(VoxrelayError::Transcription {
                message: "mock transcription failure".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
