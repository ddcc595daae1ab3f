use crate::error::{Result, VoxrelayError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Trait for text-to-speech engines.
///
/// `speak` returns once playback has finished; the synthesizer times its
/// cool-down from that point.
pub trait SpeechEngine: Send {
    fn speak(&mut self, text: &str) -> Result<()>;

    fn name(&self) -> &str;
}

/// Discards text. Used with `[tts] engine = "none"`.
#[derive(Debug, Clone, Default)]
pub struct SilentSpeechEngine;

impl SpeechEngine for SilentSpeechEngine {
    fn speak(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Speech engine for testing.
///
/// Records every request, can simulate playback time, and can fail on
/// requests containing a marker.
#[derive(Debug, Clone, Default)]
pub struct MockSpeechEngine {
    spoken: Arc<Mutex<Vec<String>>>,
    delay: Duration,
    fail_on: Option<String>,
}

impl MockSpeechEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated playback duration per request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail requests whose text contains `marker`.
    pub fn with_failure_on(mut self, marker: &str) -> Self {
        self.fail_on = Some(marker.to_string());
        self
    }

    /// Shared handle to the texts spoken so far.
    pub fn spoken(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.spoken)
    }
}

impl SpeechEngine for MockSpeechEngine {
    fn speak(&mut self, text: &str) -> Result<()> {
        std::thread::sleep(self.delay);
        if self
            .fail_on
            .as_deref()
            .is_some_and(|marker| text.contains(marker))
        {
            return Err(VoxrelayError::Synthesis {
                message: format!("mock synthesis failure for {text:?}"),
            });
        }
        if let Ok(mut spoken) = self.spoken.lock() {
            spoken.push(text.to_string());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_requests() {
        let mut engine = MockSpeechEngine::new();
        let spoken = engine.spoken();

        engine.speak("Hallo.").unwrap();
        engine.speak("Welt.").unwrap();

        assert_eq!(*spoken.lock().unwrap(), vec!["Hallo.", "Welt."]);
    }

    #[test]
    fn test_mock_fails_on_marker() {
        let mut engine = MockSpeechEngine::new().with_failure_on("boom");
        assert!(engine.speak("boom now").is_err());
        assert!(engine.speak("fine").is_ok());
        assert_eq!(engine.spoken().lock().unwrap().len(), 1);
    }

    #[test]
    fn test_silent_engine_accepts_everything() {
        let mut engine = SilentSpeechEngine;
        assert!(engine.speak("anything").is_ok());
        assert_eq!(engine.name(), "none");
    }
}
