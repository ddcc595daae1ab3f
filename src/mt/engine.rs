use crate::error::{Result, VoxrelayError};
use std::sync::{Arc, Mutex};

/// Trait for text-to-text translation engines.
///
/// The target language is fixed at construction. Engines keep no session
/// state between calls; any context arrives prefixed to the input text.
pub trait TranslationEngine: Send {
    fn translate(&mut self, text: &str) -> Result<String>;

    fn name(&self) -> &str;

    fn target_language(&self) -> &str;

    /// Whether recent utterances should be prefixed to the input.
    fn uses_context(&self) -> bool {
        true
    }
}

impl<T: TranslationEngine + ?Sized> TranslationEngine for Box<T> {
    fn translate(&mut self, text: &str) -> Result<String> {
        (**self).translate(text)
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn target_language(&self) -> &str {
        (**self).target_language()
    }

    fn uses_context(&self) -> bool {
        (**self).uses_context()
    }
}

/// Returns the input unchanged. Used when no model is available.
#[derive(Debug, Clone)]
pub struct PassthroughTranslator {
    target_language: String,
}

impl PassthroughTranslator {
    pub fn new(target_language: &str) -> Self {
        Self {
            target_language: target_language.to_string(),
        }
    }
}

impl TranslationEngine for PassthroughTranslator {
    fn translate(&mut self, text: &str) -> Result<String> {
        Ok(text.to_string())
    }

    fn name(&self) -> &str {
        "passthrough"
    }

    fn target_language(&self) -> &str {
        &self.target_language
    }

    fn uses_context(&self) -> bool {
        false
    }
}

/// Translator for testing: tags the input with the target language.
///
/// Every input is recorded, so tests can inspect the context prefix.
#[derive(Debug, Clone)]
pub struct MockTranslator {
    target_language: String,
    inputs: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl MockTranslator {
    pub fn new(target_language: &str) -> Self {
        Self {
            target_language: target_language.to_string(),
            inputs: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }
    }

    /// Fail every call.
    pub fn with_failure(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Shared handle to the recorded inputs; stays valid after the mock is moved.
    pub fn inputs(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.inputs)
    }
}

impl TranslationEngine for MockTranslator {
    fn translate(&mut self, text: &str) -> Result<String> {
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.push(text.to_string());
        }
        if self.fail {
            return Err(VoxrelayError::Translation {
                message: "mock translation failure".to_string(),
            });
        }
        Ok(format!("[{}] {text}", self.target_language))
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn target_language(&self) -> &str {
        &self.target_language
    }
}
