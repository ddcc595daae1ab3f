//! Whisper speech-to-text through whisper-rs.
//!
//! Requires the `whisper` feature (and cmake). Without it, [`WhisperEngine`]
//! still validates its model path but every call returns an error.

use crate::error::{Result, VoxrelayError};
use crate::stt::engine::{Transcription, TranscriptionEngine};
use std::path::{Path, PathBuf};

#[cfg(feature = "whisper")]
use std::sync::{Mutex, Once};
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Settings for loading a Whisper model.
#[derive(Debug, Clone, PartialEq)]
pub struct WhisperConfig {
    pub model_path: PathBuf,
    /// Inference threads; `None` lets whisper.cpp decide.
    pub threads: Option<usize>,
    /// Offload to the GPU backend compiled in (cuda, vulkan).
    pub use_gpu: bool,
}

impl WhisperConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            threads: None,
            use_gpu: false,
        }
    }
}

fn model_name_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|stem| stem.trim_start_matches("ggml-").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn ensure_model_exists(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(VoxrelayError::ModelNotFound {
            path: path.display().to_string(),
        })
    }
}

/// Whisper transcription engine.
///
/// The context is behind a Mutex; a fresh state is created per call.
#[cfg(feature = "whisper")]
pub struct WhisperEngine {
    context: Mutex<WhisperContext>,
    config: WhisperConfig,
    model_name: String,
}

#[cfg(not(feature = "whisper"))]
#[derive(Debug)]
pub struct WhisperEngine {
    config: WhisperConfig,
    model_name: String,
}

#[cfg(feature = "whisper")]
impl std::fmt::Debug for WhisperEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperEngine")
            .field("config", &self.config)
            .field("model_name", &self.model_name)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "whisper")]
impl WhisperEngine {
    /// Loads the model.
    ///
    /// # Errors
    /// `ModelNotFound` if the file is missing, `EngineInit` if whisper.cpp
    /// cannot load it.
    pub fn new(config: WhisperConfig) -> Result<Self> {
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        ensure_model_exists(&config.model_path)?;
        let model_name = model_name_from_path(&config.model_path);

        let init_error = |message: String| VoxrelayError::EngineInit {
            engine: "whisper".to_string(),
            message,
        };

        let mut params = WhisperContextParameters::default();
        params.use_gpu(config.use_gpu);
        params.flash_attn(true);

        let path = config
            .model_path
            .to_str()
            .ok_or_else(|| init_error("model path is not valid UTF-8".to_string()))?;
        let context = WhisperContext::new_with_params(path, params)
            .map_err(|e| init_error(format!("failed to load {path}: {e}")))?;

        tracing::info!(model = %model_name, use_gpu = config.use_gpu, "loaded Whisper model");

        Ok(Self {
            context: Mutex::new(context),
            config,
            model_name,
        })
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

#[cfg(not(feature = "whisper"))]
impl WhisperEngine {
    pub fn new(config: WhisperConfig) -> Result<Self> {
        ensure_model_exists(&config.model_path)?;
        let model_name = model_name_from_path(&config.model_path);
        Ok(Self { config, model_name })
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

#[cfg(feature = "whisper")]
impl TranscriptionEngine for WhisperEngine {
    fn transcribe(&self, audio: &[f32], language: Option<&str>) -> Result<Transcription> {
        let failed = |message: String| VoxrelayError::Transcription { message };

        let context = self
            .context
            .lock()
            .map_err(|e| failed(format!("context lock poisoned: {e}")))?;
        let mut state = context
            .create_state()
            .map_err(|e| failed(format!("failed to create Whisper state: {e}")))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(language);
        if let Some(threads) = self.config.threads {
            params.set_n_threads(threads as i32);
        }
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, audio)
            .map_err(|e| failed(format!("Whisper inference failed: {e}")))?;

        let language = whisper_rs::get_lang_str(state.full_lang_id_from_state())
            .unwrap_or("")
            .to_string();
        let text: String = state.as_iter().map(|segment| segment.to_string()).collect();

        Ok(Transcription {
            text: text.trim().to_string(),
            language,
        })
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(not(feature = "whisper"))]
impl TranscriptionEngine for WhisperEngine {
    fn transcribe(&self, _audio: &[f32], _language: Option<&str>) -> Result<Transcription> {
        Err(VoxrelayError::Transcription {
            message: "built without the `whisper` feature; rebuild with --features whisper"
                .to_string(),
        })
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}
