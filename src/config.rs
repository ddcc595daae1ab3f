use crate::audio::vad::{ClassifierConfig, VadKind};
use crate::error::{Result, VoxrelayError};
use crate::pipeline::chunker::ChunkerConfig;
use crate::pipeline::orchestrator::PipelineConfig;
use crate::pipeline::station::RunnerTiming;
use crate::pipeline::synthesizer_station::SpeechWorkerConfig;
use crate::pipeline::translator_station::TranslatorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub chunker: ChunkerSettings,
    pub pipeline: PipelineSettings,
    pub stt: SttConfig,
    pub translation: TranslationConfig,
    pub tts: TtsConfig,
}

/// Audio capture and frame classification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub vad: VadKind,
    pub vad_aggressiveness: u8,
    pub energy_threshold: f32,
}

/// Utterance segmentation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkerSettings {
    pub min_chunk_ms: u64,
    pub target_chunk_ms: u64,
    pub max_chunk_ms: u64,
    pub silence_frames: u32,
}

/// Channel sizing and worker timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub channel_capacity: usize,
    pub enqueue_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub join_timeout_ms: u64,
    pub cooldown_ms: u64,
}

/// Speech-to-text configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SttConfig {
    /// Catalog name (`tiny`, `base`, ...) or a path to a ggml file.
    pub model: String,
    /// Source language, or `auto` to let the engine detect it.
    pub language: String,
    pub threads: Option<usize>,
    pub use_gpu: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TranslationEngineKind {
    #[default]
    Marian,
    /// No translation; the source text is spoken back.
    Passthrough,
}

/// Machine translation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranslationConfig {
    pub target_language: String,
    pub engine: TranslationEngineKind,
    /// Local MarianMT directory (layout in `mt::marian`); fetched from the hub when unset.
    pub model_dir: Option<PathBuf>,
    pub context_utterances: usize,
    pub context_chars: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpeechEngineKind {
    #[default]
    Command,
    /// Captions only.
    None,
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtsConfig {
    pub engine: SpeechEngineKind,
    pub command: String,
    /// Words per minute.
    pub rate: u32,
    /// Defaults to the target language for espeak-ng and spd-say.
    pub voice: Option<String>,
    pub queue_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: crate::defaults::SAMPLE_RATE,
            frame_ms: crate::defaults::FRAME_MS,
            vad: VadKind::default(),
            vad_aggressiveness: crate::defaults::VAD_AGGRESSIVENESS,
            energy_threshold: crate::defaults::ENERGY_THRESHOLD,
        }
    }
}

impl Default for ChunkerSettings {
    fn default() -> Self {
        Self {
            min_chunk_ms: crate::defaults::MIN_CHUNK_MS,
            target_chunk_ms: crate::defaults::TARGET_CHUNK_MS,
            max_chunk_ms: crate::defaults::MAX_CHUNK_MS,
            silence_frames: crate::defaults::SILENCE_FRAMES,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            channel_capacity: crate::defaults::CHANNEL_CAPACITY,
            enqueue_timeout_ms: crate::defaults::ENQUEUE_TIMEOUT_MS,
            poll_interval_ms: crate::defaults::POLL_INTERVAL_MS,
            join_timeout_ms: crate::defaults::JOIN_TIMEOUT_MS,
            cooldown_ms: crate::defaults::COOLDOWN_MS,
        }
    }
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: crate::defaults::DEFAULT_MODEL.to_string(),
            language: crate::defaults::SOURCE_LANGUAGE.to_string(),
            threads: None,
            use_gpu: true,
        }
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            target_language: crate::defaults::TARGET_LANGUAGE.to_string(),
            engine: TranslationEngineKind::default(),
            model_dir: None,
            context_utterances: crate::defaults::CONTEXT_UTTERANCES,
            context_chars: crate::defaults::CONTEXT_CHARS,
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            engine: SpeechEngineKind::default(),
            command: crate::defaults::SPEECH_COMMAND.to_string(),
            rate: crate::defaults::SPEECH_RATE,
            voice: None,
            queue_capacity: crate::defaults::SPEECH_QUEUE_CAPACITY,
        }
    }
}

fn invalid(key: &str, message: impl Into<String>) -> VoxrelayError {
    VoxrelayError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Missing fields use default values.
    ///
    /// # Errors
    /// `ConfigFileNotFound` if the file does not exist, `Config` for invalid TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VoxrelayError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                VoxrelayError::Io(e)
            }
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    ///
    /// # Errors
    /// Invalid TOML and unreadable files are still errors.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(VoxrelayError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXRELAY_SRC_LANG → stt.language
    /// - VOXRELAY_TGT_LANG → translation.target_language
    /// - VOXRELAY_MODEL → stt.model
    /// - VOXRELAY_AUDIO_DEVICE → audio.device
    pub fn with_env_overrides(mut self) -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        if let Some(language) = var("VOXRELAY_SRC_LANG") {
            self.stt.language = language;
        }
        if let Some(language) = var("VOXRELAY_TGT_LANG") {
            self.translation.target_language = language;
        }
        if let Some(model) = var("VOXRELAY_MODEL") {
            self.stt.model = model;
        }
        if let Some(device) = var("VOXRELAY_AUDIO_DEVICE") {
            self.audio.device = Some(device);
        }
        self
    }

    /// `~/.config/voxrelay/config.toml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("voxrelay")
            .join("config.toml")
    }

    /// Rejects values the audio path or the channels cannot work with.
    ///
    /// # Errors
    /// `ConfigInvalidValue` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.audio.sample_rate, 8000 | 16000 | 32000 | 48000) {
            return Err(invalid("audio.sample_rate", "must be 8000, 16000, 32000 or 48000"));
        }
        if !matches!(self.audio.frame_ms, 10 | 20 | 30) {
            return Err(invalid("audio.frame_ms", "must be 10, 20 or 30"));
        }
        if self.audio.vad_aggressiveness > 3 {
            return Err(invalid("audio.vad_aggressiveness", "must be between 0 and 3"));
        }
        if !(0.0..=1.0).contains(&self.audio.energy_threshold) {
            return Err(invalid("audio.energy_threshold", "must be between 0.0 and 1.0"));
        }
        if self.chunker.silence_frames == 0 {
            return Err(invalid("chunker.silence_frames", "must be greater than 0"));
        }
        if self.chunker.max_chunk_ms < self.chunker.min_chunk_ms {
            return Err(invalid("chunker.max_chunk_ms", "must not be below min_chunk_ms"));
        }
        if self.pipeline.channel_capacity == 0 {
            return Err(invalid("pipeline.channel_capacity", "must be greater than 0"));
        }
        if self.pipeline.poll_interval_ms == 0 {
            return Err(invalid("pipeline.poll_interval_ms", "must be greater than 0"));
        }
        if self.tts.queue_capacity == 0 {
            return Err(invalid("tts.queue_capacity", "must be greater than 0"));
        }
        if self.stt.language.trim().is_empty() {
            return Err(invalid("stt.language", "must not be empty"));
        }
        if self.translation.target_language.trim().is_empty() {
            return Err(invalid("translation.target_language", "must not be empty"));
        }
        Ok(())
    }

    /// Derives the immutable run parameters.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let chunker = ChunkerConfig {
            sample_rate: self.audio.sample_rate,
            frame_ms: self.audio.frame_ms,
            min_chunk_ms: self.chunker.min_chunk_ms,
            target_chunk_ms: self.chunker.target_chunk_ms,
            max_chunk_ms: self.chunker.max_chunk_ms,
            silence_frames: self.chunker.silence_frames,
        };
        let poll_interval = Duration::from_millis(self.pipeline.poll_interval_ms);

        PipelineConfig {
            classifier: ClassifierConfig {
                kind: self.audio.vad,
                sample_rate: self.audio.sample_rate,
                frame_ms: self.audio.frame_ms,
                aggressiveness: self.audio.vad_aggressiveness,
                energy_threshold: self.audio.energy_threshold,
            },
            chunker,
            translator: TranslatorConfig {
                context_utterances: self.translation.context_utterances,
                context_chars: self.translation.context_chars,
                ..TranslatorConfig::default()
            },
            speech: SpeechWorkerConfig {
                queue_capacity: self.tts.queue_capacity,
                cooldown: Duration::from_millis(self.pipeline.cooldown_ms),
                poll_interval,
            },
            timing: RunnerTiming {
                poll_interval,
                enqueue_timeout: Duration::from_millis(self.pipeline.enqueue_timeout_ms),
            },
            source_lang: self.stt.language.clone(),
            target_lang: self.translation.target_language.clone(),
            channel_capacity: self.pipeline.channel_capacity,
            join_timeout: Duration::from_millis(self.pipeline.join_timeout_ms),
            ..PipelineConfig::default()
        }
    }
}
