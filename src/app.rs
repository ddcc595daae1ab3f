//! Live translation entry point.
//!
//! Loads the engines, starts the pipeline and waits for Ctrl+C, the run
//! duration, or (for file input) the pipeline draining.

use crate::audio::source::AudioSource;
use crate::audio::wav::WavAudioSource;
use crate::config::{Config, SpeechEngineKind, TranslationEngineKind};
use crate::error::{Result, VoxrelayError};
use crate::models::download::resolve_model;
use crate::mt::{PassthroughTranslator, TranslationEngine};
use crate::pipeline::orchestrator::{Engines, Pipeline, PipelineHandle, RunOutcome};
use crate::pipeline::sink::StdoutSink;
use crate::stt::{TranscriptionEngine, WhisperConfig, WhisperEngine, warm_up};
use crate::tts::command::Synthesizer;
use crate::tts::{CommandSpeechEngine, SilentSpeechEngine, SpeechEngine, SpeechSettings};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Command-line overrides for a run. `None` keeps the configured value.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    pub model: Option<String>,
    pub device: Option<String>,
    pub use_gpu: Option<bool>,
    /// `Some(ZERO)` runs until interrupted.
    pub duration: Option<Duration>,
    /// WAV file, or `-` for stdin.
    pub input: Option<PathBuf>,
    pub json: bool,
    pub no_download: bool,
    pub quiet: bool,
}

impl RunOptions {
    fn apply(&self, config: &mut Config) {
        if let Some(language) = &self.source_language {
            config.stt.language = language.clone();
        }
        if let Some(language) = &self.target_language {
            config.translation.target_language = language.clone();
        }
        if let Some(model) = &self.model {
            config.stt.model = model.clone();
        }
        if let Some(device) = &self.device {
            config.audio.device = Some(device.clone());
        }
        if let Some(use_gpu) = self.use_gpu {
            config.stt.use_gpu = use_gpu;
        }
    }

    /// Wall-clock limit for the run. Microphone runs default to a fixed
    /// duration; file runs end when the input is used up.
    fn time_limit(&self) -> Option<Duration> {
        match self.duration {
            Some(d) if d.is_zero() => None,
            Some(d) => Some(d),
            None if self.input.is_some() => None,
            None => Some(Duration::from_secs(crate::defaults::DURATION_SECS)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Interrupted,
    TimeUp,
    Drained,
    Failed,
}

/// Runs one translation session.
///
/// # Errors
/// Configuration, device and engine-initialization failures are returned
/// before any audio is processed. A failure during the run is reported in
/// [`RunOutcome::fatal`].
pub async fn run(mut config: Config, options: RunOptions) -> Result<RunOutcome> {
    options.apply(&mut config);
    config.validate()?;

    let source = open_source(&config, options.input.as_deref())?;
    let finite = source.is_finite();

    let model_path = resolve_model(&config.stt.model, !options.no_download).await?;
    let transcription = load_transcriber(&config, model_path)?;
    let translation = build_translator(&config);
    let speech = build_speech_engine(&config)?;

    if !options.quiet {
        print_banner(&config, transcription.as_ref(), translation.as_ref(), &options);
    }

    let pipeline = Pipeline::new(config.pipeline_config());
    let handle = pipeline.start(
        source,
        Engines {
            transcription,
            translation,
            speech,
        },
        Box::new(StdoutSink::new(options.json)),
    )?;

    let poll = Duration::from_millis(config.pipeline.poll_interval_ms);
    let reason = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|e| VoxrelayError::Other(format!("failed to wait for Ctrl+C: {e}")))?;
            StopReason::Interrupted
        }
        _ = sleep_or_forever(options.time_limit()) => StopReason::TimeUp,
        reason = watch(&handle, finite, poll) => reason,
    };
    tracing::info!(?reason, "stopping pipeline");

    if !options.quiet && reason == StopReason::Interrupted {
        eprintln!("\nShutting down...");
    }

    let outcome = tokio::task::spawn_blocking(move || handle.stop())
        .await
        .map_err(|e| VoxrelayError::Other(format!("shutdown task failed: {e}")))?;

    if !options.quiet {
        print_summary(&outcome);
    }
    Ok(outcome)
}

async fn sleep_or_forever(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

async fn watch(handle: &PipelineHandle, finite: bool, poll: Duration) -> StopReason {
    loop {
        if handle.fatal_error().is_some() {
            return StopReason::Failed;
        }
        if finite && handle.is_drained() {
            return StopReason::Drained;
        }
        tokio::time::sleep(poll).await;
    }
}

fn open_source(config: &Config, input: Option<&Path>) -> Result<Box<dyn AudioSource>> {
    let rate = config.audio.sample_rate;
    match input {
        Some(path) if path == Path::new("-") => Ok(Box::new(WavAudioSource::from_stdin(rate)?)),
        Some(path) => Ok(Box::new(WavAudioSource::open(path, rate)?)),
        None => open_microphone(config),
    }
}

#[cfg(feature = "cpal-audio")]
fn open_microphone(config: &Config) -> Result<Box<dyn AudioSource>> {
    use crate::audio::capture::CpalAudioSource;
    Ok(Box::new(CpalAudioSource::new(
        config.audio.device.as_deref(),
        config.audio.sample_rate,
    )?))
}

#[cfg(not(feature = "cpal-audio"))]
fn open_microphone(_config: &Config) -> Result<Box<dyn AudioSource>> {
    Err(VoxrelayError::AudioCapture {
        message: "built without microphone support; use --input".to_string(),
    })
}

fn load_transcriber(config: &Config, model_path: PathBuf) -> Result<Arc<dyn TranscriptionEngine>> {
    let engine = WhisperEngine::new(WhisperConfig {
        model_path,
        threads: config.stt.threads,
        use_gpu: config.stt.use_gpu,
    })?;
    let hint = language_hint(&config.stt.language);
    warm_up(&engine, config.audio.sample_rate, hint)?;
    Ok(Arc::new(engine))
}

fn language_hint(language: &str) -> Option<&str> {
    (language != crate::defaults::AUTO_LANGUAGE).then_some(language)
}

/// Picks the translation engine. A model that fails to load degrades to
/// passthrough with a warning instead of aborting the run.
fn build_translator(config: &Config) -> Box<dyn TranslationEngine> {
    let target = &config.translation.target_language;
    let passthrough = || Box::new(PassthroughTranslator::new(target)) as Box<dyn TranslationEngine>;

    if config.translation.engine == TranslationEngineKind::Passthrough {
        return passthrough();
    }
    if config.stt.language == *target {
        tracing::info!(language = %target, "source and target match, translation disabled");
        return passthrough();
    }
    match load_marian(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::warn!("translation model unavailable, passing text through: {e}");
            passthrough()
        }
    }
}

#[cfg(feature = "marian")]
fn load_marian(config: &Config) -> Result<Box<dyn TranslationEngine>> {
    use crate::mt::MarianTranslator;

    let source = &config.stt.language;
    let model_dir = config.translation.model_dir.as_deref();
    if model_dir.is_none() && source == crate::defaults::AUTO_LANGUAGE {
        return Err(VoxrelayError::EngineInit {
            engine: "marian".to_string(),
            message: "an explicit source language or translation.model_dir is required".to_string(),
        });
    }
    let engine = MarianTranslator::load(model_dir, source, &config.translation.target_language)?;
    Ok(Box::new(engine))
}

#[cfg(not(feature = "marian"))]
fn load_marian(_config: &Config) -> Result<Box<dyn TranslationEngine>> {
    Err(VoxrelayError::EngineInit {
        engine: "marian".to_string(),
        message: "built without the `marian` feature".to_string(),
    })
}

fn speech_settings(config: &Config) -> SpeechSettings {
    let voice = config.tts.voice.clone().or_else(|| {
        match Synthesizer::from_command(&config.tts.command) {
            Synthesizer::EspeakNg | Synthesizer::SpdSay => Some(config.translation.target_language.clone()),
            Synthesizer::Say | Synthesizer::Custom => None,
        }
    });
    SpeechSettings {
        command: config.tts.command.clone(),
        rate: config.tts.rate,
        voice,
    }
}

fn build_speech_engine(config: &Config) -> Result<Box<dyn SpeechEngine>> {
    match config.tts.engine {
        SpeechEngineKind::None => Ok(Box::new(SilentSpeechEngine)),
        SpeechEngineKind::Command => {
            let engine = CommandSpeechEngine::system(speech_settings(config));
            engine.probe()?;
            Ok(Box::new(engine))
        }
    }
}

fn print_banner(
    config: &Config,
    transcription: &dyn TranscriptionEngine,
    translation: &dyn TranslationEngine,
    options: &RunOptions,
) {
    let input = match &options.input {
        Some(path) if path == Path::new("-") => "stdin".to_string(),
        Some(path) => path.display().to_string(),
        None => config.audio.device.clone().unwrap_or_else(|| "default microphone".to_string()),
    };
    let compute = if config.stt.use_gpu {
        crate::defaults::gpu_backend()
    } else {
        "CPU"
    };

    eprintln!(
        "{} {} → {}",
        "voxrelay".bold(),
        config.stt.language,
        config.translation.target_language
    );
    eprintln!(
        "  {}  {} ({})",
        "transcription:".dimmed(),
        transcription.name(),
        compute
    );
    eprintln!("  {}    {}", "translation:".dimmed(), translation.name());
    eprintln!("  {}         {}", "speech:".dimmed(), config.tts.command);
    eprintln!("  {}          {}", "input:".dimmed(), input);
    eprintln!("  acoustic echo gating: {}", "enabled".green());
    match options.time_limit() {
        Some(limit) => eprintln!(
            "Listening for {}... (Ctrl+C to stop)",
            humantime::format_duration(limit)
        ),
        None => eprintln!("Listening... (Ctrl+C to stop)"),
    }
}

fn print_summary(outcome: &RunOutcome) {
    eprintln!(
        "{} utterance(s) spoken, {} frame(s) captured, {} dropped",
        outcome.utterances_spoken, outcome.frames_captured, outcome.frames_dropped
    );
    for station in &outcome.abandoned {
        eprintln!("{} {station} did not stop in time", "warning:".yellow());
    }
}
