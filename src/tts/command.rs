//! Speech synthesis by running a system synthesizer per utterance.
//!
//! The command blocks until playback ends, which is what the synthesizer
//! needs to time its cool-down. The `CommandExecutor` seam keeps this
//! testable without audio hardware.

use crate::error::{Result, VoxrelayError};
use crate::tts::engine::SpeechEngine;
use std::process::Command;

/// Trait for executing system commands.
///
/// Object-safe, Send + Sync for use in concurrent contexts.
pub trait CommandExecutor: Send + Sync {
    /// Runs `command` to completion and returns its stdout.
    fn execute(&self, command: &str, args: &[&str]) -> Result<String>;
}

/// Production command executor using std::process::Command.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandExecutor;

impl SystemCommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for SystemCommandExecutor {
    fn execute(&self, command: &str, args: &[&str]) -> Result<String> {
        let output = Command::new(command).args(args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VoxrelayError::SynthesizerNotFound {
                    command: command.to_string(),
                }
            } else {
                VoxrelayError::Synthesis {
                    message: format!("failed to run {command}: {e}"),
                }
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoxrelayError::Synthesis {
                message: format!("{command} exited with {}: {}", output.status, stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Known synthesizers and their argument conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Synthesizer {
    /// `espeak-ng -s <wpm> -v <voice> <text>`
    EspeakNg,
    /// `spd-say -w -r <-100..100> -l <lang> <text>`
    SpdSay,
    /// macOS `say -r <wpm> -v <voice> <text>`
    Say,
    /// Any other program; receives the text as its only argument.
    Custom,
}

impl Synthesizer {
    pub fn from_command(command: &str) -> Self {
        let program = std::path::Path::new(command)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(command);
        match program {
            "espeak-ng" | "espeak" => Self::EspeakNg,
            "spd-say" => Self::SpdSay,
            "say" => Self::Say,
            _ => Self::Custom,
        }
    }
}

/// Voice and pacing for [`CommandSpeechEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSettings {
    pub command: String,
    /// Words per minute.
    pub rate: u32,
    /// Synthesizer voice; for espeak-ng and spd-say a language code works.
    pub voice: Option<String>,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            command: crate::defaults::SPEECH_COMMAND.to_string(),
            rate: crate::defaults::SPEECH_RATE,
            voice: None,
        }
    }
}

/// Builds the argument list for one utterance.
pub fn speech_args(synth: Synthesizer, settings: &SpeechSettings, text: &str) -> Vec<String> {
    let mut args = Vec::new();
    match synth {
        Synthesizer::EspeakNg => {
            args.extend(["-s".to_string(), settings.rate.to_string()]);
            if let Some(voice) = &settings.voice {
                args.extend(["-v".to_string(), voice.clone()]);
            }
        }
        Synthesizer::SpdSay => {
            // spd-say rates are relative; 160 wpm is roughly its neutral speed.
            let relative = ((settings.rate as i64 - 160) / 2).clamp(-100, 100);
            args.extend(["-w".to_string(), "-r".to_string(), relative.to_string()]);
            if let Some(voice) = &settings.voice {
                args.extend(["-l".to_string(), voice.clone()]);
            }
        }
        Synthesizer::Say => {
            args.extend(["-r".to_string(), settings.rate.to_string()]);
            if let Some(voice) = &settings.voice {
                args.extend(["-v".to_string(), voice.clone()]);
            }
        }
        Synthesizer::Custom => {}
    }
    // Keep text that starts with '-' from being read as an option.
    if synth != Synthesizer::Custom {
        args.push("--".to_string());
    }
    args.push(text.to_string());
    args
}

/// Speech engine that shells out to a system synthesizer.
pub struct CommandSpeechEngine<E: CommandExecutor> {
    executor: E,
    settings: SpeechSettings,
    synth: Synthesizer,
}

impl CommandSpeechEngine<SystemCommandExecutor> {
    pub fn system(settings: SpeechSettings) -> Self {
        Self::new(SystemCommandExecutor::new(), settings)
    }
}

impl<E: CommandExecutor> CommandSpeechEngine<E> {
    pub fn new(executor: E, settings: SpeechSettings) -> Self {
        let synth = Synthesizer::from_command(&settings.command);
        Self {
            executor,
            settings,
            synth,
        }
    }

    /// Confirms the synthesizer is installed.
    ///
    /// # Errors
    /// `SynthesizerNotFound` when the program is missing. Programs without a
    /// harmless version flag are not probed.
    pub fn probe(&self) -> Result<()> {
        match self.synth {
            Synthesizer::EspeakNg | Synthesizer::SpdSay => self
                .executor
                .execute(&self.settings.command, &["--version"])
                .map(|_| ()),
            Synthesizer::Say | Synthesizer::Custom => Ok(()),
        }
    }
}

impl<E: CommandExecutor> SpeechEngine for CommandSpeechEngine<E> {
    fn speak(&mut self, text: &str) -> Result<()> {
        let args = speech_args(self.synth, &self.settings, text);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.executor.execute(&self.settings.command, &args).map(|_| ())
    }

    fn name(&self) -> &str {
        &self.settings.command
    }
}
