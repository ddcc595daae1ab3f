//! Command-line interface for voxrelay
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Live speech translation: listen, transcribe, translate, speak
#[derive(Parser, Debug)]
#[command(name = "voxrelay", version, about = "Live speech translation with echo gating")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only print captions and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: lifecycle, -vv: per-utterance timing, -vvv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Source language code, or `auto` to detect (default: en)
    #[arg(long = "src", value_name = "LANG")]
    pub source_language: Option<String>,

    /// Target language code (default: de)
    #[arg(long = "tgt", value_name = "LANG")]
    pub target_language: Option<String>,

    /// Whisper model: tiny, base, small, medium, or a path to a ggml file
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Audio input device (see `voxrelay devices`)
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Compute backend for transcription
    #[arg(long, value_enum, value_name = "MODE")]
    pub compute: Option<ComputeMode>,

    /// Stop after this long (e.g. 90, 30s, 5m). 0 runs until Ctrl+C
    #[arg(long, short = 'd', value_name = "DURATION", value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Read a WAV file instead of the microphone (`-` for stdin)
    #[arg(long, short = 'i', value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Print captions as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Prevent automatic model download if the model is missing
    #[arg(long)]
    pub no_download: bool,
}

/// Where transcription runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ComputeMode {
    Cpu,
    /// Use the GPU backend compiled in, if any
    Gpu,
}

impl ComputeMode {
    pub fn use_gpu(self) -> bool {
        self == Self::Gpu
    }
}

/// Parse a run duration.
///
/// Bare numbers are seconds; anything else goes through `humantime`
/// (`30s`, `5m`, `1h30m`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available audio input devices
    Devices,

    /// Manage Whisper models
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Model management actions
#[derive(Subcommand, Debug)]
pub enum ModelsAction {
    /// List known models and whether they are installed
    List,
    /// Download and install a model
    Install {
        /// Model name (tiny, base, small, medium)
        name: String,
    },
}
