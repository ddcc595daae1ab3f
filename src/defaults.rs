//! Default configuration constants for voxrelay.
//!
//! The chunking and gating values are tuned together for 30ms frames at
//! VAD aggressiveness 2. Changing the frame duration or aggressiveness
//! usually means retuning the silence threshold and cool-down as well.

/// Default audio sample rate in Hz.
///
/// 16kHz is what Whisper expects and one of the four rates WebRTC VAD accepts.
pub const SAMPLE_RATE: u32 = 16000;

/// Duration of one capture frame in milliseconds (480 samples at 16kHz).
pub const FRAME_MS: u32 = 30;

/// WebRTC VAD aggressiveness, 0 (least) to 3 (most aggressive).
pub const VAD_AGGRESSIVENESS: u8 = 2;

/// RMS threshold (0.0 to 1.0) for the energy classifier.
pub const ENERGY_THRESHOLD: f32 = 0.02;

/// Chunks shorter than this are discarded instead of transcribed.
pub const MIN_CHUNK_MS: u64 = 200;

/// Typical utterance length; used to pre-size chunk buffers.
pub const TARGET_CHUNK_MS: u64 = 900;

/// Hard cap on a single chunk. Continuous speech is cut here.
pub const MAX_CHUNK_MS: u64 = 30_000;

/// Consecutive silence frames that close a chunk once exceeded.
///
/// 14 frames is roughly 420ms at 30ms per frame.
pub const SILENCE_FRAMES: u32 = 14;

/// Capacity of the bounded channels between stages.
pub const CHANNEL_CAPACITY: usize = 8;

/// Capacity of the capture-to-chunker frame channel (about two seconds of audio).
pub const FRAME_BUFFER: usize = 64;

/// Bounded wait for a downstream enqueue before the item is dropped.
pub const ENQUEUE_TIMEOUT_MS: u64 = 100;

/// Receive poll interval; bounds how long a stage takes to notice cancellation.
pub const POLL_INTERVAL_MS: u64 = 100;

/// Per-stage join timeout during shutdown.
pub const JOIN_TIMEOUT_MS: u64 = 2000;

/// Join timeout for the synthesizer's internal speech worker.
pub const SPEECH_JOIN_TIMEOUT_MS: u64 = 1000;

/// Time the microphone stays gated after playback ends, to let room echo decay.
pub const COOLDOWN_MS: u64 = 300;

/// Number of previous source utterances kept as translation context.
pub const CONTEXT_UTTERANCES: usize = 1;

/// Character budget of the translation context prefix.
pub const CONTEXT_CHARS: usize = 150;

/// Number of sequence numbers remembered for translation de-duplication.
pub const DEDUP_CAPACITY: usize = 256;

/// Synthesizer speech rate in words per minute.
pub const SPEECH_RATE: u32 = 160;

/// Capacity of the synthesizer's request queue.
pub const SPEECH_QUEUE_CAPACITY: usize = 8;

/// System speech synthesizer invoked by the command engine.
pub const SPEECH_COMMAND: &str = "espeak-ng";

/// Default Whisper model name (multilingual).
pub const DEFAULT_MODEL: &str = "base";

/// Language value that lets the transcription engine detect the language.
pub const AUTO_LANGUAGE: &str = "auto";

/// Default spoken (source) language.
pub const SOURCE_LANGUAGE: &str = "en";

/// Default translation target language.
pub const TARGET_LANGUAGE: &str = "de";

/// Default run duration in seconds. Zero runs until interrupted.
pub const DURATION_SECS: u64 = 60;

/// Consecutive capture read errors tolerated before the device is declared failed.
pub const MAX_CAPTURE_ERRORS: u32 = 10;

/// Report the GPU backend compiled into this build.
pub fn gpu_backend() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA"
    } else if cfg!(feature = "vulkan") {
        "Vulkan"
    } else if cfg!(feature = "openblas") {
        "OpenBLAS"
    } else {
        "CPU"
    }
}

/// Number of samples in one frame at the given rate and duration.
pub fn frame_len(sample_rate: u32, frame_ms: u32) -> usize {
    (sample_rate as usize * frame_ms as usize) / 1000
}
