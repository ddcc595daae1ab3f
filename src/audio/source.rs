use crate::error::{Result, VoxrelayError};

/// Trait for audio capture sources.
///
/// This trait allows swapping implementations (microphone, WAV file, mock).
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Read the 16-bit mono PCM captured since the last call.
    ///
    /// An empty vector means nothing is available yet (live sources) or the
    /// source is exhausted (finite sources).
    fn read_samples(&mut self) -> Result<Vec<i16>>;

    /// True for file and pipe sources that end; false for live devices.
    fn is_finite(&self) -> bool {
        false
    }
}

/// A run of identical mock frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePhase {
    /// Number of reads this phase lasts.
    pub frames: usize,
    /// Sample value repeated across each frame.
    pub amplitude: i16,
}

impl FramePhase {
    /// Frames of digital silence.
    pub fn silence(frames: usize) -> Self {
        Self {
            frames,
            amplitude: 0,
        }
    }

    /// Loud constant frames that every classifier treats as speech.
    pub fn speech(frames: usize) -> Self {
        Self {
            frames,
            amplitude: 8000,
        }
    }
}

/// Scripted audio source for testing.
///
/// Each read returns one frame from the current phase. When the phases run out
/// a finite mock reports exhaustion (empty reads) and a live mock returns
/// silence forever.
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    is_started: bool,
    phases: Vec<FramePhase>,
    phase_index: usize,
    frames_in_phase: usize,
    frame_len: usize,
    finite: bool,
    should_fail_start: bool,
    read_failures: Option<usize>,
    error_message: String,
}

impl MockAudioSource {
    /// Create a mock that yields 30ms frames at 16kHz.
    pub fn new() -> Self {
        Self {
            is_started: false,
            phases: Vec::new(),
            phase_index: 0,
            frames_in_phase: 0,
            frame_len: crate::defaults::frame_len(
                crate::defaults::SAMPLE_RATE,
                crate::defaults::FRAME_MS,
            ),
            finite: true,
            should_fail_start: false,
            read_failures: None,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Script the frames the source produces, in order.
    pub fn with_phases(mut self, phases: Vec<FramePhase>) -> Self {
        self.phases = phases;
        self
    }

    /// Samples per read.
    pub fn with_frame_len(mut self, frame_len: usize) -> Self {
        self.frame_len = frame_len;
        self
    }

    /// Behave like a microphone: never exhausted.
    pub fn live(mut self) -> Self {
        self.finite = false;
        self
    }

    /// Configure the mock to fail on start.
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Fail every read.
    pub fn with_read_failure(mut self) -> Self {
        self.read_failures = Some(usize::MAX);
        self
    }

    /// Fail the next `count` reads, then recover.
    pub fn with_transient_read_failures(mut self, count: usize) -> Self {
        self.read_failures = Some(count);
        self
    }

    /// Configure the error message for failures.
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.is_started
    }

    fn next_phase_frame(&mut self) -> Option<i16> {
        while let Some(phase) = self.phases.get(self.phase_index) {
            if self.frames_in_phase < phase.frames {
                self.frames_in_phase += 1;
                return Some(phase.amplitude);
            }
            self.phase_index += 1;
            self.frames_in_phase = 0;
        }
        None
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            return Err(VoxrelayError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        self.is_started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if let Some(remaining) = self.read_failures.as_mut()
            && *remaining > 0
        {
            *remaining = remaining.saturating_sub(1);
            return Err(VoxrelayError::AudioCapture {
                message: self.error_message.clone(),
            });
        }

        match self.next_phase_frame() {
            Some(amplitude) => Ok(vec![amplitude; self.frame_len]),
            None if self.finite => Ok(Vec::new()),
            None => Ok(vec![0; self.frame_len]),
        }
    }

    fn is_finite(&self) -> bool {
        self.finite
    }
}
