//! Per-frame voice activity classification.
//!
//! Two classifiers are available: an RMS energy threshold that needs nothing
//! beyond the samples, and WebRTC VAD with its four aggressiveness modes
//! (behind the `webrtc` feature).

use crate::error::Result;
#[cfg(feature = "webrtc")]
use crate::error::VoxrelayError;
use serde::{Deserialize, Serialize};

/// Classifies one frame of PCM as speech or silence.
pub trait FrameClassifier: Send {
    /// Returns true if the frame contains speech.
    fn is_speech(&mut self, frame: &[i16]) -> Result<bool>;

    /// Classifier name for logging.
    fn name(&self) -> &'static str;
}

/// Which classifier to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadKind {
    /// WebRTC VAD, falls back to energy when built without the `webrtc` feature.
    #[default]
    Webrtc,
    /// RMS energy threshold.
    Energy,
}

/// Settings needed to build any classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierConfig {
    pub kind: VadKind,
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub aggressiveness: u8,
    pub energy_threshold: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            kind: VadKind::default(),
            sample_rate: crate::defaults::SAMPLE_RATE,
            frame_ms: crate::defaults::FRAME_MS,
            aggressiveness: crate::defaults::VAD_AGGRESSIVENESS,
            energy_threshold: crate::defaults::ENERGY_THRESHOLD,
        }
    }
}

/// Builds the configured classifier.
///
/// # Errors
/// Returns `VoxrelayError::EngineInit` if WebRTC VAD rejects the sample rate,
/// frame duration or aggressiveness.
pub fn build_classifier(config: &ClassifierConfig) -> Result<Box<dyn FrameClassifier>> {
    match config.kind {
        VadKind::Energy => Ok(Box::new(EnergyClassifier::new(config.energy_threshold))),
        #[cfg(feature = "webrtc")]
        VadKind::Webrtc => Ok(Box::new(WebRtcClassifier::new(
            config.sample_rate,
            config.frame_ms,
            config.aggressiveness,
        )?)),
        #[cfg(not(feature = "webrtc"))]
        VadKind::Webrtc => {
            tracing::warn!("built without WebRTC VAD, using energy classifier");
            Ok(Box::new(EnergyClassifier::new(config.energy_threshold)))
        }
    }
}

/// Calculates the RMS level of 16-bit samples, normalized to 0.0..=1.0.
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    let mean_square = sum_squares / samples.len() as f64;
    mean_square.sqrt() as f32
}

/// Speech when the frame's RMS level exceeds a fixed threshold.
#[derive(Debug, Clone, Copy)]
pub struct EnergyClassifier {
    threshold: f32,
}

impl EnergyClassifier {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl FrameClassifier for EnergyClassifier {
    fn is_speech(&mut self, frame: &[i16]) -> Result<bool> {
        Ok(calculate_rms(frame) > self.threshold)
    }

    fn name(&self) -> &'static str {
        "energy"
    }
}

/// Wrapper for `webrtc_vad::Vad` to make it Send.
///
/// SAFETY: the VAD holds a raw pointer to its C state and is not Send. The
/// wrapper is owned by exactly one classifier, which is owned by the chunker
/// station and only ever touched from that station's thread.
#[cfg(feature = "webrtc")]
struct SendableVad(webrtc_vad::Vad);

#[cfg(feature = "webrtc")]
unsafe impl Send for SendableVad {}

/// WebRTC voice activity detector.
#[cfg(feature = "webrtc")]
pub struct WebRtcClassifier {
    vad: SendableVad,
    frame_len: usize,
}

#[cfg(feature = "webrtc")]
impl WebRtcClassifier {
    /// Creates a detector for frames of `frame_ms` at `sample_rate`.
    ///
    /// WebRTC VAD accepts 8/16/32/48kHz, 10/20/30ms frames and aggressiveness 0-3.
    pub fn new(sample_rate: u32, frame_ms: u32, aggressiveness: u8) -> Result<Self> {
        use webrtc_vad::{SampleRate, Vad, VadMode};

        let rate = match sample_rate {
            8000 => SampleRate::Rate8kHz,
            16000 => SampleRate::Rate16kHz,
            32000 => SampleRate::Rate32kHz,
            48000 => SampleRate::Rate48kHz,
            other => {
                return Err(VoxrelayError::EngineInit {
                    engine: "webrtc-vad".to_string(),
                    message: format!("unsupported sample rate {other}Hz"),
                });
            }
        };
        if !matches!(frame_ms, 10 | 20 | 30) {
            return Err(VoxrelayError::EngineInit {
                engine: "webrtc-vad".to_string(),
                message: format!("frames must be 10, 20 or 30ms, got {frame_ms}ms"),
            });
        }
        let mode = match aggressiveness {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            3 => VadMode::VeryAggressive,
            other => {
                return Err(VoxrelayError::EngineInit {
                    engine: "webrtc-vad".to_string(),
                    message: format!("aggressiveness must be 0-3, got {other}"),
                });
            }
        };

        Ok(Self {
            vad: SendableVad(Vad::new_with_rate_and_mode(rate, mode)),
            frame_len: crate::defaults::frame_len(sample_rate, frame_ms),
        })
    }
}

#[cfg(feature = "webrtc")]
impl FrameClassifier for WebRtcClassifier {
    fn is_speech(&mut self, frame: &[i16]) -> Result<bool> {
        if frame.len() != self.frame_len {
            return Err(VoxrelayError::AudioCapture {
                message: format!(
                    "VAD frame has {} samples, expected {}",
                    frame.len(),
                    self.frame_len
                ),
            });
        }
        self.vad
            .0
            .is_voice_segment(frame)
            .map_err(|()| VoxrelayError::AudioCapture {
                message: "WebRTC VAD rejected the frame".to_string(),
            })
    }

    fn name(&self) -> &'static str {
        "webrtc"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_silence(count: usize) -> Vec<i16> {
        vec![0i16; count]
    }

    fn make_speech(count: usize, amplitude: i16) -> Vec<i16> {
        vec![amplitude; count]
    }

    #[test]
    fn test_rms_silence_is_zero() {
        assert_eq!(calculate_rms(&make_silence(1000)), 0.0);
    }

    #[test]
    fn test_rms_empty_is_zero() {
        assert_eq!(calculate_rms(&[]), 0.0);
    }

    #[test]
    fn test_rms_full_scale_is_one() {
        let rms = calculate_rms(&make_speech(100, i16::MAX));
        assert!((rms - 1.0).abs() < 1e-6, "got {rms}");
    }

    #[test]
    fn test_energy_classifier_threshold() {
        let mut classifier = EnergyClassifier::new(0.02);

        assert!(!classifier.is_speech(&make_silence(480)).unwrap());
        // 8000 / 32767 is about 0.24
        assert!(classifier.is_speech(&make_speech(480, 8000)).unwrap());
        // 300 / 32767 is about 0.009
        assert!(!classifier.is_speech(&make_speech(480, 300)).unwrap());
    }

    #[test]
    fn test_build_energy_classifier() {
        let config = ClassifierConfig {
            kind: VadKind::Energy,
            ..Default::default()
        };
        let classifier = build_classifier(&config).unwrap();
        assert_eq!(classifier.name(), "energy");
    }

    #[test]
    fn test_vad_kind_parses_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            vad: VadKind,
        }
        let parsed: Wrapper = toml::from_str(r#"vad = "energy""#).unwrap();
        assert_eq!(parsed.vad, VadKind::Energy);
    }

    #[cfg(feature = "webrtc")]
    #[test]
    fn test_webrtc_rejects_unsupported_rate() {
        let result = WebRtcClassifier::new(44100, 30, 2);
        assert!(matches!(result, Err(VoxrelayError::EngineInit { .. })));
    }

    #[cfg(feature = "webrtc")]
    #[test]
    fn test_webrtc_rejects_bad_aggressiveness() {
        let result = WebRtcClassifier::new(16000, 30, 4);
        assert!(matches!(result, Err(VoxrelayError::EngineInit { .. })));
    }

    #[cfg(feature = "webrtc")]
    #[test]
    fn test_webrtc_classifies_silence() {
        let mut classifier = WebRtcClassifier::new(16000, 30, 2).unwrap();
        assert!(!classifier.is_speech(&make_silence(480)).unwrap());
    }

    #[cfg(feature = "webrtc")]
    #[test]
    fn test_webrtc_rejects_wrong_frame_length() {
        let mut classifier = WebRtcClassifier::new(16000, 30, 2).unwrap();
        assert!(classifier.is_speech(&make_silence(100)).is_err());
    }
}
