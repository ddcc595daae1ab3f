//! Audio input: capture sources, frame slicing and speech classification.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod frames;
pub mod source;
pub mod vad;
pub mod wav;

pub use frames::{AudioFrameSource, FrameRead};
pub use source::{AudioSource, FramePhase, MockAudioSource};
pub use vad::{ClassifierConfig, EnergyClassifier, FrameClassifier, VadKind, build_classifier};
pub use wav::WavAudioSource;
