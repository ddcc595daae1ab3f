//! Finite audio source reading a WAV file or WAV data on stdin.

use crate::audio::source::AudioSource;
use crate::error::{Result, VoxrelayError};
use std::io::Read;
use std::path::Path;

/// Plays back decoded WAV audio as mono i16 at the pipeline's sample rate.
///
/// Any channel count and sample rate are accepted; channels are averaged and
/// the result is linearly resampled.
pub struct WavAudioSource {
    samples: Vec<i16>,
    position: usize,
    read_size: usize,
}

impl WavAudioSource {
    /// Decodes WAV data from any reader.
    ///
    /// # Errors
    /// `AudioCapture` when the data is not a readable 16-bit WAV stream.
    pub fn from_reader<R: Read>(reader: R, target_rate: u32) -> Result<Self> {
        let mut wav = hound::WavReader::new(reader).map_err(|e| VoxrelayError::AudioCapture {
            message: format!("failed to parse WAV data: {e}"),
        })?;

        let spec = wav.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved = wav
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| VoxrelayError::AudioCapture {
                message: format!("failed to read WAV samples: {e}"),
            })?;

        let mono: Vec<i16> = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| {
                    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                    (sum / channels as i32) as i16
                })
                .collect()
        };

        tracing::debug!(
            source_rate = spec.sample_rate,
            channels,
            samples = mono.len(),
            "decoded WAV input"
        );

        Ok(Self {
            samples: resample(&mono, spec.sample_rate, target_rate),
            position: 0,
            // 100ms per read
            read_size: (target_rate / 10).max(1) as usize,
        })
    }

    /// Opens a WAV file.
    pub fn open(path: &Path, target_rate: u32) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| VoxrelayError::AudioCapture {
            message: format!("cannot open {}: {e}", path.display()),
        })?;
        Self::from_reader(std::io::BufReader::new(file), target_rate)
    }

    /// Reads all of stdin, then decodes it.
    pub fn from_stdin(target_rate: u32) -> Result<Self> {
        let mut buffer = Vec::new();
        std::io::stdin()
            .lock()
            .read_to_end(&mut buffer)
            .map_err(|e| VoxrelayError::AudioCapture {
                message: format!("failed to read WAV data from stdin: {e}"),
            })?;

        Self::from_reader(std::io::Cursor::new(buffer), target_rate)
    }

    /// Total length of the decoded audio in milliseconds at `sample_rate`.
    pub fn duration_ms(&self, sample_rate: u32) -> u64 {
        if sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / sample_rate as u64
    }
}

impl AudioSource for WavAudioSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let end = (self.position + self.read_size).min(self.samples.len());
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;
        Ok(chunk)
    }

    fn is_finite(&self) -> bool {
        true
    }
}

/// Linear-interpolation resampling.
pub(crate) fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .filter_map(|i| {
            let position = i as f64 * ratio;
            let index = position.floor() as usize;
            let fraction = position - index as f64;

            match (samples.get(index), samples.get(index + 1)) {
                (Some(&left), Some(&right)) => {
                    let (left, right) = (left as f64, right as f64);
                    Some((left + (right - left) * fraction) as i16)
                }
                (Some(&last), None) => Some(last),
                _ => None,
            }
        })
        .collect()
}
