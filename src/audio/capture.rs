//! Microphone capture through CPAL.

use crate::audio::source::AudioSource;
use crate::error::{Result, VoxrelayError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// CPAL probing makes ALSA and JACK print harmless but alarming messages.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` on fd 2. Call before worker threads start
/// writing to stderr.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Sound servers that follow the desktop's input selection.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse"];

/// Outputs and per-channel ALSA aliases that are never a microphone.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "digital output",
    "hdmi",
    "s/pdif",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES.iter().any(|pref| lower.contains(pref))
}

/// An input device as shown by `voxrelay devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDevice {
    pub name: String,
    pub recommended: bool,
}

/// Lists usable input devices, marking the sound-server ones as recommended.
///
/// # Errors
/// Returns `VoxrelayError::AudioCapture` if device enumeration fails.
pub fn list_devices() -> Result<Vec<InputDevice>> {
    let devices = with_suppressed_stderr(|| cpal::default_host().input_devices()).map_err(|e| {
        VoxrelayError::AudioCapture {
            message: format!("failed to enumerate input devices: {e}"),
        }
    })?;

    Ok(devices
        .filter_map(|device| device.name().ok())
        .filter(|name| !should_filter_device(name))
        .map(|name| InputDevice {
            recommended: is_preferred_device(&name),
            name,
        })
        .collect())
}

fn find_device(device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let mut devices = host
            .input_devices()
            .map_err(|e| VoxrelayError::AudioCapture {
                message: format!("failed to enumerate input devices: {e}"),
            })?;

        match device_name {
            Some(wanted) => devices
                .find(|dev| dev.name().is_ok_and(|name| name == wanted))
                .ok_or_else(|| VoxrelayError::AudioDeviceNotFound {
                    device: wanted.to_string(),
                }),
            None => devices
                .find(|dev| dev.name().is_ok_and(|name| is_preferred_device(&name)))
                .or_else(|| host.default_input_device())
                .ok_or_else(|| VoxrelayError::AudioDeviceNotFound {
                    device: "default".to_string(),
                }),
        }
    })
}

/// Wrapper for `cpal::Stream` to make it Send.
///
/// SAFETY: the stream is only created, paused and dropped by the thread that
/// owns the `CpalAudioSource`, behind its Mutex.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Live microphone source delivering mono i16 PCM at the requested rate.
///
/// The device is asked for the target format directly (i16, then f32). If it
/// refuses, or accepts but never fires its callback, capture falls back to the
/// device's native format with software mix-down and resampling.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Mutex<Option<SendableStream>>,
    buffer: Arc<Mutex<Vec<i16>>>,
    callback_count: Arc<AtomicU64>,
    sample_rate: u32,
}

impl CpalAudioSource {
    /// Opens `device_name`, or the preferred default when `None`.
    ///
    /// # Errors
    /// `AudioDeviceNotFound` when the name matches nothing or no input exists.
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = find_device(device_name)?;
        if let Ok(name) = device.name() {
            info!(device = %name, sample_rate, "opened input device");
        }

        Ok(Self {
            device,
            stream: Mutex::new(None),
            buffer: Arc::new(Mutex::new(Vec::new())),
            callback_count: Arc::new(AtomicU64::new(0)),
            sample_rate,
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            log_stream_error,
            None,
        ) {
            return Ok(stream);
        }

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend(data.iter().map(|&s| f32_to_i16(s)));
                }
            },
            log_stream_error,
            None,
        ) {
            return Ok(stream);
        }

        self.build_native_stream()
    }

    fn build_native_stream(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let native = self
            .device
            .default_input_config()
            .map_err(|e| VoxrelayError::AudioCapture {
                message: format!("failed to query default input config: {e}"),
            })?;

        let native_rate = native.sample_rate().0;
        let channels = native.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = native.clone().into();

        info!(
            channels,
            native_rate,
            format = ?native.sample_format(),
            "using native capture format, converting in software"
        );

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        let sink = move |samples: &[i16]| {
            counter.fetch_add(1, Ordering::Relaxed);
            let converted = to_mono_at_rate(samples, channels, native_rate, target_rate);
            if let Ok(mut buf) = buffer.lock() {
                buf.extend_from_slice(&converted);
            }
        };

        let stream = match native.sample_format() {
            SampleFormat::I16 => self.device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| sink(data),
                log_stream_error,
                None,
            ),
            SampleFormat::F32 => self.device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let pcm: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                    sink(&pcm)
                },
                log_stream_error,
                None,
            ),
            other => {
                return Err(VoxrelayError::AudioCapture {
                    message: format!(
                        "unsupported native sample format {other:?}; pick another device with --device"
                    ),
                });
            }
        };

        stream.map_err(|e| VoxrelayError::AudioCapture {
            message: format!("failed to build native input stream: {e}"),
        })
    }

    fn lock_stream(&self) -> Result<std::sync::MutexGuard<'_, Option<SendableStream>>> {
        self.stream.lock().map_err(|e| VoxrelayError::AudioCapture {
            message: format!("failed to lock stream: {e}"),
        })
    }
}

fn log_stream_error(err: cpal::StreamError) {
    error!("audio stream error: {err}");
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Averages interleaved channels to mono and resamples to `target_rate`.
fn to_mono_at_rate(samples: &[i16], channels: usize, source_rate: u32, target_rate: u32) -> Vec<i16> {
    let mono: Vec<i16> = if channels <= 1 {
        samples.to_vec()
    } else {
        samples
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    };

    if source_rate == target_rate {
        mono
    } else {
        crate::audio::wav::resample(&mono, source_rate, target_rate)
    }
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.lock_stream()?.is_some() {
            return Ok(());
        }

        let stream = self.build_stream()?;
        stream.play().map_err(|e| VoxrelayError::AudioCapture {
            message: format!("failed to start audio stream: {e}"),
        })?;

        // Some PipeWire-ALSA setups accept a config and then never call back.
        std::thread::sleep(Duration::from_millis(200));

        let stream = if self.callback_count.load(Ordering::Relaxed) == 0 {
            debug!("no audio callbacks after 200ms, retrying with native format");
            drop(stream);
            if let Ok(mut buf) = self.buffer.lock() {
                buf.clear();
            }
            let native = self.build_native_stream()?;
            native.play().map_err(|e| VoxrelayError::AudioCapture {
                message: format!("failed to start native audio stream: {e}"),
            })?;
            native
        } else {
            stream
        };

        *self.lock_stream()? = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.lock_stream()?.take() {
            stream.0.pause().map_err(|e| VoxrelayError::AudioCapture {
                message: format!("failed to stop audio stream: {e}"),
            })?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let mut buffer = self.buffer.lock().map_err(|e| VoxrelayError::AudioCapture {
            message: format!("failed to lock audio buffer: {e}"),
        })?;
        Ok(std::mem::take(&mut *buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_filter_device() {
        assert!(should_filter_device("surround51"));
        assert!(should_filter_device("front:CARD=PCH"));
        assert!(should_filter_device("HDMI Output"));
        assert!(should_filter_device("Digital Output S/PDIF"));
        assert!(!should_filter_device("pipewire"));
        assert!(!should_filter_device("Built-in Audio"));
    }

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("PipeWire"));
        assert!(is_preferred_device("PulseAudio"));
        assert!(!is_preferred_device("hw:0,0"));
        assert!(!is_preferred_device("default"));
    }

    #[test]
    fn test_stereo_mixdown_same_rate() {
        let stereo = [100, 300, -200, -400];
        assert_eq!(to_mono_at_rate(&stereo, 2, 16000, 16000), vec![200, -300]);
    }

    #[test]
    fn test_mixdown_and_downsample() {
        let stereo = vec![1000i16; 48000 * 2];
        let mono = to_mono_at_rate(&stereo, 2, 48000, 16000);
        assert_eq!(mono.len(), 16000);
        assert!(mono.iter().all(|&s| s == 1000));
    }

    #[test]
    fn test_f32_conversion_clamps() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(-2.0), -i16::MAX);
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_capture_start_read_stop() {
        let mut source = CpalAudioSource::new(None, 16000).expect("default input device");
        source.start().expect("start capture");
        std::thread::sleep(Duration::from_millis(100));
        assert!(source.read_samples().is_ok());
        source.stop().expect("stop capture");
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_unknown_device_name() {
        match CpalAudioSource::new(Some("NonExistentDevice12345"), 16000) {
            Err(VoxrelayError::AudioDeviceNotFound { device }) => {
                assert_eq!(device, "NonExistentDevice12345")
            }
            Err(e) => panic!("Expected AudioDeviceNotFound, got {e}"),
            Ok(_) => panic!("Expected AudioDeviceNotFound"),
        }
    }
}
