//! Microphone recording via `cpal`, saved as 16-bit mono WAV with `hound`.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_RECORD_SECONDS: u32 = 5;
const MAX_RECORD_SECONDS: u32 = 60;

#[derive(Error, Debug)]
pub enum MicrophoneError {
    #[error("no input device available")]
    NoDevice,
    #[error("input device config: {0}")]
    Config(String),
    #[error("unsupported sample format: {0:?}")]
    UnsupportedFormat(SampleFormat),
    #[error("input stream failed: {0}")]
    Stream(String),
    #[error("recording duration must be 1..=60 seconds, got {0}")]
    InvalidDuration(u32),
    #[error("recorded no audio")]
    Empty,
    #[error("wav: {0}")]
    Wav(#[from] hound::Error),
}

/// A mono recording at the device's native rate.
#[derive(Debug, Clone)]
pub struct Recording {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Recording {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Write as a 16-bit PCM mono WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<(), MicrophoneError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &s in &self.samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
        Ok(())
    }
}

/// Average interleaved frames down to one channel.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    let channels = channels.max(1);
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Names of the host's input devices.
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to enumerate input devices");
            Vec::new()
        }
    }
}

type Shared = Arc<Mutex<Vec<f32>>>;

fn build_stream(device: &Device, config: &StreamConfig, format: SampleFormat, sink: Shared) -> Result<Stream, MicrophoneError> {
    let on_error = |err: cpal::StreamError| tracing::error!(error = %err, "input stream error");

    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = sink.lock() {
                    buf.extend_from_slice(data);
                }
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = sink.lock() {
                    buf.extend(data.iter().map(|&s| s as f32 / i16::MAX as f32));
                }
            },
            on_error,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = sink.lock() {
                    buf.extend(data.iter().map(|&s| (s as f32 - 32_768.0) / 32_768.0));
                }
            },
            on_error,
            None,
        ),
        other => return Err(MicrophoneError::UnsupportedFormat(other)),
    };
    stream.map_err(|e| MicrophoneError::Stream(e.to_string()))
}

/// Record `seconds` of audio from the default input device.
pub fn record(seconds: u32) -> Result<Recording, MicrophoneError> {
    if seconds == 0 || seconds > MAX_RECORD_SECONDS {
        return Err(MicrophoneError::InvalidDuration(seconds));
    }

    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(MicrophoneError::NoDevice)?;
    let supported = device
        .default_input_config()
        .map_err(|e| MicrophoneError::Config(e.to_string()))?;
    let format = supported.sample_format();
    let config = supported.config();
    let channels = config.channels as usize;

    tracing::info!(
        device = %device.name().unwrap_or_else(|_| "unknown".into()),
        sample_rate = config.sample_rate.0,
        channels,
        ?format,
        seconds,
        "recording"
    );

    let captured: Shared = Arc::new(Mutex::new(Vec::new()));
    let stream = build_stream(&device, &config, format, captured.clone())?;
    stream.play().map_err(|e| MicrophoneError::Stream(e.to_string()))?;
    std::thread::sleep(Duration::from_secs(seconds as u64));
    drop(stream);

    let interleaved = captured
        .lock()
        .map(|buf| buf.clone())
        .map_err(|_| MicrophoneError::Stream("capture buffer poisoned".into()))?;
    if interleaved.is_empty() {
        return Err(MicrophoneError::Empty);
    }

    let recording = Recording {
        samples: downmix(&interleaved, channels),
        sample_rate: config.sample_rate.0,
    };
    tracing::debug!(duration = ?recording.duration(), "recording finished");
    Ok(recording)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix(&[0.5, -0.5, 1.0, 0.0, 0.2, 0.4], 2);
        assert_eq!(mono.len(), 3);
        assert_eq!(mono[0], 0.0);
        assert_eq!(mono[1], 0.5);
        assert!((mono[2] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_downmix_mono_passthrough() {
        assert_eq!(downmix(&[0.1, 0.2], 1), vec![0.1, 0.2]);
        assert_eq!(downmix(&[0.1, 0.2], 0), vec![0.1, 0.2]);
    }

    #[test]
    fn test_write_wav_roundtrip_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let recording = Recording {
            samples: vec![0.0, 1.0, -1.0, 2.0],
            sample_rate: 48_000,
        };
        recording.write_wav(&path).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 48_000);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, i16::MAX, -i16::MAX, i16::MAX]);
    }

    #[test]
    fn test_duration() {
        let recording = Recording {
            samples: vec![0.0; 8_000],
            sample_rate: 16_000,
        };
        assert_eq!(recording.duration(), Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_duration_rejected_before_opening_device() {
        assert!(matches!(record(0), Err(MicrophoneError::InvalidDuration(0))));
        assert!(matches!(record(61), Err(MicrophoneError::InvalidDuration(61))));
    }
}
