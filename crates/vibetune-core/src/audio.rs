//! Audio preparation for the voice classifier: decode, down-mix, resample, trim.

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

/// Sample rate the voice model was trained on.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;
/// Default silence cutoff, in dB below the loudest frame.
pub const DEFAULT_TOP_DB: f32 = 25.0;
/// A clip whose loudest frame is quieter than this is silent throughout.
const SILENCE_FLOOR_DBFS: f32 = -60.0;
const FRAME_LENGTH: usize = 2048;
const HOP_LENGTH: usize = 512;
const RESAMPLE_CHUNK: usize = 1024;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("unsupported or corrupt audio: {0}")]
    Decode(#[from] SymphoniaError),
    #[error("no audio track in clip")]
    NoTrack,
    #[error("sample rate not specified")]
    UnknownSampleRate,
    #[error("resampling failed: {0}")]
    Resample(String),
}

/// An encoded audio clip in any container symphonia can probe.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub data: Vec<u8>,
    /// File extension, used as a probe hint ("wav", "mp3", "m4a", ...).
    pub extension: Option<String>,
}

impl AudioClip {
    pub fn new(data: Vec<u8>, extension: Option<&str>) -> Self {
        Self {
            data,
            extension: extension.map(|e| e.trim_start_matches('.').to_ascii_lowercase()),
        }
    }
}

/// Decoded mono PCM.
pub struct MonoAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Decode a clip and down-mix every frame to mono.
pub fn decode_mono(clip: &AudioClip) -> Result<MonoAudio, AudioError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(clip.data.clone())), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = &clip.extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(AudioError::NoTrack)?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.ok_or(AudioError::UnknownSampleRate)?;
    let mut decoder = symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!(error = e, "skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        samples.extend(
            buf.samples()
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
        );
    }

    tracing::debug!(frames = samples.len(), sample_rate, "decoded clip to mono");
    Ok(MonoAudio { samples, sample_rate })
}

/// Resample mono PCM to `target_rate` with band-limited sinc interpolation.
///
/// Input is fed in fixed chunks and the filter is flushed at the end; the
/// filter delay is dropped so output sample `i` lines up with input time
/// `i / target_rate`.
pub fn resample(samples: Vec<f32>, source_rate: u32, target_rate: u32) -> Result<Vec<f32>, AudioError> {
    if samples.is_empty() || source_rate == target_rate {
        return Ok(samples);
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = target_rate as f64 / source_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1).map_err(resample_error)?;

    let expected = (samples.len() as f64 * ratio).ceil() as usize;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected + delay);

    for chunk in samples.chunks(RESAMPLE_CHUNK) {
        let input = [chunk];
        let block = if chunk.len() == RESAMPLE_CHUNK {
            resampler.process(&input[..], None)
        } else {
            resampler.process_partial(Some(&input[..]), None)
        }
        .map_err(resample_error)?;
        out.extend_from_slice(&block[0]);
    }
    while out.len() < expected + delay {
        let block = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(resample_error)?;
        if block[0].is_empty() {
            break;
        }
        out.extend_from_slice(&block[0]);
    }

    out.drain(..delay.min(out.len()));
    out.truncate(expected);
    Ok(out)
}

fn resample_error(e: impl std::fmt::Display) -> AudioError {
    AudioError::Resample(e.to_string())
}

/// Decode, down-mix and resample to the voice model's 16 kHz.
pub fn load_mono_16k(clip: &AudioClip) -> Result<Vec<f32>, AudioError> {
    let mono = decode_mono(clip)?;
    resample(mono.samples, mono.sample_rate, TARGET_SAMPLE_RATE)
}

/// Trim leading and trailing silence.
///
/// Frames are centred every `HOP_LENGTH` samples; a frame is silent when its
/// RMS is more than `top_db` below the loudest frame. A clip whose loudest
/// frame sits under the absolute floor trims to nothing.
pub fn trim_silence(samples: &[f32], top_db: f32) -> &[f32] {
    if samples.is_empty() {
        return samples;
    }

    let frames = 1 + samples.len() / HOP_LENGTH;
    let energy: Vec<f32> = (0..frames)
        .map(|i| {
            let centre = i * HOP_LENGTH;
            let start = centre.saturating_sub(FRAME_LENGTH / 2);
            let end = (centre + FRAME_LENGTH / 2).min(samples.len());
            if end <= start {
                return 0.0;
            }
            let window = &samples[start..end];
            // Zero padding counts towards the frame length, as with centred framing.
            window.iter().map(|s| s * s).sum::<f32>() / FRAME_LENGTH as f32
        })
        .collect();

    let peak = energy.iter().copied().fold(0.0f32, f32::max);
    if peak <= 0.0 || 10.0 * peak.log10() < SILENCE_FLOOR_DBFS {
        return &samples[..0];
    }

    let loud = |e: &f32| *e > 0.0 && 10.0 * (e / peak).log10() > -top_db;
    let (Some(first), Some(last)) = (energy.iter().position(loud), energy.iter().rposition(loud)) else {
        return &samples[..0];
    };

    let start = (first * HOP_LENGTH).min(samples.len());
    let end = ((last + 1) * HOP_LENGTH).min(samples.len());
    &samples[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (i as f32 * 440.0 * std::f32::consts::TAU / 16_000.0).sin())
            .collect()
    }

    fn wav_bytes(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_trim_all_zero_is_empty() {
        for len in [1, 511, 16_000, 80_000] {
            assert!(trim_silence(&vec![0.0; len], DEFAULT_TOP_DB).is_empty(), "len {len}");
        }
    }

    #[test]
    fn test_trim_near_silent_noise_is_empty() {
        let hiss: Vec<f32> = (0..16_000).map(|i| if i % 2 == 0 { 1e-5 } else { -1e-5 }).collect();
        assert!(trim_silence(&hiss, DEFAULT_TOP_DB).is_empty());
    }

    #[test]
    fn test_trim_strips_leading_and_trailing_silence() {
        let mut clip = vec![0.0; 8_000];
        clip.extend(tone(16_000, 0.5));
        clip.extend(vec![0.0; 8_000]);

        let trimmed = trim_silence(&clip, DEFAULT_TOP_DB);
        assert!(trimmed.len() >= 16_000, "kept {}", trimmed.len());
        assert!(trimmed.len() < clip.len());
        // At most a frame of padding survives on each side.
        assert!(trimmed.len() <= 16_000 + 2 * FRAME_LENGTH);
    }

    #[test]
    fn test_trim_keeps_fully_loud_clip() {
        let clip = tone(4_096, 0.8);
        assert_eq!(trim_silence(&clip, DEFAULT_TOP_DB).len(), clip.len());
    }

    #[test]
    fn test_decode_stereo_wav_downmixes() {
        // Left +0.5, right -0.5 cancels to silence once down-mixed.
        let interleaved: Vec<i16> = (0..2_000).flat_map(|_| [16_384i16, -16_384]).collect();
        let clip = AudioClip::new(wav_bytes(&interleaved, 16_000, 2), Some("wav"));
        let mono = decode_mono(&clip).unwrap();
        assert_eq!(mono.sample_rate, 16_000);
        assert_eq!(mono.samples.len(), 2_000);
        assert!(mono.samples.iter().all(|s| s.abs() < 1e-3));
    }

    #[test]
    fn test_load_resamples_to_16k() {
        let samples: Vec<i16> = (0..44_100).map(|i| ((i % 100) as i16 - 50) * 200).collect();
        let clip = AudioClip::new(wav_bytes(&samples, 44_100, 1), Some(".WAV"));
        assert_eq!(clip.extension.as_deref(), Some("wav"));
        let out = load_mono_16k(&clip).unwrap();
        let expected = 16_000usize;
        assert!(out.len().abs_diff(expected) < 400, "got {} samples", out.len());
    }

    #[test]
    fn test_resample_keeps_timing_and_tail() {
        // Silence then a plateau: the edge must land at the same instant after resampling.
        let mut samples = vec![0.0f32; 24_000];
        samples.extend(std::iter::repeat(0.5f32).take(24_000));
        let out = resample(samples, 48_000, 16_000).unwrap();
        assert_eq!(out.len(), 16_000);
        let edge = out.iter().position(|&s| s > 0.25).unwrap();
        assert!(edge.abs_diff(8_000) <= 3, "edge at {edge}");
        assert!((out[15_900] - 0.5).abs() < 0.02, "tail {}", out[15_900]);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let clip = AudioClip::new(b"definitely not audio".to_vec(), None);
        assert!(decode_mono(&clip).is_err());
    }
}
