//! Voice emotion detector: wav2vec2 speech-emotion classifier via ONNX Runtime.

use crate::audio::{self, AudioClip, DEFAULT_TOP_DB};
use crate::detection::{Detector, DetectorOutput, Diagnostic};
use crate::normalizer::VOICE_LABELS;
use crate::types::SourceKind;
use ndarray::Array2;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("voice model not found: {0}")]
    ModelNotFound(String),
    #[error("voice inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct VoiceEmotionDetector {
    session: Session,
    top_db: f32,
}

impl VoiceEmotionDetector {
    pub fn load(model_path: &Path) -> Result<Self, VoiceError> {
        if !model_path.exists() {
            return Err(VoiceError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded wav2vec2 voice model"
        );

        Ok(Self {
            session,
            top_db: DEFAULT_TOP_DB,
        })
    }

    /// Silence cutoff in dB below the loudest frame.
    pub fn with_top_db(mut self, top_db: f32) -> Self {
        self.top_db = top_db;
        self
    }

    fn infer(&mut self, speech: &[f32]) -> Result<usize, VoiceError> {
        let input = Array2::from_shape_vec((1, speech.len()), normalize_waveform(speech))
            .map_err(|e| VoiceError::InferenceFailed(format!("input shape: {e}")))?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| VoiceError::InferenceFailed(format!("logits: {e}")))?;

        if logits.len() != VOICE_LABELS.len() {
            return Err(VoiceError::InferenceFailed(format!(
                "expected {} logits, got {}",
                VOICE_LABELS.len(),
                logits.len()
            )));
        }
        argmax(logits).ok_or_else(|| VoiceError::InferenceFailed("empty logits".into()))
    }
}

impl Detector for VoiceEmotionDetector {
    type Input = AudioClip;

    fn source(&self) -> SourceKind {
        SourceKind::Voice
    }

    fn detect(&mut self, clip: &AudioClip) -> DetectorOutput {
        let speech = match prepare_speech(clip, self.top_db) {
            Ok(speech) => speech,
            Err(diagnostic) => return diagnostic.into(),
        };

        match self.infer(&speech) {
            Ok(idx) => DetectorOutput::label(VOICE_LABELS[idx]),
            Err(e) => {
                tracing::warn!(error = %e, "voice analysis failed");
                Diagnostic::Error(format!("Error during voice analysis: {e}")).into()
            }
        }
    }
}

/// 16 kHz mono speech with leading and trailing silence removed.
fn prepare_speech(clip: &AudioClip, top_db: f32) -> Result<Vec<f32>, Diagnostic> {
    let samples = audio::load_mono_16k(clip).map_err(|e| {
        tracing::warn!(error = %e, "audio conversion failed");
        Diagnostic::ConversionFailed(e.to_string())
    })?;

    let speech = audio::trim_silence(&samples, top_db);
    if speech.is_empty() {
        return Err(Diagnostic::Silent);
    }
    tracing::debug!(kept = speech.len(), total = samples.len(), "silence trimmed");
    Ok(speech.to_vec())
}

/// Zero-mean, unit-variance normalization applied by the wav2vec2 feature extractor.
fn normalize_waveform(speech: &[f32]) -> Vec<f32> {
    let n = speech.len().max(1) as f32;
    let mean = speech.iter().sum::<f32>() / n;
    let var = speech.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / n;
    let denom = (var + 1e-7).sqrt();
    speech.iter().map(|s| (s - mean) / denom).collect()
}

fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}
