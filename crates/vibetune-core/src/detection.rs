//! Detector seam and the values detectors hand back.

use crate::types::{Emotion, SourceKind};
use serde::Serialize;
use std::fmt;

/// Non-emotion result signalling an input or system condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    NoFaceDetected,
    Uncertain,
    Silent,
    ModelNotLoaded(SourceKind),
    ConversionFailed(String),
    Error(String),
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::NoFaceDetected => f.write_str("No face detected"),
            Diagnostic::Uncertain => f.write_str("Uncertain"),
            Diagnostic::Silent => f.write_str("Audio is silent."),
            Diagnostic::ModelNotLoaded(source) => write!(f, "{source} model not loaded."),
            Diagnostic::ConversionFailed(reason) => write!(f, "Audio conversion failed: {reason}"),
            Diagnostic::Error(reason) => write!(f, "Error: {reason}"),
        }
    }
}

/// What a detector produced: a label in the model's own vocabulary, or a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorOutput {
    Label(String),
    Diagnostic(Diagnostic),
}

impl DetectorOutput {
    pub fn label(label: impl Into<String>) -> Self {
        DetectorOutput::Label(label.into())
    }

    pub fn raw_label(&self) -> Option<&str> {
        match self {
            DetectorOutput::Label(l) => Some(l),
            DetectorOutput::Diagnostic(_) => None,
        }
    }

    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            DetectorOutput::Label(_) => None,
            DetectorOutput::Diagnostic(d) => Some(d),
        }
    }
}

impl From<Diagnostic> for DetectorOutput {
    fn from(d: Diagnostic) -> Self {
        DetectorOutput::Diagnostic(d)
    }
}

/// Normalizer output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Emotion(Emotion),
    NotClassifiable(String),
}

impl Classification {
    pub fn emotion(&self) -> Option<Emotion> {
        match self {
            Classification::Emotion(e) => Some(*e),
            Classification::NotClassifiable(_) => None,
        }
    }
}

/// One completed detection, ready for presentation.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub source: SourceKind,
    /// Raw model label, when the detector produced one.
    pub label: Option<String>,
    pub diagnostic: Option<String>,
    pub emotion: Option<Emotion>,
    pub message: String,
}

impl DetectionResult {
    pub fn new(source: SourceKind, output: &DetectorOutput, classification: &Classification) -> Self {
        let message = match classification {
            Classification::Emotion(e) => format!("Emotion Detected: {e}"),
            Classification::NotClassifiable(reason) => reason.clone(),
        };
        Self {
            source,
            label: output.raw_label().map(str::to_string),
            diagnostic: output.diagnostic().map(|d| d.to_string()),
            emotion: classification.emotion(),
            message,
        }
    }
}

/// A pretrained classifier wrapped with its pre/post-processing.
///
/// Detectors never fail: every error is folded into a [`Diagnostic`].
pub trait Detector {
    type Input: ?Sized;

    fn source(&self) -> SourceKind;

    fn detect(&mut self, input: &Self::Input) -> DetectorOutput;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    type Input = D::Input;

    fn source(&self) -> SourceKind {
        (**self).source()
    }

    fn detect(&mut self, input: &Self::Input) -> DetectorOutput {
        (**self).detect(input)
    }
}

/// A detector whose model may have failed to load.
///
/// A failed load is permanent for the process: every call reports the same
/// "not loaded" diagnostic.
pub enum ModelSlot<D> {
    Ready(D),
    Unavailable { source: SourceKind, reason: String },
}

impl<D: Detector> ModelSlot<D> {
    /// Wrap a load attempt, logging the failure once.
    pub fn from_load<E: fmt::Display>(source: SourceKind, result: Result<D, E>) -> Self {
        match result {
            Ok(detector) => ModelSlot::Ready(detector),
            Err(e) => {
                tracing::warn!(%source, error = %e, "model unavailable");
                ModelSlot::Unavailable {
                    source,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Why the model failed to load; `None` for a ready slot.
    pub fn unavailable_reason(&self) -> Option<&str> {
        match self {
            ModelSlot::Ready(_) => None,
            ModelSlot::Unavailable { reason, .. } => Some(reason),
        }
    }
}

impl<D: Detector> Detector for ModelSlot<D> {
    type Input = D::Input;

    fn source(&self) -> SourceKind {
        match self {
            ModelSlot::Ready(d) => d.source(),
            ModelSlot::Unavailable { source, .. } => *source,
        }
    }

    fn detect(&mut self, input: &Self::Input) -> DetectorOutput {
        match self {
            ModelSlot::Ready(d) => d.detect(input),
            ModelSlot::Unavailable { source, .. } => Diagnostic::ModelNotLoaded(*source).into(),
        }
    }
}
