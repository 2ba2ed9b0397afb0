//! Face emotion detector: SCRFD locator + ResNet50 expression classifier.

use crate::detection::{Detector, DetectorOutput, Diagnostic};
use crate::locator::{largest_face, FaceBox, FaceLocator, LocatorError};
use crate::normalizer::FACE_LABELS;
use crate::types::SourceKind;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const CLASSIFIER_INPUT_SIZE: u32 = 224;
/// Below this top-class probability the prediction is reported as uncertain.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.40;

#[derive(Error, Debug)]
pub enum FaceError {
    #[error("face classifier model not found: {0}")]
    ModelNotFound(String),
    #[error("face classifier inference failed: {0}")]
    InferenceFailed(String),
    #[error(transparent)]
    Locator(#[from] LocatorError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceEmotionDetector {
    locator: FaceLocator,
    classifier: Session,
    confidence_threshold: f32,
}

impl FaceEmotionDetector {
    /// Load both ONNX models. Fails if either is missing.
    pub fn load(locator_path: &Path, classifier_path: &Path) -> Result<Self, FaceError> {
        let locator = FaceLocator::load(locator_path)?;

        if !classifier_path.exists() {
            return Err(FaceError::ModelNotFound(classifier_path.display().to_string()));
        }
        let classifier = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(classifier_path)?;

        tracing::info!(
            path = %classifier_path.display(),
            inputs = ?classifier.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            "loaded face emotion classifier"
        );

        Ok(Self {
            locator,
            classifier,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        })
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn classify(&mut self, face: &RgbImage) -> Result<Vec<f32>, FaceError> {
        let input = classifier_input(face);
        let outputs = self
            .classifier
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| FaceError::InferenceFailed(format!("class scores: {e}")))?;

        if raw.len() != FACE_LABELS.len() {
            return Err(FaceError::InferenceFailed(format!(
                "expected {} class scores, got {}",
                FACE_LABELS.len(),
                raw.len()
            )));
        }
        Ok(as_probabilities(raw))
    }

    fn run(&mut self, bytes: &[u8]) -> Result<DetectorOutput, FaceError> {
        let image = match decode_image(bytes) {
            Ok(image) => image,
            Err(diagnostic) => return Ok(diagnostic.into()),
        };
        let faces = self.locator.locate(&image)?;
        let threshold = self.confidence_threshold;
        classify_largest_face(&image, &faces, threshold, |roi| self.classify(roi))
    }
}

fn decode_image(bytes: &[u8]) -> Result<RgbImage, Diagnostic> {
    image::load_from_memory(bytes).map(|img| img.to_rgb8()).map_err(|e| {
        tracing::debug!(error = %e, "image decode failed");
        Diagnostic::Error("Error loading image".into())
    })
}

/// Classify the largest of the located faces; no faces is a diagnostic.
fn classify_largest_face(
    image: &RgbImage,
    faces: &[FaceBox],
    threshold: f32,
    classify: impl FnOnce(&RgbImage) -> Result<Vec<f32>, FaceError>,
) -> Result<DetectorOutput, FaceError> {
    let Some(roi) = crop_largest_face(image, faces) else {
        return Ok(Diagnostic::NoFaceDetected.into());
    };
    let probs = classify(&roi)?;
    Ok(decide(&probs, threshold))
}

impl Detector for FaceEmotionDetector {
    type Input = [u8];

    fn source(&self) -> SourceKind {
        SourceKind::Face
    }

    fn detect(&mut self, input: &[u8]) -> DetectorOutput {
        self.run(input).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "face analysis failed");
            Diagnostic::Error(e.to_string()).into()
        })
    }
}

/// Crop the largest detected face out of the colour image.
fn crop_largest_face(image: &RgbImage, faces: &[FaceBox]) -> Option<RgbImage> {
    let face = largest_face(faces)?;
    let (x, y, w, h) = face.clamped_rect(image.width(), image.height())?;
    tracing::debug!(x, y, w, h, confidence = face.confidence, "classifying largest face");
    Some(imageops::crop_imm(image, x, y, w, h).to_image())
}

/// 224x224 RGB scaled to [0, 1], NHWC as the Keras export expects.
fn classifier_input(face: &RgbImage) -> Array4<f32> {
    let size = CLASSIFIER_INPUT_SIZE;
    let resized = imageops::resize(face, size, size, FilterType::Triangle);
    let mut tensor = Array4::<f32>::zeros((1, size as usize, size as usize, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Softmax the scores unless they already form a distribution.
fn as_probabilities(raw: &[f32]) -> Vec<f32> {
    let sum: f32 = raw.iter().sum();
    if raw.iter().all(|&p| (0.0..=1.0).contains(&p)) && (sum - 1.0).abs() < 1e-3 {
        return raw.to_vec();
    }
    let max = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = raw.iter().map(|&v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

fn decide(probs: &[f32], threshold: f32) -> DetectorOutput {
    let best = probs
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1));
    match best {
        Some((idx, &p)) if p >= threshold => DetectorOutput::label(FACE_LABELS[idx]),
        _ => Diagnostic::Uncertain.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_below_threshold_is_uncertain() {
        let probs = [0.2, 0.1, 0.1, 0.39, 0.1, 0.05, 0.06];
        assert_eq!(decide(&probs, 0.40), Diagnostic::Uncertain.into());
    }

    #[test]
    fn test_decide_picks_top_label() {
        let probs = [0.05, 0.05, 0.05, 0.7, 0.05, 0.05, 0.05];
        assert_eq!(decide(&probs, 0.40), DetectorOutput::label("Happy"));
        let probs = [0.0, 0.0, 0.0, 0.0, 0.0, 0.4, 0.6];
        assert_eq!(decide(&probs, 0.40), DetectorOutput::label("Neutral"));
    }

    #[test]
    fn test_as_probabilities_passes_through_distribution() {
        let p = [0.5, 0.25, 0.25];
        assert_eq!(as_probabilities(&p), p.to_vec());
    }

    #[test]
    fn test_as_probabilities_softmaxes_logits() {
        let p = as_probabilities(&[2.0, 1.0, -3.0]);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(p[0] > p[1] && p[1] > p[2]);
    }

    #[test]
    fn test_crop_largest_of_overlapping_faces() {
        let mut image = RgbImage::from_pixel(200, 200, image::Rgb([0, 0, 0]));
        for (x, y, px) in image.enumerate_pixels_mut() {
            if x >= 50 && y >= 50 {
                *px = image::Rgb([200, 10, 10]);
            }
        }
        let faces = vec![
            FaceBox { x: 40.0, y: 40.0, width: 30.0, height: 30.0, confidence: 0.95 },
            FaceBox { x: 50.0, y: 50.0, width: 120.0, height: 100.0, confidence: 0.7 },
        ];
        let roi = crop_largest_face(&image, &faces).unwrap();
        assert_eq!(roi.dimensions(), (120, 100));
        assert_eq!(roi.get_pixel(0, 0), &image::Rgb([200, 10, 10]));
    }

    #[test]
    fn test_crop_without_faces() {
        let image = RgbImage::new(10, 10);
        assert!(crop_largest_face(&image, &[]).is_none());
    }

    #[test]
    fn test_no_located_face_reports_no_face_detected() {
        let image = RgbImage::from_pixel(64, 64, image::Rgb([120, 120, 120]));
        let output = classify_largest_face(&image, &[], DEFAULT_CONFIDENCE_THRESHOLD, |_| {
            panic!("classifier must not run without a face")
        })
        .unwrap();
        assert_eq!(output, Diagnostic::NoFaceDetected.into());
        assert_eq!(output.diagnostic().unwrap().to_string(), "No face detected");
    }

    #[test]
    fn test_located_face_is_classified() {
        let image = RgbImage::from_pixel(64, 64, image::Rgb([120, 120, 120]));
        let faces = [FaceBox { x: 8.0, y: 8.0, width: 40.0, height: 40.0, confidence: 0.9 }];
        let output = classify_largest_face(&image, &faces, DEFAULT_CONFIDENCE_THRESHOLD, |roi| {
            assert_eq!(roi.dimensions(), (40, 40));
            Ok(vec![0.05, 0.05, 0.05, 0.7, 0.05, 0.05, 0.05])
        })
        .unwrap();
        assert_eq!(output, DetectorOutput::label("Happy"));
    }

    #[test]
    fn test_undecodable_image_is_error_loading_image() {
        assert_eq!(
            decode_image(b"definitely not a jpeg"),
            Err(Diagnostic::Error("Error loading image".into()))
        );
    }

    #[test]
    fn test_classifier_input_layout() {
        let face = RgbImage::from_pixel(50, 80, image::Rgb([255, 0, 51]));
        let t = classifier_input(&face);
        assert_eq!(t.shape(), &[1, 224, 224, 3]);
        assert!((t[[0, 100, 100, 0]] - 1.0).abs() < 1e-6);
        assert_eq!(t[[0, 100, 100, 1]], 0.0);
        assert!((t[[0, 100, 100, 2]] - 0.2).abs() < 1e-6);
    }
}
