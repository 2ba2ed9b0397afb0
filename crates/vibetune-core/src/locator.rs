//! SCRFD face locator via ONNX Runtime.
//!
//! Finds face regions in an RGB still so the emotion classifier only sees
//! the face. Anchor-free decoding over three strides followed by NMS.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const CONFIDENCE_THRESHOLD: f32 = 0.5;
const NMS_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("face locator model not found: {0}")]
    ModelNotFound(String),
    #[error("face locator inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A detected face region in source-image pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Integer crop rectangle clamped to an image of `img_w` x `img_h`.
    /// Returns `None` when the clamped region is empty.
    pub fn clamped_rect(&self, img_w: u32, img_h: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0.0).floor() as u32;
        let y0 = self.y.max(0.0).floor() as u32;
        let x1 = ((self.x + self.width).ceil().max(0.0) as u32).min(img_w);
        let y1 = ((self.y + self.height).ceil().max(0.0) as u32).min(img_h);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Pick the face with the largest bounding-box area. Ties keep the earlier box.
pub fn largest_face(faces: &[FaceBox]) -> Option<&FaceBox> {
    faces.iter().fold(None, |best: Option<&FaceBox>, face| match best {
        Some(b) if b.area() >= face.area() => Some(b),
        _ => Some(face),
    })
}

/// Scale and offsets used to map letterboxed coordinates back to the source.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> (Self, u32, u32) {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let pad_x = ((INPUT_SIZE - new_w) / 2) as f32;
        let pad_y = ((INPUT_SIZE - new_h) / 2) as f32;
        (Self { scale, pad_x, pad_y }, new_w, new_h)
    }

    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// SCRFD-based face locator.
pub struct FaceLocator {
    session: Session,
    /// Output indices (score, bbox) per stride, in `STRIDES` order.
    outputs: [(usize, usize); 3],
}

impl FaceLocator {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, LocatorError> {
        if !model_path.exists() {
            return Err(LocatorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(
            path = %model_path.display(),
            outputs = ?names,
            "loaded SCRFD face locator"
        );

        if names.len() < 6 {
            return Err(LocatorError::InferenceFailed(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {} outputs",
                names.len()
            )));
        }

        Ok(Self {
            session,
            outputs: output_indices(&names),
        })
    }

    /// Locate faces, sorted by confidence (highest first).
    pub fn locate(&mut self, image: &RgbImage) -> Result<Vec<FaceBox>, LocatorError> {
        let (input, letterbox) = preprocess(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.outputs[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| LocatorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| LocatorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            candidates.extend(decode_stride(scores, bboxes, stride, &letterbox));
        }

        let faces = nms(candidates, NMS_THRESHOLD);
        tracing::debug!(count = faces.len(), "faces located");
        Ok(faces)
    }
}

/// Resolve (score, bbox) output indices per stride.
///
/// Exports either name their tensors `score_8`, `bbox_8`, ... or use opaque
/// numeric names in the standard order: scores 0-2, bboxes 3-5, keypoints 6-8.
fn output_indices(names: &[String]) -> [(usize, usize); 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<(usize, usize)>> = STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?)))
        .collect();

    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => {
            tracing::debug!(?names, "SCRFD output names not recognized, using positional mapping");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Letterbox into a 640x640 NCHW tensor normalized to the SCRFD input range.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let (letterbox, new_w, new_h) = Letterbox::fit(image.width(), image.height());
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    // Padding at the mean normalizes to 0.0.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let (off_x, off_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x as usize + off_x, y as usize + off_y);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }

    (tensor, letterbox)
}

/// Decode boxes for one stride level into source-image coordinates.
fn decode_stride(scores: &[f32], bboxes: &[f32], stride: usize, letterbox: &Letterbox) -> Vec<FaceBox> {
    let grid = INPUT_SIZE as usize / stride;
    let anchors = grid * grid * ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= CONFIDENCE_THRESHOLD {
                return None;
            }
            let off = idx * 4;
            let d = bboxes.get(off..off + 4)?;

            let cell = idx / ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * step;
            let ay = (cell / grid) as f32 * step;

            let (x1, y1) = letterbox.unmap(ax - d[0] * step, ay - d[1] * step);
            let (x2, y2) = letterbox.unmap(ax + d[2] * step, ay + d[3] * step);

            Some(FaceBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
            })
        })
        .collect()
}

/// Non-maximum suppression; output is sorted by confidence.
fn nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.area() + b.area() - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> FaceBox {
        FaceBox { x, y, width: w, height: h, confidence }
    }

    #[test]
    fn test_largest_face_prefers_area_over_confidence() {
        let faces = vec![
            face(10.0, 10.0, 40.0, 40.0, 0.99),
            face(20.0, 20.0, 120.0, 100.0, 0.60),
        ];
        let best = largest_face(&faces).unwrap();
        assert_eq!(best.width, 120.0);
    }

    #[test]
    fn test_largest_face_tie_keeps_first() {
        let faces = vec![face(0.0, 0.0, 50.0, 50.0, 0.7), face(100.0, 0.0, 50.0, 50.0, 0.9)];
        assert_eq!(largest_face(&faces).unwrap().x, 0.0);
    }

    #[test]
    fn test_largest_face_empty() {
        assert!(largest_face(&[]).is_none());
    }

    #[test]
    fn test_iou_partial() {
        let a = face(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = face(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let boxes = vec![
            face(5.0, 5.0, 100.0, 100.0, 0.8),
            face(0.0, 0.0, 100.0, 100.0, 0.9),
            face(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let kept = nms(boxes, 0.4);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_clamped_rect() {
        let f = face(-10.0, 5.0, 50.0, 500.0, 0.9);
        assert_eq!(f.clamped_rect(100, 100), Some((0, 5, 40, 95)));
        let outside = face(200.0, 200.0, 10.0, 10.0, 0.9);
        assert_eq!(outside.clamped_rect(100, 100), None);
    }

    #[test]
    fn test_letterbox_unmap_roundtrip() {
        let (lb, new_w, new_h) = Letterbox::fit(320, 240);
        assert_eq!((new_w, new_h), (640, 480));
        let (x, y) = lb.unmap(100.0 * lb.scale + lb.pad_x, 50.0 * lb.scale + lb.pad_y);
        assert!((x - 100.0).abs() < 0.1 && (y - 50.0).abs() < 0.1);
    }

    #[test]
    fn test_output_indices_named_and_positional() {
        let named: Vec<String> = ["bbox_8", "score_8", "bbox_16", "score_16", "bbox_32", "score_32"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(output_indices(&named), [(1, 0), (3, 2), (5, 4)]);

        let opaque: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(output_indices(&opaque), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_decode_stride_maps_to_source() {
        let (lb, _, _) = Letterbox::fit(640, 640);
        let grid = 640 / 32;
        let mut scores = vec![0.0; grid * grid * ANCHORS_PER_CELL];
        let mut bboxes = vec![0.0; scores.len() * 4];
        // Anchor at cell (1, 1) with a 2-stride box around it.
        let idx = (grid + 1) * ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let faces = decode_stride(&scores, &bboxes, 32, &lb);
        assert_eq!(faces.len(), 1);
        assert!((faces[0].x - 0.0).abs() < 1e-3);
        assert!((faces[0].width - 64.0).abs() < 1e-3);
    }

    #[test]
    fn test_preprocess_pads_with_zero() {
        let img = RgbImage::from_pixel(320, 160, image::Rgb([255, 255, 255]));
        let (tensor, lb) = preprocess(&img);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!(lb.pad_y > 0.0);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let inside = tensor[[0, 1, 320, 320]];
        assert!((inside - (255.0 - PIXEL_MEAN) / PIXEL_STD).abs() < 1e-3);
    }
}
