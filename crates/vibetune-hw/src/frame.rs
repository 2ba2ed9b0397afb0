//! Frame type and pixel conversion: YUYV/GREY to RGB, dark-frame detection.

use image::{ImageFormat, RgbImage};
use std::path::Path;

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    pub fn to_image(&self) -> Result<RgbImage, FrameError> {
        let expected = (self.width * self.height * 3) as usize;
        RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or(FrameError::InvalidLength {
            expected,
            actual: self.data.len(),
        })
    }

    /// Write the frame as a PNG, the file the daemon's face detector reads.
    pub fn save_png(&self, path: &Path) -> Result<(), FrameError> {
        self.to_image()?.save_with_format(path, ImageFormat::Png)?;
        Ok(())
    }
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let c = 1.164 * (y as f32 - 16.0);
            rgb.push(clamp_u8(c + 1.596 * v));
            rgb.push(clamp_u8(c - 0.392 * u - 0.813 * v));
            rgb.push(clamp_u8(c + 2.017 * u));
        }
    }
    Ok(rgb)
}

/// Replicate 8-bit grayscale into RGB.
pub fn grey_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    if gray.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: gray.len(),
        });
    }
    Ok(gray[..expected].iter().flat_map(|&g| [g, g, g]).collect())
}

/// BT.601 luma of packed RGB.
pub fn rgb_luma(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|p| clamp_u8(0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32))
        .collect()
}

/// True if more than `threshold_pct` of pixels fall in the darkest bucket (0–31).
///
/// Webcams often deliver black frames while auto-exposure settles.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_rgb_grey_levels() {
        // Neutral chroma gives grey; Y=16 is black, Y=235 is white.
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_yuyv_to_rgb_red_dominant() {
        // High V pushes red up and green down.
        let yuyv = vec![82, 90, 82, 240];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert!(rgb[0] > 200, "red {}", rgb[0]);
        assert!(rgb[1] < 40, "green {}", rgb[1]);
        assert_eq!(&rgb[..3], &rgb[3..]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_rgb(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_grey_to_rgb() {
        assert_eq!(grey_to_rgb(&[7, 200], 2, 1).unwrap(), vec![7, 7, 7, 200, 200, 200]);
        assert!(grey_to_rgb(&[1], 2, 1).is_err());
    }

    #[test]
    fn test_dark_frame_thresholds() {
        assert!(is_dark_frame(&[0u8; 1000], 0.95));
        assert!(!is_dark_frame(&[128u8; 1000], 0.95));
        assert!(is_dark_frame(&[], 0.95));

        let mut mostly_dark = vec![10u8; 960];
        mostly_dark.extend([128u8; 40]);
        assert!(is_dark_frame(&mostly_dark, 0.95));

        let mut borderline = vec![10u8; 940];
        borderline.extend([128u8; 60]);
        assert!(!is_dark_frame(&borderline, 0.95));
    }

    #[test]
    fn test_save_png_reads_back() {
        let frame = Frame {
            data: [255u8, 0, 0, 0, 0, 255].repeat(2),
            width: 2,
            height: 2,
            sequence: 0,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        frame.save_png(&path).unwrap();
        let decoded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (2, 2));
        assert_eq!(decoded.get_pixel(0, 0), &image::Rgb([255, 0, 0]));
        assert_eq!(decoded.get_pixel(1, 1), &image::Rgb([0, 0, 255]));
    }

    #[test]
    fn test_frame_with_wrong_size_fails() {
        let frame = Frame {
            data: vec![0; 5],
            width: 2,
            height: 2,
            sequence: 0,
        };
        assert!(matches!(frame.to_image(), Err(FrameError::InvalidLength { .. })));
    }
}
