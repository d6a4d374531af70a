//! Frame type and still-image helpers: YUYV conversion, dark detection,
//! mirroring and JPEG encoding.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

/// JPEG quality used for registration stills.
pub const STILL_JPEG_QUALITY: u8 = 90;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("is_dark", &self.is_dark)
            .finish_non_exhaustive()
    }
}

impl Frame {
    /// Wrap raw grayscale pixels captured now.
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&data, 0.95);
        Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
            is_dark,
        }
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// Flip left-to-right, the way a front camera preview is shown.
    pub fn mirrored(&self) -> Frame {
        let w = self.width as usize;
        let mut data = self.data.clone();
        if w > 0 {
            for row in data.chunks_exact_mut(w) {
                row.reverse();
            }
        }
        Frame {
            data,
            width: self.width,
            height: self.height,
            timestamp: self.timestamp,
            sequence: self.sequence,
            is_dark: self.is_dark,
        }
    }

    /// Encode as a grayscale JPEG.
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        let expected = self.width as usize * self.height as usize;
        if expected == 0 || self.data.len() < expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            });
        }
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode(&self.data[..expected], self.width, self.height, ExtendedColorType::L8)
            .map_err(|e| FrameError::Encode(e.to_string()))?;
        Ok(out)
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
/// Grayscale = every even-indexed byte.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// True if more than `threshold_pct` of pixels fall in the darkest bucket (0–31).
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
    #[error("jpeg encoding failed: {0}")]
    Encode(String),
}
