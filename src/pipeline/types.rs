//! Core types flowing through the recognition pipeline

use bytes::Bytes;
use tokio::time::Instant;

/// Label the recognizer reports for a face it could not match.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Label given to an authorized face that failed (or could not pass) the
/// anti-spoofing check.
pub const FAKE_LABEL: &str = "Fake";

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Bgr8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        }
    }
}

/// Face location in pixel coordinates, edges inclusive-exclusive
/// (`left..right`, `top..bottom`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl BoundingBox {
    pub fn new(top: u32, right: u32, bottom: u32, left: u32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Intersect with a `width` x `height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> BoundingBox {
        BoundingBox {
            top: self.top.min(height),
            right: self.right.min(width),
            bottom: self.bottom.min(height),
            left: self.left.min(width),
        }
    }
}

/// One captured image.
///
/// A frame is owned by exactly one stage at a time and moves between stages;
/// `data` is reference counted so a stage that needs its own copy pays only
/// for the crop it makes. The buffer is only reachable through `Frame::new`
/// and `Frame::blank`, which size it from the dimensions.
#[derive(Clone)]
pub struct Frame {
    data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Monotonic capture instant
    pub captured_at: Instant,
    /// Per-source capture counter
    pub sequence: u64,
}

impl Frame {
    pub fn new(
        data: Bytes,
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u64,
    ) -> Option<Self> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return None;
        }
        Some(Self {
            data,
            width,
            height,
            format,
            captured_at: Instant::now(),
            sequence,
        })
    }

    /// Uniform grey frame, used by simulated cameras and tests
    pub fn blank(width: u32, height: u32, format: PixelFormat, sequence: u64) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            data: Bytes::from(vec![128u8; len]),
            width,
            height,
            format,
            captured_at: Instant::now(),
            sequence,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Copy out the region under `bbox`. Returns `None` when the box does not
    /// overlap the frame or the buffer is shorter than the dimensions claim.
    pub fn crop(&self, bbox: &BoundingBox) -> Option<Frame> {
        let region = bbox.clamp_to(self.width, self.height);
        if region.is_empty() {
            return None;
        }

        let bpp = self.format.bytes_per_pixel();
        let stride = self.width as usize * bpp;
        let row_len = region.width() as usize * bpp;
        let mut out = Vec::with_capacity(row_len * region.height() as usize);

        for y in region.top..region.bottom {
            let start = y as usize * stride + region.left as usize * bpp;
            out.extend_from_slice(self.data.get(start..start + row_len)?);
        }

        Some(Frame {
            data: Bytes::from(out),
            width: region.width(),
            height: region.height(),
            format: self.format,
            captured_at: self.captured_at,
            sequence: self.sequence,
        })
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("size", &self.size())
            .finish()
    }
}

/// Raw output of the recognition port for one face
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub bbox: BoundingBox,
    pub label: String,
    /// 0..1
    pub confidence: f32,
}

impl RecognitionResult {
    pub fn new(bbox: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.label == UNKNOWN_LABEL
    }
}

/// Outcome of the anti-spoofing pass for one face
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The liveness port confirmed a live face.
    Live,
    /// The liveness port reported a presentation attack.
    Spoofed,
    /// The liveness port failed; treated exactly like `Spoofed`.
    CheckFailed,
    /// No check ran (unknown face, or anti-spoofing disabled).
    NotChecked,
}

impl Liveness {
    pub fn is_live(&self) -> bool {
        matches!(self, Liveness::Live)
    }
}

/// A recognition result after the anti-spoofing pass
#[derive(Debug, Clone, PartialEq)]
pub struct FaceObservation {
    pub bbox: BoundingBox,
    pub label: String,
    pub confidence: f32,
    pub liveness: Liveness,
}

impl FaceObservation {
    pub fn unchecked(result: RecognitionResult) -> Self {
        Self {
            bbox: result.bbox,
            label: result.label,
            confidence: result.confidence,
            liveness: Liveness::NotChecked,
        }
    }

    /// Spoofed and failed checks both lose their identity.
    pub fn checked(result: RecognitionResult, liveness: Liveness) -> Self {
        let label = if liveness.is_live() {
            result.label
        } else {
            String::from(FAKE_LABEL)
        };
        Self {
            bbox: result.bbox,
            label,
            confidence: result.confidence,
            liveness,
        }
    }

    /// Neither the no-match sentinel nor a rejected spoof.
    pub fn has_identity(&self) -> bool {
        self.label != UNKNOWN_LABEL && self.label != FAKE_LABEL
    }
}
