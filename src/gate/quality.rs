//! Geometric quality check for a face box

use crate::config::QualityBounds;
use crate::pipeline::types::BoundingBox;

impl QualityBounds {
    /// True when the face is neither too small (far), too large (close to the
    /// lens), nor touching the frame border.
    pub fn accepts(&self, bbox: &BoundingBox, frame_width: u32, frame_height: u32) -> bool {
        if bbox.is_empty() || frame_width == 0 || frame_height == 0 {
            return false;
        }

        let ratio = bbox.width() as f32 / frame_width as f32;
        if ratio < self.min_face_ratio || ratio > self.max_face_ratio {
            return false;
        }

        let margin_x = (frame_width as f32 * self.edge_margin_ratio).ceil() as u32;
        let margin_y = (frame_height as f32 * self.edge_margin_ratio).ceil() as u32;

        bbox.left >= margin_x
            && bbox.top >= margin_y
            && bbox.right.saturating_add(margin_x) <= frame_width
            && bbox.bottom.saturating_add(margin_y) <= frame_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 320;
    const H: u32 = 240;

    #[test]
    fn test_centered_face_passes() {
        let bounds = QualityBounds::default();
        assert!(bounds.accepts(&BoundingBox::new(60, 210, 180, 110), W, H));
    }

    #[test]
    fn test_too_far_and_too_close_rejected() {
        let bounds = QualityBounds::default();
        // 20 px wide: 6% of the frame
        assert!(!bounds.accepts(&BoundingBox::new(100, 170, 120, 150), W, H));
        // 260 px wide: 81% of the frame
        assert!(!bounds.accepts(&BoundingBox::new(10, 290, 230, 30), W, H));
    }

    #[test]
    fn test_edge_faces_rejected() {
        let bounds = QualityBounds::default();
        assert!(!bounds.accepts(&BoundingBox::new(0, 150, 100, 50), W, H));
        assert!(!bounds.accepts(&BoundingBox::new(60, 320, 180, 220), W, H));
        assert!(!bounds.accepts(&BoundingBox::new(150, 200, 240, 100), W, H));
    }

    #[test]
    fn test_empty_box_rejected() {
        let bounds = QualityBounds::default();
        assert!(!bounds.accepts(&BoundingBox::new(50, 50, 50, 50), W, H));
    }
}
