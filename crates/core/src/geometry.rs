//! Coordinate transforms from image pixel space to slide points.

use serde::{Deserialize, Serialize};

use crate::layout::BBox;

/// Result of fitting a source image onto a slide page.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fit {
    pub scale: f64,
    pub offset_x_pt: f64,
    pub offset_y_pt: f64,
    pub placed_w_pt: f64,
    pub placed_h_pt: f64,
}

/// Compute the scale and centering offsets that place an image on a slide
/// while preserving its aspect ratio.
pub fn compute_fit(img_w_px: f64, img_h_px: f64, slide_w_pt: f64, slide_h_pt: f64) -> Fit {
    let scale = (slide_w_pt / img_w_px).min(slide_h_pt / img_h_px);
    let placed_w_pt = img_w_px * scale;
    let placed_h_pt = img_h_px * scale;
    Fit {
        scale,
        offset_x_pt: (slide_w_pt - placed_w_pt) / 2.0,
        offset_y_pt: (slide_h_pt - placed_h_pt) / 2.0,
        placed_w_pt,
        placed_h_pt,
    }
}

/// Convert a pixel-space bounding box to slide coordinates (x, y, w, h in pt).
pub fn bbox_px_to_pt(bbox: &BBox, fit: &Fit) -> (f64, f64, f64, f64) {
    (
        fit.offset_x_pt + bbox.x * fit.scale,
        fit.offset_y_pt + bbox.y * fit.scale,
        bbox.w * fit.scale,
        bbox.h * fit.scale,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_image_is_letterboxed_vertically() {
        // 2000x1000 px onto a 720x405 pt page: width-bound.
        let fit = compute_fit(2000.0, 1000.0, 720.0, 405.0);
        assert!((fit.scale - 0.36).abs() < 1e-9);
        assert!((fit.placed_w_pt - 720.0).abs() < 1e-9);
        assert!((fit.offset_x_pt - 0.0).abs() < 1e-9);
        assert!(fit.offset_y_pt > 0.0);
    }

    #[test]
    fn tall_image_is_pillarboxed_horizontally() {
        let fit = compute_fit(500.0, 1000.0, 720.0, 405.0);
        assert!((fit.placed_h_pt - 405.0).abs() < 1e-9);
        assert!(fit.offset_x_pt > 0.0);
        assert!((fit.offset_y_pt - 0.0).abs() < 1e-9);
    }

    #[test]
    fn bbox_transform_applies_scale_and_offset() {
        let fit = compute_fit(1000.0, 1000.0, 720.0, 405.0);
        let bbox = BBox { x: 100.0, y: 200.0, w: 300.0, h: 50.0 };
        let (x, y, w, h) = bbox_px_to_pt(&bbox, &fit);
        assert!((x - (fit.offset_x_pt + 100.0 * fit.scale)).abs() < 1e-9);
        assert!((y - (fit.offset_y_pt + 200.0 * fit.scale)).abs() < 1e-9);
        assert!((w - 300.0 * fit.scale).abs() < 1e-9);
        assert!((h - 50.0 * fit.scale).abs() < 1e-9);
    }
}
