//! Layout model produced by image analysis, plus the cleanup pass.
//!
//! Raw layouts come back from the analysis provider with ragged text,
//! out-of-bounds boxes and degenerate regions; [`clean`] normalizes them
//! before any slide building happens.

use serde::{Deserialize, Serialize};

/// Bounding box in source-image pixel coordinates.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BBox {
    pub fn area(&self) -> f64 {
        self.w * self.h
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Clamp the box into `[0, width] x [0, height]`.
    pub fn clamp_to(&self, width: f64, height: f64) -> BBox {
        let x = self.x.clamp(0.0, width);
        let y = self.y.clamp(0.0, height);
        let w = self.w.min(width - x).max(0.0);
        let h = self.h.min(height - y).max(0.0);
        BBox { x, y, w, h }
    }
}

/// Text styling hints for a region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextStyle {
    pub font_family: Option<String>,
    pub font_size_pt: Option<f64>,
    pub bold: Option<bool>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    Text,
    Image,
}

/// A detected region in the source infographic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    /// Reading order assigned by the analysis provider.
    pub order: u32,
    pub kind: RegionKind,
    pub bbox: BBox,
    pub text: Option<String>,
    pub style: Option<TextStyle>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

/// Source image dimensions in pixels.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: f64,
    pub height: f64,
}

/// Structured layout of one source image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub image_px: ImageSize,
    pub regions: Vec<Region>,
}

impl Layout {
    pub fn new(width: f64, height: f64, regions: Vec<Region>) -> Self {
        Self {
            image_px: ImageSize { width, height },
            regions,
        }
    }
}

/// Trim leading/trailing whitespace from all text regions.
pub fn trim_whitespace(mut layout: Layout) -> Layout {
    for r in &mut layout.regions {
        if r.kind == RegionKind::Text {
            if let Some(text) = &r.text {
                r.text = Some(text.trim().to_string());
            }
        }
    }
    layout
}

/// Collapse runs of spaces in text regions to a single space.
pub fn normalize_spaces(mut layout: Layout) -> Layout {
    for r in &mut layout.regions {
        if r.kind == RegionKind::Text {
            if let Some(text) = &r.text {
                let mut out = String::with_capacity(text.len());
                let mut prev_space = false;
                for ch in text.chars() {
                    if ch == ' ' {
                        if !prev_space {
                            out.push(ch);
                        }
                        prev_space = true;
                    } else {
                        out.push(ch);
                        prev_space = false;
                    }
                }
                r.text = Some(out);
            }
        }
    }
    layout
}

/// Remove text regions with empty or whitespace-only text.
pub fn drop_empty_regions(mut layout: Layout) -> Layout {
    layout.regions.retain(|r| {
        if r.kind != RegionKind::Text {
            return true;
        }
        r.text
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    });
    layout
}

/// Ensure all bounding boxes stay within the image bounds.
pub fn clamp_to_bounds(mut layout: Layout) -> Layout {
    let (w, h) = (layout.image_px.width, layout.image_px.height);
    for r in &mut layout.regions {
        r.bbox = r.bbox.clamp_to(w, h);
    }
    layout
}

/// Sort regions by reading order (order field, then y, then x).
pub fn sort_by_reading_order(mut layout: Layout) -> Layout {
    layout.regions.sort_by(|a, b| {
        a.order
            .cmp(&b.order)
            .then(a.bbox.y.total_cmp(&b.bbox.y))
            .then(a.bbox.x.total_cmp(&b.bbox.x))
    });
    layout
}

/// Expand regions smaller than the minimum usable size.
pub fn enforce_minimum_size(mut layout: Layout, min_w: f64, min_h: f64) -> Layout {
    for r in &mut layout.regions {
        r.bbox.w = r.bbox.w.max(min_w);
        r.bbox.h = r.bbox.h.max(min_h);
    }
    layout
}

/// Apply the full standard cleanup pass.
pub fn clean(layout: Layout) -> Layout {
    let layout = trim_whitespace(layout);
    let layout = normalize_spaces(layout);
    let layout = drop_empty_regions(layout);
    let layout = clamp_to_bounds(layout);
    let layout = sort_by_reading_order(layout);
    enforce_minimum_size(layout, 10.0, 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn text_region(id: &str, order: u32, text: &str, bbox: BBox) -> Region {
        Region {
            id: id.to_string(),
            order,
            kind: RegionKind::Text,
            bbox,
            text: Some(text.to_string()),
            style: None,
            confidence: 1.0,
        }
    }

    #[test]
    fn cleanup_trims_and_collapses_text() {
        let layout = Layout::new(
            1000.0,
            800.0,
            vec![text_region(
                "r1",
                0,
                "  Hello   world  ",
                BBox { x: 10.0, y: 10.0, w: 100.0, h: 40.0 },
            )],
        );
        let cleaned = clean(layout);
        assert_eq!(cleaned.regions[0].text.as_deref(), Some("Hello world"));
    }

    #[test]
    fn cleanup_drops_empty_text_regions() {
        let layout = Layout::new(
            1000.0,
            800.0,
            vec![
                text_region("keep", 0, "content", BBox { x: 0.0, y: 0.0, w: 50.0, h: 20.0 }),
                text_region("drop", 1, "   ", BBox { x: 0.0, y: 30.0, w: 50.0, h: 20.0 }),
            ],
        );
        let cleaned = clean(layout);
        assert_eq!(cleaned.regions.len(), 1);
        assert_eq!(cleaned.regions[0].id, "keep");
    }

    #[test]
    fn cleanup_keeps_image_regions_without_text() {
        let layout = Layout::new(
            1000.0,
            800.0,
            vec![Region {
                id: "img".to_string(),
                order: 0,
                kind: RegionKind::Image,
                bbox: BBox { x: 0.0, y: 0.0, w: 200.0, h: 200.0 },
                text: None,
                style: None,
                confidence: 0.9,
            }],
        );
        assert_eq!(clean(layout).regions.len(), 1);
    }

    #[test]
    fn regions_sort_by_order_then_position() {
        let layout = Layout::new(
            1000.0,
            800.0,
            vec![
                text_region("b", 1, "second", BBox { x: 0.0, y: 0.0, w: 50.0, h: 20.0 }),
                text_region("c", 1, "third", BBox { x: 0.0, y: 100.0, w: 50.0, h: 20.0 }),
                text_region("a", 0, "first", BBox { x: 0.0, y: 500.0, w: 50.0, h: 20.0 }),
            ],
        );
        let sorted = sort_by_reading_order(layout);
        let ids: Vec<&str> = sorted.regions.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn minimum_size_is_enforced() {
        let layout = Layout::new(
            1000.0,
            800.0,
            vec![text_region("tiny", 0, "x", BBox { x: 5.0, y: 5.0, w: 2.0, h: 3.0 })],
        );
        let cleaned = clean(layout);
        assert!(cleaned.regions[0].bbox.w >= 10.0);
        assert!(cleaned.regions[0].bbox.h >= 10.0);
    }

    proptest! {
        #[test]
        fn clamping_always_lands_inside_the_image(
            x in -500.0f64..2000.0,
            y in -500.0f64..2000.0,
            w in 0.0f64..2000.0,
            h in 0.0f64..2000.0,
        ) {
            let clamped = BBox { x, y, w, h }.clamp_to(1000.0, 800.0);
            prop_assert!(clamped.x >= 0.0 && clamped.x <= 1000.0);
            prop_assert!(clamped.y >= 0.0 && clamped.y <= 800.0);
            prop_assert!(clamped.w >= 0.0 && clamped.x + clamped.w <= 1000.0 + 1e-9);
            prop_assert!(clamped.h >= 0.0 && clamped.y + clamped.h <= 800.0 + 1e-9);
        }
    }
}
