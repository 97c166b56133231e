use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Axis-aligned person bounding box in pixel coordinates.
///
/// Stored as TLWH (top-left x, top-left y, width, height). Detectors usually
/// report TLBR corners, so [`Rect::from_tlbr`] is the common constructor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Top-left x coordinate
    pub x: f32,
    /// Top-left y coordinate
    pub y: f32,
    /// Width of the bounding box
    pub width: f32,
    /// Height of the bounding box
    pub height: f32,
}

impl Rect {
    /// Create a new Rect from top-left coordinates and dimensions (TLWH format).
    #[inline]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a Rect from TLBR format (top-left x, top-left y, bottom-right x, bottom-right y).
    #[inline]
    pub fn from_tlbr(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }

    /// Convert to TLBR format: (x1, y1, x2, y2).
    #[inline]
    pub fn to_tlbr(&self) -> [f32; 4] {
        [self.x, self.y, self.x + self.width, self.y + self.height]
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// True when the box covers no pixels.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Clip the box to a `frame_width` x `frame_height` image.
    ///
    /// Boxes entirely outside the frame collapse to an empty rect.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Rect {
        let [x1, y1, x2, y2] = self.to_tlbr();
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let x1 = x1.clamp(0.0, fw);
        let y1 = y1.clamp(0.0, fh);
        let x2 = x2.clamp(0.0, fw);
        let y2 = y2.clamp(0.0, fh);
        Rect::from_tlbr(x1, y1, x2.max(x1), y2.max(y1))
    }

    /// Intersection over Union with another bounding box.
    pub fn iou(&self, other: &Rect) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }
}

/// IoU matrix of shape (M, N) between `boxes_a` (rows) and `boxes_b` (columns).
pub fn iou_batch(boxes_a: &[Rect], boxes_b: &[Rect]) -> Array2<f32> {
    let mut ious = Array2::zeros((boxes_a.len(), boxes_b.len()));
    for (i, a) in boxes_a.iter().enumerate() {
        for (j, b) in boxes_b.iter().enumerate() {
            ious[[i, j]] = a.iou(b);
        }
    }
    ious
}
