//! Axis-aligned bounding boxes in pixel or ratio space.

use serde::{Deserialize, Serialize};

/// Axis-aligned box stored as `(x1, y1, x2, y2)` corners.
///
/// Coordinates are either absolute pixels or `[0, 1]` ratios of the image
/// dimensions; a single pipeline run never mixes the two. The constructor
/// enforces `x1 <= x2` and `y1 <= y2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Create a box, swapping corners if they arrive out of order.
    #[must_use]
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    #[must_use]
    #[inline]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Area shared with another box, zero when disjoint.
    #[must_use]
    #[inline]
    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        w * h
    }

    /// Intersection over union.
    #[must_use]
    #[inline]
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Intersection over the smaller of the two areas.
    ///
    /// Approaches 1.0 when one box mostly encloses the other, whichever way
    /// around, which plain IoU underreports for nested boxes.
    #[must_use]
    #[inline]
    pub fn intersection_over_smaller(&self, other: &BoundingBox) -> f32 {
        let smaller = self.area().min(other.area());
        if smaller > 0.0 {
            self.intersection_area(other) / smaller
        } else {
            0.0
        }
    }

    /// Grow the box by `margin` pixels on every side, clamped to the image.
    #[must_use]
    pub fn padded(&self, margin: f32, img_width: u32, img_height: u32) -> Self {
        Self {
            x1: (self.x1 - margin).max(0.0),
            y1: (self.y1 - margin).max(0.0),
            x2: (self.x2 + margin).min(img_width as f32),
            y2: (self.y2 + margin).min(img_height as f32),
        }
    }

    /// Pixel box to `[0, 1]` ratios of the image dimensions.
    #[must_use]
    pub fn to_ratio(&self, img_width: u32, img_height: u32) -> Self {
        let w = img_width as f32;
        let h = img_height as f32;
        Self {
            x1: self.x1 / w,
            y1: self.y1 / h,
            x2: self.x2 / w,
            y2: self.y2 / h,
        }
    }

    /// Ratio box to absolute pixels.
    #[must_use]
    pub fn to_pixels(&self, img_width: u32, img_height: u32) -> Self {
        let w = img_width as f32;
        let h = img_height as f32;
        Self {
            x1: self.x1 * w,
            y1: self.y1 * h,
            x2: self.x2 * w,
            y2: self.y2 * h,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalizes_corners() {
        let bbox = BoundingBox::new(10.0, 20.0, 5.0, 8.0);
        assert_eq!(bbox.x1, 5.0);
        assert_eq!(bbox.y1, 8.0);
        assert_eq!(bbox.x2, 10.0);
        assert_eq!(bbox.y2, 20.0);
    }

    #[test]
    fn test_area() {
        let bbox = BoundingBox::new(0.0, 0.0, 4.0, 5.0);
        assert_eq!(bbox.area(), 20.0);
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0.0, 0.0, 50.0, 50.0);
        let b = BoundingBox::new(25.0, 25.0, 75.0, 75.0);

        // 25x25 intersection over (2500 + 2500 - 625) union
        let iou = a.iou(&b);
        assert!((iou - 625.0 / 4375.0).abs() < 1e-6);

        // Identical boxes
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);

        // Disjoint boxes
        let c = BoundingBox::new(100.0, 100.0, 120.0, 120.0);
        assert_eq!(a.iou(&c), 0.0);
    }

    #[test]
    fn test_intersection_over_smaller_for_nested_boxes() {
        let outer = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        let inner = BoundingBox::new(10.0, 10.0, 30.0, 30.0);

        // The inner box is fully contained, so the ratio is exactly 1.0
        // while IoU stays small.
        assert!((outer.intersection_over_smaller(&inner) - 1.0).abs() < 1e-6);
        assert!(outer.iou(&inner) < 0.1);
    }

    #[test]
    fn test_padded_clamps_to_image() {
        let bbox = BoundingBox::new(2.0, 2.0, 98.0, 48.0);
        let padded = bbox.padded(5.0, 100, 50);
        assert_eq!(padded.x1, 0.0);
        assert_eq!(padded.y1, 0.0);
        assert_eq!(padded.x2, 100.0);
        assert_eq!(padded.y2, 50.0);
    }

    #[test]
    fn test_ratio_round_trip() {
        let bbox = BoundingBox::new(100.0, 100.0, 200.0, 200.0);
        let ratio = bbox.to_ratio(1000, 500);
        assert!((ratio.x1 - 0.1).abs() < 1e-6);
        assert!((ratio.y1 - 0.2).abs() < 1e-6);
        assert!((ratio.x2 - 0.2).abs() < 1e-6);
        assert!((ratio.y2 - 0.4).abs() < 1e-6);

        let back = ratio.to_pixels(1000, 500);
        assert!((back.x1 - bbox.x1).abs() < 1e-3);
        assert!((back.y1 - bbox.y1).abs() < 1e-3);
        assert!((back.x2 - bbox.x2).abs() < 1e-3);
        assert!((back.y2 - bbox.y2).abs() < 1e-3);
    }
}
