//! Overlay rendering - numbered element boxes for human inspection
//!
//! Draws each element's bounding box and id onto a copy of the source
//! screenshot. Stroke thickness and label size scale with the image width
//! so annotations stay legible from thumbnails to 4K captures. The label
//! font is a filesystem asset loaded once at startup, like the models; a
//! renderer built without one draws rectangles only.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{debug, info};

use screen_parse_common::{Element, ElementKind};

/// Reference width the stroke/label scaling is calibrated against.
const REFERENCE_WIDTH: f32 = 3200.0;

const TEXT_BOX_COLOR: Rgb<u8> = Rgb([66, 135, 245]);
const ICON_BOX_COLOR: Rgb<u8> = Rgb([244, 67, 54]);
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Errors from overlay rendering.
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("Failed to load overlay font: {0}")]
    FontLoad(String),
}

impl From<OverlayError> for screen_parse_common::ParseError {
    fn from(err: OverlayError) -> Self {
        screen_parse_common::ParseError::Configuration(err.to_string())
    }
}

/// Draws numbered element boxes onto screenshots.
pub struct OverlayRenderer {
    font: Option<FontVec>,
}

impl OverlayRenderer {
    /// Load the label font from a TTF/OTF file on disk.
    pub fn new<P: AsRef<Path>>(font_path: P) -> Result<Self, OverlayError> {
        let font_path = font_path.as_ref();
        let bytes = std::fs::read(font_path).map_err(|e| {
            OverlayError::FontLoad(format!("failed to read {}: {e}", font_path.display()))
        })?;
        let font = FontVec::try_from_vec(bytes).map_err(|e| {
            OverlayError::FontLoad(format!("{} is not a usable font: {e}", font_path.display()))
        })?;

        info!("Overlay font loaded from {:?}", font_path);
        Ok(Self { font: Some(font) })
    }

    /// Renderer that draws boxes without id labels.
    #[must_use]
    pub fn without_labels() -> Self {
        Self { font: None }
    }

    /// Draw all elements onto a copy of `image`.
    ///
    /// Element bounds must be in source pixel space; boxes partially outside
    /// the image are clamped.
    #[must_use]
    pub fn render(&self, image: &RgbImage, elements: &[Element]) -> RgbImage {
        let mut canvas = image.clone();
        let (width, height) = canvas.dimensions();
        if width == 0 || height == 0 {
            return canvas;
        }

        let ratio = width as f32 / REFERENCE_WIDTH;
        let thickness = ((3.0 * ratio).round() as i32).max(1);
        let label_height = (32.0 * ratio).max(12.0);
        let scale = PxScale::from(label_height);

        debug!(
            "Rendering {} element boxes (thickness {}, label height {:.0})",
            elements.len(),
            thickness,
            label_height
        );

        for element in elements {
            let color = match element.kind {
                ElementKind::TextBox => TEXT_BOX_COLOR,
                ElementKind::IconBox => ICON_BOX_COLOR,
            };

            let x = (element.bounds.x1.round() as i32).clamp(0, width as i32 - 1);
            let y = (element.bounds.y1.round() as i32).clamp(0, height as i32 - 1);
            let w = (element.bounds.x2.round() as i32).clamp(x + 1, width as i32) - x;
            let h = (element.bounds.y2.round() as i32).clamp(y + 1, height as i32) - y;

            for inset in 0..thickness {
                let rw = w - 2 * inset;
                let rh = h - 2 * inset;
                if rw < 1 || rh < 1 {
                    break;
                }
                draw_hollow_rect_mut(
                    &mut canvas,
                    Rect::at(x + inset, y + inset).of_size(rw as u32, rh as u32),
                    color,
                );
            }

            if let Some(font) = &self.font {
                let label = element.id.to_string();

                // Badge above the top-left corner, pulled inside when the
                // box touches the image edge.
                let badge_w = (label.len() as f32 * label_height * 0.6) as i32 + 4;
                let badge_h = label_height as i32 + 2;
                let badge_x = x.min(width as i32 - badge_w).max(0);
                let badge_y = (y - badge_h).max(0);

                draw_filled_rect_mut(
                    &mut canvas,
                    Rect::at(badge_x, badge_y).of_size(badge_w as u32, badge_h as u32),
                    color,
                );
                draw_text_mut(
                    &mut canvas,
                    LABEL_TEXT_COLOR,
                    badge_x + 2,
                    badge_y + 1,
                    scale,
                    font,
                    &label,
                );
            }
        }

        canvas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screen_parse_common::BoundingBox;

    fn element(id: u32, kind: ElementKind, x1: f32, y1: f32, x2: f32, y2: f32) -> Element {
        Element {
            id,
            kind,
            bounds: BoundingBox::new(x1, y1, x2, y2),
            label: String::new(),
            score: None,
        }
    }

    #[test]
    fn test_render_keeps_input_dimensions() {
        let image = RgbImage::new(200, 100);
        let renderer = OverlayRenderer::without_labels();

        let out = renderer.render(
            &image,
            &[element(0, ElementKind::TextBox, 10.0, 10.0, 50.0, 40.0)],
        );
        assert_eq!(out.dimensions(), (200, 100));
    }

    #[test]
    fn test_render_draws_box_edges_in_kind_color() {
        let image = RgbImage::new(200, 100);
        let renderer = OverlayRenderer::without_labels();

        let out = renderer.render(
            &image,
            &[
                element(0, ElementKind::TextBox, 10.0, 10.0, 50.0, 40.0),
                element(1, ElementKind::IconBox, 100.0, 10.0, 150.0, 40.0),
            ],
        );

        assert_eq!(*out.get_pixel(10, 10), TEXT_BOX_COLOR);
        assert_eq!(*out.get_pixel(100, 10), ICON_BOX_COLOR);
        // Interior untouched.
        assert_eq!(*out.get_pixel(30, 25), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_render_clamps_out_of_bounds_boxes() {
        let image = RgbImage::new(100, 100);
        let renderer = OverlayRenderer::without_labels();

        // Must not panic on boxes hanging off the image.
        let out = renderer.render(
            &image,
            &[element(0, ElementKind::IconBox, -20.0, -20.0, 150.0, 150.0)],
        );
        assert_eq!(out.dimensions(), (100, 100));
    }

    #[test]
    fn test_render_with_no_elements_is_a_plain_copy() {
        let image = RgbImage::from_pixel(50, 50, Rgb([7, 7, 7]));
        let renderer = OverlayRenderer::without_labels();

        let out = renderer.render(&image, &[]);
        assert_eq!(out, image);
    }

    #[test]
    fn test_missing_font_file_is_an_error() {
        let result = OverlayRenderer::new("/nonexistent/font.ttf");
        assert!(matches!(result, Err(OverlayError::FontLoad(_))));
    }
}
