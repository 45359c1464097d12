//! Element labeling - ids, text labels, and caption assignment.

use image::{imageops, RgbImage};
use tracing::debug;

use screen_parse_common::{BoundingBox, Captioner, Element, ElementKind, ParseError};

use crate::FusedRegion;

/// Pixels of context added around an icon crop before captioning.
pub const CROP_MARGIN_PX: f32 = 4.0;

/// Number the fused regions and attach labels.
///
/// Text regions keep their recognized text, trimmed of surrounding
/// whitespace; an empty label is valid and left for callers to filter.
/// Icon regions are cropped from the source image (padded by
/// [`CROP_MARGIN_PX`], clamped to the image bounds) and captioned in
/// order-preserving batches; `batch_size` of `None` submits all crops in
/// one batch. A captioner failure anywhere fails the whole call. Ids
/// enumerate the fused ordering from 0.
pub fn label_elements(
    regions: Vec<FusedRegion>,
    image: &RgbImage,
    captioner: &dyn Captioner,
    batch_size: Option<usize>,
) -> Result<Vec<Element>, ParseError> {
    let (width, height) = image.dimensions();

    let crops: Vec<RgbImage> = regions
        .iter()
        .filter(|region| region.kind == ElementKind::IconBox)
        .map(|region| crop_region(image, &region.bounds.padded(CROP_MARGIN_PX, width, height)))
        .collect();

    let captions = if crops.is_empty() {
        Vec::new()
    } else {
        let chunk = batch_size.unwrap_or(crops.len()).max(1);
        debug!(
            "Captioning {} icon crops in batches of {}",
            crops.len(),
            chunk
        );

        let mut captions = Vec::with_capacity(crops.len());
        for batch in crops.chunks(chunk) {
            let mut labels = captioner.caption_batch(batch)?;
            if labels.len() != batch.len() {
                return Err(ParseError::Captioning(format!(
                    "captioner returned {} labels for {} crops",
                    labels.len(),
                    batch.len()
                )));
            }
            captions.append(&mut labels);
        }
        captions
    };

    let mut captions = captions.into_iter();
    let mut elements = Vec::with_capacity(regions.len());
    for (id, region) in regions.into_iter().enumerate() {
        let label = match region.kind {
            ElementKind::TextBox => region.text.unwrap_or_default().trim().to_string(),
            ElementKind::IconBox => captions
                .next()
                .ok_or_else(|| {
                    ParseError::Captioning("caption stream ended before the last icon".into())
                })?
                .trim()
                .to_string(),
        };

        elements.push(Element {
            id: id as u32,
            kind: region.kind,
            bounds: region.bounds,
            label,
            score: region.score,
        });
    }

    Ok(elements)
}

/// Crop an axis-aligned pixel region, rounded outward to whole pixels.
fn crop_region(image: &RgbImage, bounds: &BoundingBox) -> RgbImage {
    let (width, height) = image.dimensions();
    let x1 = (bounds.x1.floor() as u32).min(width.saturating_sub(1));
    let y1 = (bounds.y1.floor() as u32).min(height.saturating_sub(1));
    let x2 = (bounds.x2.ceil() as u32).clamp(x1 + 1, width);
    let y2 = (bounds.y2.ceil() as u32).clamp(y1 + 1, height);

    imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuse;
    use screen_parse_common::{OcrSpan, RawDetection};
    use std::sync::Mutex;

    struct StubCaptioner {
        batch_sizes: Mutex<Vec<usize>>,
        fail: bool,
        short_by_one: bool,
    }

    impl StubCaptioner {
        fn new() -> Self {
            Self {
                batch_sizes: Mutex::new(Vec::new()),
                fail: false,
                short_by_one: false,
            }
        }
    }

    impl Captioner for StubCaptioner {
        fn caption_batch(&self, crops: &[RgbImage]) -> Result<Vec<String>, ParseError> {
            if self.fail {
                return Err(ParseError::Captioning("stub failure".into()));
            }
            self.batch_sizes.lock().unwrap().push(crops.len());
            let count = if self.short_by_one {
                crops.len() - 1
            } else {
                crops.len()
            };
            Ok((0..count).map(|i| format!(" caption {i} ")).collect())
        }
    }

    fn test_image() -> RgbImage {
        RgbImage::new(300, 300)
    }

    fn icon_region(x1: f32, score: f32) -> FusedRegion {
        FusedRegion {
            kind: ElementKind::IconBox,
            bounds: BoundingBox::new(x1, 10.0, x1 + 20.0, 30.0),
            text: None,
            score: Some(score),
        }
    }

    fn text_region(text: &str) -> FusedRegion {
        FusedRegion {
            kind: ElementKind::TextBox,
            bounds: BoundingBox::new(5.0, 5.0, 50.0, 20.0),
            text: Some(text.to_string()),
            score: None,
        }
    }

    #[test]
    fn test_ids_are_contiguous_from_zero() {
        let regions = vec![
            text_region("one"),
            text_region("two"),
            icon_region(100.0, 0.9),
            icon_region(200.0, 0.8),
        ];

        let elements =
            label_elements(regions, &test_image(), &StubCaptioner::new(), None).unwrap();

        let ids: Vec<u32> = elements.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_text_labels_are_trimmed_and_may_be_empty() {
        let regions = vec![text_region("  Submit \n"), text_region("   ")];

        let elements =
            label_elements(regions, &test_image(), &StubCaptioner::new(), None).unwrap();

        assert_eq!(elements[0].label, "Submit");
        assert_eq!(elements[1].label, "");
    }

    #[test]
    fn test_icon_labels_come_from_captioner_in_order() {
        let regions = vec![icon_region(10.0, 0.9), icon_region(100.0, 0.8)];

        let elements =
            label_elements(regions, &test_image(), &StubCaptioner::new(), None).unwrap();

        assert_eq!(elements[0].label, "caption 0");
        assert_eq!(elements[1].label, "caption 1");
        assert_eq!(elements[0].score, Some(0.9));
    }

    #[test]
    fn test_default_batching_submits_all_crops_at_once() {
        let regions = vec![
            icon_region(10.0, 0.9),
            icon_region(50.0, 0.8),
            icon_region(100.0, 0.7),
        ];
        let captioner = StubCaptioner::new();

        label_elements(regions, &test_image(), &captioner, None).unwrap();

        assert_eq!(*captioner.batch_sizes.lock().unwrap(), vec![3]);
    }

    #[test]
    fn test_explicit_batch_size_chunks_crops() {
        let regions = vec![
            icon_region(10.0, 0.9),
            icon_region(50.0, 0.8),
            icon_region(100.0, 0.7),
        ];
        let captioner = StubCaptioner::new();

        label_elements(regions, &test_image(), &captioner, Some(2)).unwrap();

        assert_eq!(*captioner.batch_sizes.lock().unwrap(), vec![2, 1]);
    }

    #[test]
    fn test_captioner_failure_fails_the_whole_call() {
        let regions = vec![text_region("kept"), icon_region(10.0, 0.9)];
        let captioner = StubCaptioner {
            fail: true,
            ..StubCaptioner::new()
        };

        let result = label_elements(regions, &test_image(), &captioner, None);
        assert!(matches!(result, Err(ParseError::Captioning(_))));
    }

    #[test]
    fn test_caption_cardinality_mismatch_is_an_error() {
        let regions = vec![icon_region(10.0, 0.9), icon_region(50.0, 0.8)];
        let captioner = StubCaptioner {
            short_by_one: true,
            ..StubCaptioner::new()
        };

        let result = label_elements(regions, &test_image(), &captioner, None);
        assert!(matches!(result, Err(ParseError::Captioning(_))));
    }

    #[test]
    fn test_no_captioner_call_without_icons() {
        let regions = vec![text_region("only text")];
        let captioner = StubCaptioner::new();

        label_elements(regions, &test_image(), &captioner, None).unwrap();

        assert!(captioner.batch_sizes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_crop_region_clamps_to_image_bounds() {
        let image = test_image();
        let crop = crop_region(&image, &BoundingBox::new(290.0, 290.0, 400.0, 400.0));
        assert_eq!(crop.dimensions(), (10, 10));
    }

    #[test]
    fn test_fused_scenario_single_text_box() {
        // End-to-end over fuse + label: the overlapping detection disappears
        // and the surviving text box is element 0.
        let text = vec![OcrSpan {
            bounds: BoundingBox::new(10.0, 10.0, 100.0, 30.0),
            text: "Submit".to_string(),
            confidence: None,
        }];
        let icons = vec![RawDetection {
            bounds: BoundingBox::new(12.0, 12.0, 98.0, 28.0),
            score: 0.9,
        }];

        let fused = fuse(&text, &icons, 0.1);
        let elements =
            label_elements(fused, &test_image(), &StubCaptioner::new(), None).unwrap();

        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].id, 0);
        assert_eq!(elements[0].kind, ElementKind::TextBox);
        assert_eq!(elements[0].label, "Submit");
    }
}
