//! Element and result types exchanged between pipeline stages.

use std::collections::HashMap;
use std::fmt;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::BoundingBox;

/// Kind of interactive region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    /// A region whose label comes from recognized text.
    TextBox,
    /// A detector hit whose label comes from the captioning model.
    IconBox,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::TextBox => write!(f, "Text Box"),
            ElementKind::IconBox => write!(f, "Icon Box"),
        }
    }
}

/// One recognized text region, pre-fusion, in source pixel space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrSpan {
    pub bounds: BoundingBox,
    pub text: String,
    /// Recognition confidence in `[0, 1]`, when the engine reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// One icon detection, post-NMS, in source pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub bounds: BoundingBox,
    pub score: f32,
}

/// A labeled interactive element, the unit of the final output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// Position in the fused ordering: text elements first, then icons.
    pub id: u32,
    pub kind: ElementKind,
    pub bounds: BoundingBox,
    /// Recognized text for a text box, generated caption for an icon box.
    pub label: String,
    /// Detector or recognizer confidence, absent when the engine has none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl Element {
    /// One line of the parsed-content listing, e.g. `Text Box ID 0: Submit`.
    #[must_use]
    pub fn listing_line(&self) -> String {
        format!("{} ID {}: {}", self.kind, self.id, self.label)
    }
}

/// Output of one pipeline run.
#[derive(Debug, Clone)]
pub struct ParseResult {
    /// Elements in id order.
    pub elements: Vec<Element>,
    /// Annotated copy of the input, present when drawing was requested.
    pub overlay: Option<RgbImage>,
    /// Label to element id, for labels occurring exactly once in this run.
    pub label_to_id: HashMap<String, u32>,
}

impl ParseResult {
    /// Build the result and index the labels that are unique within the run.
    #[must_use]
    pub fn new(elements: Vec<Element>, overlay: Option<RgbImage>) -> Self {
        let mut counts: HashMap<&str, u32> = HashMap::with_capacity(elements.len());
        for element in &elements {
            *counts.entry(element.label.as_str()).or_insert(0) += 1;
        }

        let label_to_id = elements
            .iter()
            .filter(|e| counts[e.label.as_str()] == 1)
            .map(|e| (e.label.clone(), e.id))
            .collect();

        Self {
            elements,
            overlay,
            label_to_id,
        }
    }

    /// Newline-joined `"<kind> ID <id>: <label>"` listing of all elements.
    #[must_use]
    pub fn parsed_content(&self) -> String {
        self.elements
            .iter()
            .map(Element::listing_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(id: u32, kind: ElementKind, label: &str) -> Element {
        Element {
            id,
            kind,
            bounds: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            label: label.to_string(),
            score: None,
        }
    }

    #[test]
    fn test_listing_line_format() {
        let text = element(0, ElementKind::TextBox, "Submit");
        assert_eq!(text.listing_line(), "Text Box ID 0: Submit");

        let icon = element(3, ElementKind::IconBox, "a settings gear");
        assert_eq!(icon.listing_line(), "Icon Box ID 3: a settings gear");
    }

    #[test]
    fn test_parsed_content_joins_with_newlines() {
        let result = ParseResult::new(
            vec![
                element(0, ElementKind::TextBox, "Submit"),
                element(1, ElementKind::IconBox, "a magnifying glass"),
            ],
            None,
        );
        assert_eq!(
            result.parsed_content(),
            "Text Box ID 0: Submit\nIcon Box ID 1: a magnifying glass"
        );
    }

    #[test]
    fn test_label_to_id_only_indexes_unique_labels() {
        let result = ParseResult::new(
            vec![
                element(0, ElementKind::TextBox, "OK"),
                element(1, ElementKind::TextBox, "OK"),
                element(2, ElementKind::TextBox, "Cancel"),
            ],
            None,
        );
        assert_eq!(result.label_to_id.len(), 1);
        assert_eq!(result.label_to_id.get("Cancel"), Some(&2));
    }

    #[test]
    fn test_empty_result() {
        let result = ParseResult::new(Vec::new(), None);
        assert!(result.is_empty());
        assert_eq!(result.parsed_content(), "");
        assert!(result.label_to_id.is_empty());
    }

    #[test]
    fn test_element_serialization_skips_missing_score() {
        let text = element(0, ElementKind::TextBox, "Submit");
        let json = serde_json::to_string(&text).unwrap();
        assert!(!json.contains("score"));

        let icon = Element {
            score: Some(0.9),
            ..element(1, ElementKind::IconBox, "icon")
        };
        let json = serde_json::to_string(&icon).unwrap();
        assert!(json.contains("\"score\":0.9"));
    }
}
