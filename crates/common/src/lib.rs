//! Shared data model for the screen parsing pipeline
//!
//! Bounding geometry, the element and result types every stage exchanges,
//! the pipeline error enum, and the collaborator traits the model crates
//! implement.

mod element;
mod error;
mod geometry;
mod traits;

pub use element::{Element, ElementKind, OcrSpan, ParseResult, RawDetection};
pub use error::{ParseError, Result};
pub use geometry::BoundingBox;
pub use traits::{
    Captioner, IconDetectionOptions, IconDetector, TextEngine, TextRecognitionOptions,
};
