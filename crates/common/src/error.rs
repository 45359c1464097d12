//! Pipeline error type, tagged by the stage that failed.

use thiserror::Error;

/// Errors surfaced by the parsing pipeline.
///
/// Collaborator failures are not retried and never produce partial output;
/// each variant names the stage so callers can log and report without
/// unwinding semantics.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The uploaded bytes are not a decodable raster image.
    #[error("Image decode failed: {0}")]
    Decode(String),

    /// The text recognition engine failed.
    #[error("Text recognition failed: {0}")]
    Recognition(String),

    /// The icon detector failed.
    #[error("Icon detection failed: {0}")]
    Detection(String),

    /// The captioning model failed.
    #[error("Icon captioning failed: {0}")]
    Captioning(String),

    /// A threshold or size parameter is out of range.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// An operation was invoked before its model was loaded.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, ParseError>;
