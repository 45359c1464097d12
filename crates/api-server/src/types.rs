//! API request and response types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use screen_parse_common::Element;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" or "unhealthy".
    pub status: String,
    /// Whether the model registry loaded at startup.
    pub models_loaded: bool,
    /// Crate version.
    pub version: String,
}

/// Successful parse response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessImageResponse {
    /// Newline-joined `"<kind> ID <id>: <label>"` listing.
    pub parsed_content: String,
    /// Structured element list in id order.
    pub elements: Vec<Element>,
    /// Label to element id, for labels unique within this response.
    pub label_to_id: HashMap<String, u32>,
    /// Base64-encoded PNG overlay, present when drawing was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_image: Option<String>,
}

/// Error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
