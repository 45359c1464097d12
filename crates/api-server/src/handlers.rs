//! HTTP request handlers for API endpoints

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use base64::Engine as _;
use image::RgbImage;
use tracing::{error, info, warn};

use screen_parse_common::{ParseError, ParseResult};
use screen_parse_orchestrator::{parse_image, ParseConfig};

use crate::{ApiState, ErrorResponse, HealthResponse, ProcessImageResponse};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Health check endpoint; reports whether the models loaded at startup.
pub async fn health_check(State(state): State<ApiState>) -> impl IntoResponse {
    let models_loaded = state.registry.is_some();
    let status = if models_loaded {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if models_loaded {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            },
            models_loaded,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Parse an uploaded screenshot into a labeled element list.
///
/// Multipart parts: required `file` (image bytes) and optional form fields
/// `box_threshold`, `iou_threshold`, `use_onnx_ocr`, `imgsz`,
/// `output_ratio_coordinates`, `draw_overlay` overriding the server
/// defaults for this request only.
pub async fn process_image(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> Result<Json<ProcessImageResponse>, ApiError> {
    let Some(registry) = state.registry.clone() else {
        warn!("process_image called while models are not loaded");
        return Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "models not loaded, service unavailable",
        ));
    };

    let mut config = state.defaults.clone();
    let mut image_bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            &format!("invalid multipart payload: {e}"),
        )
    })? {
        let name = field.name().unwrap_or_default().to_string();

        if name == "file" {
            let bytes = field.bytes().await.map_err(|e| {
                error_response(
                    StatusCode::BAD_REQUEST,
                    &format!("failed to read uploaded file: {e}"),
                )
            })?;
            image_bytes = Some(bytes.to_vec());
        } else {
            let value = field.text().await.map_err(|e| {
                error_response(
                    StatusCode::BAD_REQUEST,
                    &format!("failed to read form field '{name}': {e}"),
                )
            })?;
            apply_parameter(&mut config, &name, value.trim())
                .map_err(|message| error_response(StatusCode::BAD_REQUEST, &message))?;
        }
    }

    let Some(image_bytes) = image_bytes else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "missing 'file' part in the request",
        ));
    };

    info!(
        "Processing {} byte upload (box_threshold={}, iou_threshold={}, use_onnx_ocr={}, imgsz={})",
        image_bytes.len(),
        config.box_threshold,
        config.iou_threshold,
        config.use_onnx_ocr,
        config.inference_size
    );

    // The pipeline is synchronous CPU/inference work; keep it off the
    // async workers.
    let result = tokio::task::spawn_blocking(move || {
        let image = image::load_from_memory(&image_bytes)
            .map_err(|e| ParseError::Decode(e.to_string()))?
            .to_rgb8();
        parse_image(&registry, &image, &config)
    })
    .await
    .map_err(|e| {
        error!("Pipeline task failed to run: {e}");
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal processing failure",
        )
    })?;

    match result {
        Ok(parse_result) => Ok(Json(to_response(parse_result)?)),
        Err(err) => Err(parse_error_response(err)),
    }
}

/// Apply one form field onto the per-request config.
fn apply_parameter(config: &mut ParseConfig, name: &str, value: &str) -> Result<(), String> {
    match name {
        "box_threshold" => config.box_threshold = parse_number(name, value)?,
        "iou_threshold" => config.iou_threshold = parse_number(name, value)?,
        "imgsz" => {
            config.inference_size = value
                .parse()
                .map_err(|_| format!("invalid value for imgsz: '{value}'"))?;
        }
        "use_onnx_ocr" => config.use_onnx_ocr = parse_bool(name, value)?,
        "output_ratio_coordinates" => {
            config.output_ratio_coordinates = parse_bool(name, value)?;
        }
        "draw_overlay" => config.draw_overlay = parse_bool(name, value)?,
        other => warn!("Ignoring unknown form field '{}'", other),
    }
    Ok(())
}

fn parse_number(name: &str, value: &str) -> Result<f32, String> {
    value
        .parse()
        .map_err(|_| format!("invalid value for {name}: '{value}'"))
}

fn parse_bool(name: &str, value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(format!("invalid value for {name}: '{value}'")),
    }
}

fn to_response(result: ParseResult) -> Result<ProcessImageResponse, ApiError> {
    let parsed_content = result.parsed_content();
    let overlay_image = match &result.overlay {
        Some(overlay) => Some(encode_png_base64(overlay).map_err(|e| {
            error!("Overlay encoding failed: {e}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to encode overlay image",
            )
        })?),
        None => None,
    };

    Ok(ProcessImageResponse {
        parsed_content,
        elements: result.elements,
        label_to_id: result.label_to_id,
        overlay_image,
    })
}

fn encode_png_base64(image: &RgbImage) -> Result<String, image::ImageError> {
    let mut png = std::io::Cursor::new(Vec::new());
    image.write_to(&mut png, image::ImageFormat::Png)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(png.into_inner()))
}

fn parse_error_response(err: ParseError) -> ApiError {
    let status = match &err {
        ParseError::Decode(_) | ParseError::Configuration(_) => StatusCode::BAD_REQUEST,
        ParseError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ParseError::Recognition(_) | ParseError::Detection(_) | ParseError::Captioning(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    error!("Image processing failed: {err}");
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

fn error_response(status: StatusCode, message: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}
