//! API Server Binary Entry Point

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use screen_parse_api_server::{start_server, ApiState};
use screen_parse_orchestrator::{ModelRegistry, ParseConfig, RegistryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "screen_parse_api_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("SCREEN_PARSE_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let defaults = defaults_from_env();

    // A failed load leaves the service answering 503 instead of aborting,
    // so health checks can observe the failure.
    let registry = match ModelRegistry::load(&RegistryConfig::from_env()) {
        Ok(registry) => Some(Arc::new(registry)),
        Err(e) => {
            tracing::error!("Model loading failed, service starts unhealthy: {e}");
            None
        }
    };

    let state = ApiState::new(registry, defaults);

    tracing::info!("Starting screen parsing service");
    start_server(&addr, state).await?;

    Ok(())
}

/// Pipeline defaults from the environment, falling back to the built-ins.
///
/// Recognized variables: `BOX_THRESHOLD`, `IOU_THRESHOLD`, `USE_ONNX_OCR`,
/// `IMGSZ`.
fn defaults_from_env() -> ParseConfig {
    let mut config = ParseConfig::default();

    if let Some(value) = env_parse("BOX_THRESHOLD") {
        config.box_threshold = value;
    }
    if let Some(value) = env_parse("IOU_THRESHOLD") {
        config.iou_threshold = value;
    }
    if let Some(value) = env_parse("IMGSZ") {
        config.inference_size = value;
    }
    if let Ok(value) = std::env::var("USE_ONNX_OCR") {
        let value = value.trim();
        config.use_onnx_ocr = value.eq_ignore_ascii_case("true") || value == "1";
    }

    config
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
