//! Route handlers for the upload, URL and file modes

use super::{error::ApiError, AppState};
use crate::{
    error::{BgRemovalError, Result},
    models::ModelInfo,
    remover::run_pipeline,
    services::{derive_output_path, ImageSource, OutputStrategy},
    types::{PngEncode, ProcessingTimings, RemovalResult},
};
use axum::{
    extract::{multipart::Multipart, rejection::JsonRejection, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Body of `POST /api/text`
#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    pub url: String,
}

/// Success envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: String,
    pub request_id: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Original and transparent images as base64 PNG
#[derive(Debug, Serialize)]
pub struct ComparisonPayload {
    pub original: String,
    pub transparent: String,
    pub width: u32,
    pub height: u32,
    pub timings: ProcessingTimings,
}

/// Encodes both images of the comparison pair for JSON transport
#[derive(Debug, Clone, Copy)]
pub struct Base64Pair;

impl OutputStrategy for Base64Pair {
    type Output = ComparisonPayload;

    fn emit(&self, result: RemovalResult) -> Result<ComparisonPayload> {
        let (width, height) = result.dimensions();
        Ok(ComparisonPayload {
            original: STANDARD.encode(result.original.encode_png()?),
            transparent: STANDARD.encode(result.transparent.encode_png()?),
            width,
            height,
            timings: result.timings,
        })
    }
}

/// Encodes the transparent image as a PNG body
#[derive(Debug, Clone, Copy)]
pub struct PngBytes;

impl OutputStrategy for PngBytes {
    type Output = Vec<u8>;

    fn emit(&self, result: RemovalResult) -> Result<Vec<u8>> {
        result.to_png_bytes()
    }
}

/// Run the pipeline on the blocking pool, one request at a time
async fn run_blocking<S>(state: &AppState, image: RgbImage, strategy: S) -> std::result::Result<S::Output, ApiError>
where
    S: OutputStrategy + Send + 'static,
    S::Output: Send + 'static,
{
    let processor = Arc::clone(&state.processor);
    let output = tokio::task::spawn_blocking(move || {
        let mut processor = processor
            .lock()
            .map_err(|_| BgRemovalError::internal("Processor lock poisoned"))?;
        run_pipeline(&mut processor, &image, &strategy)
    })
    .await
    .map_err(|e| ApiError::internal(format!("Processing task failed: {e}")))??;
    Ok(output)
}

/// Read the `file` field of a multipart form
async fn read_file_field(
    multipart: &mut Multipart,
) -> std::result::Result<(Vec<u8>, Option<String>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read multipart field: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read file data: {e}")))?;
        if data.is_empty() {
            return Err(ApiError::bad_request("Empty file"));
        }

        tracing::debug!(bytes = data.len(), file_name = ?file_name, "Received upload");
        return Ok((data.to_vec(), file_name));
    }

    Err(ApiError::bad_request("Missing multipart field 'file'"))
}

/// `POST /api/image`: multipart upload, comparison pair back
pub async fn image_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> std::result::Result<Json<ApiResponse<ComparisonPayload>>, ApiError> {
    let (bytes, _) = read_file_field(&mut multipart).await?;
    let image = state.loader.load(ImageSource::Bytes(bytes)).await?;
    let payload = run_blocking(&state, image, Base64Pair).await?;
    Ok(Json(ApiResponse::success(payload)))
}

/// `POST /api/text`: image URL, comparison pair back
pub async fn text_handler(
    State(state): State<AppState>,
    request: std::result::Result<Json<UrlRequest>, JsonRejection>,
) -> std::result::Result<Json<ApiResponse<ComparisonPayload>>, ApiError> {
    let Json(request) = request.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let url = request.url.trim();
    if url.is_empty() {
        return Err(ApiError::bad_request("Empty URL"));
    }

    tracing::info!(url = %url, "Processing image URL");
    // Always a URL: never let a request name a server-side path
    let image = state.loader.load(ImageSource::Url(url.to_string())).await?;
    let payload = run_blocking(&state, image, Base64Pair).await?;
    Ok(Json(ApiResponse::success(payload)))
}

/// `POST /api/png`: multipart upload, transparent PNG back as a download
pub async fn png_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> std::result::Result<Response, ApiError> {
    let (bytes, file_name) = read_file_field(&mut multipart).await?;
    let image = state.loader.load(ImageSource::Bytes(bytes)).await?;
    let png = run_blocking(&state, image, PngBytes).await?;

    let download_name = download_name(file_name.as_deref());
    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{download_name}\""),
            ),
        ],
        png,
    )
        .into_response())
}

/// `<basename>.png` for an uploaded file name, safe for a header value
fn download_name(file_name: Option<&str>) -> String {
    let derived = file_name
        .map(Path::new)
        .and_then(|p| p.file_name())
        .map(|name| derive_output_path(Path::new(name)))
        .and_then(|p| p.to_str().map(str::to_string))
        .unwrap_or_else(|| "image.png".to_string());

    derived
        .chars()
        .filter(|c| (c.is_ascii_graphic() || *c == ' ') && !matches!(c, '"' | '\\'))
        .collect()
}

/// `GET /health`
pub async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub backend: String,
    pub execution_provider: String,
    pub model: String,
    pub initialized: bool,
    pub model_info: Option<ModelInfo>,
}

/// `GET /api/info`
///
/// The processor lock is held for a whole forward pass, so it is taken on
/// the blocking pool rather than on a runtime worker.
pub async fn info_handler(
    State(state): State<AppState>,
) -> std::result::Result<Json<ServiceInfo>, ApiError> {
    let processor = Arc::clone(&state.processor);
    let info = tokio::task::spawn_blocking(move || {
        let processor = processor
            .lock()
            .map_err(|_| ApiError::internal("Processor lock poisoned"))?;
        let config = processor.config();

        Ok::<_, ApiError>(ServiceInfo {
            service: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            backend: config.backend_type.to_string(),
            execution_provider: config.execution_provider.to_string(),
            model: config.model_spec.source.display_name(),
            initialized: processor.is_initialized(),
            model_info: processor.model_info().ok(),
        })
    })
    .await
    .map_err(|e| ApiError::internal(format!("Info task failed: {e}")))??;

    Ok(Json(info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_name() {
        assert_eq!(download_name(Some("butterfly.jpg")), "butterfly.png");
        assert_eq!(download_name(Some("../../etc/cat.webp")), "cat.png");
        assert_eq!(download_name(Some("we\"ird.jpg")), "weird.png");
        assert_eq!(download_name(None), "image.png");
    }
}
