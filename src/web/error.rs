//! JSON error responses

use crate::error::{BgRemovalError, ErrorCategory};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Error returned by every handler, rendered as `{"error": {"code", "message"}}`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    /// Malformed request that never reached the pipeline
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST",
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR",
            message: message.into(),
        }
    }
}

impl From<BgRemovalError> for ApiError {
    fn from(err: BgRemovalError) -> Self {
        let status = match err.category() {
            ErrorCategory::Input => StatusCode::BAD_REQUEST,
            ErrorCategory::Inference
            | ErrorCategory::Output
            | ErrorCategory::Configuration
            | ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let code = match &err {
            BgRemovalError::Io(_) => "IO_ERROR",
            BgRemovalError::Image(_) => "IMAGE_DECODE_ERROR",
            BgRemovalError::Network(_) => "NETWORK_ERROR",
            BgRemovalError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            BgRemovalError::Inference(_) => "INFERENCE_ERROR",
            BgRemovalError::Model(_) => "MODEL_ERROR",
            BgRemovalError::Processing(_) => "PROCESSING_ERROR",
            BgRemovalError::Output(_) => "OUTPUT_ERROR",
            BgRemovalError::InvalidConfig(_) => "CONFIG_ERROR",
            BgRemovalError::Internal(_) => "INTERNAL_ERROR",
        };
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, "Request failed: {}", self.message);
        } else {
            tracing::warn!(code = self.code, "Request rejected: {}", self.message);
        }

        let body = serde_json::json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}
