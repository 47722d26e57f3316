//! Error types for background removal operations

use thiserror::Error;

/// Result type alias for background removal operations
pub type Result<T> = std::result::Result<T, BgRemovalError>;

/// Coarse classification of a failure, by pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The image source could not be read, fetched or decoded
    Input,
    /// Model loading or the forward pass failed
    Inference,
    /// The result could not be written
    Output,
    /// Invalid parameters supplied by the caller
    Configuration,
    /// Unexpected internal state
    Internal,
}

/// Comprehensive error types for background removal operations
#[derive(Error, Debug)]
pub enum BgRemovalError {
    /// Errors reading the input image (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Network errors while fetching images or models
    #[error("Network error: {0}")]
    Network(String),

    /// Backend inference errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unsupported file format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Tensor or pixel processing errors
    #[error("Processing error: {0}")]
    Processing(String),

    /// Failure writing the result
    #[error("Output error: {0}")]
    Output(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BgRemovalError {
    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new unsupported format error
    pub fn unsupported_format<S: Into<String>>(format: S) -> Self {
        Self::UnsupportedFormat(format.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new processing error
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new output error
    pub fn output<S: Into<String>>(msg: S) -> Self {
        Self::Output(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a network error from a message and its underlying cause
    pub fn network_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::Network(format!("{}: {}", context.into(), error))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// File system failure on model, cache or download storage
    ///
    /// Server-side storage, so it is reported as a model error rather than
    /// an unreadable input.
    pub fn model_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        Self::Model(format!(
            "Failed to {} '{}': {}",
            operation,
            path.as_ref().display(),
            error
        ))
    }

    /// Create model error with troubleshooting context
    pub fn model_error_with_context<P: AsRef<std::path::Path>>(
        operation: &str,
        model_path: P,
        error: &str,
        suggestions: &[&str],
    ) -> Self {
        let path_display = model_path.as_ref().display();
        let suggestion_text = if suggestions.is_empty() {
            String::new()
        } else {
            format!(" Suggestions: {}", suggestions.join(", "))
        };

        Self::Model(format!(
            "Failed to {} model '{}': {}.{}",
            operation, path_display, error, suggestion_text
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Create processing error with stage context
    pub fn processing_stage_error(stage: &str, details: &str, input_info: Option<&str>) -> Self {
        let input_context = match input_info {
            Some(info) => format!(" (input: {})", info),
            None => String::new(),
        };

        Self::Processing(format!(
            "Processing failed at stage '{}'{}: {}",
            stage, input_context, details
        ))
    }

    /// Classify the error by the pipeline stage it belongs to
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Io(_) | Self::Image(_) | Self::Network(_) | Self::UnsupportedFormat(_) => {
                ErrorCategory::Input
            },
            Self::Inference(_) | Self::Model(_) | Self::Processing(_) => ErrorCategory::Inference,
            Self::Output(_) => ErrorCategory::Output,
            Self::InvalidConfig(_) => ErrorCategory::Configuration,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_error_creation() {
        let err = BgRemovalError::invalid_config("test config error");
        assert!(matches!(err, BgRemovalError::InvalidConfig(_)));

        let err = BgRemovalError::unsupported_format("TIFF");
        assert!(matches!(err, BgRemovalError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_error_display() {
        let err = BgRemovalError::invalid_config("Invalid model path");
        assert_eq!(err.to_string(), "Invalid configuration: Invalid model path");

        let err = BgRemovalError::network_error("Failed to fetch image", "connection refused");
        assert_eq!(
            err.to_string(),
            "Network error: Failed to fetch image: connection refused"
        );
    }

    #[test]
    fn test_enhanced_error_context() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = BgRemovalError::file_io_error("read image data", Path::new("/in/butterfly.jpg"), &io_error);
        let error_string = err.to_string();
        assert!(error_string.contains("read image data"));
        assert!(error_string.contains("/in/butterfly.jpg"));

        let err = BgRemovalError::model_error_with_context(
            "load",
            Path::new("/models/missing.onnx"),
            "file not found",
            &["check file path", "run the download command"],
        );
        let error_string = err.to_string();
        assert!(error_string.contains("load"));
        assert!(error_string.contains("/models/missing.onnx"));
        assert!(error_string.contains("Suggestions"));

        let err = BgRemovalError::config_value_error("threads", 5000, "0-1024", Some(0));
        let error_string = err.to_string();
        assert!(error_string.contains("threads"));
        assert!(error_string.contains("5000"));
        assert!(error_string.contains("Recommended: 0"));

        let err = BgRemovalError::processing_stage_error("preprocessing", "empty image", Some("0x0"));
        let error_string = err.to_string();
        assert!(error_string.contains("preprocessing"));
        assert!(error_string.contains("0x0"));
    }

    #[test]
    fn test_error_categories() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(BgRemovalError::from(io).category(), ErrorCategory::Input);
        assert_eq!(
            BgRemovalError::network_error("GET", "timeout").category(),
            ErrorCategory::Input
        );
        assert_eq!(
            BgRemovalError::inference("out of memory").category(),
            ErrorCategory::Inference
        );
        assert_eq!(
            BgRemovalError::model("bad graph").category(),
            ErrorCategory::Inference
        );
        assert_eq!(
            BgRemovalError::output("disk full").category(),
            ErrorCategory::Output
        );
        assert_eq!(
            BgRemovalError::invalid_config("x").category(),
            ErrorCategory::Configuration
        );
    }

    #[test]
    fn test_storage_failures_are_not_input_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = BgRemovalError::model_io_error("create cache directory", "/cache/models", &io);

        assert!(matches!(err, BgRemovalError::Model(_)));
        assert_eq!(err.category(), ErrorCategory::Inference);
        assert!(err.to_string().contains("/cache/models"));
    }
}
