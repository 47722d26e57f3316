//! Configuration types for background removal operations

use crate::models::ModelSpec;
use serde::{Deserialize, Serialize};

/// Upper bound accepted for explicit thread counts
const MAX_THREADS: usize = 1024;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Inference engine used to run the segmentation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    #[default]
    Onnx,
    /// Tract backend (pure Rust, CPU only)
    Tract,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

/// Configuration for background removal operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalConfig {
    /// Model specification including source and variant
    pub model_spec: ModelSpec,

    /// Inference engine
    pub backend_type: BackendType,

    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,

    /// Enable debug mode (additional logging of tensor statistics)
    pub debug: bool,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            model_spec: ModelSpec::default(),
            backend_type: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
            inter_threads: 0,
            debug: false,
        }
    }
}

impl RemovalConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    ///
    /// ```rust
    /// use birefnet_bgremove::{BackendType, ExecutionProvider, RemovalConfig};
    ///
    /// let config = RemovalConfig::builder()
    ///     .backend_type(BackendType::Onnx)
    ///     .execution_provider(ExecutionProvider::Cuda)
    ///     .num_threads(8)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.intra_threads, 8);
    /// ```
    #[must_use]
    pub fn builder() -> RemovalConfigBuilder {
        RemovalConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Thread counts above the supported maximum
    /// - A non-CPU execution provider combined with the Tract backend
    pub fn validate(&self) -> crate::Result<()> {
        if self.intra_threads > MAX_THREADS {
            return Err(crate::error::BgRemovalError::config_value_error(
                "intra-op threads",
                self.intra_threads,
                "0-1024",
                Some(0),
            ));
        }

        if self.inter_threads > MAX_THREADS {
            return Err(crate::error::BgRemovalError::config_value_error(
                "inter-op threads",
                self.inter_threads,
                "0-1024",
                Some(0),
            ));
        }

        if self.backend_type == BackendType::Tract
            && !matches!(
                self.execution_provider,
                ExecutionProvider::Cpu | ExecutionProvider::Auto
            )
        {
            return Err(crate::error::BgRemovalError::invalid_config(format!(
                "Tract backend only supports CPU execution, got '{}'",
                self.execution_provider
            )));
        }

        Ok(())
    }
}

/// Builder for `RemovalConfig`
#[derive(Debug, Default)]
pub struct RemovalConfigBuilder {
    config: RemovalConfig,
}

impl RemovalConfigBuilder {
    /// Set model specification
    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model_spec = model_spec;
        self
    }

    /// Set inference backend
    #[must_use]
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.backend_type = backend_type;
        self
    }

    /// Set execution provider
    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    /// Set intra-op threads (0 = auto)
    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    /// Set inter-op threads (0 = auto)
    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    /// Use the same thread count for intra-op and inter-op parallelism
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self.config.inter_threads = threads;
        self
    }

    /// Enable debug mode
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Any validation failure reported by [`RemovalConfig::validate`]
    pub fn build(self) -> crate::Result<RemovalConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModelSource, ModelSpec};

    #[test]
    fn test_default_config() {
        let config = RemovalConfig::default();
        assert_eq!(config.backend_type, BackendType::Onnx);
        assert_eq!(config.execution_provider, ExecutionProvider::Auto);
        assert_eq!(config.intra_threads, 0);
        assert_eq!(config.inter_threads, 0);
        assert!(!config.debug);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let spec = ModelSpec {
            source: ModelSource::Downloaded("onnx-community--BiRefNet-ONNX".to_string()),
            variant: Some("fp16".to_string()),
        };
        let config = RemovalConfig::builder()
            .model_spec(spec.clone())
            .backend_type(BackendType::Tract)
            .execution_provider(ExecutionProvider::Cpu)
            .intra_threads(4)
            .inter_threads(2)
            .debug(true)
            .build()
            .unwrap();

        assert_eq!(config.model_spec, spec);
        assert_eq!(config.backend_type, BackendType::Tract);
        assert_eq!(config.intra_threads, 4);
        assert_eq!(config.inter_threads, 2);
        assert!(config.debug);
    }

    #[test]
    fn test_thread_validation() {
        let result = RemovalConfig::builder().intra_threads(5000).build();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("intra-op threads"));
        assert!(err.to_string().contains("5000"));
    }

    #[test]
    fn test_tract_rejects_gpu_provider() {
        let result = RemovalConfig::builder()
            .backend_type(BackendType::Tract)
            .execution_provider(ExecutionProvider::Cuda)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_display_and_serde() {
        assert_eq!(ExecutionProvider::CoreMl.to_string(), "coreml");
        assert_eq!(BackendType::Tract.to_string(), "tract");

        let config = RemovalConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: RemovalConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
