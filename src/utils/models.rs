//! Parsing of `--model` arguments into model specifications

use crate::{
    cache::ModelCache,
    error::{BgRemovalError, Result},
    models::{ModelSource, ModelSpec},
};
use std::path::{Path, PathBuf};

/// Utility for parsing and validating model specifications
pub struct ModelSpecParser;

impl ModelSpecParser {
    /// Parse a model argument of the form `model` or `model:variant`
    ///
    /// - an existing path becomes an external model
    /// - an `http(s)` URL becomes the cache ID derived from it
    /// - anything else is taken as a cached model ID
    ///
    /// ```rust
    /// use birefnet_bgremove::utils::ModelSpecParser;
    /// use birefnet_bgremove::models::ModelSource;
    ///
    /// let spec = ModelSpecParser::parse("onnx-community--BiRefNet-ONNX:fp16");
    /// assert_eq!(spec.source, ModelSource::Downloaded("onnx-community--BiRefNet-ONNX".into()));
    /// assert_eq!(spec.variant.as_deref(), Some("fp16"));
    ///
    /// let spec = ModelSpecParser::parse("https://huggingface.co/onnx-community/BiRefNet-ONNX");
    /// assert_eq!(spec.source, ModelSource::Downloaded("onnx-community--BiRefNet-ONNX".into()));
    /// ```
    #[must_use]
    pub fn parse(model_arg: &str) -> ModelSpec {
        if Self::is_url(model_arg) {
            return ModelSpec {
                source: ModelSource::Downloaded(ModelCache::url_to_model_id(model_arg)),
                variant: None,
            };
        }

        if Path::new(model_arg).exists() {
            return ModelSpec {
                source: ModelSource::External(PathBuf::from(model_arg)),
                variant: None,
            };
        }

        if let Some((base, variant)) = model_arg.rsplit_once(':') {
            if !base.is_empty() && !variant.is_empty() && !variant.contains(['/', '\\']) {
                return ModelSpec {
                    source: Self::source_for(base),
                    variant: Some(variant.to_string()),
                };
            }
        }

        ModelSpec {
            source: Self::source_for(model_arg),
            variant: None,
        }
    }

    fn source_for(arg: &str) -> ModelSource {
        if Path::new(arg).exists() {
            ModelSource::External(PathBuf::from(arg))
        } else {
            ModelSource::Downloaded(arg.to_string())
        }
    }

    /// Whether a model argument is a downloadable URL
    #[must_use]
    pub fn is_url(model_arg: &str) -> bool {
        model_arg.starts_with("https://") || model_arg.starts_with("http://")
    }

    /// Apply an explicit variant, which takes precedence over a `:variant` suffix
    #[must_use]
    pub fn with_variant(mut model_spec: ModelSpec, variant: Option<&str>) -> ModelSpec {
        if let Some(variant) = variant {
            model_spec.variant = Some(variant.to_string());
        }
        model_spec
    }

    /// Check that a specification is well formed
    ///
    /// # Errors
    /// - External path missing
    /// - Empty model ID or one with path separators
    /// - Empty variant or one with characters outside `[A-Za-z0-9_-]`
    pub fn validate(model_spec: &ModelSpec) -> Result<()> {
        match &model_spec.source {
            ModelSource::External(path) => {
                if !path.exists() {
                    return Err(BgRemovalError::invalid_config(format!(
                        "External model path does not exist: {}",
                        path.display()
                    )));
                }
            },
            ModelSource::Downloaded(model_id) => {
                if model_id.is_empty() {
                    return Err(BgRemovalError::invalid_config(
                        "Downloaded model ID cannot be empty",
                    ));
                }
                if model_id.contains(['/', '\\']) || model_id == ".." {
                    return Err(BgRemovalError::invalid_config(format!(
                        "Invalid downloaded model ID: {model_id}"
                    )));
                }
            },
        }

        if let Some(variant) = &model_spec.variant {
            if variant.is_empty()
                || !variant
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(BgRemovalError::invalid_config(format!(
                    "Invalid model variant: '{variant}'"
                )));
            }
        }

        Ok(())
    }

    /// Render a specification back into `model[:variant]` form
    #[must_use]
    pub fn to_string(model_spec: &ModelSpec) -> String {
        let base = match &model_spec.source {
            ModelSource::External(path) => path.to_string_lossy().to_string(),
            ModelSource::Downloaded(model_id) => model_id.clone(),
        };

        match &model_spec.variant {
            Some(variant) => format!("{base}:{variant}"),
            None => base,
        }
    }
}
