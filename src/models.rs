//! Model sources, metadata and loading

use crate::error::{BgRemovalError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Input resolution BiRefNet was trained at
pub const DEFAULT_TARGET_SIZE: u32 = 1024;

/// ImageNet channel means (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Model source specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelSource {
    /// External model: an `.onnx` file or a HuggingFace-style folder
    External(PathBuf),
    /// Downloaded model from cache by model ID
    Downloaded(String),
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::External(path) => {
                format!(
                    "external:{}",
                    path.file_name().unwrap_or_default().to_string_lossy()
                )
            },
            ModelSource::Downloaded(model_id) => {
                format!("cached:{}", model_id)
            },
        }
    }
}

/// Complete model specification including source and optional variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    pub variant: Option<String>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSource::Downloaded(crate::cache::ModelCache::get_default_model_id()),
            variant: None,
        }
    }
}

/// Model information and metadata
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub precision: String,
    pub size_bytes: u64,
    pub input_shape: (usize, usize, usize, usize), // NCHW format
}

/// Resize and normalization parameters the model was trained with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Target `[width, height]`
    pub target_size: [u32; 2],
    pub normalization_mean: [f32; 3],
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            target_size: [DEFAULT_TARGET_SIZE, DEFAULT_TARGET_SIZE],
            normalization_mean: IMAGENET_MEAN,
            normalization_std: IMAGENET_STD,
        }
    }
}

impl PreprocessingConfig {
    /// Read a HuggingFace `preprocessor_config.json` document
    ///
    /// Missing keys fall back to the BiRefNet defaults. `size` may be an
    /// integer or an object with `width`/`height`.
    ///
    /// # Errors
    /// - `image_mean`/`image_std` present but not three numbers
    /// - a zero standard deviation or target size
    pub fn from_preprocessor_json(value: &serde_json::Value) -> Result<Self> {
        let defaults = Self::default();

        let target_size = match value.get("size") {
            Some(serde_json::Value::Number(n)) => {
                let side = n.as_u64().unwrap_or(u64::from(DEFAULT_TARGET_SIZE)) as u32;
                [side, side]
            },
            Some(serde_json::Value::Object(size)) => {
                let width = size
                    .get("width")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(u64::from(DEFAULT_TARGET_SIZE)) as u32;
                let height = size
                    .get("height")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(u64::from(DEFAULT_TARGET_SIZE)) as u32;
                [width, height]
            },
            _ => defaults.target_size,
        };

        let normalization_mean = match value.get("image_mean") {
            Some(v) => Self::parse_triplet(v, "image_mean")?,
            None => defaults.normalization_mean,
        };
        let normalization_std = match value.get("image_std") {
            Some(v) => Self::parse_triplet(v, "image_std")?,
            None => defaults.normalization_std,
        };

        let config = Self {
            target_size,
            normalization_mean,
            normalization_std,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the parameters can produce a finite tensor
    ///
    /// # Errors
    /// - zero target size
    /// - non-positive standard deviation
    pub fn validate(&self) -> Result<()> {
        if self.target_size.contains(&0) {
            return Err(BgRemovalError::invalid_config(format!(
                "Preprocessing target size must be non-zero, got {:?}",
                self.target_size
            )));
        }
        if self.normalization_std.iter().any(|s| *s <= 0.0) {
            return Err(BgRemovalError::invalid_config(format!(
                "Normalization std must be positive, got {:?}",
                self.normalization_std
            )));
        }
        Ok(())
    }

    fn parse_triplet(value: &serde_json::Value, key: &str) -> Result<[f32; 3]> {
        let values: Vec<f32> = value
            .as_array()
            .ok_or_else(|| BgRemovalError::invalid_config(format!("'{key}' must be an array")))?
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!("'{key}' must contain only numbers"))
            })?;

        <[f32; 3]>::try_from(values.as_slice()).map_err(|_| {
            BgRemovalError::invalid_config(format!(
                "'{key}' must have 3 values, got {}",
                values.len()
            ))
        })
    }
}

/// Model provider trait for loading models
pub trait ModelProvider: std::fmt::Debug + Send + Sync {
    /// Load model data as bytes
    ///
    /// # Errors
    /// - Model file not found or unreadable
    fn load_model_data(&self) -> Result<Vec<u8>>;

    /// Get model information
    ///
    /// # Errors
    /// - Model file metadata unavailable
    fn get_model_info(&self) -> Result<ModelInfo>;

    /// Get preprocessing configuration
    ///
    /// # Errors
    /// - Invalid `preprocessor_config.json`
    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig>;

    /// Get the model file path
    fn model_path(&self) -> &Path;
}

/// Resolved on-disk layout of a model: the `.onnx` file and its preprocessing
#[derive(Debug, Clone)]
struct ModelLayout {
    name: String,
    model_file: PathBuf,
    variant: String,
    preprocessing: PreprocessingConfig,
}

impl ModelLayout {
    /// Resolve a HuggingFace-style folder (`onnx/model*.onnx`) or a single `.onnx` file
    fn resolve(path: &Path, requested_variant: Option<&str>) -> Result<Self> {
        if !path.exists() {
            return Err(BgRemovalError::model_error_with_context(
                "locate",
                path,
                "path does not exist",
                &["check the --model argument", "run the download command"],
            ));
        }

        let name = path
            .file_stem()
            .map_or_else(|| "model".to_string(), |s| s.to_string_lossy().to_string());

        if path.is_file() {
            let is_onnx = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"));
            if !is_onnx {
                return Err(BgRemovalError::unsupported_format(format!(
                    "Model file must be an .onnx file: {}",
                    path.display()
                )));
            }
            let sibling_config = path.parent().map(|p| p.join("preprocessor_config.json"));
            let preprocessing = Self::load_preprocessing(sibling_config.as_deref())?;
            return Ok(Self {
                name,
                model_file: path.to_path_buf(),
                variant: requested_variant.unwrap_or("fp32").to_string(),
                preprocessing,
            });
        }

        let onnx_dir = if path.join("onnx").is_dir() {
            path.join("onnx")
        } else {
            path.to_path_buf()
        };

        let available = scan_variants(&onnx_dir);
        if available.is_empty() {
            return Err(BgRemovalError::model(format!(
                "No ONNX model files found in {}",
                onnx_dir.display()
            )));
        }

        let variant = match requested_variant {
            Some(requested) => {
                if !available.iter().any(|v| v == requested) {
                    return Err(BgRemovalError::model(format!(
                        "Variant '{}' not available in {}. Available: {}",
                        requested,
                        path.display(),
                        available.join(", ")
                    )));
                }
                requested.to_string()
            },
            None => ["fp32", "fp16"]
                .iter()
                .find(|preferred| available.iter().any(|v| v == *preferred))
                .map_or_else(|| available[0].clone(), |v| (*v).to_string()),
        };

        let preprocessing =
            Self::load_preprocessing(Some(&path.join("preprocessor_config.json")))?;

        Ok(Self {
            name,
            model_file: onnx_dir.join(variant_file_name(&variant)),
            variant,
            preprocessing,
        })
    }

    fn load_preprocessing(config_path: Option<&Path>) -> Result<PreprocessingConfig> {
        let Some(config_path) = config_path.filter(|p| p.exists()) else {
            log::debug!("No preprocessor_config.json found, using BiRefNet defaults");
            return Ok(PreprocessingConfig::default());
        };

        let content = fs::read_to_string(config_path).map_err(|e| {
            BgRemovalError::model_io_error("read preprocessor_config.json", config_path, &e)
        })?;
        let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
            BgRemovalError::model(format!("Failed to parse preprocessor_config.json: {}", e))
        })?;
        PreprocessingConfig::from_preprocessor_json(&value)
    }

    fn info(&self) -> Result<ModelInfo> {
        let metadata = fs::metadata(&self.model_file)
            .map_err(|e| BgRemovalError::model_io_error("stat model file", &self.model_file, &e))?;
        let [width, height] = self.preprocessing.target_size;
        Ok(ModelInfo {
            name: format!("{}-{}", self.name, self.variant),
            precision: self.variant.clone(),
            size_bytes: metadata.len(),
            input_shape: (1, 3, height as usize, width as usize),
        })
    }

    fn read(&self) -> Result<Vec<u8>> {
        if !self.model_file.exists() {
            return Err(BgRemovalError::model(format!(
                "Model file not found: {}. Expected variant: {}",
                self.model_file.display(),
                self.variant
            )));
        }
        fs::read(&self.model_file)
            .map_err(|e| BgRemovalError::model_io_error("read model file", &self.model_file, &e))
    }
}

/// Map a variant name to its file name inside `onnx/`
#[must_use]
pub fn variant_file_name(variant: &str) -> String {
    match variant {
        "fp32" => "model.onnx".to_string(),
        other => format!("model_{other}.onnx"),
    }
}

/// List the variants present in an `onnx/` directory
#[must_use]
pub fn scan_variants(onnx_dir: &Path) -> Vec<String> {
    let mut variants = Vec::new();
    if let Ok(entries) = fs::read_dir(onnx_dir) {
        for entry in entries.flatten() {
            if let Some(file_name) = entry.file_name().to_str() {
                if file_name == "model.onnx" {
                    variants.push("fp32".to_string());
                } else if let Some(variant) = file_name
                    .strip_prefix("model_")
                    .and_then(|s| s.strip_suffix(".onnx"))
                {
                    variants.push(variant.to_string());
                }
            }
        }
    }
    variants.sort();
    variants
}

/// Provider for models on the local filesystem outside the cache
#[derive(Debug)]
pub struct ExternalModelProvider {
    layout: ModelLayout,
}

impl ExternalModelProvider {
    /// Create a provider for an `.onnx` file or a HuggingFace-style folder
    ///
    /// # Errors
    /// - Path does not exist or contains no ONNX files
    /// - Requested variant not available
    pub fn new<P: AsRef<Path>>(model_path: P, variant: Option<&str>) -> Result<Self> {
        Ok(Self {
            layout: ModelLayout::resolve(model_path.as_ref(), variant)?,
        })
    }
}

impl ModelProvider for ExternalModelProvider {
    fn load_model_data(&self) -> Result<Vec<u8>> {
        self.layout.read()
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        self.layout.info()
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.layout.preprocessing.clone())
    }

    fn model_path(&self) -> &Path {
        &self.layout.model_file
    }
}

/// Provider for models downloaded into the cache
#[derive(Debug)]
pub struct DownloadedModelProvider {
    model_id: String,
    layout: ModelLayout,
}

impl DownloadedModelProvider {
    /// Create a provider for a cached model
    ///
    /// # Errors
    /// - Model not found in cache
    /// - Invalid preprocessing configuration
    /// - Requested variant not available
    pub fn new(cache: &crate::cache::ModelCache, model_id: &str, variant: Option<&str>) -> Result<Self> {
        if !cache.is_model_cached(model_id) {
            let available = cache
                .scan_cached_models()?
                .into_iter()
                .map(|m| m.model_id)
                .collect::<Vec<_>>();
            return Err(BgRemovalError::model(format!(
                "Model '{}' not found in cache. Available models: {:?}",
                model_id, available
            )));
        }

        let layout = ModelLayout::resolve(&cache.get_model_path(model_id), variant)?;
        Ok(Self {
            model_id: model_id.to_string(),
            layout,
        })
    }

    /// Cache identifier of this model
    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

impl ModelProvider for DownloadedModelProvider {
    fn load_model_data(&self) -> Result<Vec<u8>> {
        self.layout.read()
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        let mut info = self.layout.info()?;
        info.name = format!("{}-{}", self.model_id, self.layout.variant);
        Ok(info)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.layout.preprocessing.clone())
    }

    fn model_path(&self) -> &Path {
        &self.layout.model_file
    }
}

/// Model manager for handling different model sources
#[derive(Debug)]
pub struct ModelManager {
    provider: Box<dyn ModelProvider>,
}

impl ModelManager {
    /// Create a new model manager from a model specification
    ///
    /// # Errors
    /// - External model path missing or without ONNX files
    /// - Downloaded model not present in the cache
    /// - Requested variant not available
    pub fn from_spec(spec: &ModelSpec) -> Result<Self> {
        let provider: Box<dyn ModelProvider> = match &spec.source {
            ModelSource::External(path) => {
                Box::new(ExternalModelProvider::new(path, spec.variant.as_deref())?)
            },
            ModelSource::Downloaded(model_id) => {
                let cache = crate::cache::ModelCache::new()?;
                Box::new(DownloadedModelProvider::new(
                    &cache,
                    model_id,
                    spec.variant.as_deref(),
                )?)
            },
        };
        Ok(Self { provider })
    }

    /// Wrap an arbitrary provider
    #[must_use]
    pub fn with_provider(provider: Box<dyn ModelProvider>) -> Self {
        Self { provider }
    }

    /// Load the model bytes
    ///
    /// # Errors
    /// - Model file unreadable
    pub fn load_model(&self) -> Result<Vec<u8>> {
        self.provider.load_model_data()
    }

    /// Model metadata
    ///
    /// # Errors
    /// - Model file metadata unavailable
    pub fn get_info(&self) -> Result<ModelInfo> {
        self.provider.get_model_info()
    }

    /// Preprocessing parameters for this model
    ///
    /// # Errors
    /// - Invalid preprocessing configuration
    pub fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.provider.get_preprocessing_config()
    }

    /// Path of the `.onnx` file in use
    #[must_use]
    pub fn model_path(&self) -> &Path {
        self.provider.model_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_model_folder(dir: &Path, files: &[&str]) {
        fs::create_dir_all(dir.join("onnx")).unwrap();
        for file in files {
            fs::write(dir.join("onnx").join(file), b"fake-onnx").unwrap();
        }
    }

    #[test]
    fn test_default_preprocessing_matches_imagenet() {
        let config = PreprocessingConfig::default();
        assert_eq!(config.target_size, [1024, 1024]);
        assert_eq!(config.normalization_mean, [0.485, 0.456, 0.406]);
        assert_eq!(config.normalization_std, [0.229, 0.224, 0.225]);
    }

    #[test]
    fn test_preprocessor_json_object_size() {
        let value = serde_json::json!({
            "do_normalize": true,
            "image_mean": [0.5, 0.5, 0.5],
            "image_std": [0.25, 0.25, 0.25],
            "size": { "height": 512, "width": 768 }
        });
        let config = PreprocessingConfig::from_preprocessor_json(&value).unwrap();
        assert_eq!(config.target_size, [768, 512]);
        assert_eq!(config.normalization_mean, [0.5, 0.5, 0.5]);
        assert_eq!(config.normalization_std, [0.25, 0.25, 0.25]);
    }

    #[test]
    fn test_preprocessor_json_defaults_and_errors() {
        let config = PreprocessingConfig::from_preprocessor_json(&serde_json::json!({})).unwrap();
        assert_eq!(config, PreprocessingConfig::default());

        let config =
            PreprocessingConfig::from_preprocessor_json(&serde_json::json!({ "size": 320 }))
                .unwrap();
        assert_eq!(config.target_size, [320, 320]);

        let bad = serde_json::json!({ "image_mean": [0.5, 0.5] });
        assert!(PreprocessingConfig::from_preprocessor_json(&bad).is_err());

        let zero_std = serde_json::json!({ "image_std": [0.0, 0.2, 0.2] });
        assert!(PreprocessingConfig::from_preprocessor_json(&zero_std).is_err());
    }

    #[test]
    fn test_variant_file_names() {
        assert_eq!(variant_file_name("fp32"), "model.onnx");
        assert_eq!(variant_file_name("fp16"), "model_fp16.onnx");
        assert_eq!(variant_file_name("quantized"), "model_quantized.onnx");
    }

    #[test]
    fn test_external_folder_prefers_fp32() {
        let temp = TempDir::new().unwrap();
        write_model_folder(temp.path(), &["model.onnx", "model_fp16.onnx"]);

        let provider = ExternalModelProvider::new(temp.path(), None).unwrap();
        assert!(provider.model_path().ends_with("onnx/model.onnx"));
        assert_eq!(provider.get_model_info().unwrap().precision, "fp32");

        let provider = ExternalModelProvider::new(temp.path(), Some("fp16")).unwrap();
        assert!(provider.model_path().ends_with("onnx/model_fp16.onnx"));
    }

    #[test]
    fn test_external_folder_missing_variant() {
        let temp = TempDir::new().unwrap();
        write_model_folder(temp.path(), &["model_fp16.onnx"]);

        let err = ExternalModelProvider::new(temp.path(), Some("fp32")).unwrap_err();
        assert!(err.to_string().contains("fp16"));
    }

    #[test]
    fn test_external_single_file_reads_sibling_config() {
        let temp = TempDir::new().unwrap();
        let model = temp.path().join("birefnet.onnx");
        fs::write(&model, b"fake-onnx").unwrap();
        fs::write(
            temp.path().join("preprocessor_config.json"),
            r#"{"size": {"width": 256, "height": 256}}"#,
        )
        .unwrap();

        let manager =
            ModelManager::with_provider(Box::new(ExternalModelProvider::new(&model, None).unwrap()));
        assert_eq!(manager.get_preprocessing_config().unwrap().target_size, [256, 256]);
        assert_eq!(manager.load_model().unwrap(), b"fake-onnx");
        assert_eq!(manager.get_info().unwrap().input_shape, (1, 3, 256, 256));
    }

    #[test]
    fn test_external_rejects_non_onnx_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("weights.pth");
        fs::write(&file, b"torch").unwrap();
        let err = ExternalModelProvider::new(&file, None).unwrap_err();
        assert!(matches!(err, BgRemovalError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_display_name() {
        let source = ModelSource::External(PathBuf::from("/models/birefnet.onnx"));
        assert_eq!(source.display_name(), "external:birefnet.onnx");
        let source = ModelSource::Downloaded("onnx-community--BiRefNet-ONNX".to_string());
        assert_eq!(source.display_name(), "cached:onnx-community--BiRefNet-ONNX");
    }
}
