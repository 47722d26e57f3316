//! Model cache management for downloaded models
//!
//! Downloaded models live in a per-user cache directory, one folder per model
//! in the HuggingFace layout:
//!
//! ```text
//! <cache>/birefnet-bgremove/models/
//!   onnx-community--BiRefNet-ONNX/
//!     config.json                (optional)
//!     preprocessor_config.json   (optional)
//!     onnx/model.onnx
//!     onnx/model_fp16.onnx
//! ```

use crate::error::{BgRemovalError, Result};
use crate::models::scan_variants;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "BIREFNET_BGREMOVE_CACHE_DIR";

const DEFAULT_MODEL_URL: &str = "https://huggingface.co/onnx-community/BiRefNet-ONNX";

/// Information about a cached model
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Model identifier (derived from URL)
    pub model_id: String,
    /// Path to the cached model directory
    pub path: PathBuf,
    pub has_config: bool,
    pub has_preprocessor: bool,
    /// Available ONNX variants (fp32, fp16, ...)
    pub variants: Vec<String>,
    /// Total size of the model directory in bytes
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a cache manager for the user cache directory
    ///
    /// - Linux: `~/.cache/birefnet-bgremove/models/`
    /// - macOS: `~/Library/Caches/birefnet-bgremove/models/`
    /// - Windows: `%LOCALAPPDATA%/birefnet-bgremove/models/`
    ///
    /// `BIREFNET_BGREMOVE_CACHE_DIR` replaces the platform directory.
    ///
    /// # Errors
    /// - Failed to determine or create the cache directory
    pub fn new() -> Result<Self> {
        let cache_dir = Self::get_cache_dir()?;
        Self::ensure_dir(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    /// Create a cache manager rooted at a custom directory
    ///
    /// # Errors
    /// - Failed to create the directory
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        let models_dir = cache_dir.join("models");
        Self::ensure_dir(&models_dir)?;
        Ok(Self {
            cache_dir: models_dir,
        })
    }

    fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .map_err(|e| BgRemovalError::model_io_error("create cache directory", dir, &e))?;
        }
        Ok(())
    }

    fn get_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV}."
                ))
            })?
            .join("birefnet-bgremove")
            .join("models"))
    }

    /// Generate a filesystem-safe model ID from a URL
    ///
    /// ```
    /// use birefnet_bgremove::cache::ModelCache;
    ///
    /// let id = ModelCache::url_to_model_id("https://huggingface.co/onnx-community/BiRefNet-ONNX");
    /// assert_eq!(id, "onnx-community--BiRefNet-ONNX");
    /// ```
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        let prefix = "https://huggingface.co/";
        if let Some(repo) = url.strip_prefix(prefix) {
            repo.trim_end_matches('/').replace('/', "--")
        } else {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(url.as_bytes());
            let hash_string = format!("url-{:x}", hasher.finalize());
            hash_string.chars().take(16).collect()
        }
    }

    /// Whether a complete model directory exists for `model_id`
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str) -> bool {
        Self::validate_model_directory(&self.cache_dir.join(model_id))
    }

    /// Path to a cached model directory (may not exist)
    #[must_use]
    pub fn get_model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(model_id)
    }

    /// Cache root holding one directory per model
    #[must_use]
    pub fn get_current_cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// List every valid cached model, sorted by ID
    ///
    /// # Errors
    /// - Failed to read the cache directory
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(models);
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            BgRemovalError::model_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                BgRemovalError::model_io_error("read cache directory entry", &self.cache_dir, &e)
            })?;

            let path = entry.path();
            if path.is_dir() {
                if let Some(model_info) = Self::analyze_model_directory(&path) {
                    models.push(model_info);
                }
            }
        }

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    /// A model directory is usable once `onnx/` holds at least one `.onnx` file
    fn validate_model_directory(model_path: &Path) -> bool {
        !scan_variants(&model_path.join("onnx")).is_empty()
    }

    fn analyze_model_directory(model_path: &Path) -> Option<CachedModelInfo> {
        let model_id = model_path.file_name()?.to_str()?.to_string();

        if !Self::validate_model_directory(model_path) {
            log::debug!("Skipping invalid model directory: {}", model_path.display());
            return None;
        }

        Some(CachedModelInfo {
            model_id,
            path: model_path.to_path_buf(),
            has_config: model_path.join("config.json").exists(),
            has_preprocessor: model_path.join("preprocessor_config.json").exists(),
            variants: scan_variants(&model_path.join("onnx")),
            size_bytes: Self::calculate_directory_size(model_path).unwrap_or(0),
        })
    }

    fn calculate_directory_size(dir_path: &Path) -> Result<u64> {
        let mut total_size = 0;
        Self::visit_dir(dir_path, &mut total_size)
            .map_err(|e| BgRemovalError::model_io_error("calculate directory size", dir_path, &e))?;
        Ok(total_size)
    }

    fn visit_dir(dir: &Path, total: &mut u64) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                Self::visit_dir(&path, total)?;
            } else {
                *total += entry.metadata()?.len();
            }
        }
        Ok(())
    }

    /// Model ID of the default BiRefNet export
    #[must_use]
    pub fn get_default_model_id() -> String {
        Self::url_to_model_id(DEFAULT_MODEL_URL)
    }

    /// URL of the default BiRefNet export
    #[must_use]
    pub fn get_default_model_url() -> &'static str {
        DEFAULT_MODEL_URL
    }

    /// Remove every cached model directory
    ///
    /// Returns the removed model IDs.
    ///
    /// # Errors
    /// - Failed to read the cache or remove a directory
    pub fn clear_all_models(&self) -> Result<Vec<String>> {
        let mut removed_models = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(removed_models);
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            BgRemovalError::model_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                let model_id = entry.file_name().to_string_lossy().to_string();
                log::info!("Removing cached model: {}", model_id);
                fs::remove_dir_all(&path).map_err(|e| {
                    BgRemovalError::model_io_error("remove cached model directory", &path, &e)
                })?;
                removed_models.push(model_id);
            }
        }

        removed_models.sort();
        Ok(removed_models)
    }

    /// Remove one cached model
    ///
    /// Returns `false` if the model was not cached.
    ///
    /// # Errors
    /// - Failed to remove the directory
    pub fn clear_specific_model(&self, model_id: &str) -> Result<bool> {
        let model_path = self.get_model_path(model_id);

        if !model_path.exists() {
            return Ok(false);
        }

        log::info!("Removing cached model: {}", model_id);
        fs::remove_dir_all(&model_path).map_err(|e| {
            BgRemovalError::model_io_error("remove cached model", &model_path, &e)
        })?;

        Ok(true)
    }
}

/// Format a byte count for humans
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    let unit = UNITS.get(unit_index).unwrap_or(&"B");
    if unit_index == 0 {
        format!("{bytes} {unit}")
    } else {
        format!("{size:.1} {unit}")
    }
}
