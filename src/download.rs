//! Model downloading from `HuggingFace` repositories
//!
//! Files are streamed into a temporary directory and moved into the cache
//! only once at least one ONNX variant arrived, so a failed download never
//! leaves a half-populated model behind.

use crate::cache::ModelCache;
use crate::error::{BgRemovalError, Result};
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

const HUGGINGFACE_PREFIX: &str = "https://huggingface.co/";

/// Metadata files; BiRefNet exports do not always ship them
const OPTIONAL_FILES: &[&str] = &["config.json", "preprocessor_config.json"];

/// ONNX model files to attempt downloading
const ONNX_FILES: &[(&str, &str)] = &[
    ("onnx/model.onnx", "fp32"),
    ("onnx/model_fp16.onnx", "fp16"),
];

/// Byte progress of a model download, drawn only when the CLI is compiled in
#[derive(Debug, Default)]
struct DownloadProgress {
    #[cfg(feature = "cli")]
    bar: Option<ProgressBar>,
}

impl DownloadProgress {
    fn new(visible: bool) -> Self {
        #[cfg(feature = "cli")]
        {
            let bar = visible.then(|| {
                let bar = ProgressBar::new(0);
                if let Ok(style) = ProgressStyle::default_bar().template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                ) {
                    bar.set_style(style.progress_chars("#>-"));
                }
                bar
            });
            Self { bar }
        }
        #[cfg(not(feature = "cli"))]
        {
            let _ = visible;
            Self::default()
        }
    }

    fn message(&self, msg: String) {
        #[cfg(feature = "cli")]
        {
            if let Some(bar) = &self.bar {
                bar.set_message(msg);
            }
        }
        #[cfg(not(feature = "cli"))]
        {
            let _ = msg;
        }
    }

    /// Start a new file; `total` is unknown without a Content-Length
    fn start_file(&self, total: Option<u64>) {
        #[cfg(feature = "cli")]
        {
            if let (Some(bar), Some(total)) = (&self.bar, total) {
                bar.set_length(total);
                bar.set_position(0);
            }
        }
        #[cfg(not(feature = "cli"))]
        {
            let _ = total;
        }
    }

    fn advance_to(&self, downloaded: u64, total_known: bool) {
        if total_known {
            #[cfg(feature = "cli")]
            {
                if let Some(bar) = &self.bar {
                    bar.set_position(downloaded);
                }
            }
        } else {
            self.message(format!("Downloaded {}", crate::cache::format_size(downloaded)));
        }
    }

    fn finish(&self, msg: String) {
        #[cfg(feature = "cli")]
        {
            if let Some(bar) = &self.bar {
                bar.finish_with_message(msg);
            }
        }
        #[cfg(not(feature = "cli"))]
        {
            let _ = msg;
        }
    }
}

/// Model downloader with progress reporting
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// Create a downloader writing into the user cache
    ///
    /// # Errors
    /// - Failed to create HTTP client
    /// - Failed to initialize model cache
    pub fn new() -> Result<Self> {
        Self::with_cache(ModelCache::new()?)
    }

    /// Create a downloader writing into an explicit cache
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn with_cache(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .map_err(|e| BgRemovalError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client, cache })
    }

    /// Download a model repository into the cache and return its model ID
    ///
    /// Already-cached models are not downloaded again.
    ///
    /// # Errors
    /// - URL is not a `HuggingFace` repository
    /// - No ONNX variant could be downloaded
    /// - File system errors while moving into the cache
    pub async fn download_model(&self, url: &str, show_progress: bool) -> Result<String> {
        validate_model_url(url)?;
        let url = url.trim_end_matches('/');
        let model_id = ModelCache::url_to_model_id(url);
        log::info!("Downloading model {} from {}", model_id, url);

        if self.cache.is_model_cached(&model_id) {
            log::info!("Model already cached: {}", model_id);
            return Ok(model_id);
        }

        let temp_dir = Self::create_temp_download_dir(&model_id)?;
        let final_dir = self.cache.get_model_path(&model_id);
        let progress = DownloadProgress::new(show_progress);

        match self.download_model_files(url, &temp_dir, &progress).await {
            Ok(()) => {
                if final_dir.exists() {
                    fs::remove_dir_all(&final_dir).map_err(|e| {
                        BgRemovalError::model_io_error(
                            "remove existing model directory",
                            &final_dir,
                            &e,
                        )
                    })?;
                }
                Self::move_dir(&temp_dir, &final_dir)?;

                progress.finish(format!("Downloaded {model_id}"));
                log::info!("Successfully downloaded model: {}", model_id);
                Ok(model_id)
            },
            Err(e) => {
                if temp_dir.exists() {
                    if let Err(cleanup_err) = fs::remove_dir_all(&temp_dir) {
                        log::warn!("Failed to cleanup temp directory: {}", cleanup_err);
                    }
                }
                progress.finish("Download failed".to_string());
                Err(e)
            },
        }
    }

    /// Rename, falling back to copy when temp and cache sit on different filesystems
    fn move_dir(from: &Path, to: &Path) -> Result<()> {
        if fs::rename(from, to).is_ok() {
            return Ok(());
        }
        Self::copy_dir(from, to)?;
        fs::remove_dir_all(from)
            .map_err(|e| BgRemovalError::model_io_error("remove temp directory", from, &e))
    }

    fn copy_dir(from: &Path, to: &Path) -> Result<()> {
        fs::create_dir_all(to)
            .map_err(|e| BgRemovalError::model_io_error("create directory", to, &e))?;
        let entries =
            fs::read_dir(from).map_err(|e| BgRemovalError::model_io_error("read directory", from, &e))?;
        for entry in entries.flatten() {
            let target = to.join(entry.file_name());
            let source = entry.path();
            if source.is_dir() {
                Self::copy_dir(&source, &target)?;
            } else {
                fs::copy(&source, &target)
                    .map_err(|e| BgRemovalError::model_io_error("copy model file", &target, &e))?;
            }
        }
        Ok(())
    }

    fn create_temp_download_dir(model_id: &str) -> Result<PathBuf> {
        let temp_dir = std::env::temp_dir().join(format!("birefnet-bgremove-{}", model_id));

        if temp_dir.exists() {
            fs::remove_dir_all(&temp_dir).map_err(|e| {
                BgRemovalError::model_io_error("remove existing temp directory", &temp_dir, &e)
            })?;
        }

        fs::create_dir_all(&temp_dir)
            .map_err(|e| BgRemovalError::model_io_error("create temp directory", &temp_dir, &e))?;

        Ok(temp_dir)
    }

    async fn download_model_files(
        &self,
        base_url: &str,
        download_dir: &Path,
        progress: &DownloadProgress,
    ) -> Result<()> {
        let raw_base = format!("{}/resolve/main/", base_url);

        for file_name in OPTIONAL_FILES {
            let file_url = format!("{}{}", raw_base, file_name);
            progress.message(format!("Downloading {file_name}"));
            if let Err(e) = self
                .download_file(&file_url, &download_dir.join(file_name), progress)
                .await
            {
                log::debug!("Optional file {} not downloaded: {}", file_name, e);
                let _ = fs::remove_file(download_dir.join(file_name));
            }
        }

        let mut downloaded_models = 0;
        for (file_path, variant) in ONNX_FILES {
            let file_url = format!("{}{}", raw_base, file_path);
            let local_path = download_dir.join(file_path);

            progress.message(format!("Downloading {variant} model"));

            match self.download_file(&file_url, &local_path, progress).await {
                Ok(()) => {
                    downloaded_models += 1;
                    log::info!("Downloaded {} model variant", variant);
                },
                Err(e) => {
                    log::warn!("Failed to download {} variant: {}", variant, e);
                    let _ = fs::remove_file(&local_path);
                },
            }
        }

        if downloaded_models == 0 {
            return Err(BgRemovalError::network_error(
                "Failed to download any ONNX model variants",
                format!("none of {:?} found under {}", ONNX_FILES, raw_base),
            ));
        }

        log::info!("Downloaded {} model variant(s)", downloaded_models);
        Ok(())
    }

    async fn download_file(
        &self,
        url: &str,
        local_path: &Path,
        progress: &DownloadProgress,
    ) -> Result<()> {
        log::debug!("Downloading: {} -> {}", url, local_path.display());

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BgRemovalError::model_io_error("create directory", parent, &e))?;
        }

        let response =
            self.client.get(url).send().await.map_err(|e| {
                BgRemovalError::network_error(format!("Failed to download {}", url), e)
            })?;

        if !response.status().is_success() {
            return Err(BgRemovalError::network_error(
                format!("Failed to download {}", url),
                format!("HTTP {}", response.status()),
            ));
        }

        let total_size = response.content_length();
        progress.start_file(total_size);

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| BgRemovalError::model_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];

        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| BgRemovalError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| BgRemovalError::model_io_error("write to file", local_path, &e))?;

            downloaded += bytes_read as u64;
            progress.advance_to(downloaded, total_size.is_some());
        }

        file.flush()
            .await
            .map_err(|e| BgRemovalError::model_io_error("flush file", local_path, &e))?;

        log::debug!("Downloaded {} bytes to {}", downloaded, local_path.display());
        Ok(())
    }

    /// Cache the downloader writes into
    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Validate that a URL points at a `HuggingFace` repository
///
/// # Errors
/// - Empty URL, non-`HuggingFace` host, or missing `owner/repo` path
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(BgRemovalError::invalid_config("Model URL cannot be empty"));
    }

    let Some(repo_path) = url.strip_prefix(HUGGINGFACE_PREFIX) else {
        return Err(BgRemovalError::invalid_config(format!(
            "Unsupported URL format: {}. Only HuggingFace repositories are supported (https://huggingface.co/...)",
            url
        )));
    };

    let mut parts = repo_path.split('/').filter(|p| !p.is_empty());
    if parts.next().is_none() || parts.next().is_none() {
        return Err(BgRemovalError::invalid_config(format!(
            "Invalid HuggingFace repository URL: {}. Expected format: https://huggingface.co/owner/repo-name",
            url
        )));
    }

    Ok(())
}

/// Split a `HuggingFace` URL into `(owner, repository)`
///
/// # Errors
/// - Any failure reported by [`validate_model_url`]
pub fn parse_huggingface_url(url: &str) -> Result<(String, String)> {
    validate_model_url(url)?;

    let mut parts = url
        .strip_prefix(HUGGINGFACE_PREFIX)
        .unwrap_or_default()
        .split('/')
        .filter(|p| !p.is_empty());

    match (parts.next(), parts.next()) {
        (Some(owner), Some(repo)) => Ok((owner.to_string(), repo.to_string())),
        _ => Err(BgRemovalError::invalid_config(format!(
            "Invalid HuggingFace URL format: {}",
            url
        ))),
    }
}
