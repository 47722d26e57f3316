//! BiRefNet background removal CLI
//!
//! Subcommands map onto the three removal modes plus model management.

use super::config::CliConfigBuilder;
use crate::{
    cache::{format_size, ModelCache},
    download::{validate_model_url, ModelDownloader},
    models::{ModelSource, ModelSpec},
    remover::BackgroundRemover,
    services::ImageSource,
    tracing_config::{spans, TracingFormat},
    utils::{ExecutionProviderManager, ModelSpecParser},
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use image::{RgbImage, RgbaImage};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn, Instrument};

/// Remove image backgrounds with the BiRefNet segmentation model
#[derive(Parser, Debug)]
#[command(name = "birefnet-bgremove", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Model ID, URL or path to a model folder/.onnx file, optionally with `:variant`
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Model variant (fp32, fp16) [default: fp32 when available]
    #[arg(long, global = true)]
    pub variant: Option<String>,

    /// Execution provider in format backend:provider (e.g., onnx:auto, onnx:cuda, tract:cpu)
    #[arg(short, long, global = true, default_value = "onnx:auto")]
    pub execution_provider: String,

    /// Number of inference threads (0 = auto)
    #[arg(short, long, global = true, default_value_t = 0)]
    pub threads: usize,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE for this crate)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Console)]
    pub log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload mode: write `<stem>_original.png` and `<stem>_transparent.png`
    Image {
        /// Input image file
        input: PathBuf,
        /// Output directory [default: current directory]
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
    /// URL mode: fetch an image and write the original/transparent pair
    Url {
        /// http(s) URL of the image
        url: String,
        /// Output directory [default: current directory]
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
    /// File mode: write `<basename>.png` next to each input and print its path
    File {
        /// Input image files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output file (single input) or directory (several inputs)
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },
    /// Serve the HTTP API
    #[cfg(feature = "web")]
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1:7860")]
        bind: String,
        /// Maximum request size in megabytes
        #[arg(long, default_value_t = 20)]
        max_request_mb: usize,
        /// Request timeout in seconds
        #[arg(long, default_value_t = 120)]
        timeout: u64,
    },
    /// Download a model into the cache [default: BiRefNet-ONNX]
    Download {
        /// HuggingFace repository URL
        url: Option<String>,
    },
    /// List cached models
    ListModels,
    /// Remove all cached models, or only MODEL
    ClearCache {
        /// Model ID to remove
        model: Option<String>,
    },
    /// Show backends and execution providers available on this machine
    Providers,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum LogFormat {
    Console,
    Compact,
    Json,
}

impl LogFormat {
    fn to_tracing_format(self) -> Result<TracingFormat> {
        match self {
            Self::Console => Ok(TracingFormat::Console),
            Self::Compact => Ok(TracingFormat::Compact),
            #[cfg(feature = "tracing-json")]
            Self::Json => Ok(TracingFormat::Json),
            #[cfg(not(feature = "tracing-json"))]
            Self::Json => bail!("JSON logging requires the 'tracing-json' feature"),
        }
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    crate::tracing_config::init_cli_tracing(cli.verbose, cli.log_format.to_tracing_format()?)
        .context("Failed to initialize tracing")?;

    match &cli.command {
        Command::Providers => {
            show_provider_diagnostics();
            Ok(())
        },
        Command::ListModels => list_cached_models(),
        Command::ClearCache { model } => clear_cache_models(model.as_deref()),
        Command::Download { url } => download_model(url.as_deref()).await,
        Command::Image { input, output_dir } => {
            let mut remover = create_remover(&cli).await?;
            run_image(&mut remover, input, output_dir.as_deref()).await
        },
        Command::Url { url, output_dir } => {
            let mut remover = create_remover(&cli).await?;
            run_url(&mut remover, url, output_dir.as_deref()).await
        },
        Command::File { inputs, output } => {
            let mut remover = create_remover(&cli).await?;
            run_files(&mut remover, inputs, output.as_deref()).await
        },
        #[cfg(feature = "web")]
        Command::Serve {
            bind,
            max_request_mb,
            timeout,
        } => {
            let mut remover = create_remover(&cli).await?;
            remover.initialize().context("Failed to load model")?;
            let config = crate::web::ServerConfig {
                bind_addr: bind.clone(),
                max_request_size: max_request_mb.saturating_mul(1024 * 1024),
                request_timeout_secs: *timeout,
            };
            crate::web::serve(remover, config)
                .await
                .context("HTTP server failed")
        },
    }
}

/// Build a remover from the global flags, downloading the model if needed
async fn create_remover(cli: &Cli) -> Result<BackgroundRemover> {
    let config = CliConfigBuilder::from_cli(cli)?;

    let span = spans::session(
        command_name(&cli.command),
        &config.model_spec.source.display_name(),
        &ExecutionProviderManager::provider_to_string(config.backend_type, config.execution_provider),
    );
    span.in_scope(|| {
        info!(
            backend = %config.backend_type,
            provider = %config.execution_provider,
            model = %config.model_spec.source.display_name(),
            "Starting background removal"
        );
    });

    ensure_model_available(&config.model_spec, cli.model.as_deref())
        .instrument(span)
        .await
        .context("Failed to ensure model is available")?;

    BackgroundRemover::new(config).context("Failed to create background remover")
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Image { .. } => "image",
        Command::Url { .. } => "url",
        Command::File { .. } => "file",
        #[cfg(feature = "web")]
        Command::Serve { .. } => "serve",
        Command::Download { .. } => "download",
        Command::ListModels => "list-models",
        Command::ClearCache { .. } => "clear-cache",
        Command::Providers => "providers",
    }
}

/// Download a cached model that is missing, when its URL is known
///
/// The URL is known for the default model and when `--model` was a URL.
async fn ensure_model_available(model_spec: &ModelSpec, model_arg: Option<&str>) -> Result<()> {
    let ModelSource::Downloaded(model_id) = &model_spec.source else {
        return Ok(());
    };

    let cache = ModelCache::new().context("Failed to create model cache")?;
    if cache.is_model_cached(model_id) {
        return Ok(());
    }

    let url = match model_arg {
        Some(arg) if ModelSpecParser::is_url(arg) => arg.to_string(),
        _ if *model_id == ModelCache::get_default_model_id() => {
            ModelCache::get_default_model_url().to_string()
        },
        _ => bail!(
            "Model '{model_id}' not found in cache. Run `birefnet-bgremove download <URL>` first, or `list-models` to see cached models."
        ),
    };

    println!("📦 Model not cached. Downloading {url} ...");
    let downloader =
        ModelDownloader::with_cache(cache).context("Failed to create model downloader")?;
    let downloaded_id = downloader
        .download_model(&url, true)
        .await
        .context("Failed to download model")?;

    if downloaded_id != *model_id {
        bail!("Downloaded model ID '{downloaded_id}' doesn't match expected '{model_id}'");
    }
    println!("✅ Model downloaded successfully!");
    Ok(())
}

async fn run_image(
    remover: &mut BackgroundRemover,
    input: &Path,
    output_dir: Option<&Path>,
) -> Result<()> {
    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let (original, transparent) = remover
        .process_upload(ImageSource::Bytes(bytes))
        .await
        .with_context(|| format!("Failed to remove background from {}", input.display()))?;

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());
    save_pair(&original, &transparent, output_dir, &stem)
}

async fn run_url(
    remover: &mut BackgroundRemover,
    url: &str,
    output_dir: Option<&Path>,
) -> Result<()> {
    let (original, transparent) = remover
        .process_url(url)
        .await
        .with_context(|| format!("Failed to remove background from {url}"))?;
    save_pair(&original, &transparent, output_dir, &stem_from_url(url))
}

/// Stem of the last non-empty URL path segment
fn stem_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.rfind(|s| !s.is_empty()).map(str::to_string))
        })
        .and_then(|segment| {
            Path::new(&segment)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
        })
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "image".to_string())
}

fn save_pair(
    original: &RgbImage,
    transparent: &RgbaImage,
    output_dir: Option<&Path>,
    stem: &str,
) -> Result<()> {
    let dir = output_dir.unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let original_path = dir.join(format!("{stem}_original.png"));
    let transparent_path = dir.join(format!("{stem}_transparent.png"));

    original
        .save_with_format(&original_path, image::ImageFormat::Png)
        .with_context(|| format!("Failed to write {}", original_path.display()))?;
    transparent
        .save_with_format(&transparent_path, image::ImageFormat::Png)
        .with_context(|| format!("Failed to write {}", transparent_path.display()))?;

    println!("{}", original_path.display());
    println!("{}", transparent_path.display());
    Ok(())
}

/// Where file mode writes the result for `input`
fn file_output_path(input: &Path, output: Option<&Path>, multiple: bool) -> Option<PathBuf> {
    let output = output?;
    let is_file_target = !multiple
        && output
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
    if is_file_target {
        Some(output.to_path_buf())
    } else {
        let name = crate::services::derive_output_path(Path::new(input.file_name()?));
        Some(output.join(name))
    }
}

async fn run_files(
    remover: &mut BackgroundRemover,
    inputs: &[PathBuf],
    output: Option<&Path>,
) -> Result<()> {
    let multiple = inputs.len() > 1;
    let progress = if multiple {
        let pb = ProgressBar::new(inputs.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .context("Invalid progress bar template")?
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let start = Instant::now();
    let mut failures = 0usize;

    for input in inputs {
        if let Some(pb) = &progress {
            pb.set_message(input.display().to_string());
        }

        let target = file_output_path(input, output, multiple);
        match remover
            .process_file(input, target.as_deref())
            .instrument(spans::file_processing(input))
            .await
        {
            Ok(written) => {
                if let Some(pb) = &progress {
                    pb.println(written.display().to_string());
                } else {
                    println!("{}", written.display());
                }
            },
            Err(e) => {
                failures += 1;
                error!(input = %input.display(), "Failed to process: {e}");
                if !multiple {
                    return Err(e)
                        .with_context(|| format!("Failed to remove background from {}", input.display()));
                }
            },
        }

        if let Some(pb) = &progress {
            pb.inc(1);
        }
    }

    if let Some(pb) = progress {
        pb.finish_with_message("done");
    }

    info!(
        processed = inputs.len() - failures,
        failed = failures,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "File mode finished"
    );

    if failures > 0 {
        bail!("{failures} of {} input(s) failed", inputs.len());
    }
    Ok(())
}

fn show_provider_diagnostics() {
    println!("🔍 Backend and Execution Provider Diagnostics");

    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("💻 System: {cpu_count} CPU cores detected");

    println!("\n🚀 Execution Providers:");
    for provider_info in ExecutionProviderManager::list_all_providers() {
        let status = if provider_info.available {
            "✅ Available"
        } else {
            "❌ Not Available"
        };
        println!(
            "  • {}: {} - {}",
            provider_info.name, status, provider_info.description
        );
    }

    println!("\n💡 Usage Examples:");
    println!("  --execution-provider onnx:auto    # Auto-select best ONNX provider (default)");
    println!("  --execution-provider onnx:cuda    # Use NVIDIA CUDA");
    println!("  --execution-provider onnx:coreml  # Use Apple CoreML (macOS)");
    println!("  --execution-provider tract:cpu    # Use pure Rust Tract backend");
}

fn list_cached_models() -> Result<()> {
    let cache = ModelCache::new().context("Failed to initialize model cache")?;
    let models = cache
        .scan_cached_models()
        .context("Failed to list cached models")?;

    println!("📦 Cached Models ({})", cache.get_current_cache_dir().display());

    if models.is_empty() {
        println!("No cached models found.");
        println!("\n💡 To download the default model, use:");
        println!("  birefnet-bgremove download");
        return Ok(());
    }

    for model in models {
        println!("📁 {}", model.model_id);
        println!("  └─ Location: {}", model.path.display());
        if !model.variants.is_empty() {
            println!("  └─ Variants: {}", model.variants.join(", "));
        }
        if model.size_bytes > 0 {
            println!("  └─ Size: {}", format_size(model.size_bytes));
        }
        if !model.has_preprocessor {
            println!("  └─ No preprocessor_config.json, using ImageNet defaults");
        }
    }

    Ok(())
}

async fn download_model(url: Option<&str>) -> Result<()> {
    let url = url.unwrap_or_else(|| ModelCache::get_default_model_url());
    validate_model_url(url).context("Invalid model URL")?;

    println!("📦 Downloading model from: {url}");
    let downloader = ModelDownloader::new().context("Failed to create model downloader")?;
    let model_id = downloader
        .download_model(url, true)
        .await
        .context("Failed to download model")?;

    println!("✅ Model ID: {model_id}");
    println!(
        "   Cache location: {}",
        downloader.cache().get_model_path(&model_id).display()
    );
    println!("\n💡 To use this model:");
    println!("   birefnet-bgremove --model {model_id} file input.jpg");
    Ok(())
}

fn clear_cache_models(model: Option<&str>) -> Result<()> {
    let cache = ModelCache::new().context("Failed to create model cache")?;

    if let Some(model_id) = model {
        if cache
            .clear_specific_model(model_id)
            .with_context(|| format!("Failed to clear model '{model_id}'"))?
        {
            println!("✅ Removed model: {model_id}");
        } else {
            warn!("Model '{model_id}' not found in cache");
            println!("⚠️  Model '{model_id}' not found in cache");
        }
        return Ok(());
    }

    let removed = cache.clear_all_models().context("Failed to clear cache")?;
    if removed.is_empty() {
        println!("💡 Cache was already empty");
    } else {
        println!("✅ Removed {} model(s):", removed.len());
        for model_id in &removed {
            println!("   • {model_id}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stem_from_url() {
        assert_eq!(stem_from_url("https://example.com/photos/butterfly.jpg"), "butterfly");
        assert_eq!(stem_from_url("https://example.com/photos/cat/"), "cat");
        assert_eq!(stem_from_url("https://example.com/"), "image");
        assert_eq!(stem_from_url("not a url"), "image");
    }

    #[test]
    fn test_file_output_path() {
        let input = Path::new("/in/butterfly.jpg");
        assert_eq!(file_output_path(input, None, false), None);
        assert_eq!(
            file_output_path(input, Some(Path::new("/out/result.png")), false),
            Some(PathBuf::from("/out/result.png"))
        );
        assert_eq!(
            file_output_path(input, Some(Path::new("/out")), false),
            Some(PathBuf::from("/out/butterfly.png"))
        );
        assert_eq!(
            file_output_path(input, Some(Path::new("/out/result.png")), true),
            Some(PathBuf::from("/out/result.png/butterfly.png"))
        );
    }

    #[test]
    fn test_subcommand_parsing() {
        let cli = Cli::parse_from(["birefnet-bgremove", "file", "a.jpg", "b.jpg", "-o", "out"]);
        match cli.command {
            Command::File { inputs, output } => {
                assert_eq!(inputs.len(), 2);
                assert_eq!(output, Some(PathBuf::from("out")));
            },
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::parse_from(["birefnet-bgremove", "-v", "--log-format", "compact", "list-models"]);
        assert_eq!(cli.verbose, 1);
        assert_eq!(cli.log_format, LogFormat::Compact);
        assert!(matches!(cli.command, Command::ListModels));
    }

    #[test]
    fn test_file_requires_input() {
        assert!(Cli::try_parse_from(["birefnet-bgremove", "file"]).is_err());
    }
}
