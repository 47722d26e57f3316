//! Background removal processor
//!
//! `BackgroundRemovalProcessor` owns the inference backend and runs the
//! image → tensor → logits → mask → RGBA pipeline. Every front end (library
//! adapters, CLI, HTTP API) goes through it so behavior stays identical.

use crate::{
    config::{BackendType, RemovalConfig},
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    models::ModelInfo,
    types::{ProcessingTimings, RemovalResult, SegmentationMask},
    utils::{compose_alpha, probability_map_to_mask, resize_mask, sigmoid, ImagePreprocessor},
};
use image::{RgbImage, RgbaImage};
use instant::Instant;
use log::{debug, info};
use ndarray::Array4;
use tracing::{debug as trace_debug, instrument, span, Level};

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create an uninitialized backend of the requested type
    ///
    /// # Errors
    /// - Backend type not compiled into this build
    fn create_backend(&self, backend_type: BackendType) -> Result<Box<dyn InferenceBackend>>;

    /// List backend types this factory can create
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Creates the backends enabled by cargo features
#[derive(Debug, Default)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(&self, backend_type: BackendType) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::new())),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(crate::backends::TractBackend::new())),
            #[allow(unreachable_patterns)]
            other => Err(BgRemovalError::invalid_config(format!(
                "Backend '{other}' is not available in this build. Enable the '{other}' feature."
            ))),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        backends
    }
}

/// Runs the segmentation pipeline on decoded RGB images
pub struct BackgroundRemovalProcessor {
    config: RemovalConfig,
    backend_factory: Box<dyn BackendFactory>,
    backend: Option<Box<dyn InferenceBackend>>,
    initialized: bool,
    pending_model_load_ms: Option<u64>,
}

impl std::fmt::Debug for BackgroundRemovalProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemovalProcessor")
            .field("config", &self.config)
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}

impl BackgroundRemovalProcessor {
    /// Create a processor whose backend comes from the default factory
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(config: RemovalConfig) -> Result<Self> {
        Self::with_factory(config, Box::new(DefaultBackendFactory))
    }

    /// Create a processor with a custom backend factory
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn with_factory(
        config: RemovalConfig,
        backend_factory: Box<dyn BackendFactory>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend_factory,
            backend: None,
            initialized: false,
            pending_model_load_ms: None,
        })
    }

    /// Create a processor around an already constructed backend
    ///
    /// The backend is initialized lazily like a factory-created one.
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn with_backend(config: RemovalConfig, backend: Box<dyn InferenceBackend>) -> Result<Self> {
        let mut processor = Self::new(config)?;
        processor.backend = Some(backend);
        Ok(processor)
    }

    /// Load the model and prepare the backend
    ///
    /// Calling this more than once is a no-op.
    ///
    /// # Errors
    /// - Backend type unavailable
    /// - Model loading or execution provider failures
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        info!("Initializing background removal processor");
        debug!("Model spec: {:?}", self.config.model_spec);
        debug!("Backend type: {}", self.config.backend_type);
        debug!("Execution provider: {}", self.config.execution_provider);

        let mut backend = match self.backend.take() {
            Some(backend) => backend,
            None => self.backend_factory.create_backend(self.config.backend_type)?,
        };

        let load_time = backend.initialize(&self.config)?;
        self.pending_model_load_ms = load_time.map(|d| d.as_millis() as u64);
        self.backend = Some(backend);
        self.initialized = true;

        info!("Background removal processor initialized successfully");
        Ok(())
    }

    /// Remove the background of an RGB image
    ///
    /// The returned `original` is a copy of `image`; `transparent` has the same
    /// RGB values with the predicted mask as alpha.
    ///
    /// # Errors
    /// - Initialization failures on first use
    /// - Preprocessing, inference or compositing errors
    #[instrument(
        skip(self, image),
        fields(
            backend = %self.config.backend_type,
            model = %self.config.model_spec.source.display_name(),
            dimensions = %format!("{}x{}", image.width(), image.height())
        )
    )]
    pub fn process(&mut self, image: &RgbImage) -> Result<RemovalResult> {
        if !self.initialized {
            self.initialize()?;
        }

        let mut timings = ProcessingTimings {
            model_load_ms: self.pending_model_load_ms.take(),
            ..ProcessingTimings::default()
        };
        let total_start = Instant::now();
        let original_dimensions = image.dimensions();

        let input_tensor = {
            let _span = span!(
                Level::DEBUG,
                "preprocessing",
                original_width = %original_dimensions.0,
                original_height = %original_dimensions.1
            )
            .entered();
            self.preprocess(image, &mut timings)?
        };

        let logits = {
            let _span = span!(
                Level::INFO,
                "inference",
                backend = %self.config.backend_type,
                model = %self.config.model_spec.source.display_name()
            )
            .entered();
            self.run_inference(&input_tensor, &mut timings)?
        };

        let (mask, transparent) = {
            let _span = span!(
                Level::DEBUG,
                "postprocessing",
                width = %original_dimensions.0,
                height = %original_dimensions.1
            )
            .entered();
            self.postprocess(&logits, image, &mut timings)?
        };

        timings.total_ms = total_start.elapsed().as_millis() as u64;
        trace_debug!(
            total_ms = timings.total_ms,
            inference_ms = timings.inference_ms,
            "Background removal complete"
        );

        Ok(RemovalResult {
            original: image.clone(),
            transparent,
            mask,
            original_dimensions,
            timings,
        })
    }

    fn preprocess(&self, image: &RgbImage, timings: &mut ProcessingTimings) -> Result<Array4<f32>> {
        let start = Instant::now();

        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| BgRemovalError::internal("Backend not initialized"))?;

        let preprocessing_config = backend.get_preprocessing_config()?;
        let tensor = ImagePreprocessor::preprocess(image, &preprocessing_config)?;

        timings.preprocessing_ms = start.elapsed().as_millis() as u64;
        Ok(tensor)
    }

    fn run_inference(
        &mut self,
        input: &Array4<f32>,
        timings: &mut ProcessingTimings,
    ) -> Result<Array4<f32>> {
        let start = Instant::now();

        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| BgRemovalError::internal("Backend not initialized"))?;

        let logits = backend.infer(input)?;
        timings.inference_ms = start.elapsed().as_millis() as u64;

        if self.config.debug {
            log_tensor_stats("logits", &logits);
        }
        Ok(logits)
    }

    fn postprocess(
        &self,
        logits: &Array4<f32>,
        image: &RgbImage,
        timings: &mut ProcessingTimings,
    ) -> Result<(SegmentationMask, RgbaImage)> {
        let start = Instant::now();

        let probabilities = sigmoid(logits);
        let mask = probability_map_to_mask(&probabilities)?;
        let (width, height) = image.dimensions();
        let mask = resize_mask(&mask, width, height);
        let transparent = compose_alpha(image, &mask)?;

        if self.config.debug {
            let stats = mask.statistics();
            debug!(
                "Mask foreground: {}/{} pixels ({:.1}%)",
                stats.foreground_pixels,
                stats.total_pixels,
                stats.foreground_ratio * 100.0
            );
        }

        timings.postprocessing_ms = start.elapsed().as_millis() as u64;
        Ok((mask, transparent))
    }

    /// Information about the loaded model
    ///
    /// # Errors
    /// - Processor not initialized
    pub fn model_info(&self) -> Result<ModelInfo> {
        self.backend
            .as_ref()
            .filter(|_| self.initialized)
            .ok_or_else(|| BgRemovalError::internal("Processor not initialized"))?
            .get_model_info()
    }

    /// Get the current configuration
    #[must_use]
    pub fn config(&self) -> &RemovalConfig {
        &self.config
    }

    /// Check if the processor is initialized
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Get available backends from the factory
    #[must_use]
    pub fn available_backends(&self) -> Vec<BackendType> {
        self.backend_factory.available_backends()
    }
}

fn log_tensor_stats(name: &str, tensor: &Array4<f32>) {
    let (min, max) = tensor
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let mean = tensor.mean().unwrap_or(0.0);
    debug!(
        "{name}: shape {:?}, min {min:.4}, max {max:.4}, mean {mean:.4}",
        tensor.shape()
    );
}
