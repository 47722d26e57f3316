//! Deterministic in-process backend
//!
//! Produces a soft circular foreground as raw logits without loading any
//! model, so the full pipeline can be exercised in tests and benchmarks.

use crate::{
    config::RemovalConfig,
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    models::{ModelInfo, PreprocessingConfig},
};
use instant::Duration;
use ndarray::Array4;
use std::sync::{Arc, Mutex};

/// Logit magnitude at the circle center and far outside it
const MAX_LOGIT: f32 = 8.0;

/// Mock backend emitting a centered circle as foreground
#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    model_info: ModelInfo,
    preprocessing_config: PreprocessingConfig,
    call_history: Arc<Mutex<Vec<String>>>,
    should_fail_init: bool,
    should_fail_inference: bool,
}

impl MockBackend {
    /// Mock with the BiRefNet input resolution (1024×1024)
    #[must_use]
    pub fn new() -> Self {
        Self::with_size(crate::models::DEFAULT_TARGET_SIZE)
    }

    /// Mock operating at a square `size`×`size` resolution
    #[must_use]
    pub fn with_size(size: u32) -> Self {
        let side = size as usize;
        Self {
            initialized: false,
            model_info: ModelInfo {
                name: "mock-birefnet".to_string(),
                precision: "fp32".to_string(),
                size_bytes: 1024 * 1024,
                input_shape: (1, 3, side, side),
            },
            preprocessing_config: PreprocessingConfig {
                target_size: [size, size],
                ..PreprocessingConfig::default()
            },
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_init: false,
            should_fail_inference: false,
        }
    }

    /// Mock whose `initialize` always fails
    #[must_use]
    pub fn new_failing_init() -> Self {
        Self {
            should_fail_init: true,
            ..Self::with_size(32)
        }
    }

    /// Mock whose `infer` always fails
    #[must_use]
    pub fn new_failing_inference() -> Self {
        Self {
            should_fail_inference: true,
            ..Self::with_size(32)
        }
    }

    /// Method names called so far, in order
    #[must_use]
    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }

    /// Logits for a circle of radius `min(w, h) / 3`, positive inside and negative outside
    fn generate_logits(batch: usize, height: usize, width: usize) -> Array4<f32> {
        let center_x = width as f32 / 2.0;
        let center_y = height as f32 / 2.0;
        let radius = (width.min(height) as f32 / 3.0).max(1.0);

        Array4::from_shape_fn((batch, 1, height, width), |(_, _, y, x)| {
            let dx = x as f32 + 0.5 - center_x;
            let dy = y as f32 + 0.5 - center_y;
            let distance = (dx * dx + dy * dy).sqrt();
            (MAX_LOGIT * (1.0 - distance / radius)).clamp(-MAX_LOGIT, MAX_LOGIT)
        })
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &RemovalConfig) -> Result<Option<Duration>> {
        self.record_call("initialize");

        if self.should_fail_init {
            return Err(BgRemovalError::model("Mock backend initialization failed"));
        }

        if self.initialized {
            return Ok(None);
        }
        self.initialized = true;
        Ok(Some(Duration::from_millis(1)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer");

        if !self.initialized {
            return Err(BgRemovalError::internal("Mock backend not initialized"));
        }

        if self.should_fail_inference {
            return Err(BgRemovalError::inference("Mock backend inference failed"));
        }

        let (batch, channels, height, width) = input.dim();
        if channels != 3 {
            return Err(BgRemovalError::inference(format!(
                "Expected 3 input channels, got {channels}"
            )));
        }

        Ok(Self::generate_logits(batch, height, width))
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info.input_shape
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        let (batch, _, height, width) = self.model_info.input_shape;
        (batch, 1, height, width)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.record_call("get_preprocessing_config");
        Ok(self.preprocessing_config.clone())
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        Ok(self.model_info.clone())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logits_are_positive_at_center() {
        let logits = MockBackend::generate_logits(1, 30, 30);
        assert!(logits[[0, 0, 15, 15]] > 0.0);
        assert!(logits[[0, 0, 0, 0]] < 0.0);
        assert_eq!(logits[[0, 0, 0, 0]], -MAX_LOGIT);
    }

    #[test]
    fn test_failure_modes() {
        let config = RemovalConfig::default();

        let mut backend = MockBackend::new_failing_init();
        assert!(backend.initialize(&config).is_err());
        assert!(!backend.is_initialized());

        let mut backend = MockBackend::new_failing_inference();
        backend.initialize(&config).unwrap();
        let input = Array4::<f32>::zeros((1, 3, 32, 32));
        assert!(matches!(
            backend.infer(&input),
            Err(BgRemovalError::Inference(_))
        ));
    }

    #[test]
    fn test_call_history_is_shared_between_clones() {
        let mut backend = MockBackend::with_size(16);
        let observer = backend.clone();

        backend.initialize(&RemovalConfig::default()).unwrap();
        backend.infer(&Array4::zeros((1, 3, 16, 16))).unwrap();

        assert_eq!(observer.get_call_history(), vec!["initialize", "infer"]);
    }

    #[test]
    fn test_rejects_wrong_channel_count() {
        let mut backend = MockBackend::with_size(16);
        backend.initialize(&RemovalConfig::default()).unwrap();
        assert!(backend.infer(&Array4::zeros((1, 1, 16, 16))).is_err());
    }
}
