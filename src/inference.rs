//! Inference backend abstraction

use crate::{
    config::RemovalConfig,
    error::{BgRemovalError, Result},
};
use ndarray::Array4;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// Trait for inference backends
///
/// `infer` returns the raw logits of the model's final output stage. Models
/// with deep supervision expose several side outputs; only the last one is
/// the full-resolution prediction and every backend must return that one.
pub trait InferenceBackend: Send {
    /// Initialize the backend with the given configuration
    ///
    /// Returns the model load time when a model was actually loaded.
    ///
    /// # Errors
    /// - Backend initialization failures
    /// - Model loading or validation errors
    /// - Invalid configuration parameters
    fn initialize(&mut self, config: &RemovalConfig) -> Result<Option<Duration>>;

    /// Run inference on the input tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Tensor conversion errors
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Get the expected input shape (NCHW)
    fn input_shape(&self) -> (usize, usize, usize, usize);

    /// Get the expected output shape (NCHW)
    fn output_shape(&self) -> (usize, usize, usize, usize);

    /// Get preprocessing configuration for this backend
    ///
    /// # Errors
    /// - Model manager not initialized
    /// - Invalid or missing preprocessing configuration
    fn get_preprocessing_config(&self) -> Result<crate::models::PreprocessingConfig>;

    /// Get model information for this backend
    ///
    /// # Errors
    /// - Model manager not initialized
    /// - Model metadata unavailable
    fn get_model_info(&self) -> Result<crate::models::ModelInfo>;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;
}

/// Pick the final prediction from a model's outputs in graph order
///
/// Returns the number of outputs and the last one. Deep-supervision side
/// outputs come first, so the last output is the full-resolution map.
///
/// # Errors
/// - The model produced no outputs
pub fn select_final_output<T, I>(outputs: I) -> Result<(usize, T)>
where
    I: IntoIterator<Item = T>,
{
    let mut count = 0;
    let mut last = None;
    for output in outputs {
        count += 1;
        last = Some(output);
    }
    last.map(|output| (count, output))
        .ok_or_else(|| BgRemovalError::inference("Model produced no output tensors"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockBackend;

    #[test]
    fn test_backend_trait_object() {
        let mut backend: Box<dyn InferenceBackend> = Box::new(MockBackend::new());
        assert!(!backend.is_initialized());

        assert_eq!(backend.input_shape(), (1, 3, 1024, 1024));
        assert_eq!(backend.output_shape(), (1, 1, 1024, 1024));

        backend.initialize(&RemovalConfig::default()).unwrap();
        assert!(backend.is_initialized());

        let config = backend.get_preprocessing_config().unwrap();
        assert_eq!(config.target_size, [1024, 1024]);
        assert!(!backend.get_model_info().unwrap().name.is_empty());
    }

    #[test]
    fn test_final_output_is_last_of_side_outputs() {
        // Side outputs at 1/4 and 1/2 resolution, then the full-resolution map
        let outputs = vec![
            Array4::<f32>::from_elem((1, 1, 256, 256), -1.0),
            Array4::<f32>::from_elem((1, 1, 512, 512), 0.0),
            Array4::<f32>::from_elem((1, 1, 1024, 1024), 1.0),
        ];

        let (count, selected) = select_final_output(outputs).unwrap();
        assert_eq!(count, 3);
        assert_eq!(selected.dim(), (1, 1, 1024, 1024));
        assert!(selected.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_final_output_of_named_outputs() {
        let names = ["output_0", "output_1", "output_2"];
        assert_eq!(select_final_output(names.iter()).unwrap(), (3, &"output_2"));
        assert_eq!(select_final_output(["only"]).unwrap(), (1, "only"));
    }

    #[test]
    fn test_no_outputs_is_inference_error() {
        let err = select_final_output(Vec::<Array4<f32>>::new()).unwrap_err();
        assert!(matches!(err, BgRemovalError::Inference(_)));
    }

    #[test]
    fn test_infer_requires_initialization() {
        let mut backend = MockBackend::with_size(8);
        let input = Array4::<f32>::zeros((1, 3, 8, 8));
        assert!(backend.infer(&input).is_err());

        backend.initialize(&RemovalConfig::default()).unwrap();
        let output = backend.infer(&input).unwrap();
        assert_eq!(output.dim(), (1, 1, 8, 8));
    }
}
