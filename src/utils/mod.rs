//! Shared helpers for the pipeline and its front ends

pub mod models;
pub mod postprocessing;
pub mod preprocessing;
pub mod providers;

pub use models::ModelSpecParser;
pub use postprocessing::{compose_alpha, probability_map_to_mask, resize_mask, sigmoid};
pub use preprocessing::ImagePreprocessor;
pub use providers::{ExecutionProviderManager, ProviderInfo};
