//! Input loading and output strategies around the processor

pub mod io;
pub mod output;

pub use io::{load_image_from_bytes, load_image_from_path, DefaultImageLoader, ImageLoader, ImageSource};
pub use output::{derive_output_path, ComparisonPair, OutputStrategy, PngFile};
