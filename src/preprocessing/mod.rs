//! # Image Preprocessing Module
//!
//! Produces the fixed set of image variants the OCR engine runs over, and the
//! filters the QR decoder reuses for its fallback attempts.
//!
//! The module is organized into focused sub-modules:
//! - `thresholding`: Otsu and Gaussian adaptive binarization
//! - `filtering`: Bilateral/Gaussian/median denoise, morphology and CLAHE
//! - `variants`: The variant set builder
//! - `types`: Shared types and error definitions

pub mod filtering;
pub mod thresholding;
pub mod types;
pub mod variants;

// Re-export commonly used types and functions for convenience
pub use types::{
    ImageVariant, ImageVariantSet, MorphologicalOperation, PreprocessingConfig,
    PreprocessingError,
};

pub use filtering::{
    apply_bilateral_filter, apply_clahe, apply_gaussian_blur, apply_median_filter,
    apply_morphological_operation,
};
pub use thresholding::{apply_adaptive_gaussian_threshold, apply_otsu_threshold};
pub use variants::build_variant_set;
