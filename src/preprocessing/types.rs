//! # Shared Types for Image Preprocessing
//!
//! This module contains all the shared types, structs, and enums used across
//! the preprocessing sub-modules.

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Errors that can occur during image preprocessing operations.
#[derive(Debug, Clone, PartialEq)]
pub enum PreprocessingError {
    /// A parameter was outside its accepted range
    InvalidParameter { name: &'static str, message: String },
    /// Image processing operation failed
    ProcessingFailed { message: String },
}

impl std::fmt::Display for PreprocessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreprocessingError::InvalidParameter { name, message } => {
                write!(f, "Invalid preprocessing parameter '{}': {}", name, message)
            }
            PreprocessingError::ProcessingFailed { message } => {
                write!(f, "Image processing failed: {}", message)
            }
        }
    }
}

impl std::error::Error for PreprocessingError {}

/// Named image variants produced from one input image.
///
/// Declaration order is the order variants are fed to OCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ImageVariant {
    /// Input image, three-channel colour
    Original,
    Gray,
    /// Edge-preserving bilateral denoise of `Gray`
    Denoised,
    /// Otsu global threshold of `Denoised`
    Binary,
    /// Gaussian-weighted adaptive threshold of `Denoised`
    AdaptiveBinary,
    /// Morphological closing of `AdaptiveBinary`
    Morph,
}

impl ImageVariant {
    /// Variants recognized by the OCR engine, in evaluation order
    pub const OCR_VARIANTS: [ImageVariant; 5] = [
        ImageVariant::Gray,
        ImageVariant::Denoised,
        ImageVariant::Binary,
        ImageVariant::AdaptiveBinary,
        ImageVariant::Morph,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ImageVariant::Original => "original",
            ImageVariant::Gray => "gray",
            ImageVariant::Denoised => "denoised",
            ImageVariant::Binary => "binary",
            ImageVariant::AdaptiveBinary => "adaptiveBinary",
            ImageVariant::Morph => "morph",
        }
    }
}

impl std::fmt::Display for ImageVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Read-only set of variants produced once per image.
///
/// `Original` is stored as RGB, every other variant as single-channel luma.
/// All variants share the input's dimensions.
#[derive(Debug, Clone)]
pub struct ImageVariantSet {
    images: BTreeMap<ImageVariant, DynamicImage>,
}

impl ImageVariantSet {
    /// A set holding only the original image
    pub fn original_only(image: &DynamicImage) -> Self {
        let mut images = BTreeMap::new();
        images.insert(
            ImageVariant::Original,
            DynamicImage::ImageRgb8(image.to_rgb8()),
        );
        Self { images }
    }

    pub(crate) fn insert_gray(&mut self, variant: ImageVariant, image: GrayImage) {
        self.images.insert(variant, DynamicImage::ImageLuma8(image));
    }

    pub fn get(&self, variant: ImageVariant) -> Option<&DynamicImage> {
        self.images.get(&variant)
    }

    /// Single-channel buffer of a non-original variant
    pub fn gray(&self, variant: ImageVariant) -> Option<&GrayImage> {
        self.images.get(&variant).and_then(DynamicImage::as_luma8)
    }

    /// Variants available for OCR, in evaluation order
    pub fn ocr_variants(&self) -> Vec<(ImageVariant, &GrayImage)> {
        ImageVariant::OCR_VARIANTS
            .iter()
            .filter_map(|variant| self.gray(*variant).map(|image| (*variant, image)))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ImageVariant, &DynamicImage)> {
        self.images.iter().map(|(variant, image)| (*variant, image))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// True when preprocessing failed and only the original is available
    pub fn is_degraded(&self) -> bool {
        self.images.len() == 1
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.images
            .get(&ImageVariant::Original)
            .map(|image| (image.width(), image.height()))
            .unwrap_or((0, 0))
    }
}

/// Parameters for building the variant set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Bilateral filter neighbourhood diameter in pixels
    pub bilateral_diameter: u32,
    pub bilateral_sigma_color: f32,
    pub bilateral_sigma_space: f32,
    /// Adaptive threshold neighbourhood size, odd and >= 3
    pub adaptive_block_size: u32,
    /// Constant subtracted from the weighted neighbourhood mean
    pub adaptive_c: f32,
    /// Closing element radius; 0 gives a 1x1 element
    pub morph_radius: u32,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            bilateral_diameter: 9,
            bilateral_sigma_color: 75.0,
            bilateral_sigma_space: 75.0,
            adaptive_block_size: 11,
            adaptive_c: 2.0,
            morph_radius: 0,
        }
    }
}

impl PreprocessingConfig {
    pub fn validate(&self) -> crate::errors::AppResult<()> {
        if self.bilateral_diameter == 0 {
            return Err(crate::errors::AppError::Config(
                "bilateral_diameter must be greater than 0".to_string(),
            ));
        }
        if self.bilateral_sigma_color <= 0.0 || self.bilateral_sigma_space <= 0.0 {
            return Err(crate::errors::AppError::Config(
                "bilateral sigmas must be greater than 0".to_string(),
            ));
        }
        if self.adaptive_block_size < 3 || self.adaptive_block_size % 2 == 0 {
            return Err(crate::errors::AppError::Config(format!(
                "adaptive_block_size ({}) must be odd and at least 3",
                self.adaptive_block_size
            )));
        }
        Ok(())
    }
}

/// Result of image thresholding operation.
#[derive(Debug, Clone)]
pub struct ThresholdedImageResult {
    /// The thresholded binary image
    pub image: GrayImage,
    /// Optimal threshold value found by Otsu's method
    pub threshold: u8,
    /// Processing time in milliseconds
    pub processing_time_ms: u32,
}

/// Result of adaptive thresholding.
#[derive(Debug, Clone)]
pub struct AdaptiveThresholdResult {
    pub image: GrayImage,
    pub block_size: u32,
    pub c: f32,
    /// Processing time in milliseconds
    pub processing_time_ms: u32,
}

/// Noise reduction method applied by a denoise step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DenoiseMethod {
    Bilateral {
        diameter: u32,
        sigma_color: f32,
        sigma_space: f32,
    },
    Gaussian {
        sigma: f32,
    },
    Median {
        radius: u32,
    },
}

/// Result of image noise reduction operation.
#[derive(Debug, Clone)]
pub struct DenoisedImageResult {
    /// The denoised image
    pub image: GrayImage,
    pub method: DenoiseMethod,
    /// Processing time in milliseconds
    pub processing_time_ms: u32,
}

/// Result of morphological operations on binary images.
#[derive(Debug, Clone)]
pub struct MorphologicalImageResult {
    /// The morphologically processed image
    pub image: GrayImage,
    /// Type of morphological operation applied
    pub operation: MorphologicalOperation,
    /// Kernel size used (e.g., 3 for 3x3 kernel)
    pub kernel_size: u32,
    /// Processing time in milliseconds
    pub processing_time_ms: u32,
}

/// Types of morphological operations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MorphologicalOperation {
    /// Erosion operation (shrinks bright regions)
    Erosion,
    /// Dilation operation (expands bright regions)
    Dilation,
    /// Opening operation (erosion followed by dilation - removes noise)
    Opening,
    /// Closing operation (dilation followed by erosion - fills gaps)
    Closing,
}

/// Result of CLAHE contrast enhancement operation.
#[derive(Debug, Clone)]
pub struct ClaheImageResult {
    /// The contrast-enhanced image
    pub image: GrayImage,
    /// Clip limit used for histogram clipping
    pub clip_limit: f32,
    /// Tile size used for local histogram equalization
    pub tile_size: (u32, u32),
    /// Processing time in milliseconds
    pub processing_time_ms: u32,
}
