//! # Variant Set Builder
//!
//! Runs the fixed preprocessing chain over one card image:
//! grayscale, bilateral denoise, Otsu and adaptive binarization, then closing.

use image::DynamicImage;
use tracing::{debug, warn};

use super::filtering::{apply_bilateral_filter, apply_morphological_operation};
use super::thresholding::{apply_adaptive_gaussian_threshold, apply_otsu_threshold};
use super::types::{
    ImageVariant, ImageVariantSet, MorphologicalOperation, PreprocessingConfig,
    PreprocessingError,
};

/// Builds the variant set for an image.
///
/// Never fails: if any step errors, the failure is logged and a set holding
/// only the original image is returned.
pub fn build_variant_set(image: &DynamicImage, config: &PreprocessingConfig) -> ImageVariantSet {
    let start_time = std::time::Instant::now();

    match try_build_variant_set(image, config) {
        Ok(set) => {
            let elapsed = start_time.elapsed();
            debug!(
                target: "card_preprocessing",
                variants = set.len(),
                duration_ms = elapsed.as_millis() as u64,
                "Built image variant set"
            );
            metrics::histogram!("preprocessing_duration_seconds").record(elapsed.as_secs_f64());
            set
        }
        Err(e) => {
            warn!(
                target: "card_preprocessing",
                error = %e,
                width = image.width(),
                height = image.height(),
                "Preprocessing failed, continuing with the original image only"
            );
            metrics::counter!("preprocessing_failures_total").increment(1);
            ImageVariantSet::original_only(image)
        }
    }
}

fn try_build_variant_set(
    image: &DynamicImage,
    config: &PreprocessingConfig,
) -> Result<ImageVariantSet, PreprocessingError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(PreprocessingError::ProcessingFailed {
            message: "image has no pixels".to_string(),
        });
    }

    let mut set = ImageVariantSet::original_only(image);

    let gray = image.to_luma8();

    let denoised = apply_bilateral_filter(
        &gray,
        config.bilateral_diameter,
        config.bilateral_sigma_color,
        config.bilateral_sigma_space,
    )?
    .image;

    let binary = apply_otsu_threshold(&denoised)?.image;
    let adaptive =
        apply_adaptive_gaussian_threshold(&denoised, config.adaptive_block_size, config.adaptive_c)?
            .image;
    let morph =
        apply_morphological_operation(&adaptive, MorphologicalOperation::Closing, config.morph_radius)
            .image;

    set.insert_gray(ImageVariant::Gray, gray);
    set.insert_gray(ImageVariant::Denoised, denoised);
    set.insert_gray(ImageVariant::Binary, binary);
    set.insert_gray(ImageVariant::AdaptiveBinary, adaptive);
    set.insert_gray(ImageVariant::Morph, morph);

    Ok(set)
}
