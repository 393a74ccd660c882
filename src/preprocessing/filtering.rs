//! # Image Filtering Module
//!
//! Noise reduction, morphology and local contrast enhancement for card images.
//! The bilateral filter feeds the OCR variants; Gaussian, median and CLAHE are
//! used by the QR fallback pipeline.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use tracing;

use super::types::{
    ClaheImageResult, DenoiseMethod, DenoisedImageResult, MorphologicalImageResult,
    MorphologicalOperation, PreprocessingError,
};

/// Applies an edge-preserving bilateral filter.
///
/// Each output pixel is a weighted mean of its `diameter`-wide window,
/// weighted by both spatial distance and intensity difference, so flat card
/// backgrounds are smoothed while character edges stay sharp.
///
/// # Arguments
///
/// * `gray` - The single-channel input image
/// * `diameter` - Window size in pixels (9 for card photos)
/// * `sigma_color` - Intensity sigma; larger values mix more dissimilar tones
/// * `sigma_space` - Spatial sigma in pixels
pub fn apply_bilateral_filter(
    gray: &GrayImage,
    diameter: u32,
    sigma_color: f32,
    sigma_space: f32,
) -> Result<DenoisedImageResult, PreprocessingError> {
    let start_time = std::time::Instant::now();

    if diameter == 0 {
        return Err(PreprocessingError::InvalidParameter {
            name: "diameter",
            message: "must be greater than 0".to_string(),
        });
    }
    if sigma_color <= 0.0 || sigma_space <= 0.0 {
        return Err(PreprocessingError::InvalidParameter {
            name: "sigma",
            message: format!(
                "sigma_color ({}) and sigma_space ({}) must be > 0",
                sigma_color, sigma_space
            ),
        });
    }
    if gray.width() == 0 || gray.height() == 0 {
        return Err(PreprocessingError::ProcessingFailed {
            message: "cannot filter an empty image".to_string(),
        });
    }

    let output = imageproc::filter::bilateral_filter(gray, diameter, sigma_color, sigma_space);
    let processing_time = start_time.elapsed();

    tracing::debug!(
        target: "card_preprocessing",
        "Bilateral filter completed in {}ms: diameter={}, sigma_color={}, sigma_space={}",
        processing_time.as_millis(),
        diameter,
        sigma_color,
        sigma_space
    );

    Ok(DenoisedImageResult {
        image: output,
        method: DenoiseMethod::Bilateral {
            diameter,
            sigma_color,
            sigma_space,
        },
        processing_time_ms: processing_time.as_millis() as u32,
    })
}

/// Gaussian blur used before global QR binarization
pub fn apply_gaussian_blur(
    gray: &GrayImage,
    sigma: f32,
) -> Result<DenoisedImageResult, PreprocessingError> {
    let start_time = std::time::Instant::now();

    if sigma <= 0.0 || sigma > 5.0 {
        return Err(PreprocessingError::InvalidParameter {
            name: "sigma",
            message: format!("{} must be between 0.1 and 5.0", sigma),
        });
    }

    let blurred = imageproc::filter::gaussian_blur_f32(gray, sigma);
    let processing_time = start_time.elapsed();

    tracing::debug!(
        target: "card_preprocessing",
        "Gaussian blur completed in {}ms: sigma={:.2}",
        processing_time.as_millis(),
        sigma
    );

    Ok(DenoisedImageResult {
        image: blurred,
        method: DenoiseMethod::Gaussian { sigma },
        processing_time_ms: processing_time.as_millis() as u32,
    })
}

/// Median filter that suppresses speckle noise before contrast equalization
pub fn apply_median_filter(gray: &GrayImage, radius: u32) -> DenoisedImageResult {
    let start_time = std::time::Instant::now();
    let filtered = imageproc::filter::median_filter(gray, radius, radius);
    let processing_time = start_time.elapsed();

    tracing::debug!(
        target: "card_preprocessing",
        "Median filter completed in {}ms: radius={}",
        processing_time.as_millis(),
        radius
    );

    DenoisedImageResult {
        image: filtered,
        method: DenoiseMethod::Median { radius },
        processing_time_ms: processing_time.as_millis() as u32,
    }
}

/// Applies a morphological operation to a binary image with a square
/// structuring element.
///
/// Non-zero pixels are foreground. The element is `(2 * radius + 1)` pixels
/// wide; radius 0 is the 1x1 element and leaves the image unchanged. Radii
/// beyond 255 are clamped.
pub fn apply_morphological_operation(
    gray: &GrayImage,
    operation: MorphologicalOperation,
    radius: u32,
) -> MorphologicalImageResult {
    let start_time = std::time::Instant::now();

    let k = u8::try_from(radius).unwrap_or(u8::MAX);
    let processed = if k == 0 {
        gray.clone()
    } else {
        match operation {
            MorphologicalOperation::Erosion => morphology::erode(gray, Norm::LInf, k),
            MorphologicalOperation::Dilation => morphology::dilate(gray, Norm::LInf, k),
            MorphologicalOperation::Opening => morphology::open(gray, Norm::LInf, k),
            MorphologicalOperation::Closing => morphology::close(gray, Norm::LInf, k),
        }
    };
    let kernel_size = 2 * u32::from(k) + 1;

    let processing_time = start_time.elapsed();

    tracing::debug!(
        target: "card_preprocessing",
        "Morphological operation completed in {}ms: operation={:?}, kernel={}x{}",
        processing_time.as_millis(),
        operation,
        kernel_size,
        kernel_size
    );

    MorphologicalImageResult {
        image: processed,
        operation,
        kernel_size,
        processing_time_ms: processing_time.as_millis() as u32,
    }
}

/// Applies Contrast Limited Adaptive Histogram Equalization (CLAHE) to enhance local contrast.
///
/// CLAHE improves local contrast by applying histogram equalization to small regions
/// (tiles) of the image, with a clip limit to prevent noise amplification. Printed QR
/// codes on glossy cards often sit in a glare patch, which this evens out.
///
/// # Arguments
///
/// * `gray` - The single-channel input image
/// * `clip_limit` - Maximum value for histogram clipping (2.0 for QR recovery)
/// * `tile_grid` - Number of tiles across and down (8x8 for QR recovery)
pub fn apply_clahe(
    gray: &GrayImage,
    clip_limit: f32,
    tile_grid: (u32, u32),
) -> Result<ClaheImageResult, PreprocessingError> {
    let start_time = std::time::Instant::now();

    if clip_limit <= 0.0 {
        return Err(PreprocessingError::InvalidParameter {
            name: "clip_limit",
            message: format!("{} must be > 0.0", clip_limit),
        });
    }

    if tile_grid.0 == 0 || tile_grid.1 == 0 {
        return Err(PreprocessingError::InvalidParameter {
            name: "tile_grid",
            message: "dimensions must be > 0".to_string(),
        });
    }

    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return Err(PreprocessingError::ProcessingFailed {
            message: "cannot equalize an empty image".to_string(),
        });
    }

    // Tile size derived from the grid, never larger than the image
    let tile_width = width.div_ceil(tile_grid.0).max(1);
    let tile_height = height.div_ceil(tile_grid.1).max(1);

    let tiles_x = width.div_ceil(tile_width);
    let tiles_y = height.div_ceil(tile_height);

    let mut output = GrayImage::new(width, height);

    for tile_y in 0..tiles_y {
        for tile_x in 0..tiles_x {
            let start_x = tile_x * tile_width;
            let start_y = tile_y * tile_height;
            let end_x = (start_x + tile_width).min(width);
            let end_y = (start_y + tile_height).min(height);

            let tile = image::imageops::crop_imm(gray, start_x, start_y, end_x - start_x, end_y - start_y)
                .to_image();
            let enhanced_tile = apply_clahe_to_tile(&tile, clip_limit);

            for (x, y, pixel) in enhanced_tile.enumerate_pixels() {
                output.put_pixel(start_x + x, start_y + y, *pixel);
            }
        }
    }

    let processing_time = start_time.elapsed();

    tracing::debug!(
        target: "card_preprocessing",
        "CLAHE applied in {}ms: clip_limit={}, tile_grid={:?}",
        processing_time.as_millis(),
        clip_limit,
        tile_grid
    );

    Ok(ClaheImageResult {
        image: output,
        clip_limit,
        tile_size: (tile_width, tile_height),
        processing_time_ms: processing_time.as_millis() as u32,
    })
}

/// Applies CLAHE to a single tile.
fn apply_clahe_to_tile(tile: &GrayImage, clip_limit: f32) -> GrayImage {
    let (width, height) = tile.dimensions();
    let total_pixels = (width * height) as f32;

    let mut histogram = [0u32; 256];
    for pixel in tile.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    // Clip, then redistribute the excess uniformly
    let clip_limit_pixels = ((clip_limit * (total_pixels / 256.0)).round() as u32).max(1);
    let mut excess_pixels = 0u32;

    for count in &mut histogram {
        if *count > clip_limit_pixels {
            excess_pixels += *count - clip_limit_pixels;
            *count = clip_limit_pixels;
        }
    }

    let uniform_increment = excess_pixels / 256;
    let mut remainder = excess_pixels % 256;

    for count in &mut histogram {
        *count += uniform_increment;
        if remainder > 0 {
            *count += 1;
            remainder -= 1;
        }
    }

    let mut cdf = [0.0f32; 256];
    let mut cumulative = 0.0;
    for i in 0..256 {
        cumulative += histogram[i] as f32 / total_pixels;
        cdf[i] = cumulative;
    }

    let mut result = GrayImage::new(width, height);
    for (x, y, pixel) in tile.enumerate_pixels() {
        let new_intensity = (cdf[pixel[0] as usize] * 255.0).round().clamp(0.0, 255.0) as u8;
        result.put_pixel(x, y, Luma([new_intensity]));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Luma([30])
            } else {
                Luma([220])
            }
        })
    }

    #[test]
    fn test_bilateral_preserves_dimensions_and_flat_regions() {
        let img = GrayImage::from_pixel(30, 20, Luma([140]));
        let result = apply_bilateral_filter(&img, 9, 75.0, 75.0)
            .expect("bilateral filter should succeed on a flat image");

        assert_eq!(result.image.dimensions(), (30, 20));
        assert!(result.image.pixels().all(|p| p[0] == 140));
        assert!(matches!(result.method, DenoiseMethod::Bilateral { diameter: 9, .. }));
    }

    #[test]
    fn test_bilateral_keeps_strong_edges() {
        // Sharp step between 0 and 255; small sigma_color keeps the sides apart
        let img = GrayImage::from_fn(20, 10, |x, _| if x < 10 { Luma([0]) } else { Luma([255]) });
        let result = apply_bilateral_filter(&img, 9, 20.0, 75.0)
            .expect("bilateral filter should succeed");

        assert!(result.image.get_pixel(9, 5)[0] < 10);
        assert!(result.image.get_pixel(10, 5)[0] > 245);
    }

    #[test]
    fn test_bilateral_rejects_invalid_parameters() {
        let img = GrayImage::new(5, 5);
        assert!(apply_bilateral_filter(&img, 0, 75.0, 75.0).is_err());
        assert!(apply_bilateral_filter(&img, 9, 0.0, 75.0).is_err());
        assert!(apply_bilateral_filter(&img, 9, 75.0, -1.0).is_err());
        assert!(matches!(
            apply_bilateral_filter(&GrayImage::new(0, 0), 9, 75.0, 75.0),
            Err(PreprocessingError::ProcessingFailed { .. })
        ));
    }

    #[test]
    fn test_bilateral_smooths_speckle_on_flat_background() {
        let mut img = GrayImage::from_pixel(15, 15, Luma([200]));
        img.put_pixel(7, 7, Luma([180]));
        let result = apply_bilateral_filter(&img, 9, 75.0, 75.0)
            .expect("bilateral filter should succeed");

        let center = result.image.get_pixel(7, 7)[0];
        assert!(center > 190, "speck should be pulled toward background, got {}", center);
    }

    #[test]
    fn test_gaussian_blur_invalid_sigma() {
        let img = GrayImage::new(10, 10);
        assert!(apply_gaussian_blur(&img, 0.0).is_err());
        assert!(apply_gaussian_blur(&img, 6.0).is_err());
        let result = apply_gaussian_blur(&img, 1.1).expect("valid sigma should blur");
        assert_eq!(result.image.dimensions(), (10, 10));
    }

    #[test]
    fn test_median_filter_removes_isolated_speck() {
        let mut img = GrayImage::from_pixel(9, 9, Luma([255]));
        img.put_pixel(4, 4, Luma([0]));
        let result = apply_median_filter(&img, 1);
        assert_eq!(result.image.get_pixel(4, 4)[0], 255);
    }

    #[test]
    fn test_closing_with_unit_element_is_identity() {
        let img = checkerboard(16, 16);
        let result = apply_morphological_operation(&img, MorphologicalOperation::Closing, 0);
        assert_eq!(result.kernel_size, 1);
        assert_eq!(result.image, img);
    }

    #[test]
    fn test_closing_fills_single_pixel_gap() {
        // Dark pixel in a white field disappears after a 3x3 closing
        let mut img = GrayImage::from_pixel(7, 7, Luma([255]));
        img.put_pixel(3, 3, Luma([0]));

        let result = apply_morphological_operation(&img, MorphologicalOperation::Closing, 1);
        assert_eq!(result.kernel_size, 3);
        assert_eq!(result.image.get_pixel(3, 3)[0], 255);
    }

    #[test]
    fn test_erosion_and_dilation_include_borders() {
        let mut img = GrayImage::from_pixel(5, 5, Luma([0]));
        img.put_pixel(0, 0, Luma([255]));

        let dilated = apply_morphological_operation(&img, MorphologicalOperation::Dilation, 1).image;
        assert_eq!(dilated.get_pixel(1, 1)[0], 255);
        assert_eq!(dilated.get_pixel(0, 1)[0], 255);
        assert_eq!(dilated.get_pixel(2, 2)[0], 0);

        let eroded = apply_morphological_operation(&dilated, MorphologicalOperation::Erosion, 1).image;
        assert_eq!(eroded.get_pixel(0, 0)[0], 255);
        assert_eq!(eroded.get_pixel(2, 2)[0], 0);
    }

    #[test]
    fn test_opening_removes_isolated_foreground_pixel() {
        let mut img = GrayImage::from_pixel(9, 9, Luma([0]));
        img.put_pixel(4, 4, Luma([255]));
        for y in 0..3 {
            for x in 0..3 {
                img.put_pixel(x, y, Luma([255]));
            }
        }

        let result = apply_morphological_operation(&img, MorphologicalOperation::Opening, 1);
        assert_eq!(result.kernel_size, 3);
        assert_eq!(result.image.get_pixel(4, 4)[0], 0);
        assert_eq!(result.image.get_pixel(1, 1)[0], 255);
    }

    #[test]
    fn test_apply_clahe_basic() {
        let img = checkerboard(64, 48);
        let result = apply_clahe(&img, 2.0, (8, 8)).expect("CLAHE should succeed");

        assert_eq!(result.clip_limit, 2.0);
        assert_eq!(result.tile_size, (8, 6));
        assert_eq!(result.image.dimensions(), (64, 48));
    }

    #[test]
    fn test_apply_clahe_invalid_parameters() {
        let img = checkerboard(16, 16);
        assert!(apply_clahe(&img, 0.0, (8, 8)).is_err());
        assert!(apply_clahe(&img, 2.0, (0, 8)).is_err());
        assert!(apply_clahe(&GrayImage::new(0, 0), 2.0, (8, 8)).is_err());
    }

    #[test]
    fn test_apply_clahe_small_image_with_large_grid() {
        // More tiles than pixels degrades to 1x1 tiles
        let img = checkerboard(4, 4);
        let result = apply_clahe(&img, 2.0, (8, 8)).expect("CLAHE should succeed");
        assert_eq!(result.tile_size, (1, 1));
        assert_eq!(result.image.dimensions(), (4, 4));
    }

    #[test]
    fn test_apply_clahe_to_tile_stretches_low_contrast() {
        let tile = GrayImage::from_fn(4, 4, |x, y| Luma([100 + (x + y) as u8]));
        let enhanced = apply_clahe_to_tile(&tile, 2.0);

        assert_eq!(enhanced.dimensions(), (4, 4));
        let different = tile
            .pixels()
            .zip(enhanced.pixels())
            .any(|(orig, enh)| orig[0] != enh[0]);
        assert!(different, "CLAHE should modify pixel values");
    }
}
