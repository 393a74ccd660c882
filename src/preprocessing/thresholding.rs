//! # Image Thresholding Module
//!
//! Binary thresholding for OCR and QR preprocessing: Otsu's method for a single
//! global threshold, and a Gaussian-weighted adaptive threshold for unevenly lit cards.

use image::{GrayImage, Luma};
use tracing;

use super::types::{AdaptiveThresholdResult, PreprocessingError, ThresholdedImageResult};

/// Applies Otsu's thresholding algorithm to convert an image to binary (black/white).
///
/// This function automatically determines the optimal threshold value using Otsu's method,
/// which maximizes the between-class variance. Pixels brighter than the threshold become
/// white, everything else black.
///
/// # Arguments
///
/// * `gray` - The single-channel input image
///
/// # Returns
///
/// Returns a `Result` containing the thresholded image and metadata, or a `PreprocessingError`
/// when the image has no pixels
///
/// # Examples
///
/// ```no_run
/// use card_extract::preprocessing::apply_otsu_threshold;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let gray = image::open("card.jpg")?.to_luma8();
/// let thresholded = apply_otsu_threshold(&gray)?;
/// println!("Optimal threshold: {}", thresholded.threshold);
/// # Ok(())
/// # }
/// ```
pub fn apply_otsu_threshold(gray: &GrayImage) -> Result<ThresholdedImageResult, PreprocessingError> {
    let start_time = std::time::Instant::now();

    // Calculate histogram
    let mut histogram = [0u32; 256];
    let total_pixels = (gray.width() as u64 * gray.height() as u64) as f64;

    for pixel in gray.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    // Find optimal threshold using Otsu's method
    let optimal_threshold = find_otsu_threshold(&histogram, total_pixels)?;

    // Apply binary thresholding
    let mut binary_img = GrayImage::new(gray.width(), gray.height());

    for (x, y, pixel) in gray.enumerate_pixels() {
        let binary_value = if pixel[0] > optimal_threshold { 255u8 } else { 0u8 };
        binary_img.put_pixel(x, y, Luma([binary_value]));
    }

    let processing_time = start_time.elapsed();

    tracing::debug!(
        target: "card_preprocessing",
        "Otsu thresholding completed in {}ms: threshold={}, dimensions={}x{}",
        processing_time.as_millis(),
        optimal_threshold,
        gray.width(),
        gray.height()
    );

    Ok(ThresholdedImageResult {
        image: binary_img,
        threshold: optimal_threshold,
        processing_time_ms: processing_time.as_millis() as u32,
    })
}

/// Finds the optimal threshold using Otsu's method by maximizing between-class variance.
///
/// # Arguments
///
/// * `histogram` - The 256-bin histogram of pixel intensities
/// * `total_pixels` - Total number of pixels in the image
fn find_otsu_threshold(
    histogram: &[u32; 256],
    total_pixels: f64,
) -> Result<u8, PreprocessingError> {
    if total_pixels <= 0.0 {
        return Err(PreprocessingError::ProcessingFailed {
            message: "cannot compute Otsu threshold of an empty image".to_string(),
        });
    }

    // Pre-calculate cumulative statistics
    let mut cumulative_sum = 0f64;
    let mut cumulative_weighted_sum = 0f64;
    let mut cumulative_sums = [0f64; 256];
    let mut cumulative_weighted_sums = [0f64; 256];

    for i in 0..256 {
        let pixel_count = histogram[i] as f64;
        cumulative_sum += pixel_count;
        cumulative_weighted_sum += (i as f64) * pixel_count;

        cumulative_sums[i] = cumulative_sum;
        cumulative_weighted_sums[i] = cumulative_weighted_sum;
    }

    // Find optimal threshold by maximizing between-class variance
    let mut max_variance = 0f64;
    let mut optimal_threshold = 128u8; // Fallback for single-class images

    let total_weighted_sum = cumulative_weighted_sums[255];

    for threshold_idx in 0..255usize {
        // Weight of background class (pixels <= threshold)
        let w0 = cumulative_sums[threshold_idx] / total_pixels;
        let w1 = 1.0 - w0;

        if w0 == 0.0 || w1 <= 0.0 {
            continue;
        }

        let mu0 = cumulative_weighted_sums[threshold_idx] / cumulative_sums[threshold_idx];
        let mu1 = (total_weighted_sum - cumulative_weighted_sums[threshold_idx])
            / (cumulative_sums[255] - cumulative_sums[threshold_idx]);

        // Between-class variance
        let variance = w0 * w1 * (mu0 - mu1).powi(2);

        if variance > max_variance {
            max_variance = variance;
            optimal_threshold = threshold_idx as u8;
        }
    }

    Ok(optimal_threshold)
}

/// Sigma of the Gaussian window for a given block size.
///
/// Uses the conventional `0.3 * ((size - 1) * 0.5 - 1) + 0.8` relation, which
/// gives 2.0 for an 11-pixel block.
pub fn gaussian_sigma_for_block(block_size: u32) -> f32 {
    0.3 * ((block_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Applies a Gaussian-weighted adaptive threshold.
///
/// Each pixel is compared with the Gaussian-weighted mean of its
/// `block_size` x `block_size` neighbourhood minus `c`; brighter pixels become white.
/// Borders replicate the edge pixels.
pub fn apply_adaptive_gaussian_threshold(
    gray: &GrayImage,
    block_size: u32,
    c: f32,
) -> Result<AdaptiveThresholdResult, PreprocessingError> {
    let start_time = std::time::Instant::now();

    if block_size < 3 || block_size % 2 == 0 {
        return Err(PreprocessingError::InvalidParameter {
            name: "block_size",
            message: format!("{} must be odd and at least 3", block_size),
        });
    }
    if gray.width() == 0 || gray.height() == 0 {
        return Err(PreprocessingError::ProcessingFailed {
            message: "cannot threshold an empty image".to_string(),
        });
    }

    let kernel = gaussian_kernel(block_size, gaussian_sigma_for_block(block_size));
    let local_mean = separable_convolve(gray, &kernel);

    let (width, height) = gray.dimensions();
    let mut output = GrayImage::new(width, height);
    for (x, y, pixel) in gray.enumerate_pixels() {
        let mean = local_mean[(y * width + x) as usize].round();
        let value = if pixel[0] as f32 > mean - c { 255u8 } else { 0u8 };
        output.put_pixel(x, y, Luma([value]));
    }

    let processing_time = start_time.elapsed();

    tracing::debug!(
        target: "card_preprocessing",
        "Adaptive threshold completed in {}ms: block_size={}, c={}",
        processing_time.as_millis(),
        block_size,
        c
    );

    Ok(AdaptiveThresholdResult {
        image: output,
        block_size,
        c,
        processing_time_ms: processing_time.as_millis() as u32,
    })
}

/// Normalized 1-D Gaussian kernel of odd length `size`
fn gaussian_kernel(size: u32, sigma: f32) -> Vec<f32> {
    let radius = (size / 2) as i32;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / denom).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for weight in &mut kernel {
        *weight /= sum;
    }
    kernel
}

/// Horizontal then vertical pass with replicated borders; returns row-major means
fn separable_convolve(gray: &GrayImage, kernel: &[f32]) -> Vec<f32> {
    let (width, height) = gray.dimensions();
    let (w, h) = (width as i64, height as i64);
    let radius = (kernel.len() / 2) as i64;

    let mut horizontal = vec![0f32; (width * height) as usize];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = (x + k as i64 - radius).clamp(0, w - 1);
                acc += weight * gray.get_pixel(sx as u32, y as u32)[0] as f32;
            }
            horizontal[(y * w + x) as usize] = acc;
        }
    }

    let mut vertical = vec![0f32; (width * height) as usize];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = (y + k as i64 - radius).clamp(0, h - 1);
                acc += weight * horizontal[(sy * w + x) as usize];
            }
            vertical[(y * w + x) as usize] = acc;
        }
    }

    vertical
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tone_image() -> GrayImage {
        let mut img = GrayImage::new(10, 10);
        for y in 0..10 {
            for x in 0..10 {
                let value = if x < 5 { 25 } else { 225 };
                img.put_pixel(x, y, Luma([value]));
            }
        }
        img
    }

    #[test]
    fn test_apply_otsu_threshold_simple_image() {
        let result = apply_otsu_threshold(&two_tone_image())
            .expect("apply_otsu_threshold should succeed with valid grayscale image");

        // Threshold separates the two tones
        assert!(result.threshold >= 25 && result.threshold < 225);

        // Check that result image is binary (only 0 or 255 values)
        for pixel in result.image.pixels() {
            assert!(pixel[0] == 0 || pixel[0] == 255);
        }
        assert_eq!(result.image.get_pixel(0, 0)[0], 0);
        assert_eq!(result.image.get_pixel(9, 9)[0], 255);
    }

    #[test]
    fn test_apply_otsu_threshold_empty_image_fails() {
        let img = GrayImage::new(0, 0);
        assert!(apply_otsu_threshold(&img).is_err());
    }

    #[test]
    fn test_find_otsu_threshold_basic() {
        let mut histogram = [0u32; 256];
        histogram[25] = 5000; // Dark class at intensity 25
        histogram[225] = 5000; // Light class at intensity 225

        let threshold = find_otsu_threshold(&histogram, 10000.0)
            .expect("find_otsu_threshold should succeed with valid histogram");

        assert!((25..225).contains(&threshold));
    }

    #[test]
    fn test_find_otsu_threshold_single_class() {
        let mut histogram = [0u32; 256];
        histogram[128] = 100;

        let threshold = find_otsu_threshold(&histogram, 100.0)
            .expect("find_otsu_threshold should succeed with single class histogram");
        assert_eq!(threshold, 128);
    }

    #[test]
    fn test_gaussian_sigma_for_block() {
        assert!((gaussian_sigma_for_block(11) - 2.0).abs() < 1e-6);
        assert!((gaussian_sigma_for_block(5) - 1.1).abs() < 1e-6);
    }

    #[test]
    fn test_gaussian_kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(11, 2.0);
        assert_eq!(kernel.len(), 11);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!((kernel[0] - kernel[10]).abs() < 1e-7);
        assert!(kernel[5] > kernel[4]);
    }

    #[test]
    fn test_adaptive_threshold_uniform_image_is_white() {
        // Every pixel equals its local mean, and mean - c is below it
        let img = GrayImage::from_pixel(20, 20, Luma([120]));
        let result = apply_adaptive_gaussian_threshold(&img, 11, 2.0)
            .expect("adaptive threshold should succeed");
        assert!(result.image.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn test_adaptive_threshold_picks_out_dark_stroke() {
        let mut img = GrayImage::from_pixel(21, 21, Luma([200]));
        for y in 0..21 {
            img.put_pixel(10, y, Luma([20]));
        }

        let result = apply_adaptive_gaussian_threshold(&img, 11, 2.0)
            .expect("adaptive threshold should succeed");
        assert_eq!(result.image.get_pixel(10, 10)[0], 0);
        assert_eq!(result.image.get_pixel(2, 10)[0], 255);
        assert_eq!(result.image.dimensions(), (21, 21));
    }

    #[test]
    fn test_adaptive_threshold_rejects_even_block() {
        let img = GrayImage::from_pixel(5, 5, Luma([0]));
        assert!(apply_adaptive_gaussian_threshold(&img, 10, 2.0).is_err());
        assert!(apply_adaptive_gaussian_threshold(&img, 1, 2.0).is_err());
    }
}
