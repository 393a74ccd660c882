//! # OCR Configuration Module
//!
//! This module defines configuration structures for OCR processing,
//! including the recognition matrix, format limits, and processing parameters.

use serde::{Deserialize, Serialize};

// Constants for OCR configuration
pub const FORMAT_DETECTION_BUFFER_SIZE: usize = 32;
pub const MIN_FORMAT_BYTES: usize = 8;
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB limit for image files
pub const DEFAULT_OCR_TIMEOUT_SECS: u64 = 120;

/// Format-specific file size limits for different image formats
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatSizeLimits {
    /// PNG format limit (higher due to better compression)
    pub png_max: u64,
    /// JPEG format limit (moderate due to lossy compression)
    pub jpeg_max: u64,
    /// BMP format limit (lower due to uncompressed nature)
    pub bmp_max: u64,
    /// TIFF format limit (can be large, multi-page support)
    pub tiff_max: u64,
    /// Minimum file size threshold for quick rejection
    pub min_quick_reject: u64,
}

impl Default for FormatSizeLimits {
    fn default() -> Self {
        Self {
            png_max: 15 * 1024 * 1024,          // 15MB for PNG
            jpeg_max: 10 * 1024 * 1024,         // 10MB for JPEG
            bmp_max: 5 * 1024 * 1024,           // 5MB for BMP
            tiff_max: 20 * 1024 * 1024,         // 20MB for TIFF
            min_quick_reject: 50 * 1024 * 1024, // 50MB quick reject
        }
    }
}

impl FormatSizeLimits {
    /// Size limit that applies to a detected format
    pub fn limit_for(&self, format: image::ImageFormat, fallback: u64) -> u64 {
        match format {
            image::ImageFormat::Png => self.png_max,
            image::ImageFormat::Jpeg => self.jpeg_max,
            image::ImageFormat::Bmp => self.bmp_max,
            image::ImageFormat::Tiff => self.tiff_max,
            _ => fallback,
        }
    }

    /// Validate format size limits
    pub fn validate(&self) -> crate::errors::AppResult<()> {
        if self.png_max == 0 {
            return Err(crate::errors::AppError::Config(
                "png_max must be greater than 0".to_string(),
            ));
        }
        if self.jpeg_max == 0 {
            return Err(crate::errors::AppError::Config(
                "jpeg_max must be greater than 0".to_string(),
            ));
        }
        if self.bmp_max == 0 {
            return Err(crate::errors::AppError::Config(
                "bmp_max must be greater than 0".to_string(),
            ));
        }
        if self.tiff_max == 0 {
            return Err(crate::errors::AppError::Config(
                "tiff_max must be greater than 0".to_string(),
            ));
        }
        if self.min_quick_reject == 0 {
            return Err(crate::errors::AppError::Config(
                "min_quick_reject must be greater than 0".to_string(),
            ));
        }

        // Ensure format limits are reasonable compared to each other
        if self.bmp_max > self.png_max {
            return Err(crate::errors::AppError::Config(format!(
                "bmp_max ({}) should not exceed png_max ({})",
                self.bmp_max, self.png_max
            )));
        }
        if self.jpeg_max > self.png_max {
            return Err(crate::errors::AppError::Config(format!(
                "jpeg_max ({}) should not exceed png_max ({})",
                self.jpeg_max, self.png_max
            )));
        }

        Ok(())
    }
}

/// Page Segmentation Mode for Tesseract OCR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PageSegMode {
    /// Orientation and script detection (OSD) only
    OsdOnly = 0,
    /// Automatic page segmentation with OSD
    AutoOsd = 1,
    /// Automatic page segmentation, no OSD
    AutoNoOsd = 2,
    /// Fully automatic page segmentation
    #[default]
    Auto = 3,
    /// Assume a single column of text
    SingleColumn = 4,
    /// Assume a single uniform block of vertically aligned text
    SingleBlockVert = 5,
    /// Assume a single uniform block of text
    SingleBlock = 6,
    /// Treat the image as a single text line
    SingleLine = 7,
    /// Treat the image as a single word
    SingleWord = 8,
    /// Treat the image as a single word in a circle
    WordInCircle = 9,
    /// Treat the image as a single character
    SingleChar = 10,
    /// Find as much text as possible in no particular order
    SparseText = 11,
    /// Sparse text with OSD
    SparseTextOsd = 12,
    /// Treat the image as a single text line, bypassing hacks that are Tesseract-specific
    RawLine = 13,
}

impl PageSegMode {
    /// Convert PSM mode to string value for Tesseract
    pub fn as_str(&self) -> &'static str {
        match self {
            PageSegMode::OsdOnly => "0",
            PageSegMode::AutoOsd => "1",
            PageSegMode::AutoNoOsd => "2",
            PageSegMode::Auto => "3",
            PageSegMode::SingleColumn => "4",
            PageSegMode::SingleBlockVert => "5",
            PageSegMode::SingleBlock => "6",
            PageSegMode::SingleLine => "7",
            PageSegMode::SingleWord => "8",
            PageSegMode::WordInCircle => "9",
            PageSegMode::SingleChar => "10",
            PageSegMode::SparseText => "11",
            PageSegMode::SparseTextOsd => "12",
            PageSegMode::RawLine => "13",
        }
    }
}

/// Tesseract model type for different accuracy/speed trade-offs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModelType {
    /// Fast model (tessdata_fast) - faster processing, lower accuracy
    #[default]
    Fast,
    /// Best model (tessdata_best) - slower processing, higher accuracy
    Best,
}

impl ModelType {
    /// Get the tessdata directory name for this model type
    pub fn tessdata_dir(&self) -> &'static str {
        match self {
            ModelType::Fast => "tessdata_fast",
            ModelType::Best => "tessdata_best",
        }
    }
}

impl std::str::FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fast" => Ok(ModelType::Fast),
            "best" => Ok(ModelType::Best),
            other => Err(format!("unknown OCR model type '{}'", other)),
        }
    }
}

/// One cell of the recognition matrix: a language set plus a layout mode
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Tesseract language codes joined with '+'
    pub languages: String,
    pub psm: PageSegMode,
}

impl RecognitionConfig {
    pub fn new(languages: &str, psm: PageSegMode) -> Self {
        Self {
            languages: languages.to_string(),
            psm,
        }
    }

    /// Short label used in logs and metrics, e.g. `jpn+eng/psm3`
    pub fn label(&self) -> String {
        format!("{}/psm{}", self.languages, self.psm.as_str())
    }

    /// The five configurations every preprocessed variant is recognized with
    pub fn default_matrix() -> Vec<RecognitionConfig> {
        vec![
            RecognitionConfig::new("jpn+eng", PageSegMode::Auto),
            RecognitionConfig::new("jpn", PageSegMode::Auto),
            RecognitionConfig::new("eng", PageSegMode::Auto),
            RecognitionConfig::new("jpn+eng", PageSegMode::AutoOsd),
            RecognitionConfig::new("jpn+eng", PageSegMode::SingleBlock),
        ]
    }
}

/// Configuration structure for OCR processing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Tesseract model type (Fast vs Best accuracy)
    pub model_type: ModelType,
    /// Explicit tessdata directory; searched for by model type when unset
    pub tessdata_path: Option<String>,
    /// Language/layout combinations run against every image variant
    pub recognition_matrix: Vec<RecognitionConfig>,
    /// Buffer size for format detection in bytes
    pub buffer_size: usize,
    /// Minimum bytes required for format detection
    pub min_format_bytes: usize,
    /// Maximum allowed file size in bytes (general limit)
    pub max_file_size: u64,
    /// Format-specific size limits
    pub format_limits: FormatSizeLimits,
    /// Timeout for the whole OCR matrix in seconds
    pub operation_timeout_secs: u64,
    /// Upper bound on concurrent OCR passes; defaults to available cores
    pub max_workers: Option<usize>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            model_type: ModelType::default(),
            tessdata_path: None,
            recognition_matrix: RecognitionConfig::default_matrix(),
            buffer_size: FORMAT_DETECTION_BUFFER_SIZE,
            min_format_bytes: MIN_FORMAT_BYTES,
            max_file_size: MAX_FILE_SIZE,
            format_limits: FormatSizeLimits::default(),
            operation_timeout_secs: DEFAULT_OCR_TIMEOUT_SECS,
            max_workers: None,
        }
    }
}

impl OcrConfig {
    /// Number of worker threads for a matrix of `jobs` passes
    pub fn worker_count(&self, jobs: usize) -> usize {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.max_workers
            .unwrap_or(available)
            .min(available)
            .min(jobs)
            .max(1)
    }

    /// Validate OCR configuration parameters
    pub fn validate(&self) -> crate::errors::AppResult<()> {
        if self.recognition_matrix.is_empty() {
            return Err(crate::errors::AppError::Config(
                "recognition_matrix cannot be empty".to_string(),
            ));
        }
        for recognition in &self.recognition_matrix {
            if recognition.languages.trim().is_empty() {
                return Err(crate::errors::AppError::Config(
                    "recognition languages cannot be empty".to_string(),
                ));
            }
        }

        // Validate buffer sizes
        if self.buffer_size == 0 {
            return Err(crate::errors::AppError::Config(
                "buffer_size must be greater than 0".to_string(),
            ));
        }
        if self.min_format_bytes == 0 {
            return Err(crate::errors::AppError::Config(
                "min_format_bytes must be greater than 0".to_string(),
            ));
        }
        if self.min_format_bytes > self.buffer_size {
            return Err(crate::errors::AppError::Config(format!(
                "min_format_bytes ({}) cannot exceed buffer_size ({})",
                self.min_format_bytes, self.buffer_size
            )));
        }

        // Validate file size limits
        if self.max_file_size == 0 {
            return Err(crate::errors::AppError::Config(
                "max_file_size must be greater than 0".to_string(),
            ));
        }
        if self.operation_timeout_secs == 0 {
            return Err(crate::errors::AppError::Config(
                "operation_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.max_workers == Some(0) {
            return Err(crate::errors::AppError::Config(
                "max_workers must be greater than 0 when set".to_string(),
            ));
        }

        self.format_limits.validate()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(unused_assignments)]
    fn test_format_size_limits_validation() {
        let mut config = FormatSizeLimits::default();

        // Valid config should pass
        assert!(config.validate().is_ok());

        // Test invalid png_max
        config.png_max = 0;
        assert!(config.validate().is_err());
        config.png_max = 15 * 1024 * 1024;

        // Test invalid jpeg_max
        config.jpeg_max = 0;
        assert!(config.validate().is_err());
        config.jpeg_max = 10 * 1024 * 1024;

        // Test bmp_max > png_max
        config.bmp_max = 20 * 1024 * 1024;
        assert!(config.validate().is_err());
        config.bmp_max = 5 * 1024 * 1024;

        // Test jpeg_max > png_max
        config.jpeg_max = 20 * 1024 * 1024;
        assert!(config.validate().is_err());
        config.jpeg_max = 10 * 1024 * 1024;
    }

    #[test]
    fn test_default_matrix_matches_card_layouts() {
        let matrix = RecognitionConfig::default_matrix();
        let labels: Vec<String> = matrix.iter().map(|c| c.label()).collect();
        assert_eq!(
            labels,
            vec![
                "jpn+eng/psm3",
                "jpn/psm3",
                "eng/psm3",
                "jpn+eng/psm1",
                "jpn+eng/psm6"
            ]
        );
    }

    #[test]
    fn test_ocr_config_validation() {
        let mut config = OcrConfig::default();
        assert!(config.validate().is_ok());

        config.recognition_matrix.clear();
        assert!(config.validate().is_err());
        config.recognition_matrix = RecognitionConfig::default_matrix();

        config.operation_timeout_secs = 0;
        assert!(config.validate().is_err());
        config.operation_timeout_secs = DEFAULT_OCR_TIMEOUT_SECS;

        config.min_format_bytes = 64;
        assert!(config.validate().is_err());
        config.min_format_bytes = MIN_FORMAT_BYTES;

        config.max_workers = Some(0);
        assert!(config.validate().is_err());
        config.max_workers = Some(2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_worker_count_bounds() {
        let config = OcrConfig {
            max_workers: Some(4),
            ..Default::default()
        };
        assert_eq!(config.worker_count(1), 1);
        assert!(config.worker_count(25) <= 4);
        assert!(config.worker_count(25) >= 1);
        assert_eq!(config.worker_count(0), 1);
    }

    #[test]
    fn test_model_type_enum_values() {
        assert_eq!(ModelType::Fast.tessdata_dir(), "tessdata_fast");
        assert_eq!(ModelType::Best.tessdata_dir(), "tessdata_best");
        assert_eq!("BEST".parse::<ModelType>(), Ok(ModelType::Best));
        assert!("medium".parse::<ModelType>().is_err());
    }

    #[test]
    fn test_format_limit_lookup() {
        let limits = FormatSizeLimits::default();
        assert_eq!(limits.limit_for(image::ImageFormat::Png, 1), limits.png_max);
        assert_eq!(limits.limit_for(image::ImageFormat::Gif, 7), 7);
    }
}
