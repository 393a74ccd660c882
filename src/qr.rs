//! # QR Code Module
//!
//! Recovers a QR payload from a business card image with an escalating set of
//! strategies, and classifies what kind of payload it is.
//!
//! Strategies, first non-empty result wins:
//! 1. `Binarized`: Gaussian blur then Otsu threshold
//! 2. `Enhanced`: median denoise, CLAHE, Otsu, then closing
//! 3. `Upscaled`: the original image enlarged with a cubic filter
//!
//! Decoding never fails; an undecodable image yields `None`.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::diagnostics::{DiagnosticSink, NoopDiagnosticSink};
use crate::errors::{AppError, AppResult};
use crate::preprocessing::{
    apply_clahe, apply_gaussian_blur, apply_median_filter, apply_morphological_operation,
    apply_otsu_threshold, MorphologicalOperation, PreprocessingError,
};

/// Platform URL prefixes recognised by default
pub const DEFAULT_PLATFORM_URL_PATTERNS: [&str; 2] =
    ["https://sasaeai.link-platform.jp/", "https://sasaeai.com/"];

/// Sigma of a 5x5 Gaussian kernel
const BINARIZE_BLUR_SIGMA: f32 = 1.1;

/// Name the enhanced image is saved under by the diagnostic sink
pub const QR_PREPROCESSED_IMAGE_NAME: &str = "qr_preprocessed";

/// A QR detection backend
pub trait QrBackend: Send + Sync {
    /// Decode every readable code in the image
    fn decode_all(&self, image: &GrayImage) -> Vec<String>;

    /// Decode the first readable code
    fn decode(&self, image: &GrayImage) -> Option<String> {
        self.decode_all(image).into_iter().next()
    }
}

/// Pure-Rust QR detection via `rqrr`
#[derive(Debug, Clone, Copy, Default)]
pub struct RqrrBackend;

impl QrBackend for RqrrBackend {
    fn decode_all(&self, image: &GrayImage) -> Vec<String> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }
        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
                image.get_pixel(x as u32, y as u32)[0]
            });
        prepared
            .detect_grids()
            .into_iter()
            .filter_map(|grid| match grid.decode() {
                Ok((_, content)) => Some(content),
                Err(e) => {
                    debug!(error = %e, "QR grid detected but not decodable");
                    None
                }
            })
            .filter(|content| !content.is_empty())
            .collect()
    }
}

/// Which strategy produced a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QrStrategy {
    Binarized,
    Enhanced,
    Upscaled,
}

impl QrStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            QrStrategy::Binarized => "binarized",
            QrStrategy::Enhanced => "enhanced",
            QrStrategy::Upscaled => "upscaled",
        }
    }
}

/// Classification of a decoded payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QrPayloadKind {
    /// URL of the known contact platform
    PlatformUrl,
    /// Any other http(s) URL
    Url,
    Text,
}

/// A non-empty QR payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrPayload {
    pub text: String,
    pub kind: QrPayloadKind,
    pub strategy: QrStrategy,
}

impl QrPayload {
    /// Returns `None` for an empty payload
    pub fn new(text: impl Into<String>, kind: QrPayloadKind, strategy: QrStrategy) -> Option<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return None;
        }
        Some(Self {
            text,
            kind,
            strategy,
        })
    }

    pub fn is_platform_url(&self) -> bool {
        self.kind == QrPayloadKind::PlatformUrl
    }
}

/// Configuration for QR decoding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrConfig {
    /// URL prefixes classified as platform URLs
    pub platform_url_patterns: Vec<String>,
    /// Scale applied by the last strategy
    pub upscale_factor: u32,
    pub clahe_clip_limit: f32,
    /// CLAHE tile grid (columns, rows)
    pub clahe_tile_grid: (u32, u32),
    /// Structuring element radius of the closing step (1 = 3x3)
    pub close_radius: u32,
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            platform_url_patterns: DEFAULT_PLATFORM_URL_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            upscale_factor: 2,
            clahe_clip_limit: 2.0,
            clahe_tile_grid: (8, 8),
            close_radius: 1,
        }
    }
}

impl QrConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.platform_url_patterns.iter().any(|p| p.trim().is_empty()) {
            return Err(AppError::Config(
                "platform_url_patterns cannot contain empty patterns".to_string(),
            ));
        }
        if !(2..=4).contains(&self.upscale_factor) {
            return Err(AppError::Config(format!(
                "upscale_factor must be between 2 and 4, got {}",
                self.upscale_factor
            )));
        }
        if self.clahe_clip_limit <= 0.0 {
            return Err(AppError::Config(
                "clahe_clip_limit must be positive".to_string(),
            ));
        }
        if self.clahe_tile_grid.0 == 0 || self.clahe_tile_grid.1 == 0 {
            return Err(AppError::Config(
                "clahe_tile_grid dimensions must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Classify a payload against the configured platform patterns
    pub fn classify(&self, text: &str) -> QrPayloadKind {
        let text = text.trim();
        if self
            .platform_url_patterns
            .iter()
            .any(|pattern| text.starts_with(pattern.as_str()))
        {
            QrPayloadKind::PlatformUrl
        } else if text.starts_with("http://") || text.starts_with("https://") {
            QrPayloadKind::Url
        } else {
            QrPayloadKind::Text
        }
    }
}

/// Escalating QR decoder
pub struct QrDecoder {
    backend: Arc<dyn QrBackend>,
    config: QrConfig,
    sink: Arc<dyn DiagnosticSink>,
}

impl QrDecoder {
    pub fn new(backend: Arc<dyn QrBackend>, config: QrConfig) -> Self {
        Self {
            backend,
            config,
            sink: Arc::new(NoopDiagnosticSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &QrConfig {
        &self.config
    }

    /// Try each strategy in turn; `run_id` scopes the diagnostic output
    pub fn decode(&self, image: &DynamicImage, run_id: &str) -> Option<QrPayload> {
        if image.width() == 0 || image.height() == 0 {
            return None;
        }
        let gray = image.to_luma8();

        match binarize(&gray) {
            Ok(binary) => {
                if let Some(payload) = self.attempt(&binary, QrStrategy::Binarized) {
                    return Some(payload);
                }
            }
            Err(e) => warn!(error = %e, "QR binarization failed"),
        }

        match enhance(&gray, &self.config) {
            Ok(enhanced) => {
                let found = self.attempt(&enhanced, QrStrategy::Enhanced);
                self.sink.save_image(
                    run_id,
                    QR_PREPROCESSED_IMAGE_NAME,
                    &DynamicImage::ImageLuma8(enhanced),
                );
                if found.is_some() {
                    self.sink
                        .append_report(run_id, "QR code detected on the enhanced image");
                    return found;
                }
            }
            Err(e) => warn!(error = %e, "QR enhancement failed"),
        }

        let upscaled = upscale(image, self.config.upscale_factor);
        if let Some(payload) = self.attempt(&upscaled, QrStrategy::Upscaled) {
            return Some(payload);
        }

        self.sink.append_report(run_id, "QR code not detected");
        metrics::counter!("qr_decode_total", "strategy" => "none").increment(1);
        info!("No QR code found on the binarized, enhanced or upscaled image");
        None
    }

    /// Every code readable on the binarized image
    pub fn decode_all(&self, image: &DynamicImage) -> Vec<QrPayload> {
        if image.width() == 0 || image.height() == 0 {
            return Vec::new();
        }
        let gray = image.to_luma8();
        let binary = match binarize(&gray) {
            Ok(binary) => binary,
            Err(e) => {
                warn!(error = %e, "QR binarization failed");
                return Vec::new();
            }
        };
        self.backend
            .decode_all(&binary)
            .into_iter()
            .filter_map(|text| {
                let kind = self.config.classify(&text);
                QrPayload::new(text, kind, QrStrategy::Binarized)
            })
            .collect()
    }

    fn attempt(&self, image: &GrayImage, strategy: QrStrategy) -> Option<QrPayload> {
        let text = self.backend.decode(image)?;
        let kind = self.config.classify(&text);
        let payload = QrPayload::new(text, kind, strategy)?;

        metrics::counter!("qr_decode_total", "strategy" => strategy.as_str()).increment(1);
        let preview: String = payload.text.chars().take(30).collect();
        info!(
            strategy = strategy.as_str(),
            kind = ?payload.kind,
            "QR code detected: {preview}"
        );
        Some(payload)
    }
}

/// Gaussian blur then Otsu
fn binarize(gray: &GrayImage) -> Result<GrayImage, PreprocessingError> {
    let blurred = apply_gaussian_blur(gray, BINARIZE_BLUR_SIGMA)?.image;
    Ok(apply_otsu_threshold(&blurred)?.image)
}

/// Median denoise, CLAHE, Otsu, closing
fn enhance(gray: &GrayImage, config: &QrConfig) -> Result<GrayImage, PreprocessingError> {
    let denoised = apply_median_filter(gray, 1).image;
    let equalized = apply_clahe(&denoised, config.clahe_clip_limit, config.clahe_tile_grid)?.image;
    let binary = apply_otsu_threshold(&equalized)?.image;
    Ok(apply_morphological_operation(&binary, MorphologicalOperation::Closing, config.close_radius).image)
}

fn upscale(image: &DynamicImage, factor: u32) -> GrayImage {
    let enlarged = image::imageops::resize(
        &image.to_rgb8(),
        image.width() * factor,
        image.height() * factor,
        FilterType::CatmullRom,
    );
    DynamicImage::ImageRgb8(enlarged).to_luma8()
}
