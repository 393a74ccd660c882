//! # OCR Processing Module
//!
//! This module provides optical character recognition (OCR) functionality for extracting
//! text from business card images using the Tesseract OCR engine.
//!
//! ## Features
//!
//! - Input validation with automatic image format detection
//! - A pluggable [`TextRecognizer`] seam, with a Tesseract implementation
//! - A multi-pass engine that runs every preprocessed variant through every
//!   configuration of the recognition matrix, in parallel
//!
//! ## Supported Image Formats
//!
//! - PNG (Portable Network Graphics)
//! - JPEG/JPG (Joint Photographic Experts Group)
//! - BMP (Bitmap)
//! - TIFF/TIF (Tagged Image File Format)
//! - WebP, GIF and other formats the `image` crate decodes

use image::{DynamicImage, GrayImage};
use std::fs::File;
use std::io::{BufReader, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use crate::instance_manager::OcrInstanceManager;
pub use crate::ocr_config::{OcrConfig, RecognitionConfig};
pub use crate::ocr_errors::OcrError;
use crate::preprocessing::{ImageVariant, ImageVariantSet};

/// Text reported when no OCR pass produced any output
pub const NO_TEXT_SENTINEL: &str = "text extraction failed, try another image";

/// Validate an image file before decoding it
///
/// Checks that the path exists and is a non-empty file, that the leading bytes
/// identify an image format, and that the file is within the format's size limit.
pub fn validate_image_with_format_limits(
    image_path: &str,
    config: &OcrConfig,
) -> Result<image::ImageFormat, OcrError> {
    let path = std::path::Path::new(image_path);

    if !path.exists() {
        return Err(OcrError::Validation(format!(
            "file does not exist ({})",
            image_path
        )));
    }

    if !path.is_file() {
        return Err(OcrError::Validation(format!(
            "path is not a file ({})",
            image_path
        )));
    }

    let file_size = path
        .metadata()
        .map_err(|e| {
            OcrError::Validation(format!(
                "cannot read file metadata ({}) - {}",
                image_path, e
            ))
        })?
        .len();

    if file_size == 0 {
        return Err(OcrError::Validation(format!(
            "file is empty ({})",
            image_path
        )));
    }

    // Quick rejection for extremely large files
    if file_size > config.format_limits.min_quick_reject {
        info!(
            "Quick rejecting file {image_path}: {file_size} bytes exceeds quick reject threshold"
        );
        return Err(OcrError::Validation(format!(
            "file too large for processing: {} bytes (exceeds quick reject threshold of {} bytes)",
            file_size, config.format_limits.min_quick_reject
        )));
    }

    let file = File::open(image_path).map_err(|e| {
        OcrError::Validation(format!(
            "cannot open image file ({}) - {}",
            image_path, e
        ))
    })?;
    let mut reader = BufReader::new(file);
    let mut buffer = vec![0; config.buffer_size];

    let bytes_read = reader.read(&mut buffer).map_err(|e| {
        OcrError::Validation(format!(
            "cannot read image header ({}) - {}",
            image_path, e
        ))
    })?;

    if bytes_read < config.min_format_bytes {
        return Err(OcrError::Validation(format!(
            "file too short to be an image: read {} bytes, need at least {}",
            bytes_read, config.min_format_bytes
        )));
    }
    buffer.truncate(bytes_read);

    let format = image::guess_format(&buffer).map_err(|e| {
        OcrError::Validation(format!(
            "unrecognized image format ({}) - {}",
            image_path, e
        ))
    })?;

    let format_limit = config
        .format_limits
        .limit_for(format, config.max_file_size);
    if file_size > format_limit {
        return Err(OcrError::Validation(format!(
            "image file too large for {:?} format: {} bytes (maximum allowed: {} bytes)",
            format, file_size, format_limit
        )));
    }

    debug!(
        image_path = %image_path,
        format = ?format,
        file_size_bytes = file_size,
        "Image validated"
    );

    Ok(format)
}

/// Decode an image file into memory
pub fn load_image(image_path: &str) -> Result<DynamicImage, OcrError> {
    image::open(image_path).map_err(|e| {
        OcrError::ImageLoad(format!("failed to decode image ({}): {}", image_path, e))
    })
}

/// Trim every line and drop blank ones
pub fn clean_ocr_text(raw: &str) -> String {
    raw.trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<&str>>()
        .join("\n")
}

/// A text-recognition backend.
///
/// Implementations must be callable from several threads at once.
pub trait TextRecognizer: Send + Sync {
    /// Recognize text in a single-channel image with the given configuration
    fn recognize(&self, image: &GrayImage, config: &RecognitionConfig) -> Result<String, OcrError>;
}

/// Tesseract-backed recognizer that reuses engine instances across passes
pub struct TesseractRecognizer {
    manager: OcrInstanceManager,
}

impl TesseractRecognizer {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            manager: OcrInstanceManager::new(config.model_type, config.tessdata_path.clone()),
        }
    }

    pub fn instance_manager(&self) -> &OcrInstanceManager {
        &self.manager
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(&self, image: &GrayImage, config: &RecognitionConfig) -> Result<String, OcrError> {
        let instance = self.manager.get_instance(config)?;

        // Tesseract reads from disk; hand it a scratch PNG of the variant
        let scratch = tempfile::Builder::new()
            .prefix("card-ocr-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| OcrError::ImageLoad(format!("failed to create scratch file: {e}")))?;
        image
            .save_with_format(scratch.path(), image::ImageFormat::Png)
            .map_err(|e| OcrError::ImageLoad(format!("failed to write scratch image: {e}")))?;

        let extracted_text = {
            let mut tess = instance.lock();
            tess.set_image(scratch.path()).map_err(|e| {
                OcrError::ImageLoad(format!("Failed to load image for OCR: {e}"))
            })?;

            tess.get_utf8_text().map_err(|e| {
                OcrError::Extraction(format!("Failed to extract text from image: {e}"))
            })?
        };

        Ok(clean_ocr_text(&extracted_text))
    }
}

/// One non-empty OCR pass
#[derive(Debug, Clone, PartialEq)]
pub struct OcrPass {
    pub variant: ImageVariant,
    pub recognition: RecognitionConfig,
    pub text: String,
}

/// Non-empty outputs of the OCR matrix, in evaluation order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrResultSet {
    pub passes: Vec<OcrPass>,
    /// Number of passes that were attempted
    pub attempted: usize,
}

impl OcrResultSet {
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn texts(&self) -> Vec<String> {
        self.passes.iter().map(|pass| pass.text.clone()).collect()
    }

    /// All pass outputs joined by newlines, or [`NO_TEXT_SENTINEL`] when there are none
    pub fn combined_text(&self) -> String {
        if self.passes.is_empty() {
            return NO_TEXT_SENTINEL.to_string();
        }
        self.passes
            .iter()
            .map(|pass| pass.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Runs every OCR variant through every recognition configuration
pub struct MultiPassOcrEngine {
    recognizer: Arc<dyn TextRecognizer>,
    config: OcrConfig,
}

impl MultiPassOcrEngine {
    pub fn new(recognizer: Arc<dyn TextRecognizer>, config: OcrConfig) -> Self {
        Self { recognizer, config }
    }

    pub fn config(&self) -> &OcrConfig {
        &self.config
    }

    /// Run the full matrix over a variant set.
    ///
    /// Individual pass failures and empty outputs are logged and skipped; they
    /// never abort the other passes. When preprocessing degraded to the original
    /// image only, the matrix runs over its grayscale conversion instead.
    pub fn run(&self, variants: &ImageVariantSet) -> OcrResultSet {
        self.run_until_cancelled(variants, &AtomicBool::new(false))
    }

    /// Like [`run`](Self::run), but stops handing out passes once `cancel` is
    /// set. Passes already in flight finish; the rest are never attempted.
    pub fn run_until_cancelled(
        &self,
        variants: &ImageVariantSet,
        cancel: &AtomicBool,
    ) -> OcrResultSet {
        let span = crate::observability::ocr_span("multi_pass_ocr");
        let _enter = span.enter();
        let start_time = std::time::Instant::now();

        let fallback_gray;
        let mut inputs = variants.ocr_variants();
        if inputs.is_empty() {
            match variants.get(ImageVariant::Original) {
                Some(original) => {
                    warn!("No preprocessed variants available, recognizing the original image");
                    fallback_gray = original.to_luma8();
                    inputs.push((ImageVariant::Original, &fallback_gray));
                }
                None => return OcrResultSet::default(),
            }
        }

        let jobs: Vec<(ImageVariant, &GrayImage, &RecognitionConfig)> = inputs
            .iter()
            .flat_map(|(variant, image)| {
                self.config
                    .recognition_matrix
                    .iter()
                    .map(move |recognition| (*variant, *image, recognition))
            })
            .collect();

        let workers = self.config.worker_count(jobs.len());
        let outcomes = self.run_jobs(&jobs, workers, cancel);
        let cancelled = cancel.load(Ordering::Relaxed);
        let attempted = if cancelled {
            outcomes.iter().filter(|outcome| outcome.is_some()).count()
        } else {
            jobs.len()
        };

        let mut passes = Vec::new();
        for (index, outcome) in outcomes.into_iter().enumerate() {
            let (variant, _, recognition) = jobs[index];
            match outcome {
                Some(Ok(text)) if !text.trim().is_empty() => {
                    metrics::counter!("ocr_passes_total", "result" => "success").increment(1);
                    passes.push(OcrPass {
                        variant,
                        recognition: recognition.clone(),
                        text,
                    });
                }
                Some(Ok(_)) => {
                    metrics::counter!("ocr_passes_total", "result" => "empty").increment(1);
                    warn!(
                        variant = %variant,
                        config = %recognition.label(),
                        "OCR pass produced no text"
                    );
                }
                Some(Err(e)) => {
                    metrics::counter!("ocr_passes_total", "result" => "failure").increment(1);
                    warn!(
                        variant = %variant,
                        config = %recognition.label(),
                        error = %e,
                        "OCR pass failed"
                    );
                }
                None if cancelled => {
                    metrics::counter!("ocr_passes_total", "result" => "cancelled").increment(1);
                }
                None => {
                    metrics::counter!("ocr_passes_total", "result" => "failure").increment(1);
                    warn!(
                        variant = %variant,
                        config = %recognition.label(),
                        "OCR pass did not complete"
                    );
                }
            }
        }

        let duration = start_time.elapsed();
        metrics::histogram!("ocr_duration_seconds").record(duration.as_secs_f64());
        if cancelled {
            warn!(
                attempted,
                skipped = jobs.len() - attempted,
                duration_ms = duration.as_millis() as u64,
                "OCR matrix cancelled"
            );
        } else {
            info!(
                attempted,
                non_empty = passes.len(),
                workers,
                duration_ms = duration.as_millis() as u64,
                "OCR matrix completed"
            );
        }

        OcrResultSet { passes, attempted }
    }

    /// Work-stealing over a shared job index; results land in job order.
    /// Jobs never taken because of `cancel` stay `None`.
    fn run_jobs(
        &self,
        jobs: &[(ImageVariant, &GrayImage, &RecognitionConfig)],
        workers: usize,
        cancel: &AtomicBool,
    ) -> Vec<Option<Result<String, OcrError>>> {
        let mut outcomes: Vec<Option<Result<String, OcrError>>> = vec![None; jobs.len()];
        let next_job = AtomicUsize::new(0);

        let next_job = &next_job;
        let recognizer = &self.recognizer;

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(move || {
                        let mut finished = Vec::new();
                        loop {
                            if cancel.load(Ordering::Relaxed) {
                                break;
                            }
                            let index = next_job.fetch_add(1, Ordering::Relaxed);
                            let Some((_, image, recognition)) = jobs.get(index) else {
                                break;
                            };
                            finished.push((index, recognizer.recognize(image, recognition)));
                        }
                        finished
                    })
                })
                .collect();

            for handle in handles {
                match handle.join() {
                    Ok(finished) => {
                        for (index, outcome) in finished {
                            outcomes[index] = Some(outcome);
                        }
                    }
                    Err(_) => warn!("OCR worker thread panicked"),
                }
            }
        });

        outcomes
    }
}
