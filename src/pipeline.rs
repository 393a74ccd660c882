//! # Card Pipeline
//!
//! Wires the stages together for one image: validation, preprocessing and
//! multi-pass OCR on one blocking task, QR decoding on another, then
//! consolidation, field extraction and normalization.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn, Instrument};

use crate::config::AppConfig;
use crate::deduplication::TextConsolidator;
use crate::diagnostics::{self, DiagnosticSink};
use crate::errors::{error_logging, AppResult, ErrorKind, ExtractionError};
use crate::extractor::{ExtractorError, FieldExtractor};
use crate::llm::{GeminiBackend, GenerativeBackend};
use crate::normalizer::normalize;
use crate::observability::{pipeline_span, record_pipeline_metrics};
use crate::ocr::{
    load_image, validate_image_with_format_limits, MultiPassOcrEngine, OcrError, OcrResultSet,
    TesseractRecognizer, TextRecognizer, NO_TEXT_SENTINEL,
};
use crate::preprocessing::{build_variant_set, ImageVariantSet};
use crate::qr::{QrBackend, QrDecoder, QrPayload, RqrrBackend};
use crate::schema::ContactRecord;

/// End-to-end business card extraction
pub struct CardPipeline {
    config: AppConfig,
    ocr: Arc<MultiPassOcrEngine>,
    qr: Arc<QrDecoder>,
    extractor: FieldExtractor,
    consolidator: TextConsolidator,
    sink: Arc<dyn DiagnosticSink>,
}

impl CardPipeline {
    /// Build the production pipeline: Tesseract, rqrr and the Gemini backend
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        config.validate()?;

        let recognizer: Arc<dyn TextRecognizer> = Arc::new(TesseractRecognizer::new(&config.ocr));
        let backend: Arc<dyn GenerativeBackend> =
            Arc::new(GeminiBackend::new(config.extractor.gemini.clone())?);
        let sink = config.diagnostics.build_sink();

        info!("{}", config.summary());
        Ok(Self::with_components(
            config.clone(),
            recognizer,
            Arc::new(RqrrBackend),
            backend,
            sink,
        ))
    }

    /// Build a pipeline over explicit backends
    pub fn with_components(
        config: AppConfig,
        recognizer: Arc<dyn TextRecognizer>,
        qr_backend: Arc<dyn QrBackend>,
        generative: Arc<dyn GenerativeBackend>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let ocr = Arc::new(MultiPassOcrEngine::new(recognizer, config.ocr.clone()));
        let qr = Arc::new(QrDecoder::new(qr_backend, config.qr.clone()).with_sink(Arc::clone(&sink)));
        let extractor = FieldExtractor::new(generative, config.extractor.clone());
        let consolidator = TextConsolidator::new(config.consolidation.clone());

        Self {
            config,
            ocr,
            qr,
            extractor,
            consolidator,
            sink,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Extract a normalized contact record from one image
    pub async fn extract(
        &self,
        image_path: impl AsRef<Path>,
    ) -> Result<ContactRecord, ExtractionError> {
        let path = image_path.as_ref();
        let path_str = path.to_string_lossy().to_string();
        let start_time = Instant::now();

        let result = self
            .run(path, &path_str)
            .instrument(pipeline_span(&path_str))
            .await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind.as_str(),
        };
        record_pipeline_metrics(outcome, start_time.elapsed());
        result
    }

    async fn run(&self, path: &Path, path_str: &str) -> Result<ContactRecord, ExtractionError> {
        let image = validate_image_with_format_limits(path_str, &self.config.ocr)
            .and_then(|_| load_image(path_str))
            .map_err(|e| {
                error_logging::log_filesystem_error(&e, "load_image", Some(path_str), None);
                ExtractionError::new(ErrorKind::IoFailed, e.to_string())
            })?;
        let image = Arc::new(image);
        let run_id = diagnostics::run_id(path);

        // Raised on timeout so the detached OCR thread stops taking new passes
        let cancel_ocr = Arc::new(AtomicBool::new(false));
        let ocr_task = {
            let ocr = Arc::clone(&self.ocr);
            let image = Arc::clone(&image);
            let preprocessing = self.config.preprocessing.clone();
            let cancel = Arc::clone(&cancel_ocr);
            let span = tracing::Span::current();
            tokio::task::spawn_blocking(move || {
                let _enter = span.enter();
                let variants = build_variant_set(&image, &preprocessing);
                let results = ocr.run_until_cancelled(&variants, &cancel);
                (variants, results)
            })
        };
        let qr_task = {
            let qr = Arc::clone(&self.qr);
            let image = Arc::clone(&image);
            let run_id = run_id.clone();
            let span = tracing::Span::current();
            tokio::task::spawn_blocking(move || {
                let _enter = span.enter();
                qr.decode(&image, &run_id)
            })
        };

        let ocr_timeout = Duration::from_secs(self.config.ocr.operation_timeout_secs);
        let (ocr_outcome, qr_outcome) =
            tokio::join!(tokio::time::timeout(ocr_timeout, ocr_task), qr_task);

        let qr_payload: Option<QrPayload> = qr_outcome.unwrap_or_else(|e| {
            warn!(error = %e, "QR decoding task failed");
            None
        });
        let qr_text = qr_payload.as_ref().map(|payload| payload.text.clone());

        let (variants, results): (ImageVariantSet, OcrResultSet) = match ocr_outcome {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error_logging::log_ocr_error(&e, "multi_pass_ocr", Some(path_str), None, None);
                return Err(ExtractionError::new(
                    ErrorKind::OcrFailed,
                    format!("OCR task failed: {}", e),
                )
                .with_ocr_text(NO_TEXT_SENTINEL)
                .with_qr_text(qr_text));
            }
            Err(_) => {
                cancel_ocr.store(true, Ordering::Relaxed);
                let error = OcrError::Timeout(format!(
                    "matrix did not finish within {} seconds",
                    ocr_timeout.as_secs()
                ));
                error_logging::log_ocr_error(
                    &error,
                    "multi_pass_ocr",
                    Some(path_str),
                    None,
                    Some(ocr_timeout),
                );
                return Err(ExtractionError::new(ErrorKind::OcrFailed, error.to_string())
                    .with_ocr_text(NO_TEXT_SENTINEL)
                    .with_qr_text(qr_text));
            }
        };

        diagnostics::save_variants(self.sink.as_ref(), &run_id, &variants);

        if results.is_empty() {
            warn!(
                attempted = results.attempted,
                qr_found = qr_text.is_some(),
                "No OCR pass produced text"
            );
            return Err(
                ExtractionError::new(ErrorKind::OcrFailed, "no text found in image")
                    .with_ocr_text(results.combined_text())
                    .with_qr_text(qr_text),
            );
        }

        let blocks = self.consolidator.consolidate(&results.texts());
        let ocr_text = blocks.join("\n");
        info!(
            passes = results.passes.len(),
            attempted = results.attempted,
            blocks = blocks.len(),
            qr_found = qr_text.is_some(),
            "OCR stage completed"
        );
        debug!(ocr_chars = ocr_text.chars().count(), "Consolidated OCR text");

        let record = self
            .extractor
            .extract(&ocr_text, qr_payload.as_ref())
            .await
            .map_err(|e| into_extraction_error(e, &ocr_text, qr_text.clone()))?;

        Ok(normalize(&record))
    }
}

/// Map an extractor failure to the pipeline boundary, keeping the recovered text
fn into_extraction_error(
    error: ExtractorError,
    ocr_text: &str,
    qr_text: Option<String>,
) -> ExtractionError {
    let kind = match &error {
        ExtractorError::QuotaLimited(_) => ErrorKind::QuotaLimited,
        ExtractorError::Backend(_) | ExtractorError::Parse(_) => ErrorKind::ParseFailed,
    };
    ExtractionError::new(kind, error.to_string())
        .with_ocr_text(ocr_text)
        .with_qr_text(qr_text)
}
