//! # Diagnostic Output Module
//!
//! Optional write-only dump of intermediate images and QR outcome notes.
//! Every write is best-effort: failures are logged and never reach the pipeline.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::errors::{error_logging, AppError, AppResult};
use crate::preprocessing::ImageVariantSet;

/// File the QR decoder's outcome lines are appended to
pub const REPORT_FILE_NAME: &str = "report.txt";

/// Receives intermediate artifacts of one pipeline run
pub trait DiagnosticSink: Send + Sync {
    /// Store an image under `name` for the given run
    fn save_image(&self, run_id: &str, name: &str, image: &DynamicImage);

    /// Append one line to the run's report
    fn append_report(&self, run_id: &str, line: &str);
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDiagnosticSink;

impl DiagnosticSink for NoopDiagnosticSink {
    fn save_image(&self, _run_id: &str, _name: &str, _image: &DynamicImage) {}

    fn append_report(&self, _run_id: &str, _line: &str) {}
}

/// Writes PNGs and a report file under `<root>/<run_id>/`
#[derive(Debug, Clone)]
pub struct FileDiagnosticSink {
    root: PathBuf,
}

impl FileDiagnosticSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    fn ensure_run_dir(&self, run_id: &str) -> Option<PathBuf> {
        let dir = self.run_dir(run_id);
        match std::fs::create_dir_all(&dir) {
            Ok(()) => Some(dir),
            Err(e) => {
                error_logging::log_filesystem_error(
                    &e,
                    "create_diagnostic_dir",
                    Some(&dir.to_string_lossy()),
                    None,
                );
                None
            }
        }
    }
}

impl DiagnosticSink for FileDiagnosticSink {
    fn save_image(&self, run_id: &str, name: &str, image: &DynamicImage) {
        let Some(dir) = self.ensure_run_dir(run_id) else {
            return;
        };
        let path = dir.join(format!("{name}.png"));
        match image.save_with_format(&path, image::ImageFormat::Png) {
            Ok(()) => debug!(path = %path.display(), "Saved diagnostic image"),
            Err(e) => error_logging::log_filesystem_error(
                &e,
                "save_diagnostic_image",
                Some(&path.to_string_lossy()),
                None,
            ),
        }
    }

    fn append_report(&self, run_id: &str, line: &str) {
        let Some(dir) = self.ensure_run_dir(run_id) else {
            return;
        };
        let path = dir.join(REPORT_FILE_NAME);
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(e) = result {
            error_logging::log_filesystem_error(
                &e,
                "append_diagnostic_report",
                Some(&path.to_string_lossy()),
                None,
            );
        }
    }
}

/// Run identifier: the image file stem plus a local `YYYYMMDDHHMMSS` timestamp
pub fn run_id(image_path: &Path) -> String {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "image".to_string());
    format!("{}_{}", stem, chrono::Local::now().format("%Y%m%d%H%M%S"))
}

/// Hand every variant of a set to the sink, named after the variant
pub fn save_variants(sink: &dyn DiagnosticSink, run_id: &str, variants: &ImageVariantSet) {
    for (variant, image) in variants.iter() {
        sink.save_image(run_id, variant.name(), image);
    }
}

/// Configuration for diagnostic output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Write intermediate images to disk
    pub save_processed_images: bool,
    /// Root directory for per-run subdirectories
    pub output_dir: String,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            save_processed_images: false,
            output_dir: "processed_images".to_string(),
        }
    }
}

impl DiagnosticsConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.save_processed_images && self.output_dir.trim().is_empty() {
            return Err(AppError::Config(
                "output_dir cannot be empty when saving processed images".to_string(),
            ));
        }
        Ok(())
    }

    /// Sink matching this configuration
    pub fn build_sink(&self) -> Arc<dyn DiagnosticSink> {
        if self.save_processed_images {
            Arc::new(FileDiagnosticSink::new(&self.output_dir))
        } else {
            Arc::new(NoopDiagnosticSink)
        }
    }
}
