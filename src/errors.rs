//! # Application Error Types
//!
//! This module defines common error types used throughout the card extraction pipeline.
//! `AppError` covers configuration and internal failures, while `ExtractionError`
//! is the single error type surfaced at the pipeline boundary.

use std::fmt;

/// General application error type for consistent error handling
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Configuration validation errors
    Config(String),
    /// OCR processing errors
    Ocr(String),
    /// File system errors
    FileSystem(String),
    /// Network/communication errors
    Network(String),
    /// Internal application errors
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "[CONFIG] {}", msg),
            AppError::Ocr(msg) => write!(f, "[OCR] {}", msg),
            AppError::FileSystem(msg) => write!(f, "[FILESYSTEM] {}", msg),
            AppError::Network(msg) => write!(f, "[NETWORK] {}", msg),
            AppError::Internal(msg) => write!(f, "[INTERNAL] {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<crate::ocr_errors::OcrError> for AppError {
    fn from(err: crate::ocr_errors::OcrError) -> Self {
        AppError::Ocr(err.to_string())
    }
}

impl From<crate::llm::BackendError> for AppError {
    fn from(err: crate::llm::BackendError) -> Self {
        AppError::Network(err.to_string())
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// Category of a pipeline failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The generative backend refused the request for quota/rate-limit reasons
    QuotaLimited,
    /// Every OCR pass came back empty or the OCR stage could not finish
    OcrFailed,
    /// The backend answered but nothing usable could be recovered
    ParseFailed,
    /// The input image could not be read or decoded
    IoFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::QuotaLimited => "quota_limited",
            ErrorKind::OcrFailed => "ocr_failed",
            ErrorKind::ParseFailed => "parse_failed",
            ErrorKind::IoFailed => "io_failed",
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            ErrorKind::QuotaLimited => "[QUOTA_LIMITED]",
            ErrorKind::OcrFailed => "[OCR_FAILED]",
            ErrorKind::ParseFailed => "[PARSE_FAILED]",
            ErrorKind::IoFailed => "[IO_FAILED]",
        }
    }
}

/// Error returned by the pipeline entry point.
///
/// Carries whatever raw text was recovered before the failure so callers can
/// show it to the user or retry later without re-running OCR.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionError {
    pub kind: ErrorKind,
    pub message: String,
    /// Consolidated OCR text, or the no-text sentinel when OCR found nothing
    pub ocr_text: Option<String>,
    /// QR payload decoded from the same image
    pub qr_text: Option<String>,
}

impl ExtractionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            ocr_text: None,
            qr_text: None,
        }
    }

    pub fn with_ocr_text(mut self, text: impl Into<String>) -> Self {
        self.ocr_text = Some(text.into());
        self
    }

    pub fn with_qr_text(mut self, text: Option<String>) -> Self {
        self.qr_text = text;
        self
    }

    /// Short message suitable for showing to an end user
    pub fn user_message(&self) -> String {
        match self.kind {
            ErrorKind::QuotaLimited => {
                "API usage limit reached. Please wait a while and try again.".to_string()
            }
            ErrorKind::OcrFailed => {
                "No text could be read from the image. Please try another image.".to_string()
            }
            ErrorKind::ParseFailed => format!("Could not extract contact fields: {}", self.message),
            ErrorKind::IoFailed => format!("Could not read the image: {}", self.message),
        }
    }
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.tag(), self.message)
    }
}

impl std::error::Error for ExtractionError {}

/// Standardized error logging utilities for consistent error reporting across the pipeline
pub mod error_logging {
    use tracing::error;

    /// Log OCR processing errors with image and processing context
    pub fn log_ocr_error(
        error: &impl std::fmt::Display,
        operation: &str,
        image_path: Option<&str>,
        image_size: Option<u64>,
        processing_duration: Option<std::time::Duration>,
    ) {
        error!(
            error = %error,
            operation = %operation,
            image_path = ?image_path,
            image_size_bytes = ?image_size,
            processing_duration_ms = ?processing_duration.map(|d| d.as_millis()),
            "OCR processing failed"
        );
    }

    /// Log network/communication errors with connection context
    pub fn log_network_error(
        error: &impl std::fmt::Display,
        operation: &str,
        endpoint: Option<&str>,
        status: Option<u16>,
    ) {
        error!(
            error = %error,
            operation = %operation,
            endpoint = ?endpoint,
            status = ?status,
            "Network operation failed"
        );
    }

    /// Log file system errors with path and operation context
    pub fn log_filesystem_error(
        error: &impl std::fmt::Display,
        operation: &str,
        path: Option<&str>,
        file_size: Option<u64>,
    ) {
        error!(
            error = %error,
            operation = %operation,
            path = ?path,
            file_size_bytes = ?file_size,
            "File system operation failed"
        );
    }

    /// Log response parsing errors with a truncated view of the raw response
    pub fn log_parse_error(error: &impl std::fmt::Display, operation: &str, raw_response: &str) {
        let preview: String = raw_response.chars().take(200).collect();
        error!(
            error = %error,
            operation = %operation,
            response_chars = raw_response.chars().count(),
            response_preview = %preview,
            "Response parsing failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display_tags() {
        assert_eq!(
            AppError::Config("missing key".to_string()).to_string(),
            "[CONFIG] missing key"
        );
        assert_eq!(
            AppError::Network("down".to_string()).to_string(),
            "[NETWORK] down"
        );
    }

    #[test]
    fn test_extraction_error_carries_partial_text() {
        let err = ExtractionError::new(ErrorKind::ParseFailed, "no pairs")
            .with_ocr_text("ACME Inc")
            .with_qr_text(Some("https://example.com".to_string()));

        assert_eq!(err.kind, ErrorKind::ParseFailed);
        assert_eq!(err.ocr_text.as_deref(), Some("ACME Inc"));
        assert_eq!(err.qr_text.as_deref(), Some("https://example.com"));
        assert_eq!(err.to_string(), "[PARSE_FAILED] no pairs");
    }

    #[test]
    fn test_quota_user_message_mentions_limit() {
        let err = ExtractionError::new(ErrorKind::QuotaLimited, "429 Too Many Requests");
        assert!(err.user_message().contains("limit"));
        assert_eq!(err.kind.as_str(), "quota_limited");
    }
}
