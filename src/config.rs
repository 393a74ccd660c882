//! # Unified Application Configuration
//!
//! This module consolidates every component's settings into a single
//! structured configuration object. It supports loading from environment
//! variables, validation, and a redacted summary for logging.

use crate::deduplication::ConsolidationConfig;
use crate::diagnostics::DiagnosticsConfig;
use crate::errors::{AppError, AppResult};
use crate::extractor::ExtractorConfig;
use crate::observability_config::ObservabilityConfig;
use crate::ocr_config::{ModelType, OcrConfig};
use crate::preprocessing::PreprocessingConfig;
use crate::qr::QrConfig;
use crate::schema::KeyConvention;
use std::str::FromStr;

/// Unified application configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// OCR processing configuration
    pub ocr: OcrConfig,
    /// Image variant generation
    pub preprocessing: PreprocessingConfig,
    /// QR decoding configuration
    pub qr: QrConfig,
    /// Generative backend and field extraction
    pub extractor: ExtractorConfig,
    /// OCR block consolidation
    pub consolidation: ConsolidationConfig,
    /// Optional diagnostic image dumps
    pub diagnostics: DiagnosticsConfig,
    /// Observability configuration
    pub observability: ObservabilityConfig,
    /// Key convention used when printing records
    pub output_keys: KeyConvention,
}

/// Parse an optional variable, falling back to `default` when unset
fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> AppResult<T> {
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("{} has an invalid value", key)))
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> AppResult<String> {
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AppError::Config(format!("{} environment variable is required", key)))
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> bool {
    lookup(key)
        .map(|value| matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let mut config = Self::default();

        // Generative backend
        config.extractor.gemini.api_key = required(&lookup, "GEMINI_API_KEY")?;
        config.extractor.gemini.model = required(&lookup, "GEMINI_MODEL")?;
        if let Some(base_url) = lookup("GEMINI_BASE_URL").filter(|v| !v.trim().is_empty()) {
            config.extractor.gemini.base_url = base_url.trim().to_string();
        }
        config.extractor.gemini.request_timeout_secs = parse_or(&lookup, "API_TIMEOUT_SECS", "30")?;

        // OCR
        config.ocr.tessdata_path = lookup("TESSDATA_PATH").filter(|v| !v.trim().is_empty());
        config.ocr.model_type = lookup("OCR_MODEL_TYPE")
            .map(|v| ModelType::from_str(&v))
            .transpose()
            .map_err(|e| AppError::Config(format!("OCR_MODEL_TYPE: {}", e)))?
            .unwrap_or_default();
        config.ocr.operation_timeout_secs = parse_or(&lookup, "OCR_TIMEOUT_SECS", "120")?;
        config.ocr.max_workers = lookup("OCR_MAX_WORKERS")
            .map(|v| {
                v.trim().parse::<usize>().map_err(|_| {
                    AppError::Config("OCR_MAX_WORKERS must be a valid number".to_string())
                })
            })
            .transpose()?;

        // Diagnostics
        config.diagnostics.save_processed_images = parse_flag(&lookup, "SAVE_PROCESSED_IMAGES");
        if let Some(dir) = lookup("PROCESSED_IMAGES_DIR").filter(|v| !v.trim().is_empty()) {
            config.diagnostics.output_dir = dir;
        }

        // Platform URL patterns feed both the QR classifier and the prompt
        if let Some(patterns) = lookup("PLATFORM_URL_PATTERNS") {
            let patterns: Vec<String> = patterns
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            if !patterns.is_empty() {
                config.qr.platform_url_patterns = patterns.clone();
                config.extractor.platform_url_patterns = patterns;
            }
        }

        config.output_keys = lookup("OUTPUT_KEYS")
            .unwrap_or_else(|| "secondary".to_string())
            .parse()
            .map_err(|e: String| AppError::Config(format!("OUTPUT_KEYS: {}", e)))?;

        config.observability = ObservabilityConfig::from_lookup(&lookup)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration sections
    pub fn validate(&self) -> AppResult<()> {
        self.ocr.validate()?;
        self.preprocessing.validate()?;
        self.qr.validate()?;
        self.extractor.validate()?;
        self.consolidation.validate()?;
        self.diagnostics.validate()?;
        self.observability.validate()?;
        Ok(())
    }

    /// Get a summary of the current configuration for logging
    pub fn summary(&self) -> String {
        format!(
            "Configuration: api_key=[REDACTED], model={}, api_timeout_secs={}, ocr_model={:?}, ocr_passes={}, ocr_timeout_secs={}, save_processed_images={}, output_keys={:?}",
            self.extractor.gemini.model,
            self.extractor.gemini.request_timeout_secs,
            self.ocr.model_type,
            self.ocr.recognition_matrix.len(),
            self.ocr.operation_timeout_secs,
            self.diagnostics.save_processed_images,
            self.output_keys
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("GEMINI_API_KEY", "secret-key"),
        ("GEMINI_MODEL", "gemini-2.0-flash"),
    ];

    #[test]
    fn test_missing_api_key_or_model_fails_fast() {
        let err = AppConfig::from_lookup(lookup(&[("GEMINI_MODEL", "m")]))
            .expect_err("missing key should fail");
        assert!(err.to_string().contains("GEMINI_API_KEY"));

        let err = AppConfig::from_lookup(lookup(&[("GEMINI_API_KEY", "k"), ("GEMINI_MODEL", " ")]))
            .expect_err("blank model should fail");
        assert!(err.to_string().contains("GEMINI_MODEL"));
    }

    #[test]
    fn test_defaults_with_required_values() {
        let config = AppConfig::from_lookup(lookup(&REQUIRED)).expect("config should load");
        assert_eq!(config.extractor.gemini.request_timeout_secs, 30);
        assert_eq!(config.ocr.operation_timeout_secs, 120);
        assert_eq!(config.ocr.recognition_matrix.len(), 5);
        assert!(!config.diagnostics.save_processed_images);
        assert_eq!(config.output_keys, KeyConvention::Secondary);
        assert!(!config.summary().contains("secret-key"));
    }

    #[test]
    fn test_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("API_TIMEOUT_SECS", "45"),
            ("OCR_MODEL_TYPE", "best"),
            ("OCR_MAX_WORKERS", "2"),
            ("SAVE_PROCESSED_IMAGES", "TRUE"),
            ("PROCESSED_IMAGES_DIR", "/tmp/dumps"),
            ("PLATFORM_URL_PATTERNS", "https://a.example/, https://b.example/"),
            ("OUTPUT_KEYS", "ja"),
        ]);
        let config = AppConfig::from_lookup(lookup(&pairs)).expect("config should load");

        assert_eq!(config.extractor.gemini.request_timeout_secs, 45);
        assert_eq!(config.ocr.model_type, ModelType::Best);
        assert_eq!(config.ocr.max_workers, Some(2));
        assert!(config.diagnostics.save_processed_images);
        assert_eq!(config.diagnostics.output_dir, "/tmp/dumps");
        assert_eq!(
            config.qr.platform_url_patterns,
            vec!["https://a.example/".to_string(), "https://b.example/".to_string()]
        );
        assert_eq!(
            config.extractor.platform_url_patterns,
            config.qr.platform_url_patterns
        );
        assert_eq!(config.output_keys, KeyConvention::Primary);
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("API_TIMEOUT_SECS", "soon"));
        assert!(AppConfig::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("OCR_MAX_WORKERS", "-1"));
        assert!(AppConfig::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("OCR_MODEL_TYPE", "medium"));
        assert!(AppConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn test_default_config_requires_credentials() {
        // Defaults carry no API key, so they never validate on their own
        assert!(AppConfig::default().validate().is_err());
    }
}
