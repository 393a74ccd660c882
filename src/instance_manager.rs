//! # OCR Instance Manager Module
//!
//! This module provides thread-safe OCR instance management for reusing Tesseract instances.
//! Each recognition configuration (languages plus page segmentation mode) gets its own
//! instance so the multi-pass engine never has to reconfigure an engine between passes.

use leptess::LepTess;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::ocr_config::{ModelType, RecognitionConfig};
use crate::ocr_errors::OcrError;

/// Thread-safe OCR instance manager for reusing Tesseract instances
///
/// Manages a pool of Tesseract OCR instances keyed by recognition configuration
/// and model type. Reusing instances avoids the initialization overhead of
/// loading language data for each of the passes run per card.
///
/// # Thread Safety
///
/// Instances are handed out as `Arc<Mutex<LepTess>>`. Passes that share a
/// configuration serialize on that instance's lock; passes with different
/// configurations run concurrently.
pub struct OcrInstanceManager {
    instances: Mutex<HashMap<String, Arc<Mutex<LepTess>>>>,
    model_type: ModelType,
    tessdata_override: Option<String>,
}

impl OcrInstanceManager {
    /// Create a new OCR instance manager
    ///
    /// Initializes an empty instance pool. Instances will be created
    /// on-demand when first requested via `get_instance()`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use card_extract::instance_manager::OcrInstanceManager;
    /// use card_extract::ocr_config::ModelType;
    ///
    /// let manager = OcrInstanceManager::new(ModelType::Fast, None);
    /// assert_eq!(manager.instance_count(), 0);
    /// ```
    pub fn new(model_type: ModelType, tessdata_override: Option<String>) -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
            model_type,
            tessdata_override,
        }
    }

    /// Pool key for a recognition configuration
    pub fn instance_key(&self, recognition: &RecognitionConfig) -> String {
        format!(
            "{}:{}:{}",
            recognition.languages,
            recognition.psm.as_str(),
            self.model_type.tessdata_dir()
        )
    }

    /// Get or create an OCR instance for the given recognition configuration
    ///
    /// # Errors
    ///
    /// Returns `OcrError::Initialization` if Tesseract cannot load the requested
    /// languages or rejects the page segmentation mode.
    pub fn get_instance(
        &self,
        recognition: &RecognitionConfig,
    ) -> Result<Arc<Mutex<LepTess>>, OcrError> {
        let key = self.instance_key(recognition);

        if let Some(instance) = self.instances.lock().get(&key) {
            return Ok(Arc::clone(instance));
        }

        info!(
            "Creating new OCR instance for languages: {} psm: {} model: {}",
            recognition.languages,
            recognition.psm.as_str(),
            self.model_type.tessdata_dir()
        );

        let tessdata_path = self
            .tessdata_override
            .clone()
            .or_else(|| Self::get_tessdata_path(self.model_type));

        let mut tess = LepTess::new(tessdata_path.as_deref(), &recognition.languages).map_err(
            |e| {
                OcrError::Initialization(format!(
                    "Failed to initialize Tesseract for '{}': {}",
                    recognition.languages, e
                ))
            },
        )?;

        tess.set_variable(leptess::Variable::TesseditPagesegMode, recognition.psm.as_str())
            .map_err(|e| OcrError::Initialization(format!("Failed to set PSM mode: {}", e)))?;

        let instance = Arc::new(Mutex::new(tess));

        // Another thread may have raced us here; keep whichever landed first
        let mut instances = self.instances.lock();
        let stored = instances.entry(key).or_insert_with(|| Arc::clone(&instance));
        Ok(Arc::clone(stored))
    }

    /// Get the tessdata path for the specified model type
    ///
    /// Falls back to Tesseract's compiled-in default when no model-specific
    /// directory is installed.
    fn get_tessdata_path(model_type: ModelType) -> Option<String> {
        let possible_paths = match model_type {
            ModelType::Fast => [
                "/usr/share/tesseract-ocr/5/tessdata_fast",
                "/usr/share/tesseract-ocr/4.00/tessdata_fast",
                "/usr/share/tessdata_fast",
                "/usr/local/share/tessdata_fast",
            ],
            ModelType::Best => [
                "/usr/share/tesseract-ocr/5/tessdata_best",
                "/usr/share/tesseract-ocr/4.00/tessdata_best",
                "/usr/share/tessdata_best",
                "/usr/local/share/tessdata_best",
            ],
        };

        for path in possible_paths {
            if std::path::Path::new(path).exists() {
                info!("Using tessdata path: {}", path);
                return Some(path.to_string());
            }
        }

        info!(
            "No specific tessdata path found for model type {:?}, using default",
            model_type
        );
        None
    }

    /// Clear all instances (useful for memory cleanup)
    pub fn clear_all_instances(&self) {
        let mut instances = self.instances.lock();
        let count = instances.len();
        instances.clear();
        if count > 0 {
            info!("Cleared {count} OCR instances");
        }
    }

    /// Get the number of cached instances
    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }
}

impl Default for OcrInstanceManager {
    fn default() -> Self {
        Self::new(ModelType::default(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr_config::PageSegMode;

    #[test]
    fn test_instance_key_distinguishes_psm_and_model() {
        let fast = OcrInstanceManager::new(ModelType::Fast, None);
        let best = OcrInstanceManager::new(ModelType::Best, None);

        let auto = RecognitionConfig::new("jpn+eng", PageSegMode::Auto);
        let block = RecognitionConfig::new("jpn+eng", PageSegMode::SingleBlock);

        assert_eq!(fast.instance_key(&auto), "jpn+eng:3:tessdata_fast");
        assert_ne!(fast.instance_key(&auto), fast.instance_key(&block));
        assert_ne!(fast.instance_key(&auto), best.instance_key(&auto));
    }

    #[test]
    fn test_new_manager_is_empty() {
        let manager = OcrInstanceManager::default();
        assert_eq!(manager.instance_count(), 0);
        manager.clear_all_instances();
        assert_eq!(manager.instance_count(), 0);
    }
}
