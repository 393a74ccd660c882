//! # card-extract
//!
//! Extracts structured contact records from photographed business cards by
//! combining multi-pass OCR, QR decoding and a generative-text backend.

pub mod config;
pub mod deduplication;
pub mod diagnostics;
pub mod errors;
pub mod extractor;
pub mod instance_manager;
pub mod llm;
pub mod normalizer;
pub mod observability;
pub mod observability_config;
pub mod ocr;
pub mod ocr_config;
pub mod ocr_errors;
pub mod pipeline;
pub mod preprocessing;
pub mod prompts;
pub mod qr;
pub mod response_repair;
pub mod schema;

// Re-export types for easier access
pub use config::AppConfig;
pub use errors::{AppError, AppResult, ErrorKind, ExtractionError};
pub use pipeline::CardPipeline;
pub use schema::{ContactRecord, Field, KeyConvention};
