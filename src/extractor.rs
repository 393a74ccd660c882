//! # Field Extraction Module
//!
//! Turns consolidated OCR text (plus an optional QR payload) into a
//! [`ContactRecord`] by prompting a generative backend and repairing its answer.
//!
//! ## Flow
//!
//! 1. Build the prompt ([`crate::prompts`])
//! 2. Call the backend once; rate-limit refusals are reported separately
//! 3. Recover a JSON object ([`crate::response_repair`])
//! 4. Resolve which key convention the object uses, fold legacy and unknown
//!    keys into the catch-all field
//! 5. Back-fill from the QR payload and from contact details visible in the OCR text
//! 6. Ensure every required field is present

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::{error_logging, AppResult};
use crate::llm::{GeminiConfig, GenerativeBackend};
use crate::prompts::build_extraction_prompt;
use crate::qr::{QrPayload, DEFAULT_PLATFORM_URL_PATTERNS};
use crate::response_repair::repair_response;
use crate::schema::{
    is_legacy_memo_key, legacy_key_convention, ContactRecord, Field, KeyConvention,
    LEGACY_MEMO_KEY, LEGACY_NUMBERED_KEYS,
};

/// Separator between notes in the catch-all field
pub const NOTE_SEPARATOR: &str = " / ";

/// Minimum digits for a phone number hint; shorter runs are postal codes or dates
const MIN_PHONE_DIGITS: usize = 10;

lazy_static! {
    static ref EMAIL_PATTERN: Regex = Regex::new(r"[a-zA-Z0-9_.+-]+[@＠][a-zA-Z0-9-]+\.[a-zA-Z0-9.-]+")
        .expect("Invalid email regex pattern");
    static ref PHONE_PATTERN: Regex =
        Regex::new(r"(?:\+\d{1,3}[-.\s]?)?\(?\d{2,4}\)?[-.\s]?\d{2,4}[-.\s]?\d{2,4}")
            .expect("Invalid phone regex pattern");
    static ref URL_PATTERN: Regex =
        Regex::new(r#"https?://[^\s<>"]+|www\.[^\s<>"]+"#).expect("Invalid URL regex pattern");
}

/// Configuration for field extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub gemini: GeminiConfig,
    /// URL prefixes routed into the platform URL field
    pub platform_url_patterns: Vec<String>,
    /// Fill empty email/phone/website fields from details found in the OCR text
    pub backfill_from_ocr: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            gemini: GeminiConfig::default(),
            platform_url_patterns: DEFAULT_PLATFORM_URL_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            backfill_from_ocr: true,
        }
    }
}

impl ExtractorConfig {
    pub fn validate(&self) -> AppResult<()> {
        self.gemini.validate()
    }
}

/// Errors from a single extraction attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractorError {
    /// The backend refused for quota or rate-limit reasons
    QuotaLimited(String),
    /// Any other backend failure, including timeouts
    Backend(String),
    /// The answer could not be turned into key/value pairs
    Parse(String),
}

impl fmt::Display for ExtractorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractorError::QuotaLimited(msg) => write!(f, "[QUOTA_LIMITED] {}", msg),
            ExtractorError::Backend(msg) => write!(f, "[BACKEND] {}", msg),
            ExtractorError::Parse(msg) => write!(f, "[PARSE] {}", msg),
        }
    }
}

impl std::error::Error for ExtractorError {}

/// Parsed model output, tagged with the key convention it was written in
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseShape {
    Primary(Map<String, Value>),
    Secondary(Map<String, Value>),
}

impl ResponseShape {
    /// Classify by which convention more of the keys belong to; ties go to primary
    pub fn detect(object: Map<String, Value>) -> Self {
        let mut primary = 0usize;
        let mut secondary = 0usize;
        for key in object.keys() {
            let convention = if Field::from_key_in(key, KeyConvention::Primary).is_some() {
                Some(KeyConvention::Primary)
            } else if Field::from_key_in(key, KeyConvention::Secondary).is_some() {
                Some(KeyConvention::Secondary)
            } else {
                legacy_key_convention(key)
            };
            match convention {
                Some(KeyConvention::Primary) => primary += 1,
                Some(KeyConvention::Secondary) => secondary += 1,
                None => {}
            }
        }

        if secondary > primary {
            ResponseShape::Secondary(object)
        } else {
            ResponseShape::Primary(object)
        }
    }

    pub fn convention(&self) -> KeyConvention {
        match self {
            ResponseShape::Primary(_) => KeyConvention::Primary,
            ResponseShape::Secondary(_) => KeyConvention::Secondary,
        }
    }

    /// Map keys onto schema fields and fold everything else into the catch-all.
    ///
    /// Catch-all order: legacy numbered keys, the memo key, unknown keys, then
    /// whatever the model already put in the catch-all.
    pub fn reconcile(self) -> ContactRecord {
        let convention = self.convention();
        let object = match self {
            ResponseShape::Primary(object) | ResponseShape::Secondary(object) => object,
        };

        let mut record = ContactRecord::new();
        let mut legacy_notes: BTreeMap<usize, String> = BTreeMap::new();
        let mut unknown_notes = Vec::new();

        for (key, value) in object {
            let text = value_to_text(&value);
            let key = key.trim();

            if let Some(field) =
                Field::from_key_in(key, convention).or_else(|| Field::from_key(key))
            {
                if record.is_blank(field) {
                    record.set(field, text.trim());
                }
            } else if let Some(position) = legacy_position(key) {
                if !text.trim().is_empty() {
                    let note = if is_legacy_memo_key(key) {
                        text.trim().to_string()
                    } else {
                        format!("{}: {}", key, text.trim())
                    };
                    legacy_notes.entry(position).or_insert(note);
                }
            } else if !text.trim().is_empty() {
                unknown_notes.push(format!("{}: {}", key, text.trim()));
            }
        }

        let mut notes: Vec<String> = legacy_notes.into_values().collect();
        notes.extend(unknown_notes);
        let existing = record.get(Field::Other).trim().to_string();
        if !existing.is_empty() {
            notes.push(existing);
        }
        record.set(Field::Other, notes.join(NOTE_SEPARATOR));

        record.fill_required();
        record
    }
}

/// Folding position of a legacy key: numbered keys first, memo last
fn legacy_position(key: &str) -> Option<usize> {
    LEGACY_NUMBERED_KEYS
        .iter()
        .chain(std::iter::once(&LEGACY_MEMO_KEY))
        .position(|(primary, secondary)| *primary == key || *secondary == key)
}

/// Render a JSON value as field text; `null` becomes empty
fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join(NOTE_SEPARATOR),
        other => other.to_string(),
    }
}

/// Contact details found directly in OCR text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactHints {
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub urls: Vec<String>,
}

/// Find emails (ASCII or full-width at-sign), phone numbers and URLs
pub fn extract_contact_hints(text: &str) -> ContactHints {
    let emails = EMAIL_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().replace('＠', "@"))
        .collect();

    let phones = PHONE_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|phone| phone.chars().filter(char::is_ascii_digit).count() >= MIN_PHONE_DIGITS)
        .collect();

    let urls = URL_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ')']).to_string())
        .collect();

    ContactHints {
        emails,
        phones,
        urls,
    }
}

/// Extracts contact records through a generative backend
pub struct FieldExtractor {
    backend: Arc<dyn GenerativeBackend>,
    config: ExtractorConfig,
}

impl FieldExtractor {
    pub fn new(backend: Arc<dyn GenerativeBackend>, config: ExtractorConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Extract a record; every required field is present on success
    pub async fn extract(
        &self,
        ocr_text: &str,
        qr: Option<&QrPayload>,
    ) -> Result<ContactRecord, ExtractorError> {
        let start_time = Instant::now();
        let prompt = build_extraction_prompt(
            ocr_text,
            qr.map(|payload| payload.text.as_str()),
            &self.config.platform_url_patterns,
        );
        debug!(prompt_chars = prompt.chars().count(), "Built extraction prompt");

        let raw = self.backend.generate(&prompt).await.map_err(|e| {
            if e.is_rate_limited() {
                warn!(error = %e, "Generative backend quota exhausted");
                metrics::counter!("extraction_total", "result" => "quota_limited").increment(1);
                ExtractorError::QuotaLimited(e.to_string())
            } else {
                metrics::counter!("extraction_total", "result" => "backend_error").increment(1);
                ExtractorError::Backend(e.to_string())
            }
        })?;

        let repaired = repair_response(&raw).map_err(|e| {
            error_logging::log_parse_error(&e, "repair_response", &raw);
            metrics::counter!("extraction_total", "result" => "parse_error").increment(1);
            ExtractorError::Parse(e.to_string())
        })?;

        let shape = ResponseShape::detect(repaired.object);
        debug!(convention = ?shape.convention(), "Resolved response key convention");
        let mut record = shape.reconcile();

        if let Some(payload) = qr.filter(|payload| payload.is_platform_url()) {
            if record.is_blank(Field::PlatformUrl) {
                record.set(Field::PlatformUrl, payload.text.trim());
            }
        }

        if self.config.backfill_from_ocr {
            self.apply_hints(&mut record, &extract_contact_hints(ocr_text));
        }

        record.fill_required();

        metrics::counter!("extraction_total", "result" => "success").increment(1);
        info!(
            repair_strategy = repaired.strategy.as_str(),
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Extracted contact record"
        );
        Ok(record)
    }

    fn is_platform_url(&self, url: &str) -> bool {
        self.config
            .platform_url_patterns
            .iter()
            .any(|pattern| url.starts_with(pattern.as_str()))
    }

    /// Fill blank fields with hints not already present anywhere in the record
    fn apply_hints(&self, record: &mut ContactRecord, hints: &ContactHints) {
        let already_recorded =
            |record: &ContactRecord, value: &str| record.fields().any(|(_, v)| v.contains(value));

        let fill = |record: &mut ContactRecord, field: Field, candidates: Vec<&String>| {
            if !record.is_blank(field) {
                return;
            }
            if let Some(value) = candidates
                .into_iter()
                .find(|value| !already_recorded(record, value))
            {
                debug!(field = field.secondary_key(), "Back-filled field from OCR text");
                record.set(field, value.as_str());
            }
        };

        fill(record, Field::Email, hints.emails.iter().collect());
        fill(record, Field::Phone, hints.phones.iter().collect());
        fill(
            record,
            Field::PlatformUrl,
            hints.urls.iter().filter(|u| self.is_platform_url(u)).collect(),
        );
        fill(
            record,
            Field::Website,
            hints.urls.iter().filter(|u| !self.is_platform_url(u)).collect(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::BackendError;
    use crate::qr::{QrPayloadKind, QrStrategy};
    use crate::schema::REQUIRED_FIELDS;
    use async_trait::async_trait;
    use serde_json::json;

    struct CannedBackend(Result<String, BackendError>);

    #[async_trait]
    impl GenerativeBackend for CannedBackend {
        async fn generate(&self, _prompt: &str) -> Result<String, BackendError> {
            self.0.clone()
        }
    }

    fn extractor(response: Result<String, BackendError>) -> FieldExtractor {
        FieldExtractor::new(Arc::new(CannedBackend(response)), ExtractorConfig::default())
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_detect_shape() {
        let primary = ResponseShape::detect(object(json!({"名前": "a", "email": "b"})));
        assert_eq!(primary.convention(), KeyConvention::Primary);

        let secondary =
            ResponseShape::detect(object(json!({"name": "a", "company": "b", "その他": ""})));
        assert_eq!(secondary.convention(), KeyConvention::Secondary);
    }

    #[test]
    fn test_secondary_keys_are_remapped() {
        let record = ResponseShape::detect(object(json!({
            "name": "John Doe",
            "company": "ACME",
            "postal_code": "100-0001",
            "sasaeai_url": "https://sasaeai.com/p/1"
        })))
        .reconcile();

        assert_eq!(record.get(Field::Name), "John Doe");
        assert_eq!(record.get(Field::Company), "ACME");
        assert_eq!(record.get(Field::PostalCode), "100-0001");
        assert_eq!(record.get(Field::PlatformUrl), "https://sasaeai.com/p/1");
        assert!(record.has_all_required());
    }

    #[test]
    fn test_legacy_fields_fold_into_catch_all() {
        let record =
            ResponseShape::detect(object(json!({"フィールド1": "x", "その他": "y"}))).reconcile();
        assert_eq!(record.get(Field::Other), "フィールド1: x / y");
        assert!(record.has_all_required());
    }

    #[test]
    fn test_legacy_fold_order_and_memo_prefix() {
        let record = ResponseShape::detect(object(json!({
            "メモ": "call back",
            "フィールド3": "c",
            "フィールド1": "a",
            "フィールド2": "",
            "その他": "existing"
        })))
        .reconcile();
        assert_eq!(
            record.get(Field::Other),
            "フィールド1: a / フィールド3: c / call back / existing"
        );
    }

    #[test]
    fn test_secondary_legacy_keys_fold_too() {
        let record = ResponseShape::detect(object(json!({
            "name": "A",
            "field1": "x",
            "memo": "m",
            "other": "y"
        })))
        .reconcile();
        assert_eq!(record.get(Field::Other), "field1: x / m / y");
    }

    #[test]
    fn test_unknown_keys_become_notes_and_values_are_stringified() {
        let record = ResponseShape::detect(object(json!({
            "名前": null,
            "FAX": "03-0000-0000",
            "電話番号": ["03-1111-1111", "090-2222-2222"],
            "郵便": 1000001
        })))
        .reconcile();
        assert_eq!(record.get(Field::Name), "");
        assert_eq!(record.get(Field::Phone), "03-1111-1111 / 090-2222-2222");
        assert_eq!(record.get(Field::PostalCode), "1000001");
        assert_eq!(record.get(Field::Other), "FAX: 03-0000-0000");
    }

    #[test]
    fn test_contact_hints() {
        let hints = extract_contact_hints(
            "ACME\nTEL 03-1234-5678\n〒100-0001\nyamada＠acme.example\nwww.acme.example\nhttps://sasaeai.com/p/9.",
        );
        assert_eq!(hints.emails, vec!["yamada@acme.example".to_string()]);
        assert_eq!(hints.phones, vec!["03-1234-5678".to_string()]);
        assert_eq!(
            hints.urls,
            vec![
                "www.acme.example".to_string(),
                "https://sasaeai.com/p/9".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_extract_fills_every_required_key() {
        let extractor = extractor(Ok(r#"{"名前": "山田太郎"}"#.to_string()));
        let record = extractor
            .extract("山田太郎", None)
            .await
            .expect("extraction should succeed");
        for field in REQUIRED_FIELDS {
            assert!(record.contains(field), "missing {:?}", field);
        }
        assert_eq!(record.get(Field::Name), "山田太郎");
    }

    #[tokio::test]
    async fn test_extract_backfills_from_qr_and_ocr() {
        let extractor = extractor(Ok(r#"{"名前": "山田太郎", "メールアドレス": ""}"#.to_string()));
        let qr = QrPayload::new(
            "https://sasaeai.com/p/1",
            QrPayloadKind::PlatformUrl,
            QrStrategy::Binarized,
        );
        let record = extractor
            .extract("山田太郎\nyamada@acme.example\n03-1234-5678", qr.as_ref())
            .await
            .expect("extraction should succeed");

        assert_eq!(record.get(Field::PlatformUrl), "https://sasaeai.com/p/1");
        assert_eq!(record.get(Field::Email), "yamada@acme.example");
        assert_eq!(record.get(Field::Phone), "03-1234-5678");
    }

    #[tokio::test]
    async fn test_backfill_can_be_disabled() {
        let config = ExtractorConfig {
            backfill_from_ocr: false,
            ..Default::default()
        };
        let extractor = FieldExtractor::new(
            Arc::new(CannedBackend(Ok(r#"{"名前": "A"}"#.to_string()))),
            config,
        );
        let record = extractor
            .extract("a@b.example", None)
            .await
            .expect("extraction should succeed");
        assert_eq!(record.get(Field::Email), "");
    }

    #[tokio::test]
    async fn test_rate_limit_is_distinct() {
        let extractor = extractor(Err(BackendError::Transport(
            "status 429: quota exceeded".to_string(),
        )));
        let err = extractor
            .extract("text", None)
            .await
            .expect_err("quota error expected");
        assert!(matches!(err, ExtractorError::QuotaLimited(_)));
    }

    #[tokio::test]
    async fn test_backend_and_parse_errors() {
        let err = extractor(Err(BackendError::Timeout(30)))
            .extract("text", None)
            .await
            .expect_err("timeout expected");
        assert!(matches!(err, ExtractorError::Backend(_)));

        let err = extractor(Ok("Sorry, I cannot help with that.".to_string()))
            .extract("text", None)
            .await
            .expect_err("parse error expected");
        assert!(matches!(err, ExtractorError::Parse(_)));
    }
}
