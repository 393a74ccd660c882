//! # Schema Normalizer
//!
//! Final pass over extracted records: secondary email and phone move into the
//! catch-all field as labeled notes, and every remaining schema field is
//! guaranteed to be present.

use serde_json::{Map, Value};

use crate::extractor::NOTE_SEPARATOR;
use crate::schema::{ContactRecord, Field, KeyConvention, REQUIRED_FIELDS};

/// Fields moved into the catch-all, in note order
pub const RELOCATED_FIELDS: [Field; 2] = [Field::EmailSecondary, Field::PhoneSecondary];

/// Fields present in every normalized record
pub fn normalized_fields() -> impl Iterator<Item = Field> {
    REQUIRED_FIELDS
        .into_iter()
        .filter(|field| !RELOCATED_FIELDS.contains(field))
}

/// Relocate secondary contact slots into the catch-all. Idempotent.
pub fn normalize(record: &ContactRecord) -> ContactRecord {
    let mut normalized = record.clone();

    let mut notes = Vec::new();
    let existing = normalized.get(Field::Other).trim().to_string();
    if !existing.is_empty() {
        notes.push(existing);
    }

    for field in RELOCATED_FIELDS {
        if let Some(value) = normalized.remove(field) {
            let value = value.trim();
            if !value.is_empty() {
                notes.push(format!("{}: {}", field.primary_key(), value));
            }
        }
    }

    normalized.set(Field::Other, notes.join(NOTE_SEPARATOR));

    for field in normalized_fields() {
        if !normalized.contains(field) {
            normalized.set(field, "");
        }
    }

    normalized
}

/// Rename schema keys of either convention to `target`; other keys pass through
pub fn rekey(entries: &Map<String, Value>, target: KeyConvention) -> Map<String, Value> {
    entries
        .iter()
        .map(|(key, value)| {
            let renamed = Field::from_key(key)
                .map(|field| field.key(target).to_string())
                .unwrap_or_else(|| key.clone());
            (renamed, value.clone())
        })
        .collect()
}
