//! # Contact Record Schema
//!
//! Fixed set of contact fields extracted from a business card, the two key
//! conventions they can be rendered with, and the record type handed back to
//! callers of the pipeline.

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A field of the contact schema.
///
/// Variant order is the canonical output order (address before postal code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Name,
    Company,
    Title,
    Address,
    PostalCode,
    Phone,
    Email,
    EmailSecondary,
    Website,
    PlatformUrl,
    Other,
    /// Backup phone number; only ever produced by the model, never required
    PhoneSecondary,
}

/// Fields present in every record returned by the field extractor
pub const REQUIRED_FIELDS: [Field; 11] = [
    Field::Name,
    Field::Company,
    Field::Title,
    Field::Address,
    Field::PostalCode,
    Field::Phone,
    Field::Email,
    Field::EmailSecondary,
    Field::Website,
    Field::PlatformUrl,
    Field::Other,
];

const ALL_FIELDS: [Field; 12] = [
    Field::Name,
    Field::Company,
    Field::Title,
    Field::Address,
    Field::PostalCode,
    Field::Phone,
    Field::Email,
    Field::EmailSecondary,
    Field::Website,
    Field::PlatformUrl,
    Field::Other,
    Field::PhoneSecondary,
];

/// Numbered legacy keys older prompts produced, in folding order
pub const LEGACY_NUMBERED_KEYS: [(&str, &str); 5] = [
    ("フィールド1", "field1"),
    ("フィールド2", "field2"),
    ("フィールド3", "field3"),
    ("フィールド4", "field4"),
    ("フィールド5", "field5"),
];

/// Legacy memo key; folded without a `key: ` prefix
pub const LEGACY_MEMO_KEY: (&str, &str) = ("メモ", "memo");

/// Naming convention for record keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyConvention {
    /// Japanese display keys (`名前`, `会社名`, ...)
    #[default]
    Primary,
    /// English snake_case keys (`name`, `company`, ...)
    Secondary,
}

impl std::str::FromStr for KeyConvention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "primary" | "ja" | "japanese" => Ok(KeyConvention::Primary),
            "secondary" | "en" | "english" => Ok(KeyConvention::Secondary),
            other => Err(format!("unknown key convention '{}'", other)),
        }
    }
}

impl Field {
    /// Japanese key used by the prompt and the primary convention
    pub fn primary_key(self) -> &'static str {
        match self {
            Field::Name => "名前",
            Field::Company => "会社名",
            Field::Title => "職業",
            Field::Address => "住所",
            Field::PostalCode => "郵便",
            Field::Phone => "電話番号",
            Field::Email => "メールアドレス",
            Field::EmailSecondary => "メールアドレス(予備)",
            Field::Website => "HP URL",
            Field::PlatformUrl => "sasaeai URL",
            Field::Other => "その他",
            Field::PhoneSecondary => "電話番号(予備)",
        }
    }

    /// English key used by the secondary convention
    pub fn secondary_key(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Company => "company",
            Field::Title => "title",
            Field::Address => "address",
            Field::PostalCode => "postal_code",
            Field::Phone => "phone",
            Field::Email => "email",
            Field::EmailSecondary => "email_secondary",
            Field::Website => "website",
            Field::PlatformUrl => "sasaeai_url",
            Field::Other => "other",
            Field::PhoneSecondary => "phone_secondary",
        }
    }

    pub fn key(self, convention: KeyConvention) -> &'static str {
        match convention {
            KeyConvention::Primary => self.primary_key(),
            KeyConvention::Secondary => self.secondary_key(),
        }
    }

    /// Look a key up in one convention only
    pub fn from_key_in(key: &str, convention: KeyConvention) -> Option<Field> {
        let key = key.trim();
        ALL_FIELDS
            .iter()
            .copied()
            .find(|field| field.key(convention) == key)
    }

    /// Look a key up in either convention, primary first
    pub fn from_key(key: &str) -> Option<Field> {
        Self::from_key_in(key, KeyConvention::Primary)
            .or_else(|| Self::from_key_in(key, KeyConvention::Secondary))
    }

    pub fn all() -> &'static [Field] {
        &ALL_FIELDS
    }
}

/// Returns the convention a legacy key belongs to, if it is one
pub fn legacy_key_convention(key: &str) -> Option<KeyConvention> {
    let key = key.trim();
    LEGACY_NUMBERED_KEYS
        .iter()
        .chain(std::iter::once(&LEGACY_MEMO_KEY))
        .find_map(|(primary, secondary)| {
            if *primary == key {
                Some(KeyConvention::Primary)
            } else if *secondary == key {
                Some(KeyConvention::Secondary)
            } else {
                None
            }
        })
}

pub fn is_legacy_memo_key(key: &str) -> bool {
    let key = key.trim();
    key == LEGACY_MEMO_KEY.0 || key == LEGACY_MEMO_KEY.1
}

/// Structured contact record.
///
/// An empty string means "not found". Field order follows [`Field`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactRecord {
    fields: BTreeMap<Field, String>,
}

impl ContactRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a field, empty when absent
    pub fn get(&self, field: Field) -> &str {
        self.fields.get(&field).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        self.fields.insert(field, value.into());
    }

    pub fn remove(&mut self, field: Field) -> Option<String> {
        self.fields.remove(&field)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.fields.contains_key(&field)
    }

    /// True when the field is absent or holds only whitespace
    pub fn is_blank(&self, field: Field) -> bool {
        self.get(field).trim().is_empty()
    }

    /// Insert an empty value for every required field that is missing
    pub fn fill_required(&mut self) {
        for field in REQUIRED_FIELDS {
            self.fields.entry(field).or_default();
        }
    }

    pub fn has_all_required(&self) -> bool {
        REQUIRED_FIELDS.iter().all(|field| self.contains(*field))
    }

    pub fn fields(&self) -> impl Iterator<Item = (Field, &str)> {
        self.fields.iter().map(|(field, value)| (*field, value.as_str()))
    }

    /// Key/value pairs rendered in the given convention, in schema order
    pub fn entries(&self, convention: KeyConvention) -> Vec<(&'static str, &str)> {
        self.fields
            .iter()
            .map(|(field, value)| (field.key(convention), value.as_str()))
            .collect()
    }

    /// Plain JSON object keyed in the given convention
    pub fn to_map(&self, convention: KeyConvention) -> serde_json::Map<String, serde_json::Value> {
        self.entries(convention)
            .into_iter()
            .map(|(key, value)| (key.to_string(), serde_json::Value::String(value.to_string())))
            .collect()
    }

    /// Serializable view using the given key convention
    pub fn keyed(&self, convention: KeyConvention) -> KeyedRecord<'_> {
        KeyedRecord {
            record: self,
            convention,
        }
    }
}

/// Borrowed view of a [`ContactRecord`] that serializes with a chosen key convention
pub struct KeyedRecord<'a> {
    record: &'a ContactRecord,
    convention: KeyConvention,
}

impl Serialize for KeyedRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.record.fields.len()))?;
        for (key, value) in self.record.entries(self.convention) {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl Serialize for ContactRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.keyed(KeyConvention::Secondary).serialize(serializer)
    }
}
