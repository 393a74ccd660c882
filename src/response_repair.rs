//! # Response Repair Module
//!
//! Recovers a JSON object from a generative model's free-form answer. The
//! answer is first unwrapped (code fence, then the outermost brace span) and
//! then handed to an ordered list of parsers; the first one that yields an
//! object wins.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, warn};

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)```(?:[A-Za-z]+)?\s*(.*?)\s*```")
        .expect("Invalid code fence regex pattern");
    static ref SINGLE_QUOTED_KEY: Regex =
        Regex::new(r"'([^']*)'(\s*:)").expect("Invalid single-quoted key regex pattern");
    static ref SINGLE_QUOTED_VALUE: Regex =
        Regex::new(r":\s*'([^']*)'").expect("Invalid single-quoted value regex pattern");
    static ref UNQUOTED_KEY: Regex = Regex::new(
        r"([{,])\s*([A-Za-z0-9_\p{Hiragana}\p{Katakana}\p{Han}ー]+)\s*:"
    )
    .expect("Invalid unquoted key regex pattern");
    static ref TRAILING_COMMA: Regex =
        Regex::new(r",(\s*[}\]])").expect("Invalid trailing comma regex pattern");
    static ref QUOTED_PAIR: Regex =
        Regex::new(r#""([^"]+)"\s*:\s*"([^"]*)""#).expect("Invalid key/value pair regex pattern");
}

/// Parser that produced the object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStrategy {
    /// The unwrapped text was valid JSON
    Direct,
    /// Valid after quote and key normalization
    Cleaned,
    /// Recovered from individual `"key": "value"` pairs
    PairScan,
}

impl RepairStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairStrategy::Direct => "direct",
            RepairStrategy::Cleaned => "cleaned",
            RepairStrategy::PairScan => "pair_scan",
        }
    }
}

/// A recovered object and how it was recovered
#[derive(Debug, Clone, PartialEq)]
pub struct RepairedResponse {
    pub object: Map<String, Value>,
    pub strategy: RepairStrategy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RepairError {
    /// The model returned nothing
    EmptyResponse,
    /// No parser could recover a single key/value pair
    NoPairs { preview: String },
}

impl fmt::Display for RepairError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairError::EmptyResponse => write!(f, "[PARSE] empty response from model"),
            RepairError::NoPairs { preview } => {
                write!(f, "[PARSE] no key/value pairs found in response: {}", preview)
            }
        }
    }
}

impl std::error::Error for RepairError {}

type Parser = fn(&str) -> Option<Map<String, Value>>;

/// Parsers in the order they are tried
const PARSERS: [(RepairStrategy, Parser); 3] = [
    (RepairStrategy::Direct, parse_direct),
    (RepairStrategy::Cleaned, parse_cleaned),
    (RepairStrategy::PairScan, scan_pairs),
];

/// Keep only the content of the first Markdown code fence, if there is one
pub fn strip_code_fence(text: &str) -> &str {
    CODE_FENCE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
}

/// Span from the first `{` to the last `}`, or the whole text
pub fn extract_brace_span(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

/// Parse as JSON; only objects count
pub fn parse_direct(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

/// Normalize single quotes, strip surrounding text, quote bare keys and drop
/// trailing commas, then parse
pub fn parse_cleaned(text: &str) -> Option<Map<String, Value>> {
    let cleaned = clean_json_text(text);
    debug!(cleaned = %cleaned, "Retrying parse on cleaned response");
    parse_direct(&cleaned)
}

fn clean_json_text(text: &str) -> String {
    let cleaned = SINGLE_QUOTED_KEY.replace_all(text, "\"$1\"$2");
    let cleaned = SINGLE_QUOTED_VALUE.replace_all(&cleaned, ": \"$1\"");
    let cleaned = extract_brace_span(&cleaned);
    outside_strings(cleaned, |segment| {
        let quoted = UNQUOTED_KEY.replace_all(segment, "$1\"$2\":");
        TRAILING_COMMA.replace_all(&quoted, "$1").into_owned()
    })
}

/// Apply `rewrite` to the parts of `text` that sit outside double-quoted
/// string literals; literal contents are copied untouched
fn outside_strings(text: &str, rewrite: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut segment_start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                out.push_str(&text[segment_start..=i]);
                segment_start = i + 1;
            }
        } else if c == '"' {
            out.push_str(&rewrite(&text[segment_start..i]));
            segment_start = i;
            in_string = true;
        }
    }

    // An unterminated literal is left as-is for the pair scan
    let tail = &text[segment_start..];
    if in_string {
        out.push_str(tail);
    } else {
        out.push_str(&rewrite(tail));
    }
    out
}

/// Collect every `"key": "value"` pair; the first occurrence of a key wins
pub fn scan_pairs(text: &str) -> Option<Map<String, Value>> {
    let scan = |source: &str| {
        let mut object = Map::new();
        for caps in QUOTED_PAIR.captures_iter(source) {
            let key = caps[1].to_string();
            if !object.contains_key(&key) {
                object.insert(key, Value::String(caps[2].to_string()));
            }
        }
        object
    };

    let object = scan(&clean_json_text(text));
    let object = if object.is_empty() { scan(text) } else { object };
    (!object.is_empty()).then_some(object)
}

/// Recover a JSON object from a raw model answer
pub fn repair_response(raw: &str) -> Result<RepairedResponse, RepairError> {
    if raw.trim().is_empty() {
        return Err(RepairError::EmptyResponse);
    }

    let unfenced = strip_code_fence(raw.trim());
    let candidate = extract_brace_span(unfenced);

    for (strategy, parser) in PARSERS {
        if let Some(object) = parser(candidate) {
            if strategy != RepairStrategy::Direct {
                warn!(strategy = strategy.as_str(), "Model response needed repair");
            }
            metrics::counter!("response_repair_total", "strategy" => strategy.as_str())
                .increment(1);
            return Ok(RepairedResponse { object, strategy });
        }
    }

    metrics::counter!("response_repair_total", "strategy" => "failed").increment(1);
    Err(RepairError::NoPairs {
        preview: raw.chars().take(100).collect(),
    })
}
