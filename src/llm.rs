//! # Generative Backend Module
//!
//! The field extractor talks to a language model through [`GenerativeBackend`].
//! [`GeminiBackend`] implements it against the Gemini `generateContent` REST
//! endpoint using an API key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, Instrument};

use crate::errors::{error_logging, AppError, AppResult};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const GEMINI_API_VERSION: &str = "v1beta";
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// Sampling parameters sent with every request
pub const TEMPERATURE: f64 = 0.1;
pub const TOP_P: f64 = 0.8;
pub const TOP_K: u32 = 40;

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Errors returned by a generative backend
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// The service answered with a non-success status
    Http { status: u16, message: String },
    /// The request never completed
    Transport(String),
    /// No answer within the configured number of seconds
    Timeout(u64),
    /// The answer did not contain generated text
    InvalidResponse(String),
}

impl BackendError {
    /// Quota or rate-limit refusal; these must not be retried immediately
    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429) || self.to_string().contains("429")
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Http { status, message } => {
                write!(f, "[LLM_HTTP] generateContent failed ({}): {}", status, message)
            }
            BackendError::Transport(msg) => write!(f, "[LLM_TRANSPORT] {}", msg),
            BackendError::Timeout(secs) => {
                write!(f, "[LLM_TIMEOUT] no response within {} seconds", secs)
            }
            BackendError::InvalidResponse(msg) => write!(f, "[LLM_RESPONSE] {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

/// Text generation seam used by the field extractor
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Send one prompt and return the generated text
    async fn generate(&self, prompt: &str) -> Result<String, BackendError>;
}

/// Connection settings for the Gemini API
#[derive(Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    pub api_key: String,
    /// Model id, e.g. `gemini-2.0-flash`
    pub model: String,
    pub base_url: String,
    pub request_timeout_secs: u64,
}

// Keeps the key out of logs
impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"***")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: String::new(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_API_TIMEOUT_SECS,
        }
    }
}

impl GeminiConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(AppError::Config("GEMINI_API_KEY is not set".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(AppError::Config("GEMINI_MODEL is not set".to_string()));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(AppError::Config(format!(
                "GEMINI_BASE_URL must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.request_timeout_secs == 0 || self.request_timeout_secs > 300 {
            return Err(AppError::Config(format!(
                "request_timeout_secs must be between 1 and 300, got {}",
                self.request_timeout_secs
            )));
        }
        Ok(())
    }
}

/// Gemini REST client
pub struct GeminiBackend {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiBackend {
    /// Build a client; fails on missing credentials or model
    pub fn new(config: GeminiConfig) -> AppResult<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn build_url(&self) -> String {
        format!(
            "{}/{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            GEMINI_API_VERSION,
            self.config.model
        )
    }
}

/// Request body for a single-turn prompt
pub fn build_request_body(prompt: &str) -> Value {
    let safety_settings: Vec<Value> = SAFETY_CATEGORIES
        .iter()
        .map(|category| json!({"category": category, "threshold": "BLOCK_NONE"}))
        .collect();

    json!({
        "contents": [{
            "role": "user",
            "parts": [{"text": prompt}]
        }],
        "generationConfig": {
            "temperature": TEMPERATURE,
            "topP": TOP_P,
            "topK": TOP_K
        },
        "safetySettings": safety_settings
    })
}

/// Concatenated text parts of the first candidate
pub fn extract_candidate_text(response: &Value) -> Result<String, BackendError> {
    let parts = response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array);

    let text: String = parts
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = response
            .pointer("/promptFeedback/blockReason")
            .or_else(|| response.pointer("/candidates/0/finishReason"))
            .and_then(Value::as_str)
            .unwrap_or("no candidates");
        return Err(BackendError::InvalidResponse(format!(
            "response contained no text ({})",
            reason
        )));
    }

    Ok(text.trim().to_string())
}

#[async_trait]
impl GenerativeBackend for GeminiBackend {
    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        let span = crate::observability::llm_span("generate_content", &self.config.model);
        async {
            let start_time = Instant::now();
            let url = self.build_url();

            let result = async {
                let response = self
                    .client
                    .post(&url)
                    .header("Content-Type", "application/json")
                    .header("x-goog-api-key", &self.config.api_key)
                    .json(&build_request_body(prompt))
                    .send()
                    .await
                    .map_err(|e| {
                        if e.is_timeout() {
                            BackendError::Timeout(self.config.request_timeout_secs)
                        } else {
                            BackendError::Transport(format!("generateContent request failed: {}", e))
                        }
                    })?;

                let status = response.status();
                let raw_text = response.text().await.map_err(|e| {
                    BackendError::Transport(format!("failed to read response body: {}", e))
                })?;

                if !status.is_success() {
                    return Err(BackendError::Http {
                        status: status.as_u16(),
                        message: raw_text.trim().to_string(),
                    });
                }

                let json: Value = serde_json::from_str(&raw_text).map_err(|e| {
                    BackendError::InvalidResponse(format!("generateContent decode failed: {}", e))
                })?;
                extract_candidate_text(&json)
            }
            .await;

            let duration = start_time.elapsed();
            metrics::histogram!("llm_request_duration_seconds").record(duration.as_secs_f64());

            match &result {
                Ok(text) => {
                    info!(
                        response_chars = text.chars().count(),
                        duration_ms = duration.as_millis() as u64,
                        "Received model response"
                    );
                    debug!(response = %text, "Model response");
                }
                Err(e) => error_logging::log_network_error(
                    e,
                    "generate_content",
                    Some(&self.config.base_url),
                    e.status(),
                ),
            }

            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GeminiConfig {
        GeminiConfig {
            api_key: "test-key".to_string(),
            model: "gemini-2.0-flash".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_request_body_shape() {
        let body = build_request_body("hello");
        assert_eq!(body.pointer("/contents/0/role"), Some(&json!("user")));
        assert_eq!(body.pointer("/contents/0/parts/0/text"), Some(&json!("hello")));
        assert_eq!(body.pointer("/generationConfig/temperature"), Some(&json!(0.1)));
        assert_eq!(body.pointer("/generationConfig/topP"), Some(&json!(0.8)));
        assert_eq!(body.pointer("/generationConfig/topK"), Some(&json!(40)));
        assert_eq!(
            body["safetySettings"].as_array().map(|s| s.len()),
            Some(SAFETY_CATEGORIES.len())
        );
    }

    #[test]
    fn test_extract_candidate_text_joins_parts() {
        let response = json!({
            "candidates": [{
                "content": {"parts": [{"text": "{\"名前\": "}, {"text": "\"山田\"}"}]},
                "finishReason": "STOP"
            }]
        });
        assert_eq!(
            extract_candidate_text(&response),
            Ok("{\"名前\": \"山田\"}".to_string())
        );
    }

    #[test]
    fn test_extract_candidate_text_reports_block_reason() {
        let response = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let err = extract_candidate_text(&response).expect_err("blocked prompt has no text");
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_rate_limit_detection() {
        let http = BackendError::Http {
            status: 429,
            message: "RESOURCE_EXHAUSTED".to_string(),
        };
        assert!(http.is_rate_limited());

        let wrapped = BackendError::Transport("upstream said 429 Too Many Requests".to_string());
        assert!(wrapped.is_rate_limited());

        let server = BackendError::Http {
            status: 500,
            message: "internal".to_string(),
        };
        assert!(!server.is_rate_limited());
        assert!(!BackendError::Timeout(30).is_rate_limited());
    }

    #[test]
    fn test_config_requires_key_and_model() {
        assert!(config().validate().is_ok());
        assert!(GeminiConfig::default().validate().is_err());

        let no_model = GeminiConfig {
            model: " ".to_string(),
            ..config()
        };
        assert!(no_model.validate().is_err());
        assert!(GeminiBackend::new(no_model).is_err());
    }

    #[test]
    fn test_debug_hides_api_key() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("test-key"));
    }

    #[test]
    fn test_build_url() {
        let backend = GeminiBackend::new(GeminiConfig {
            base_url: "http://localhost:8080/".to_string(),
            ..config()
        })
        .expect("backend should build");
        assert_eq!(
            backend.build_url(),
            "http://localhost:8080/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(backend.model(), "gemini-2.0-flash");
    }
}
