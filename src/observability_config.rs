//! # Observability Configuration
//!
//! Logging and metrics settings for the command-line binary.

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// Output format of the log subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Observability configuration for different environments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Environment name (development, staging, production)
    pub environment: String,
    /// Level for the crate's own log target
    pub log_level: String,
    pub log_format: LogFormat,
    /// Install a Prometheus recorder and print its rendering on exit
    pub metrics_dump: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            metrics_dump: false,
        }
    }
}

impl ObservabilityConfig {
    /// Load configuration from a key lookup (environment variables in production).
    /// Production defaults to JSON logs unless `LOG_FORMAT` says otherwise.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let defaults = Self::default();
        let mut config = Self {
            environment: lookup("ENVIRONMENT").unwrap_or(defaults.environment),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: defaults.log_format,
            metrics_dump: lookup("METRICS_DUMP")
                .unwrap_or_else(|| "false".to_string())
                .parse()
                .map_err(|_| {
                    AppError::Config("METRICS_DUMP must be 'true' or 'false'".to_string())
                })?,
        };

        config.log_format = match lookup("LOG_FORMAT") {
            Some(format) => format
                .parse()
                .map_err(|e: String| AppError::Config(format!("LOG_FORMAT: {}", e)))?,
            None if config.is_production() => LogFormat::Json,
            None => LogFormat::Pretty,
        };
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Validate configuration
    pub fn validate(&self) -> AppResult<()> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(AppError::Config(format!(
                "Invalid log level '{}', expected one of {}",
                self.log_level,
                LEVELS.join(", ")
            )));
        }
        Ok(())
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

    #[test]
    fn test_defaults() {
        let config = ObservabilityConfig::from_lookup(lookup(&[])).expect("defaults should load");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(!config.metrics_dump);
        assert!(!config.is_production());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = ObservabilityConfig::from_lookup(lookup(&[
            ("LOG_LEVEL", "debug"),
            ("LOG_FORMAT", "JSON"),
            ("METRICS_DUMP", "true"),
            ("ENVIRONMENT", "production"),
        ]))
        .expect("overrides should load");
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.metrics_dump);
        assert!(config.is_production());
    }

    #[test]
    fn test_production_defaults_to_json_logs() {
        let config = ObservabilityConfig::from_lookup(lookup(&[("ENVIRONMENT", "production")]))
            .expect("production config should load");
        assert_eq!(config.log_format, LogFormat::Json);

        let config = ObservabilityConfig::from_lookup(lookup(&[
            ("ENVIRONMENT", "production"),
            ("LOG_FORMAT", "pretty"),
        ]))
        .expect("explicit format should load");
        assert_eq!(config.log_format, LogFormat::Pretty);

        let config = ObservabilityConfig::from_lookup(lookup(&[("ENVIRONMENT", "staging")]))
            .expect("staging config should load");
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_invalid_values() {
        assert!(ObservabilityConfig::from_lookup(lookup(&[("LOG_FORMAT", "xml")])).is_err());
        assert!(ObservabilityConfig::from_lookup(lookup(&[("METRICS_DUMP", "yes")])).is_err());

        let config = ObservabilityConfig {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
