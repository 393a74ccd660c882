//! Observability module for tracing and metrics setup.
//!
//! This module provides:
//! - Structured logging with configurable level and format
//! - An optional Prometheus recorder whose rendering the binary prints on exit
//! - Span constructors shared by the pipeline stages
//!
//! The library only emits through the `tracing` and `metrics` facades; nothing
//! is recorded until the binary installs a subscriber and a recorder.

use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::prelude::*;

use crate::observability_config::{LogFormat, ObservabilityConfig};

/// Initialize structured logging with tracing and configuration
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("card_extract={}", config.log_level).parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("hyper=warn".parse()?);

    match config.log_format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_thread_names(false),
                )
                .try_init()?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_thread_names(true),
                )
                .try_init()?;
        }
    }

    tracing::info!(
        environment = %config.environment,
        log_level = %config.log_level,
        log_format = ?config.log_format,
        "Tracing initialized with structured logging"
    );
    Ok(())
}

/// Install the Prometheus recorder when metrics dumping is enabled
pub fn init_metrics(config: &ObservabilityConfig) -> Result<Option<PrometheusHandle>> {
    if !config.metrics_dump {
        return Ok(None);
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    tracing::info!("Metrics collection initialized");
    Ok(Some(handle))
}

/// Create a span covering one end-to-end extraction
pub fn pipeline_span(image_path: &str) -> tracing::Span {
    tracing::info_span!(
        "pipeline_run",
        image_path = image_path,
        component = "pipeline"
    )
}

/// Create a span for OCR operations
pub fn ocr_span(operation: &str) -> tracing::Span {
    tracing::info_span!("ocr_operation", operation = operation, component = "ocr")
}

/// Create a span for generative backend calls
pub fn llm_span(operation: &str, model: &str) -> tracing::Span {
    tracing::info_span!(
        "llm_operation",
        operation = operation,
        model = model,
        component = "llm"
    )
}

/// Record the outcome of one pipeline run
pub fn record_pipeline_metrics(result: &'static str, duration: std::time::Duration) {
    metrics::counter!("pipeline_runs_total", "result" => result).increment(1);
    metrics::histogram!("pipeline_duration_seconds").record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_disabled_installs_nothing() {
        let config = ObservabilityConfig::default();
        let handle = init_metrics(&config).expect("disabled metrics should not fail");
        assert!(handle.is_none());
    }

    #[test]
    fn test_spans_can_be_entered_without_subscriber() {
        let span = pipeline_span("/tmp/card.png");
        let _guard = span.enter();
        let inner = llm_span("generate_content", "gemini-test");
        let _inner_guard = inner.enter();
        record_pipeline_metrics("success", std::time::Duration::from_millis(5));
    }
}
