use anyhow::Result;
use card_extract::observability;
use card_extract::{AppConfig, CardPipeline, ContactRecord, ErrorKind};
use std::collections::BTreeMap;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file first
    dotenvy::dotenv().ok();

    let images: Vec<String> = std::env::args().skip(1).collect();
    if images.is_empty() {
        return Err(anyhow::anyhow!("usage: card-extract <image>..."));
    }

    let config = AppConfig::from_env()
        .map_err(|e| anyhow::anyhow!("{}. Please check your environment variables.", e))?;

    observability::init_tracing(&config.observability)?;
    let metrics_handle = observability::init_metrics(&config.observability)?;

    let pipeline = CardPipeline::from_config(&config)?;
    info!(images = images.len(), "Starting extraction");

    let mut records: Vec<(String, ContactRecord)> = Vec::new();
    let mut failures: BTreeMap<&'static str, usize> = BTreeMap::new();

    for image in &images {
        match pipeline.extract(image).await {
            Ok(record) => {
                println!("{}", serde_json::to_string(&record.keyed(config.output_keys))?);
                records.push((image.clone(), record));
            }
            Err(e) => {
                *failures.entry(e.kind.as_str()).or_default() += 1;
                eprintln!("{}: {}", image, e);
                eprintln!("  {}", e.user_message());
                if let Some(text) = &e.ocr_text {
                    eprintln!("  OCR text:\n{}", text);
                }
                if let Some(qr) = &e.qr_text {
                    eprintln!("  QR payload: {}", qr);
                }
                if e.kind == ErrorKind::QuotaLimited {
                    eprintln!("  Stopping early: remaining images would hit the same limit");
                    break;
                }
            }
        }
    }

    eprintln!(
        "Processed {} of {} image(s): {} extracted, {} failed",
        records.len() + failures.values().sum::<usize>(),
        images.len(),
        records.len(),
        failures.values().sum::<usize>()
    );
    for (kind, count) in &failures {
        eprintln!("  {}: {}", kind, count);
    }

    if let Some(handle) = metrics_handle {
        eprintln!("{}", handle.render());
    }

    Ok(())
}
