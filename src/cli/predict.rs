// src/cli/predict.rs — Offline prediction against a local table

use std::sync::Arc;

use crate::compute::DefaultBackend;
use crate::infra::config::Config;
use crate::service::{SessionService, UploadMetadata};
use crate::session::SessionKind;

pub async fn run_predict(config: &Config, dataset: &str, input: &str, kind: &str) -> anyhow::Result<()> {
    let kind: SessionKind = kind.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    if kind == SessionKind::Image {
        anyhow::bail!("predict needs a tabular kind (classifier or expert)");
    }
    let values = parse_input(input)?;
    let bytes = std::fs::read(dataset)
        .map_err(|e| anyhow::anyhow!("cannot read dataset '{dataset}': {e}"))?;

    let backend = Arc::new(DefaultBackend::from_config(&config.sweep));
    let service = SessionService::new(config, backend);
    let receipt = service.upload(kind, bytes).await?;
    if let UploadMetadata::Tabular { questions, .. } = &receipt.metadata {
        tracing::debug!("questions: {}", questions.join(", "));
    }

    let decision = service.predict(&receipt.session_id, &values).await;
    service.cleanup(&receipt.session_id);
    println!("{}", serde_json::to_string(&decision?)?);
    Ok(())
}

/// `1,0, 1 ,1` -> [1.0, 0.0, 1.0, 1.0]
fn parse_input(raw: &str) -> anyhow::Result<Vec<f64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .map_err(|_| anyhow::anyhow!("input value '{s}' is not a number"))
        })
        .collect()
}
