// src/cli/sweep.rs — Offline sweep: one JPEG per k

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::compute::DefaultBackend;
use crate::infra::config::Config;
use crate::service::SessionService;
use crate::session::SessionKind;

pub async fn run_sweep(config: &Config, image: &str, n: i64, out: &str) -> anyhow::Result<()> {
    let bytes = std::fs::read(image)
        .map_err(|e| anyhow::anyhow!("cannot read image '{image}': {e}"))?;
    let out_dir = Path::new(out);
    std::fs::create_dir_all(out_dir)?;

    let backend = Arc::new(DefaultBackend::from_config(&config.sweep));
    let service = SessionService::new(config, backend);
    let receipt = service.upload(SessionKind::Image, bytes).await?;
    let artifacts = service.process_sweep(&receipt.session_id, n).await;
    service.cleanup(&receipt.session_id);
    let artifacts = artifacts?;

    let stem = Path::new(image)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    for artifact in &artifacts {
        let path = output_path(out_dir, stem, artifact.k);
        std::fs::write(&path, &artifact.bytes)?;
        println!("k={:<3} {}", artifact.k, path.display());
    }
    println!("Wrote {} images to {}", artifacts.len(), out_dir.display());
    Ok(())
}

fn output_path(dir: &Path, stem: &str, k: usize) -> PathBuf {
    dir.join(format!("{stem}_k{k:03}.jpg"))
}
