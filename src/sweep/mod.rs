// src/sweep/mod.rs — Parallel k-sweep over one image
//
// For an upper bound N, cluster the image once per k in 2..=N and return the
// artifacts ordered by k. Units fan out over the shared worker pool; the
// sweep waits for every unit before answering, and any failure fails the
// whole sweep.

pub mod pool;

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::compute::{Artifact, ComputeBackend, ComputeError};
use crate::infra::config::SweepConfig;
use crate::infra::errors::SessionError;

pub use pool::WorkerPool;

pub const MIN_K: usize = 2;
/// Hard ceiling on the sweep bound; `max_k` in config can only lower it.
pub const MAX_K: usize = 100;

pub struct SweepExecutor {
    backend: Arc<dyn ComputeBackend>,
    pool: WorkerPool,
    max_workers: usize,
    max_dimension: u32,
    max_k: usize,
}

impl SweepExecutor {
    pub fn new(backend: Arc<dyn ComputeBackend>, pool: WorkerPool, config: &SweepConfig) -> Self {
        Self {
            backend,
            pool,
            max_workers: config.max_workers.max(1),
            max_dimension: config.max_dimension.max(1),
            max_k: config.max_k.clamp(MIN_K, MAX_K),
        }
    }

    pub fn max_k(&self) -> usize {
        self.max_k
    }

    /// Check the sweep bound before any work is scheduled.
    pub fn validate(&self, n: i64) -> Result<usize, SessionError> {
        match usize::try_from(n) {
            Ok(k) if (MIN_K..=self.max_k).contains(&k) => Ok(k),
            _ => Err(SessionError::InvalidSweep { n, max: self.max_k }),
        }
    }

    /// Units allowed in flight for a sweep up to `n`.
    pub fn worker_count(&self, n: usize) -> usize {
        n.saturating_sub(1).clamp(1, self.max_workers)
    }

    /// Run the sweep. `results[i]` is the artifact for `k = i + 2`.
    pub async fn run(&self, image: Arc<RgbImage>, n: i64) -> Result<Vec<Artifact>, SessionError> {
        let n = self.validate(n)?;
        let started = Instant::now();

        let pixels = if needs_resize(&image, self.max_dimension) {
            let max_dimension = self.max_dimension;
            Arc::new(
                self.pool
                    .run(move || Ok(resize_for_clustering(&image, max_dimension)))
                    .await?,
            )
        } else {
            image
        };

        let workers = self.worker_count(n);
        tracing::info!(
            n,
            workers,
            width = pixels.width(),
            height = pixels.height(),
            "sweep started"
        );

        let mut units = stream::iter(MIN_K..=n)
            .map(|k| {
                let backend = Arc::clone(&self.backend);
                let pixels = Arc::clone(&pixels);
                let pool = self.pool.clone();
                async move {
                    let unit_started = Instant::now();
                    tracing::debug!(k, "cluster unit started");
                    let result = pool.run(move || backend.cluster_at_k(&pixels, k)).await;
                    (k, result, unit_started.elapsed())
                }
            })
            .buffer_unordered(workers);

        let mut slots: Vec<Option<Artifact>> = (MIN_K..=n).map(|_| None).collect();
        let mut first_failure: Option<ComputeError> = None;

        // Drain every unit, even after a failure, so nothing is still
        // running on this image when the caller releases the session.
        while let Some((k, result, elapsed)) = units.next().await {
            match result {
                Ok(artifact) => {
                    tracing::debug!(
                        k,
                        elapsed_ms = elapsed.as_millis() as u64,
                        bytes = artifact.bytes.len(),
                        "cluster unit complete"
                    );
                    slots[k - MIN_K] = Some(artifact);
                }
                Err(e) => {
                    tracing::warn!(k, elapsed_ms = elapsed.as_millis() as u64, "cluster unit failed: {e}");
                    first_failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_failure {
            return Err(e.into());
        }

        let artifacts = slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| {
                    SessionError::Invariant(format!("sweep unit k={} produced no artifact", i + MIN_K))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            n,
            artifacts = artifacts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sweep complete"
        );
        Ok(artifacts)
    }
}

fn needs_resize(image: &RgbImage, max_dimension: u32) -> bool {
    image.width().max(image.height()) > max_dimension
}

/// Scale so the longest side is at most `max_dimension`, keeping aspect.
pub fn resize_for_clustering(image: &RgbImage, max_dimension: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let longest = w.max(h);
    if longest <= max_dimension {
        return image.clone();
    }
    let scale = f64::from(max_dimension) / f64::from(longest);
    let nw = ((f64::from(w) * scale) as u32).max(1);
    let nh = ((f64::from(h) * scale) as u32).max(1);
    imageops::resize(image, nw, nh, FilterType::Triangle)
}
