// src/compute/mod.rs — Compute backend abstraction
//
// The session core treats training, prediction and clustering as opaque,
// possibly slow, CPU-bound calls. Everything here is synchronous; callers
// move the work onto the worker pool.

pub mod kmeans;
pub mod knn;
pub mod types;

use std::fmt;
use std::sync::Arc;

use image::RgbImage;
use thiserror::Error;

pub use types::{Artifact, Dataset, Prediction};

#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("training failed: {0}")]
    Training(String),

    #[error("prediction failed: {0}")]
    Prediction(String),

    #[error("clustering failed for k={k}: {message}")]
    Clustering { k: usize, message: String },

    #[error("image encoding failed: {0}")]
    Encoding(#[from] image::ImageError),

    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("{0}")]
    Failed(String),
}

/// A trained model. Built once per session and shared read-only afterwards.
pub trait Classifier: Send + Sync + fmt::Debug {
    fn predict(&self, input: &[f64]) -> Result<Prediction, ComputeError>;
}

pub type Model = Arc<dyn Classifier>;

pub trait ComputeBackend: Send + Sync {
    fn train(&self, dataset: &Dataset) -> Result<Model, ComputeError>;

    fn predict(&self, model: &Model, input: &[f64]) -> Result<Prediction, ComputeError> {
        model.predict(input)
    }

    /// Quantise `pixels` to `k` colours and return the encoded result.
    fn cluster_at_k(&self, pixels: &RgbImage, k: usize) -> Result<Artifact, ComputeError>;
}

/// k-nearest-neighbour classification plus k-means colour quantisation.
#[derive(Debug, Clone)]
pub struct DefaultBackend {
    pub neighbours: usize,
    pub kmeans: kmeans::KMeansParams,
    pub jpeg_quality: u8,
}

impl Default for DefaultBackend {
    fn default() -> Self {
        Self::from_config(&crate::infra::config::SweepConfig::default())
    }
}

impl DefaultBackend {
    pub fn from_config(config: &crate::infra::config::SweepConfig) -> Self {
        Self {
            neighbours: knn::DEFAULT_NEIGHBOURS,
            kmeans: kmeans::KMeansParams {
                max_iterations: config.max_iterations,
                seed: config.seed,
                sample_limit: config.sample_limit,
                ..kmeans::KMeansParams::default()
            },
            jpeg_quality: config.jpeg_quality,
        }
    }
}

impl ComputeBackend for DefaultBackend {
    fn train(&self, dataset: &Dataset) -> Result<Model, ComputeError> {
        let model = knn::KnnClassifier::fit(dataset, self.neighbours)?;
        Ok(Arc::new(model))
    }

    fn cluster_at_k(&self, pixels: &RgbImage, k: usize) -> Result<Artifact, ComputeError> {
        let quantised = kmeans::quantize(pixels, k, &self.kmeans)?;
        let bytes = kmeans::encode_jpeg(&quantised, self.jpeg_quality)?;
        Ok(Artifact::jpeg(k, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_dataset() -> Dataset {
        Dataset {
            features: vec!["fever".into(), "cough".into()],
            label_column: "diagnosis".into(),
            rows: vec![
                vec![1.0, 1.0],
                vec![1.0, 0.9],
                vec![0.9, 1.0],
                vec![0.0, 0.0],
                vec![0.1, 0.0],
                vec![0.0, 0.1],
            ],
            labels: vec![
                "flu".into(),
                "flu".into(),
                "flu".into(),
                "healthy".into(),
                "healthy".into(),
                "healthy".into(),
            ],
        }
    }

    #[test]
    fn test_default_backend_train_then_predict() {
        let backend = DefaultBackend::default();
        let model = backend.train(&toy_dataset()).unwrap();
        let p = backend.predict(&model, &[1.0, 1.0]).unwrap();
        assert_eq!(p, Prediction::Label("flu".into()));
        let p = backend.predict(&model, &[0.0, 0.0]).unwrap();
        assert_eq!(p, Prediction::Label("healthy".into()));
    }

    #[test]
    fn test_default_backend_cluster_produces_jpeg() {
        let backend = DefaultBackend::default();
        let img = RgbImage::from_fn(10, 10, |x, _| {
            if x < 5 {
                image::Rgb([255, 0, 0])
            } else {
                image::Rgb([0, 0, 255])
            }
        });
        let artifact = backend.cluster_at_k(&img, 2).unwrap();
        assert_eq!(artifact.k, 2);
        assert_eq!(artifact.mime, "image/jpeg");
        assert_eq!(&artifact.bytes[..2], &[0xFF, 0xD8]);
    }
}
