// src/compute/types.rs

use base64::Engine;
use serde::Serialize;

/// A numeric feature table with one label per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    /// Feature column names, in input order. These double as the questions
    /// shown to the client.
    pub features: Vec<String>,
    pub label_column: String,
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<String>,
}

impl Dataset {
    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct labels in first-seen order.
    pub fn distinct_labels(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for label in &self.labels {
            if !seen.contains(label) {
                seen.push(label.clone());
            }
        }
        seen
    }
}

/// Output of a prediction: a decoded class label or a raw score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Prediction {
    Label(String),
    Score(f64),
}

/// One encoded image produced by a sweep unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub k: usize,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn jpeg(k: usize, bytes: Vec<u8>) -> Self {
        Self {
            k,
            mime: "image/jpeg",
            bytes,
        }
    }

    /// `data:<mime>;base64,<payload>` form, ready for an `<img src>`.
    pub fn to_data_url(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!("data:{};base64,{}", self.mime, encoded)
    }
}
