// src/compute/knn.rs — k-nearest-neighbour classifier with label encoding

use super::{Classifier, ComputeError, Dataset, Prediction};

pub const DEFAULT_NEIGHBOURS: usize = 3;

/// Stores the training table and votes among the `k` closest rows.
/// Labels are encoded in first-seen order and decoded on the way out.
#[derive(Debug, Clone)]
pub struct KnnClassifier {
    k: usize,
    rows: Vec<Vec<f64>>,
    encoded: Vec<usize>,
    decoder: Vec<String>,
}

impl KnnClassifier {
    pub fn fit(dataset: &Dataset, k: usize) -> Result<Self, ComputeError> {
        if dataset.is_empty() {
            return Err(ComputeError::Training("training data is empty".into()));
        }
        if dataset.rows.len() != dataset.labels.len() {
            return Err(ComputeError::Training(format!(
                "{} rows but {} labels",
                dataset.rows.len(),
                dataset.labels.len()
            )));
        }
        let width = dataset.feature_count();
        if let Some(i) = dataset.rows.iter().position(|r| r.len() != width) {
            return Err(ComputeError::Training(format!(
                "row {} has {} values, expected {width}",
                i + 1,
                dataset.rows[i].len()
            )));
        }

        let decoder = dataset.distinct_labels();
        let encoded = dataset
            .labels
            .iter()
            .map(|l| decoder.iter().position(|d| d == l).unwrap_or_default())
            .collect();

        Ok(Self {
            k: k.max(1),
            rows: dataset.rows.clone(),
            encoded,
            decoder,
        })
    }

    pub fn classes(&self) -> &[String] {
        &self.decoder
    }
}

impl Classifier for KnnClassifier {
    fn predict(&self, input: &[f64]) -> Result<Prediction, ComputeError> {
        let width = self.rows.first().map_or(0, Vec::len);
        if input.len() != width {
            return Err(ComputeError::Prediction(format!(
                "expected {width} values, got {}",
                input.len()
            )));
        }
        if input.iter().any(|v| !v.is_finite()) {
            return Err(ComputeError::Prediction("input contains non-finite values".into()));
        }

        let mut by_distance: Vec<(f64, usize)> = self
            .rows
            .iter()
            .zip(&self.encoded)
            .map(|(row, &label)| (squared_distance(row, input), label))
            .collect();
        by_distance.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut votes = vec![0usize; self.decoder.len()];
        for (_, label) in by_distance.iter().take(self.k) {
            votes[*label] += 1;
        }

        // Ties go to the lowest encoded label.
        let winner = votes
            .iter()
            .enumerate()
            .fold((0, 0), |best, (label, &count)| {
                if count > best.1 {
                    (label, count)
                } else {
                    best
                }
            })
            .0;

        self.decoder
            .get(winner)
            .cloned()
            .map(Prediction::Label)
            .ok_or_else(|| ComputeError::Prediction("no classes were learned".into()))
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(rows: Vec<Vec<f64>>, labels: &[&str]) -> Dataset {
        Dataset {
            features: (0..rows[0].len()).map(|i| format!("q{i}")).collect(),
            label_column: "answer".into(),
            rows,
            labels: labels.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_majority_vote() {
        let ds = dataset(
            vec![vec![0.0], vec![0.1], vec![0.2], vec![5.0], vec![5.1]],
            &["low", "low", "low", "high", "high"],
        );
        let knn = KnnClassifier::fit(&ds, 3).unwrap();
        assert_eq!(knn.predict(&[0.05]).unwrap(), Prediction::Label("low".into()));
        assert_eq!(knn.predict(&[5.05]).unwrap(), Prediction::Label("high".into()));
    }

    #[test]
    fn test_k_larger_than_dataset() {
        let ds = dataset(vec![vec![1.0, 1.0]], &["only"]);
        let knn = KnnClassifier::fit(&ds, 3).unwrap();
        assert_eq!(knn.predict(&[9.0, 9.0]).unwrap(), Prediction::Label("only".into()));
    }

    #[test]
    fn test_tie_goes_to_first_seen_label() {
        let ds = dataset(vec![vec![0.0], vec![2.0]], &["b", "a"]);
        let knn = KnnClassifier::fit(&ds, 2).unwrap();
        assert_eq!(knn.classes(), &["b".to_string(), "a".to_string()]);
        assert_eq!(knn.predict(&[1.0]).unwrap(), Prediction::Label("b".into()));
    }

    #[test]
    fn test_wrong_width_rejected() {
        let ds = dataset(vec![vec![0.0, 0.0, 0.0, 0.0]], &["x"]);
        let knn = KnnClassifier::fit(&ds, 3).unwrap();
        let err = knn.predict(&[0.0, 0.0, 0.0]).unwrap_err();
        assert!(err.to_string().contains("expected 4 values, got 3"));
    }

    #[test]
    fn test_empty_dataset_rejected() {
        let ds = Dataset {
            features: vec!["a".into()],
            label_column: "y".into(),
            rows: vec![],
            labels: vec![],
        };
        assert!(matches!(
            KnnClassifier::fit(&ds, 3),
            Err(ComputeError::Training(_))
        ));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let mut ds = dataset(vec![vec![0.0, 1.0], vec![1.0, 1.0]], &["a", "b"]);
        ds.rows[1].pop();
        let err = KnnClassifier::fit(&ds, 3).unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }
}
