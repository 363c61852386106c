//! k-nearest-neighbor classification against the reference table.

use ndarray::ArrayView1;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::ReferenceTable;

/// Neighbors consulted per vote.
pub const DEFAULT_K: usize = 3;

/// One reference row and its distance to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f32,
}

/// Majority label and the fraction of neighbors that voted for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub label: String,
    /// Majority count / neighbors considered, in (0, 1].
    pub confidence: f32,
    /// Neighbors that voted, nearest first.
    pub neighbors: Vec<Neighbor>,
}

/// Majority-vote classifier over the k nearest reference embeddings.
///
/// Holds its table immutably, so a single instance can serve any number of
/// concurrent readers.
#[derive(Debug, Clone)]
pub struct Classifier {
    table: ReferenceTable,
    k: usize,
}

impl Classifier {
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `k` is zero.
    pub fn new(table: ReferenceTable, k: usize) -> Result<Self> {
        if k == 0 {
            return Err(Error::configuration("k must be at least 1"));
        }
        Ok(Self { table, k })
    }

    #[must_use]
    pub const fn table(&self) -> &ReferenceTable {
        &self.table
    }

    #[must_use]
    pub const fn k(&self) -> usize {
        self.k
    }

    /// The `min(k, rows)` nearest reference rows by Euclidean distance.
    ///
    /// Equal distances keep table order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query dimension differs from the table's or
    /// the query contains non-finite values.
    pub fn neighbors(&self, embedding: ArrayView1<'_, f32>) -> Result<Vec<Neighbor>> {
        if embedding.len() != self.table.dim() {
            return Err(Error::configuration(format!(
                "embedding dimension {} does not match reference dimension {}",
                embedding.len(),
                self.table.dim()
            )));
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidParameter {
                name: "embedding".to_string(),
                reason: "contains non-finite values".to_string(),
            });
        }

        let mut neighbors: Vec<Neighbor> = self
            .table
            .embeddings()
            .rows()
            .into_iter()
            .enumerate()
            .map(|(index, row)| Neighbor {
                index,
                distance: euclidean(row, embedding),
            })
            .collect();

        // stable: ties keep table order
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        neighbors.truncate(self.k);
        Ok(neighbors)
    }

    /// Classify an embedding by majority vote of its nearest neighbors.
    ///
    /// Labels with equal vote counts resolve to the one whose first vote is
    /// nearest. This tie-break is an artifact of the ranking order, not a
    /// domain rule.
    ///
    /// # Errors
    ///
    /// See [`Self::neighbors`].
    #[allow(clippy::cast_precision_loss)]
    pub fn classify(&self, embedding: ArrayView1<'_, f32>) -> Result<ClassificationResult> {
        let neighbors = self.neighbors(embedding)?;

        // (label, votes) in order of first appearance, nearest first
        let mut tally: Vec<(&str, usize)> = Vec::new();
        for neighbor in &neighbors {
            let label = self.table.labels()[neighbor.index].as_str();
            match tally.iter_mut().find(|(l, _)| *l == label) {
                Some((_, votes)) => *votes += 1,
                None => tally.push((label, 1)),
            }
        }

        let mut winner: Option<(&str, usize)> = None;
        for &(label, votes) in &tally {
            if winner.map_or(true, |(_, best)| votes > best) {
                winner = Some((label, votes));
            }
        }
        let (label, votes) =
            winner.ok_or_else(|| Error::configuration("reference table yielded no neighbors"))?;

        let confidence = votes as f32 / neighbors.len() as f32;
        tracing::debug!("Classified as {label} with {votes}/{} votes", neighbors.len());

        Ok(ClassificationResult {
            label: label.to_string(),
            confidence,
            neighbors,
        })
    }
}

fn euclidean(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1, Array2};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn table(rows: Vec<Vec<f32>>, labels: &[&str]) -> ReferenceTable {
        ReferenceTable::from_rows(rows, labels.iter().map(ToString::to_string).collect()).unwrap()
    }

    #[test]
    fn test_exact_duplicate_with_same_label_cluster() {
        let table = table(
            vec![
                vec![0.0, 0.0],
                vec![10.0, 10.0],
                vec![10.1, 10.0],
                vec![10.0, 10.2],
                vec![-5.0, 3.0],
            ],
            &["healthy", "blight", "blight", "blight", "mold"],
        );
        let classifier = Classifier::new(table, DEFAULT_K).unwrap();

        let result = classifier.classify(array![10.0, 10.0].view()).unwrap();
        assert_eq!(result.label, "blight");
        assert!((result.confidence - 1.0).abs() < f32::EPSILON);
        assert_eq!(result.neighbors[0].index, 1);
        assert!(result.neighbors[0].distance.abs() < f32::EPSILON);
    }

    #[test]
    fn test_two_of_three() {
        let table = table(
            vec![vec![0.0], vec![1.0], vec![2.0], vec![50.0]],
            &["a", "b", "a", "b"],
        );
        let classifier = Classifier::new(table, 3).unwrap();

        let result = classifier.classify(array![0.9].view()).unwrap();
        assert_eq!(result.label, "a");
        assert!((result.confidence - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_three_way_tie_goes_to_nearest() {
        let table = table(vec![vec![0.0], vec![1.0], vec![3.0]], &["x", "y", "z"]);
        let classifier = Classifier::new(table, 3).unwrap();

        let result = classifier.classify(array![2.9].view()).unwrap();
        assert_eq!(result.label, "z");
        assert!((result.confidence - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_single_row_table_always_wins() {
        let table = table(vec![vec![1.0, 2.0, 3.0]], &["Potato___healthy"]);
        let classifier = Classifier::new(table, DEFAULT_K).unwrap();

        for query in [array![1.0, 2.0, 3.0], array![-100.0, 0.0, 7.5], Array1::zeros(3)] {
            let result = classifier.classify(query.view()).unwrap();
            assert_eq!(result.label, "Potato___healthy");
            assert!((result.confidence - 1.0).abs() < f32::EPSILON);
            assert_eq!(result.neighbors.len(), 1);
        }
    }

    #[test]
    fn test_dimension_mismatch_is_configuration_error() {
        let classifier = Classifier::new(table(vec![vec![1.0, 2.0]], &["a"]), 3).unwrap();
        let err = classifier.classify(array![1.0, 2.0, 3.0].view()).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_non_finite_query_rejected() {
        let classifier = Classifier::new(table(vec![vec![1.0]], &["a"]), 3).unwrap();
        assert!(classifier.classify(array![f32::NAN].view()).is_err());
    }

    #[test]
    fn test_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ReferenceTable>();
        assert_send_sync::<Classifier>();
    }

    #[test]
    fn test_zero_k_rejected() {
        let err = Classifier::new(table(vec![vec![1.0]], &["a"]), 0).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_confidence_is_a_vote_fraction_on_random_tables() {
        let mut rng = StdRng::seed_from_u64(7);
        let labels = ["a", "b", "c"];
        let rows = 60;
        let dim = 16;
        let embeddings = Array2::from_shape_fn((rows, dim), |_| rng.random::<f32>());
        let row_labels = (0..rows).map(|i| labels[i % 3].to_string()).collect();
        let classifier =
            Classifier::new(ReferenceTable::new(embeddings, row_labels).unwrap(), 3).unwrap();

        for _ in 0..25 {
            let query = Array1::from_shape_fn(dim, |_| rng.random::<f32>());
            let result = classifier.classify(query.view()).unwrap();
            let allowed = [1.0 / 3.0, 2.0 / 3.0, 1.0];
            assert!(allowed.iter().any(|c| (c - result.confidence).abs() < 1e-6));
            assert!(result
                .neighbors
                .windows(2)
                .all(|pair| pair[0].distance <= pair[1].distance));
        }
    }
}
