//! Labeled reference embeddings for nearest-neighbor classification.

use std::path::Path;

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// On-disk layout: two parallel arrays.
#[derive(Debug, Serialize, Deserialize)]
struct ReferenceFile {
    embeddings: Vec<Vec<f32>>,
    labels: Vec<String>,
}

/// Read-only table of reference embeddings and their labels.
///
/// Construction validates that the table is non-empty, that every row has
/// the same dimension, that values are finite and that there is exactly one
/// label per row. A table that exists is therefore always usable.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceTable {
    embeddings: Array2<f32>,
    labels: Vec<String>,
}

impl ReferenceTable {
    /// Build a table from a `(rows, dim)` matrix and one label per row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReferenceTable`] if the table is empty or malformed.
    pub fn new(embeddings: Array2<f32>, labels: Vec<String>) -> Result<Self> {
        let (rows, dim) = embeddings.dim();

        if rows == 0 {
            return Err(invalid("table has no rows"));
        }
        if dim == 0 {
            return Err(invalid("embeddings have zero dimension"));
        }
        if labels.len() != rows {
            return Err(invalid(format!(
                "{rows} embeddings but {} labels",
                labels.len()
            )));
        }
        if let Some((row, _)) = embeddings
            .rows()
            .into_iter()
            .enumerate()
            .find(|(_, r)| r.iter().any(|v| !v.is_finite()))
        {
            return Err(invalid(format!("row {row} contains non-finite values")));
        }

        Ok(Self { embeddings, labels })
    }

    /// Build a table from individual embedding rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReferenceTable`] if rows differ in length or the table
    /// would be invalid.
    pub fn from_rows(rows: Vec<Vec<f32>>, labels: Vec<String>) -> Result<Self> {
        let dim = rows.first().map_or(0, Vec::len);
        if let Some(row) = rows.iter().position(|r| r.len() != dim) {
            return Err(invalid(format!(
                "row {row} has dimension {} but row 0 has {dim}",
                rows[row].len()
            )));
        }

        let count = rows.len();
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        let embeddings = Array2::from_shape_vec((count, dim), flat)
            .map_err(|_| invalid(format!("cannot shape {count} rows of dimension {dim}")))?;

        Self::new(embeddings, labels)
    }

    /// Load and validate a table saved with [`Self::save`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unparsable or invalid. All of
    /// these are fatal at startup.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(invalid(format!("{} does not exist", path.display())));
        }

        let text = std::fs::read_to_string(path)?;
        let file: ReferenceFile =
            serde_json::from_str(&text).map_err(|source| Error::Serialization {
                path: path.to_path_buf(),
                source,
            })?;

        let table = Self::from_rows(file.embeddings, file.labels)?;
        tracing::info!(
            "Loaded reference table: {} rows of dimension {}",
            table.len(),
            table.dim()
        );
        Ok(table)
    }

    /// Write the table as JSON parallel arrays.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = ReferenceFile {
            embeddings: self.embeddings.rows().into_iter().map(|r| r.to_vec()).collect(),
            labels: self.labels.clone(),
        };
        let text = serde_json::to_string(&file).map_err(|source| Error::Serialization {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Number of rows; always at least one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always false: empty tables are rejected at construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Embedding dimension shared by every row.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.embeddings.ncols()
    }

    #[must_use]
    pub fn embeddings(&self) -> &Array2<f32> {
        &self.embeddings
    }

    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    #[must_use]
    pub fn row(&self, index: usize) -> Option<(ArrayView1<'_, f32>, &str)> {
        let label = self.labels.get(index)?;
        Some((self.embeddings.row(index), label.as_str()))
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::ReferenceTable {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_valid_table() {
        let table = ReferenceTable::new(array![[1.0, 0.0], [0.0, 1.0]], labels(&["a", "b"])).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.dim(), 2);
        let (row, label) = table.row(1).unwrap();
        assert_eq!(row.to_vec(), vec![0.0, 1.0]);
        assert_eq!(label, "b");
        assert!(table.row(2).is_none());
    }

    #[test]
    fn test_rejects_empty_and_mismatched() {
        let empty = ReferenceTable::new(Array2::zeros((0, 4)), vec![]);
        assert!(matches!(empty, Err(Error::ReferenceTable { .. })));

        let mismatched = ReferenceTable::new(Array2::zeros((2, 4)), labels(&["a"]));
        assert!(matches!(mismatched, Err(Error::ReferenceTable { .. })));

        let ragged = ReferenceTable::from_rows(vec![vec![1.0, 2.0], vec![1.0]], labels(&["a", "b"]));
        assert!(matches!(ragged, Err(Error::ReferenceTable { .. })));

        let nan = ReferenceTable::new(array![[1.0, f32::NAN]], labels(&["a"]));
        assert!(matches!(nan, Err(Error::ReferenceTable { .. })));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reference.json");
        let table =
            ReferenceTable::from_rows(vec![vec![0.25, -1.5, 3.0]], labels(&["Tomato_healthy"])).unwrap();

        table.save(&path).unwrap();
        assert_eq!(ReferenceTable::load(&path).unwrap(), table);
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let err = ReferenceTable::load(Path::new("/nonexistent/reference.json")).unwrap_err();
        assert!(matches!(err, Error::ReferenceTable { .. }));
    }

    #[test]
    fn test_unequal_parallel_arrays_in_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reference.json");
        std::fs::write(&path, r#"{"embeddings": [[1.0], [2.0]], "labels": ["a"]}"#).unwrap();

        let err = ReferenceTable::load(&path).unwrap_err();
        assert!(matches!(err, Error::ReferenceTable { .. }));
    }
}
