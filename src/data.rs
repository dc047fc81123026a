//! Reading and dumping per-voxel training arrays.
//!
//! Training data enters the pipeline as whitespace-delimited numeric text
//! tables (one row per voxel) and is re-serialized as NumPy `.npy` arrays so
//! the training stage can pool several subjects without re-parsing text.
//!
//! - Text tables are validated while they stream: every row must have the
//!   same number of columns and every field must parse as a float. Failures
//!   name the file, line and offending token.
//! - A one-column table loads as an `(n, 1)` matrix, so labels and
//!   single-channel features keep an explicit column axis on disk.

use log::info;
use ndarray::Array2;
use ndarray_npy::{ReadNpyError, WriteNpyError, read_npy, write_npy};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Text table of per-voxel feature channels, as produced upstream.
pub const FEATURES_TEXT: &str = "t1_features";
/// Text table of per-voxel tissue labels.
pub const LABELS_TEXT: &str = "labels";
/// Serialized feature matrix.
pub const FEATURES_NPY: &str = "X.npy";
/// Serialized label column.
pub const LABELS_NPY: &str = "y.npy";
/// Per-subject directory holding the dumped training arrays.
pub const TRAIN_MASK_DIR: &str = "trainMsk";

/// Errors raised while loading or dumping per-voxel arrays.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{}:{line}: '{token}' is not a number", path.display())]
    BadNumber {
        path: PathBuf,
        line: usize,
        token: String,
    },
    #[error("{}:{line}: expected {expected} columns, found {found}", path.display())]
    RaggedRow {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("{} contains no data rows", path.display())]
    EmptyTable { path: PathBuf },
    #[error("failed to read array: {0}")]
    ReadNpy(#[from] ReadNpyError),
    #[error("failed to write array: {0}")]
    WriteNpy(#[from] WriteNpyError),
    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// What `dump` wrote, for status reporting.
#[derive(Debug)]
pub struct DumpSummary {
    pub n_samples: usize,
    pub n_features: usize,
}

/// Loads a whitespace-delimited numeric table as an `(n, c)` matrix of `f32`.
///
/// Blank lines are skipped. A table with a single value per row comes back as
/// an `(n, 1)` column vector.
pub fn load_table(path: &Path) -> Result<Array2<f32>, DataError> {
    let file = File::open(path).map_err(|source| DataError::ReadFailed {
        path: path.to_owned(),
        source,
    })?;
    let reader = BufReader::new(file);

    let mut values: Vec<f32> = Vec::new();
    let mut n_rows = 0usize;
    let mut n_cols = 0usize;

    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| DataError::ReadFailed {
            path: path.to_owned(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }

        let mut row_len = 0usize;
        for token in line.split_whitespace() {
            let value: f32 = token.parse().map_err(|_| DataError::BadNumber {
                path: path.to_owned(),
                line: idx + 1,
                token: token.to_owned(),
            })?;
            values.push(value);
            row_len += 1;
        }

        if n_rows == 0 {
            n_cols = row_len;
        } else if row_len != n_cols {
            return Err(DataError::RaggedRow {
                path: path.to_owned(),
                line: idx + 1,
                expected: n_cols,
                found: row_len,
            });
        }
        n_rows += 1;
    }

    if n_rows == 0 {
        return Err(DataError::EmptyTable {
            path: path.to_owned(),
        });
    }

    Ok(Array2::from_shape_vec((n_rows, n_cols), values)?)
}

/// Writes a matrix as a `.npy` file.
pub fn write_matrix(path: &Path, matrix: &Array2<f32>) -> Result<(), DataError> {
    write_npy(path, matrix)?;
    Ok(())
}

/// Reads a matrix back from a `.npy` file.
pub fn read_matrix(path: &Path) -> Result<Array2<f32>, DataError> {
    let matrix: Array2<f32> = read_npy(path)?;
    Ok(matrix)
}

/// The directory holding a subject's dumped training arrays.
pub fn subject_dump_dir(rsxn_dir: &Path, subject: &str) -> PathBuf {
    rsxn_dir.join(subject).join(TRAIN_MASK_DIR)
}

/// Loads a subject's dumped `(X, y)` pair.
pub fn load_subject(rsxn_dir: &Path, subject: &str) -> Result<(Array2<f32>, Array2<f32>), DataError> {
    let dir = subject_dump_dir(rsxn_dir, subject);
    let x = read_matrix(&dir.join(FEATURES_NPY))?;
    let y = read_matrix(&dir.join(LABELS_NPY))?;
    Ok((x, y))
}

/// Dump stage: parse `t1_features` and `labels` from `dir` and serialize both
/// as `.npy` arrays next to them.
pub fn dump(dir: &Path) -> Result<DumpSummary, DataError> {
    let x = load_table(&dir.join(FEATURES_TEXT))?;
    let y = load_table(&dir.join(LABELS_TEXT))?;
    info!(
        "parsed {} feature rows x {} channels, {} label rows",
        x.nrows(),
        x.ncols(),
        y.nrows()
    );

    write_matrix(&dir.join(FEATURES_NPY), &x)?;
    write_matrix(&dir.join(LABELS_NPY), &y)?;

    Ok(DumpSummary {
        n_samples: x.nrows(),
        n_features: x.ncols(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn single_column_table_loads_as_column_vector() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels");
        fs::write(&path, "1\n2\n\n3\n").unwrap();

        let table = load_table(&path).unwrap();
        assert_eq!(table, array![[1.0], [2.0], [3.0]]);
    }

    #[test]
    fn multi_column_table_keeps_row_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t1_features");
        fs::write(&path, "1.5 2.5\n-3 4e2\n").unwrap();

        let table = load_table(&path).unwrap();
        assert_eq!(table, array![[1.5, 2.5], [-3.0, 400.0]]);
    }

    #[test]
    fn ragged_row_is_rejected_with_line_number() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t1_features");
        fs::write(&path, "1 2\n3\n").unwrap();

        match load_table(&path) {
            Err(DataError::RaggedRow { line, expected, found, .. }) => {
                assert_eq!((line, expected, found), (2, 2, 1));
            }
            other => panic!("expected RaggedRow, got {other:?}"),
        }
    }

    #[test]
    fn bad_token_is_rejected_with_token() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels");
        fs::write(&path, "1\noops\n").unwrap();

        match load_table(&path) {
            Err(DataError::BadNumber { line, token, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(token, "oops");
            }
            other => panic!("expected BadNumber, got {other:?}"),
        }
    }

    #[test]
    fn empty_table_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels");
        fs::write(&path, "\n\n").unwrap();
        assert!(matches!(
            load_table(&path),
            Err(DataError::EmptyTable { .. })
        ));
    }

    #[test]
    fn npy_round_trip_is_exact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("X.npy");
        let matrix = array![[1.25f32, -0.5], [3.0, 1e-7], [f32::MIN, f32::MAX]];

        write_matrix(&path, &matrix).unwrap();
        let back = read_matrix(&path).unwrap();
        assert_eq!(matrix, back);
    }

    #[test]
    fn dump_writes_both_arrays() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(FEATURES_TEXT), "0.1 0.2\n0.3 0.4\n").unwrap();
        fs::write(dir.path().join(LABELS_TEXT), "1\n2\n").unwrap();

        let summary = dump(dir.path()).unwrap();
        assert_eq!(summary.n_samples, 2);
        assert_eq!(summary.n_features, 2);

        let x = read_matrix(&dir.path().join(FEATURES_NPY)).unwrap();
        let y = read_matrix(&dir.path().join(LABELS_NPY)).unwrap();
        assert_eq!(x, array![[0.1, 0.2], [0.3, 0.4]]);
        assert_eq!(y, array![[1.0], [2.0]]);
    }
}
