//! Fitted model artifacts.
//!
//! The training stage persists two artifacts: the feature standardizer and
//! the multinomial logistic-regression classifier. Both are stored as `.npz`
//! bundles of plain arrays, independent of the library that fitted them, so
//! prediction reconstructs the model with nothing but matrix algebra.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};
use ndarray_npy::{NpzReader, NpzWriter, ReadNpzError, WriteNpzError};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Standardizer artifact file name inside the classifier directory.
pub const STANDARDIZER_FILE: &str = "stdsc.npz";
/// Classifier artifact file name inside the classifier directory.
pub const CLASSIFIER_FILE: &str = "clf.npz";

/// Errors raised while persisting or applying fitted model artifacts.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("failed to open model artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to read model artifact: {0}")]
    ReadNpz(#[from] ReadNpzError),
    #[error("failed to write model artifact: {0}")]
    WriteNpz(#[from] WriteNpzError),
    #[error("data has {found} feature channels, but the model was fitted on {expected}")]
    FeatureCountMismatch { expected: usize, found: usize },
    #[error("standardizer arrays disagree: {offsets} offsets vs {scales} scales")]
    MismatchedScaler { offsets: usize, scales: usize },
    #[error(
        "classifier arrays disagree: {coefficients} coefficient columns, {intercepts} intercepts, {classes} classes"
    )]
    MismatchedClassifier {
        coefficients: usize,
        intercepts: usize,
        classes: usize,
    },
}

/// Per-feature standardization transform.
///
/// `offsets` holds the per-feature means seen at fit time and `scales` the
/// reciprocal standard deviations (constant features carry a scale of 1), so
/// applying the transform is `(x - offset) * scale`. The same fitted arrays
/// are used on the held-out split at training time and on whole volumes at
/// prediction time.
#[derive(Debug, Clone, PartialEq)]
pub struct Standardizer {
    offsets: Array1<f32>,
    scales: Array1<f32>,
}

impl Standardizer {
    pub fn new(offsets: Array1<f32>, scales: Array1<f32>) -> Result<Self, ModelError> {
        if offsets.len() != scales.len() {
            return Err(ModelError::MismatchedScaler {
                offsets: offsets.len(),
                scales: scales.len(),
            });
        }
        Ok(Self { offsets, scales })
    }

    pub fn n_features(&self) -> usize {
        self.offsets.len()
    }

    /// Applies the fitted transform to a voxel-by-feature matrix.
    pub fn apply(&self, x: ArrayView2<f32>) -> Result<Array2<f32>, ModelError> {
        if x.ncols() != self.n_features() {
            return Err(ModelError::FeatureCountMismatch {
                expected: self.n_features(),
                found: x.ncols(),
            });
        }
        let mut out = x.to_owned();
        Zip::from(out.columns_mut())
            .and(&self.offsets)
            .and(&self.scales)
            .for_each(|mut col, &offset, &scale| {
                col.mapv_inplace(|v| (v - offset) * scale);
            });
        Ok(out)
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let mut npz = NpzWriter::new(File::create(path)?);
        npz.add_array("offsets", &self.offsets)?;
        npz.add_array("scales", &self.scales)?;
        npz.finish()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let mut npz = NpzReader::new(File::open(path)?)?;
        let offsets: Array1<f32> = npz.by_name("offsets.npy")?;
        let scales: Array1<f32> = npz.by_name("scales.npy")?;
        Self::new(offsets, scales)
    }
}

/// Multinomial logistic-regression classifier over tissue classes.
///
/// The fitted parameters are `coefficients` with shape `(n_features,
/// n_classes)` and one intercept per class. `classes` stores the original
/// label values in ascending order, matching the coefficient columns.
#[derive(Debug, Clone, PartialEq)]
pub struct TissueClassifier {
    intercepts: Array1<f32>,
    coefficients: Array2<f32>,
    classes: Array1<f32>,
}

impl TissueClassifier {
    pub fn new(
        intercepts: Array1<f32>,
        coefficients: Array2<f32>,
        classes: Array1<f32>,
    ) -> Result<Self, ModelError> {
        if coefficients.ncols() != intercepts.len() || intercepts.len() != classes.len() {
            return Err(ModelError::MismatchedClassifier {
                coefficients: coefficients.ncols(),
                intercepts: intercepts.len(),
                classes: classes.len(),
            });
        }
        Ok(Self {
            intercepts,
            coefficients,
            classes,
        })
    }

    pub fn n_features(&self) -> usize {
        self.coefficients.nrows()
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn classes(&self) -> ArrayView1<f32> {
        self.classes.view()
    }

    /// Per-class probabilities for every row of `x`, shape `(n, n_classes)`.
    ///
    /// Row-softmax of the linear predictor `x·W + b`, computed against the
    /// row maximum so large activations cannot overflow.
    pub fn predict_probabilities(&self, x: ArrayView2<f32>) -> Result<Array2<f32>, ModelError> {
        if x.ncols() != self.n_features() {
            return Err(ModelError::FeatureCountMismatch {
                expected: self.n_features(),
                found: x.ncols(),
            });
        }
        let mut probs = x.dot(&self.coefficients) + &self.intercepts;
        for mut row in probs.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }
        Ok(probs)
    }

    /// Hard class label (the original label value) for each probability row.
    pub fn labels_from_probabilities(&self, probabilities: ArrayView2<f32>) -> Array1<f32> {
        probabilities
            .rows()
            .into_iter()
            .map(|row| self.classes[argmax(row)])
            .collect()
    }

    /// Hard class labels for every row of `x`.
    pub fn predict_classes(&self, x: ArrayView2<f32>) -> Result<Array1<f32>, ModelError> {
        let probs = self.predict_probabilities(x)?;
        Ok(self.labels_from_probabilities(probs.view()))
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let mut npz = NpzWriter::new(File::create(path)?);
        npz.add_array("intercepts", &self.intercepts)?;
        npz.add_array("coefficients", &self.coefficients)?;
        npz.add_array("classes", &self.classes)?;
        npz.finish()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let mut npz = NpzReader::new(File::open(path)?)?;
        let intercepts: Array1<f32> = npz.by_name("intercepts.npy")?;
        let coefficients: Array2<f32> = npz.by_name("coefficients.npy")?;
        let classes: Array1<f32> = npz.by_name("classes.npy")?;
        Self::new(intercepts, coefficients, classes)
    }
}

fn argmax(row: ArrayView1<f32>) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (idx, &value) in row.iter().enumerate() {
        if value > best_value {
            best = idx;
            best_value = value;
        }
    }
    best
}
