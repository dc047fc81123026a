//! Classifier training.
//!
//! Pools the dumped per-voxel arrays of several training subjects, splits
//! them into train/test partitions, fits a feature standardizer and a
//! multinomial logistic-regression model, and persists both together with a
//! provenance report. The fitted parameters are extracted into the plain
//! artifacts in [`crate::model`], so the prediction stage does not depend on
//! the fitting library.

use crate::data::{self, DataError};
use crate::model::{CLASSIFIER_FILE, ModelError, STANDARDIZER_FILE, Standardizer, TissueClassifier};
use crate::report::{RUN_INFO_FILE, ReportError, RunInfo};
use linfa::dataset::Dataset;
use linfa::metrics::ToConfusionMatrix;
use linfa::traits::{Fit, Predict, Transformer};
use linfa_logistic::MultiLogisticRegression;
use linfa_preprocessing::linear_scaling::LinearScaler;
use log::{debug, info};
use ndarray::{Array1, Axis};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fraction of pooled voxels used for fitting; the rest score the model.
const TRAIN_FRACTION: f32 = 0.8;
/// Fixed shuffle seed, so a rerun on the same data reproduces the split.
const SPLIT_SEED: u64 = 42;
/// L2 penalty weight on the logistic coefficients.
const L2_PENALTY: f32 = 1e4;
const MAX_ITERATIONS: u64 = 200;

/// Errors raised by the training stage.
#[derive(Error, Debug)]
pub enum TrainError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(
        "{subject} does not have {file} in its trainMsk directory. Run `voxseg dump` for that subject first."
    )]
    MissingSubjectData { subject: String, file: &'static str },
    #[error("classifier already exists in {}. Delete or move it to retrain.", dir.display())]
    ClassifierExists { dir: PathBuf },
    #[error("{} is too shallow to locate the study data directory", dir.display())]
    ShallowTrainingDir { dir: PathBuf },
    #[error("{subject} has {found} feature channels, expected {expected}")]
    FeatureCountMismatch {
        subject: String,
        expected: usize,
        found: usize,
    },
    #[error("{subject} has {features} feature rows but {labels} labels")]
    SampleCountMismatch {
        subject: String,
        features: usize,
        labels: usize,
    },
    #[error("label {value} is not a non-negative integer class")]
    InvalidLabel { value: f32 },
    #[error("failed to fit the feature standardizer: {0}")]
    ScalerFit(String),
    #[error("failed to fit the logistic regression: {0}")]
    ModelFit(String),
    #[error("failed to score the held-out split: {0}")]
    Evaluate(String),
    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Summary of a completed training run.
#[derive(Debug)]
pub struct TrainOutcome {
    pub classifier_dir: PathBuf,
    pub accuracy: f32,
    pub n_samples: usize,
    pub n_features: usize,
    pub n_classes: usize,
}

/// Trains the tissue classifier from the given subjects' dumped arrays.
///
/// `rsxn_dir` is the per-study directory holding one `<subject>/trainMsk`
/// dump per subject; artifacts land in the `classifier` directory of the
/// study's data root (the fourth ancestor of `rsxn_dir`).
pub fn train(rsxn_dir: &Path, subjects: &[String]) -> Result<TrainOutcome, TrainError> {
    let data_dir = rsxn_dir
        .ancestors()
        .nth(4)
        .filter(|dir| !dir.as_os_str().is_empty())
        .ok_or_else(|| TrainError::ShallowTrainingDir {
            dir: rsxn_dir.to_owned(),
        })?;
    let classifier_dir = data_dir.join("classifier");

    // Every subject must have been dumped before any work starts.
    for subject in subjects {
        let dump_dir = data::subject_dump_dir(rsxn_dir, subject);
        for file in [data::FEATURES_NPY, data::LABELS_NPY] {
            if !dump_dir.join(file).is_file() {
                return Err(TrainError::MissingSubjectData {
                    subject: subject.clone(),
                    file,
                });
            }
        }
    }

    let standardizer_path = classifier_dir.join(STANDARDIZER_FILE);
    let classifier_path = classifier_dir.join(CLASSIFIER_FILE);
    if standardizer_path.is_file() && classifier_path.is_file() {
        return Err(TrainError::ClassifierExists { dir: classifier_dir });
    }
    fs::create_dir_all(&classifier_dir)?;

    let (x_all, y_all, n_features) = pool_subjects(rsxn_dir, subjects)?;
    let n_samples = x_all.nrows();
    let targets = class_ids(&y_all)?;

    let mut rng = SmallRng::seed_from_u64(SPLIT_SEED);
    let (train_split, test_split) = Dataset::new(x_all, targets)
        .shuffle(&mut rng)
        .split_with_ratio(TRAIN_FRACTION);
    info!(
        "pooled {} voxels: {} train, {} test",
        n_samples,
        train_split.records.nrows(),
        test_split.records.nrows()
    );

    // Class values in ascending order, matching the fitted coefficient
    // columns.
    let classes: Array1<f32> = train_split
        .targets
        .iter()
        .copied()
        .collect::<BTreeSet<usize>>()
        .into_iter()
        .map(|class| class as f32)
        .collect();

    let scaler = LinearScaler::standard()
        .fit(&train_split)
        .map_err(|e| TrainError::ScalerFit(e.to_string()))?;
    let standardizer = Standardizer::new(scaler.offsets().clone(), scaler.scales().clone())?;
    let train_split = scaler.transform(train_split);
    let test_split = scaler.transform(test_split);

    let model = MultiLogisticRegression::default()
        .alpha(L2_PENALTY)
        .max_iterations(MAX_ITERATIONS)
        .fit(&train_split)
        .map_err(|e| TrainError::ModelFit(e.to_string()))?;

    let predictions = model.predict(&test_split);
    let confusion = predictions
        .confusion_matrix(&test_split)
        .map_err(|e| TrainError::Evaluate(e.to_string()))?;
    debug!("held-out confusion matrix: {confusion:?}");
    let accuracy = confusion.accuracy();

    let classifier = TissueClassifier::new(
        model.intercept().clone(),
        model.params().clone(),
        classes,
    )?;
    standardizer.save(&standardizer_path)?;
    classifier.save(&classifier_path)?;
    RunInfo::collect(subjects, accuracy, n_features).write(&classifier_dir.join(RUN_INFO_FILE))?;

    Ok(TrainOutcome {
        classifier_dir,
        accuracy,
        n_samples,
        n_features,
        n_classes: classifier.n_classes(),
    })
}

/// Stacks all subjects' feature rows and flattens their label columns.
fn pool_subjects(
    rsxn_dir: &Path,
    subjects: &[String],
) -> Result<(ndarray::Array2<f32>, Array1<f32>, usize), TrainError> {
    let mut feature_blocks = Vec::with_capacity(subjects.len());
    let mut label_blocks = Vec::with_capacity(subjects.len());
    let mut n_features = 0usize;

    for subject in subjects {
        info!("loading training data for {subject}");
        let (x, y) = data::load_subject(rsxn_dir, subject)?;
        if feature_blocks.is_empty() {
            n_features = x.ncols();
        } else if x.ncols() != n_features {
            return Err(TrainError::FeatureCountMismatch {
                subject: subject.clone(),
                expected: n_features,
                found: x.ncols(),
            });
        }
        if x.nrows() != y.len() {
            return Err(TrainError::SampleCountMismatch {
                subject: subject.clone(),
                features: x.nrows(),
                labels: y.len(),
            });
        }
        feature_blocks.push(x);
        label_blocks.push(y);
    }

    let views: Vec<_> = feature_blocks.iter().map(|block| block.view()).collect();
    let x_all = ndarray::concatenate(Axis(0), &views)?;
    let y_all: Array1<f32> = label_blocks
        .iter()
        .flat_map(|block| block.iter().copied())
        .collect();
    Ok((x_all, y_all, n_features))
}

/// Validates the raw float labels and converts them to class ids.
fn class_ids(labels: &Array1<f32>) -> Result<Array1<usize>, TrainError> {
    labels
        .iter()
        .map(|&value| {
            if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
                Err(TrainError::InvalidLabel { value })
            } else {
                Ok(value as usize)
            }
        })
        .collect()
}
