//! Tissue class prediction.
//!
//! Loads the fitted standardizer and classifier, runs them over a subject's
//! feature volume, and writes the predicted label and probability volumes
//! next to the subject's reference image.
//!
//! The working directory follows the study layout: features live in the
//! sibling `features` directory, or in `features/postop` when predicting
//! from a `postop` working directory.

use crate::model::{CLASSIFIER_FILE, ModelError, STANDARDIZER_FILE, Standardizer, TissueClassifier};
use crate::volume::{self, VolumeError};
use log::info;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Input feature image file name.
pub const FEATURE_IMAGE: &str = "t1_features.nii";
/// Reference anatomical image file name.
pub const REFERENCE_IMAGE: &str = "t1.nii";
/// Output hard-label image file name.
pub const CLASS_IMAGE: &str = "y_class.nii";
/// Output per-class probability image file name.
pub const PROBABILITY_IMAGE: &str = "y_proba.nii";

const FEATURES_DIR: &str = "features";
const POSTOP_DIR: &str = "postop";

/// Errors raised by the prediction stage.
#[derive(Error, Debug)]
pub enum PredictError {
    #[error(transparent)]
    Volume(#[from] VolumeError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no trained classifier in {}. Run `voxseg train` first.", dir.display())]
    ClassifierMissing { dir: PathBuf },
    #[error("{} has no parent directory to locate features from", path.display())]
    ShallowWorkDir { path: PathBuf },
}

/// Summary of a completed prediction run.
#[derive(Debug)]
pub struct PredictOutcome {
    pub class_image: PathBuf,
    pub probability_image: PathBuf,
    pub n_voxels: usize,
    pub n_classes: usize,
}

/// Predicts tissue classes for the subject owning `work_dir`, using the
/// classifier stored under `data_dir`.
pub fn predict(data_dir: &Path, work_dir: &Path) -> Result<PredictOutcome, PredictError> {
    let classifier_dir = data_dir.join("classifier");
    let standardizer_path = classifier_dir.join(STANDARDIZER_FILE);
    let classifier_path = classifier_dir.join(CLASSIFIER_FILE);
    if !standardizer_path.is_file() || !classifier_path.is_file() {
        return Err(PredictError::ClassifierMissing { dir: classifier_dir });
    }

    let work_dir = fs::canonicalize(work_dir)?;
    let feature_path = feature_image_path(&work_dir)?;
    let reference_path = work_dir.join(REFERENCE_IMAGE);

    let standardizer = Standardizer::load(&standardizer_path)?;
    let classifier = TissueClassifier::load(&classifier_path)?;

    info!("reading feature image {}", feature_path.display());
    let (features, spatial) = volume::load_feature_matrix(&feature_path)?;
    let (reference_header, reference_spatial) = volume::load_reference(&reference_path)?;
    if spatial != reference_spatial {
        return Err(VolumeError::SpatialMismatch {
            feature: spatial,
            reference: reference_spatial,
        }
        .into());
    }

    let standardized = standardizer.apply(features.view())?;
    let probabilities = classifier.predict_probabilities(standardized.view())?;
    let labels = classifier.labels_from_probabilities(probabilities.view());
    info!(
        "classified {} voxels over {} classes",
        labels.len(),
        classifier.n_classes()
    );

    let class_image = work_dir.join(CLASS_IMAGE);
    let probability_image = work_dir.join(PROBABILITY_IMAGE);
    volume::save_label_volume(&class_image, labels.view(), spatial, &reference_header)?;
    volume::save_probability_volume(
        &probability_image,
        probabilities.view(),
        spatial,
        &reference_header,
    )?;

    Ok(PredictOutcome {
        class_image,
        probability_image,
        n_voxels: labels.len(),
        n_classes: classifier.n_classes(),
    })
}

/// Resolves the feature image for a working directory per the study layout.
fn feature_image_path(work_dir: &Path) -> Result<PathBuf, PredictError> {
    let is_postop = work_dir
        .file_name()
        .is_some_and(|name| name == OsStr::new(POSTOP_DIR));
    let subject_root = if is_postop {
        work_dir.parent().and_then(Path::parent)
    } else {
        work_dir.parent()
    };
    let subject_root = subject_root.ok_or_else(|| PredictError::ShallowWorkDir {
        path: work_dir.to_owned(),
    })?;

    let features_dir = if is_postop {
        subject_root.join(FEATURES_DIR).join(POSTOP_DIR)
    } else {
        subject_root.join(FEATURES_DIR)
    };
    Ok(features_dir.join(FEATURE_IMAGE))
}
