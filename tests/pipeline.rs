//! End-to-end pipeline test: dump text tables, train the classifier, and
//! predict tissue classes for a synthetic subject volume.

use approx::assert_abs_diff_eq;
use ndarray::{Array2, Array3};
use nifti::writer::WriterOptions;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;
use voxseg::{data, predict, train, volume};

const SPATIAL: [usize; 3] = [3, 3, 3];
const N_VOXELS: usize = 27;
/// Voxels below this index belong to the low-intensity tissue class.
const CLASS_SPLIT: usize = 14;

/// Deterministic jitter, small against the cluster separation of 10.
fn jitter(i: usize, j: usize) -> f32 {
    ((i * 7 + j * 3) % 11) as f32 * 0.1
}

fn cluster_value(sample: usize, channel: usize, split: usize) -> f32 {
    let center = if sample < split { 0.0 } else { 10.0 };
    center + jitter(sample, channel)
}

fn write_subject_tables(dir: &Path, n_samples: usize) {
    let mut features = String::new();
    let mut labels = String::new();
    for i in 0..n_samples {
        let a = cluster_value(i, 0, n_samples / 2);
        let b = cluster_value(i, 1, n_samples / 2);
        writeln!(features, "{a} {b}").unwrap();
        let label = if i < n_samples / 2 { 1.0 } else { 2.0 };
        writeln!(labels, "{label}").unwrap();
    }
    fs::write(dir.join(data::FEATURES_TEXT), features).unwrap();
    fs::write(dir.join(data::LABELS_TEXT), labels).unwrap();
}

/// Feature volume with the same two clusters the classifier was trained on.
fn subject_feature_matrix() -> Array2<f32> {
    Array2::from_shape_fn((N_VOXELS, 2), |(v, c)| cluster_value(v, c, CLASS_SPLIT))
}

fn write_subject_images(subject_root: &Path) -> PathBuf {
    let features_dir = subject_root.join("features");
    let work_dir = subject_root.join("anat");
    fs::create_dir_all(&features_dir).unwrap();
    fs::create_dir_all(&work_dir).unwrap();

    let feature_volume = subject_feature_matrix()
        .into_shape_with_order((SPATIAL[0], SPATIAL[1], SPATIAL[2], 2))
        .unwrap();
    WriterOptions::new(features_dir.join(predict::FEATURE_IMAGE))
        .write_nifti(&feature_volume)
        .unwrap();
    WriterOptions::new(work_dir.join(predict::REFERENCE_IMAGE))
        .write_nifti(&Array3::<f32>::zeros((SPATIAL[0], SPATIAL[1], SPATIAL[2])))
        .unwrap();
    work_dir
}

#[test]
fn dump_train_predict_round_trip() {
    let root = tempdir().unwrap();
    let rsxn_dir = root.path().join("train/derivatives/smriprep/rsxn");
    let subjects: Vec<String> = ["s01", "s02", "s03"].iter().map(|s| s.to_string()).collect();

    // Stage 1: dump each subject's text tables.
    for subject in &subjects {
        let dump_dir = data::subject_dump_dir(&rsxn_dir, subject);
        fs::create_dir_all(&dump_dir).unwrap();
        write_subject_tables(&dump_dir, 60);
        let summary = data::dump(&dump_dir).unwrap();
        assert_eq!(summary.n_samples, 60);
        assert_eq!(summary.n_features, 2);
    }

    // Stage 2: train. Artifacts land in the study data root.
    let outcome = train::train(&rsxn_dir, &subjects).unwrap();
    assert!(outcome.accuracy > 0.9, "accuracy was {}", outcome.accuracy);
    assert_eq!(outcome.classifier_dir, root.path().join("classifier"));

    let report = fs::read_to_string(outcome.classifier_dir.join("clf_info.toml")).unwrap();
    assert!(report.contains("s01"));
    assert!(report.contains("testing_accuracy"));

    // Stage 3: predict a held-out subject volume.
    let work_dir = write_subject_images(&root.path().join("sub-99"));
    let prediction = predict::predict(root.path(), &work_dir).unwrap();
    assert_eq!(prediction.n_voxels, N_VOXELS);
    assert_eq!(prediction.n_classes, 2);

    // The label volume matches the reference spatial dims and the known
    // cluster assignment of every voxel.
    let (labels, spatial) = volume::load_feature_matrix(&work_dir.join(predict::CLASS_IMAGE)).unwrap();
    assert_eq!(spatial, SPATIAL);
    assert_eq!(labels.dim(), (N_VOXELS, 1));
    for (v, &label) in labels.column(0).iter().enumerate() {
        let expected = if v < CLASS_SPLIT { 1.0 } else { 2.0 };
        assert_eq!(label, expected, "voxel {v}");
    }

    // The probability volume carries one channel per class and is
    // row-stochastic.
    let (probabilities, spatial) =
        volume::load_feature_matrix(&work_dir.join(predict::PROBABILITY_IMAGE)).unwrap();
    assert_eq!(spatial, SPATIAL);
    assert_eq!(probabilities.dim(), (N_VOXELS, 2));
    for row in probabilities.rows() {
        assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-5);
    }
}

#[test]
fn predict_rejects_mismatched_reference_dims() {
    let root = tempdir().unwrap();
    let rsxn_dir = root.path().join("train/derivatives/smriprep/rsxn");
    let subjects: Vec<String> = ["s01", "s02", "s03"].iter().map(|s| s.to_string()).collect();

    for subject in &subjects {
        let dump_dir = data::subject_dump_dir(&rsxn_dir, subject);
        fs::create_dir_all(&dump_dir).unwrap();
        write_subject_tables(&dump_dir, 40);
        data::dump(&dump_dir).unwrap();
    }
    train::train(&rsxn_dir, &subjects).unwrap();

    let subject_root = root.path().join("sub-99");
    let work_dir = write_subject_images(&subject_root);
    // Replace the reference with one of different spatial dims.
    WriterOptions::new(work_dir.join(predict::REFERENCE_IMAGE))
        .write_nifti(&Array3::<f32>::zeros((4, 4, 4)))
        .unwrap();

    let err = predict::predict(root.path(), &work_dir).unwrap_err();
    assert!(matches!(
        err,
        predict::PredictError::Volume(volume::VolumeError::SpatialMismatch { .. })
    ));
}
