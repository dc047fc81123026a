//! Volumetric image I/O.
//!
//! Feature volumes come in as NIfTI images of shape `(X, Y, Z)` or
//! `(X, Y, Z, C)` and are flattened to `(X·Y·Z, C)` matrices for the
//! classifier; predictions are reshaped back and written with the geometry of
//! the subject's reference anatomical image. Flattening walks the logical
//! axes in row-major order and the reshape back uses the same order, so the
//! round trip is exact.

use ndarray::{Array2, ArrayD, ArrayView1, ArrayView2, Axis};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while reading or writing volumes.
#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),
    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("{} has rank {rank}, expected a 3-D or 4-D volume", path.display())]
    UnsupportedRank { path: PathBuf, rank: usize },
    #[error("feature volume is {feature:?} but the reference image is {reference:?}")]
    SpatialMismatch {
        feature: [usize; 3],
        reference: [usize; 3],
    },
    #[error("prediction has {found} voxels but the volume needs {expected}")]
    VoxelCount { expected: usize, found: usize },
}

/// Loads a feature image as a voxel-by-feature matrix.
///
/// A 3-D image is treated as a single feature channel. Returns the matrix
/// and the spatial dims the voxels came from.
pub fn load_feature_matrix(path: &Path) -> Result<(Array2<f32>, [usize; 3]), VolumeError> {
    let object = ReaderOptions::new().read_file(path)?;
    let volume: ArrayD<f32> = object.into_volume().into_ndarray::<f32>()?;

    let volume = match volume.ndim() {
        3 => volume.insert_axis(Axis(3)),
        4 => volume,
        rank => {
            return Err(VolumeError::UnsupportedRank {
                path: path.to_owned(),
                rank,
            });
        }
    };

    let spatial = [volume.shape()[0], volume.shape()[1], volume.shape()[2]];
    let channels = volume.shape()[3];
    let n_voxels = spatial.iter().product();

    let matrix = volume
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((n_voxels, channels))?;
    Ok((matrix, spatial))
}

/// Loads the reference anatomical image's header and spatial dims.
///
/// Only the header is needed; the voxel data stays on disk.
pub fn load_reference(path: &Path) -> Result<(NiftiHeader, [usize; 3]), VolumeError> {
    let object = ReaderOptions::new().read_file(path)?;
    let header = object.header().clone();
    let rank = header.dim[0] as usize;
    if rank < 3 {
        return Err(VolumeError::UnsupportedRank {
            path: path.to_owned(),
            rank,
        });
    }
    let spatial = [
        header.dim[1] as usize,
        header.dim[2] as usize,
        header.dim[3] as usize,
    ];
    Ok((header, spatial))
}

/// Writes per-voxel labels back as a 3-D volume with the reference geometry.
pub fn save_label_volume(
    path: &Path,
    labels: ArrayView1<f32>,
    spatial: [usize; 3],
    reference: &NiftiHeader,
) -> Result<(), VolumeError> {
    let n_voxels: usize = spatial.iter().product();
    if labels.len() != n_voxels {
        return Err(VolumeError::VoxelCount {
            expected: n_voxels,
            found: labels.len(),
        });
    }
    let volume = labels
        .to_owned()
        .into_shape_with_order((spatial[0], spatial[1], spatial[2]))?;
    WriterOptions::new(path)
        .reference_header(reference)
        .write_nifti(&volume)?;
    Ok(())
}

/// Writes per-voxel class probabilities back as a 4-D volume with one
/// channel per class.
pub fn save_probability_volume(
    path: &Path,
    probabilities: ArrayView2<f32>,
    spatial: [usize; 3],
    reference: &NiftiHeader,
) -> Result<(), VolumeError> {
    let n_voxels: usize = spatial.iter().product();
    if probabilities.nrows() != n_voxels {
        return Err(VolumeError::VoxelCount {
            expected: n_voxels,
            found: probabilities.nrows(),
        });
    }
    let volume = probabilities.to_owned().into_shape_with_order((
        spatial[0],
        spatial[1],
        spatial[2],
        probabilities.ncols(),
    ))?;
    WriterOptions::new(path)
        .reference_header(reference)
        .write_nifti(&volume)?;
    Ok(())
}
