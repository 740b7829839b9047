//! In-memory labelled image datasets.
//!
//! Decoding dataset files is left to the caller; this module only holds
//! already-decoded samples, normalizes raw pixels into `[0, 1]` and turns
//! them into tensors.

use burn::tensor::{Tensor, backend::Backend};

use crate::errors::ModelError;

/// A labelled split of fixed-shape samples with features in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    features: Vec<f32>,
    sample_shape: Vec<usize>,
    labels: Vec<usize>,
}

impl Dataset {
    /// Builds a dataset from raw 8-bit pixels, scaling them into `[0, 1]`.
    pub fn from_pixels(
        pixels: &[u8],
        sample_shape: &[usize],
        labels: Vec<usize>,
    ) -> Result<Self, ModelError> {
        let features = pixels.iter().map(|&p| p as f32 / 255.0).collect();
        Self::from_features(features, sample_shape, labels)
    }

    /// Builds a dataset from already normalized features.
    pub fn from_features(
        features: Vec<f32>,
        sample_shape: &[usize],
        labels: Vec<usize>,
    ) -> Result<Self, ModelError> {
        let sample_size: usize = sample_shape.iter().product();
        if sample_size == 0 {
            return Err(ModelError::InvalidDataset {
                message: "sample shape must not contain zero-sized dimensions".to_string(),
            });
        }
        if features.len() != sample_size * labels.len() {
            return Err(ModelError::InvalidDataset {
                message: format!(
                    "{} feature values do not form {} samples of {} values",
                    features.len(),
                    labels.len(),
                    sample_size
                ),
            });
        }
        if let Some(value) = features.iter().find(|v| !(0.0..=1.0).contains(*v)) {
            return Err(ModelError::InvalidDataset {
                message: format!("feature value {value} is outside [0, 1]"),
            });
        }

        Ok(Self {
            features,
            sample_shape: sample_shape.to_vec(),
            labels,
        })
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Per-sample shape.
    pub fn sample_shape(&self) -> &[usize] {
        &self.sample_shape
    }

    /// Number of scalars per sample.
    pub fn sample_size(&self) -> usize {
        self.sample_shape.iter().product()
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Number of distinct classes, assuming labels `0..n`.
    pub fn num_classes(&self) -> usize {
        self.labels.iter().max().map(|&m| m + 1).unwrap_or(0)
    }

    /// Splits into the first `at` samples and the rest.
    pub fn split_at(&self, at: usize) -> (Dataset, Dataset) {
        let at = at.min(self.len());
        let cut = at * self.sample_size();
        let head = Dataset {
            features: self.features[..cut].to_vec(),
            sample_shape: self.sample_shape.clone(),
            labels: self.labels[..at].to_vec(),
        };
        let tail = Dataset {
            features: self.features[cut..].to_vec(),
            sample_shape: self.sample_shape.clone(),
            labels: self.labels[at..].to_vec(),
        };
        (head, tail)
    }

    /// Returns the samples as a flat `[len, sample_size]` tensor.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        Tensor::<B, 1>::from_floats(self.features.as_slice(), device)
            .reshape([self.len(), self.sample_size()])
    }
}

/// Duplicates the ground truth once per graph output.
///
/// All branches solve the same task, so a graph with `copies` outputs is
/// trained against `copies` identical label vectors.
pub fn replicate_labels(labels: &[usize], copies: usize) -> Vec<Vec<usize>> {
    (0..copies).map(|_| labels.to_vec()).collect()
}

/// One-hot encodes labels as a `[len, classes]` tensor.
pub fn one_hot<B: Backend>(
    labels: &[usize],
    classes: usize,
    device: &B::Device,
) -> Result<Tensor<B, 2>, ModelError> {
    let mut data = vec![0.0f32; labels.len() * classes];
    for (row, &label) in labels.iter().enumerate() {
        if label >= classes {
            return Err(ModelError::InvalidDataset {
                message: format!("label {label} does not fit {classes} classes"),
            });
        }
        data[row * classes + label] = 1.0;
    }
    Ok(Tensor::<B, 1>::from_floats(data.as_slice(), device).reshape([labels.len(), classes]))
}
