//! Core types, error definitions, and data structures for mix_core.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub type MixResult<T> = Result<T, MixCoreError>;

#[derive(Debug, Error)]
pub enum MixCoreError {
    #[error("unknown mix mode '{name}' (supported: vanilla, mixup, cutmix, fmix, resizemix, manifoldmix)")]
    UnknownMode { name: String },
    #[error("invalid mix config: {0}")]
    Config(String),
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("cannot mix an empty batch")]
    EmptyBatch,
}

/// The closed set of supported mixing strategies.
///
/// `Vanilla` is the explicit no-mix mode: the batch passes through with
/// lambda 1 and an unmixed one-hot target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixMode {
    Vanilla,
    Mixup,
    Cutmix,
    Fmix,
    Resizemix,
    Manifoldmix,
}

impl MixMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MixMode::Vanilla => "vanilla",
            MixMode::Mixup => "mixup",
            MixMode::Cutmix => "cutmix",
            MixMode::Fmix => "fmix",
            MixMode::Resizemix => "resizemix",
            MixMode::Manifoldmix => "manifoldmix",
        }
    }

    /// Modes whose label lambda is recomputed from the achieved mixed area.
    pub fn is_area_based(&self) -> bool {
        matches!(self, MixMode::Cutmix | MixMode::Fmix | MixMode::Resizemix)
    }

    /// Manifoldmix defers the blend into the backbone instead of touching pixels.
    pub fn defers_to_backbone(&self) -> bool {
        matches!(self, MixMode::Manifoldmix)
    }
}

impl fmt::Display for MixMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MixMode {
    type Err = MixCoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vanilla" => Ok(MixMode::Vanilla),
            "mixup" => Ok(MixMode::Mixup),
            "cutmix" => Ok(MixMode::Cutmix),
            "fmix" => Ok(MixMode::Fmix),
            "resizemix" => Ok(MixMode::Resizemix),
            "manifoldmix" => Ok(MixMode::Manifoldmix),
            other => Err(MixCoreError::UnknownMode {
                name: other.to_string(),
            }),
        }
    }
}

/// A collated classification batch: N images in CHW f32 layout plus one
/// integer class label per image.
///
/// The constructor checks that the buffer and label lengths agree with the
/// declared dimensions; a malformed upstream pipeline fails here, not deep
/// inside a mixing kernel.
#[derive(Debug, Clone)]
pub struct ClassBatch {
    images: Vec<f32>,
    labels: Vec<i64>,
    n: usize,
    c: usize,
    h: usize,
    w: usize,
}

impl ClassBatch {
    pub fn new(
        images: Vec<f32>,
        labels: Vec<i64>,
        channels: usize,
        height: usize,
        width: usize,
    ) -> MixResult<Self> {
        let n = labels.len();
        if n == 0 {
            return Err(MixCoreError::EmptyBatch);
        }
        let expected = n * channels * height * width;
        if images.len() != expected {
            return Err(MixCoreError::Shape(format!(
                "image buffer holds {} values but {} samples of {}x{}x{} need {}",
                images.len(),
                n,
                channels,
                height,
                width,
                expected
            )));
        }
        Ok(Self {
            images,
            labels,
            n,
            c: channels,
            h: height,
            w: width,
        })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn channels(&self) -> usize {
        self.c
    }

    pub fn height(&self) -> usize {
        self.h
    }

    pub fn width(&self) -> usize {
        self.w
    }

    pub fn images(&self) -> &[f32] {
        &self.images
    }

    pub fn labels(&self) -> &[i64] {
        &self.labels
    }

    pub fn into_parts(self) -> (Vec<f32>, Vec<i64>) {
        (self.images, self.labels)
    }

    pub(crate) fn images_mut(&mut self) -> &mut [f32] {
        &mut self.images
    }
}

/// Mix ratio shared across the batch or drawn independently per sample.
#[derive(Debug, Clone, PartialEq)]
pub enum LambdaForm {
    Shared(f32),
    PerSample(Vec<f32>),
}

impl LambdaForm {
    pub fn at(&self, i: usize) -> f32 {
        match self {
            LambdaForm::Shared(lam) => *lam,
            LambdaForm::PerSample(lams) => lams[i],
        }
    }

    pub fn mean(&self) -> f32 {
        match self {
            LambdaForm::Shared(lam) => *lam,
            LambdaForm::PerSample(lams) => {
                if lams.is_empty() {
                    1.0
                } else {
                    lams.iter().sum::<f32>() / lams.len() as f32
                }
            }
        }
    }
}

/// Deferred mixing instruction for manifoldmix: the backbone blends its hidden
/// state at `layer` (stage 0 is the raw input) using the partner permutation
/// and lambda carried here.
#[derive(Debug, Clone)]
pub struct ManifoldPlan {
    pub layer: usize,
    pub partners: Vec<usize>,
    pub lambda: LambdaForm,
}

/// The label representation handed to the loss.
#[derive(Debug, Clone)]
pub enum LabelTarget {
    /// Dense rows, one per sample, `num_classes` wide. Rows sum to 1.
    /// Covers both the soft and two-hot encodings.
    Soft { rows: Vec<f32>, num_classes: usize },
    /// Unmixed label pair for the decoupled loss path, which computes two
    /// cross-entropy terms weighted by lambda and (1 - lambda).
    Decoupled {
        first: Vec<i64>,
        second: Vec<i64>,
        lambda: f32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_through_str() {
        for mode in [
            MixMode::Vanilla,
            MixMode::Mixup,
            MixMode::Cutmix,
            MixMode::Fmix,
            MixMode::Resizemix,
            MixMode::Manifoldmix,
        ] {
            assert_eq!(mode.as_str().parse::<MixMode>().unwrap(), mode);
        }
    }

    #[test]
    fn unknown_mode_is_a_named_error() {
        let err = "saliencymix".parse::<MixMode>().unwrap_err();
        assert!(matches!(err, MixCoreError::UnknownMode { name } if name == "saliencymix"));
    }

    #[test]
    fn batch_rejects_mismatched_buffer() {
        let err = ClassBatch::new(vec![0.0; 10], vec![0, 1], 3, 4, 4).unwrap_err();
        assert!(matches!(err, MixCoreError::Shape(_)));
    }

    #[test]
    fn batch_rejects_empty() {
        let err = ClassBatch::new(Vec::new(), Vec::new(), 3, 4, 4).unwrap_err();
        assert!(matches!(err, MixCoreError::EmptyBatch));
    }

    #[test]
    fn lambda_form_mean() {
        assert_eq!(LambdaForm::Shared(0.25).mean(), 0.25);
        let per = LambdaForm::PerSample(vec![0.0, 1.0]);
        assert!((per.mean() - 0.5).abs() < 1e-6);
        assert_eq!(per.at(1), 1.0);
    }
}
