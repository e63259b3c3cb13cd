//! Burn tensor adapter for the augmenter.
//!
//! Mixing runs on raw CHW buffers; this module lifts a Burn batch out of its
//! tensors, applies the augmenter, and reassembles tensors on the original
//! device. The extract/rebuild round trip is cheap next to the forward pass
//! and keeps the mixing kernels backend-independent.

use crate::augment::BatchAugmenter;
use crate::types::{
    ClassBatch, LabelTarget, ManifoldPlan, MixCoreError, MixMode, MixResult,
};
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use rand::RngCore;

/// A collated classification batch on a Burn backend.
#[derive(Debug, Clone)]
pub struct ClsBatch<B: Backend> {
    /// `[batch, channels, height, width]`, values in [0, 1].
    pub images: Tensor<B, 4>,
    /// One class index per sample.
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> ClsBatch<B> {
    /// Lift a raw batch onto `device`.
    pub fn from_class_batch(batch: &ClassBatch, device: &B::Device) -> Self {
        let shape = [
            batch.len(),
            batch.channels(),
            batch.height(),
            batch.width(),
        ];
        let images = Tensor::<B, 1>::from_floats(batch.images(), device).reshape(shape);
        let labels = Tensor::<B, 1, Int>::from_data(
            TensorData::new(batch.labels().to_vec(), [batch.len()]),
            device,
        );
        Self { images, labels }
    }
}

/// The label target on a Burn backend, matching `LabelTarget`.
/// The loss must branch on which form it receives.
#[derive(Debug, Clone)]
pub enum MixTargets<B: Backend> {
    /// Dense `[batch, num_classes]` rows (soft and two-hot encodings).
    Soft(Tensor<B, 2>),
    /// Unmixed label pair plus lambda for the decoupled loss.
    Decoupled {
        first: Tensor<B, 1, Int>,
        second: Tensor<B, 1, Int>,
        lambda: f32,
    },
}

/// An augmented batch ready for the forward pass.
#[derive(Debug, Clone)]
pub struct MixedClsBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub target: MixTargets<B>,
    /// Present only for manifoldmix; hand it to the backbone's `forward_mix`.
    pub manifold: Option<ManifoldPlan>,
    pub mode: MixMode,
    pub lambda: f32,
}

impl BatchAugmenter {
    /// Tensor-level entry point: extract, mix, reassemble.
    pub fn mix_tensors<B: Backend>(
        &self,
        batch: ClsBatch<B>,
        num_classes: usize,
        rng: &mut dyn RngCore,
    ) -> MixResult<MixedClsBatch<B>> {
        let device = batch.images.device();
        let [n, c, h, w] = batch.images.dims();

        let images: Vec<f32> = batch
            .images
            .into_data()
            .to_vec()
            .map_err(|e| MixCoreError::Shape(format!("failed to read image tensor: {e:?}")))?;
        let labels: Vec<i64> = batch
            .labels
            .into_data()
            .to_vec()
            .map_err(|e| MixCoreError::Shape(format!("failed to read label tensor: {e:?}")))?;

        let mut raw = ClassBatch::new(images, labels, c, h, w)?;
        let outcome = self.mix(&mut raw, num_classes, rng)?;

        let (mixed_images, _) = raw.into_parts();
        let images = Tensor::<B, 1>::from_floats(mixed_images.as_slice(), &device)
            .reshape([n, c, h, w]);

        let target = match outcome.target {
            LabelTarget::Soft { rows, num_classes } => MixTargets::Soft(
                Tensor::<B, 1>::from_floats(rows.as_slice(), &device)
                    .reshape([n, num_classes]),
            ),
            LabelTarget::Decoupled {
                first,
                second,
                lambda,
            } => MixTargets::Decoupled {
                first: Tensor::<B, 1, Int>::from_data(TensorData::new(first, [n]), &device),
                second: Tensor::<B, 1, Int>::from_data(TensorData::new(second, [n]), &device),
                lambda,
            },
        };

        Ok(MixedClsBatch {
            images,
            target,
            manifold: outcome.manifold,
            mode: outcome.mode,
            lambda: outcome.lambda,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MixConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestBackend = burn_ndarray::NdArray<f32>;

    fn augmenter(json: &str) -> BatchAugmenter {
        let cfg: MixConfig = serde_json::from_str(json).unwrap();
        BatchAugmenter::new(cfg).unwrap()
    }

    fn tensor_batch() -> ClsBatch<TestBackend> {
        let mut images = vec![0.0f32; 2 * 3 * 4 * 4];
        images[3 * 4 * 4..].fill(1.0);
        let raw = ClassBatch::new(images, vec![0, 1], 3, 4, 4).unwrap();
        ClsBatch::from_class_batch(&raw, &Default::default())
    }

    #[test]
    fn round_trip_preserves_shapes() {
        let aug = augmenter(r#"{"mix_mode": "mixup", "alpha": 1.0}"#);
        let mut rng = StdRng::seed_from_u64(2);
        let mixed = aug.mix_tensors(tensor_batch(), 2, &mut rng).unwrap();
        assert_eq!(mixed.images.dims(), [2, 3, 4, 4]);
        match mixed.target {
            MixTargets::Soft(rows) => assert_eq!(rows.dims(), [2, 2]),
            other => panic!("expected soft target, got {other:?}"),
        }
    }

    #[test]
    fn identity_mix_round_trips_pixels_exactly() {
        let aug = augmenter(r#"{"mix_mode": "mixup", "alpha": 0.0}"#);
        let batch = tensor_batch();
        let before: Vec<f32> = batch.images.clone().into_data().to_vec().unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let mixed = aug.mix_tensors(batch, 2, &mut rng).unwrap();
        let after: Vec<f32> = mixed.images.into_data().to_vec().unwrap();
        assert_eq!(before, after);
        assert_eq!(mixed.lambda, 1.0);
    }

    #[test]
    fn decoupled_targets_become_int_tensors() {
        let aug = augmenter(
            r#"{"mix_mode": "cutmix", "alpha": 1.0, "label": {"mode": "decoupled"}}"#,
        );
        let mut rng = StdRng::seed_from_u64(5);
        let mixed = aug.mix_tensors(tensor_batch(), 2, &mut rng).unwrap();
        match mixed.target {
            MixTargets::Decoupled { first, second, lambda } => {
                let first: Vec<i64> = first.into_data().to_vec().unwrap();
                assert_eq!(first, vec![0, 1]);
                assert_eq!(second.dims(), [2]);
                assert!((0.0..=1.0).contains(&lambda));
            }
            other => panic!("expected decoupled target, got {other:?}"),
        }
    }
}
