//! The mixed-sample batch augmenter: per-batch mode selection, pixel mixing,
//! and label-target construction.
//!
//! `BatchAugmenter::mix` is called once per training iteration, before the
//! forward pass. It is pure with respect to the caller: all randomness comes
//! from the supplied RNG, and no state is carried between batches.

use crate::config::{MixConfig, MixPolicy};
use crate::label;
use crate::mask::{self, Region, ResizePaste};
use crate::sample;
use crate::types::{
    ClassBatch, LabelTarget, LambdaForm, ManifoldPlan, MixCoreError, MixMode, MixResult,
};
use rand::{Rng, RngCore};

/// Everything the training step needs after augmentation: which mode ran,
/// the final lambda (recomputed for area modes), the partner permutation,
/// the label target for the loss, and the deferred manifold instruction
/// when the blend happens inside the backbone.
#[derive(Debug, Clone)]
pub struct MixOutcome {
    pub mode: MixMode,
    pub lambda: f32,
    pub partners: Vec<usize>,
    pub target: LabelTarget,
    pub manifold: Option<ManifoldPlan>,
}

#[derive(Debug, Clone)]
pub struct BatchAugmenter {
    policy: MixPolicy,
}

impl BatchAugmenter {
    /// Validate the configuration and resolve the mode dispatch table.
    /// All configuration errors surface here, never per batch.
    pub fn new(config: MixConfig) -> MixResult<Self> {
        Ok(Self {
            policy: config.validate()?,
        })
    }

    pub fn policy(&self) -> &MixPolicy {
        &self.policy
    }

    /// Transform `batch` in place and return the mixing metadata.
    pub fn mix(
        &self,
        batch: &mut ClassBatch,
        num_classes: usize,
        rng: &mut dyn RngCore,
    ) -> MixResult<MixOutcome> {
        if let Some(&bad) = batch
            .labels()
            .iter()
            .find(|&&l| l < 0 || l as usize >= num_classes)
        {
            return Err(MixCoreError::Shape(format!(
                "label {bad} outside 0..{num_classes}"
            )));
        }

        let n = batch.len();
        let entry = self.policy.choose(rng);
        let partners = sample::sample_partners(n, rng);
        let (w, h) = (batch.width(), batch.height());
        let mut manifold = None;

        let lambda_form = match entry.mode {
            MixMode::Vanilla => LambdaForm::Shared(1.0),
            MixMode::Mixup => {
                let lam = sample::sample_lambda(entry.alpha, rng);
                if lam < 1.0 {
                    let source = batch.images().to_vec();
                    blend_global(batch, &source, &partners, lam);
                }
                LambdaForm::Shared(lam)
            }
            MixMode::Cutmix => {
                let lam = sample::sample_lambda(entry.alpha, rng);
                let region = mask::rand_bbox(lam, w, h, rng);
                if !region.is_empty() {
                    let source = batch.images().to_vec();
                    paste_region(batch, &source, &partners, &region);
                }
                // The clipped box decides the label, not the sampled lambda.
                LambdaForm::Shared(mask::region_lambda(&region, w, h))
            }
            MixMode::Resizemix => {
                let args = &self.policy.args.resizemix;
                let lam = sample::sample_lambda(entry.alpha, rng);
                let paste =
                    mask::resizemix_geometry(args.scope, args.use_alpha, lam, w, h, rng);
                let source = batch.images().to_vec();
                paste_resized(batch, &source, &partners, &paste);
                LambdaForm::Shared(mask::region_lambda(&paste.dest, w, h))
            }
            MixMode::Fmix => {
                let args = &self.policy.args.fmix;
                let lam = sample::sample_lambda(entry.alpha, rng);
                let (pixel_mask, lam_actual) = mask::fmix_mask(
                    args.decay_power,
                    args.max_soft,
                    args.reformulate,
                    lam,
                    w,
                    h,
                    rng,
                );
                let source = batch.images().to_vec();
                blend_masked(batch, &source, &partners, &pixel_mask);
                LambdaForm::Shared(lam_actual)
            }
            MixMode::Manifoldmix => {
                let args = &self.policy.args.manifoldmix;
                let (lo, hi) = args.layer;
                let layer = if lo == hi { lo } else { rng.random_range(lo..=hi) };
                let lambda = if args.per_sample {
                    LambdaForm::PerSample(sample::sample_lambda_per_sample(
                        entry.alpha,
                        n,
                        rng,
                    ))
                } else {
                    LambdaForm::Shared(sample::sample_lambda(entry.alpha, rng))
                };
                manifold = Some(ManifoldPlan {
                    layer,
                    partners: partners.clone(),
                    lambda: lambda.clone(),
                });
                lambda
            }
        };

        let partner_labels: Vec<i64> = partners.iter().map(|&p| batch.labels()[p]).collect();
        let target = label::build_target(
            batch.labels(),
            &partner_labels,
            num_classes,
            &lambda_form,
            &self.policy.label,
        )?;

        Ok(MixOutcome {
            mode: entry.mode,
            lambda: lambda_form.mean(),
            partners,
            target,
            manifold,
        })
    }
}

/// mixup: global convex blend against the partner image.
fn blend_global(batch: &mut ClassBatch, source: &[f32], partners: &[usize], lambda: f32) {
    let stride = batch.channels() * batch.height() * batch.width();
    let n = batch.len();
    let images = batch.images_mut();
    for (i, &p) in partners.iter().enumerate().take(n) {
        if p == i {
            continue;
        }
        let dst = i * stride;
        let src = p * stride;
        for k in 0..stride {
            images[dst + k] = lambda * source[dst + k] + (1.0 - lambda) * source[src + k];
        }
    }
}

/// cutmix: copy the partner's pixels inside `region`.
fn paste_region(batch: &mut ClassBatch, source: &[f32], partners: &[usize], region: &Region) {
    if region.is_empty() {
        return;
    }
    let (c, h, w) = (batch.channels(), batch.height(), batch.width());
    let plane = h * w;
    let stride = c * plane;
    let images = batch.images_mut();
    for (i, &p) in partners.iter().enumerate() {
        if p == i {
            continue;
        }
        for ch in 0..c {
            for y in region.y0..region.y1 {
                let row = ch * plane + y * w;
                let dst = i * stride + row;
                let src = p * stride + row;
                images[dst + region.x0..dst + region.x1]
                    .copy_from_slice(&source[src + region.x0..src + region.x1]);
            }
        }
    }
}

/// resizemix: bilinearly shrink the whole partner image into `paste.dest`.
fn paste_resized(batch: &mut ClassBatch, source: &[f32], partners: &[usize], paste: &ResizePaste) {
    let dest = paste.dest;
    if dest.is_empty() {
        return;
    }
    let (c, h, w) = (batch.channels(), batch.height(), batch.width());
    let plane = h * w;
    let stride = c * plane;
    let (tw, th) = (dest.width(), dest.height());
    let images = batch.images_mut();
    for (i, &p) in partners.iter().enumerate() {
        if p == i {
            continue;
        }
        for ch in 0..c {
            let src_plane = &source[p * stride + ch * plane..p * stride + (ch + 1) * plane];
            for dy in 0..th {
                let sy = (dy as f32 + 0.5) * h as f32 / th as f32 - 0.5;
                let dst_row = i * stride + ch * plane + (dest.y0 + dy) * w;
                for dx in 0..tw {
                    let sx = (dx as f32 + 0.5) * w as f32 / tw as f32 - 0.5;
                    images[dst_row + dest.x0 + dx] = bilinear(src_plane, w, h, sx, sy);
                }
            }
        }
    }
}

/// fmix: per-pixel blend weighted by the partner mask.
fn blend_masked(batch: &mut ClassBatch, source: &[f32], partners: &[usize], pixel_mask: &[f32]) {
    let (c, h, w) = (batch.channels(), batch.height(), batch.width());
    let plane = h * w;
    let stride = c * plane;
    let images = batch.images_mut();
    for (i, &p) in partners.iter().enumerate() {
        if p == i {
            continue;
        }
        for ch in 0..c {
            let base_dst = i * stride + ch * plane;
            let base_src = p * stride + ch * plane;
            for (pix, &m) in pixel_mask.iter().enumerate().take(plane) {
                if m == 0.0 {
                    continue;
                }
                let dst = base_dst + pix;
                images[dst] = (1.0 - m) * source[dst] + m * source[base_src + pix];
            }
        }
    }
}

fn bilinear(plane: &[f32], w: usize, h: usize, x: f32, y: f32) -> f32 {
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let tx = x - x0 as f32;
    let ty = y - y0 as f32;
    let top = plane[y0 * w + x0] * (1.0 - tx) + plane[y0 * w + x1] * tx;
    let bottom = plane[y1 * w + x0] * (1.0 - tx) + plane[y1 * w + x1] * tx;
    top * (1.0 - ty) + bottom * ty
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LabelConfig, LabelMode, ModeEntry};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const C: usize = 3;
    const H: usize = 8;
    const W: usize = 8;

    /// Two-sample batch where every pixel of sample `i` has value `i`.
    fn constant_batch() -> ClassBatch {
        let mut images = vec![0.0f32; 2 * C * H * W];
        images[C * H * W..].fill(1.0);
        ClassBatch::new(images, vec![0, 1], C, H, W).unwrap()
    }

    fn augmenter(json: &str) -> BatchAugmenter {
        let cfg: MixConfig = serde_json::from_str(json).unwrap();
        BatchAugmenter::new(cfg).unwrap()
    }

    /// Fraction of sample-0 pixels that came from the partner.
    fn partner_fraction(batch: &ClassBatch) -> f32 {
        let plane = H * W;
        let taken: f32 = batch.images()[..plane].iter().sum();
        taken / plane as f32
    }

    #[test]
    fn zero_alpha_mixup_is_identity() {
        // alpha 0 pins lambda to 1.0: pixels and target must be untouched.
        let aug = augmenter(r#"{"mix_mode": "mixup", "alpha": 0.0}"#);
        let mut batch = constant_batch();
        let before = batch.images().to_vec();
        let mut rng = StdRng::seed_from_u64(1);
        let outcome = aug.mix(&mut batch, 2, &mut rng).unwrap();
        assert_eq!(outcome.lambda, 1.0);
        assert_eq!(batch.images(), &before[..]);
        match outcome.target {
            LabelTarget::Soft { rows, .. } => {
                assert_eq!(rows, vec![1.0, 0.0, 0.0, 1.0]);
            }
            other => panic!("expected soft target, got {other:?}"),
        }
    }

    #[test]
    fn full_blend_reproduces_partner() {
        let mut batch = constant_batch();
        let source = batch.images().to_vec();
        blend_global(&mut batch, &source, &[1, 0], 0.0);
        let plane = C * H * W;
        assert!(batch.images()[..plane].iter().all(|&v| v == 1.0));
        assert!(batch.images()[plane..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn half_blend_averages_pixels() {
        let mut batch = constant_batch();
        let source = batch.images().to_vec();
        blend_global(&mut batch, &source, &[1, 0], 0.5);
        assert!(batch.images().iter().all(|&v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn cutmix_label_matches_pasted_area() {
        let aug = augmenter(r#"{"mix_mode": "cutmix", "alpha": 1.0}"#);
        for seed in 0..64u64 {
            let mut batch = constant_batch();
            let mut rng = StdRng::seed_from_u64(seed);
            let outcome = aug.mix(&mut batch, 2, &mut rng).unwrap();
            if outcome.partners[0] != 1 {
                continue; // self-pair draw leaves sample 0 untouched
            }
            let achieved = partner_fraction(&batch);
            assert!(
                (achieved - (1.0 - outcome.lambda)).abs() < 1e-5,
                "seed {seed}: pasted fraction {achieved} vs 1-lambda {}",
                1.0 - outcome.lambda
            );
        }
    }

    #[test]
    fn resizemix_label_matches_pasted_area() {
        let aug = augmenter(r#"{"mix_mode": "resizemix", "alpha": 1.0}"#);
        for seed in 0..64u64 {
            let mut batch = constant_batch();
            let mut rng = StdRng::seed_from_u64(seed);
            let outcome = aug.mix(&mut batch, 2, &mut rng).unwrap();
            if outcome.partners[0] != 1 {
                continue;
            }
            let achieved = partner_fraction(&batch);
            assert!(
                (achieved - (1.0 - outcome.lambda)).abs() < 1e-5,
                "seed {seed}: pasted fraction {achieved} vs 1-lambda {}",
                1.0 - outcome.lambda
            );
        }
    }

    #[test]
    fn fmix_label_matches_mask_mass() {
        let aug = augmenter(r#"{"mix_mode": "fmix", "alpha": 1.0}"#);
        for seed in 0..32u64 {
            let mut batch = constant_batch();
            let mut rng = StdRng::seed_from_u64(seed);
            let outcome = aug.mix(&mut batch, 2, &mut rng).unwrap();
            if outcome.partners[0] != 1 {
                continue;
            }
            let achieved = partner_fraction(&batch);
            assert!(
                (achieved - (1.0 - outcome.lambda)).abs() < 1e-4,
                "seed {seed}: partner mass {achieved} vs 1-lambda {}",
                1.0 - outcome.lambda
            );
        }
    }

    #[test]
    fn manifoldmix_defers_and_leaves_pixels_alone() {
        let aug = augmenter(
            r#"{"mix_mode": "manifoldmix", "alpha": 2.0,
                "mix_args": {"manifoldmix": {"layer": [1, 3]}}}"#,
        );
        let mut batch = constant_batch();
        let before = batch.images().to_vec();
        let mut rng = StdRng::seed_from_u64(4);
        let outcome = aug.mix(&mut batch, 2, &mut rng).unwrap();
        assert_eq!(batch.images(), &before[..]);
        let plan = outcome.manifold.expect("manifoldmix must emit a plan");
        assert!((1..=3).contains(&plan.layer));
        assert_eq!(plan.partners, outcome.partners);
    }

    #[test]
    fn per_sample_manifold_lambdas() {
        let aug = augmenter(
            r#"{"mix_mode": "manifoldmix", "alpha": 2.0,
                "mix_args": {"manifoldmix": {"layer": [0, 1], "per_sample": true}}}"#,
        );
        let mut batch = constant_batch();
        let mut rng = StdRng::seed_from_u64(8);
        let outcome = aug.mix(&mut batch, 2, &mut rng).unwrap();
        let plan = outcome.manifold.unwrap();
        match plan.lambda {
            LambdaForm::PerSample(ref lams) => assert_eq!(lams.len(), 2),
            ref other => panic!("expected per-sample lambdas, got {other:?}"),
        }
    }

    #[test]
    fn decoupled_target_reaches_the_loss_unmixed() {
        let cfg = MixConfig {
            label: LabelConfig {
                mode: LabelMode::Decoupled,
                ..LabelConfig::default()
            },
            ..MixConfig::default()
        };
        let aug = BatchAugmenter::new(cfg).unwrap();
        let mut batch = constant_batch();
        let mut rng = StdRng::seed_from_u64(12);
        let outcome = aug.mix(&mut batch, 2, &mut rng).unwrap();
        match outcome.target {
            LabelTarget::Decoupled { first, second, .. } => {
                assert_eq!(first, vec![0, 1]);
                assert_eq!(second.len(), 2);
            }
            other => panic!("expected decoupled target, got {other:?}"),
        }
    }

    #[test]
    fn out_of_range_label_is_a_shape_error() {
        let aug = augmenter(r#"{"mix_mode": "mixup"}"#);
        let mut batch =
            ClassBatch::new(vec![0.0; 2 * C * H * W], vec![0, 7], C, H, W).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            aug.mix(&mut batch, 2, &mut rng).unwrap_err(),
            MixCoreError::Shape(_)
        ));
    }

    #[test]
    fn single_sample_batch_survives_every_mode() {
        for mode in ["mixup", "cutmix", "fmix", "resizemix", "manifoldmix", "vanilla"] {
            let aug = augmenter(&format!(r#"{{"mix_mode": "{mode}", "alpha": 1.0}}"#));
            let mut batch =
                ClassBatch::new(vec![0.5; C * H * W], vec![0], C, H, W).unwrap();
            let mut rng = StdRng::seed_from_u64(3);
            let outcome = aug.mix(&mut batch, 1, &mut rng).unwrap();
            assert_eq!(outcome.partners, vec![0]);
            assert!((0.0..=1.0).contains(&outcome.lambda));
        }
    }

    #[test]
    fn mode_entry_table_is_exposed() {
        let aug = augmenter(r#"{"mix_mode": ["mixup", "cutmix"], "alpha": [0.2, 1.0]}"#);
        let entries: Vec<ModeEntry> = aug.policy().entries().to_vec();
        assert_eq!(entries.len(), 2);
        assert!((entries[0].alpha - 0.2).abs() < 1e-6);
    }
}
