//! Lambda sampling and partner pairing.

use rand::seq::SliceRandom;
use rand::RngCore;
use rand_distr::{Beta, Distribution};

/// Draw a mix ratio from `Beta(alpha, alpha)`, clamped to [0, 1].
///
/// Fixed policy: a non-positive or non-finite `alpha` disables mixing and
/// returns 1.0, so the caller sees an unmixed batch rather than an error.
pub fn sample_lambda(alpha: f32, rng: &mut dyn RngCore) -> f32 {
    if !alpha.is_finite() || alpha <= 0.0 {
        return 1.0;
    }
    match Beta::new(alpha, alpha) {
        Ok(beta) => beta.sample(rng).clamp(0.0, 1.0),
        // Unreachable for positive finite alpha; keep the no-mix fallback
        // rather than aborting a training run on a distribution error.
        Err(_) => 1.0,
    }
}

/// One independent lambda per sample, same policy as `sample_lambda`.
pub fn sample_lambda_per_sample(alpha: f32, n: usize, rng: &mut dyn RngCore) -> Vec<f32> {
    (0..n).map(|_| sample_lambda(alpha, rng)).collect()
}

/// Uniform random permutation of `0..n` pairing each sample with a partner.
///
/// Fixed points are allowed; a sample paired with itself is simply left
/// unmixed for that batch.
pub fn sample_partners(n: usize, rng: &mut dyn RngCore) -> Vec<usize> {
    let mut partners: Vec<usize> = (0..n).collect();
    partners.shuffle(rng);
    partners
}
