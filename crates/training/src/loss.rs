//! The mixup-aware loss coupler.
//!
//! The augmenter hands back either a dense soft-target matrix or an unmixed
//! label pair; the loss must branch on the form rather than collapse both
//! into one path, because the decoupled variant has different gradients than
//! cross-entropy against a pre-mixed row.

use burn::tensor::activation::log_softmax;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use mix_core::{EtaMode, EtaWeight, MixTargets};

/// Mean cross-entropy against dense target rows:
/// `-(target * log_softmax(logits)).sum(dim=1).mean()`.
pub fn soft_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    target: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let log_probs = log_softmax(logits, 1);
    (log_probs * target).sum_dim(1).mean().neg()
}

/// Decoupled mixup loss:
/// `w_a * CE(logits, first) + w_b * CE(logits, second)` with
/// `(w_a, w_b) = (lambda, 1 - lambda)`, optionally rescaled by `eta_weight`.
pub fn decoupled_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    first: Tensor<B, 1, Int>,
    second: Tensor<B, 1, Int>,
    lambda: f32,
    eta: Option<&EtaWeight>,
) -> Tensor<B, 1> {
    let [n, _classes] = logits.dims();
    let log_probs = log_softmax(logits, 1);
    let ce_first = log_probs
        .clone()
        .gather(1, first.reshape([n, 1]))
        .neg()
        .mean();
    let ce_second = log_probs.gather(1, second.reshape([n, 1])).neg().mean();

    let (w_first, w_second) = decoupled_weights(lambda, eta);
    ce_first.mul_scalar(w_first) + ce_second.mul_scalar(w_second)
}

/// Term weights for the decoupled loss. `eta` multiplies the term(s) picked
/// by its mode (`both`, or only the larger/smaller-weighted one) whenever the
/// picked term's lambda-weight exceeds `thr`.
fn decoupled_weights(lambda: f32, eta: Option<&EtaWeight>) -> (f32, f32) {
    let lambda = lambda.clamp(0.0, 1.0);
    let mut w_first = lambda;
    let mut w_second = 1.0 - lambda;
    if let Some(eta) = eta {
        let first_is_larger = w_first >= w_second;
        let scale_first = match eta.mode {
            EtaMode::Both => true,
            EtaMode::Larger => first_is_larger,
            EtaMode::Smaller => !first_is_larger,
        };
        let scale_second = match eta.mode {
            EtaMode::Both => true,
            EtaMode::Larger => !first_is_larger,
            EtaMode::Smaller => first_is_larger,
        };
        if scale_first && w_first > eta.thr {
            w_first *= eta.eta;
        }
        if scale_second && w_second > eta.thr {
            w_second *= eta.eta;
        }
    }
    (w_first, w_second)
}

/// Dispatch on the target form produced by the augmenter.
pub fn mixed_loss<B: Backend>(
    logits: Tensor<B, 2>,
    target: &MixTargets<B>,
    eta: Option<&EtaWeight>,
) -> Tensor<B, 1> {
    match target {
        MixTargets::Soft(rows) => soft_cross_entropy(logits, rows.clone()),
        MixTargets::Decoupled {
            first,
            second,
            lambda,
        } => decoupled_cross_entropy(logits, first.clone(), second.clone(), *lambda, eta),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use mix_core::label::one_hot_rows;

    type TestBackend = burn_ndarray::NdArray<f32>;

    fn logits() -> Tensor<TestBackend, 2> {
        Tensor::<TestBackend, 1>::from_floats(
            [1.0, -0.5, 0.25, -1.0, 2.0, 0.0],
            &Default::default(),
        )
        .reshape([2, 3])
    }

    fn int_labels(values: Vec<i64>) -> Tensor<TestBackend, 1, Int> {
        let n = values.len();
        Tensor::<TestBackend, 1, Int>::from_data(TensorData::new(values, [n]), &Default::default())
    }

    fn scalar(t: Tensor<TestBackend, 1>) -> f32 {
        t.into_data().to_vec::<f32>().unwrap()[0]
    }

    /// Reference CE against integer labels, computed on the host.
    fn reference_ce(logit_rows: &[[f32; 3]], labels: &[usize]) -> f32 {
        let mut total = 0.0f32;
        for (row, &label) in logit_rows.iter().zip(labels) {
            let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            let log_z = row.iter().map(|v| (v - max).exp()).sum::<f32>().ln() + max;
            total -= row[label] - log_z;
        }
        total / logit_rows.len() as f32
    }

    const ROWS: [[f32; 3]; 2] = [[1.0, -0.5, 0.25], [-1.0, 2.0, 0.0]];

    #[test]
    fn soft_ce_matches_reference_on_one_hot() {
        let target = one_hot_rows(&[0, 1], 3);
        let target =
            Tensor::<TestBackend, 1>::from_floats(target.as_slice(), &Default::default())
                .reshape([2, 3]);
        let got = scalar(soft_cross_entropy(logits(), target));
        let want = reference_ce(&ROWS, &[0, 1]);
        assert!((got - want).abs() < 1e-5, "{got} vs {want}");
    }

    #[test]
    fn decoupled_equals_weighted_sum_of_plain_ce() {
        let lambda = 0.3;
        let got = scalar(decoupled_cross_entropy(
            logits(),
            int_labels(vec![0, 1]),
            int_labels(vec![2, 0]),
            lambda,
            None,
        ));
        let want =
            lambda * reference_ce(&ROWS, &[0, 1]) + (1.0 - lambda) * reference_ce(&ROWS, &[2, 0]);
        assert!((got - want).abs() < 1e-5, "{got} vs {want}");
    }

    #[test]
    fn decoupled_matches_soft_ce_for_mixed_one_hots() {
        // For CE defined as -sum(t * log p), mixing the target rows is
        // numerically identical to mixing two CE terms; the paths still stay
        // separate because their gradients differ once rescaling kicks in.
        let lambda = 0.7;
        let rows: Vec<f32> = {
            let a = one_hot_rows(&[0, 1], 3);
            let b = one_hot_rows(&[2, 0], 3);
            a.iter()
                .zip(&b)
                .map(|(x, y)| lambda * x + (1.0 - lambda) * y)
                .collect()
        };
        let soft_target =
            Tensor::<TestBackend, 1>::from_floats(rows.as_slice(), &Default::default())
                .reshape([2, 3]);
        let soft = scalar(soft_cross_entropy(logits(), soft_target));
        let decoupled = scalar(decoupled_cross_entropy(
            logits(),
            int_labels(vec![0, 1]),
            int_labels(vec![2, 0]),
            lambda,
            None,
        ));
        assert!((soft - decoupled).abs() < 1e-5, "{soft} vs {decoupled}");
    }

    #[test]
    fn eta_both_scales_terms_above_threshold() {
        let eta = EtaWeight {
            eta: 0.1,
            mode: EtaMode::Both,
            thr: 0.5,
        };
        // lambda 0.8: only the first weight exceeds 0.5.
        let (wa, wb) = decoupled_weights(0.8, Some(&eta));
        assert!((wa - 0.08).abs() < 1e-6);
        assert!((wb - 0.2).abs() < 1e-6);
    }

    #[test]
    fn eta_larger_touches_only_the_larger_term() {
        let eta = EtaWeight {
            eta: 0.5,
            mode: EtaMode::Larger,
            thr: 0.1,
        };
        let (wa, wb) = decoupled_weights(0.3, Some(&eta));
        assert!((wa - 0.3).abs() < 1e-6);
        assert!((wb - 0.7 * 0.5).abs() < 1e-6);
    }

    #[test]
    fn eta_smaller_touches_only_the_smaller_term() {
        let eta = EtaWeight {
            eta: 0.5,
            mode: EtaMode::Smaller,
            thr: 0.1,
        };
        let (wa, wb) = decoupled_weights(0.3, Some(&eta));
        assert!((wa - 0.3 * 0.5).abs() < 1e-6);
        assert!((wb - 0.7).abs() < 1e-6);
    }

    #[test]
    fn lambda_endpoints_reduce_to_single_term() {
        let got = scalar(decoupled_cross_entropy(
            logits(),
            int_labels(vec![0, 1]),
            int_labels(vec![2, 0]),
            1.0,
            None,
        ));
        let want = reference_ce(&ROWS, &[0, 1]);
        assert!((got - want).abs() < 1e-5);
    }
}
