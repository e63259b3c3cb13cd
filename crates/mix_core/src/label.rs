//! Label-target construction: soft and two-hot rows plus lambda rescaling.

use crate::config::{LabelConfig, LabelMode, LamScaleMode};
use crate::types::{LabelTarget, LambdaForm, MixCoreError, MixResult};

/// Plain one-hot rows, one per label.
pub fn one_hot_rows(labels: &[i64], num_classes: usize) -> Vec<f32> {
    let mut rows = vec![0.0f32; labels.len() * num_classes];
    for (i, &label) in labels.iter().enumerate() {
        rows[i * num_classes + label as usize] = 1.0;
    }
    rows
}

/// Soft targets: `lam * one_hot(a) + (1 - lam) * one_hot(b)` per sample.
pub fn soft_rows(
    first: &[i64],
    second: &[i64],
    num_classes: usize,
    lambda: &LambdaForm,
) -> Vec<f32> {
    let mut rows = vec![0.0f32; first.len() * num_classes];
    for (i, (&a, &b)) in first.iter().zip(second).enumerate() {
        let lam = lambda.at(i).clamp(0.0, 1.0);
        let row = &mut rows[i * num_classes..(i + 1) * num_classes];
        row[a as usize] += lam;
        row[b as usize] += 1.0 - lam;
    }
    rows
}

/// Two-hot targets: the pair weights `(lam, 1 - lam)` are capped at `thr`,
/// raised to `idx`, and renormalized so every row sums to exactly 1.
/// A self-pair collapses to a plain one-hot.
pub fn two_hot_rows(
    first: &[i64],
    second: &[i64],
    num_classes: usize,
    lambda: &LambdaForm,
    thr: f32,
    idx: f32,
) -> Vec<f32> {
    let mut rows = vec![0.0f32; first.len() * num_classes];
    for (i, (&a, &b)) in first.iter().zip(second).enumerate() {
        let row = &mut rows[i * num_classes..(i + 1) * num_classes];
        if a == b {
            row[a as usize] = 1.0;
            continue;
        }
        let lam = lambda.at(i).clamp(0.0, 1.0);
        let wa = lam.min(thr).powf(idx);
        let wb = (1.0 - lam).min(thr).powf(idx);
        let total = wa + wb;
        if total <= f32::EPSILON {
            // Both weights collapsed (lam at an endpoint with idx pushing the
            // survivor under epsilon); fall back to the dominant label.
            let winner = if lam >= 0.5 { a } else { b };
            row[winner as usize] = 1.0;
        } else {
            row[a as usize] = wa / total;
            row[b as usize] = wb / total;
        }
    }
    rows
}

/// Label-side lambda rescaling. Applies to the target weighting only; pixel
/// mixing always uses the raw lambda.
pub fn rescale_lambda(lambda: f32, cfg: &LabelConfig) -> f32 {
    match cfg.lam_scale_mode {
        LamScaleMode::None => lambda,
        LamScaleMode::Pow => {
            if lambda < cfg.lam_thr {
                lambda.powf(cfg.lam_idx).clamp(0.0, 1.0)
            } else {
                lambda
            }
        }
        LamScaleMode::Thre => {
            if lambda < cfg.lam_thr {
                0.0
            } else {
                lambda
            }
        }
    }
}

/// Build the label target the loss will consume.
pub fn build_target(
    first: &[i64],
    second: &[i64],
    num_classes: usize,
    lambda: &LambdaForm,
    cfg: &LabelConfig,
) -> MixResult<LabelTarget> {
    let rescaled = match lambda {
        LambdaForm::Shared(lam) => LambdaForm::Shared(rescale_lambda(*lam, cfg)),
        LambdaForm::PerSample(lams) => {
            LambdaForm::PerSample(lams.iter().map(|l| rescale_lambda(*l, cfg)).collect())
        }
    };
    match cfg.mode {
        LabelMode::Soft => Ok(LabelTarget::Soft {
            rows: soft_rows(first, second, num_classes, &rescaled),
            num_classes,
        }),
        LabelMode::TwoHot => Ok(LabelTarget::Soft {
            rows: two_hot_rows(
                first,
                second,
                num_classes,
                &rescaled,
                cfg.two_hot_thr,
                cfg.two_hot_idx,
            ),
            num_classes,
        }),
        LabelMode::Decoupled => match rescaled {
            LambdaForm::Shared(lam) => Ok(LabelTarget::Decoupled {
                first: first.to_vec(),
                second: second.to_vec(),
                lambda: lam,
            }),
            // Rejected at config validation; double-check here so a future
            // caller cannot smuggle a vector lambda into the decoupled path.
            LambdaForm::PerSample(_) => Err(MixCoreError::Config(
                "decoupled targets require a shared lambda".to_string(),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_sums(rows: &[f32], num_classes: usize) -> Vec<f32> {
        rows.chunks(num_classes).map(|r| r.iter().sum()).collect()
    }

    #[test]
    fn soft_rows_identity_at_lambda_one() {
        let rows = soft_rows(&[2, 0], &[1, 1], 4, &LambdaForm::Shared(1.0));
        assert_eq!(rows, one_hot_rows(&[2, 0], 4));
    }

    #[test]
    fn soft_rows_partner_at_lambda_zero() {
        let rows = soft_rows(&[2, 0], &[1, 3], 4, &LambdaForm::Shared(0.0));
        assert_eq!(rows, one_hot_rows(&[1, 3], 4));
    }

    #[test]
    fn soft_self_pair_accumulates_to_one() {
        let rows = soft_rows(&[2], &[2], 4, &LambdaForm::Shared(0.3));
        assert_eq!(rows, one_hot_rows(&[2], 4));
    }

    #[test]
    fn two_hot_rows_always_sum_to_one() {
        for lam in [0.0, 0.1, 0.37, 0.5, 0.92, 1.0] {
            for thr in [0.2, 0.6, 0.8, 1.0] {
                for idx in [0.5, 1.0, 2.0] {
                    let rows = two_hot_rows(
                        &[0, 3, 5],
                        &[1, 3, 2],
                        6,
                        &LambdaForm::Shared(lam),
                        thr,
                        idx,
                    );
                    for sum in row_sums(&rows, 6) {
                        assert!(
                            (sum - 1.0).abs() < 1e-5,
                            "lam {lam} thr {thr} idx {idx}: row sums to {sum}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn two_hot_caps_the_dominant_weight() {
        let rows = two_hot_rows(&[0], &[1], 2, &LambdaForm::Shared(0.9), 0.6, 1.0);
        // 0.9 capped to 0.6 against 0.1: 0.6/0.7 vs 0.1/0.7.
        assert!((rows[0] - 0.6 / 0.7).abs() < 1e-5);
        assert!((rows[1] - 0.1 / 0.7).abs() < 1e-5);
    }

    #[test]
    fn rescale_pow_only_below_threshold() {
        let cfg = LabelConfig {
            lam_scale_mode: LamScaleMode::Pow,
            lam_thr: 0.5,
            lam_idx: 2.0,
            ..LabelConfig::default()
        };
        assert!((rescale_lambda(0.4, &cfg) - 0.16).abs() < 1e-6);
        assert_eq!(rescale_lambda(0.7, &cfg), 0.7);
    }

    #[test]
    fn rescale_thre_zeroes_below_threshold() {
        let cfg = LabelConfig {
            lam_scale_mode: LamScaleMode::Thre,
            lam_thr: 0.3,
            ..LabelConfig::default()
        };
        assert_eq!(rescale_lambda(0.2, &cfg), 0.0);
        assert_eq!(rescale_lambda(0.3, &cfg), 0.3);
    }

    #[test]
    fn decoupled_target_passes_labels_through() {
        let cfg = LabelConfig {
            mode: LabelMode::Decoupled,
            ..LabelConfig::default()
        };
        let target = build_target(&[1, 2], &[0, 2], 3, &LambdaForm::Shared(0.4), &cfg).unwrap();
        match target {
            LabelTarget::Decoupled {
                first,
                second,
                lambda,
            } => {
                assert_eq!(first, vec![1, 2]);
                assert_eq!(second, vec![0, 2]);
                assert!((lambda - 0.4).abs() < 1e-6);
            }
            other => panic!("expected decoupled target, got {other:?}"),
        }
    }

    #[test]
    fn per_sample_lambda_builds_per_row_softs() {
        let target = build_target(
            &[0, 0],
            &[1, 1],
            2,
            &LambdaForm::PerSample(vec![1.0, 0.25]),
            &LabelConfig::default(),
        )
        .unwrap();
        match target {
            LabelTarget::Soft { rows, .. } => {
                assert_eq!(&rows[0..2], &[1.0, 0.0]);
                assert!((rows[2] - 0.25).abs() < 1e-6);
                assert!((rows[3] - 0.75).abs() < 1e-6);
            }
            other => panic!("expected soft target, got {other:?}"),
        }
    }
}
