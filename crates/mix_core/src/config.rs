//! Mixing configuration: the serde surface read from run configs and its
//! validation into a resolved, closed dispatch table.
//!
//! `MixConfig` mirrors the nested `mix_mode` / `alpha` / `mix_args` / label
//! sections of a run config. It is validated exactly once, at startup, into a
//! `MixPolicy`; bad mode names, mismatched lists, and out-of-range parameters
//! all fail there with a descriptive error instead of surfacing mid-training.

use crate::types::{MixCoreError, MixMode, MixResult};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Beta shape parameter: one value for every mode, or one per configured mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlphaSpec {
    Scalar(f32),
    PerMode(Vec<f32>),
}

impl Default for AlphaSpec {
    fn default() -> Self {
        AlphaSpec::Scalar(1.0)
    }
}

/// One mode name, or a list of candidates sampled per batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModeSpec {
    Single(String),
    List(Vec<String>),
}

impl Default for ModeSpec {
    fn default() -> Self {
        ModeSpec::Single("mixup".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifoldArgs {
    /// Inclusive stage range the blend may land on; stage 0 is the input.
    #[serde(default = "default_manifold_layer")]
    pub layer: (usize, usize),
    /// Draw an independent lambda per sample instead of one per batch.
    #[serde(default)]
    pub per_sample: bool,
}

fn default_manifold_layer() -> (usize, usize) {
    (0, 3)
}

impl Default for ManifoldArgs {
    fn default() -> Self {
        Self {
            layer: default_manifold_layer(),
            per_sample: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResizemixArgs {
    /// Scale-ratio range for the pasted partner copy.
    #[serde(default = "default_resizemix_scope")]
    pub scope: (f32, f32),
    /// Derive the scale from the Beta lambda instead of sampling the scope.
    #[serde(default)]
    pub use_alpha: bool,
}

fn default_resizemix_scope() -> (f32, f32) {
    (0.1, 0.8)
}

impl Default for ResizemixArgs {
    fn default() -> Self {
        Self {
            scope: default_resizemix_scope(),
            use_alpha: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FmixArgs {
    /// Spectral attenuation exponent; higher values give smoother masks.
    #[serde(default = "default_decay_power")]
    pub decay_power: f32,
    /// Fraction of the image allowed a soft blend at the mask boundary
    /// instead of a hard 0/1 cut. 0 disables softening.
    #[serde(default)]
    pub max_soft: f32,
    /// Swap which image the mask selects.
    #[serde(default)]
    pub reformulate: bool,
}

fn default_decay_power() -> f32 {
    3.0
}

impl Default for FmixArgs {
    fn default() -> Self {
        Self {
            decay_power: default_decay_power(),
            max_soft: 0.0,
            reformulate: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MixArgs {
    #[serde(default)]
    pub manifoldmix: ManifoldArgs,
    #[serde(default)]
    pub resizemix: ResizemixArgs,
    #[serde(default)]
    pub fmix: FmixArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelMode {
    #[default]
    Soft,
    TwoHot,
    Decoupled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LamScaleMode {
    #[default]
    None,
    /// `lam -> lam^lam_idx` when `lam < lam_thr`.
    Pow,
    /// `lam -> 0` when `lam < lam_thr`.
    Thre,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EtaMode {
    #[default]
    Both,
    Larger,
    Smaller,
}

/// Optional rescaling of the two decoupled loss terms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EtaWeight {
    pub eta: f32,
    #[serde(default)]
    pub mode: EtaMode,
    #[serde(default = "default_eta_thr")]
    pub thr: f32,
}

fn default_eta_thr() -> f32 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabelConfig {
    #[serde(default)]
    pub mode: LabelMode,
    /// Cap applied to each two-hot component weight before renormalization.
    #[serde(default = "default_one")]
    pub two_hot_thr: f32,
    /// Exponent applied to each capped two-hot component weight.
    #[serde(default = "default_one")]
    pub two_hot_idx: f32,
    #[serde(default)]
    pub lam_scale_mode: LamScaleMode,
    #[serde(default = "default_one")]
    pub lam_thr: f32,
    #[serde(default = "default_one")]
    pub lam_idx: f32,
    #[serde(default)]
    pub eta_weight: Option<EtaWeight>,
}

fn default_one() -> f32 {
    1.0
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            mode: LabelMode::Soft,
            two_hot_thr: 1.0,
            two_hot_idx: 1.0,
            lam_scale_mode: LamScaleMode::None,
            lam_thr: 1.0,
            lam_idx: 1.0,
            eta_weight: None,
        }
    }
}

/// The full mixing configuration as read from a run config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MixConfig {
    #[serde(default)]
    pub alpha: AlphaSpec,
    #[serde(default)]
    pub mix_mode: ModeSpec,
    /// Selection weights matched to the mode list; uniform when absent.
    #[serde(default)]
    pub mode_probs: Option<Vec<f32>>,
    #[serde(default)]
    pub mix_args: MixArgs,
    #[serde(default)]
    pub label: LabelConfig,
}

/// One resolved candidate mode with its alpha and normalized selection weight.
#[derive(Debug, Clone, Copy)]
pub struct ModeEntry {
    pub mode: MixMode,
    pub alpha: f32,
    pub weight: f32,
}

/// The validated, immutable form of `MixConfig`. Built once at startup; the
/// per-batch hot path only walks the resolved entry table.
#[derive(Debug, Clone)]
pub struct MixPolicy {
    entries: Vec<ModeEntry>,
    pub args: MixArgs,
    pub label: LabelConfig,
}

impl MixConfig {
    pub fn validate(self) -> MixResult<MixPolicy> {
        let names: Vec<String> = match &self.mix_mode {
            ModeSpec::Single(name) => vec![name.clone()],
            ModeSpec::List(list) => list.clone(),
        };
        if names.is_empty() {
            return Err(MixCoreError::Config("mix_mode list is empty".to_string()));
        }

        let mut modes = Vec::with_capacity(names.len());
        for name in &names {
            let mode: MixMode = name.parse()?;
            if modes.contains(&mode) {
                return Err(MixCoreError::Config(format!(
                    "mix_mode lists '{mode}' more than once"
                )));
            }
            modes.push(mode);
        }

        let alphas: Vec<f32> = match &self.alpha {
            AlphaSpec::Scalar(a) => vec![*a; modes.len()],
            AlphaSpec::PerMode(list) => {
                if list.len() != modes.len() {
                    return Err(MixCoreError::Config(format!(
                        "alpha list has {} entries for {} modes",
                        list.len(),
                        modes.len()
                    )));
                }
                list.clone()
            }
        };

        let weights: Vec<f32> = match &self.mode_probs {
            None => vec![1.0 / modes.len() as f32; modes.len()],
            Some(probs) => {
                if probs.len() != modes.len() {
                    return Err(MixCoreError::Config(format!(
                        "mode_probs has {} entries for {} modes",
                        probs.len(),
                        modes.len()
                    )));
                }
                if probs.iter().any(|p| !p.is_finite() || *p < 0.0) {
                    return Err(MixCoreError::Config(
                        "mode_probs must be finite and non-negative".to_string(),
                    ));
                }
                let total: f32 = probs.iter().sum();
                if total <= 0.0 {
                    return Err(MixCoreError::Config(
                        "mode_probs sum to zero".to_string(),
                    ));
                }
                probs.iter().map(|p| p / total).collect()
            }
        };

        let args = self.args_validated(&modes)?;
        let label = self.label_validated(&modes)?;

        let entries = modes
            .into_iter()
            .zip(alphas)
            .zip(weights)
            .map(|((mode, alpha), weight)| ModeEntry {
                mode,
                alpha,
                weight,
            })
            .collect();

        Ok(MixPolicy {
            entries,
            args,
            label,
        })
    }

    fn args_validated(&self, modes: &[MixMode]) -> MixResult<MixArgs> {
        let args = self.mix_args.clone();
        if modes.contains(&MixMode::Resizemix) {
            let (lo, hi) = args.resizemix.scope;
            if !(lo.is_finite() && hi.is_finite()) || lo <= 0.0 || lo > hi || hi > 1.0 {
                return Err(MixCoreError::Config(format!(
                    "resizemix scope ({lo}, {hi}) must satisfy 0 < lo <= hi <= 1"
                )));
            }
        }
        if modes.contains(&MixMode::Fmix) {
            let fmix = &args.fmix;
            if !fmix.decay_power.is_finite() || fmix.decay_power <= 0.0 {
                return Err(MixCoreError::Config(format!(
                    "fmix decay_power {} must be positive",
                    fmix.decay_power
                )));
            }
            if !fmix.max_soft.is_finite() || fmix.max_soft < 0.0 || fmix.max_soft > 0.5 {
                return Err(MixCoreError::Config(format!(
                    "fmix max_soft {} must lie in [0, 0.5]",
                    fmix.max_soft
                )));
            }
        }
        if modes.contains(&MixMode::Manifoldmix) {
            let (lo, hi) = args.manifoldmix.layer;
            if lo > hi {
                return Err(MixCoreError::Config(format!(
                    "manifoldmix layer range ({lo}, {hi}) is inverted"
                )));
            }
        }
        Ok(args)
    }

    fn label_validated(&self, modes: &[MixMode]) -> MixResult<LabelConfig> {
        let label = self.label.clone();
        if label.mode == LabelMode::TwoHot {
            if !label.two_hot_thr.is_finite()
                || label.two_hot_thr <= 0.0
                || label.two_hot_thr > 1.0
            {
                return Err(MixCoreError::Config(format!(
                    "two_hot_thr {} must lie in (0, 1]",
                    label.two_hot_thr
                )));
            }
            if !label.two_hot_idx.is_finite() || label.two_hot_idx <= 0.0 {
                return Err(MixCoreError::Config(format!(
                    "two_hot_idx {} must be positive",
                    label.two_hot_idx
                )));
            }
        }
        if label.lam_scale_mode != LamScaleMode::None {
            if !label.lam_thr.is_finite() || label.lam_thr < 0.0 || label.lam_thr > 1.0 {
                return Err(MixCoreError::Config(format!(
                    "lam_thr {} must lie in [0, 1]",
                    label.lam_thr
                )));
            }
            if !label.lam_idx.is_finite() {
                return Err(MixCoreError::Config("lam_idx must be finite".to_string()));
            }
        }
        if let Some(eta) = &label.eta_weight {
            if label.mode != LabelMode::Decoupled {
                return Err(MixCoreError::Config(
                    "eta_weight requires label mode 'decoupled'".to_string(),
                ));
            }
            if !eta.eta.is_finite() || eta.eta < 0.0 {
                return Err(MixCoreError::Config(format!(
                    "eta_weight.eta {} must be non-negative",
                    eta.eta
                )));
            }
            if !eta.thr.is_finite() || eta.thr < 0.0 || eta.thr > 1.0 {
                return Err(MixCoreError::Config(format!(
                    "eta_weight.thr {} must lie in [0, 1]",
                    eta.thr
                )));
            }
        }
        if self.mix_args.manifoldmix.per_sample
            && modes.contains(&MixMode::Manifoldmix)
            && label.mode == LabelMode::Decoupled
        {
            return Err(MixCoreError::Config(
                "per-sample manifoldmix lambdas require a soft or two_hot label target"
                    .to_string(),
            ));
        }
        Ok(label)
    }
}

impl MixPolicy {
    pub fn entries(&self) -> &[ModeEntry] {
        &self.entries
    }

    /// Weighted draw over the resolved mode table.
    pub fn choose(&self, rng: &mut dyn RngCore) -> ModeEntry {
        use rand::Rng;
        if self.entries.len() == 1 {
            return self.entries[0];
        }
        let roll: f32 = rng.random_range(0.0..1.0);
        let mut acc = 0.0;
        for entry in &self.entries {
            acc += entry.weight;
            if roll < acc {
                return *entry;
            }
        }
        // Weight rounding can leave a sliver above the accumulated total.
        self.entries[self.entries.len() - 1]
    }
}
