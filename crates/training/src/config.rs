//! Run configuration: the JSON tree loaded at startup and validated before
//! any training work begins. Unknown keys fail deserialization so a typo in
//! a generated config surfaces immediately, not as a silently ignored knob.

use mix_core::MixConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Linear,
    Conv,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub kind: ModelKind,
    /// Hidden width for the linear model.
    #[serde(default = "default_hidden")]
    pub hidden: usize,
    /// Per-stage channels for the conv model.
    #[serde(default = "default_channels")]
    pub channels: Vec<usize>,
    pub num_classes: usize,
}

fn default_hidden() -> usize {
    256
}

fn default_channels() -> Vec<usize> {
    vec![32, 64, 128]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    /// Image-folder root: one subdirectory per class.
    pub root: PathBuf,
    /// Images are force-resized to this square edge before batching.
    pub image_size: u32,
    #[serde(default = "default_val_ratio")]
    pub val_ratio: f32,
}

fn default_val_ratio() -> f32 {
    0.1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimConfig {
    pub lr: f64,
    pub epochs: usize,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainConfig {
    pub model: ModelConfig,
    pub data: DataConfig,
    #[serde(default)]
    pub mix: MixConfig,
    pub optim: OptimConfig,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl TrainConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
        let cfg: TrainConfig = serde_json::from_slice(&bytes)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
        cfg.check()?;
        Ok(cfg)
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.model.num_classes < 2 {
            anyhow::bail!("model.num_classes must be at least 2");
        }
        if self.model.kind == ModelKind::Conv && self.model.channels.is_empty() {
            anyhow::bail!("conv model needs at least one stage channel");
        }
        if self.data.image_size == 0 {
            anyhow::bail!("data.image_size must be positive");
        }
        if !(0.0..1.0).contains(&self.data.val_ratio) {
            anyhow::bail!("data.val_ratio {} must lie in [0, 1)", self.data.val_ratio);
        }
        if self.optim.batch_size == 0 {
            anyhow::bail!("optim.batch_size must be positive");
        }
        if !self.optim.lr.is_finite() || self.optim.lr <= 0.0 {
            anyhow::bail!("optim.lr {} must be positive", self.optim.lr);
        }
        Ok(())
    }
}
