//! Training and evaluation for mixed-sample image classification.
//!
//! This crate wires the augmenter into a Burn training loop:
//! - image-folder dataset loading and batch collation
//! - the mixup-aware loss coupler (soft / two-hot / decoupled paths)
//! - `train` and `eval` binaries driven by a JSON run config

pub mod config;
pub mod dataset;
pub mod loss;
pub mod util;

pub use config::{DataConfig, ModelConfig, ModelKind, OptimConfig, TrainConfig};
pub use dataset::{load_class_batch, FolderDataset};
pub use loss::{decoupled_cross_entropy, mixed_loss, soft_cross_entropy};
pub use util::{run_eval, run_train, EvalArgs, TrainArgs};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
