//! Mixed-sample batch augmentation for image classification training.
//!
//! This crate provides:
//! - Mode selection over the supported mixing strategies (mixup, cutmix,
//!   fmix, resizemix, manifoldmix) with per-mode alphas and weights
//! - Beta-distributed lambda sampling and partner pairing
//! - Region and mask generators for the area-based modes
//! - Label-target construction (soft, two-hot, decoupled)
//! - A Burn tensor adapter behind the `burn-runtime` feature

// Module declarations
pub mod augment;
pub mod config;
pub mod label;
pub mod mask;
pub mod sample;
pub mod types;

#[cfg(feature = "burn-runtime")]
pub mod batch;

// Re-export public API
pub use augment::{BatchAugmenter, MixOutcome};
pub use config::{
    AlphaSpec, EtaMode, EtaWeight, FmixArgs, LabelConfig, LabelMode, LamScaleMode, ManifoldArgs,
    MixArgs, MixConfig, MixPolicy, ModeEntry, ModeSpec, ResizemixArgs,
};
pub use types::*;

#[cfg(feature = "burn-runtime")]
pub use batch::{ClsBatch, MixTargets, MixedClsBatch};
