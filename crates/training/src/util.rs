//! Train/eval entry points shared by the binaries.

use crate::config::{ModelKind, TrainConfig};
use crate::dataset::{load_class_batch, FolderDataset};
use crate::loss::mixed_loss;
use crate::TrainBackend;
use burn::backend::Autodiff;
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use clap::Parser;
use mix_core::{BatchAugmenter, ClsBatch, MixMode};
use models::{
    ConvClassifier, ConvClassifierConfig, LinearClassifier, LinearClassifierConfig, MixInjection,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fs;
use std::io::Write;
use std::path::Path;

type ADBackend = Autodiff<TrainBackend>;

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train a classifier with mixed-sample augmentation")]
pub struct TrainArgs {
    /// Path to the JSON run config.
    #[arg(long, default_value = "configs/train.json")]
    pub config: String,
    /// Override the configured epoch count.
    #[arg(long)]
    pub epochs: Option<usize>,
    /// Override the configured batch size.
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Override the configured learning rate.
    #[arg(long)]
    pub lr: Option<f64>,
    /// Override the configured seed.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Checkpoint output path (defaults by model if not provided).
    #[arg(long)]
    pub checkpoint_out: Option<String>,
}

#[derive(Parser, Debug)]
#[command(name = "eval", about = "Evaluate a trained classifier checkpoint")]
pub struct EvalArgs {
    /// Path to the JSON run config the checkpoint was trained with.
    #[arg(long, default_value = "configs/train.json")]
    pub config: String,
    /// Checkpoint to load (defaults by model if not provided).
    #[arg(long)]
    pub checkpoint: Option<String>,
}

fn default_checkpoint(kind: ModelKind) -> String {
    match kind {
        ModelKind::Linear => "checkpoints/linear_classifier.bin".to_string(),
        ModelKind::Conv => "checkpoints/conv_classifier.bin".to_string(),
    }
}

fn apply_overrides(cfg: &mut TrainConfig, args: &TrainArgs) {
    if let Some(epochs) = args.epochs {
        cfg.optim.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        cfg.optim.batch_size = batch_size.max(1);
    }
    if let Some(lr) = args.lr {
        cfg.optim.lr = lr;
    }
    if let Some(seed) = args.seed {
        cfg.seed = Some(seed);
    }
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let mut cfg = TrainConfig::load(Path::new(&args.config))?;
    apply_overrides(&mut cfg, &args);

    let ckpt_path = args
        .checkpoint_out
        .clone()
        .unwrap_or_else(|| default_checkpoint(cfg.model.kind));
    if let Some(parent) = Path::new(&ckpt_path).parent() {
        fs::create_dir_all(parent)?;
    }

    let seed = cfg.seed.unwrap_or_else(|| rand::rng().random());
    let dataset = FolderDataset::scan(&cfg.data.root)?;
    if dataset.num_classes() != cfg.model.num_classes {
        anyhow::bail!(
            "dataset under {} has {} classes but the model is configured for {}",
            cfg.data.root.display(),
            dataset.num_classes(),
            cfg.model.num_classes
        );
    }
    let (train_ds, val_ds) = dataset.split(cfg.data.val_ratio, seed);
    println!(
        "training on {} samples ({} held out), seed {seed}",
        train_ds.len(),
        val_ds.len()
    );

    let augmenter = BatchAugmenter::new(cfg.mix.clone())
        .map_err(|e| anyhow::anyhow!("mix config rejected: {e}"))?;

    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    match cfg.model.kind {
        ModelKind::Linear => {
            let side = cfg.data.image_size as usize;
            let model = LinearClassifier::<ADBackend>::new(
                LinearClassifierConfig {
                    input_dim: 3 * side * side,
                    hidden: cfg.model.hidden,
                    num_classes: cfg.model.num_classes,
                },
                &device,
            );
            train_loop(model, &cfg, &train_ds, &augmenter, seed, &ckpt_path)?;
        }
        ModelKind::Conv => {
            let model = ConvClassifier::<ADBackend>::new(
                ConvClassifierConfig {
                    in_channels: 3,
                    channels: cfg.model.channels.clone(),
                    num_classes: cfg.model.num_classes,
                },
                &device,
            );
            train_loop(model, &cfg, &train_ds, &augmenter, seed, &ckpt_path)?;
        }
    }

    println!("Saved checkpoint to {ckpt_path}");
    Ok(())
}

/// Fail fast when a configured manifold stage does not exist in the backbone.
fn check_manifold_range(augmenter: &BatchAugmenter, stages: usize) -> anyhow::Result<()> {
    let policy = augmenter.policy();
    let uses_manifold = policy
        .entries()
        .iter()
        .any(|e| e.mode == MixMode::Manifoldmix);
    if uses_manifold {
        let (lo, hi) = policy.args.manifoldmix.layer;
        if hi >= stages {
            anyhow::bail!(
                "manifoldmix layer range ({lo}, {hi}) exceeds the backbone's {stages} stages"
            );
        }
    }
    Ok(())
}

fn train_loop<M>(
    mut model: M,
    cfg: &TrainConfig,
    data: &FolderDataset,
    augmenter: &BatchAugmenter,
    seed: u64,
    ckpt_path: &str,
) -> anyhow::Result<()>
where
    M: MixInjection<ADBackend> + AutodiffModule<ADBackend>,
{
    check_manifold_range(augmenter, model.mix_stages())?;

    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let mut optim = AdamConfig::new().init();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut trace = TraceWriter::from_env();
    let eta = augmenter.policy().label.eta_weight;

    let mut samples = data.samples.clone();
    for epoch in 0..cfg.optim.epochs {
        samples.shuffle(&mut rng);
        let mut losses = Vec::new();
        for chunk in samples.chunks(cfg.optim.batch_size) {
            let raw = load_class_batch(chunk, cfg.data.image_size)?;
            let batch = ClsBatch::<ADBackend>::from_class_batch(&raw, &device);
            let mixed = augmenter
                .mix_tensors(batch, cfg.model.num_classes, &mut rng)
                .map_err(|e| anyhow::anyhow!("augmenter failed: {e}"))?;

            let logits = model.forward_mix(mixed.images.clone(), mixed.manifold.as_ref());
            let loss = mixed_loss(logits, &mixed.target, eta.as_ref());
            let loss_detached = loss.clone().detach();
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(cfg.optim.lr, model, grads);

            let loss_val: f32 = loss_detached
                .into_data()
                .to_vec::<f32>()
                .unwrap_or_default()
                .into_iter()
                .next()
                .unwrap_or(0.0);
            losses.push(loss_val);
            trace.record(epoch, mixed.mode, mixed.lambda, loss_val);
        }
        let avg_loss: f32 = if losses.is_empty() {
            0.0
        } else {
            losses.iter().sum::<f32>() / losses.len() as f32
        };
        println!("epoch {epoch}: avg loss {avg_loss:.4}");
    }

    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .save_file(Path::new(ckpt_path), &recorder)
        .map_err(|e| anyhow::anyhow!("failed to save checkpoint: {e}"))?;
    Ok(())
}

pub fn run_eval(args: EvalArgs) -> anyhow::Result<()> {
    let cfg = TrainConfig::load(Path::new(&args.config))?;
    let ckpt_path = args
        .checkpoint
        .clone()
        .unwrap_or_else(|| default_checkpoint(cfg.model.kind));

    let seed = cfg.seed.unwrap_or_default();
    let dataset = FolderDataset::scan(&cfg.data.root)?;
    let (_, val_ds) = dataset.split(cfg.data.val_ratio, seed);
    if val_ds.is_empty() {
        anyhow::bail!("val split is empty; raise data.val_ratio to evaluate");
    }

    let device = <TrainBackend as burn::tensor::backend::Backend>::Device::default();
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let accuracy = match cfg.model.kind {
        ModelKind::Linear => {
            let side = cfg.data.image_size as usize;
            let model = LinearClassifier::<TrainBackend>::new(
                LinearClassifierConfig {
                    input_dim: 3 * side * side,
                    hidden: cfg.model.hidden,
                    num_classes: cfg.model.num_classes,
                },
                &device,
            )
            .load_file(Path::new(&ckpt_path), &recorder, &device)
            .map_err(|e| anyhow::anyhow!("failed to load checkpoint {ckpt_path}: {e}"))?;
            eval_accuracy(&model, &cfg, &val_ds, &device)?
        }
        ModelKind::Conv => {
            let model = ConvClassifier::<TrainBackend>::new(
                ConvClassifierConfig {
                    in_channels: 3,
                    channels: cfg.model.channels.clone(),
                    num_classes: cfg.model.num_classes,
                },
                &device,
            )
            .load_file(Path::new(&ckpt_path), &recorder, &device)
            .map_err(|e| anyhow::anyhow!("failed to load checkpoint {ckpt_path}: {e}"))?;
            eval_accuracy(&model, &cfg, &val_ds, &device)?
        }
    };
    println!("top-1 accuracy: {accuracy:.4}");
    Ok(())
}

fn eval_accuracy<M>(
    model: &M,
    cfg: &TrainConfig,
    data: &FolderDataset,
    device: &<TrainBackend as burn::tensor::backend::Backend>::Device,
) -> anyhow::Result<f32>
where
    M: MixInjection<TrainBackend>,
{
    let mut correct = 0usize;
    let mut total = 0usize;
    for chunk in data.samples.chunks(cfg.optim.batch_size.max(1)) {
        let raw = load_class_batch(chunk, cfg.data.image_size)?;
        let batch = ClsBatch::<TrainBackend>::from_class_batch(&raw, device);
        let n = chunk.len();
        let logits = model.forward_mix(batch.images, None);
        let predicted: Vec<i64> = logits
            .argmax(1)
            .reshape([n])
            .into_data()
            .to_vec()
            .map_err(|e| anyhow::anyhow!("failed to read predictions: {e:?}"))?;
        for (&pred, (_, label)) in predicted.iter().zip(chunk) {
            if pred == *label {
                correct += 1;
            }
            total += 1;
        }
    }
    Ok(correct as f32 / total.max(1) as f32)
}

/// Append-only JSONL trace of per-batch mixing decisions, enabled by setting
/// `MIXFORGE_TRACE` to a file path.
struct TraceWriter {
    file: Option<fs::File>,
}

impl TraceWriter {
    fn from_env() -> Self {
        let Some(path) = std::env::var_os("MIXFORGE_TRACE") else {
            return Self { file: None };
        };
        let path = Path::new(&path);
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Self { file: Some(file) },
            Err(e) => {
                eprintln!("Failed to open trace file {}: {e}", path.display());
                Self { file: None }
            }
        }
    }

    fn record(&mut self, epoch: usize, mode: MixMode, lambda: f32, loss: f32) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let record = serde_json::json!({
            "epoch": epoch,
            "mode": mode.as_str(),
            "lambda": lambda,
            "loss": loss,
        });
        if let Err(e) = writeln!(file, "{record}") {
            eprintln!("Failed to write trace record: {e}");
            self.file = None;
        }
    }
}
