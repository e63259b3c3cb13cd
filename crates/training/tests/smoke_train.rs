//! End-to-end smoke tests: synthetic image folder -> train -> checkpoint -> eval.

use image::{Rgb, RgbImage};
use std::fs;
use std::path::Path;
use training::{run_eval, run_train, EvalArgs, TrainArgs};

fn write_class(root: &Path, class: &str, count: usize, shade: u8) {
    let dir = root.join(class);
    fs::create_dir_all(&dir).unwrap();
    for i in 0..count {
        let mut img = RgbImage::new(8, 8);
        for pixel in img.pixels_mut() {
            *pixel = Rgb([shade, (i * 20) as u8, 255 - shade]);
        }
        img.save(dir.join(format!("img_{i:03}.png"))).unwrap();
    }
}

fn write_config(path: &Path, data_root: &Path, mix: serde_json::Value) {
    let cfg = serde_json::json!({
        "model": {"kind": "linear", "hidden": 16, "num_classes": 2},
        "data": {"root": data_root, "image_size": 8, "val_ratio": 0.25},
        "mix": mix,
        "optim": {"lr": 0.01, "epochs": 1, "batch_size": 4},
        "seed": 13
    });
    fs::write(path, serde_json::to_vec_pretty(&cfg).unwrap()).unwrap();
}

fn train_args(config: &Path, checkpoint: &Path) -> TrainArgs {
    TrainArgs {
        config: config.display().to_string(),
        epochs: None,
        batch_size: None,
        lr: None,
        seed: None,
        checkpoint_out: Some(checkpoint.display().to_string()),
    }
}

#[test]
fn train_then_eval_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let data_root = tmp.path().join("data");
    write_class(&data_root, "neg", 8, 10);
    write_class(&data_root, "pos", 8, 240);

    let config = tmp.path().join("train.json");
    write_config(
        &config,
        &data_root,
        serde_json::json!({"mix_mode": ["mixup", "cutmix"], "alpha": 1.0}),
    );

    let ckpt = tmp.path().join("ckpt/linear.bin");
    run_train(train_args(&config, &ckpt)).unwrap();
    assert!(ckpt.exists(), "checkpoint not written to {}", ckpt.display());

    run_eval(EvalArgs {
        config: config.display().to_string(),
        checkpoint: Some(ckpt.display().to_string()),
    })
    .unwrap();
}

#[test]
fn manifold_range_beyond_backbone_fails_before_training() {
    let tmp = tempfile::tempdir().unwrap();
    let data_root = tmp.path().join("data");
    write_class(&data_root, "neg", 4, 10);
    write_class(&data_root, "pos", 4, 240);

    let config = tmp.path().join("train.json");
    write_config(
        &config,
        &data_root,
        serde_json::json!({
            "mix_mode": "manifoldmix",
            "alpha": 1.0,
            "mix_args": {"manifoldmix": {"layer": [0, 9]}}
        }),
    );

    let ckpt = tmp.path().join("ckpt/linear.bin");
    let err = run_train(train_args(&config, &ckpt)).unwrap_err();
    assert!(
        err.to_string().contains("manifoldmix layer range"),
        "unexpected error: {err}"
    );
    assert!(!ckpt.exists());
}

#[test]
fn class_count_mismatch_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let data_root = tmp.path().join("data");
    write_class(&data_root, "only_class", 4, 10);

    let config = tmp.path().join("train.json");
    write_config(
        &config,
        &data_root,
        serde_json::json!({"mix_mode": "mixup"}),
    );

    let ckpt = tmp.path().join("ckpt/linear.bin");
    let err = run_train(train_args(&config, &ckpt)).unwrap_err();
    assert!(err.to_string().contains("classes"), "unexpected error: {err}");
}

#[test]
fn decoupled_training_runs() {
    let tmp = tempfile::tempdir().unwrap();
    let data_root = tmp.path().join("data");
    write_class(&data_root, "neg", 6, 30);
    write_class(&data_root, "pos", 6, 220);

    let config = tmp.path().join("train.json");
    write_config(
        &config,
        &data_root,
        serde_json::json!({
            "mix_mode": "mixup",
            "alpha": 1.0,
            "label": {
                "mode": "decoupled",
                "eta_weight": {"eta": 0.1, "mode": "both", "thr": 0.5}
            }
        }),
    );

    let ckpt = tmp.path().join("ckpt/linear.bin");
    run_train(train_args(&config, &ckpt)).unwrap();
    assert!(ckpt.exists());
}
