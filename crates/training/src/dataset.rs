//! Image-folder dataset loading and batch collation.
//!
//! Layout: `root/<class_name>/*.png|jpg|jpeg`. Class indices follow the
//! sorted directory names so a dataset always maps to the same label space.

use anyhow::Context;
use image::imageops::FilterType;
use mix_core::ClassBatch;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FolderDataset {
    pub classes: Vec<String>,
    pub samples: Vec<(PathBuf, i64)>,
}

fn is_image_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("png") | Some("jpg") | Some("jpeg")
    )
}

impl FolderDataset {
    pub fn scan(root: &Path) -> anyhow::Result<Self> {
        let mut classes = Vec::new();
        for entry in
            fs::read_dir(root).with_context(|| format!("reading dataset root {}", root.display()))?
        {
            let entry = entry?;
            if entry.path().is_dir() {
                classes.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        classes.sort();
        if classes.is_empty() {
            anyhow::bail!("no class directories under {}", root.display());
        }

        let mut samples = Vec::new();
        for (label, class) in classes.iter().enumerate() {
            let class_dir = root.join(class);
            let mut files = Vec::new();
            for entry in fs::read_dir(&class_dir)
                .with_context(|| format!("reading class dir {}", class_dir.display()))?
            {
                let path = entry?.path();
                if path.is_file() && is_image_file(&path) {
                    files.push(path);
                }
            }
            files.sort();
            samples.extend(files.into_iter().map(|p| (p, label as i64)));
        }
        if samples.is_empty() {
            anyhow::bail!("no images under {}", root.display());
        }
        Ok(Self { classes, samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Seeded shuffle-and-split into (train, val).
    pub fn split(mut self, val_ratio: f32, seed: u64) -> (FolderDataset, FolderDataset) {
        let mut rng = StdRng::seed_from_u64(seed);
        self.samples.shuffle(&mut rng);
        let val_len = (self.samples.len() as f32 * val_ratio).round() as usize;
        let val_len = val_len.min(self.samples.len().saturating_sub(1));
        let val_samples = self.samples.split_off(self.samples.len() - val_len);
        let val = FolderDataset {
            classes: self.classes.clone(),
            samples: val_samples,
        };
        (self, val)
    }
}

/// Decode and collate a slice of samples into a raw CHW batch.
///
/// Every image is force-resized to `image_size` x `image_size`, so mixed-size
/// inputs cannot reach the augmenter (which would reject them as a shape
/// mismatch anyway).
pub fn load_class_batch(
    samples: &[(PathBuf, i64)],
    image_size: u32,
) -> anyhow::Result<ClassBatch> {
    if samples.is_empty() {
        anyhow::bail!("cannot collate an empty batch");
    }
    let side = image_size as usize;
    let plane = side * side;

    let decoded: Vec<anyhow::Result<Vec<f32>>> = samples
        .par_iter()
        .map(|(path, _)| {
            let img = image::open(path)
                .map_err(|e| anyhow::anyhow!("failed to open image {}: {e}", path.display()))?
                .to_rgb8();
            let img = image::imageops::resize(&img, image_size, image_size, FilterType::Triangle);
            let mut chw = vec![0.0f32; 3 * plane];
            for (y, x, pixel) in img.enumerate_pixels() {
                let base = (y * image_size + x) as usize;
                chw[base] = pixel[0] as f32 / 255.0;
                chw[plane + base] = pixel[1] as f32 / 255.0;
                chw[2 * plane + base] = pixel[2] as f32 / 255.0;
            }
            Ok(chw)
        })
        .collect();

    let mut images = Vec::with_capacity(samples.len() * 3 * plane);
    for chw in decoded {
        images.extend(chw?);
    }
    let labels: Vec<i64> = samples.iter().map(|(_, label)| *label).collect();
    ClassBatch::new(images, labels, 3, side, side).map_err(Into::into)
}
