//! Region and mask generators for the area-based mixing modes.
//!
//! All generators are pure: (lambda, spatial dims, mode parameters, rng) in,
//! geometry out. Degenerate draws (zero or full area) are clamped to the
//! nearest valid geometry and never surface as errors; the achieved area is
//! reported back so the label target can use the real mixed ratio.

use rand::{Rng, RngCore};
use rand_distr::{Distribution, StandardNormal};
use rustfft::{num_complex::Complex, FftPlanner};

/// Half-open pixel rectangle `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl Region {
    pub const EMPTY: Region = Region {
        x0: 0,
        y0: 0,
        x1: 0,
        y1: 0,
    };

    pub fn width(&self) -> usize {
        self.x1 - self.x0
    }

    pub fn height(&self) -> usize {
        self.y1 - self.y0
    }

    pub fn area(&self) -> usize {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }
}

/// Cutmix box for the sampled `lambda`: side ratio `sqrt(1 - lambda)`,
/// uniform random center, clipped to the image bounds.
///
/// Clipping changes the achieved area, so callers must recompute the label
/// lambda from the returned region via `region_lambda`.
pub fn rand_bbox(lambda: f32, w: usize, h: usize, rng: &mut dyn RngCore) -> Region {
    let cut_ratio = (1.0 - lambda.clamp(0.0, 1.0)).sqrt();
    let cut_w = (w as f32 * cut_ratio).round() as usize;
    let cut_h = (h as f32 * cut_ratio).round() as usize;
    if cut_w == 0 || cut_h == 0 {
        return Region::EMPTY;
    }
    let cx = rng.random_range(0..w);
    let cy = rng.random_range(0..h);
    Region {
        x0: cx.saturating_sub(cut_w / 2),
        y0: cy.saturating_sub(cut_h / 2),
        x1: (cx + cut_w.div_ceil(2)).min(w),
        y1: (cy + cut_h.div_ceil(2)).min(h),
    }
}

/// Mix ratio implied by a pasted region: the share of the image that still
/// belongs to the original sample.
pub fn region_lambda(region: &Region, w: usize, h: usize) -> f32 {
    let total = w * h;
    if total == 0 {
        return 1.0;
    }
    (1.0 - region.area() as f32 / total as f32).clamp(0.0, 1.0)
}

/// Placement for a resized partner copy.
#[derive(Debug, Clone, Copy)]
pub struct ResizePaste {
    /// Scale ratio the partner is resized by before pasting.
    pub tau: f32,
    pub dest: Region,
}

/// Resizemix geometry: a scale ratio from `scope` (or derived from the Beta
/// lambda when `use_alpha`) and a uniform paste location for the shrunken
/// partner copy. The label lambda follows from `dest` via `region_lambda`.
pub fn resizemix_geometry(
    scope: (f32, f32),
    use_alpha: bool,
    lambda: f32,
    w: usize,
    h: usize,
    rng: &mut dyn RngCore,
) -> ResizePaste {
    let (lo, hi) = scope;
    let tau = if use_alpha {
        (1.0 - lambda.clamp(0.0, 1.0)).sqrt().clamp(lo, hi)
    } else if hi - lo <= f32::EPSILON {
        lo
    } else {
        rng.random_range(lo..hi)
    };
    let tw = ((w as f32 * tau).round() as usize).clamp(1, w);
    let th = ((h as f32 * tau).round() as usize).clamp(1, h);
    let x0 = if w > tw { rng.random_range(0..=w - tw) } else { 0 };
    let y0 = if h > th { rng.random_range(0..=h - th) } else { 0 };
    ResizePaste {
        tau,
        dest: Region {
            x0,
            y0,
            x1: x0 + tw,
            y1: y0 + th,
        },
    }
}

fn centered_freq(i: usize, n: usize) -> f32 {
    let half = n / 2;
    if i <= half {
        i as f32 / n as f32
    } else {
        (n - i) as f32 / n as f32
    }
}

/// Random low-frequency field: gaussian complex spectrum attenuated by
/// `1 / max(freq, 1/max(w,h))^decay_power`, inverse 2-D FFT, real part.
pub fn low_freq_grey_mask(decay_power: f32, w: usize, h: usize, rng: &mut dyn RngCore) -> Vec<f32> {
    let freq_floor = 1.0 / w.max(h).max(1) as f32;
    let mut spectrum = Vec::with_capacity(h * w);
    for y in 0..h {
        let fy = centered_freq(y, h);
        for x in 0..w {
            let fx = centered_freq(x, w);
            let amp = (fx * fx + fy * fy).sqrt().max(freq_floor).powf(-decay_power);
            let re: f32 = StandardNormal.sample(rng);
            let im: f32 = StandardNormal.sample(rng);
            spectrum.push(Complex::new(re * amp, im * amp));
        }
    }

    let mut planner = FftPlanner::<f32>::new();
    let row_fft = planner.plan_fft_inverse(w);
    for row in spectrum.chunks_exact_mut(w) {
        row_fft.process(row);
    }
    let col_fft = planner.plan_fft_inverse(h);
    let mut column = vec![Complex::new(0.0, 0.0); h];
    for x in 0..w {
        for y in 0..h {
            column[y] = spectrum[y * w + x];
        }
        col_fft.process(&mut column);
        for y in 0..h {
            spectrum[y * w + x] = column[y];
        }
    }

    spectrum.iter().map(|c| c.re).collect()
}

/// Binarise a grey mask so that exactly `partner_pixels` pixels (the highest
/// grey values, ties broken by index) select the partner image.
///
/// When `max_soft > 0`, the `round(max_soft * len)` ranks on each side of the
/// cut get linearly interpolated weights instead of a hard 0/1 step.
pub fn binarise_mask(grey: &[f32], partner_pixels: usize, max_soft: f32) -> Vec<f32> {
    let len = grey.len();
    let k = partner_pixels.min(len);
    let mut order: Vec<usize> = (0..len).collect();
    order.sort_by(|&a, &b| {
        grey[b]
            .partial_cmp(&grey[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let soft = ((max_soft.max(0.0) * len as f32).round() as usize)
        .min(k)
        .min(len - k);
    let mut mask = vec![0.0f32; len];
    for (rank, &idx) in order.iter().enumerate() {
        mask[idx] = if soft == 0 {
            if rank < k {
                1.0
            } else {
                0.0
            }
        } else if rank + soft < k {
            1.0
        } else if rank >= k + soft {
            0.0
        } else {
            ((k + soft - rank) as f32 / (2 * soft) as f32).clamp(0.0, 1.0)
        };
    }
    mask
}

/// Mix ratio implied by a per-pixel partner mask.
pub fn mask_lambda(mask: &[f32]) -> f32 {
    if mask.is_empty() {
        return 1.0;
    }
    let partner: f32 = mask.iter().sum();
    (1.0 - partner / mask.len() as f32).clamp(0.0, 1.0)
}

/// Full fmix mask for the sampled `lambda`, plus the recomputed lambda that
/// reflects the mask actually produced.
pub fn fmix_mask(
    decay_power: f32,
    max_soft: f32,
    reformulate: bool,
    lambda: f32,
    w: usize,
    h: usize,
    rng: &mut dyn RngCore,
) -> (Vec<f32>, f32) {
    let grey = low_freq_grey_mask(decay_power, w, h, rng);
    let partner = ((1.0 - lambda.clamp(0.0, 1.0)) * (w * h) as f32).round() as usize;
    let mut mask = binarise_mask(&grey, partner, max_soft);
    if reformulate {
        for m in &mut mask {
            *m = 1.0 - *m;
        }
    }
    let lambda_actual = mask_lambda(&mask);
    (mask, lambda_actual)
}
