//! Post-process filter
//!
//! Optional denoise pass over the finalized image: a few edge-aware blur
//! iterations with widening strides, guided by the primary-hit normal/depth
//! features, followed by an optional temporal blend against the previous
//! frame's filtered output. History is dropped whenever the target is
//! resized or accumulation restarts, so stale frames never bleed in.

use rayon::prelude::*;

use crate::accum::AtomicImage;
use crate::settings::RenderSettings;

/// Blur iteration strides (à-trous style hole expansion)
const PASS_STRIDES: [i32; 3] = [1, 2, 4];
/// Weight of the current frame in the temporal blend
const TAA_BLEND: f32 = 0.2;

/// Filter scratch state, persistent across frames
#[derive(Default)]
pub struct FilterState {
    history: Vec<[f32; 4]>,
    scratch: Vec<[f32; 4]>,
    features: Vec<[f32; 4]>,
    has_history: bool,
    width: u32,
    height: u32,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop temporal history (restart, resize).
    pub fn reset(&mut self) {
        self.has_history = false;
    }

    fn ensure_size(&mut self, width: u32, height: u32) {
        if self.width != width || self.height != height {
            let n = (width * height) as usize;
            self.history = vec![[0.0; 4]; n];
            self.scratch = vec![[0.0; 4]; n];
            self.features = vec![[0.0; 4]; n];
            self.width = width;
            self.height = height;
            self.has_history = false;
        }
    }

    /// Filter `target` in place.
    pub fn apply(
        &mut self,
        target: &mut [[f32; 4]],
        feature_normal: &AtomicImage,
        width: u32,
        height: u32,
        settings: &RenderSettings,
    ) {
        if !settings.filter_enabled {
            return;
        }
        self.ensure_size(width, height);
        let pixels = (width * height) as usize;
        for p in 0..pixels {
            self.features[p] = feature_normal.get(p);
        }

        // clamp before blurring so one firefly cannot smear across a region
        let clamp = settings.clamp_direct.max(settings.clamp_indirect);
        for px in target.iter_mut() {
            for c in &mut px[..3] {
                *c = c.min(clamp);
            }
        }

        for stride in PASS_STRIDES {
            blur_pass(target, &mut self.scratch, &self.features, width, height, stride);
            target.copy_from_slice(&self.scratch);
        }

        if settings.taa_enabled {
            if self.has_history {
                for (out, hist) in target.iter_mut().zip(&self.history) {
                    for c in 0..3 {
                        out[c] = hist[c] * (1.0 - TAA_BLEND) + out[c] * TAA_BLEND;
                    }
                }
            }
            self.history.copy_from_slice(target);
            self.has_history = true;
        }
    }
}

/// Similarity of two feature records (normal alignment x depth proximity)
#[inline]
fn feature_weight(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ndot = (a[0] * b[0] + a[1] * b[1] + a[2] * b[2]).max(0.0);
    let wn = ndot * ndot;
    let wn = wn * wn; // ndot^4
    let depth_scale = a[3].abs() * 0.1 + 1e-3;
    let wd = (-((a[3] - b[3]).abs()) / depth_scale).exp();
    wn * wd
}

fn blur_pass(
    src: &[[f32; 4]],
    dst: &mut [[f32; 4]],
    features: &[[f32; 4]],
    width: u32,
    height: u32,
    stride: i32,
) {
    let w = width as i32;
    let h = height as i32;
    dst.par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(row, out_row)| {
            let y = row as i32;
            for x in 0..w {
                let center = (y * w + x) as usize;
                let cf = &features[center];
                let mut sum = [0.0f32; 3];
                let mut total = 0.0f32;
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        let nx = x + dx * stride;
                        let ny = y + dy * stride;
                        if nx < 0 || ny < 0 || nx >= w || ny >= h {
                            continue;
                        }
                        let idx = (ny * w + nx) as usize;
                        let weight = if idx == center {
                            1.0
                        } else {
                            feature_weight(cf, &features[idx])
                        };
                        if weight <= 0.0 {
                            continue;
                        }
                        for c in 0..3 {
                            sum[c] += src[idx][c] * weight;
                        }
                        total += weight;
                    }
                }
                let inv = if total > 0.0 { 1.0 / total } else { 0.0 };
                out_row[x as usize] = [sum[0] * inv, sum[1] * inv, sum[2] * inv, src[center][3]];
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_features(pixels: usize) -> AtomicImage {
        let image = AtomicImage::new(pixels);
        for p in 0..pixels {
            image.store(p, [0.0, 0.0, 1.0, 5.0]);
        }
        image
    }

    fn settings_on() -> RenderSettings {
        let mut s = RenderSettings::default();
        s.apply("filter", 1.0);
        s
    }

    #[test]
    fn test_disabled_filter_is_identity() {
        let mut state = FilterState::new();
        let mut target = vec![[1.0, 2.0, 3.0, 1.0]; 16];
        let original = target.clone();
        state.apply(&mut target, &flat_features(16), 4, 4, &RenderSettings::default());
        assert_eq!(target, original);
    }

    #[test]
    fn test_constant_image_is_preserved() {
        let mut state = FilterState::new();
        let mut target = vec![[0.5, 0.5, 0.5, 1.0]; 64];
        state.apply(&mut target, &flat_features(64), 8, 8, &settings_on());
        for px in &target {
            assert!((px[0] - 0.5).abs() < 1e-4);
        }
    }

    #[test]
    fn test_feature_edge_blocks_bleeding() {
        // left half and right half disagree on normals; a bright left pixel
        // must not bleed into the right half
        let (w, h) = (8u32, 4u32);
        let n = (w * h) as usize;
        let features = AtomicImage::new(n);
        let mut target = vec![[0.0f32; 4]; n];
        for p in 0..n {
            let x = p as u32 % w;
            if x < 4 {
                features.store(p, [0.0, 0.0, 1.0, 5.0]);
                target[p] = [8.0, 8.0, 8.0, 1.0];
            } else {
                features.store(p, [1.0, 0.0, 0.0, 50.0]);
                target[p] = [0.0, 0.0, 0.0, 1.0];
            }
        }
        let mut state = FilterState::new();
        state.apply(&mut target, &features, w, h, &settings_on());
        // a pixel well inside the dark region stays dark
        let idx = (1 * w + 6) as usize;
        assert!(target[idx][0] < 1e-3, "edge leaked: {}", target[idx][0]);
    }

    #[test]
    fn test_taa_blends_history() {
        let mut settings = settings_on();
        settings.apply("TAA", 1.0);
        let mut state = FilterState::new();
        let features = flat_features(16);
        let mut frame1 = vec![[1.0f32, 1.0, 1.0, 1.0]; 16];
        state.apply(&mut frame1, &features, 4, 4, &settings);
        let mut frame2 = vec![[0.0f32; 4]; 16];
        state.apply(&mut frame2, &features, 4, 4, &settings);
        // second frame is pulled toward the bright history
        assert!(frame2[5][0] > 0.5);
        state.reset();
        let mut frame3 = vec![[0.0f32; 4]; 16];
        state.apply(&mut frame3, &features, 4, 4, &settings);
        assert!(frame3[5][0] < 1e-4);
    }
}
