//! Radiance accumulator
//!
//! A per-pixel running RGBA sum in atomic f32 cells. Shading workers add
//! contributions concurrently (several samples of one pixel can terminate in
//! the same dispatch), so each component add is a compare-exchange loop; the
//! alpha channel is repurposed to carry the primary-hit distance, written
//! once per pixel on the first sample. Finalize normalizes into a separate
//! target without touching the raw sums, which converge mode keeps growing.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::buffer::{bit_is_set, BitWord};
use crate::ray::Potential;

/// Atomic-f32 image with four channels per pixel
pub struct AtomicImage {
    words: Box<[AtomicU32]>,
    pixels: usize,
}

impl AtomicImage {
    pub fn new(pixels: usize) -> Self {
        let words = (0..pixels * 4).map(|_| AtomicU32::new(0)).collect();
        Self { words, pixels }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pixels
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pixels == 0
    }

    pub fn clear(&self) {
        for w in self.words.iter() {
            w.store(0, Ordering::Relaxed);
        }
    }

    #[inline]
    fn cell(&self, pixel: usize, channel: usize) -> &AtomicU32 {
        &self.words[pixel * 4 + channel]
    }

    /// Atomically add to one channel (compare-exchange loop).
    fn add_channel(&self, pixel: usize, channel: usize, value: f32) {
        if value == 0.0 {
            return;
        }
        let cell = self.cell(pixel, channel);
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            let next = (f32::from_bits(current) + value).to_bits();
            match cell.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Add an RGB contribution to a pixel.
    pub fn add(&self, pixel: usize, rgb: [f32; 3]) {
        self.add_channel(pixel, 0, rgb[0]);
        self.add_channel(pixel, 1, rgb[1]);
        self.add_channel(pixel, 2, rgb[2]);
    }

    /// Overwrite the alpha channel (plain store; callers guarantee a single
    /// writer per pixel per phase).
    pub fn store_alpha(&self, pixel: usize, value: f32) {
        self.cell(pixel, 3).store(value.to_bits(), Ordering::Relaxed);
    }

    /// Overwrite all four channels.
    pub fn store(&self, pixel: usize, rgba: [f32; 4]) {
        for (c, v) in rgba.into_iter().enumerate() {
            self.cell(pixel, c).store(v.to_bits(), Ordering::Relaxed);
        }
    }

    pub fn get(&self, pixel: usize) -> [f32; 4] {
        [
            f32::from_bits(self.cell(pixel, 0).load(Ordering::Relaxed)),
            f32::from_bits(self.cell(pixel, 1).load(Ordering::Relaxed)),
            f32::from_bits(self.cell(pixel, 2).load(Ordering::Relaxed)),
            f32::from_bits(self.cell(pixel, 3).load(Ordering::Relaxed)),
        ]
    }

    /// Summed RGB energy over the whole image (diagnostics and tests).
    pub fn total_energy(&self) -> f64 {
        let mut sum = 0.0f64;
        for p in 0..self.pixels {
            let v = self.get(p);
            sum += (v[0] + v[1] + v[2]) as f64;
        }
        sum
    }
}

/// Merge resolved shadow-ray contributions into the accumulator.
///
/// A set bit in `occlusion` means the connection was blocked; its potential
/// is discarded. Unoccluded potentials add exactly their precomputed RGB.
pub fn resolve(
    accumulator: &AtomicImage,
    occlusion: &[BitWord],
    potentials: &[Potential],
    count: usize,
) {
    for (i, p) in potentials.iter().take(count).enumerate() {
        if !bit_is_set(occlusion, i) {
            accumulator.add(p.pixel as usize, p.rgb);
        }
    }
}

/// Normalize the accumulator into `target` without mutating the sums.
pub fn finalize(accumulator: &AtomicImage, target: &mut [[f32; 4]], sample_count: u32) {
    let scale = if sample_count == 0 { 0.0 } else { 1.0 / sample_count as f32 };
    for (pixel, out) in target.iter_mut().enumerate() {
        let v = accumulator.get(pixel);
        *out = [v[0] * scale, v[1] * scale, v[2] * scale, 1.0];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrent_adds_sum() {
        let image = AtomicImage::new(1);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let image = &image;
                scope.spawn(move || {
                    for _ in 0..1000 {
                        image.add(0, [0.25, 0.0, 1.0]);
                    }
                });
            }
        });
        let v = image.get(0);
        assert!((v[0] - 1000.0).abs() < 1e-2);
        assert!((v[2] - 4000.0).abs() < 1e-1);
    }

    #[test]
    fn test_resolve_respects_occlusion() {
        let image = AtomicImage::new(4);
        let potentials = [
            Potential { rgb: [1.0, 2.0, 3.0], pixel: 0 },
            Potential { rgb: [9.0, 9.0, 9.0], pixel: 1 },
            Potential { rgb: [0.5, 0.5, 0.5], pixel: 0 },
        ];
        // bit 1 set: the middle connection is blocked
        let occlusion = [BitWord(0b010)];
        resolve(&image, &occlusion, &potentials, 3);
        let p0 = image.get(0);
        assert!((p0[0] - 1.5).abs() < 1e-6);
        assert_eq!(image.get(1)[0], 0.0);
    }

    #[test]
    fn test_finalize_preserves_sums() {
        let image = AtomicImage::new(2);
        image.add(0, [2.0, 4.0, 6.0]);
        let mut target = [[0.0f32; 4]; 2];
        finalize(&image, &mut target, 2);
        assert_eq!(target[0][0], 1.0);
        assert_eq!(target[0][1], 2.0);
        // raw accumulator untouched
        assert_eq!(image.get(0)[0], 2.0);
    }

    #[test]
    fn test_alpha_carries_depth() {
        let image = AtomicImage::new(1);
        image.add(0, [1.0, 1.0, 1.0]);
        image.store_alpha(0, 7.5);
        assert_eq!(image.get(0)[3], 7.5);
    }
}
