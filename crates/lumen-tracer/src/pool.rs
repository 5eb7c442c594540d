//! Device buffer pool
//!
//! Owns every per-frame device array and the reallocation policy: buffers
//! grow only when the pixel budget is exceeded or the sample count changes,
//! with a 1/16 slack so a window being dragged larger one row at a time does
//! not thrash allocations. Reallocation clears the accumulator and restarts
//! convergence, because the old sums are sized for a different image.

use crate::accum::AtomicImage;
use crate::buffer::{bitmask_words, BitWord, DeviceBuffer};
use crate::ray::{HitRecord, PathState, Potential, Ray};

/// All device-resident arrays for one render target
pub struct BufferPool {
    pub width: u32,
    pub height: u32,
    pub spp: u32,
    /// Pixel capacity the buffers were sized for (includes slack)
    pub max_pixels: usize,
    /// Double-buffered extension rays and their path state
    pub rays: [DeviceBuffer<Ray>; 2],
    pub states: [DeviceBuffer<PathState>; 2],
    pub hits: DeviceBuffer<HitRecord>,
    pub shadow_rays: DeviceBuffer<Ray>,
    pub shadow_potentials: DeviceBuffer<Potential>,
    pub shadow_hits: DeviceBuffer<BitWord>,
    pub accumulator: AtomicImage,
    /// Primary-hit features for the filter: packed normal + depth
    pub feature_normal: AtomicImage,
    /// Primary-hit world positions
    pub feature_world: AtomicImage,
}

impl BufferPool {
    /// Create an empty pool; nothing is allocated until the first `resize`.
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            spp: 0,
            max_pixels: 0,
            rays: [DeviceBuffer::new(0, "extension rays A"), DeviceBuffer::new(0, "extension rays B")],
            states: [DeviceBuffer::new(0, "path state A"), DeviceBuffer::new(0, "path state B")],
            hits: DeviceBuffer::new(0, "extension hits"),
            shadow_rays: DeviceBuffer::new(0, "shadow rays"),
            shadow_potentials: DeviceBuffer::new(0, "shadow potentials"),
            shadow_hits: DeviceBuffer::new(0, "shadow hit bits"),
            accumulator: AtomicImage::new(0),
            feature_normal: AtomicImage::new(0),
            feature_world: AtomicImage::new(0),
        }
    }

    /// Resize for a render target. Idempotent: reallocates only when the
    /// pixel count exceeds the current capacity or `spp` changed. Returns
    /// true when buffers were (re)created, in which case the accumulator was
    /// cleared and the sample counter must restart.
    ///
    /// `shadow_budget` caps the shadow-ray buffer below its default
    /// `2 * max_pixels * spp` sizing; the overflow flush keeps small budgets
    /// correct, just slower.
    pub fn resize(&mut self, width: u32, height: u32, spp: u32, shadow_budget: Option<u32>) -> bool {
        let pixels = (width * height) as usize;
        self.width = width;
        self.height = height;
        let realloc = pixels > self.max_pixels || spp != self.spp;
        if !realloc {
            return false;
        }
        // reserve a bit extra to prevent frequent reallocs
        self.max_pixels = pixels + pixels / 16;
        self.spp = spp;
        let path_slots = self.max_pixels * spp as usize;
        let shadow_slots = {
            let default = 2 * path_slots;
            match shadow_budget {
                Some(budget) => (budget as usize).min(default).max(1),
                None => default,
            }
        };
        self.rays = [
            DeviceBuffer::new(path_slots, "extension rays A"),
            DeviceBuffer::new(path_slots, "extension rays B"),
        ];
        self.states = [
            DeviceBuffer::new(path_slots, "path state A"),
            DeviceBuffer::new(path_slots, "path state B"),
        ];
        self.hits = DeviceBuffer::new(path_slots, "extension hits");
        self.shadow_rays = DeviceBuffer::new(shadow_slots, "shadow rays");
        self.shadow_potentials = DeviceBuffer::new(shadow_slots, "shadow potentials");
        self.shadow_hits = DeviceBuffer::new(bitmask_words(shadow_slots), "shadow hit bits");
        self.accumulator = AtomicImage::new(self.max_pixels);
        self.feature_normal = AtomicImage::new(self.max_pixels);
        self.feature_world = AtomicImage::new(self.max_pixels);
        log::info!(
            "buffers resized for {} pixels @ {} spp ({} path slots, {} shadow slots)",
            self.max_pixels,
            spp,
            path_slots,
            shadow_slots
        );
        true
    }

    /// Path slots per frame for the current target
    #[inline]
    pub fn path_slots(&self) -> usize {
        (self.width * self.height * self.spp) as usize
    }

    /// Visible pixel count (excludes slack)
    #[inline]
    pub fn pixels(&self) -> usize {
        (self.width * self.height) as usize
    }

    /// Shadow-ray capacity
    #[inline]
    pub fn shadow_capacity(&self) -> u32 {
        self.shadow_rays.len() as u32
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_allocates_once() {
        let mut pool = BufferPool::new();
        assert!(pool.resize(64, 64, 1, None));
        let cap = pool.max_pixels;
        assert!(cap >= 64 * 64);
        // same size again: no realloc
        assert!(!pool.resize(64, 64, 1, None));
        // smaller target fits in existing capacity
        assert!(!pool.resize(32, 32, 1, None));
        assert_eq!(pool.max_pixels, cap);
        // spp change forces realloc
        assert!(pool.resize(32, 32, 4, None));
    }

    #[test]
    fn test_slack_reserved() {
        let mut pool = BufferPool::new();
        pool.resize(100, 100, 1, None);
        assert_eq!(pool.max_pixels, 10_000 + 10_000 / 16);
        assert_eq!(pool.rays[0].len(), pool.max_pixels);
        assert_eq!(pool.shadow_rays.len(), 2 * pool.max_pixels);
        assert_eq!(pool.shadow_hits.len(), bitmask_words(2 * pool.max_pixels));
    }

    #[test]
    fn test_shadow_budget_caps_buffer() {
        let mut pool = BufferPool::new();
        pool.resize(64, 64, 1, Some(128));
        assert_eq!(pool.shadow_capacity(), 128);
        assert_eq!(pool.shadow_potentials.len(), 128);
    }
}
