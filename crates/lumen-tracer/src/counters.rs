//! Phase counters
//!
//! A single small block of relaxed atomics is the only synchronization
//! between shading workers and the host loop: workers bump the extension and
//! shadow cursors while compacting, and the host reads one snapshot per
//! bounce to learn how many paths survived. Counters are re-initialized at
//! defined points (frame start, bounce start), never mid-phase.

use std::sync::atomic::{AtomicU32, Ordering};

/// Host-side snapshot of the device counter block
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Counters {
    /// Extension rays compacted into the out-buffer this bounce
    pub extension_rays: u32,
    /// Shadow rays accumulated since the last flush
    pub shadow_rays: u32,
    /// Extension rays traced over the whole frame
    pub total_extension_rays: u32,
    /// Probe results (instance, triangle, distance) for the probed pixel
    pub probed_instance: u32,
    pub probed_triangle: u32,
    pub probed_dist: f32,
}

/// Device-side counter block
///
/// Single-writer-per-slot, many-threads: all increments are relaxed
/// `fetch_add`; the host snapshot happens after the dispatch has joined, so
/// no stronger ordering is required.
#[derive(Default)]
pub struct AtomicCounters {
    extension_rays: AtomicU32,
    shadow_rays: AtomicU32,
    total_extension_rays: AtomicU32,
    probed_instance: AtomicU32,
    probed_triangle: AtomicU32,
    probed_dist: AtomicU32,
}

impl AtomicCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for the primary-ray phase of a new frame.
    pub fn init_for_extend(&self, path_count: u32) {
        self.extension_rays.store(0, Ordering::Relaxed);
        self.shadow_rays.store(0, Ordering::Relaxed);
        self.total_extension_rays.store(path_count, Ordering::Relaxed);
        self.probed_instance.store(u32::MAX, Ordering::Relaxed);
        self.probed_triangle.store(u32::MAX, Ordering::Relaxed);
        self.probed_dist.store(0, Ordering::Relaxed);
    }

    /// Reset for a subsequent bounce: fold the previous bounce's extension
    /// count into the frame total and rewind the extension cursor. The
    /// shadow cursor persists — the shadow buffer drains only at flush or
    /// frame end.
    pub fn init_subsequent(&self) {
        let prev = self.extension_rays.swap(0, Ordering::Relaxed);
        self.total_extension_rays.fetch_add(prev, Ordering::Relaxed);
    }

    /// Rewind the shadow cursor after a flush has resolved the buffer.
    pub fn reset_shadow(&self) {
        self.shadow_rays.store(0, Ordering::Relaxed);
    }

    /// Extension-ray cursor, shared with the compaction writer.
    pub fn extension_cursor(&self) -> &AtomicU32 {
        &self.extension_rays
    }

    /// Shadow-ray cursor, shared with the shadow append writer.
    pub fn shadow_cursor(&self) -> &AtomicU32 {
        &self.shadow_rays
    }

    /// Record probe results for the probed pixel (relaxed stores; at most
    /// one path per frame matches the probe).
    pub fn store_probe(&self, instance: u32, triangle: u32, dist: f32) {
        self.probed_instance.store(instance, Ordering::Relaxed);
        self.probed_triangle.store(triangle, Ordering::Relaxed);
        self.probed_dist.store(dist.to_bits(), Ordering::Relaxed);
    }

    /// Host readback — the one synchronization point per bounce.
    pub fn snapshot(&self) -> Counters {
        Counters {
            extension_rays: self.extension_rays.load(Ordering::Relaxed),
            shadow_rays: self.shadow_rays.load(Ordering::Relaxed),
            total_extension_rays: self.total_extension_rays.load(Ordering::Relaxed),
            probed_instance: self.probed_instance.load(Ordering::Relaxed),
            probed_triangle: self.probed_triangle.load(Ordering::Relaxed),
            probed_dist: f32::from_bits(self.probed_dist.load(Ordering::Relaxed)),
        }
    }
}
