//! Per-frame statistics and the probe query
//!
//! Diagnostics only: nothing here is authoritative for correctness, and the
//! numbers describe the most recently completed frame.

use std::time::Duration;

/// Counters and timings gathered over one frame
#[derive(Clone, Debug, Default)]
pub struct RenderStats {
    /// Rays traced at bounce 1
    pub primary_ray_count: u32,
    /// Rays traced at bounce 2
    pub bounce1_ray_count: u32,
    /// Rays traced at bounce 3 and beyond
    pub deep_ray_count: u32,
    /// Live path count at the start of each bounce
    pub ray_counts_per_bounce: Vec<u32>,
    pub total_extension_rays: u32,
    pub total_shadow_rays: u32,
    pub total_rays: u32,
    /// Times the proactive shadow-buffer flush ran this frame
    pub shadow_flushes: u32,
    pub trace_time_primary: Duration,
    pub trace_time_bounce1: Duration,
    pub trace_time_deep: Duration,
    pub shade_time: Duration,
    pub shadow_trace_time: Duration,
    pub filter_time: Duration,
    pub render_time: Duration,
    /// Samples accumulated so far (after this frame)
    pub samples_taken: u32,
    /// Probe results for the requested pixel; `u32::MAX` when nothing was hit
    pub probed_instance: u32,
    pub probed_triangle: u32,
    pub probed_dist: f32,
    /// Probed hit distance resolved along the pixel's center ray
    pub probed_world_pos: [f32; 3],
}

impl RenderStats {
    /// Reset the per-frame fields, keeping nothing.
    pub fn begin_frame(&mut self) {
        *self = Self {
            samples_taken: self.samples_taken,
            ..Self::default()
        };
    }
}
