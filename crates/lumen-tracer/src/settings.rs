//! Scalar render settings
//!
//! The per-call override surface is string-keyed so the embedding layer can
//! forward user settings without linking against this crate's types; unknown
//! names are ignored (with a log line) rather than rejected.

/// Tunable scalars consumed by the scheduler and shading stage
#[derive(Clone, Debug)]
pub struct RenderSettings {
    /// Offset applied to secondary-ray origins to escape the surface
    pub geometry_epsilon: f32,
    /// Indirect-contribution clamp, suppresses fireflies
    pub clamp_value: f32,
    /// Direct-channel clamp used by the filter
    pub clamp_direct: f32,
    /// Indirect-channel clamp used by the filter
    pub clamp_indirect: f32,
    /// Enable the spatial filter pass
    pub filter_enabled: bool,
    /// Enable temporal reprojection on top of the filter
    pub taa_enabled: bool,
    /// Optional cap on the shadow-ray buffer, applied at the next resize
    pub shadow_ray_budget: Option<u32>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            geometry_epsilon: 1e-4,
            clamp_value: 10.0,
            clamp_direct: 10.0,
            clamp_indirect: 10.0,
            filter_enabled: false,
            taa_enabled: false,
            shadow_ray_budget: None,
        }
    }
}

impl RenderSettings {
    /// Apply a named override.
    pub fn apply(&mut self, name: &str, value: f32) {
        match name {
            "epsilon" => self.geometry_epsilon = value,
            "clampValue" => self.clamp_value = value,
            "clampDirect" => self.clamp_direct = value,
            "clampIndirect" => self.clamp_indirect = value,
            "filter" => self.filter_enabled = value != 0.0,
            "TAA" => self.taa_enabled = value != 0.0,
            "shadowRays" => {
                self.shadow_ray_budget = if value > 0.0 { Some(value as u32) } else { None }
            }
            _ => log::debug!("ignoring unknown setting {name:?}"),
        }
    }
}
