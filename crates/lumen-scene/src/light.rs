//! Light tables
//!
//! Four light classes mirror the setter contract: emissive triangles (area
//! lights), point lights, spot lights and directional lights. Tables are
//! device-shaped Pod arrays; the shading stage samples them directly.
//! An `(instance, triangle)` lookup maps emissive geometry hits back to
//! their area-light record for the importance-sampling weight.

use ahash::AHashMap;
use bytemuck::{Pod, Zeroable};

/// Emissive triangle (area light)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct TriLight {
    pub v0: [f32; 3],
    /// World-space area
    pub area: f32,
    pub v1: [f32; 3],
    pub _pad1: f32,
    pub v2: [f32; 3],
    pub _pad2: f32,
    /// Emitted radiance
    pub radiance: [f32; 3],
    pub _pad3: f32,
    /// Instance the emitter belongs to
    pub instance: u32,
    /// Triangle index within that instance's mesh
    pub triangle: u32,
    pub _pad4: [u32; 2],
}

impl TriLight {
    /// Build a light record from world-space vertices, computing the area.
    pub fn new(v0: [f32; 3], v1: [f32; 3], v2: [f32; 3], radiance: [f32; 3], instance: u32, triangle: u32) -> Self {
        let e1 = [v1[0] - v0[0], v1[1] - v0[1], v1[2] - v0[2]];
        let e2 = [v2[0] - v0[0], v2[1] - v0[1], v2[2] - v0[2]];
        let cx = e1[1] * e2[2] - e1[2] * e2[1];
        let cy = e1[2] * e2[0] - e1[0] * e2[2];
        let cz = e1[0] * e2[1] - e1[1] * e2[0];
        let area = 0.5 * (cx * cx + cy * cy + cz * cz).sqrt();
        Self {
            v0,
            area,
            v1,
            _pad1: 0.0,
            v2,
            _pad2: 0.0,
            radiance,
            _pad3: 0.0,
            instance,
            triangle,
            _pad4: [0; 2],
        }
    }

    /// Unnormalized geometric normal of the emitting face
    pub fn normal(&self) -> [f32; 3] {
        let e1 = [self.v1[0] - self.v0[0], self.v1[1] - self.v0[1], self.v1[2] - self.v0[2]];
        let e2 = [self.v2[0] - self.v0[0], self.v2[1] - self.v0[1], self.v2[2] - self.v0[2]];
        [
            e1[1] * e2[2] - e1[2] * e2[1],
            e1[2] * e2[0] - e1[0] * e2[2],
            e1[0] * e2[1] - e1[1] * e2[0],
        ]
    }
}

/// Point light with inverse-square falloff
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct PointLight {
    pub position: [f32; 3],
    pub _pad0: f32,
    /// Radiant intensity (power per steradian)
    pub intensity: [f32; 3],
    pub _pad1: f32,
}

/// Spot light: point light restricted to a cone
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct SpotLight {
    pub position: [f32; 3],
    /// Cosine of the inner (full-intensity) cone angle
    pub cos_inner: f32,
    pub direction: [f32; 3],
    /// Cosine of the outer (falloff-to-zero) cone angle
    pub cos_outer: f32,
    pub intensity: [f32; 3],
    pub _pad: f32,
}

/// Directional light (sun): parallel rays, no falloff
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct DirectionalLight {
    /// Direction the light travels (from the light toward the scene)
    pub direction: [f32; 3],
    pub _pad0: f32,
    pub radiance: [f32; 3],
    pub _pad1: f32,
}

/// All light tables plus the emissive-geometry lookup
#[derive(Clone, Debug, Default)]
pub struct LightTables {
    pub tri_lights: Vec<TriLight>,
    pub point_lights: Vec<PointLight>,
    pub spot_lights: Vec<SpotLight>,
    pub directional_lights: Vec<DirectionalLight>,
    /// (instance, triangle) -> index into `tri_lights`
    pub emitter_lookup: AHashMap<(u32, u32), u32>,
}

impl LightTables {
    pub fn set(
        &mut self,
        tri_lights: &[TriLight],
        point_lights: &[PointLight],
        spot_lights: &[SpotLight],
        directional_lights: &[DirectionalLight],
    ) {
        self.tri_lights.clear();
        self.tri_lights.extend_from_slice(tri_lights);
        self.point_lights.clear();
        self.point_lights.extend_from_slice(point_lights);
        self.spot_lights.clear();
        self.spot_lights.extend_from_slice(spot_lights);
        self.directional_lights.clear();
        self.directional_lights.extend_from_slice(directional_lights);
        self.emitter_lookup.clear();
        for (i, l) in self.tri_lights.iter().enumerate() {
            self.emitter_lookup.insert((l.instance, l.triangle), i as u32);
        }
    }

    /// Total number of sampleable lights across all classes
    pub fn count(&self) -> usize {
        self.tri_lights.len()
            + self.point_lights.len()
            + self.spot_lights.len()
            + self.directional_lights.len()
    }

    /// True when next-event estimation has nothing to sample
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}
