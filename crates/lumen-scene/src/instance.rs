//! Instance list and the flattened descriptor table
//!
//! Instances bind a mesh slot to a world transform. Shading does not walk
//! the instance list; it reads the flattened [`InstanceDesc`] table, which
//! carries the inverse transform needed to reconstruct world-space normals
//! and positions from object-space triangle data.

use bytemuck::{Pod, Zeroable};

use crate::transform::{affine_inverse, IDENTITY};

/// One instance: a mesh binding plus a world transform
#[derive(Copy, Clone, Debug)]
pub struct Instance {
    pub mesh: u32,
    pub transform: [[f32; 4]; 4],
}

impl Default for Instance {
    fn default() -> Self {
        Self { mesh: 0, transform: IDENTITY }
    }
}

/// Flattened per-instance record consumed by shading and traversal
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct InstanceDesc {
    /// Row-major inverse of the instance transform
    pub inverse_transform: [[f32; 4]; 4],
    /// Mesh slot this instance draws its triangles from
    pub mesh: u32,
    pub _pad: [u32; 3],
}

impl InstanceDesc {
    pub fn from_instance(instance: &Instance) -> Self {
        Self {
            inverse_transform: affine_inverse(&instance.transform),
            mesh: instance.mesh,
            _pad: [0; 3],
        }
    }
}
