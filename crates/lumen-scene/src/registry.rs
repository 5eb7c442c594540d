//! Scene instance registry
//!
//! The registry owns mesh slots and the instance list and publishes the
//! flattened tables the tracer consumes. It is deliberately minimalistic:
//! beyond what would corrupt its own bookkeeping, no cross-validation is
//! performed — binding an instance to a mesh slot that was never populated
//! is the caller's bug, and the surrounding scene-management layer is
//! expected to prevent it.

use crate::error::{SceneError, SceneResult};
use crate::instance::{Instance, InstanceDesc};
use crate::light::{DirectionalLight, LightTables, PointLight, SpotLight, TriLight};
use crate::material::{DeviceMaterial, Material};
use crate::mesh::{Mesh, TriangleDef, Vertex};
use crate::sky::Sky;

/// Flattened scene tables republished by [`Registry::finalize_instances`]
#[derive(Clone, Debug, Default)]
pub struct PublishedScene {
    /// Per-instance descriptors (inverse transforms) consumed by shading
    pub instance_descs: Vec<InstanceDesc>,
    /// Raw instance/transform table consumed by acceleration-structure
    /// refresh
    pub instances: Vec<Instance>,
    /// Bumped on every publish; acceleration structures compare this to
    /// decide whether a rebuild is due
    pub generation: u64,
}

/// Mesh, instance, material, light and sky registry
#[derive(Default)]
pub struct Registry {
    meshes: Vec<Mesh>,
    instances: Vec<Instance>,
    instances_dirty: bool,
    materials: Vec<DeviceMaterial>,
    lights: LightTables,
    sky: Option<Sky>,
    published: PublishedScene,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite mesh slot `mesh_index`.
    ///
    /// First-time population must arrive in non-decreasing index order; a
    /// slot can only be created as the next free one. Overwrites of existing
    /// slots are unrestricted.
    pub fn set_geometry(
        &mut self,
        mesh_index: usize,
        vertices: &[Vertex],
        triangles: &[TriangleDef],
    ) -> SceneResult<()> {
        if mesh_index > self.meshes.len() {
            return Err(SceneError::NonSequentialMesh {
                index: mesh_index,
                next: self.meshes.len(),
            });
        }
        if mesh_index == self.meshes.len() {
            self.meshes.push(Mesh::default());
        }
        self.meshes[mesh_index].set_geometry(vertices, triangles)
    }

    /// Create or update instance `instance_index`.
    ///
    /// `mesh == None` is the end-of-stream sentinel: the instance list is
    /// truncated to `instance_index` and the transform is ignored.
    pub fn set_instance(&mut self, instance_index: usize, mesh: Option<u32>, transform: [[f32; 4]; 4]) {
        let Some(mesh) = mesh else {
            if self.instances.len() > instance_index {
                self.instances.truncate(instance_index);
                self.instances_dirty = true;
            }
            return;
        };
        while self.instances.len() <= instance_index {
            self.instances.push(Instance::default());
            self.instances_dirty = true;
        }
        let slot = &mut self.instances[instance_index];
        if slot.mesh != mesh || slot.transform != transform {
            slot.mesh = mesh;
            slot.transform = transform;
            self.instances_dirty = true;
        }
    }

    /// Rebuild the flattened descriptor table if any instance changed and
    /// republish the raw instance table.
    ///
    /// Must be called after a batch of [`set_instance`](Self::set_instance)
    /// calls and before rendering.
    pub fn finalize_instances(&mut self) {
        if self.instances_dirty {
            self.published.instance_descs = self
                .instances
                .iter()
                .map(InstanceDesc::from_instance)
                .collect();
            self.instances_dirty = false;
            log::debug!(
                "instance descriptor table rebuilt ({} instances)",
                self.instances.len()
            );
        }
        self.published.instances = self.instances.clone();
        self.published.generation += 1;
    }

    /// Upload the material table, converting to the device encoding.
    pub fn set_materials(&mut self, materials: &[Material]) {
        self.materials = materials.iter().map(DeviceMaterial::from_material).collect();
    }

    /// Upload the light tables.
    pub fn set_lights(
        &mut self,
        tri_lights: &[TriLight],
        point_lights: &[PointLight],
        spot_lights: &[SpotLight],
        directional_lights: &[DirectionalLight],
    ) {
        self.lights.set(tri_lights, point_lights, spot_lights, directional_lights);
        if self.lights.is_empty() {
            log::debug!("no direct lights in scene; next-event estimation disabled");
        }
    }

    /// Upload the sky dome.
    pub fn set_sky(&mut self, sky: Sky) {
        self.sky = Some(sky);
    }

    /// True once at least one non-empty mesh and one instance exist.
    pub fn has_geometry(&self) -> bool {
        !self.instances.is_empty() && self.meshes.iter().any(|m| !m.triangles.is_empty())
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn materials(&self) -> &[DeviceMaterial] {
        &self.materials
    }

    pub fn lights(&self) -> &LightTables {
        &self.lights
    }

    pub fn sky(&self) -> Option<&Sky> {
        self.sky.as_ref()
    }

    pub fn published(&self) -> &PublishedScene {
        &self.published
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::IDENTITY;

    fn tri_mesh(registry: &mut Registry, index: usize) {
        let vertices = [
            Vertex { position: [0.0, 0.0, 0.0], normal: [0.0, 0.0, 1.0] },
            Vertex { position: [1.0, 0.0, 0.0], normal: [0.0, 0.0, 1.0] },
            Vertex { position: [0.0, 1.0, 0.0], normal: [0.0, 0.0, 1.0] },
        ];
        let tris = [TriangleDef { indices: [0, 1, 2], material: 0 }];
        registry.set_geometry(index, &vertices, &tris).unwrap();
    }

    #[test]
    fn test_mesh_order_enforced() {
        let mut r = Registry::new();
        tri_mesh(&mut r, 0);
        tri_mesh(&mut r, 1);
        assert!(matches!(
            r.set_geometry(5, &[], &[]),
            Err(SceneError::NonSequentialMesh { .. })
        ));
    }

    #[test]
    fn test_instance_sentinel_truncates() {
        let mut r = Registry::new();
        tri_mesh(&mut r, 0);
        r.set_instance(0, Some(0), IDENTITY);
        r.set_instance(1, Some(0), IDENTITY);
        r.set_instance(2, Some(0), IDENTITY);
        r.set_instance(1, None, IDENTITY);
        r.finalize_instances();
        assert_eq!(r.published().instances.len(), 1);
        assert_eq!(r.published().instance_descs.len(), 1);
    }

    #[test]
    fn test_finalize_rebuilds_only_when_dirty() {
        let mut r = Registry::new();
        tri_mesh(&mut r, 0);
        r.set_instance(0, Some(0), IDENTITY);
        r.finalize_instances();
        let gen1 = r.published().generation;
        // identical update: no dirty flag, but the publish still happens
        r.set_instance(0, Some(0), IDENTITY);
        r.finalize_instances();
        assert_eq!(r.published().generation, gen1 + 1);
        assert_eq!(r.published().instance_descs.len(), 1);
    }

    #[test]
    fn test_has_geometry() {
        let mut r = Registry::new();
        assert!(!r.has_geometry());
        tri_mesh(&mut r, 0);
        assert!(!r.has_geometry());
        r.set_instance(0, Some(0), IDENTITY);
        assert!(r.has_geometry());
    }
}
