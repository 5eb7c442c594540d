//! Mesh geometry
//!
//! Authoring-side vertices and indexed triangles are flattened into
//! self-contained [`DeviceTriangle`] records at upload time: shading and
//! intersection never chase vertex indices, they read one record per
//! triangle. This mirrors the renderer-facing encoding the rest of the core
//! expects from all scene data.

use bytemuck::{Pod, Zeroable};

use crate::error::{SceneError, SceneResult};

/// Authoring-side vertex
#[derive(Copy, Clone, Debug)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Shading normal (unit length expected, not enforced)
    pub normal: [f32; 3],
}

/// Authoring-side triangle: three vertex indices plus a material id
#[derive(Copy, Clone, Debug)]
pub struct TriangleDef {
    pub indices: [u32; 3],
    pub material: u32,
}

/// Flattened, device-resident triangle record
///
/// Positions and per-vertex normals are stored inline; `material` indexes the
/// device material table.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct DeviceTriangle {
    pub v0: [f32; 3],
    pub _pad0: f32,
    pub v1: [f32; 3],
    pub _pad1: f32,
    pub v2: [f32; 3],
    pub _pad2: f32,
    pub n0: [f32; 3],
    pub _pad3: f32,
    pub n1: [f32; 3],
    pub _pad4: f32,
    pub n2: [f32; 3],
    pub material: u32,
}

impl DeviceTriangle {
    /// Geometric (face) normal, unnormalized
    pub fn geometric_normal(&self) -> [f32; 3] {
        let e1 = [
            self.v1[0] - self.v0[0],
            self.v1[1] - self.v0[1],
            self.v1[2] - self.v0[2],
        ];
        let e2 = [
            self.v2[0] - self.v0[0],
            self.v2[1] - self.v0[1],
            self.v2[2] - self.v0[2],
        ];
        [
            e1[1] * e2[2] - e1[2] * e2[1],
            e1[2] * e2[0] - e1[0] * e2[2],
            e1[0] * e2[1] - e1[1] * e2[0],
        ]
    }

    /// Object-space axis-aligned bounding box
    pub fn aabb(&self) -> ([f32; 3], [f32; 3]) {
        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for v in [self.v0, self.v1, self.v2] {
            for k in 0..3 {
                min[k] = min[k].min(v[k]);
                max[k] = max[k].max(v[k]);
            }
        }
        (min, max)
    }

    /// Centroid, used for acceleration-structure binning
    pub fn centroid(&self) -> [f32; 3] {
        [
            (self.v0[0] + self.v1[0] + self.v2[0]) / 3.0,
            (self.v0[1] + self.v1[1] + self.v2[1]) / 3.0,
            (self.v0[2] + self.v1[2] + self.v2[2]) / 3.0,
        ]
    }
}

/// One mesh slot: a flat triangle array plus a change counter
///
/// `generation` increments on every geometry upload so acceleration
/// structures can tell whether their cached build is stale.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub triangles: Vec<DeviceTriangle>,
    pub generation: u64,
}

impl Mesh {
    /// Replace this mesh's geometry from authoring data.
    pub fn set_geometry(&mut self, vertices: &[Vertex], triangles: &[TriangleDef]) -> SceneResult<()> {
        let mut flat = Vec::with_capacity(triangles.len());
        for (ti, tri) in triangles.iter().enumerate() {
            for &vi in &tri.indices {
                if vi as usize >= vertices.len() {
                    return Err(SceneError::VertexOutOfRange {
                        triangle: ti,
                        vertex: vi,
                        count: vertices.len(),
                    });
                }
            }
            let [a, b, c] = tri.indices.map(|i| vertices[i as usize]);
            flat.push(DeviceTriangle {
                v0: a.position,
                _pad0: 0.0,
                v1: b.position,
                _pad1: 0.0,
                v2: c.position,
                _pad2: 0.0,
                n0: a.normal,
                _pad3: 0.0,
                n1: b.normal,
                _pad4: 0.0,
                n2: c.normal,
                material: tri.material,
            });
        }
        self.triangles = flat;
        self.generation += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> (Vec<Vertex>, Vec<TriangleDef>) {
        let v = |x: f32, y: f32| Vertex {
            position: [x, y, 0.0],
            normal: [0.0, 0.0, 1.0],
        };
        (
            vec![v(0.0, 0.0), v(1.0, 0.0), v(1.0, 1.0), v(0.0, 1.0)],
            vec![
                TriangleDef { indices: [0, 1, 2], material: 0 },
                TriangleDef { indices: [0, 2, 3], material: 0 },
            ],
        )
    }

    #[test]
    fn test_set_geometry_flattens() {
        let (verts, tris) = quad();
        let mut mesh = Mesh::default();
        mesh.set_geometry(&verts, &tris).unwrap();
        assert_eq!(mesh.triangles.len(), 2);
        assert_eq!(mesh.triangles[0].v1, [1.0, 0.0, 0.0]);
        assert_eq!(mesh.generation, 1);
    }

    #[test]
    fn test_vertex_out_of_range() {
        let (verts, mut tris) = quad();
        tris[1].indices[2] = 99;
        let mut mesh = Mesh::default();
        assert!(mesh.set_geometry(&verts, &tris).is_err());
    }

    #[test]
    fn test_geometric_normal() {
        let (verts, tris) = quad();
        let mut mesh = Mesh::default();
        mesh.set_geometry(&verts, &tris).unwrap();
        let n = mesh.triangles[0].geometric_normal();
        assert!(n[2] > 0.0);
        assert_eq!(n[0], 0.0);
    }
}
