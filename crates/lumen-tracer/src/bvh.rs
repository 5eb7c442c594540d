//! Reference intersection service: two-level BVH
//!
//! Each mesh gets its own SAH-binned bounding volume hierarchy, rebuilt only
//! when that mesh's geometry generation changes; instances are traversed by
//! transforming the ray into mesh space with the instance's inverse
//! transform. Because the transform is linear, the hit parameter `t` is the
//! same in both spaces, so records can be compared across instances without
//! rescaling. Queries fan out over rayon; each ray is independent.

use lin_alg::f32::Vec3;
use lumen_scene::{transform_direction, transform_point, DeviceTriangle, InstanceDesc};
use rayon::prelude::*;

use crate::buffer::{BitWord, DeviceBuffer};
use crate::error::TraceResult;
use crate::intersect::{Intersector, SceneGeometry};
use crate::ray::{HitRecord, Ray};

const MAX_LEAF_SIZE: usize = 4;
const NUM_BINS: usize = 12;
const TRAVERSAL_STACK: usize = 64;

/// Flattened BVH node: internal nodes store the left-child index (right is
/// `left + 1`), leaves store a primitive range.
#[derive(Copy, Clone, Debug)]
struct BvhNode {
    min: [f32; 3],
    /// Internal: left child index. Leaf: first primitive slot.
    left_or_first: u32,
    max: [f32; 3],
    /// 0 for internal nodes, primitive count for leaves
    count: u32,
}

impl BvhNode {
    fn empty() -> Self {
        Self {
            min: [f32::MAX; 3],
            max: [f32::MIN; 3],
            left_or_first: 0,
            count: 0,
        }
    }

    fn is_leaf(&self) -> bool {
        self.count > 0
    }

    fn grow(&mut self, min: [f32; 3], max: [f32; 3]) {
        for k in 0..3 {
            self.min[k] = self.min[k].min(min[k]);
            self.max[k] = self.max[k].max(max[k]);
        }
    }

    fn surface_area(&self) -> f32 {
        let dx = self.max[0] - self.min[0];
        let dy = self.max[1] - self.min[1];
        let dz = self.max[2] - self.min[2];
        2.0 * (dx * dy + dy * dz + dz * dx)
    }

    /// Slab test; returns true when the ray's `[tmin, tmax]` overlaps the box.
    #[inline]
    fn intersects(&self, origin: Vec3, inv_dir: Vec3, tmin: f32, tmax: f32) -> bool {
        let o = [origin.x, origin.y, origin.z];
        let inv = [inv_dir.x, inv_dir.y, inv_dir.z];
        let mut lo = tmin;
        let mut hi = tmax;
        for k in 0..3 {
            let t1 = (self.min[k] - o[k]) * inv[k];
            let t2 = (self.max[k] - o[k]) * inv[k];
            lo = lo.max(t1.min(t2));
            hi = hi.min(t1.max(t2));
        }
        lo <= hi
    }
}

#[derive(Copy, Clone)]
struct PrimRef {
    index: u32,
    centroid: [f32; 3],
    aabb_min: [f32; 3],
    aabb_max: [f32; 3],
}

/// Per-mesh acceleration structure with its own copy of the triangle data
/// (the accelerator keeps geometry resident, like any device-side BVH).
struct MeshAccel {
    triangles: Vec<DeviceTriangle>,
    nodes: Vec<BvhNode>,
    prim_indices: Vec<u32>,
    generation: u64,
}

impl MeshAccel {
    fn build(triangles: &[DeviceTriangle], generation: u64) -> Self {
        let mut refs: Vec<PrimRef> = triangles
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let (aabb_min, aabb_max) = t.aabb();
                PrimRef {
                    index: i as u32,
                    centroid: t.centroid(),
                    aabb_min,
                    aabb_max,
                }
            })
            .collect();
        let mut nodes = vec![BvhNode::empty()];
        if !refs.is_empty() {
            let end = refs.len();
            build_recursive(&mut refs, &mut nodes, 0, 0, end);
        }
        Self {
            triangles: triangles.to_vec(),
            nodes,
            prim_indices: refs.iter().map(|r| r.index).collect(),
            generation,
        }
    }

    /// Closest hit in mesh space; `t` is shared with world space.
    fn closest(&self, origin: Vec3, dir: Vec3, tmin: f32, tmax: f32) -> Option<(f32, f32, f32, u32)> {
        if self.triangles.is_empty() {
            return None;
        }
        let inv_dir = Vec3::new(1.0 / dir.x, 1.0 / dir.y, 1.0 / dir.z);
        let mut best: Option<(f32, f32, f32, u32)> = None;
        let mut best_t = tmax;
        let mut stack = [0u32; TRAVERSAL_STACK];
        let mut sp = 0usize;
        stack[sp] = 0;
        sp += 1;
        while sp > 0 {
            sp -= 1;
            let node = &self.nodes[stack[sp] as usize];
            if !node.intersects(origin, inv_dir, tmin, best_t) {
                continue;
            }
            if node.is_leaf() {
                let first = node.left_or_first as usize;
                for slot in first..first + node.count as usize {
                    let prim = self.prim_indices[slot];
                    if let Some((t, u, v)) =
                        intersect_triangle(&self.triangles[prim as usize], origin, dir, tmin, best_t)
                    {
                        best_t = t;
                        best = Some((t, u, v, prim));
                    }
                }
            } else {
                stack[sp] = node.left_or_first;
                stack[sp + 1] = node.left_or_first + 1;
                sp += 2;
            }
        }
        best
    }

    /// Any hit in range, early-out.
    fn occluded(&self, origin: Vec3, dir: Vec3, tmin: f32, tmax: f32) -> bool {
        if self.triangles.is_empty() {
            return false;
        }
        let inv_dir = Vec3::new(1.0 / dir.x, 1.0 / dir.y, 1.0 / dir.z);
        let mut stack = [0u32; TRAVERSAL_STACK];
        let mut sp = 0usize;
        stack[sp] = 0;
        sp += 1;
        while sp > 0 {
            sp -= 1;
            let node = &self.nodes[stack[sp] as usize];
            if !node.intersects(origin, inv_dir, tmin, tmax) {
                continue;
            }
            if node.is_leaf() {
                let first = node.left_or_first as usize;
                for slot in first..first + node.count as usize {
                    let prim = self.prim_indices[slot];
                    if intersect_triangle(&self.triangles[prim as usize], origin, dir, tmin, tmax)
                        .is_some()
                    {
                        return true;
                    }
                }
            } else {
                stack[sp] = node.left_or_first;
                stack[sp + 1] = node.left_or_first + 1;
                sp += 2;
            }
        }
        false
    }
}

fn build_recursive(refs: &mut [PrimRef], nodes: &mut Vec<BvhNode>, node_idx: usize, start: usize, end: usize) {
    let count = end - start;
    let mut node = BvhNode::empty();
    for r in &refs[start..end] {
        node.grow(r.aabb_min, r.aabb_max);
    }

    if count <= MAX_LEAF_SIZE {
        node.left_or_first = start as u32;
        node.count = count as u32;
        nodes[node_idx] = node;
        return;
    }

    let (best_axis, best_pos, best_cost) = find_best_split(&refs[start..end], &node);
    let leaf_cost = count as f32;
    if best_cost >= leaf_cost {
        node.left_or_first = start as u32;
        node.count = count as u32;
        nodes[node_idx] = node;
        return;
    }

    // partition around the split plane
    let mut mid = {
        let mut i = start;
        let mut j = end;
        while i < j {
            if refs[i].centroid[best_axis] < best_pos {
                i += 1;
            } else {
                j -= 1;
                refs.swap(i, j);
            }
        }
        i
    };

    // degenerate partition: fall back to a median split
    if mid == start || mid == end {
        mid = start + count / 2;
        refs[start..end].select_nth_unstable_by(mid - start, |a, b| {
            a.centroid[best_axis]
                .partial_cmp(&b.centroid[best_axis])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    let left_idx = nodes.len();
    nodes.push(BvhNode::empty());
    nodes.push(BvhNode::empty());
    node.left_or_first = left_idx as u32;
    node.count = 0;
    nodes[node_idx] = node;
    build_recursive(refs, nodes, left_idx, start, mid);
    build_recursive(refs, nodes, left_idx + 1, mid, end);
}

/// Binned surface-area-heuristic split search.
fn find_best_split(refs: &[PrimRef], parent: &BvhNode) -> (usize, f32, f32) {
    let mut best_axis = 0;
    let mut best_pos = 0.0f32;
    let mut best_cost = f32::MAX;

    let parent_area = parent.surface_area();
    if parent_area <= 0.0 {
        return (0, 0.0, f32::MAX);
    }

    for axis in 0..3 {
        let mut min_c = f32::MAX;
        let mut max_c = f32::MIN;
        for r in refs {
            min_c = min_c.min(r.centroid[axis]);
            max_c = max_c.max(r.centroid[axis]);
        }
        if max_c - min_c < 1e-6 {
            continue;
        }

        let mut bins = [(BvhNode::empty(), 0usize); NUM_BINS];
        let scale = NUM_BINS as f32 / (max_c - min_c);
        for r in refs {
            let bin = (((r.centroid[axis] - min_c) * scale) as usize).min(NUM_BINS - 1);
            bins[bin].0.grow(r.aabb_min, r.aabb_max);
            bins[bin].1 += 1;
        }

        // prefix areas left to right
        let mut left_area = [0.0f32; NUM_BINS - 1];
        let mut left_count = [0usize; NUM_BINS - 1];
        let mut left_box = BvhNode::empty();
        let mut running = 0usize;
        for i in 0..NUM_BINS - 1 {
            left_box.grow(bins[i].0.min, bins[i].0.max);
            running += bins[i].1;
            left_area[i] = left_box.surface_area();
            left_count[i] = running;
        }

        // suffix areas right to left, evaluating each split plane
        let mut right_box = BvhNode::empty();
        let mut right_count = 0usize;
        for i in (0..NUM_BINS - 1).rev() {
            right_box.grow(bins[i + 1].0.min, bins[i + 1].0.max);
            right_count += bins[i + 1].1;
            let cost = left_count[i] as f32 * left_area[i] + right_count as f32 * right_box.surface_area();
            if cost < best_cost {
                best_cost = cost;
                best_axis = axis;
                best_pos = min_c + (i + 1) as f32 * (max_c - min_c) / NUM_BINS as f32;
            }
        }
    }

    (best_axis, best_pos, best_cost / parent_area)
}

/// Möller-Trumbore ray/triangle test.
#[inline]
fn intersect_triangle(
    tri: &DeviceTriangle,
    origin: Vec3,
    dir: Vec3,
    tmin: f32,
    tmax: f32,
) -> Option<(f32, f32, f32)> {
    let v0 = Vec3::new(tri.v0[0], tri.v0[1], tri.v0[2]);
    let e1 = Vec3::new(tri.v1[0], tri.v1[1], tri.v1[2]) - v0;
    let e2 = Vec3::new(tri.v2[0], tri.v2[1], tri.v2[2]) - v0;
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < 1e-10 {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - v0;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    if t <= tmin || t >= tmax {
        return None;
    }
    Some((t, u, v))
}

/// Two-level BVH intersector over the published scene tables
#[derive(Default)]
pub struct BvhIntersector {
    meshes: Vec<Option<MeshAccel>>,
    instances: Vec<InstanceDesc>,
}

impl BvhIntersector {
    pub fn new() -> Self {
        Self::default()
    }

    fn trace_closest(&self, ray: &Ray) -> HitRecord {
        let mut best = HitRecord::MISS;
        let mut closest = ray.tmax;
        for (inst_idx, desc) in self.instances.iter().enumerate() {
            let Some(Some(accel)) = self.meshes.get(desc.mesh as usize) else {
                continue;
            };
            let o = transform_point(&desc.inverse_transform, ray.origin_vec());
            let d = transform_direction(&desc.inverse_transform, ray.direction_vec());
            if let Some((t, u, v, prim)) = accel.closest(o, d, ray.tmin, closest) {
                closest = t;
                best = HitRecord {
                    t,
                    u,
                    v,
                    prim,
                    instance: inst_idx as u32,
                };
            }
        }
        best
    }

    fn trace_occluded(&self, ray: &Ray) -> bool {
        for desc in &self.instances {
            let Some(Some(accel)) = self.meshes.get(desc.mesh as usize) else {
                continue;
            };
            let o = transform_point(&desc.inverse_transform, ray.origin_vec());
            let d = transform_direction(&desc.inverse_transform, ray.direction_vec());
            if accel.occluded(o, d, ray.tmin, ray.tmax) {
                return true;
            }
        }
        false
    }
}

impl Intersector for BvhIntersector {
    fn refresh(&mut self, scene: SceneGeometry<'_>) -> TraceResult<()> {
        // rebuild only meshes whose geometry generation moved
        self.meshes.resize_with(scene.meshes.len(), || None);
        for (i, mesh) in scene.meshes.iter().enumerate() {
            let stale = match &self.meshes[i] {
                Some(accel) => accel.generation != mesh.generation,
                None => true,
            };
            if stale {
                log::debug!("rebuilding BVH for mesh {i} ({} triangles)", mesh.triangles.len());
                self.meshes[i] = Some(MeshAccel::build(&mesh.triangles, mesh.generation));
            }
        }
        self.instances.clear();
        self.instances.extend_from_slice(&scene.published.instance_descs);
        Ok(())
    }

    fn intersect(&self, rays: &[Ray], hits: &mut [HitRecord]) -> TraceResult<()> {
        debug_assert_eq!(rays.len(), hits.len());
        rays.par_iter()
            .zip(hits.par_iter_mut())
            .for_each(|(ray, hit)| *hit = self.trace_closest(ray));
        Ok(())
    }

    fn occluded(&self, rays: &[Ray], occlusion: &mut [BitWord]) -> TraceResult<()> {
        debug_assert!(occlusion.len() * 32 >= rays.len());
        occlusion.par_iter_mut().enumerate().for_each(|(w, word)| {
            let mut bits = 0u32;
            let base = w * 32;
            for bit in 0..32usize {
                let Some(ray) = rays.get(base + bit) else { break };
                if self.trace_occluded(ray) {
                    bits |= 1 << bit;
                }
            }
            word.0 = bits;
        });
        Ok(())
    }
}

/// Convenience for tests: run an any-hit query against a scratch mask.
pub fn occlusion_mask(intersector: &dyn Intersector, rays: &[Ray]) -> TraceResult<DeviceBuffer<BitWord>> {
    let mut mask = DeviceBuffer::new(crate::buffer::bitmask_words(rays.len()), "occlusion scratch");
    intersector.occluded(rays, mask.as_mut_slice())?;
    Ok(mask)
}
