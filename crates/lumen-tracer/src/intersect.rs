//! Intersection service boundary
//!
//! The core depends only on this request/response contract: a batch of rays
//! goes in, a positionally-matched batch of results comes out. Closest-hit
//! queries fill [`HitRecord`]s for extension rays; any-hit queries fill a
//! one-bit-per-ray occlusion mask for shadow rays. Implementations must not
//! reorder results — hit slot `i` always answers ray slot `i`.

use lumen_scene::{Mesh, PublishedScene};

use crate::buffer::BitWord;
use crate::error::TraceResult;
use crate::ray::{HitRecord, Ray};

/// Query flavor, matching the two traversal modes accelerators expose
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QueryMode {
    /// Nearest intersection with full hit attributes
    ClosestHit,
    /// Any intersection in range; used for visibility only
    AnyHit,
}

/// Read-only view of the scene tables an accelerator rebuilds from
#[derive(Copy, Clone)]
pub struct SceneGeometry<'a> {
    pub meshes: &'a [Mesh],
    pub published: &'a PublishedScene,
}

/// Batch ray/scene intersection service
pub trait Intersector: Send {
    /// Synchronize the acceleration structure with the scene tables. Called
    /// once per frame, before any query; never concurrently with queries.
    fn refresh(&mut self, scene: SceneGeometry<'_>) -> TraceResult<()>;

    /// Closest-hit query. `hits[i]` must describe `rays[i]`;
    /// [`HitRecord::MISS`] for rays that escape.
    fn intersect(&self, rays: &[Ray], hits: &mut [HitRecord]) -> TraceResult<()>;

    /// Any-hit (visibility) query. Bit `i` of `occlusion` is set when
    /// `rays[i]` is blocked anywhere inside its `[tmin, tmax]` range.
    fn occluded(&self, rays: &[Ray], occlusion: &mut [BitWord]) -> TraceResult<()>;
}
