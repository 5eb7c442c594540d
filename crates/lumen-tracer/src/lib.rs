//! Wavefront path-tracing render core
//!
//! Lumen advances all live light paths one bounce per pass instead of
//! recursing per pixel: a generate/intersect/shade loop over device-resident
//! parallel arrays, with atomic stream compaction carrying survivors between
//! double-buffered ray buffers and a shared shadow-ray buffer collecting
//! light connections for deferred visibility resolution.
//!
//! # Architecture
//!
//! 1. Primary rays are generated into the active ray buffer, one path per
//!    slot (`buffer index = path identity`).
//! 2. The intersection service fills the hit buffer, preserving slot order.
//! 3. The shading stage runs as a persistent worker pool claiming paths
//!    through a shared atomic cursor; it accumulates terminal contributions,
//!    appends next-event shadow rays, and compacts extension rays into the
//!    inactive buffer.
//! 4. The scheduler reads back the counters (the only host sync per
//!    bounce), swaps buffers, and repeats until no paths survive or the
//!    bounce cap is hit; gathered shadow rays then resolve in one any-hit
//!    pass and the accumulator is normalized into the image target.
//!
//! # Example
//!
//! ```ignore
//! use lumen_tracer::{Renderer, Convergence};
//! use lumen_scene::ViewPyramid;
//!
//! let mut core = Renderer::new();
//! core.resize(1280, 720, 4);
//! // upload geometry, instances, materials, lights ...
//! core.render(&view, Convergence::Restart, false)?;
//! let image = core.image()?;
//! ```

pub mod accum;
pub mod buffer;
pub mod bvh;
pub mod camera;
pub mod counters;
pub mod error;
pub mod filter;
pub mod intersect;
pub mod pool;
pub mod ray;
pub mod rng;
pub mod scheduler;
pub mod settings;
pub mod shade;
pub mod stats;
pub mod worker;

// Re-exports
pub use buffer::{bit_is_set, bitmask_words, BitWord, DeviceBuffer, PairedWriter};
pub use bvh::BvhIntersector;
pub use counters::Counters;
pub use error::{TraceError, TraceResult};
pub use intersect::{Intersector, QueryMode, SceneGeometry};
pub use ray::{HitRecord, PathFlags, PathState, Potential, Ray, MISS_ID};
pub use scheduler::{Convergence, Renderer, MAX_PATH_LENGTH};
pub use settings::RenderSettings;
pub use stats::RenderStats;
pub use worker::WorkerPool;
