//! Wavefront scheduler
//!
//! The host-side control loop. One frame alternates generate/intersect and
//! shade phases over double-buffered ray arrays until every path has
//! terminated or the bounce cap is reached, then resolves the gathered
//! shadow connections and finalizes the accumulator into the image target.
//!
//! Two host/device synchronization points exist per bounce and no more: the
//! intersection query and the counter readback after shading. Everything
//! else is non-blocking submission. A frame, once started, always runs to
//! completion; there is no mid-frame cancellation.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytemuck::Pod;
use parking_lot::Mutex;

use lumen_scene::{
    DirectionalLight, Material, PointLight, Registry, Sky, SpotLight, TriLight, TriangleDef,
    Vertex, ViewPyramid,
};

use crate::accum::{self, AtomicImage};
use crate::buffer::{bitmask_words, BitWord, DeviceBuffer};
use crate::camera;
use crate::counters::AtomicCounters;
use crate::error::{TraceError, TraceResult};
use crate::filter::FilterState;
use crate::intersect::{Intersector, SceneGeometry};
use crate::pool::BufferPool;
use crate::ray::{Potential, Ray};
use crate::rng::{random_uint, RESTART_SEED};
use crate::settings::RenderSettings;
use crate::shade::{self, SceneRefs, ShadeInputs, ShadeParams};
use crate::stats::RenderStats;
use crate::worker::WorkerPool;

/// Bounce cap: paths never extend past this many surface vertices
pub const MAX_PATH_LENGTH: u32 = 3;

/// Convergence mode for a frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Convergence {
    /// Clear the accumulator and restart with the fixed noise seed
    Restart,
    /// Keep accumulating samples into the existing sums
    Converge,
}

struct FrameJob {
    view: ViewPyramid,
    convergence: Convergence,
}

/// Pick the input/output pair out of a double-buffered array.
fn split2<T: Pod>(
    buffers: &mut [DeviceBuffer<T>; 2],
    input: usize,
) -> (&DeviceBuffer<T>, &mut DeviceBuffer<T>) {
    let [a, b] = buffers;
    if input == 0 {
        (&*a, b)
    } else {
        (&*b, a)
    }
}

/// Trace and resolve `count` gathered shadow connections.
fn resolve_connections(
    intersector: &dyn Intersector,
    shadow_rays: &DeviceBuffer<Ray>,
    shadow_hits: &mut DeviceBuffer<BitWord>,
    potentials: &DeviceBuffer<Potential>,
    accumulator: &AtomicImage,
    count: u32,
) -> TraceResult<()> {
    if count == 0 {
        return Ok(());
    }
    let n = count as usize;
    let words = bitmask_words(n);
    intersector.occluded(&shadow_rays.as_slice()[..n], &mut shadow_hits.as_mut_slice()[..words])?;
    accum::resolve(
        accumulator,
        &shadow_hits.as_slice()[..words],
        &potentials.as_slice()[..n],
        n,
    );
    Ok(())
}

/// Everything one frame mutates, shared with the optional render thread
struct CoreState {
    registry: Registry,
    pool: BufferPool,
    counters: AtomicCounters,
    workers: WorkerPool,
    settings: RenderSettings,
    stats: RenderStats,
    intersector: Box<dyn Intersector>,
    samples_taken: u32,
    cam_seed: u32,
    first_converging: bool,
    probe: Option<(u32, u32)>,
    target: Vec<[f32; 4]>,
    filter: FilterState,
}

impl CoreState {
    fn render_frame(&mut self, view: &ViewPyramid, convergence: Convergence) -> TraceResult<()> {
        if self.pool.width == 0 || self.pool.height == 0 {
            return Err(TraceError::NoTarget);
        }
        // setup misuse: no scene data yet is a defined no-op
        if !self.registry.has_geometry() {
            log::debug!("render called without scene data; nothing to do");
            return Ok(());
        }
        let frame_timer = Instant::now();
        self.stats.begin_frame();

        // refresh the acceleration structure from the published tables
        self.intersector.refresh(SceneGeometry {
            meshes: self.registry.meshes(),
            published: self.registry.published(),
        })?;

        if convergence == Convergence::Restart || self.first_converging {
            self.pool.accumulator.clear();
            self.samples_taken = 0;
            // if we switch to converging, the next frame is the first
            // converging one and must not inherit this partial sample
            self.first_converging = true;
            self.cam_seed = RESTART_SEED;
            self.filter.reset();
        }
        if convergence == Convergence::Converge {
            self.first_converging = false;
        }

        let width = self.pool.width;
        let height = self.pool.height;
        let spp = self.pool.spp;
        let pixels = width * height;
        let mut path_count = pixels * spp;
        let frame_seed = random_uint(&mut self.cam_seed);
        let probe_pixel = match self.probe {
            Some((x, y)) if x < width && y < height => y * width + x,
            _ => u32::MAX,
        };

        self.counters.init_for_extend(path_count);
        self.stats.primary_ray_count = path_count;
        let n = path_count as usize;
        camera::generate_primary(
            &mut self.pool.rays[0].as_mut_slice()[..n],
            &mut self.pool.states[0].as_mut_slice()[..n],
            view,
            width,
            height,
            frame_seed,
        );

        let mut input = 0usize;
        let mut shade_time = Duration::ZERO;
        let mut trace_time_deep = Duration::ZERO;
        for bounce in 1..=MAX_PATH_LENGTH {
            self.stats.ray_counts_per_bounce.push(path_count);
            if bounce == 2 {
                self.stats.bounce1_ray_count = path_count;
            } else if bounce > 2 {
                self.stats.deep_ray_count += path_count;
            }
            let n = path_count as usize;

            // intersect: the designated suspension point; hit slot i answers
            // ray slot i
            let trace_timer = Instant::now();
            self.intersector.intersect(
                &self.pool.rays[input].as_slice()[..n],
                &mut self.pool.hits.as_mut_slice()[..n],
            )?;
            match bounce {
                1 => self.stats.trace_time_primary = trace_timer.elapsed(),
                2 => self.stats.trace_time_bounce1 = trace_timer.elapsed(),
                _ => trace_time_deep += trace_timer.elapsed(),
            }

            // shade: workers compact survivors into the out-buffers
            let shade_timer = Instant::now();
            {
                let (rays_in, rays_out) = split2(&mut self.pool.rays, input);
                let (states_in, states_out) = split2(&mut self.pool.states, input);
                let inputs = ShadeInputs {
                    rays: &rays_in.as_slice()[..n],
                    states: &states_in.as_slice()[..n],
                    hits: &self.pool.hits.as_slice()[..n],
                    extension: crate::buffer::PairedWriter::new(
                        rays_out,
                        states_out,
                        self.counters.extension_cursor(),
                    ),
                    shadow: crate::buffer::PairedWriter::new(
                        &mut self.pool.shadow_rays,
                        &mut self.pool.shadow_potentials,
                        self.counters.shadow_cursor(),
                    ),
                    accumulator: &self.pool.accumulator,
                    feature_normal: &self.pool.feature_normal,
                    feature_world: &self.pool.feature_world,
                    counters: &self.counters,
                    scene: SceneRefs {
                        meshes: self.registry.meshes(),
                        instance_descs: &self.registry.published().instance_descs,
                        materials: self.registry.materials(),
                        lights: self.registry.lights(),
                        sky: self.registry.sky(),
                    },
                    params: ShadeParams {
                        width,
                        height,
                        frame_seed,
                        bounce,
                        max_path_length: MAX_PATH_LENGTH,
                        probe_pixel,
                        first_sample: self.samples_taken == 0,
                        capture_features: self.settings.filter_enabled,
                        geometry_epsilon: self.settings.geometry_epsilon,
                        clamp_value: self.settings.clamp_value,
                    },
                };
                self.workers
                    .dispatch(path_count, |i| shade::shade_path(&inputs, i));
            }
            shade_time += shade_timer.elapsed();

            // counter readback — the one synchronization point per bounce
            let snapshot = self.counters.snapshot();
            if bounce == MAX_PATH_LENGTH {
                break;
            }
            path_count = snapshot.extension_rays;
            input = 1 - input;
            if path_count == 0 {
                break;
            }

            // proactive flush: if the next bounce could overflow the shadow
            // buffer, resolve what we have now; connections are never dropped
            if snapshot.shadow_rays + path_count >= self.pool.shadow_capacity() {
                log::warn!(
                    "shadow buffer near capacity ({}/{}); flushing early",
                    snapshot.shadow_rays,
                    self.pool.shadow_capacity()
                );
                resolve_connections(
                    self.intersector.as_ref(),
                    &self.pool.shadow_rays,
                    &mut self.pool.shadow_hits,
                    &self.pool.shadow_potentials,
                    &self.pool.accumulator,
                    snapshot.shadow_rays,
                )?;
                self.stats.total_shadow_rays += snapshot.shadow_rays;
                self.stats.shadow_flushes += 1;
                self.counters.reset_shadow();
            }
            self.counters.init_subsequent();
        }
        self.stats.shade_time = shade_time;
        self.stats.trace_time_deep = trace_time_deep;

        // loop completed; connect the remaining shadow rays
        let snapshot = self.counters.snapshot();
        let shadow_timer = Instant::now();
        resolve_connections(
            self.intersector.as_ref(),
            &self.pool.shadow_rays,
            &mut self.pool.shadow_hits,
            &self.pool.shadow_potentials,
            &self.pool.accumulator,
            snapshot.shadow_rays,
        )?;
        self.stats.shadow_trace_time = shadow_timer.elapsed();
        self.stats.total_shadow_rays += snapshot.shadow_rays;
        self.stats.total_extension_rays = snapshot.total_extension_rays;
        self.stats.total_rays = self.stats.total_extension_rays + self.stats.total_shadow_rays;
        self.stats.probed_instance = snapshot.probed_instance;
        self.stats.probed_triangle = snapshot.probed_triangle;
        self.stats.probed_dist = snapshot.probed_dist;
        if let Some((x, y)) = self.probe {
            let dir = camera::center_ray_direction(view, width, height, x, y);
            let p = view.pos + dir * snapshot.probed_dist;
            self.stats.probed_world_pos = [p.x, p.y, p.z];
        }

        // advance convergence and present
        self.samples_taken += spp;
        self.stats.samples_taken = self.samples_taken;
        let visible = pixels as usize;
        accum::finalize(
            &self.pool.accumulator,
            &mut self.target[..visible],
            self.samples_taken,
        );
        if self.settings.filter_enabled {
            let filter_timer = Instant::now();
            self.filter.apply(
                &mut self.target[..visible],
                &self.pool.feature_normal,
                width,
                height,
                &self.settings,
            );
            self.stats.filter_time = filter_timer.elapsed();
        }
        self.stats.render_time = frame_timer.elapsed();
        log::debug!(
            "frame complete: {} extension + {} shadow rays, {} samples, {:.2?}",
            self.stats.total_extension_rays,
            self.stats.total_shadow_rays,
            self.samples_taken,
            self.stats.render_time
        );
        Ok(())
    }
}

/// The render core: setup surface, render entry point, stats readback.
///
/// All scene mutation happens between frames; an in-flight asynchronous
/// frame holds the state lock, so setters block until it completes. Results
/// (image, stats) refuse to read while an async frame is pending — call
/// [`wait_for_render`](Self::wait_for_render) first.
pub struct Renderer {
    state: Arc<Mutex<CoreState>>,
    job_tx: Option<mpsc::Sender<FrameJob>>,
    done_rx: mpsc::Receiver<TraceResult<()>>,
    thread: Option<JoinHandle<()>>,
    async_in_flight: bool,
}

impl Renderer {
    /// Core with the built-in BVH intersection service.
    pub fn new() -> Self {
        Self::with_intersector(Box::new(crate::bvh::BvhIntersector::new()))
    }

    /// Core with a caller-supplied intersection service.
    pub fn with_intersector(intersector: Box<dyn Intersector>) -> Self {
        let state = Arc::new(Mutex::new(CoreState {
            registry: Registry::new(),
            pool: BufferPool::new(),
            counters: AtomicCounters::new(),
            workers: WorkerPool::new(),
            settings: RenderSettings::default(),
            stats: RenderStats::default(),
            intersector,
            samples_taken: 0,
            cam_seed: RESTART_SEED,
            first_converging: false,
            probe: None,
            target: Vec::new(),
            filter: FilterState::new(),
        }));
        let (job_tx, job_rx) = mpsc::channel::<FrameJob>();
        let (done_tx, done_rx) = mpsc::channel();
        let thread_state = Arc::clone(&state);
        let thread = std::thread::Builder::new()
            .name("lumen-render".into())
            .spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    let result = thread_state
                        .lock()
                        .render_frame(&job.view, job.convergence);
                    if done_tx.send(result).is_err() {
                        break;
                    }
                }
            })
            .expect("failed to spawn render thread");
        Self {
            state,
            job_tx: Some(job_tx),
            done_rx,
            thread: Some(thread),
            async_in_flight: false,
        }
    }

    /// Size (or re-size) the render target. Idempotent; see
    /// [`BufferPool::resize`] for the reallocation policy.
    pub fn resize(&mut self, width: u32, height: u32, spp: u32) {
        let mut state = self.state.lock();
        let budget = state.settings.shadow_ray_budget;
        if state.pool.resize(width, height, spp, budget) {
            state.samples_taken = 0;
            state.filter.reset();
        }
        state.target.resize((width * height) as usize, [0.0; 4]);
    }

    pub fn set_geometry(
        &mut self,
        mesh_index: usize,
        vertices: &[Vertex],
        triangles: &[TriangleDef],
    ) -> TraceResult<()> {
        self.state
            .lock()
            .registry
            .set_geometry(mesh_index, vertices, triangles)
            .map_err(TraceError::from)
    }

    pub fn set_instance(&mut self, instance_index: usize, mesh: Option<u32>, transform: [[f32; 4]; 4]) {
        self.state.lock().registry.set_instance(instance_index, mesh, transform);
    }

    /// Rebuild the instance descriptor table; required after a batch of
    /// [`set_instance`](Self::set_instance) calls and before rendering.
    pub fn finalize_instances(&mut self) {
        self.state.lock().registry.finalize_instances();
    }

    pub fn set_materials(&mut self, materials: &[Material]) {
        self.state.lock().registry.set_materials(materials);
    }

    pub fn set_lights(
        &mut self,
        tri_lights: &[TriLight],
        point_lights: &[PointLight],
        spot_lights: &[SpotLight],
        directional_lights: &[DirectionalLight],
    ) {
        self.state
            .lock()
            .registry
            .set_lights(tri_lights, point_lights, spot_lights, directional_lights);
    }

    pub fn set_sky(&mut self, sky: Sky) {
        self.state.lock().registry.set_sky(sky);
    }

    /// Capture the instance/triangle id and hit distance at this pixel
    /// during the next frame (debug picking).
    pub fn set_probe_pos(&mut self, x: u32, y: u32) {
        self.state.lock().probe = Some((x, y));
    }

    /// Apply a named scalar override; see [`RenderSettings::apply`].
    pub fn setting(&mut self, name: &str, value: f32) {
        self.state.lock().settings.apply(name, value);
    }

    /// Render one frame.
    ///
    /// With `run_async` the frame executes on the dedicated render thread
    /// and this call returns immediately; the caller must
    /// [`wait_for_render`](Self::wait_for_render) before reading results.
    pub fn render(
        &mut self,
        view: &ViewPyramid,
        convergence: Convergence,
        run_async: bool,
    ) -> TraceResult<()> {
        if self.async_in_flight {
            return Err(TraceError::FrameInFlight);
        }
        if run_async {
            self.job_tx
                .as_ref()
                .ok_or(TraceError::WorkerLost)?
                .send(FrameJob { view: *view, convergence })
                .map_err(|_| TraceError::WorkerLost)?;
            self.async_in_flight = true;
            Ok(())
        } else {
            self.state.lock().render_frame(view, convergence)
        }
    }

    /// Block until the pending asynchronous frame completes and surface its
    /// result. A no-op when nothing is in flight.
    pub fn wait_for_render(&mut self) -> TraceResult<()> {
        if !self.async_in_flight {
            return Ok(());
        }
        let result = self.done_rx.recv().map_err(|_| TraceError::WorkerLost)?;
        self.async_in_flight = false;
        result
    }

    /// Last finalized frame, row-major RGBA.
    pub fn image(&self) -> TraceResult<Vec<[f32; 4]>> {
        if self.async_in_flight {
            return Err(TraceError::FrameInFlight);
        }
        Ok(self.state.lock().target.clone())
    }

    /// Stats for the most recent frame; diagnostics only.
    pub fn stats(&self) -> TraceResult<RenderStats> {
        if self.async_in_flight {
            return Err(TraceError::FrameInFlight);
        }
        Ok(self.state.lock().stats.clone())
    }

    /// Summed raw accumulator energy; diagnostics only.
    pub fn accumulator_energy(&self) -> TraceResult<f64> {
        if self.async_in_flight {
            return Err(TraceError::FrameInFlight);
        }
        Ok(self.state.lock().pool.accumulator.total_energy())
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // closing the channel lets the render thread drain and exit
        self.job_tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lin_alg::f32::Vec3;
    use lumen_scene::IDENTITY;

    fn emissive_wall_core(spp: u32) -> Renderer {
        let mut core = Renderer::new();
        core.resize(8, 8, spp);
        let n = [0.0, 0.0, 1.0];
        let vertices = [
            Vertex { position: [-100.0, -100.0, -3.0], normal: n },
            Vertex { position: [100.0, -100.0, -3.0], normal: n },
            Vertex { position: [0.0, 100.0, -3.0], normal: n },
        ];
        let tris = [TriangleDef { indices: [0, 1, 2], material: 0 }];
        core.set_geometry(0, &vertices, &tris).unwrap();
        core.set_instance(0, Some(0), IDENTITY);
        core.finalize_instances();
        core.set_materials(&[Material::emitter([2.0, 2.0, 2.0])]);
        let light = TriLight::new(
            vertices[0].position,
            vertices[1].position,
            vertices[2].position,
            [2.0, 2.0, 2.0],
            0,
            0,
        );
        core.set_lights(&[light], &[], &[], &[]);
        core
    }

    fn view() -> ViewPyramid {
        ViewPyramid::look_forward(Vec3::new(0.0, 0.0, 0.0), 1.0)
    }

    #[test]
    fn test_render_without_target_errors() {
        let mut core = Renderer::new();
        assert!(matches!(
            core.render(&view(), Convergence::Restart, false),
            Err(TraceError::NoTarget)
        ));
    }

    #[test]
    fn test_render_without_scene_is_noop() {
        let mut core = Renderer::new();
        core.resize(4, 4, 1);
        core.render(&view(), Convergence::Restart, false).unwrap();
        assert_eq!(core.accumulator_energy().unwrap(), 0.0);
    }

    #[test]
    fn test_sync_frame_accumulates() {
        let mut core = emissive_wall_core(1);
        core.render(&view(), Convergence::Restart, false).unwrap();
        let energy = core.accumulator_energy().unwrap();
        assert!(energy > 0.0);
        let stats = core.stats().unwrap();
        assert_eq!(stats.primary_ray_count, 64);
        assert_eq!(stats.samples_taken, 1);
    }

    #[test]
    fn test_async_frame_signals_completion() {
        let mut core = emissive_wall_core(1);
        core.render(&view(), Convergence::Restart, true).unwrap();
        // results are gated while the frame is in flight
        assert!(matches!(core.stats(), Err(TraceError::FrameInFlight)));
        core.wait_for_render().unwrap();
        assert!(core.accumulator_energy().unwrap() > 0.0);
        // waiting twice is harmless
        core.wait_for_render().unwrap();
    }

    #[test]
    fn test_restart_then_converge_semantics() {
        let mut core = emissive_wall_core(1);
        core.render(&view(), Convergence::Restart, false).unwrap();
        let one = core.accumulator_energy().unwrap();
        // restart mode keeps clearing: energy stays at one frame's worth
        core.render(&view(), Convergence::Restart, false).unwrap();
        let still_one = core.accumulator_energy().unwrap();
        assert!((one - still_one).abs() < one * 1e-3);
        // the first converging frame drops the stale partial sample, the
        // second one doubles the energy
        core.render(&view(), Convergence::Converge, false).unwrap();
        core.render(&view(), Convergence::Converge, false).unwrap();
        let two = core.accumulator_energy().unwrap();
        assert!((two - 2.0 * one).abs() < one * 1e-2);
        assert_eq!(core.stats().unwrap().samples_taken, 2);
    }

    #[test]
    fn test_probe_reports_hit() {
        let mut core = emissive_wall_core(1);
        core.set_probe_pos(4, 4);
        core.render(&view(), Convergence::Restart, false).unwrap();
        let stats = core.stats().unwrap();
        assert_eq!(stats.probed_instance, 0);
        assert_eq!(stats.probed_triangle, 0);
        assert!((stats.probed_dist - 3.0).abs() < 0.2);
        // the resolved world position lies on the wall plane
        assert!((stats.probed_world_pos[2] + 3.0).abs() < 1e-3);
    }
}
