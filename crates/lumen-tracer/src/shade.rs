//! Shading stage
//!
//! The per-path kernel dispatched over every live path once per bounce. A
//! path's hit record is consumed exactly once, producing at most one
//! extension ray (compacted into the out-buffers) and at most one shadow
//! ray (appended to the shared shadow buffer, visibility resolved later).
//! Termination is implicit: a path that appends nothing vanishes, and its
//! remaining throughput is the expected cost of the bounce cap, not an
//! error.
//!
//! Direct lighting combines next-event estimation with bsdf sampling under
//! the balance heuristic; delta vertices (the camera, mirrors) cannot be
//! importance-sampled from the light side, so paths arriving via a specular
//! vertex take emitted radiance unweighted instead.

use lin_alg::f32::Vec3;
use lumen_scene::{DeviceMaterial, InstanceDesc, LightTables, Mesh, Sky};

use crate::accum::AtomicImage;
use crate::buffer::PairedWriter;
use crate::counters::AtomicCounters;
use crate::ray::{pack_flags, pack_normal, HitRecord, PathFlags, PathState, Potential, Ray};
use crate::rng::PathRng;

const PDF_EPSILON: f32 = 1e-6;

/// Read-only scene tables the kernel consumes
#[derive(Copy, Clone)]
pub struct SceneRefs<'a> {
    pub meshes: &'a [Mesh],
    pub instance_descs: &'a [InstanceDesc],
    pub materials: &'a [DeviceMaterial],
    pub lights: &'a LightTables,
    pub sky: Option<&'a Sky>,
}

/// Per-dispatch scalar parameters
#[derive(Copy, Clone)]
pub struct ShadeParams {
    pub width: u32,
    pub height: u32,
    /// Seed for this frame's random streams
    pub frame_seed: u32,
    /// 1-based bounce number of this dispatch
    pub bounce: u32,
    pub max_path_length: u32,
    /// Pixel to capture probe results for; `u32::MAX` disables
    pub probe_pixel: u32,
    /// True while the accumulator holds no samples yet (depth capture)
    pub first_sample: bool,
    /// Capture per-pixel filter features this frame
    pub capture_features: bool,
    pub geometry_epsilon: f32,
    pub clamp_value: f32,
}

/// Everything one shading dispatch reads and writes
pub struct ShadeInputs<'a> {
    pub rays: &'a [Ray],
    pub states: &'a [PathState],
    pub hits: &'a [HitRecord],
    /// Compaction target for surviving extension rays
    pub extension: PairedWriter<'a, Ray, PathState>,
    /// Append target for candidate light connections
    pub shadow: PairedWriter<'a, Ray, Potential>,
    pub accumulator: &'a AtomicImage,
    pub feature_normal: &'a AtomicImage,
    pub feature_world: &'a AtomicImage,
    pub counters: &'a AtomicCounters,
    pub scene: SceneRefs<'a>,
    pub params: ShadeParams,
}

#[inline]
fn mul3(a: Vec3, b: Vec3) -> Vec3 {
    Vec3::new(a.x * b.x, a.y * b.y, a.z * b.z)
}

#[inline]
fn vec3(a: [f32; 3]) -> Vec3 {
    Vec3::new(a[0], a[1], a[2])
}

#[inline]
fn normalize(v: Vec3) -> Vec3 {
    v * (1.0 / v.magnitude().max(1e-12))
}

#[inline]
fn reflect(d: Vec3, n: Vec3) -> Vec3 {
    d - n * (2.0 * d.dot(n))
}

/// Component-wise clamp applied to indirect contributions (firefly control)
#[inline]
fn clamp_radiance(v: Vec3, limit: f32) -> Vec3 {
    Vec3::new(v.x.min(limit), v.y.min(limit), v.z.min(limit))
}

/// Multiply a normal by the transpose of the inverse transform.
#[inline]
fn transform_normal(inv: &[[f32; 4]; 4], n: Vec3) -> Vec3 {
    Vec3::new(
        inv[0][0] * n.x + inv[1][0] * n.y + inv[2][0] * n.z,
        inv[0][1] * n.x + inv[1][1] * n.y + inv[2][1] * n.z,
        inv[0][2] * n.x + inv[1][2] * n.y + inv[2][2] * n.z,
    )
}

/// Cosine-weighted hemisphere sample around `n`; returns direction and pdf.
fn cosine_sample(n: Vec3, rng: &mut PathRng) -> (Vec3, f32) {
    let axis = if n.x.abs() > 0.9 {
        Vec3::new(0.0, 1.0, 0.0)
    } else {
        Vec3::new(1.0, 0.0, 0.0)
    };
    let t = normalize(n.cross(axis));
    let b = n.cross(t);
    let r1 = rng.next_f32();
    let r2 = rng.next_f32();
    let phi = std::f32::consts::TAU * r1;
    let r = r2.sqrt();
    let z = (1.0 - r2).max(0.0).sqrt();
    let wi = t * (r * phi.cos()) + b * (r * phi.sin()) + n * z;
    (wi, z * std::f32::consts::FRAC_1_PI)
}

struct LightSample {
    wi: Vec3,
    dist: f32,
    radiance: Vec3,
    /// Solid-angle pdf including the light-pick probability; for delta
    /// lights this is just the pick probability
    pdf: f32,
    delta: bool,
}

/// Uniformly pick one light across all classes and sample a direction
/// toward it. Returns `None` when the sample lands behind the emitter or
/// the geometric term degenerates.
fn sample_light(lights: &LightTables, pos: Vec3, rng: &mut PathRng) -> Option<LightSample> {
    let total = lights.count();
    if total == 0 {
        return None;
    }
    let pick_pdf = 1.0 / total as f32;
    let mut pick = ((rng.next_f32() * total as f32) as usize).min(total - 1);

    if pick < lights.tri_lights.len() {
        let light = &lights.tri_lights[pick];
        // uniform barycentric point on the emitter
        let su = rng.next_f32().sqrt();
        let b0 = 1.0 - su;
        let b1 = rng.next_f32() * su;
        let b2 = 1.0 - b0 - b1;
        let point = vec3(light.v0) * b0 + vec3(light.v1) * b1 + vec3(light.v2) * b2;
        let to_light = point - pos;
        let dist2 = to_light.dot(to_light);
        if dist2 < 1e-12 || light.area < 1e-12 {
            return None;
        }
        let dist = dist2.sqrt();
        let wi = to_light * (1.0 / dist);
        let nl = normalize(vec3(light.normal()));
        let cos_l = -nl.dot(wi);
        if cos_l <= PDF_EPSILON {
            return None;
        }
        let pdf = pick_pdf * dist2 / (cos_l * light.area);
        return Some(LightSample {
            wi,
            dist,
            radiance: vec3(light.radiance),
            pdf,
            delta: false,
        });
    }
    pick -= lights.tri_lights.len();

    if pick < lights.point_lights.len() {
        let light = &lights.point_lights[pick];
        let to_light = vec3(light.position) - pos;
        let dist2 = to_light.dot(to_light).max(1e-12);
        let dist = dist2.sqrt();
        return Some(LightSample {
            wi: to_light * (1.0 / dist),
            dist,
            radiance: vec3(light.intensity) * (1.0 / dist2),
            pdf: pick_pdf,
            delta: true,
        });
    }
    pick -= lights.point_lights.len();

    if pick < lights.spot_lights.len() {
        let light = &lights.spot_lights[pick];
        let to_light = vec3(light.position) - pos;
        let dist2 = to_light.dot(to_light).max(1e-12);
        let dist = dist2.sqrt();
        let wi = to_light * (1.0 / dist);
        let cone_cos = normalize(vec3(light.direction)).dot(wi * -1.0);
        let span = (light.cos_inner - light.cos_outer).max(1e-6);
        let t = ((cone_cos - light.cos_outer) / span).clamp(0.0, 1.0);
        let falloff = t * t * (3.0 - 2.0 * t);
        if falloff <= 0.0 {
            return None;
        }
        return Some(LightSample {
            wi,
            dist,
            radiance: vec3(light.intensity) * (falloff / dist2),
            pdf: pick_pdf,
            delta: true,
        });
    }
    pick -= lights.spot_lights.len();

    let light = &lights.directional_lights[pick];
    Some(LightSample {
        wi: normalize(vec3(light.direction)) * -1.0,
        dist: f32::MAX,
        radiance: vec3(light.radiance),
        pdf: pick_pdf,
        delta: true,
    })
}

/// Shade one path slot.
pub fn shade_path(inputs: &ShadeInputs<'_>, index: u32) {
    let p = &inputs.params;
    let scene = &inputs.scene;
    let ray = &inputs.rays[index as usize];
    let state = &inputs.states[index as usize];
    let hit = &inputs.hits[index as usize];

    let pixels = p.width * p.height;
    let path_index = state.path_index();
    let pixel = path_index % pixels;
    let primary = p.bounce == 1;
    // sample 0 of a pixel owns the per-pixel feature slots
    let first_of_pixel = primary && path_index < pixels;
    let throughput = state.throughput_vec();
    let dir = ray.direction_vec();

    if hit.is_miss() {
        if first_of_pixel && p.first_sample {
            inputs.accumulator.store_alpha(pixel as usize, f32::MAX);
        }
        if let Some(sky) = scene.sky {
            let mut contribution = mul3(throughput, vec3(sky.sample(dir)));
            if !primary {
                contribution = clamp_radiance(contribution, p.clamp_value);
            }
            inputs
                .accumulator
                .add(pixel as usize, [contribution.x, contribution.y, contribution.z]);
        }
        return;
    }

    if first_of_pixel && p.probe_pixel == pixel {
        inputs.counters.store_probe(hit.instance, hit.prim, hit.t);
    }

    // resolve the hit against the instance descriptor table
    let Some(desc) = scene.instance_descs.get(hit.instance as usize) else {
        return;
    };
    let Some(mesh) = scene.meshes.get(desc.mesh as usize) else {
        return;
    };
    let Some(tri) = mesh.triangles.get(hit.prim as usize) else {
        return;
    };
    let Some(material) = scene.materials.get(tri.material as usize) else {
        return;
    };

    let pos = ray.at(hit.t);
    let w = 1.0 - hit.u - hit.v;
    let n_object = vec3(tri.n0) * w + vec3(tri.n1) * hit.u + vec3(tri.n2) * hit.v;
    let ng = normalize(transform_normal(&desc.inverse_transform, vec3(tri.geometric_normal())));
    let mut n = normalize(transform_normal(&desc.inverse_transform, n_object));
    let front = ng.dot(dir) < 0.0;
    if n.dot(dir) > 0.0 {
        n = n * -1.0;
    }

    if first_of_pixel {
        if p.first_sample {
            inputs.accumulator.store_alpha(pixel as usize, hit.t);
        }
        if p.capture_features {
            inputs
                .feature_normal
                .store(pixel as usize, [n.x, n.y, n.z, hit.t]);
            inputs
                .feature_world
                .store(pixel as usize, [pos.x, pos.y, pos.z, hit.t]);
        }
    }

    // alpha-tested cutout: continue through without consuming the bounce
    if material.is_alpha_tested() {
        if p.bounce < p.max_path_length {
            let continued = Ray::new(pos + dir * p.geometry_epsilon, dir, 0.0, f32::MAX);
            if inputs.extension.append(continued, *state).is_none() {
                log::error!("extension buffer overflow on alpha pass-through");
            }
        }
        return;
    }

    if material.is_emissive() {
        let facing = front
            || material
                .flags()
                .contains(lumen_scene::MaterialFlags::EMISSIVE_TWOSIDED);
        if !facing {
            return;
        }
        let emitted = vec3(material.emissive);
        let mut contribution;
        if primary || state.flags().contains(PathFlags::SPECULAR) {
            // the previous vertex was delta-distributed: bsdf sampling was
            // the only possible strategy, take the emission unweighted
            contribution = mul3(throughput, emitted);
        } else {
            contribution = match scene.lights.emitter_lookup.get(&(hit.instance, hit.prim)) {
                Some(&li) => {
                    let light = &scene.lights.tri_lights[li as usize];
                    let cos_l = ng.dot(dir * -1.0).max(PDF_EPSILON);
                    let pick_pdf = 1.0 / scene.lights.count() as f32;
                    let pdf_light = pick_pdf * hit.t * hit.t / (cos_l * light.area.max(1e-12));
                    let pdf_bsdf = state.bsdf_pdf.max(PDF_EPSILON);
                    let weight = pdf_bsdf / (pdf_bsdf + pdf_light);
                    mul3(throughput, emitted) * weight
                }
                // emitter outside the light tables: bsdf sampling was the
                // only strategy that could have found it
                None => mul3(throughput, emitted),
            };
        }
        if !primary {
            contribution = clamp_radiance(contribution, p.clamp_value);
        }
        inputs
            .accumulator
            .add(pixel as usize, [contribution.x, contribution.y, contribution.z]);
        return;
    }

    // non-emissive opaque surface
    let albedo = vec3(material.diffuse);
    let specular_surface = material.is_specular();
    let mut rng = PathRng::for_path(p.frame_seed, path_index, p.bounce);

    // next-event estimation; skipped after a delta vertex (those paths take
    // full emission on a light hit instead) and on delta surfaces
    if !scene.lights.is_empty() && !specular_surface && !state.flags().contains(PathFlags::SPECULAR)
    {
        if let Some(sample) = sample_light(scene.lights, pos, &mut rng) {
            let cos_s = n.dot(sample.wi);
            if cos_s > PDF_EPSILON && sample.pdf > PDF_EPSILON && sample.pdf.is_finite() {
                let f = albedo * std::f32::consts::FRAC_1_PI;
                let weight = if sample.delta {
                    1.0
                } else {
                    let pdf_bsdf = cos_s * std::f32::consts::FRAC_1_PI;
                    sample.pdf / (sample.pdf + pdf_bsdf)
                };
                let mut potential =
                    mul3(mul3(throughput, f), sample.radiance) * (cos_s * weight / sample.pdf);
                if !primary {
                    potential = clamp_radiance(potential, p.clamp_value);
                }
                if potential.x.is_finite() && (potential.x + potential.y + potential.z) > 0.0 {
                    let tmax = if sample.dist == f32::MAX {
                        f32::MAX
                    } else {
                        sample.dist - 2.0 * p.geometry_epsilon
                    };
                    let shadow_ray =
                        Ray::new(pos + sample.wi * p.geometry_epsilon, sample.wi, 0.0, tmax);
                    let record = Potential {
                        rgb: [potential.x, potential.y, potential.z],
                        pixel,
                    };
                    if inputs.shadow.append(shadow_ray, record).is_none() {
                        // the proactive flush keeps this unreachable; a drop
                        // here would silently lose energy, so shout
                        log::error!("shadow buffer overflow; connection dropped");
                    }
                }
            }
        }
    }

    // extension ray
    if p.bounce >= p.max_path_length {
        return;
    }
    if specular_surface {
        let wi = reflect(dir, n);
        let mut flags = PathFlags::SPECULAR;
        if state.flags().contains(PathFlags::VIA_SPECULAR) {
            flags |= PathFlags::VIA_SPECULAR;
        }
        if state.flags().contains(PathFlags::BOUNCED) {
            flags |= PathFlags::BOUNCED;
        }
        let next = PathState {
            throughput: {
                let t = mul3(throughput, albedo);
                [t.x, t.y, t.z]
            },
            flags_path: pack_flags(path_index, flags),
            bsdf_pdf: 1.0,
            normal: pack_normal(n),
            _pad: [0; 2],
        };
        let extension = Ray::new(pos + wi * p.geometry_epsilon, wi, 0.0, f32::MAX);
        if inputs.extension.append(extension, next).is_none() {
            log::error!("extension buffer overflow");
        }
        return;
    }

    // one diffuse indirect bounce substitutes for roulette termination
    if state.flags().contains(PathFlags::BOUNCED) {
        return;
    }
    let (wi, pdf) = cosine_sample(n, &mut rng);
    if !(pdf > PDF_EPSILON) || !pdf.is_finite() {
        return;
    }
    // cosine-weighted sampling: f * cos / pdf collapses to the albedo
    let t = mul3(throughput, albedo);
    let next = PathState {
        throughput: [t.x, t.y, t.z],
        flags_path: pack_flags(path_index, PathFlags::BOUNCED),
        bsdf_pdf: pdf,
        normal: pack_normal(n),
        _pad: [0; 2],
    };
    let extension = Ray::new(pos + wi * p.geometry_epsilon, wi, 0.0, f32::MAX);
    if inputs.extension.append(extension, next).is_none() {
        log::error!("extension buffer overflow");
    }
}
