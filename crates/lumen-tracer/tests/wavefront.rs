//! End-to-end properties of the wavefront render loop

use lin_alg::f32::Vec3;
use lumen_scene::{
    Material, Registry, Sky, TriLight, TriangleDef, Vertex, ViewPyramid, IDENTITY,
};
use lumen_tracer::{
    accum::{self, AtomicImage},
    bvh::occlusion_mask,
    BvhIntersector, Convergence, Intersector, Potential, Ray, Renderer, SceneGeometry,
    MAX_PATH_LENGTH,
};

fn quad_vertices(z: f32, half: f32) -> [Vertex; 4] {
    let n = [0.0, 0.0, 1.0];
    [
        Vertex { position: [-half, -half, z], normal: n },
        Vertex { position: [half, -half, z], normal: n },
        Vertex { position: [half, half, z], normal: n },
        Vertex { position: [-half, half, z], normal: n },
    ]
}

fn quad_triangles(material: u32) -> [TriangleDef; 2] {
    [
        TriangleDef { indices: [0, 1, 2], material },
        TriangleDef { indices: [0, 2, 3], material },
    ]
}

fn camera() -> ViewPyramid {
    ViewPyramid::look_forward(Vec3::new(0.0, 0.0, 0.0), 1.0)
}

/// One emissive quad filling the whole view.
fn emissive_panel_core(width: u32, height: u32, radiance: [f32; 3]) -> Renderer {
    let mut core = Renderer::new();
    core.resize(width, height, 1);
    let vertices = quad_vertices(-3.0, 500.0);
    core.set_geometry(0, &vertices, &quad_triangles(0)).unwrap();
    core.set_instance(0, Some(0), IDENTITY);
    core.finalize_instances();
    core.set_materials(&[Material::emitter(radiance)]);
    let lights = [
        TriLight::new(vertices[0].position, vertices[1].position, vertices[2].position, radiance, 0, 0),
        TriLight::new(vertices[0].position, vertices[2].position, vertices[3].position, radiance, 0, 1),
    ];
    core.set_lights(&lights, &[], &[], &[]);
    core
}

/// Diffuse floor seen by the camera, lit by an emissive panel above it.
/// `occluded` slips a blocker plate between the floor and the light.
fn lit_floor_core(width: u32, height: u32, spp: u32, occluded: bool) -> Renderer {
    let mut core = Renderer::new();
    core.resize(width, height, spp);

    // floor quad facing the camera
    let floor = quad_vertices(-4.0, 50.0);
    core.set_geometry(0, &floor, &quad_triangles(0)).unwrap();

    // emissive panel behind the camera, shining at the floor
    let n = [0.0, 0.0, -1.0];
    let panel = [
        Vertex { position: [-2.0, -2.0, 6.0], normal: n },
        Vertex { position: [2.0, -2.0, 6.0], normal: n },
        Vertex { position: [2.0, 2.0, 6.0], normal: n },
        Vertex { position: [-2.0, 2.0, 6.0], normal: n },
    ];
    // panel triangles wound so the geometric normal faces -z (toward floor)
    let panel_tris = [
        TriangleDef { indices: [0, 2, 1], material: 1 },
        TriangleDef { indices: [0, 3, 2], material: 1 },
    ];
    core.set_geometry(1, &panel, &panel_tris).unwrap();
    core.set_instance(0, Some(0), IDENTITY);
    let mut next = 1;
    if occluded {
        // opaque plate between floor and panel, well off the camera axis so
        // primary rays still reach the floor
        let plate = quad_vertices(2.0, 40.0);
        core.set_geometry(2, &plate, &quad_triangles(2)).unwrap();
        core.set_instance(next, Some(2), IDENTITY);
        next += 1;
    }
    core.set_instance(next, Some(1), IDENTITY);
    core.finalize_instances();
    core.set_materials(&[
        Material::diffuse([0.8, 0.8, 0.8]),
        Material::emitter([15.0, 15.0, 15.0]),
        Material::diffuse([0.0, 0.0, 0.0]),
    ]);
    let instance = next as u32;
    let lights = [
        TriLight::new(panel[0].position, panel[2].position, panel[1].position, [15.0; 3], instance, 0),
        TriLight::new(panel[0].position, panel[3].position, panel[2].position, [15.0; 3], instance, 1),
    ];
    core.set_lights(&lights, &[], &[], &[]);
    core
}

#[test]
fn restart_resets_accumulator_energy() {
    let mut core = emissive_panel_core(16, 16, [1.0; 3]);
    let view = camera();
    core.render(&view, Convergence::Restart, false).unwrap();
    let one_frame = core.accumulator_energy().unwrap();
    assert!(one_frame > 0.0);
    for _ in 0..3 {
        core.render(&view, Convergence::Converge, false).unwrap();
    }
    assert!(core.accumulator_energy().unwrap() > 2.0 * one_frame);
    // a restart throws all of it away before adding the new sample
    core.render(&view, Convergence::Restart, false).unwrap();
    let after_restart = core.accumulator_energy().unwrap();
    assert!((after_restart - one_frame).abs() < one_frame * 1e-3);
    assert_eq!(core.stats().unwrap().samples_taken, 1);
}

#[test]
fn path_counts_never_increase_across_bounces() {
    let mut core = lit_floor_core(32, 32, 1, false);
    core.set_sky(Sky::constant([0.1, 0.1, 0.1]));
    core.render(&camera(), Convergence::Restart, false).unwrap();
    let counts = core.stats().unwrap().ray_counts_per_bounce;
    assert!(!counts.is_empty());
    assert_eq!(counts[0], 32 * 32);
    for pair in counts.windows(2) {
        assert!(
            pair[1] <= pair[0],
            "path count grew across a bounce: {pair:?}"
        );
    }
}

#[test]
fn emissive_triangle_terminates_every_path() {
    // 64x64, 1 spp, an emitter directly visible to every primary ray
    let radiance = [2.5, 1.5, 0.5];
    let mut core = emissive_panel_core(64, 64, radiance);
    core.render(&camera(), Convergence::Restart, false).unwrap();
    let stats = core.stats().unwrap();
    // all paths terminated on the light: no second wave was traced
    assert_eq!(stats.ray_counts_per_bounce, vec![64 * 64]);
    assert_eq!(stats.total_extension_rays, 64 * 64);
    assert_eq!(stats.total_shadow_rays, 0);
    let image = core.image().unwrap();
    for (i, px) in image.iter().enumerate() {
        for c in 0..3 {
            assert!(
                (px[c] - radiance[c]).abs() < 1e-4,
                "pixel {i} channel {c}: {} != {}",
                px[c],
                radiance[c]
            );
        }
    }
}

#[test]
fn unoccluded_connection_adds_exact_potential() {
    // scene with one wall; two candidate connections, one aimed through the
    // wall, one into open space
    let mut registry = Registry::new();
    let wall = quad_vertices(-2.0, 10.0);
    registry.set_geometry(0, &wall, &quad_triangles(0)).unwrap();
    registry.set_instance(0, Some(0), IDENTITY);
    registry.finalize_instances();

    let mut accel = BvhIntersector::new();
    accel
        .refresh(SceneGeometry {
            meshes: registry.meshes(),
            published: registry.published(),
        })
        .unwrap();

    let origin = Vec3::new(0.0, 0.0, 0.0);
    let blocked = Ray::new(origin, Vec3::new(0.0, 0.0, -1.0), 0.0, 10.0);
    let open = Ray::new(origin, Vec3::new(0.0, 1.0, 0.0), 0.0, 10.0);
    let rays = [blocked, open];
    let potentials = [
        Potential { rgb: [5.0, 5.0, 5.0], pixel: 0 },
        Potential { rgb: [1.25, 0.5, 0.25], pixel: 1 },
    ];

    let mask = occlusion_mask(&accel, &rays).unwrap();
    let accumulator = AtomicImage::new(2);
    accum::resolve(&accumulator, mask.as_slice(), &potentials, 2);

    // occluded: adds exactly zero
    assert_eq!(accumulator.get(0)[0], 0.0);
    // unoccluded: adds exactly its precomputed contribution
    let v = accumulator.get(1);
    assert_eq!(v[0], 1.25);
    assert_eq!(v[1], 0.5);
    assert_eq!(v[2], 0.25);
}

#[test]
fn occluder_removes_direct_light() {
    let view = camera();
    let mut lit = lit_floor_core(16, 16, 1, false);
    lit.render(&view, Convergence::Restart, false).unwrap();
    let lit_image = lit.image().unwrap();

    let mut dark = lit_floor_core(16, 16, 1, true);
    dark.render(&view, Convergence::Restart, false).unwrap();
    let dark_image = dark.image().unwrap();

    let center = 8 * 16 + 8;
    assert!(lit_image[center][0] > 0.0, "floor should receive direct light");
    assert!(
        dark_image[center][0] < lit_image[center][0] * 0.05,
        "occluder failed to kill the connection: {} vs {}",
        dark_image[center][0],
        lit_image[center][0]
    );
}

#[test]
fn shadow_overflow_flush_is_transparent() {
    let view = camera();
    let mut reference = lit_floor_core(16, 16, 1, false);
    reference.render(&view, Convergence::Restart, false).unwrap();
    let reference_image = reference.image().unwrap();
    assert_eq!(reference.stats().unwrap().shadow_flushes, 0);

    // cap the shadow buffer just above one wave's worth of connections so
    // the proactive flush has to run
    let mut constrained = lit_floor_core(16, 16, 1, false);
    constrained.setting("shadowRays", 300.0);
    constrained.resize(32, 32, 1); // force a reallocation under the budget
    constrained.resize(16, 16, 1);
    constrained.render(&view, Convergence::Restart, false).unwrap();
    let stats = constrained.stats().unwrap();
    assert!(
        stats.shadow_flushes >= 1,
        "expected the overflow flush to trigger"
    );
    let constrained_image = constrained.image().unwrap();

    // flush timing must not change the image
    for (a, b) in reference_image.iter().zip(&constrained_image) {
        for c in 0..3 {
            assert!(
                (a[c] - b[c]).abs() < 1e-4,
                "flush changed the image: {} vs {}",
                a[c],
                b[c]
            );
        }
    }
    assert_eq!(
        stats.total_shadow_rays,
        reference.stats().unwrap().total_shadow_rays
    );
}

#[test]
fn bounce_cap_holds_in_mirror_tunnel() {
    // two parallel mirrors: paths would bounce forever without the cap
    let mut core = Renderer::new();
    core.resize(8, 8, 1);
    let front = quad_vertices(-2.0, 50.0);
    core.set_geometry(0, &front, &quad_triangles(0)).unwrap();
    let n = [0.0, 0.0, -1.0];
    let back = [
        Vertex { position: [-50.0, -50.0, 2.0], normal: n },
        Vertex { position: [50.0, -50.0, 2.0], normal: n },
        Vertex { position: [50.0, 50.0, 2.0], normal: n },
        Vertex { position: [-50.0, 50.0, 2.0], normal: n },
    ];
    let back_tris = [
        TriangleDef { indices: [0, 2, 1], material: 0 },
        TriangleDef { indices: [0, 3, 2], material: 0 },
    ];
    core.set_geometry(1, &back, &back_tris).unwrap();
    core.set_instance(0, Some(0), IDENTITY);
    core.set_instance(1, Some(1), IDENTITY);
    core.finalize_instances();
    core.set_materials(&[Material {
        specularity: 1.0,
        ..Material::diffuse([0.9, 0.9, 0.9])
    }]);
    core.render(&camera(), Convergence::Restart, false).unwrap();
    let stats = core.stats().unwrap();
    // every wave stays fully populated right up to the cap, then stops
    assert_eq!(stats.ray_counts_per_bounce.len(), MAX_PATH_LENGTH as usize);
    for count in &stats.ray_counts_per_bounce {
        assert_eq!(*count, 64);
    }
    // trapped paths die with throughput outstanding; that is the expected
    // cost of the cap, not an error
    assert_eq!(core.accumulator_energy().unwrap(), 0.0);
}

#[test]
fn restart_noise_is_temporally_stable() {
    let view = camera();
    // 1 spp keeps every pixel single-writer per phase, so the comparison is
    // not at the mercy of float addition order
    let mut a = lit_floor_core(16, 16, 1, false);
    a.set_sky(Sky::constant([0.3, 0.3, 0.3]));
    a.render(&view, Convergence::Restart, false).unwrap();
    a.render(&view, Convergence::Restart, false).unwrap();
    let first = a.image().unwrap();
    a.render(&view, Convergence::Restart, false).unwrap();
    let second = a.image().unwrap();
    // same seed, same noise
    for (a, b) in first.iter().zip(&second) {
        for c in 0..3 {
            assert!((a[c] - b[c]).abs() < 1e-6, "restart noise drifted");
        }
    }
}
