//! Cornell-box demo
//!
//! Builds the classic box scene through the public setup surface, converges
//! a handful of frames and writes the result to `cornell.png`.
//!
//! Run with `cargo run --release --example cornell`.

use lin_alg::f32::Vec3;
use lumen_scene::{Material, TriLight, TriangleDef, Vertex, ViewPyramid, IDENTITY};
use lumen_tracer::{Convergence, Renderer};

const WIDTH: u32 = 256;
const HEIGHT: u32 = 256;
const SPP: u32 = 2;
const FRAMES: u32 = 8;

struct SceneBuilder {
    vertices: Vec<Vertex>,
    triangles: Vec<TriangleDef>,
}

impl SceneBuilder {
    fn new() -> Self {
        Self { vertices: Vec::new(), triangles: Vec::new() }
    }

    /// Add a quad; winding determines the geometric normal (a, b, c, d
    /// counter-clockwise as seen from the front side).
    fn quad(&mut self, corners: [[f32; 3]; 4], normal: [f32; 3], material: u32) -> (u32, u32) {
        let base = self.vertices.len() as u32;
        for position in corners {
            self.vertices.push(Vertex { position, normal });
        }
        let first = self.triangles.len() as u32;
        self.triangles.push(TriangleDef { indices: [base, base + 1, base + 2], material });
        self.triangles.push(TriangleDef { indices: [base, base + 2, base + 3], material });
        (first, first + 1)
    }

    /// Axis-aligned block spanning `min`..`max`.
    fn block(&mut self, min: [f32; 3], max: [f32; 3], material: u32) {
        let [x0, y0, z0] = min;
        let [x1, y1, z1] = max;
        // one quad per face, normals outward
        self.quad([[x0, y0, z1], [x1, y0, z1], [x1, y1, z1], [x0, y1, z1]], [0.0, 0.0, 1.0], material);
        self.quad([[x1, y0, z0], [x0, y0, z0], [x0, y1, z0], [x1, y1, z0]], [0.0, 0.0, -1.0], material);
        self.quad([[x0, y0, z0], [x0, y0, z1], [x0, y1, z1], [x0, y1, z0]], [-1.0, 0.0, 0.0], material);
        self.quad([[x1, y0, z1], [x1, y0, z0], [x1, y1, z0], [x1, y1, z1]], [1.0, 0.0, 0.0], material);
        self.quad([[x0, y1, z1], [x1, y1, z1], [x1, y1, z0], [x0, y1, z0]], [0.0, 1.0, 0.0], material);
        self.quad([[x0, y0, z0], [x1, y0, z0], [x1, y0, z1], [x0, y0, z1]], [0.0, -1.0, 0.0], material);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    const WHITE: u32 = 0;
    const RED: u32 = 1;
    const GREEN: u32 = 2;
    const LAMP: u32 = 3;

    let mut scene = SceneBuilder::new();
    // room interior, normals pointing inward
    scene.quad([[-1.0, 0.0, 1.0], [1.0, 0.0, 1.0], [1.0, 0.0, -1.0], [-1.0, 0.0, -1.0]], [0.0, 1.0, 0.0], WHITE);
    scene.quad([[-1.0, 2.0, -1.0], [1.0, 2.0, -1.0], [1.0, 2.0, 1.0], [-1.0, 2.0, 1.0]], [0.0, -1.0, 0.0], WHITE);
    scene.quad([[-1.0, 0.0, -1.0], [1.0, 0.0, -1.0], [1.0, 2.0, -1.0], [-1.0, 2.0, -1.0]], [0.0, 0.0, 1.0], WHITE);
    scene.quad([[-1.0, 0.0, 1.0], [-1.0, 0.0, -1.0], [-1.0, 2.0, -1.0], [-1.0, 2.0, 1.0]], [1.0, 0.0, 0.0], RED);
    scene.quad([[1.0, 0.0, -1.0], [1.0, 0.0, 1.0], [1.0, 2.0, 1.0], [1.0, 2.0, -1.0]], [-1.0, 0.0, 0.0], GREEN);
    // blocker
    scene.block([-0.6, 0.0, -0.5], [-0.05, 1.2, 0.05], WHITE);
    // ceiling lamp, wound so the geometric normal points down into the room
    let (light_a, light_b) = scene.quad(
        [[-0.3, 1.99, -0.3], [0.3, 1.99, -0.3], [0.3, 1.99, 0.3], [-0.3, 1.99, 0.3]],
        [0.0, -1.0, 0.0],
        LAMP,
    );

    let lamp_radiance = [16.0, 15.0, 13.0];
    let mut core = Renderer::new();
    core.resize(WIDTH, HEIGHT, SPP);
    core.set_geometry(0, &scene.vertices, &scene.triangles)?;
    core.set_instance(0, Some(0), IDENTITY);
    core.finalize_instances();
    core.set_materials(&[
        Material::diffuse([0.73, 0.73, 0.73]),
        Material::diffuse([0.63, 0.06, 0.05]),
        Material::diffuse([0.14, 0.45, 0.09]),
        Material::emitter(lamp_radiance),
    ]);

    let lamp_tri = |i: u32| {
        let tri = &scene.triangles[i as usize];
        let v = |k: usize| scene.vertices[tri.indices[k] as usize].position;
        TriLight::new(v(0), v(1), v(2), lamp_radiance, 0, i)
    };
    core.set_lights(&[lamp_tri(light_a), lamp_tri(light_b)], &[], &[], &[]);

    let view = ViewPyramid {
        pos: Vec3::new(0.0, 1.0, 3.2),
        p1: Vec3::new(-1.0, 2.0, 2.2),
        p2: Vec3::new(1.0, 2.0, 2.2),
        p3: Vec3::new(-1.0, 0.0, 2.2),
        aperture: 0.0,
        spread_angle: 0.003,
    };

    core.render(&view, Convergence::Restart, false)?;
    for _ in 1..FRAMES {
        // keep accumulating into the same image
        core.render(&view, Convergence::Converge, true)?;
        core.wait_for_render()?;
    }
    let stats = core.stats()?;
    println!(
        "{} samples/pixel, {} total rays, last frame {:.1?}",
        stats.samples_taken, stats.total_rays, stats.render_time
    );

    let image = core.image()?;
    let mut bytes = Vec::with_capacity(image.len() * 4);
    for px in &image {
        for c in 0..3 {
            // gamma 2.2
            let v = px[c].max(0.0).powf(1.0 / 2.2).min(1.0);
            bytes.push((v * 255.0 + 0.5) as u8);
        }
        bytes.push(255);
    }
    image::save_buffer("cornell.png", &bytes, WIDTH, HEIGHT, image::ColorType::Rgba8)?;
    println!("wrote cornell.png");
    Ok(())
}
