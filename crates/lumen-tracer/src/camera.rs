//! Primary-ray generation
//!
//! Fills the active ray buffer with one jittered camera ray per path slot.
//! Slot `i` serves pixel `i % (width*height)`, sample `i / (width*height)`;
//! the slot index is baked into the path state so compaction can always
//! recover the destination pixel.

use lin_alg::f32::Vec3;
use lumen_scene::ViewPyramid;
use rayon::prelude::*;

use crate::ray::{PathFlags, PathState, Ray};
use crate::rng::PathRng;

/// Generate `width*height*spp` primary rays into `rays`/`states`.
pub fn generate_primary(
    rays: &mut [Ray],
    states: &mut [PathState],
    view: &ViewPyramid,
    width: u32,
    height: u32,
    frame_seed: u32,
) {
    let pixels = (width * height) as usize;
    let right = view.p2 - view.p1;
    let down = view.p3 - view.p1;
    rays.par_iter_mut()
        .zip(states.par_iter_mut())
        .enumerate()
        .for_each(|(i, (ray, state))| {
            let mut rng = PathRng::for_path(frame_seed, i as u32, 0);
            let pixel = i % pixels;
            let x = (pixel as u32 % width) as f32;
            let y = (pixel as u32 / width) as f32;
            let u = (x + rng.next_f32()) / width as f32;
            let v = (y + rng.next_f32()) / height as f32;
            let target = view.p1 + right * u + down * v;

            let origin = if view.aperture > 0.0 {
                // thin lens: offset the origin on a disk in the image plane's
                // basis; the focal plane coincides with the image plane
                let r = view.aperture * rng.next_f32().sqrt();
                let phi = std::f32::consts::TAU * rng.next_f32();
                let right_n = right * (1.0 / right.magnitude().max(1e-12));
                let down_n = down * (1.0 / down.magnitude().max(1e-12));
                view.pos + right_n * (r * phi.cos()) + down_n * (r * phi.sin())
            } else {
                view.pos
            };

            let dir = target - origin;
            let dir = dir * (1.0 / dir.magnitude().max(1e-12));
            *ray = Ray::new(origin, dir, 0.0, f32::MAX);
            // a fresh path has crossed only the (delta) camera vertex
            *state = PathState::new(i as u32, PathFlags::VIA_SPECULAR);
        });
}

/// Direction of the unjittered center ray through a pixel, used to resolve
/// the probed hit distance to a world position.
pub fn center_ray_direction(view: &ViewPyramid, width: u32, height: u32, x: u32, y: u32) -> Vec3 {
    let right = view.p2 - view.p1;
    let down = view.p3 - view.p1;
    let u = (x as f32 + 0.5) / width as f32;
    let v = (y as f32 + 0.5) / height as f32;
    let target = view.p1 + right * u + down * v;
    let dir = target - view.pos;
    dir * (1.0 / dir.magnitude().max(1e-12))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_view() -> ViewPyramid {
        ViewPyramid::look_forward(Vec3::new(0.0, 0.0, 0.0), 1.0)
    }

    #[test]
    fn test_slot_identity_and_coverage() {
        let view = test_view();
        let (w, h, spp) = (4u32, 4u32, 2u32);
        let n = (w * h * spp) as usize;
        let mut rays = vec![Ray::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 0.0, -1.0), 0.0, 1.0); n];
        let mut states = vec![PathState::new(0, PathFlags::empty()); n];
        generate_primary(&mut rays, &mut states, &view, w, h, 7);
        for (i, state) in states.iter().enumerate() {
            assert_eq!(state.path_index(), i as u32);
            assert_eq!(state.throughput, [1.0; 3]);
        }
        // both samples of pixel 0 aim into the same pixel footprint
        let d0 = rays[0].direction_vec();
        let d1 = rays[16].direction_vec();
        assert!(d0.dot(d1) > 0.99);
    }

    #[test]
    fn test_rays_are_normalized_and_deterministic() {
        let view = test_view();
        let n = 16;
        let mut rays_a = vec![Ray::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.0, 0.0, -1.0), 0.0, 1.0); n];
        let mut rays_b = rays_a.clone();
        let mut states = vec![PathState::new(0, PathFlags::empty()); n];
        generate_primary(&mut rays_a, &mut states, &view, 4, 4, 99);
        generate_primary(&mut rays_b, &mut states, &view, 4, 4, 99);
        for (a, b) in rays_a.iter().zip(&rays_b) {
            assert_eq!(a.direction, b.direction);
            let len = a.direction_vec().magnitude();
            assert!((len - 1.0).abs() < 1e-5);
        }
    }
}
