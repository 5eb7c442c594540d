//! Camera view pyramid

use lin_alg::f32::Vec3;

/// Camera description for one frame: eye position plus the three image-plane
/// corners that span the view frustum. `p1` is the top-left corner,
/// `p2` top-right, `p3` bottom-left; `p2 - p1` and `p3 - p1` span the plane.
#[derive(Copy, Clone)]
pub struct ViewPyramid {
    pub pos: Vec3,
    pub p1: Vec3,
    pub p2: Vec3,
    pub p3: Vec3,
    /// Lens radius for depth of field; 0 disables it
    pub aperture: f32,
    /// Per-pixel cone spread angle, used by filtering heuristics
    pub spread_angle: f32,
}

impl ViewPyramid {
    /// Axis-aligned pinhole camera looking down -Z at a unit-height plane
    /// one unit in front of `pos`, with the given aspect ratio.
    pub fn look_forward(pos: Vec3, aspect: f32) -> Self {
        let half_w = 0.5 * aspect;
        let plane_z = pos.z - 1.0;
        Self {
            pos,
            p1: Vec3::new(pos.x - half_w, pos.y + 0.5, plane_z),
            p2: Vec3::new(pos.x + half_w, pos.y + 0.5, plane_z),
            p3: Vec3::new(pos.x - half_w, pos.y - 0.5, plane_z),
            aperture: 0.0,
            spread_angle: 0.001,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_look_forward_spans() {
        let v = ViewPyramid::look_forward(Vec3::new(0.0, 0.0, 0.0), 2.0);
        let right = v.p2 - v.p1;
        let down = v.p3 - v.p1;
        assert!((right.magnitude() - 2.0).abs() < 1e-6);
        assert!((down.magnitude() - 1.0).abs() < 1e-6);
    }
}
