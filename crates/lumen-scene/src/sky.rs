//! Sky dome
//!
//! An equirectangular radiance map sampled by world-space direction on ray
//! miss. The optional `world_to_light` transform lets callers rotate the
//! dome without re-uploading texels.

use lin_alg::f32::Vec3;

use crate::error::{SceneError, SceneResult};
use crate::transform::{transform_direction, IDENTITY};

/// Equirectangular environment map
#[derive(Clone, Debug)]
pub struct Sky {
    pixels: Vec<[f32; 3]>,
    width: u32,
    height: u32,
    world_to_light: [[f32; 4]; 4],
}

impl Sky {
    pub fn new(
        pixels: Vec<[f32; 3]>,
        width: u32,
        height: u32,
        world_to_light: Option<[[f32; 4]; 4]>,
    ) -> SceneResult<Self> {
        let expected = (width * height) as usize;
        if pixels.len() != expected {
            return Err(SceneError::SkySizeMismatch { got: pixels.len(), expected });
        }
        Ok(Self {
            pixels,
            width,
            height,
            world_to_light: world_to_light.unwrap_or(IDENTITY),
        })
    }

    /// Uniform-color sky, handy for tests and flat lighting setups.
    pub fn constant(radiance: [f32; 3]) -> Self {
        Self {
            pixels: vec![radiance],
            width: 1,
            height: 1,
            world_to_light: IDENTITY,
        }
    }

    /// Radiance arriving from `direction` (unit vector, world space).
    pub fn sample(&self, direction: Vec3) -> [f32; 3] {
        let d = transform_direction(&self.world_to_light, direction);
        let len = d.magnitude();
        if len < 1e-8 {
            return [0.0; 3];
        }
        let d = d * (1.0 / len);
        // equirectangular mapping: u from azimuth, v from polar angle
        let u = 0.5 + d.z.atan2(d.x) * std::f32::consts::FRAC_1_PI * 0.5;
        let v = (d.y.clamp(-1.0, 1.0).acos()) * std::f32::consts::FRAC_1_PI;
        let x = ((u * self.width as f32) as u32).min(self.width - 1);
        let y = ((v * self.height as f32) as u32).min(self.height - 1);
        self.pixels[(y * self.width + x) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_sky() {
        let sky = Sky::constant([0.2, 0.4, 0.8]);
        let r = sky.sample(Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(r, [0.2, 0.4, 0.8]);
    }

    #[test]
    fn test_size_mismatch() {
        assert!(Sky::new(vec![[0.0; 3]; 5], 2, 2, None).is_err());
    }

    #[test]
    fn test_vertical_lookup() {
        // top row bright, bottom row dark
        let pixels = vec![[1.0; 3], [1.0; 3], [0.0; 3], [0.0; 3]];
        let sky = Sky::new(pixels, 2, 2, None).unwrap();
        assert_eq!(sky.sample(Vec3::new(0.0, 1.0, 0.0)), [1.0; 3]);
        assert_eq!(sky.sample(Vec3::new(0.0, -1.0, 0.0)), [0.0; 3]);
    }
}
