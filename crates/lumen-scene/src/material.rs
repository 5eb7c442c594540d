//! Material encoding
//!
//! Author-facing materials are converted to a compact device encoding when
//! uploaded. The device record keeps full-precision diffuse/emissive colors
//! (shading reads them every bounce) and packs the remaining scalar
//! parameters into a single byte-quantized word.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

bitflags! {
    /// Behavior bits consumed by the shading stage
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct MaterialFlags: u32 {
        /// Surface emits light; paths terminate on it
        const EMISSIVE = 1 << 0;
        /// Perfect mirror; extension rays reflect deterministically
        const SPECULAR = 1 << 1;
        /// Alpha-tested cutout; hits pass through without consuming a bounce
        const ALPHA = 1 << 2;
        /// Emits from both sides rather than the front face only
        const EMISSIVE_TWOSIDED = 1 << 3;
    }
}

/// Author-facing material description
#[derive(Clone, Debug)]
pub struct Material {
    /// Diffuse albedo
    pub diffuse: [f32; 3],
    /// Emitted radiance; any nonzero component marks the material emissive
    pub emissive: [f32; 3],
    /// 0 = pure diffuse, 1 = perfect mirror
    pub specularity: f32,
    /// Surface roughness, packed for diagnostics only
    pub roughness: f32,
    /// Metalness, packed for diagnostics only
    pub metallic: f32,
    /// Alpha-tested cutout geometry (foliage cards and the like)
    pub alpha_tested: bool,
    /// Emissive surfaces radiate from both sides
    pub two_sided: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            diffuse: [0.7, 0.7, 0.7],
            emissive: [0.0; 3],
            specularity: 0.0,
            roughness: 1.0,
            metallic: 0.0,
            alpha_tested: false,
            two_sided: false,
        }
    }
}

impl Material {
    /// Convenience constructor for a lambertian surface
    pub fn diffuse(color: [f32; 3]) -> Self {
        Self { diffuse: color, ..Self::default() }
    }

    /// Convenience constructor for an emitter
    pub fn emitter(radiance: [f32; 3]) -> Self {
        Self {
            diffuse: [0.0; 3],
            emissive: radiance,
            ..Self::default()
        }
    }
}

fn to_byte(v: f32) -> u32 {
    (v.clamp(0.0, 1.0) * 255.0) as u32
}

/// Compact device-resident material record
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct DeviceMaterial {
    pub diffuse: [f32; 3],
    /// Byte-packed (specularity, roughness, metallic, unused)
    pub parameters: u32,
    pub emissive: [f32; 3],
    /// [`MaterialFlags`] bits
    pub flags: u32,
}

impl DeviceMaterial {
    /// Convert one authoring material to the device encoding.
    pub fn from_material(m: &Material) -> Self {
        let mut flags = MaterialFlags::empty();
        if m.emissive.iter().any(|&c| c > 0.0) {
            flags |= MaterialFlags::EMISSIVE;
        }
        if m.specularity >= 0.5 {
            flags |= MaterialFlags::SPECULAR;
        }
        if m.alpha_tested {
            flags |= MaterialFlags::ALPHA;
        }
        if m.two_sided {
            flags |= MaterialFlags::EMISSIVE_TWOSIDED;
        }
        Self {
            diffuse: m.diffuse,
            parameters: to_byte(m.specularity)
                | (to_byte(m.roughness) << 8)
                | (to_byte(m.metallic) << 16),
            emissive: m.emissive,
            flags: flags.bits(),
        }
    }

    #[inline]
    pub fn flags(&self) -> MaterialFlags {
        MaterialFlags::from_bits_truncate(self.flags)
    }

    #[inline]
    pub fn is_emissive(&self) -> bool {
        self.flags().contains(MaterialFlags::EMISSIVE)
    }

    #[inline]
    pub fn is_specular(&self) -> bool {
        self.flags().contains(MaterialFlags::SPECULAR)
    }

    #[inline]
    pub fn is_alpha_tested(&self) -> bool {
        self.flags().contains(MaterialFlags::ALPHA)
    }

    /// Unpack specularity from the parameter word
    #[inline]
    pub fn specularity(&self) -> f32 {
        (self.parameters & 0xff) as f32 / 255.0
    }
}
