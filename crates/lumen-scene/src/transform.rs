//! Affine transform helpers
//!
//! Transforms are stored row-major (`m[row][col]`) with the translation in
//! the last column. All helpers assume affine matrices (bottom row
//! `0 0 0 1`); the renderer never produces projective instance transforms.

use lin_alg::f32::Vec3;

/// Row-major 4x4 identity
pub const IDENTITY: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Transform a point (applies rotation, scale and translation)
#[inline]
pub fn transform_point(m: &[[f32; 4]; 4], p: Vec3) -> Vec3 {
    Vec3::new(
        m[0][0] * p.x + m[0][1] * p.y + m[0][2] * p.z + m[0][3],
        m[1][0] * p.x + m[1][1] * p.y + m[1][2] * p.z + m[1][3],
        m[2][0] * p.x + m[2][1] * p.y + m[2][2] * p.z + m[2][3],
    )
}

/// Transform a direction (rotation and scale only, no translation)
#[inline]
pub fn transform_direction(m: &[[f32; 4]; 4], d: Vec3) -> Vec3 {
    Vec3::new(
        m[0][0] * d.x + m[0][1] * d.y + m[0][2] * d.z,
        m[1][0] * d.x + m[1][1] * d.y + m[1][2] * d.z,
        m[2][0] * d.x + m[2][1] * d.y + m[2][2] * d.z,
    )
}

/// Invert an affine transform.
///
/// Inverts the upper-left 3x3 block directly and back-solves the
/// translation. Falls back to the identity for degenerate (zero-determinant)
/// matrices; a degenerate instance transform collapses the instance to
/// nothing anyway, so this keeps downstream math finite.
pub fn affine_inverse(m: &[[f32; 4]; 4]) -> [[f32; 4]; 4] {
    let a = m[0][0];
    let b = m[0][1];
    let c = m[0][2];
    let d = m[1][0];
    let e = m[1][1];
    let f = m[1][2];
    let g = m[2][0];
    let h = m[2][1];
    let i = m[2][2];

    let co00 = e * i - f * h;
    let co01 = f * g - d * i;
    let co02 = d * h - e * g;
    let det = a * co00 + b * co01 + c * co02;
    if det.abs() < 1e-12 {
        return IDENTITY;
    }
    let inv_det = 1.0 / det;

    let r = [
        [
            co00 * inv_det,
            (c * h - b * i) * inv_det,
            (b * f - c * e) * inv_det,
        ],
        [
            co01 * inv_det,
            (a * i - c * g) * inv_det,
            (c * d - a * f) * inv_det,
        ],
        [
            co02 * inv_det,
            (b * g - a * h) * inv_det,
            (a * e - b * d) * inv_det,
        ],
    ];

    let tx = m[0][3];
    let ty = m[1][3];
    let tz = m[2][3];
    [
        [
            r[0][0],
            r[0][1],
            r[0][2],
            -(r[0][0] * tx + r[0][1] * ty + r[0][2] * tz),
        ],
        [
            r[1][0],
            r[1][1],
            r[1][2],
            -(r[1][0] * tx + r[1][1] * ty + r[1][2] * tz),
        ],
        [
            r[2][0],
            r[2][1],
            r[2][2],
            -(r[2][0] * tx + r[2][1] * ty + r[2][2] * tz),
        ],
        [0.0, 0.0, 0.0, 1.0],
    ]
}
