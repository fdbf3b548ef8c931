//! Math types and glam re-exports.
//!
//! We re-export the [glam](https://docs.rs/glam) types the engine uses so
//! callers don't need to depend on it directly, and keep the handful of
//! helpers shading needs beyond what glam provides.

pub use glam::{Mat3, Mat4, Vec3, Vec4};

/// Matrix that transforms surface normals under `m`.
///
/// Normals transform by the inverse transpose of the upper 3x3 of the
/// point transform, so that they stay perpendicular under non-uniform
/// scale.
pub fn normal_matrix(m: &Mat4) -> Mat3 {
    Mat3::from_mat4(*m).inverse().transpose()
}

/// Rotation matrix of `angle` radians about the (normalized) `axis`.
pub fn rotation_about(axis: Vec3, angle: f32) -> Mat4 {
    Mat4::from_axis_angle(axis, angle)
}

/// Linear blend of `a` and `b` by `t`.
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Hermite interpolation between `min` and `max`, clamped outside.
pub fn smoothstep(min: f32, max: f32, value: f32) -> f32 {
    if min >= max {
        return if value < min { 0.0 } else { 1.0 };
    }
    let t = ((value - min) / (max - min)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_matrix_undoes_scale() {
        let m = Mat4::from_scale(Vec3::splat(2.0));
        let n = normal_matrix(&m) * Vec3::new(0.0, 0.0, 1.0);
        assert!((n - Vec3::new(0.0, 0.0, 0.5)).length() < 1e-6);
    }

    #[test]
    fn normal_matrix_ignores_translation() {
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let n = normal_matrix(&m) * Vec3::new(0.0, 1.0, 0.0);
        assert!((n - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn smoothstep_clamps_and_eases() {
        assert_eq!(smoothstep(0.0, 1.0, -1.0), 0.0);
        assert_eq!(smoothstep(0.0, 1.0, 2.0), 1.0);
        assert_eq!(smoothstep(0.0, 1.0, 0.5), 0.5);
    }
}
