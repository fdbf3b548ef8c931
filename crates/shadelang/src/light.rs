//! Light records.
//!
//! A light shader leaves one [`Light`] on its grid for every `solar` or
//! `illuminate` statement it executes (or one ambient record when it has
//! neither). Surface shaders consume the records through `illuminance`
//! and the built-in integrators (`ambient`, `diffuse`, `specular`,
//! `phong`).

use crate::math::Vec3;
use crate::value::ValueRef;

/// How a light record was created, which decides how `L` and the cone
/// test are computed for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    /// No direction; contributes only through `ambient()`.
    Ambient,
    /// `solar(axis)` — parallel light along `axis`.
    SolarAxis,
    /// `solar(axis, angle)` — parallel light restricted to a cone.
    SolarAxisAngle,
    /// `illuminate(position)` — point light.
    Illuminate,
    /// `illuminate(position, axis, angle)` — spot light.
    IlluminateAxisAngle,
}

/// The results returned from a light shader for one grid of surface
/// samples.
pub struct Light {
    kind: LightKind,
    /// Varying color written by the light shader through `Cl`.
    color: ValueRef,
    /// Varying opacity written by the light shader through `Ol`.
    opacity: ValueRef,
    position: Vec3,
    axis: Vec3,
    angle: f32,
}

impl Light {
    pub fn new(
        kind: LightKind,
        color: ValueRef,
        opacity: ValueRef,
        position: Vec3,
        axis: Vec3,
        angle: f32,
    ) -> Light {
        Light {
            kind,
            color,
            opacity,
            position,
            axis,
            angle,
        }
    }

    pub fn kind(&self) -> LightKind {
        self.kind
    }

    pub fn color(&self) -> &ValueRef {
        &self.color
    }

    pub fn opacity(&self) -> &ValueRef {
        &self.opacity
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn axis(&self) -> Vec3 {
        self.axis
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    /// Surface-to-light direction for the surface point `p`.
    ///
    /// Solar lights shine along their axis from infinitely far away, so
    /// the direction toward the light is the negated axis; point lights
    /// use the vector from the surface to the light position.
    pub fn surface_to_light(&self, p: Vec3) -> Vec3 {
        match self.kind {
            LightKind::SolarAxis | LightKind::SolarAxisAngle => -self.axis,
            _ => self.position - p,
        }
    }

    /// Cone test used by `illuminance(P, axis, angle)`: true when the
    /// light's direction at `p` is within `angle_cosine` of `axis`.
    pub fn inside_cone(&self, p: Vec3, axis: Vec3, angle_cosine: f32) -> bool {
        match self.kind {
            LightKind::Ambient => false,
            LightKind::SolarAxis | LightKind::SolarAxisAngle => {
                axis.dot((-self.axis).normalize_or_zero()) >= angle_cosine
            }
            LightKind::Illuminate | LightKind::IlluminateAxisAngle => {
                axis.dot((self.position - p).normalize_or_zero()) >= angle_cosine
            }
        }
    }
}

impl std::fmt::Debug for Light {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Light")
            .field("kind", &self.kind)
            .field("position", &self.position)
            .field("axis", &self.axis)
            .field("angle", &self.angle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Value, ValueType};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn color_buffer() -> ValueRef {
        Rc::new(RefCell::new(Value::varying(ValueType::Color, 4)))
    }

    #[test]
    fn solar_direction_is_negated_axis() {
        let light = Light::new(
            LightKind::SolarAxisAngle,
            color_buffer(),
            color_buffer(),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(0.0, 0.0, 1.0),
            0.0,
        );
        assert_eq!(light.surface_to_light(Vec3::ZERO), Vec3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn point_light_direction_points_at_the_light() {
        let light = Light::new(
            LightKind::Illuminate,
            color_buffer(),
            color_buffer(),
            Vec3::new(0.0, 4.0, 0.0),
            Vec3::ZERO,
            0.0,
        );
        assert_eq!(
            light.surface_to_light(Vec3::new(0.0, 1.0, 0.0)),
            Vec3::new(0.0, 3.0, 0.0)
        );
    }

    #[test]
    fn hemisphere_cone_accepts_everything() {
        let light = Light::new(
            LightKind::Illuminate,
            color_buffer(),
            color_buffer(),
            Vec3::new(0.0, 0.0, -1.0),
            Vec3::ZERO,
            0.0,
        );
        // cos(pi) = -1 accepts any direction.
        assert!(light.inside_cone(Vec3::ZERO, Vec3::ZERO, -1.0));
    }
}
