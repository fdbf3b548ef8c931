//! The lighting integrators: built-ins that walk the grid's light list
//! directly and apply fixed BRDF formulas.

use super::IntrinsicCtx;
use crate::light::LightKind;
use crate::math::Vec3;
use crate::value::{ValueRef, ValueStorage, ValueType};

fn varying_color(ctx: &IntrinsicCtx<'_>, result: &ValueRef) {
    let mut result = result.borrow_mut();
    result.reset(ValueType::Color, ValueStorage::Varying, ctx.grid.size());
    result.zero();
}

/// Sum of every ambient light's color.
pub fn ambient(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, _: &[ValueRef]) {
    varying_color(ctx, result);
    let mut result = result.borrow_mut();
    for light in ctx.grid.lights() {
        if light.kind() != LightKind::Ambient {
            continue;
        }
        let color = light.color().borrow();
        let light_colors = color.vec3s();
        for (i, out) in result.vec3s_mut().iter_mut().enumerate() {
            *out += light_colors[i.min(light_colors.len() - 1)];
        }
    }
}

/// Accumulate a contribution from every non-ambient light.
///
/// `shade` is called with the vertex index, the surface-to-light
/// direction, and the light's color there, for vertices the light
/// reaches.
fn integrate_lights(
    ctx: &IntrinsicCtx<'_>,
    result: &ValueRef,
    mut shade: impl FnMut(usize, Vec3, Vec3) -> Vec3,
) {
    let Some(p) = ctx.grid.find_value("P") else {
        return;
    };
    let p = p.borrow();
    let positions = p.vec3s();
    let mut result = result.borrow_mut();

    for light in ctx.grid.lights() {
        if light.kind() == LightKind::Ambient {
            continue;
        }
        let color = light.color().borrow();
        let light_colors = color.vec3s();
        let angle_cosine = light.angle().cos();
        let restricted = matches!(
            light.kind(),
            LightKind::SolarAxisAngle | LightKind::IlluminateAxisAngle
        ) && light.angle() != 0.0;

        for (i, out) in result.vec3s_mut().iter_mut().enumerate() {
            let position = positions[i.min(positions.len() - 1)];
            let l = light.surface_to_light(position);
            if restricted {
                let inside = match light.kind() {
                    // A solar cone restricts by the light's axis.
                    LightKind::SolarAxisAngle => {
                        light.axis().dot(-l.normalize_or_zero()) >= angle_cosine
                    }
                    _ => light.axis().dot(-l.normalize_or_zero()) >= angle_cosine,
                };
                if !inside {
                    continue;
                }
            }
            let cl = light_colors[i.min(light_colors.len() - 1)];
            *out += shade(i, l, cl);
        }
    }
}

/// Lambert integrator: `sum Cl * (N . L)` over front-facing lights.
pub fn diffuse(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    varying_color(ctx, result);
    let normal = args[0].borrow();
    let normals = normal.vec3s();
    integrate_lights(ctx, result, |i, l, cl| {
        let n = normals[i.min(normals.len() - 1)];
        let ln = l.normalize_or_zero();
        if n.dot(ln) >= 0.0 {
            cl * n.dot(ln)
        } else {
            Vec3::ZERO
        }
    });
}

/// Blinn-style specular integrator over the half vector.
pub fn specular(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    varying_color(ctx, result);
    let normal = args[0].borrow();
    let view = args[1].borrow();
    let roughness = args[2].borrow().float_value().max(1e-6);
    let normals = normal.vec3s();
    let views = view.vec3s();
    integrate_lights(ctx, result, |i, l, cl| {
        let n = normals[i.min(normals.len() - 1)];
        let ln = l.normalize_or_zero();
        if n.dot(ln) < 0.0 {
            return Vec3::ZERO;
        }
        let v = views[i.min(views.len() - 1)];
        let h = (ln + v).normalize_or_zero();
        cl * n.dot(h).max(0.0).powf(1.0 / roughness)
    });
}

/// The specular term alone for one explicit light direction.
pub fn specularbrdf(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let l = args[0].borrow();
    let normal = args[1].borrow();
    let view = args[2].borrow();
    let roughness = args[3].borrow().float_value().max(1e-6);
    let size = l.size();
    let mut result = result.borrow_mut();
    result.reset(ValueType::Color, ValueStorage::Varying, size);
    let lights = l.vec3s();
    let normals = normal.vec3s();
    let views = view.vec3s();
    for (i, out) in result.vec3s_mut().iter_mut().enumerate() {
        let h = (lights[i.min(lights.len() - 1)] + views[i.min(views.len() - 1)])
            .normalize_or_zero();
        let alpha = normals[i.min(normals.len() - 1)]
            .dot(h)
            .max(0.0)
            .powf(1.0 / roughness);
        *out = Vec3::splat(alpha);
    }
}

/// Phong integrator: reflection-vector highlights with a power falloff.
pub fn phong(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    varying_color(ctx, result);
    let normal = args[0].borrow();
    let view = args[1].borrow();
    let power = args[2].borrow().float_value();
    let normals = normal.vec3s();
    let views = view.vec3s();
    integrate_lights(ctx, result, |i, l, cl| {
        let n = normals[i.min(normals.len() - 1)].normalize_or_zero();
        let ln = l.normalize_or_zero();
        if n.dot(ln) < 0.0 {
            return Vec3::ZERO;
        }
        let v = views[i.min(views.len() - 1)];
        let r = -v - 2.0 * (-v).dot(n) * n;
        cl * r.dot(ln).max(0.0).powf(power)
    });
}

/// Ray tracing is out of scope; trace returns black.
pub fn trace(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, _: &[ValueRef]) {
    varying_color(ctx, result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;
    use crate::light::Light;
    use crate::render::EmptyContext;
    use crate::value::Value;
    use crate::vm::intrinsics::Random;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn lit_grid() -> Grid {
        let mut grid = Grid::new();
        grid.resize(2, 2);
        let p = grid.add_value("P", ValueType::Point);
        p.borrow_mut().zero();

        // A solar light shining down -z with unit white color.
        let mut color = Value::new();
        color.reset(ValueType::Color, ValueStorage::Varying, 4);
        for c in color.vec3s_mut() {
            *c = Vec3::ONE;
        }
        let color = Rc::new(RefCell::new(color));
        let opacity = Rc::new(RefCell::new(Value::varying(ValueType::Color, 4)));
        grid.add_light(Rc::new(Light::new(
            LightKind::SolarAxisAngle,
            color,
            opacity,
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(0.0, 0.0, 1.0),
            0.0,
        )));
        grid
    }

    #[test]
    fn diffuse_is_n_dot_l() {
        let renderer = EmptyContext::default();
        let grid = lit_grid();
        let mut random = Random::default();
        let mut ctx = IntrinsicCtx {
            renderer: &renderer,
            grid: &grid,
            random: &mut random,
            shader_transform: crate::math::Mat4::IDENTITY,
        };
        // Normals facing the light head-on.
        let mut n = Value::new();
        n.reset(ValueType::Normal, ValueStorage::Varying, 4);
        for v in n.vec3s_mut() {
            *v = Vec3::new(0.0, 0.0, -1.0);
        }
        let n = Rc::new(RefCell::new(n));
        let result = ValueRef::default();
        diffuse(&mut ctx, &result, &[n]);
        for c in result.borrow().vec3s() {
            assert!((c.x - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn diffuse_ignores_back_facing_lights() {
        let renderer = EmptyContext::default();
        let grid = lit_grid();
        let mut random = Random::default();
        let mut ctx = IntrinsicCtx {
            renderer: &renderer,
            grid: &grid,
            random: &mut random,
            shader_transform: crate::math::Mat4::IDENTITY,
        };
        let mut n = Value::new();
        n.reset(ValueType::Normal, ValueStorage::Varying, 4);
        for v in n.vec3s_mut() {
            *v = Vec3::new(0.0, 0.0, 1.0);
        }
        let n = Rc::new(RefCell::new(n));
        let result = ValueRef::default();
        diffuse(&mut ctx, &result, &[n]);
        for c in result.borrow().vec3s() {
            assert_eq!(*c, Vec3::ZERO);
        }
    }

    #[test]
    fn ambient_sums_only_ambient_lights() {
        let renderer = EmptyContext::default();
        let mut grid = lit_grid();
        let mut color = Value::new();
        color.reset(ValueType::Color, ValueStorage::Varying, 4);
        for c in color.vec3s_mut() {
            *c = Vec3::new(0.25, 0.25, 0.25);
        }
        grid.add_light(Rc::new(Light::new(
            LightKind::Ambient,
            Rc::new(RefCell::new(color)),
            Rc::new(RefCell::new(Value::varying(ValueType::Color, 4))),
            Vec3::ZERO,
            Vec3::ZERO,
            0.0,
        )));
        let mut random = Random::default();
        let mut ctx = IntrinsicCtx {
            renderer: &renderer,
            grid: &grid,
            random: &mut random,
            shader_transform: crate::math::Mat4::IDENTITY,
        };
        let result = ValueRef::default();
        ambient(&mut ctx, &result, &[]);
        for c in result.borrow().vec3s() {
            assert!((c.x - 0.25).abs() < 1e-6);
        }
    }
}
