//! Geometric intrinsics: component access, vector operations, the
//! coordinate-space transform family, and the grid-shape queries.

use super::{IntrinsicCtx, vec3_map1, vec3_to_float};
use crate::math::{Mat4, Vec3, Vec4, normal_matrix, rotation_about};
use crate::value::{ValueRef, ValueStorage, ValueType};

pub fn xcomp(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    vec3_to_float(result, &args[0], |p| p.x);
}

pub fn ycomp(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    vec3_to_float(result, &args[0], |p| p.y);
}

pub fn zcomp(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    vec3_to_float(result, &args[0], |p| p.z);
}

fn set_component(result: &ValueRef, args: &[ValueRef], component: usize) {
    {
        let mut p = args[0].borrow_mut();
        let x = args[1].borrow();
        let x = x.floats();
        for (i, out) in p.vec3s_mut().iter_mut().enumerate() {
            out[component] = x[i.min(x.len() - 1)];
        }
    }
    // Pass the modified value through so the triple-composition rewrite
    // can chain setters.
    let p = args[0].borrow();
    let mut result = result.borrow_mut();
    result.reset(p.ty(), p.storage(), p.size());
    result.raw_mut().copy_from_slice(p.raw());
}

pub fn setxcomp(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    set_component(result, args, 0);
}

pub fn setycomp(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    set_component(result, args, 1);
}

pub fn setzcomp(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    set_component(result, args, 2);
}

pub fn length(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    vec3_to_float(result, &args[0], Vec3::length);
}

pub fn normalize(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    vec3_map1(result, &args[0], Vec3::normalize_or_zero);
}

pub fn distance(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let p0 = args[0].borrow();
    let p1 = args[1].borrow();
    let storage = p0.storage().max(p1.storage());
    let size = p0.size().max(p1.size());
    let mut result = result.borrow_mut();
    result.reset(ValueType::Float, storage, size);
    let p0 = p0.vec3s();
    let p1 = p1.vec3s();
    for (i, out) in result.floats_mut().iter_mut().enumerate() {
        *out = (p1[i.min(p1.len() - 1)] - p0[i.min(p0.len() - 1)]).length();
    }
}

/// Rotate `q` about the axis through `p0` and `p1` by `angle` radians.
pub fn rotate(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let angle = args[1].borrow().float_value();
    let p0 = args[2].borrow().vec3_value();
    let p1 = args[3].borrow().vec3_value();
    let rotation = rotation_about((p1 - p0).normalize_or_zero(), angle);
    vec3_map1(result, &args[0], |q| {
        (rotation * Vec4::new(q.x, q.y, q.z, 0.0)).truncate()
    });
}

/// Differential surface area of each micropolygon, from the parametric
/// edge lengths of `P`.
pub fn area(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let width = ctx.grid.width().max(1);
    let height = ctx.grid.height().max(1);
    let p = args[0].borrow();
    let mut result = result.borrow_mut();
    result.reset(ValueType::Float, ValueStorage::Varying, width * height);
    let positions = p.vec3s();
    let values = result.floats_mut();

    for y in 0..height {
        for x in 0..width {
            let x0 = if x + 1 < width { x } else { x.saturating_sub(1) };
            let y0 = if y + 1 < height { y } else { y.saturating_sub(1) };
            let i0 = y0 * width + x0;
            let i1 = y0 * width + (x0 + 1).min(width - 1);
            let i3 = (y0 + 1).min(height - 1) * width + x0;
            values[y * width + x] = (positions[i1] - positions[i0]).length()
                * (positions[i3] - positions[i0]).length();
        }
    }
}

fn faceforward_impl(result: &ValueRef, n: &ValueRef, i: &ValueRef, nref: &ValueRef) {
    let n = n.borrow();
    let i = i.borrow();
    let nref = nref.borrow();
    let mut result = result.borrow_mut();
    result.reset(n.ty(), n.storage().max(i.storage()), n.size().max(i.size()));
    let n = n.vec3s();
    let i = i.vec3s();
    let nref = nref.vec3s();
    for (at, out) in result.vec3s_mut().iter_mut().enumerate() {
        let facing = (-i[at.min(i.len() - 1)]).dot(nref[at.min(nref.len() - 1)]);
        let sign = if facing < 0.0 { -1.0 } else { 1.0 };
        *out = sign * n[at.min(n.len() - 1)];
    }
}

/// Flip `N` so it faces against the incident direction `I`.
pub fn faceforward(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    faceforward_impl(result, &args[0], &args[1], &args[0]);
}

pub fn faceforward_nref(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    faceforward_impl(result, &args[0], &args[1], &args[2]);
}

pub fn reflect(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let i = args[0].borrow();
    let n = args[1].borrow();
    let mut result = result.borrow_mut();
    result.reset(
        ValueType::Vector,
        n.storage().max(i.storage()),
        n.size().max(i.size()),
    );
    let i = i.vec3s();
    let n = n.vec3s();
    for (at, out) in result.vec3s_mut().iter_mut().enumerate() {
        let iv = i[at.min(i.len() - 1)];
        let nv = n[at.min(n.len() - 1)];
        *out = iv - 2.0 * iv.dot(nv) * nv;
    }
}

pub fn refract(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let incident = args[0].borrow();
    let normal = args[1].borrow();
    let eta = args[2].borrow().float_value();
    let size = ctx.grid.size();
    let mut result = result.borrow_mut();
    result.reset(ValueType::Vector, ValueStorage::Varying, size);
    let incidents = incident.vec3s();
    let normals = normal.vec3s();
    for (at, out) in result.vec3s_mut().iter_mut().enumerate() {
        let i = incidents[at.min(incidents.len() - 1)];
        let n = normals[at.min(normals.len() - 1)];
        let idotn = i.dot(n);
        let k = 1.0 - eta * eta * (1.0 - idotn * idotn);
        *out = if k > 0.0 {
            eta * i - (eta * idotn + k.sqrt()) * n
        } else {
            Vec3::ZERO
        };
    }
}

/// Approximate reflected/transmitted coefficients; writes `Kr` and `Kt`
/// through its last two arguments.
pub fn fresnel(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let size = ctx.grid.size();
    let incident = args[0].borrow();
    let normal = args[1].borrow();
    let eta = args[2].borrow().float_value();
    let mut kr = args[3].borrow_mut();
    let mut kt = args[4].borrow_mut();
    kr.reset(ValueType::Float, ValueStorage::Varying, size);
    kt.reset(ValueType::Float, ValueStorage::Varying, size);

    let incidents = incident.vec3s();
    let normals = normal.vec3s();
    let krs = kr.floats_mut();
    if eta >= 1.0 {
        for (at, out) in krs.iter_mut().enumerate() {
            let i = incidents[at.min(incidents.len() - 1)];
            let n = normals[at.min(normals.len() - 1)];
            let c = i.dot(n).max(0.0);
            let g = (eta * eta + c * c - 1.0).sqrt();
            let m = g - c;
            let p = g + c;
            let a = (m / p) * (m / p);
            let b = (c * p - 1.0) / (c * m + 1.0);
            *out = 0.5 * a * (1.0 + b * b);
        }
    } else {
        krs.fill(1.0);
    }
    for (out, &reflected) in kt.floats_mut().iter_mut().zip(kr.floats().iter()) {
        *out = 1.0 - reflected;
    }

    let mut result = result.borrow_mut();
    result.reset(ValueType::Float, ValueStorage::Uniform, 1);
    result.floats_mut()[0] = 0.0;
}

/// Cross product of the parametric derivatives of `p`; winding follows
/// the geometry's handedness.
pub fn calculatenormal(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let dpdu: ValueRef = ValueRef::default();
    let dpdv: ValueRef = ValueRef::default();
    super::math_fns::du_vec3(ctx, &dpdu, &args[0..1]);
    super::math_fns::dv_vec3(ctx, &dpdv, &args[0..1]);

    let p = args[0].borrow();
    let dpdu = dpdu.borrow();
    let dpdv = dpdv.borrow();
    let mut result = result.borrow_mut();
    result.reset(p.ty(), p.storage(), p.size());
    let left_handed = ctx.renderer.attributes().geometry_left_handed;
    let dpdu = dpdu.vec3s();
    let dpdv = dpdv.vec3s();
    for (i, out) in result.vec3s_mut().iter_mut().enumerate() {
        *out = if left_handed {
            dpdu[i].cross(dpdv[i])
        } else {
            dpdv[i].cross(dpdu[i])
        };
    }
}

/// Raster-space depth of each point.
pub fn depth(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let p = args[0].borrow();
    let mut result = result.borrow_mut();
    result.reset(ValueType::Float, p.storage(), p.size());
    let positions = p.vec3s();
    for (i, out) in result.floats_mut().iter_mut().enumerate() {
        *out = ctx.renderer.raster(positions[i.min(positions.len() - 1)]).z;
    }
}

// ── Coordinate-space transforms ──────────────────────────────────────
//
// Each of transform/vtransform/ntransform has four variants: (to),
// (from, to), (matrix), and (from, matrix). Points carry w = 1,
// vectors w = 0, and normals use the inverse-transpose of the upper
// 3x3.

pub(crate) fn apply_points(result: &ValueRef, p: &ValueRef, m: Mat4, ty: ValueType) {
    let p = p.borrow();
    let mut result = result.borrow_mut();
    result.reset(ty, p.storage(), p.size());
    let p = p.vec3s();
    for (i, out) in result.vec3s_mut().iter_mut().enumerate() {
        *out = m.transform_point3(p[i.min(p.len() - 1)]);
    }
}

pub(crate) fn apply_vectors(result: &ValueRef, v: &ValueRef, m: Mat4) {
    let v = v.borrow();
    let mut result = result.borrow_mut();
    result.reset(v.ty(), v.storage(), v.size());
    let v = v.vec3s();
    for (i, out) in result.vec3s_mut().iter_mut().enumerate() {
        *out = m.transform_vector3(v[i.min(v.len() - 1)]);
    }
}

pub(crate) fn apply_normals(result: &ValueRef, n: &ValueRef, m: Mat4) {
    let nm = normal_matrix(&m);
    let n = n.borrow();
    let mut result = result.borrow_mut();
    result.reset(n.ty(), n.storage(), n.size());
    let n = n.vec3s();
    for (i, out) in result.vec3s_mut().iter_mut().enumerate() {
        *out = nm * n[i.min(n.len() - 1)];
    }
}

pub fn transform_to_space(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let m = ctx.transform_to(args[0].borrow().string_value());
    apply_points(result, &args[1], m, ValueType::Point);
}

pub fn transform_between_spaces(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let m =
        ctx.transform_between(args[0].borrow().string_value(), args[1].borrow().string_value());
    apply_points(result, &args[2], m, ValueType::Point);
}

pub fn transform_matrix(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let m = args[0].borrow().matrix_value();
    let ty = args[1].borrow().ty();
    apply_points(result, &args[1], m, ty);
}

pub fn transform_space_matrix(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let m = args[1].borrow().matrix_value()
        * ctx.transform_from(args[0].borrow().string_value());
    apply_points(result, &args[2], m, ValueType::Point);
}

pub fn vtransform_to_space(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let m = ctx.transform_to(args[0].borrow().string_value());
    apply_vectors(result, &args[1], m);
}

pub fn vtransform_between_spaces(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let m =
        ctx.transform_between(args[0].borrow().string_value(), args[1].borrow().string_value());
    apply_vectors(result, &args[2], m);
}

pub fn vtransform_matrix(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let m = args[0].borrow().matrix_value();
    apply_vectors(result, &args[1], m);
}

pub fn vtransform_space_matrix(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let m = args[1].borrow().matrix_value()
        * ctx.transform_from(args[0].borrow().string_value());
    apply_vectors(result, &args[2], m);
}

pub fn ntransform_to_space(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let m = ctx.transform_to(args[0].borrow().string_value());
    apply_normals(result, &args[1], m);
}

pub fn ntransform_between_spaces(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let m =
        ctx.transform_between(args[0].borrow().string_value(), args[1].borrow().string_value());
    apply_normals(result, &args[2], m);
}

pub fn ntransform_matrix(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let m = args[0].borrow().matrix_value();
    apply_normals(result, &args[1], m);
}

pub fn ntransform_space_matrix(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let m = args[1].borrow().matrix_value()
        * ctx.transform_from(args[0].borrow().string_value());
    apply_normals(result, &args[2], m);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;
    use crate::render::EmptyContext;
    use crate::value::Value;
    use crate::vm::intrinsics::Random;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn uniform_vec3(ty: ValueType, v: Vec3) -> ValueRef {
        Rc::new(RefCell::new(Value::uniform_vec3(ty, v)))
    }

    fn uniform_matrix(m: Mat4) -> ValueRef {
        Rc::new(RefCell::new(Value::uniform_matrix(m)))
    }

    #[test]
    fn translation_moves_points_but_not_vectors_or_normals() {
        let renderer = EmptyContext::default();
        let grid = Grid::new();
        let mut random = Random::default();
        let mut ctx = IntrinsicCtx {
            renderer: &renderer,
            grid: &grid,
            random: &mut random,
            shader_transform: crate::math::Mat4::IDENTITY,
        };
        let m = uniform_matrix(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));

        let result = ValueRef::default();
        let p = uniform_vec3(ValueType::Point, Vec3::ZERO);
        transform_matrix(&mut ctx, &result, &[Rc::clone(&m), p]);
        assert_eq!(result.borrow().vec3_value(), Vec3::new(1.0, 2.0, 3.0));

        let result = ValueRef::default();
        let v = uniform_vec3(ValueType::Vector, Vec3::ZERO);
        vtransform_matrix(&mut ctx, &result, &[Rc::clone(&m), v]);
        assert_eq!(result.borrow().vec3_value(), Vec3::ZERO);

        let result = ValueRef::default();
        let n = uniform_vec3(ValueType::Normal, Vec3::ZERO);
        ntransform_matrix(&mut ctx, &result, &[m, n]);
        assert_eq!(result.borrow().vec3_value(), Vec3::ZERO);
    }

    #[test]
    fn ntransform_under_uniform_scale_divides() {
        let renderer = EmptyContext::default();
        let grid = Grid::new();
        let mut random = Random::default();
        let mut ctx = IntrinsicCtx {
            renderer: &renderer,
            grid: &grid,
            random: &mut random,
            shader_transform: crate::math::Mat4::IDENTITY,
        };
        let m = uniform_matrix(Mat4::from_scale(Vec3::splat(2.0)));
        let n = uniform_vec3(ValueType::Normal, Vec3::new(0.0, 0.0, 1.0));
        let result = ValueRef::default();
        ntransform_matrix(&mut ctx, &result, &[m, n]);
        let out = result.borrow().vec3_value();
        assert!((out - Vec3::new(0.0, 0.0, 0.5)).length() < 1e-6);
    }

    #[test]
    fn faceforward_flips_against_the_incident_direction() {
        let renderer = EmptyContext::default();
        let grid = Grid::new();
        let mut random = Random::default();
        let mut ctx = IntrinsicCtx {
            renderer: &renderer,
            grid: &grid,
            random: &mut random,
            shader_transform: crate::math::Mat4::IDENTITY,
        };
        let n = uniform_vec3(ValueType::Normal, Vec3::new(0.0, 0.0, 1.0));
        let i = uniform_vec3(ValueType::Vector, Vec3::new(0.0, 0.0, 1.0));
        let result = ValueRef::default();
        faceforward(&mut ctx, &result, &[n, i]);
        assert_eq!(result.borrow().vec3_value(), Vec3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn reflect_mirrors_about_the_normal() {
        let renderer = EmptyContext::default();
        let grid = Grid::new();
        let mut random = Random::default();
        let mut ctx = IntrinsicCtx {
            renderer: &renderer,
            grid: &grid,
            random: &mut random,
            shader_transform: crate::math::Mat4::IDENTITY,
        };
        let i = uniform_vec3(ValueType::Vector, Vec3::new(1.0, -1.0, 0.0));
        let n = uniform_vec3(ValueType::Normal, Vec3::new(0.0, 1.0, 0.0));
        let result = ValueRef::default();
        reflect(&mut ctx, &result, &[i, n]);
        assert_eq!(result.borrow().vec3_value(), Vec3::new(1.0, 1.0, 0.0));
    }
}
