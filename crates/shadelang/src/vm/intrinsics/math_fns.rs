//! Scalar math intrinsics, the blend helpers, and the grid derivative
//! operators.

use super::{IntrinsicCtx, float_map1, float_map2, float_map3};
use crate::math;
use crate::value::{ValueRef, ValueStorage, ValueType};

pub fn radians(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map1(result, &args[0], f32::to_radians);
}

pub fn degrees(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map1(result, &args[0], f32::to_degrees);
}

pub fn sin(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map1(result, &args[0], f32::sin);
}

pub fn asin(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map1(result, &args[0], f32::asin);
}

pub fn cos(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map1(result, &args[0], f32::cos);
}

pub fn acos(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map1(result, &args[0], f32::acos);
}

pub fn tan(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map1(result, &args[0], f32::tan);
}

pub fn atan(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map1(result, &args[0], f32::atan);
}

pub fn atan2(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map2(result, &args[0], &args[1], f32::atan2);
}

pub fn pow(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map2(result, &args[0], &args[1], f32::powf);
}

pub fn exp(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map1(result, &args[0], f32::exp);
}

pub fn sqrt(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map1(result, &args[0], f32::sqrt);
}

pub fn inversesqrt(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map1(result, &args[0], |x| 1.0 / x.sqrt());
}

pub fn log(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map1(result, &args[0], f32::ln);
}

pub fn logb(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map2(result, &args[0], &args[1], |x, base| x.ln() / base.ln());
}

pub fn mod_(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map2(result, &args[0], &args[1], f32::rem_euclid);
}

pub fn abs(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map1(result, &args[0], f32::abs);
}

pub fn sign(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map1(result, &args[0], |x| {
        if x > 0.0 {
            1.0
        } else if x < 0.0 {
            -1.0
        } else {
            0.0
        }
    });
}

pub fn min(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map2(result, &args[0], &args[1], f32::min);
}

pub fn max(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map2(result, &args[0], &args[1], f32::max);
}

pub fn clamp(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map3(result, &args[0], &args[1], &args[2], |x, lo, hi| {
        x.clamp(lo, hi)
    });
}

pub fn mix_float(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map3(result, &args[0], &args[1], &args[2], math::lerp);
}

pub fn mix_vec3(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let x = args[0].borrow();
    let y = args[1].borrow();
    let alpha = args[2].borrow();
    let storage = x.storage().max(y.storage()).max(alpha.storage());
    let size = x.size().max(y.size()).max(alpha.size());
    let mut result = result.borrow_mut();
    result.reset(x.ty(), storage, size);
    let x = x.vec3s();
    let y = y.vec3s();
    let alpha = alpha.floats();
    for (i, out) in result.vec3s_mut().iter_mut().enumerate() {
        *out = x[i.min(x.len() - 1)].lerp(y[i.min(y.len() - 1)], alpha[i.min(alpha.len() - 1)]);
    }
}

pub fn floor(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map1(result, &args[0], f32::floor);
}

pub fn ceil(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map1(result, &args[0], f32::ceil);
}

pub fn round(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map1(result, &args[0], f32::round);
}

pub fn step(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map2(result, &args[0], &args[1], |min, value| {
        if value < min { 0.0 } else { 1.0 }
    });
}

pub fn smoothstep(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    float_map3(result, &args[0], &args[1], &args[2], math::smoothstep);
}

/// One deterministic pseudo-random float per vertex.
pub fn random(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, _: &[ValueRef]) {
    let mut result = result.borrow_mut();
    result.reset(ValueType::Float, ValueStorage::Varying, ctx.grid.size());
    for out in result.floats_mut() {
        *out = ctx.random.next_f32();
    }
}

// ── Derivatives ──────────────────────────────────────────────────────
//
// Forward differences over grid neighbors; the last column/row repeats
// the difference before it so every vertex has a value.

fn safe_delta(delta: f32) -> f32 {
    if delta != 0.0 { delta } else { 1.0 }
}

fn du_indices(width: usize, x: usize) -> (usize, usize) {
    if x + 1 < width { (x, x + 1) } else { (x - 1, x) }
}

pub fn du_float(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let width = ctx.grid.width().max(1);
    let height = ctx.grid.height().max(1);
    let du = safe_delta(ctx.grid.du);
    let p = args[0].borrow();
    let mut result = result.borrow_mut();
    result.reset(ValueType::Float, ValueStorage::Varying, width * height);
    let p = p.floats();
    let out = result.floats_mut();
    for y in 0..height {
        for x in 0..width {
            let (x0, x1) = if width > 1 { du_indices(width, x) } else { (x, x) };
            out[y * width + x] = (p[y * width + x1] - p[y * width + x0]) / du;
        }
    }
}

pub fn du_vec3(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let width = ctx.grid.width().max(1);
    let height = ctx.grid.height().max(1);
    let du = safe_delta(ctx.grid.du);
    let p = args[0].borrow();
    let mut result = result.borrow_mut();
    result.reset(p.ty(), ValueStorage::Varying, width * height);
    let p = p.vec3s();
    let out = result.vec3s_mut();
    for y in 0..height {
        for x in 0..width {
            let (x0, x1) = if width > 1 { du_indices(width, x) } else { (x, x) };
            out[y * width + x] = (p[y * width + x1] - p[y * width + x0]) / du;
        }
    }
}

pub fn dv_float(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let width = ctx.grid.width().max(1);
    let height = ctx.grid.height().max(1);
    let dv = safe_delta(ctx.grid.dv);
    let p = args[0].borrow();
    let mut result = result.borrow_mut();
    result.reset(ValueType::Float, ValueStorage::Varying, width * height);
    let p = p.floats();
    let out = result.floats_mut();
    for y in 0..height {
        let (y0, y1) = if height > 1 { du_indices(height, y) } else { (y, y) };
        for x in 0..width {
            out[y * width + x] = (p[y1 * width + x] - p[y0 * width + x]) / dv;
        }
    }
}

pub fn dv_vec3(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let width = ctx.grid.width().max(1);
    let height = ctx.grid.height().max(1);
    let dv = safe_delta(ctx.grid.dv);
    let p = args[0].borrow();
    let mut result = result.borrow_mut();
    result.reset(p.ty(), ValueStorage::Varying, width * height);
    let p = p.vec3s();
    let out = result.vec3s_mut();
    for y in 0..height {
        let (y0, y1) = if height > 1 { du_indices(height, y) } else { (y, y) };
        for x in 0..width {
            out[y * width + x] = (p[y1 * width + x] - p[y0 * width + x]) / dv;
        }
    }
}

/// `Deriv(y, x)` — the derivative of `y` with respect to `x`, summed
/// over both parametric directions.
pub fn deriv_float(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let du_y: ValueRef = ValueRef::default();
    let du_x: ValueRef = ValueRef::default();
    let dv_y: ValueRef = ValueRef::default();
    let dv_x: ValueRef = ValueRef::default();
    du_float(ctx, &du_y, &args[0..1]);
    du_float(ctx, &du_x, &args[1..2]);
    dv_float(ctx, &dv_y, &args[0..1]);
    dv_float(ctx, &dv_x, &args[1..2]);

    let ratio = |num: f32, den: f32| if den != 0.0 { num / den } else { 0.0 };
    let du_y = du_y.borrow();
    let du_x = du_x.borrow();
    let dv_y = dv_y.borrow();
    let dv_x = dv_x.borrow();
    let mut result = result.borrow_mut();
    result.reset(ValueType::Float, ValueStorage::Varying, du_y.size());
    for (i, out) in result.floats_mut().iter_mut().enumerate() {
        *out = ratio(du_y.floats()[i], du_x.floats()[i]) + ratio(dv_y.floats()[i], dv_x.floats()[i]);
    }
}

pub fn deriv_vec3(ctx: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let du_y: ValueRef = ValueRef::default();
    let du_x: ValueRef = ValueRef::default();
    let dv_y: ValueRef = ValueRef::default();
    let dv_x: ValueRef = ValueRef::default();
    du_vec3(ctx, &du_y, &args[0..1]);
    du_float(ctx, &du_x, &args[1..2]);
    dv_vec3(ctx, &dv_y, &args[0..1]);
    dv_float(ctx, &dv_x, &args[1..2]);

    let du_y = du_y.borrow();
    let du_x = du_x.borrow();
    let dv_y = dv_y.borrow();
    let dv_x = dv_x.borrow();
    let mut result = result.borrow_mut();
    result.reset(du_y.ty(), ValueStorage::Varying, du_y.size());
    for (i, out) in result.vec3s_mut().iter_mut().enumerate() {
        let u = du_x.floats()[i];
        let v = dv_x.floats()[i];
        let mut value = crate::math::Vec3::ZERO;
        if u != 0.0 {
            value += du_y.vec3s()[i] / u;
        }
        if v != 0.0 {
            value += dv_y.vec3s()[i] / v;
        }
        *out = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;
    use crate::render::EmptyContext;
    use crate::value::Value;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ctx_on<'a>(
        renderer: &'a EmptyContext,
        grid: &'a Grid,
        random: &'a mut super::super::Random,
    ) -> IntrinsicCtx<'a> {
        IntrinsicCtx {
            renderer,
            grid,
            random,
            shader_transform: crate::math::Mat4::IDENTITY,
        }
    }

    #[test]
    fn du_is_a_forward_difference_scaled_by_the_step() {
        let renderer = EmptyContext::default();
        let mut grid = Grid::new();
        grid.resize(3, 1);
        grid.du = 0.5;
        let mut random = super::super::Random::default();
        let mut ctx = ctx_on(&renderer, &grid, &mut random);

        let mut p = Value::new();
        p.reset(ValueType::Float, ValueStorage::Varying, 3);
        p.floats_mut().copy_from_slice(&[0.0, 1.0, 3.0]);
        let p = Rc::new(RefCell::new(p));
        let result = ValueRef::default();
        du_float(&mut ctx, &result, &[p]);
        // Forward differences (1, 2) / 0.5, last column repeated.
        assert_eq!(result.borrow().floats(), &[2.0, 4.0, 4.0]);
    }

    #[test]
    fn smoothstep_matches_the_scalar_helper() {
        let renderer = EmptyContext::default();
        let grid = Grid::new();
        let mut random = super::super::Random::default();
        let mut ctx = ctx_on(&renderer, &grid, &mut random);

        let lo = Rc::new(RefCell::new(Value::uniform_float(0.0)));
        let hi = Rc::new(RefCell::new(Value::uniform_float(2.0)));
        let x = Rc::new(RefCell::new(Value::uniform_float(1.0)));
        let result = ValueRef::default();
        smoothstep(&mut ctx, &result, &[lo, hi, x]);
        assert_eq!(result.borrow().float_value(), 0.5);
    }
}
