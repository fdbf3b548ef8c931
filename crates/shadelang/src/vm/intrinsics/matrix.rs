//! Matrix intrinsics. All matrix values are uniform.

use super::IntrinsicCtx;
use crate::math::{Mat4, rotation_about};
use crate::value::{ValueRef, ValueStorage, ValueType};

fn uniform_float_result(result: &ValueRef, x: f32) {
    let mut result = result.borrow_mut();
    result.reset(ValueType::Float, ValueStorage::Uniform, 1);
    result.floats_mut()[0] = x;
}

fn uniform_matrix_result(result: &ValueRef, m: Mat4) {
    let mut result = result.borrow_mut();
    result.reset(ValueType::Matrix, ValueStorage::Uniform, 1);
    result.set_matrix(0, m);
}

/// `comp(m, row, column)`.
pub fn comp(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let m = args[0].borrow().matrix_value();
    let row = (args[1].borrow().float_value() as usize).min(3);
    let column = (args[2].borrow().float_value() as usize).min(3);
    uniform_float_result(result, m.row(row)[column]);
}

/// `setcomp(m, row, column, value)` — writes the matrix in place.
pub fn setcomp(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let row = (args[1].borrow().float_value() as usize).min(3);
    let column = (args[2].borrow().float_value() as usize).min(3);
    let value = args[3].borrow().float_value();
    let mut matrix = args[0].borrow_mut();
    let mut m = matrix.matrix_value().to_cols_array_2d();
    m[column][row] = value;
    matrix.set_matrix(0, Mat4::from_cols_array_2d(&m));
    uniform_float_result(result, value);
}

pub fn determinant(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    uniform_float_result(result, args[0].borrow().matrix_value().determinant());
}

/// `translate(m, t)` — post-concatenate a translation.
pub fn translate(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let m = args[0].borrow().matrix_value();
    let t = args[1].borrow().vec3_value();
    uniform_matrix_result(result, m * Mat4::from_translation(t));
}

/// `rotate(m, angle, axis)` — post-concatenate a rotation.
pub fn rotate(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let m = args[0].borrow().matrix_value();
    let angle = args[1].borrow().float_value();
    let axis = args[2].borrow().vec3_value().normalize_or_zero();
    uniform_matrix_result(result, m * rotation_about(axis, angle));
}

/// `scale(m, s)` — post-concatenate a scale.
pub fn scale(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let m = args[0].borrow().matrix_value();
    let s = args[1].borrow().vec3_value();
    uniform_matrix_result(result, m * Mat4::from_scale(s));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;
    use crate::math::Vec3;
    use crate::render::EmptyContext;
    use crate::value::Value;
    use crate::vm::intrinsics::Random;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn translate_builds_the_expected_matrix() {
        let renderer = EmptyContext::default();
        let grid = Grid::new();
        let mut random = Random::default();
        let mut ctx = IntrinsicCtx {
            renderer: &renderer,
            grid: &grid,
            random: &mut random,
            shader_transform: crate::math::Mat4::IDENTITY,
        };
        let identity = Rc::new(RefCell::new(Value::uniform_matrix(Mat4::IDENTITY)));
        let t = Rc::new(RefCell::new(Value::uniform_vec3(
            ValueType::Vector,
            Vec3::new(1.0, 2.0, 3.0),
        )));
        let result = ValueRef::default();
        translate(&mut ctx, &result, &[identity, t]);
        let m = result.borrow().matrix_value();
        assert_eq!(m.transform_point3(Vec3::ZERO), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn comp_reads_row_major_components() {
        let renderer = EmptyContext::default();
        let grid = Grid::new();
        let mut random = Random::default();
        let mut ctx = IntrinsicCtx {
            renderer: &renderer,
            grid: &grid,
            random: &mut random,
            shader_transform: crate::math::Mat4::IDENTITY,
        };
        let m = Rc::new(RefCell::new(Value::uniform_matrix(Mat4::from_translation(
            Vec3::new(5.0, 0.0, 0.0),
        ))));
        // Row 0, column 3 of the translation holds x.
        let row = Rc::new(RefCell::new(Value::uniform_float(0.0)));
        let column = Rc::new(RefCell::new(Value::uniform_float(3.0)));
        let result = ValueRef::default();
        comp(&mut ctx, &result, &[m, row, column]);
        assert_eq!(result.borrow().float_value(), 5.0);
    }
}
