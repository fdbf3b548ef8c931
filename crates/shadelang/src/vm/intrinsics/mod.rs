//! The built-in function library.
//!
//! Every intrinsic shares one calling convention: a context giving it
//! the renderer, the grid being shaded, and the VM's random stream; a
//! result buffer to fill; and the argument buffers. Each intrinsic
//! stamps its own result shape, and element-wise intrinsics index
//! arguments with a clamped index so uniform arguments broadcast across
//! varying ones.

pub mod color;
pub mod geometry;
pub mod math_fns;
pub mod matrix;
pub mod shading;

use crate::grid::Grid;
use crate::math::{Mat4, Vec3};
use crate::render::RenderContext;
use crate::value::{ValueRef, ValueStorage, ValueType};

/// What an intrinsic can see while it runs.
pub struct IntrinsicCtx<'a> {
    pub renderer: &'a dyn RenderContext,
    pub grid: &'a Grid,
    pub random: &'a mut Random,
    /// Object-to-camera transform of the shader's parameter grid; it
    /// backs the "shader" coordinate system.
    pub shader_transform: Mat4,
}

impl IntrinsicCtx<'_> {
    /// Matrix carrying points from the named space into "current"
    /// (camera) space. "current" and "shader" resolve locally; other
    /// names go to the host.
    pub fn transform_from(&self, name: &str) -> Mat4 {
        match name {
            "current" | "camera" => Mat4::IDENTITY,
            "shader" => self.shader_transform,
            _ => self.renderer.transform_from(name),
        }
    }

    /// Matrix carrying points from "current" space into the named
    /// space.
    pub fn transform_to(&self, name: &str) -> Mat4 {
        match name {
            "current" | "camera" => Mat4::IDENTITY,
            "shader" => self.shader_transform.inverse(),
            _ => self.renderer.transform_to(name),
        }
    }

    pub fn transform_between(&self, from: &str, to: &str) -> Mat4 {
        self.transform_to(to) * self.transform_from(from)
    }
}

/// The shape of every registered built-in.
pub type IntrinsicFn = fn(&mut IntrinsicCtx<'_>, &ValueRef, &[ValueRef]);

/// Deterministic splitmix64 stream behind `random()`. Seeded per VM so
/// repeated runs of the same shader produce identical results.
#[derive(Debug, Clone)]
pub struct Random {
    state: u64,
}

impl Random {
    pub fn new(seed: u64) -> Random {
        Random { state: seed }
    }

    pub fn next_f32(&mut self) -> f32 {
        self.state = self.state.wrapping_add(0x9e3779b97f4a7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^= z >> 31;
        (z >> 40) as f32 / (1u64 << 24) as f32
    }
}

impl Default for Random {
    fn default() -> Random {
        Random::new(0x5eed)
    }
}

/// Combined (storage, size) of a set of arguments: varying size wins.
fn combined_shape(arguments: &[&ValueRef]) -> (ValueStorage, usize) {
    let mut storage = ValueStorage::Uniform;
    let mut size = 1;
    for argument in arguments {
        let argument = argument.borrow();
        if argument.storage() == ValueStorage::Varying {
            storage = ValueStorage::Varying;
        }
        size = size.max(argument.size());
    }
    (storage, size)
}

/// Element-wise float function of one argument.
pub(crate) fn float_map1(result: &ValueRef, a: &ValueRef, f: impl Fn(f32) -> f32) {
    let a = a.borrow();
    let mut result = result.borrow_mut();
    result.reset(ValueType::Float, a.storage(), a.size());
    let a = a.floats();
    for (i, out) in result.floats_mut().iter_mut().enumerate() {
        *out = f(a[i.min(a.len() - 1)]);
    }
}

/// Element-wise float function of two arguments, broadcasting uniforms.
pub(crate) fn float_map2(
    result: &ValueRef,
    a: &ValueRef,
    b: &ValueRef,
    f: impl Fn(f32, f32) -> f32,
) {
    let (storage, size) = combined_shape(&[a, b]);
    let a = a.borrow();
    let b = b.borrow();
    let mut result = result.borrow_mut();
    result.reset(ValueType::Float, storage, size);
    let a = a.floats();
    let b = b.floats();
    for (i, out) in result.floats_mut().iter_mut().enumerate() {
        *out = f(a[i.min(a.len() - 1)], b[i.min(b.len() - 1)]);
    }
}

/// Element-wise float function of three arguments.
pub(crate) fn float_map3(
    result: &ValueRef,
    a: &ValueRef,
    b: &ValueRef,
    c: &ValueRef,
    f: impl Fn(f32, f32, f32) -> f32,
) {
    let (storage, size) = combined_shape(&[a, b, c]);
    let a = a.borrow();
    let b = b.borrow();
    let c = c.borrow();
    let mut result = result.borrow_mut();
    result.reset(ValueType::Float, storage, size);
    let a = a.floats();
    let b = b.floats();
    let c = c.floats();
    for (i, out) in result.floats_mut().iter_mut().enumerate() {
        *out = f(
            a[i.min(a.len() - 1)],
            b[i.min(b.len() - 1)],
            c[i.min(c.len() - 1)],
        );
    }
}

/// Element-wise vector function preserving the argument's type.
pub(crate) fn vec3_map1(result: &ValueRef, a: &ValueRef, f: impl Fn(Vec3) -> Vec3) {
    let a = a.borrow();
    let mut result = result.borrow_mut();
    result.reset(a.ty(), a.storage(), a.size());
    let a = a.vec3s();
    for (i, out) in result.vec3s_mut().iter_mut().enumerate() {
        *out = f(a[i.min(a.len() - 1)]);
    }
}

/// Element-wise reduction of a vector argument to a float.
pub(crate) fn vec3_to_float(result: &ValueRef, a: &ValueRef, f: impl Fn(Vec3) -> f32) {
    let a = a.borrow();
    let mut result = result.borrow_mut();
    result.reset(ValueType::Float, a.storage(), a.size());
    let a = a.vec3s();
    for (i, out) in result.floats_mut().iter_mut().enumerate() {
        *out = f(a[i.min(a.len() - 1)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn varying_floats(values: &[f32]) -> ValueRef {
        let mut value = Value::new();
        value.reset(ValueType::Float, ValueStorage::Varying, values.len());
        value.floats_mut().copy_from_slice(values);
        Rc::new(RefCell::new(value))
    }

    #[test]
    fn uniform_arguments_broadcast_across_varying_ones() {
        let result = Rc::new(RefCell::new(Value::new()));
        let varying = varying_floats(&[1.0, 2.0, 3.0, 4.0]);
        let uniform = Rc::new(RefCell::new(Value::uniform_float(10.0)));
        float_map2(&result, &varying, &uniform, |a, b| a + b);
        let result = result.borrow();
        assert_eq!(result.storage(), ValueStorage::Varying);
        assert_eq!(result.floats(), &[11.0, 12.0, 13.0, 14.0]);
    }

    #[test]
    fn random_stream_is_deterministic_and_in_range() {
        let mut a = Random::new(7);
        let mut b = Random::new(7);
        for _ in 0..100 {
            let x = a.next_f32();
            assert_eq!(x, b.next_f32());
            assert!((0.0..1.0).contains(&x));
        }
    }
}
