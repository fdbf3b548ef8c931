//! Per-shape dispatch kernels.
//!
//! Every arithmetic, comparison, logical, conversion, and assignment
//! opcode funnels into one of these loops, selected by the instruction's
//! [`Dispatch`] tag. Kernels take raw slices; the value buffer only owns
//! storage. Each shape gets its own monomorphized loop so the per-element
//! work stays branch-free.

use crate::vm::instruction::Dispatch;

#[inline]
fn split(dispatch: Dispatch) -> (bool, bool, usize) {
    let comps = dispatch.components();
    match dispatch {
        Dispatch::U1U1 | Dispatch::U3U3 => (false, false, comps),
        Dispatch::U1V1 | Dispatch::U3V3 => (false, true, comps),
        Dispatch::V1U1 | Dispatch::V3U3 => (true, false, comps),
        Dispatch::V1V1 | Dispatch::V3V3 => (true, true, comps),
        _ => panic!("kernel dispatched with non-pair shape {dispatch:?}"),
    }
}

/// Element-wise binary arithmetic over a pair shape. `length` is the
/// element count of the result (1 for uniform shapes).
pub fn binary(
    dispatch: Dispatch,
    result: &mut [f32],
    lhs: &[f32],
    rhs: &[f32],
    length: usize,
    f: impl Fn(f32, f32) -> f32,
) {
    let (lv, rv, comps) = split(dispatch);
    match (lv, rv) {
        (false, false) => {
            for c in 0..comps {
                result[c] = f(lhs[c], rhs[c]);
            }
        }
        (false, true) => {
            for i in 0..length {
                for c in 0..comps {
                    result[i * comps + c] = f(lhs[c], rhs[i * comps + c]);
                }
            }
        }
        (true, false) => {
            for i in 0..length {
                for c in 0..comps {
                    result[i * comps + c] = f(lhs[i * comps + c], rhs[c]);
                }
            }
        }
        (true, true) => {
            for i in 0..length {
                for c in 0..comps {
                    result[i * comps + c] = f(lhs[i * comps + c], rhs[i * comps + c]);
                }
            }
        }
    }
}

/// Float comparison producing one integer per element.
pub fn compare(
    dispatch: Dispatch,
    result: &mut [i32],
    lhs: &[f32],
    rhs: &[f32],
    length: usize,
    f: impl Fn(f32, f32) -> bool,
) {
    let (lv, rv, comps) = split(dispatch);
    debug_assert_eq!(comps, 1);
    for i in 0..length {
        let l = lhs[if lv { i } else { 0 }];
        let r = rhs[if rv { i } else { 0 }];
        result[i] = f(l, r) as i32;
    }
}

/// Three-component equality: an element is equal when every component is.
/// `negate` flips the result for `!=`.
pub fn compare_vec3(
    dispatch: Dispatch,
    result: &mut [i32],
    lhs: &[f32],
    rhs: &[f32],
    length: usize,
    negate: bool,
) {
    let (lv, rv, comps) = split(dispatch);
    debug_assert_eq!(comps, 3);
    for i in 0..length {
        let l = if lv { &lhs[i * 3..i * 3 + 3] } else { &lhs[0..3] };
        let r = if rv { &rhs[i * 3..i * 3 + 3] } else { &rhs[0..3] };
        let equal = l[0] == r[0] && l[1] == r[1] && l[2] == r[2];
        result[i] = (equal != negate) as i32;
    }
}

/// Logical and/or over integer operands.
pub fn logical(
    dispatch: Dispatch,
    result: &mut [i32],
    lhs: &[i32],
    rhs: &[i32],
    length: usize,
    f: impl Fn(bool, bool) -> bool,
) {
    let (lv, rv, comps) = split(dispatch);
    debug_assert_eq!(comps, 1);
    for i in 0..length {
        let l = lhs[if lv { i } else { 0 }] != 0;
        let r = rhs[if rv { i } else { 0 }] != 0;
        result[i] = f(l, r) as i32;
    }
}

/// Component-wise negation.
pub fn negate(dispatch: Dispatch, result: &mut [f32], operand: &[f32], length: usize) {
    let comps = dispatch.components();
    let total = length * comps;
    for i in 0..total {
        result[i] = -operand[i];
    }
}

/// Widen a float to `comps` identical components per element
/// (float → color/point/vector/normal).
pub fn convert(comps: usize, result: &mut [f32], operand: &[f32], length: usize) {
    for i in 0..length {
        for c in 0..comps {
            result[i * comps + c] = operand[i];
        }
    }
}

/// Widen a float to the diagonal matrix `x * I` per element.
pub fn convert_matrix(result: &mut [f32], operand: &[f32], length: usize) {
    for i in 0..length {
        let m = &mut result[i * 16..i * 16 + 16];
        m.fill(0.0);
        let x = operand[i];
        m[0] = x;
        m[5] = x;
        m[10] = x;
        m[15] = x;
    }
}

/// Broadcast one uniform element across a varying buffer.
pub fn promote(comps: usize, result: &mut [f32], operand: &[f32], length: usize) {
    for i in 0..length {
        for c in 0..comps {
            result[i * comps + c] = operand[c];
        }
    }
}

/// Masked copy. Inactive elements keep their previous contents.
pub fn assign(comps: usize, result: &mut [f32], source: &[f32], mask: Option<&[u8]>, length: usize) {
    match mask {
        None => result[..length * comps].copy_from_slice(&source[..length * comps]),
        Some(mask) => {
            for i in 0..length {
                if mask[i] != 0 {
                    for c in 0..comps {
                        result[i * comps + c] = source[i * comps + c];
                    }
                }
            }
        }
    }
}

/// Masked compound assignment (`+=`, `-=`, `*=`, `/=`).
pub fn op_assign(
    comps: usize,
    result: &mut [f32],
    source: &[f32],
    mask: Option<&[u8]>,
    length: usize,
    f: impl Fn(f32, f32) -> f32,
) {
    match mask {
        None => {
            for i in 0..length * comps {
                result[i] = f(result[i], source[i]);
            }
        }
        Some(mask) => {
            for i in 0..length {
                if mask[i] != 0 {
                    for c in 0..comps {
                        let at = i * comps + c;
                        result[at] = f(result[at], source[at]);
                    }
                }
            }
        }
    }
}

/// Dot product of three-component operands, producing one float each.
pub fn dot(dispatch: Dispatch, result: &mut [f32], lhs: &[f32], rhs: &[f32], length: usize) {
    let (lv, rv, comps) = split(dispatch);
    debug_assert_eq!(comps, 3);
    for i in 0..length {
        let l = if lv { &lhs[i * 3..i * 3 + 3] } else { &lhs[0..3] };
        let r = if rv { &rhs[i * 3..i * 3 + 3] } else { &rhs[0..3] };
        result[i] = l[0] * r[0] + l[1] * r[1] + l[2] * r[2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_scalar_times_varying_vector_broadcasts() {
        let lhs = [2.0];
        let rhs = [1.0, 2.0, 3.0, 4.0];
        let mut result = [0.0; 4];
        binary(Dispatch::U1V1, &mut result, &lhs, &rhs, 4, |a, b| a * b);
        assert_eq!(result, [2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn componentwise_vec3_sum() {
        let lhs = [1.0, 2.0, 3.0, 10.0, 20.0, 30.0];
        let rhs = [0.5; 6];
        let mut result = [0.0; 6];
        binary(Dispatch::V3V3, &mut result, &lhs, &rhs, 2, |a, b| a + b);
        assert_eq!(result, [1.5, 2.5, 3.5, 10.5, 20.5, 30.5]);
    }

    #[test]
    fn masked_assign_skips_inactive_lanes() {
        let mut result = [1.0, 1.0, 1.0, 1.0];
        let source = [9.0, 9.0, 9.0, 9.0];
        assign(1, &mut result, &source, Some(&[1, 0, 0, 1]), 4);
        assert_eq!(result, [9.0, 1.0, 1.0, 9.0]);
    }

    #[test]
    fn masked_add_assign_accumulates_active_lanes_only() {
        let mut result = [0.0, 0.0];
        let source = [5.0, 5.0];
        op_assign(1, &mut result, &source, Some(&[0, 1]), 2, |a, b| a + b);
        assert_eq!(result, [0.0, 5.0]);
    }

    #[test]
    fn vec3_equality_requires_all_components() {
        let lhs = [1.0, 2.0, 3.0, 1.0, 2.0, 3.0];
        let rhs = [1.0, 2.0, 3.0, 1.0, 9.0, 3.0];
        let mut result = [0; 2];
        compare_vec3(Dispatch::V3V3, &mut result, &lhs, &rhs, 2, false);
        assert_eq!(result, [1, 0]);
    }

    #[test]
    fn promote_broadcasts_the_single_element() {
        let operand = [1.0, 2.0, 3.0];
        let mut result = [0.0; 9];
        promote(3, &mut result, &operand, 3);
        assert_eq!(result, [1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn convert_matrix_builds_a_scaled_identity() {
        let operand = [2.0];
        let mut result = [1.0; 16];
        convert_matrix(&mut result, &operand, 1);
        assert_eq!(result[0], 2.0);
        assert_eq!(result[5], 2.0);
        assert_eq!(result[1], 0.0);
    }

    #[test]
    fn dot_of_varying_vectors() {
        let lhs = [1.0, 0.0, 0.0, 0.0, 2.0, 0.0];
        let rhs = [3.0, 0.0, 0.0, 0.0, 4.0, 0.0];
        let mut result = [0.0; 2];
        dot(Dispatch::V3V3, &mut result, &lhs, &rhs, 2);
        assert_eq!(result, [3.0, 8.0]);
    }
}
