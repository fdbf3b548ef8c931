//! Color component access and color-space conversion.

use super::IntrinsicCtx;
use crate::math::Vec3;
use crate::value::{ValueRef, ValueType};

/// `comp(c, index)` — one channel of a color.
pub fn comp(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let index = (args[1].borrow().float_value() as usize).min(2);
    let color = args[0].borrow();
    let mut result = result.borrow_mut();
    result.reset(ValueType::Float, color.storage(), color.size());
    let colors = color.vec3s();
    for (i, out) in result.floats_mut().iter_mut().enumerate() {
        *out = colors[i.min(colors.len() - 1)][index];
    }
}

/// `setcomp(c, index, value)` — write one channel in place.
pub fn setcomp(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let index = (args[1].borrow().float_value() as usize).min(2);
    {
        let mut color = args[0].borrow_mut();
        let value = args[2].borrow();
        let values = value.floats();
        for (i, out) in color.vec3s_mut().iter_mut().enumerate() {
            out[index] = values[i.min(values.len() - 1)];
        }
    }
    let color = args[0].borrow();
    let mut result = result.borrow_mut();
    result.reset(color.ty(), color.storage(), color.size());
    result.raw_mut().copy_from_slice(color.raw());
}

fn hsv_to_rgb(c: Vec3) -> Vec3 {
    let h = c.x.rem_euclid(1.0) * 6.0;
    let (s, v) = (c.y, c.z);
    let i = h.floor();
    let f = h - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match i as i32 {
        0 => Vec3::new(v, t, p),
        1 => Vec3::new(q, v, p),
        2 => Vec3::new(p, v, t),
        3 => Vec3::new(p, q, v),
        4 => Vec3::new(t, p, v),
        _ => Vec3::new(v, p, q),
    }
}

fn hsl_to_rgb(c: Vec3) -> Vec3 {
    let (h, s, l) = (c.x, c.y, c.z);
    let v = if l <= 0.5 { l * (1.0 + s) } else { l + s - l * s };
    if v <= 0.0 {
        return Vec3::splat(l);
    }
    hsv_to_rgb(Vec3::new(h, 2.0 * (1.0 - l / v), v))
}

/// `ctransform(fromspace, c)` — convert a color from the named space to
/// RGB. Unknown spaces pass through with a warning.
pub fn ctransform(_: &mut IntrinsicCtx<'_>, result: &ValueRef, args: &[ValueRef]) {
    let space = args[0].borrow().string_value().to_string();
    let convert: fn(Vec3) -> Vec3 = match space.as_str() {
        "rgb" | "RGB" => |c| c,
        "hsv" | "HSV" => hsv_to_rgb,
        "hsl" | "HSL" => hsl_to_rgb,
        _ => {
            log::warn!("unknown color space \"{space}\"; leaving values unchanged");
            |c| c
        }
    };
    let color = args[1].borrow();
    let mut result = result.borrow_mut();
    result.reset(ValueType::Color, color.storage(), color.size());
    let colors = color.vec3s();
    for (i, out) in result.vec3s_mut().iter_mut().enumerate() {
        *out = convert(colors[i.min(colors.len() - 1)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hsv_primaries() {
        let red = hsv_to_rgb(Vec3::new(0.0, 1.0, 1.0));
        assert!((red - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-5);
        let green = hsv_to_rgb(Vec3::new(1.0 / 3.0, 1.0, 1.0));
        assert!((green - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn hsl_mid_lightness_gray() {
        let gray = hsl_to_rgb(Vec3::new(0.0, 0.0, 0.5));
        assert!((gray - Vec3::splat(0.5)).length() < 1e-5);
    }
}
