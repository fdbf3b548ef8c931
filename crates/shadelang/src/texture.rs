//! In-memory textures.
//!
//! Texture file decoding belongs to the host renderer; the shading core
//! only samples. A [`Texture`] is a rectangle of RGB texels (or depths,
//! for shadow maps) with the lookups the `texture`, `environment`, and
//! `shadow` opcodes need. An invalid or missing texture samples as zero.

use crate::math::{Mat4, Vec3, Vec4};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    /// 2D color map indexed by `(s, t)`.
    ColorMap,
    /// Latitude/longitude environment map indexed by direction.
    LatLongEnvironment,
    /// Depth map with an associated world-to-light transform.
    Shadow,
}

/// An immutable, sampleable texture.
pub struct Texture {
    kind: TextureKind,
    width: usize,
    height: usize,
    /// RGB texels for maps, depths (x component) for shadow maps.
    texels: Vec<Vec3>,
    /// World space to shadow camera clip space, for shadow maps.
    world_to_light: Mat4,
}

impl Texture {
    /// A color or environment map from row-major RGB texels.
    pub fn new(kind: TextureKind, width: usize, height: usize, texels: Vec<Vec3>) -> Texture {
        assert_eq!(texels.len(), width * height, "texel count mismatch");
        Texture {
            kind,
            width,
            height,
            texels,
            world_to_light: Mat4::IDENTITY,
        }
    }

    /// A shadow map from row-major depths and the transform that carries
    /// world-space points into the light's clip space.
    pub fn shadow_map(
        width: usize,
        height: usize,
        depths: Vec<f32>,
        world_to_light: Mat4,
    ) -> Texture {
        assert_eq!(depths.len(), width * height, "texel count mismatch");
        Texture {
            kind: TextureKind::Shadow,
            width,
            height,
            texels: depths.into_iter().map(|d| Vec3::new(d, 0.0, 0.0)).collect(),
            world_to_light,
        }
    }

    /// A 1x1 texture of a single color; handy in tests.
    pub fn solid(color: Vec3) -> Texture {
        Texture::new(TextureKind::ColorMap, 1, 1, vec![color])
    }

    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    pub fn valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    fn texel(&self, x: usize, y: usize) -> Vec3 {
        self.texels[y.min(self.height - 1) * self.width + x.min(self.width - 1)]
    }

    /// Bilinear lookup at `(s, t)` in [0, 1], wrapping outside.
    pub fn color(&self, s: f32, t: f32) -> Vec3 {
        let x = (s - s.floor()) * self.width as f32 - 0.5;
        let y = (t - t.floor()) * self.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let x0 = x0.rem_euclid(self.width as f32) as usize;
        let y0 = y0.rem_euclid(self.height as f32) as usize;
        let x1 = (x0 + 1) % self.width;
        let y1 = (y0 + 1) % self.height;

        let top = self.texel(x0, y0).lerp(self.texel(x1, y0), fx);
        let bottom = self.texel(x0, y1).lerp(self.texel(x1, y1), fx);
        top.lerp(bottom, fy)
    }

    /// Environment lookup for the (normalized) direction `d`, mapping it
    /// onto latitude/longitude coordinates.
    pub fn environment(&self, d: Vec3) -> Vec3 {
        let s = 0.5 + d.z.atan2(d.x) * std::f32::consts::FRAC_1_PI * 0.5;
        let t = 0.5 - d.y.clamp(-1.0, 1.0).asin() * std::f32::consts::FRAC_1_PI;
        self.color(s, t)
    }

    /// Fraction of light blocked at the world-space point `p`.
    ///
    /// `p` is carried into the light's clip space; the point is shadowed
    /// when its depth exceeds the stored depth plus `bias`.
    pub fn shadow(&self, p: Vec4, bias: f32) -> f32 {
        let clip = self.world_to_light * p;
        if clip.w == 0.0 {
            return 0.0;
        }
        let s = clip.x / clip.w * 0.5 + 0.5;
        let t = clip.y / clip.w * 0.5 + 0.5;
        if !(0.0..=1.0).contains(&s) || !(0.0..=1.0).contains(&t) {
            return 0.0;
        }
        let x = (s * (self.width - 1) as f32).round() as usize;
        let y = (t * (self.height - 1) as f32).round() as usize;
        let stored = self.texel(x, y).x;
        let depth = clip.z / clip.w;
        if depth > stored + bias { 1.0 } else { 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_texture_samples_everywhere() {
        let texture = Texture::solid(Vec3::new(0.25, 0.5, 0.75));
        assert_eq!(texture.color(0.1, 0.9), Vec3::new(0.25, 0.5, 0.75));
        assert_eq!(texture.color(-3.0, 42.0), Vec3::new(0.25, 0.5, 0.75));
    }

    #[test]
    fn bilinear_blends_neighboring_texels() {
        let texture = Texture::new(
            TextureKind::ColorMap,
            2,
            1,
            vec![Vec3::ZERO, Vec3::ONE],
        );
        let mid = texture.color(0.5, 0.5);
        assert!((mid.x - 0.5).abs() < 1e-5);
    }

    #[test]
    fn shadow_compares_against_stored_depth() {
        let texture = Texture::shadow_map(1, 1, vec![0.5], Mat4::IDENTITY);
        assert_eq!(texture.shadow(Vec4::new(0.0, 0.0, 0.9, 1.0), 0.01), 1.0);
        assert_eq!(texture.shadow(Vec4::new(0.0, 0.0, 0.4, 1.0), 0.01), 0.0);
    }
}
