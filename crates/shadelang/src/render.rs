//! The host renderer interface.
//!
//! The shading core asks the surrounding renderer a handful of questions
//! while a shader runs: named coordinate systems, textures, the camera
//! transform, rasterization of a point for `depth()`, and the current
//! attribute flags. [`RenderContext`] is that seam; the VM borrows one for
//! the duration of a single call and never stores it.

use std::collections::HashMap;

use crate::math::{Mat4, Vec3, Vec4};
use crate::texture::Texture;

/// Attribute state shaders can observe.
#[derive(Debug, Clone)]
pub struct Attributes {
    /// Whether diced geometry winds left-handed; decides the cross
    /// product order in `calculatenormal` and normal generation.
    pub geometry_left_handed: bool,
    pub two_sided: bool,
    /// Surface color installed into `Cs` before a surface shader runs.
    pub color: Vec3,
    /// Surface opacity installed into `Os` before a surface shader runs.
    pub opacity: Vec3,
}

impl Default for Attributes {
    fn default() -> Attributes {
        Attributes {
            geometry_left_handed: true,
            two_sided: false,
            color: Vec3::ONE,
            opacity: Vec3::ONE,
        }
    }
}

/// Queries the shading core makes of the host renderer.
///
/// Every method has a neutral default so tests and tools can run shaders
/// against [`EmptyContext`] without standing up a renderer.
pub trait RenderContext {
    /// Matrix carrying points from the named space into "current" space.
    fn transform_from(&self, _name: &str) -> Mat4 {
        Mat4::IDENTITY
    }

    /// Matrix carrying points from "current" space into the named space.
    fn transform_to(&self, _name: &str) -> Mat4 {
        Mat4::IDENTITY
    }

    /// Matrix carrying points from one named space to another.
    fn transform_between(&self, from: &str, to: &str) -> Mat4 {
        self.transform_to(to) * self.transform_from(from)
    }

    /// Look up a loaded texture by name.
    fn find_texture(&self, _name: &str) -> Option<&Texture> {
        None
    }

    /// World space to camera space.
    fn camera_transform(&self) -> Mat4 {
        Mat4::IDENTITY
    }

    /// Project a camera-space point to raster space, for `depth()`.
    fn raster(&self, p: Vec3) -> Vec4 {
        p.extend(1.0)
    }

    fn attributes(&self) -> &Attributes;
}

/// A host that answers every query with the identity; the default
/// collaborator for tests and offline compilation.
#[derive(Debug, Default)]
pub struct EmptyContext {
    attributes: Attributes,
}

impl RenderContext for EmptyContext {
    fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

/// A concrete context with named coordinate systems and a texture
/// registry, enough to drive the engine without the full renderer.
#[derive(Default)]
pub struct SceneContext {
    coordinate_systems: HashMap<String, Mat4>,
    textures: HashMap<String, Texture>,
    camera: Mat4,
    pub attributes: Attributes,
}

impl SceneContext {
    pub fn new() -> SceneContext {
        SceneContext::default()
    }

    /// Register (or replace) a named coordinate system. The matrix maps
    /// the named space into "current" (camera) space.
    pub fn add_coordinate_system(&mut self, name: &str, transform: Mat4) {
        self.coordinate_systems.insert(name.to_string(), transform);
    }

    pub fn remove_coordinate_system(&mut self, name: &str) {
        self.coordinate_systems.remove(name);
    }

    pub fn add_texture(&mut self, name: &str, texture: Texture) {
        self.textures.insert(name.to_string(), texture);
    }

    pub fn set_camera_transform(&mut self, camera: Mat4) {
        self.camera = camera;
    }
}

impl RenderContext for SceneContext {
    fn transform_from(&self, name: &str) -> Mat4 {
        match self.coordinate_systems.get(name) {
            Some(m) => *m,
            None => {
                log::warn!("unknown coordinate system \"{name}\"");
                Mat4::IDENTITY
            }
        }
    }

    fn transform_to(&self, name: &str) -> Mat4 {
        self.transform_from(name).inverse()
    }

    fn find_texture(&self, name: &str) -> Option<&Texture> {
        self.textures.get(name)
    }

    fn camera_transform(&self) -> Mat4 {
        self.camera
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_between_composes_from_and_to() {
        let mut scene = SceneContext::new();
        scene.add_coordinate_system("object", Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0)));
        scene.add_coordinate_system("world", Mat4::IDENTITY);
        let m = scene.transform_between("object", "world");
        let p = m * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((p.x - 1.0).abs() < 1e-6);
    }

    #[test]
    fn unknown_space_is_identity() {
        let scene = SceneContext::new();
        assert_eq!(scene.transform_from("nowhere"), Mat4::IDENTITY);
    }
}
