//! Grids of micropolygon vertices.
//!
//! A [`Grid`] is the unit of work a shader runs over: a `width x height`
//! rectangle of surface samples plus a map from identifier to value
//! buffer. The same type carries shader parameter sets (a 1x1 grid holding
//! uniform values) and the light records produced while shading.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::light::Light;
use crate::math::{Mat4, Vec3, Vec4};
use crate::value::{MAX_GRID_VERTICES, Value, ValueRef, ValueStorage, ValueType};

/// A 2D array of shaded vertices and the values attached to them.
///
/// The name→value map is ordered so that register binding and value
/// iteration are deterministic run to run.
pub struct Grid {
    width: usize,
    height: usize,
    /// Parametric step between adjacent vertices in u.
    pub du: f32,
    /// Parametric step between adjacent vertices in v.
    pub dv: f32,
    values: BTreeMap<String, ValueRef>,
    lights: Vec<Rc<Light>>,
    /// Object-to-camera transform captured when the grid was bound to a
    /// shader; resolves the "shader" coordinate system.
    transform: Mat4,
}

impl Grid {
    pub fn new() -> Grid {
        Grid {
            width: 1,
            height: 1,
            du: 0.0,
            dv: 0.0,
            values: BTreeMap::new(),
            lights: Vec::new(),
            transform: Mat4::IDENTITY,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Vertices in the grid; the element count of every varying buffer.
    pub fn size(&self) -> usize {
        self.width * self.height
    }

    /// Drop all values and lights and shrink back to a single vertex.
    pub fn clear(&mut self) {
        self.width = 1;
        self.height = 1;
        self.du = 0.0;
        self.dv = 0.0;
        self.values.clear();
        self.lights.clear();
    }

    /// Set the vertex dimensions.
    ///
    /// # Panics
    ///
    /// Panics when `width * height` exceeds [`MAX_GRID_VERTICES`]; value
    /// buffers are allocated for that ceiling and larger grids would
    /// overrun them.
    pub fn resize(&mut self, width: usize, height: usize) {
        assert!(width > 0 && height > 0, "grid dimensions must be non-zero");
        assert!(
            width * height <= MAX_GRID_VERTICES,
            "grid of {width}x{height} exceeds the {MAX_GRID_VERTICES}-vertex ceiling",
        );
        self.width = width;
        self.height = height;
    }

    /// Add a zeroed varying value of `ty` named `identifier`.
    ///
    /// # Panics
    ///
    /// Panics when the identifier is already present.
    pub fn add_value(&mut self, identifier: &str, ty: ValueType) -> ValueRef {
        assert!(
            !self.values.contains_key(identifier),
            "grid already has a value named \"{identifier}\"",
        );
        let mut value = Value::new();
        value.reset(ty, ValueStorage::Varying, self.size());
        value.zero();
        let value = Rc::new(RefCell::new(value));
        self.values.insert(identifier.to_string(), Rc::clone(&value));
        value
    }

    /// Insert an existing buffer under `identifier`, sharing it with the
    /// caller.
    pub fn insert_value(&mut self, identifier: &str, value: ValueRef) {
        debug_assert!(value.borrow().size() <= self.size().max(1));
        self.values.insert(identifier.to_string(), value);
    }

    /// Insert a deep copy of `value` under `identifier`.
    pub fn copy_value(&mut self, identifier: &str, value: &ValueRef) {
        let copied = Rc::new(RefCell::new(value.borrow().clone()));
        self.values.insert(identifier.to_string(), copied);
    }

    pub fn find_value(&self, identifier: &str) -> Option<&ValueRef> {
        self.values.get(identifier)
    }

    /// The existing value named `identifier`, or a fresh zeroed varying
    /// value of `ty`.
    pub fn value(&mut self, identifier: &str, ty: ValueType) -> ValueRef {
        if let Some(value) = self.values.get(identifier) {
            return Rc::clone(value);
        }
        self.add_value(identifier, ty)
    }

    pub fn values_by_identifier(&self) -> &BTreeMap<String, ValueRef> {
        &self.values
    }

    pub fn add_light(&mut self, light: Rc<Light>) {
        self.lights.push(light);
    }

    pub fn light(&self, index: usize) -> &Light {
        &self.lights[index]
    }

    pub fn lights(&self) -> &[Rc<Light>] {
        &self.lights
    }

    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    /// Generate per-vertex normals from `P` by averaging facet normals.
    ///
    /// Each interior facet contributes the cross product of its longer
    /// parametric edges; `left_handed` picks the winding. Does nothing if
    /// `N` already exists unless `force` is set.
    pub fn generate_normals(&mut self, left_handed: bool, force: bool) {
        if !force && self.values.contains_key("N") {
            return;
        }
        let Some(p) = self.values.get("P") else {
            return;
        };

        let width = self.width;
        let height = self.height;
        let mut sums = vec![Vec4::ZERO; width * height];
        {
            let p = p.borrow();
            let positions = p.vec3s();
            for y in 0..height.saturating_sub(1) {
                for x in 0..width.saturating_sub(1) {
                    let i0 = y * width + x;
                    let i1 = (y + 1) * width + x;
                    let i2 = (y + 1) * width + x + 1;
                    let i3 = y * width + x + 1;

                    let u0 = positions[i3] - positions[i0];
                    let u1 = positions[i2] - positions[i1];
                    let u = if u0.length() > u1.length() { u0 } else { u1 };
                    let v0 = positions[i1] - positions[i0];
                    let v1 = positions[i2] - positions[i3];
                    let v = if v0.length() > v1.length() { v0 } else { v1 };
                    let normal = if left_handed { u.cross(v) } else { v.cross(u) }
                        .normalize_or_zero();

                    for i in [i0, i1, i2, i3] {
                        sums[i] += normal.extend(1.0);
                    }
                }
            }
        }

        let normals = self.value("N", ValueType::Normal);
        let mut normals = normals.borrow_mut();
        normals.reset(ValueType::Normal, ValueStorage::Varying, width * height);
        for (out, sum) in normals.vec3s_mut().iter_mut().zip(&sums) {
            *out = if sum.w > 0.0 {
                Vec3::new(sum.x, sum.y, sum.z) / sum.w
            } else {
                Vec3::ZERO
            };
        }
    }
}

impl Default for Grid {
    fn default() -> Grid {
        Grid::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varying_values_match_the_grid_size() {
        let mut grid = Grid::new();
        grid.resize(4, 4);
        let p = grid.add_value("P", ValueType::Point);
        assert_eq!(p.borrow().size(), 16);
        assert_eq!(p.borrow().storage(), ValueStorage::Varying);
    }

    #[test]
    #[should_panic(expected = "vertex ceiling")]
    fn resize_rejects_grids_over_the_ceiling() {
        let mut grid = Grid::new();
        grid.resize(65, 64);
    }

    #[test]
    fn generate_normals_for_a_flat_plane() {
        let mut grid = Grid::new();
        grid.resize(2, 2);
        let p = grid.add_value("P", ValueType::Point);
        {
            let mut p = p.borrow_mut();
            let positions = p.vec3s_mut();
            positions[0] = Vec3::new(0.0, 0.0, 0.0);
            positions[1] = Vec3::new(1.0, 0.0, 0.0);
            positions[2] = Vec3::new(0.0, 1.0, 0.0);
            positions[3] = Vec3::new(1.0, 1.0, 0.0);
        }
        grid.generate_normals(true, false);
        let n = grid.find_value("N").unwrap().borrow();
        for normal in n.vec3s() {
            assert!((normal.z.abs() - 1.0).abs() < 1e-6);
            assert!(normal.x.abs() < 1e-6 && normal.y.abs() < 1e-6);
        }
    }

    #[test]
    fn generate_normals_respects_an_existing_n() {
        let mut grid = Grid::new();
        grid.resize(2, 2);
        grid.add_value("P", ValueType::Point);
        let n = grid.add_value("N", ValueType::Normal);
        n.borrow_mut().vec3s_mut()[0] = Vec3::new(5.0, 0.0, 0.0);
        grid.generate_normals(true, false);
        assert_eq!(
            grid.find_value("N").unwrap().borrow().vec3s()[0],
            Vec3::new(5.0, 0.0, 0.0)
        );
    }

    #[test]
    fn value_map_iterates_in_name_order() {
        let mut grid = Grid::new();
        grid.resize(2, 2);
        grid.add_value("t", ValueType::Float);
        grid.add_value("P", ValueType::Point);
        grid.add_value("Cs", ValueType::Color);
        let names: Vec<&str> = grid.values_by_identifier().keys().map(|s| s.as_str()).collect();
        assert_eq!(names, ["Cs", "P", "t"]);
    }
}
