//! Symbol table: shader globals and the built-in function registry.
//!
//! The host builds one [`SymbolTable`], adds any extra grid value names
//! its geometry supplies, and hands it to `compile` for every shader.
//! The standard intrinsics and well-known globals are registered up
//! front; shader-local scopes are the semantic analyzer's business.

use crate::value::{ValueStorage, ValueType};
use crate::vm::intrinsics::{self as fns, IntrinsicFn};

/// Parameter shape an intrinsic accepts. `Triple` matches any of the
/// four three-component types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Float,
    Triple,
    Matrix,
    Str,
}

impl ParamKind {
    /// Whether an argument of `ty` satisfies this parameter exactly.
    pub fn matches(self, ty: ValueType) -> bool {
        match self {
            ParamKind::Float => matches!(ty, ValueType::Float | ValueType::Integer),
            ParamKind::Triple => ty.is_triple(),
            ParamKind::Matrix => ty == ValueType::Matrix,
            ParamKind::Str => ty == ValueType::String,
        }
    }
}

/// How an intrinsic's result type is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    Fixed(ValueType),
    /// Same type as the given argument (for type-preserving operations
    /// like `normalize`).
    SameAsArg(usize),
}

/// How an intrinsic's result storage is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStorage {
    /// Always varying (one result per grid vertex).
    Varying,
    /// Always a single value.
    Uniform,
    /// The widest storage among the arguments.
    MaxArgs,
}

/// One registered built-in function variant.
pub struct Intrinsic {
    pub name: &'static str,
    pub params: &'static [ParamKind],
    pub result: ResultType,
    pub result_storage: ResultStorage,
    pub function: IntrinsicFn,
}

/// A well-known grid value name shaders may reference without declaring.
#[derive(Debug, Clone)]
pub struct GlobalDef {
    pub name: String,
    pub ty: ValueType,
    pub storage: ValueStorage,
}

/// The global scope: intrinsics plus grid value names.
pub struct SymbolTable {
    intrinsics: Vec<Intrinsic>,
    globals: Vec<GlobalDef>,
}

impl SymbolTable {
    /// A table populated with the standard intrinsic library and the
    /// well-known surface/displacement/light/imager globals.
    pub fn new() -> SymbolTable {
        let mut table = SymbolTable {
            intrinsics: Vec::new(),
            globals: Vec::new(),
        };
        table.register_standard_globals();
        table.register_standard_intrinsics();
        table
    }

    /// An empty table; useful for tests that want full control.
    pub fn empty() -> SymbolTable {
        SymbolTable {
            intrinsics: Vec::new(),
            globals: Vec::new(),
        }
    }

    /// Add a varying grid value name (for values the host's geometry
    /// attaches beyond the standard set).
    pub fn add_global(&mut self, name: &str, ty: ValueType) -> &mut SymbolTable {
        self.globals.push(GlobalDef {
            name: name.to_string(),
            ty,
            storage: ValueStorage::Varying,
        });
        self
    }

    pub fn find_global(&self, name: &str) -> Option<&GlobalDef> {
        self.globals.iter().find(|g| g.name == name)
    }

    /// All intrinsic variants registered under `name`, in registration
    /// order (the overload tie-break).
    pub fn intrinsics(&self, name: &str) -> impl Iterator<Item = &Intrinsic> {
        self.intrinsics.iter().filter(move |i| i.name == name)
    }

    pub fn has_intrinsic(&self, name: &str) -> bool {
        self.intrinsics.iter().any(|i| i.name == name)
    }

    pub fn register(
        &mut self,
        name: &'static str,
        params: &'static [ParamKind],
        result: ResultType,
        result_storage: ResultStorage,
        function: IntrinsicFn,
    ) -> &mut SymbolTable {
        self.intrinsics.push(Intrinsic {
            name,
            params,
            result,
            result_storage,
            function,
        });
        self
    }

    fn register_standard_globals(&mut self) {
        use ValueType::*;
        for (name, ty) in [
            ("P", Point),
            ("N", Normal),
            ("Ng", Normal),
            ("I", Vector),
            ("Cs", Color),
            ("Os", Color),
            ("Ci", Color),
            ("Oi", Color),
            ("s", Float),
            ("t", Float),
            ("u", Float),
            ("v", Float),
            ("du", Float),
            ("dv", Float),
            ("alpha", Float),
        ] {
            self.add_global(name, ty);
        }
    }

    fn register_standard_intrinsics(&mut self) {
        use ParamKind::{Float as F, Matrix as M, Str as S, Triple as T};
        use ResultStorage::{MaxArgs, Uniform, Varying};
        use ResultType::{Fixed, SameAsArg};
        use ValueType::Color;

        const FLOAT: ResultType = Fixed(ValueType::Float);
        const MATRIX: ResultType = Fixed(ValueType::Matrix);

        // Mathematics.
        self.register("radians", &[F], FLOAT, MaxArgs, fns::math_fns::radians)
            .register("degrees", &[F], FLOAT, MaxArgs, fns::math_fns::degrees)
            .register("sin", &[F], FLOAT, MaxArgs, fns::math_fns::sin)
            .register("asin", &[F], FLOAT, MaxArgs, fns::math_fns::asin)
            .register("cos", &[F], FLOAT, MaxArgs, fns::math_fns::cos)
            .register("acos", &[F], FLOAT, MaxArgs, fns::math_fns::acos)
            .register("tan", &[F], FLOAT, MaxArgs, fns::math_fns::tan)
            .register("atan", &[F], FLOAT, MaxArgs, fns::math_fns::atan)
            .register("atan2", &[F, F], FLOAT, MaxArgs, fns::math_fns::atan2)
            .register("pow", &[F, F], FLOAT, MaxArgs, fns::math_fns::pow)
            .register("exp", &[F], FLOAT, MaxArgs, fns::math_fns::exp)
            .register("sqrt", &[F], FLOAT, MaxArgs, fns::math_fns::sqrt)
            .register("inversesqrt", &[F], FLOAT, MaxArgs, fns::math_fns::inversesqrt)
            .register("log", &[F], FLOAT, MaxArgs, fns::math_fns::log)
            .register("logb", &[F, F], FLOAT, MaxArgs, fns::math_fns::logb)
            .register("mod", &[F, F], FLOAT, MaxArgs, fns::math_fns::mod_)
            .register("abs", &[F], FLOAT, MaxArgs, fns::math_fns::abs)
            .register("sign", &[F], FLOAT, MaxArgs, fns::math_fns::sign)
            .register("min", &[F, F], FLOAT, MaxArgs, fns::math_fns::min)
            .register("max", &[F, F], FLOAT, MaxArgs, fns::math_fns::max)
            .register("clamp", &[F, F, F], FLOAT, MaxArgs, fns::math_fns::clamp)
            .register("mix", &[F, F, F], FLOAT, MaxArgs, fns::math_fns::mix_float)
            .register("mix", &[T, T, F], SameAsArg(0), MaxArgs, fns::math_fns::mix_vec3)
            .register("floor", &[F], FLOAT, MaxArgs, fns::math_fns::floor)
            .register("ceil", &[F], FLOAT, MaxArgs, fns::math_fns::ceil)
            .register("round", &[F], FLOAT, MaxArgs, fns::math_fns::round)
            .register("step", &[F, F], FLOAT, MaxArgs, fns::math_fns::step)
            .register("smoothstep", &[F, F, F], FLOAT, MaxArgs, fns::math_fns::smoothstep)
            .register("random", &[], FLOAT, Varying, fns::math_fns::random);

        // Derivatives.
        self.register("Du", &[F], FLOAT, Varying, fns::math_fns::du_float)
            .register("Du", &[T], SameAsArg(0), Varying, fns::math_fns::du_vec3)
            .register("Dv", &[F], FLOAT, Varying, fns::math_fns::dv_float)
            .register("Dv", &[T], SameAsArg(0), Varying, fns::math_fns::dv_vec3)
            .register("Deriv", &[F, F], FLOAT, Varying, fns::math_fns::deriv_float)
            .register("Deriv", &[T, F], SameAsArg(0), Varying, fns::math_fns::deriv_vec3);

        // Geometry.
        self.register("xcomp", &[T], FLOAT, MaxArgs, fns::geometry::xcomp)
            .register("ycomp", &[T], FLOAT, MaxArgs, fns::geometry::ycomp)
            .register("zcomp", &[T], FLOAT, MaxArgs, fns::geometry::zcomp)
            .register("setxcomp", &[T, F], FLOAT, MaxArgs, fns::geometry::setxcomp)
            .register("setycomp", &[T, F], FLOAT, MaxArgs, fns::geometry::setycomp)
            .register("setzcomp", &[T, F], FLOAT, MaxArgs, fns::geometry::setzcomp)
            .register("length", &[T], FLOAT, MaxArgs, fns::geometry::length)
            .register("normalize", &[T], SameAsArg(0), MaxArgs, fns::geometry::normalize)
            .register("distance", &[T, T], FLOAT, MaxArgs, fns::geometry::distance)
            .register("rotate", &[T, F, T, T], SameAsArg(0), MaxArgs, fns::geometry::rotate)
            .register("area", &[T], FLOAT, Varying, fns::geometry::area)
            .register("faceforward", &[T, T], SameAsArg(0), MaxArgs, fns::geometry::faceforward)
            .register(
                "faceforward",
                &[T, T, T],
                SameAsArg(0),
                MaxArgs,
                fns::geometry::faceforward_nref,
            )
            .register("reflect", &[T, T], Fixed(ValueType::Vector), MaxArgs, fns::geometry::reflect)
            .register(
                "refract",
                &[T, T, F],
                Fixed(ValueType::Vector),
                Varying,
                fns::geometry::refract,
            )
            .register("fresnel", &[T, T, F, F, F], FLOAT, Varying, fns::geometry::fresnel)
            .register(
                "calculatenormal",
                &[T],
                SameAsArg(0),
                Varying,
                fns::geometry::calculatenormal,
            )
            .register("depth", &[T], FLOAT, Varying, fns::geometry::depth);

        // Coordinate and color space transforms.
        self.register("transform", &[S, T], Fixed(ValueType::Point), Varying, fns::geometry::transform_to_space)
            .register(
                "transform",
                &[S, S, T],
                Fixed(ValueType::Point),
                Varying,
                fns::geometry::transform_between_spaces,
            )
            .register("transform", &[M, T], SameAsArg(1), MaxArgs, fns::geometry::transform_matrix)
            .register(
                "transform",
                &[S, M, T],
                Fixed(ValueType::Point),
                Varying,
                fns::geometry::transform_space_matrix,
            )
            .register("vtransform", &[S, T], SameAsArg(1), MaxArgs, fns::geometry::vtransform_to_space)
            .register(
                "vtransform",
                &[S, S, T],
                SameAsArg(2),
                MaxArgs,
                fns::geometry::vtransform_between_spaces,
            )
            .register("vtransform", &[M, T], SameAsArg(1), MaxArgs, fns::geometry::vtransform_matrix)
            .register(
                "vtransform",
                &[S, M, T],
                SameAsArg(2),
                MaxArgs,
                fns::geometry::vtransform_space_matrix,
            )
            .register("ntransform", &[S, T], SameAsArg(1), MaxArgs, fns::geometry::ntransform_to_space)
            .register(
                "ntransform",
                &[S, S, T],
                SameAsArg(2),
                MaxArgs,
                fns::geometry::ntransform_between_spaces,
            )
            .register("ntransform", &[M, T], SameAsArg(1), MaxArgs, fns::geometry::ntransform_matrix)
            .register(
                "ntransform",
                &[S, M, T],
                SameAsArg(2),
                MaxArgs,
                fns::geometry::ntransform_space_matrix,
            )
            .register("ctransform", &[S, T], Fixed(Color), MaxArgs, fns::color::ctransform);

        // Color and matrix components.
        self.register("comp", &[T, F], FLOAT, MaxArgs, fns::color::comp)
            .register("setcomp", &[T, F, F], FLOAT, MaxArgs, fns::color::setcomp)
            .register("comp", &[M, F, F], FLOAT, Uniform, fns::matrix::comp)
            .register("setcomp", &[M, F, F, F], FLOAT, Uniform, fns::matrix::setcomp)
            .register("determinant", &[M], FLOAT, Uniform, fns::matrix::determinant)
            .register("translate", &[M, T], MATRIX, Uniform, fns::matrix::translate)
            .register("rotate", &[M, F, T], MATRIX, Uniform, fns::matrix::rotate)
            .register("scale", &[M, T], MATRIX, Uniform, fns::matrix::scale);

        // Shading and lighting.
        self.register("ambient", &[], Fixed(Color), Varying, fns::shading::ambient)
            .register("diffuse", &[T], Fixed(Color), Varying, fns::shading::diffuse)
            .register("specular", &[T, T, F], Fixed(Color), Varying, fns::shading::specular)
            .register(
                "specularbrdf",
                &[T, T, T, F],
                Fixed(Color),
                Varying,
                fns::shading::specularbrdf,
            )
            .register("phong", &[T, T, F], Fixed(Color), Varying, fns::shading::phong)
            .register("trace", &[T, T], Fixed(Color), Varying, fns::shading::trace);
    }
}

impl Default for SymbolTable {
    fn default() -> SymbolTable {
        SymbolTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_globals_are_present() {
        let table = SymbolTable::new();
        assert_eq!(table.find_global("P").unwrap().ty, ValueType::Point);
        assert_eq!(table.find_global("Ci").unwrap().ty, ValueType::Color);
        assert!(table.find_global("L").is_none(), "L is light-scoped, not global");
    }

    #[test]
    fn overloads_keep_registration_order() {
        let table = SymbolTable::new();
        let variants: Vec<_> = table.intrinsics("transform").collect();
        assert_eq!(variants.len(), 4);
        assert_eq!(variants[0].params, &[ParamKind::Str, ParamKind::Triple]);
    }

    #[test]
    fn host_globals_extend_the_table() {
        let mut table = SymbolTable::new();
        table.add_global("x", ValueType::Float);
        assert_eq!(table.find_global("x").unwrap().storage, ValueStorage::Varying);
    }

    #[test]
    fn param_kinds_match_types() {
        assert!(ParamKind::Triple.matches(ValueType::Normal));
        assert!(ParamKind::Float.matches(ValueType::Integer));
        assert!(!ParamKind::Float.matches(ValueType::Color));
        assert!(ParamKind::Str.matches(ValueType::String));
    }
}
