//! The shader compiler: source text in, [`Shader`] out.
//!
//! Pipeline: [`lexer`] → [`parser`] → [`semantic`] → [`codegen`]. Each
//! pass keeps going after an error so one compile reports everything it
//! can; compilation fails if anything was reported by the end.

pub mod ast;
pub mod codegen;
pub mod lexer;
pub mod parser;
pub mod semantic;
pub mod symbols;

use std::path::Path;

use crate::compile::ast::NodeKind;
use crate::compile::symbols::SymbolTable;
use crate::error::{CompileError, CompileErrors, ErrorLog};
use crate::shader::{Shader, ShaderKind};

/// Compile shader source text against the host's symbol table.
///
/// The source must define exactly one shader; everything the compiler
/// finds wrong is reported in the returned [`CompileErrors`].
pub fn compile(source: &str, table: &SymbolTable) -> Result<Shader, CompileErrors> {
    let mut errors = ErrorLog::new();
    let mut tree = parser::parse(source, &mut errors);

    let shader_index = tree
        .children
        .iter()
        .position(|n| shader_kind(n.kind).is_some());
    let Some(index) = shader_index else {
        errors.error(0, "Source defines no shader");
        return Err(errors
            .finish()
            .expect_err("error log contains at least the report above"));
    };
    if tree
        .children
        .iter()
        .filter(|n| shader_kind(n.kind).is_some())
        .count()
        > 1
    {
        log::warn!("source defines more than one shader; compiling the first");
    }

    let node = &mut tree.children[index];
    let kind = shader_kind(node.kind).expect("selected node is a shader");
    let analysis = semantic::analyze(node, kind, table, &mut errors);

    // Code generation still runs with errors pending so it can report
    // its own (break/continue validation), but a failed compile never
    // hands back a shader.
    let shader = codegen::generate(kind, node, analysis, &mut errors);
    errors.finish()?;
    Ok(shader)
}

/// Compile a shader from a `.sl` file.
pub fn compile_file(path: impl AsRef<Path>, table: &SymbolTable) -> Result<Shader, CompileErrors> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|error| CompileErrors {
        errors: vec![CompileError::new(
            0,
            format!("Cannot read '{}': {error}", path.display()),
        )],
    })?;
    log::debug!("compiling {}", path.display());
    compile(&source, table)
}

fn shader_kind(kind: NodeKind) -> Option<ShaderKind> {
    Some(match kind {
        NodeKind::SurfaceShader => ShaderKind::Surface,
        NodeKind::DisplacementShader => ShaderKind::Displacement,
        NodeKind::LightShader => ShaderKind::Light,
        NodeKind::VolumeShader => ShaderKind::Volume,
        NodeKind::ImagerShader => ShaderKind::Imager,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::SymbolKind;
    use crate::value::ValueType;

    #[test]
    fn canonical_shaders_compile() {
        let table = SymbolTable::new();
        for (name, source) in [
            ("constant", include_str!("../../shaders/constant.sl")),
            ("matte", include_str!("../../shaders/matte.sl")),
            ("metal", include_str!("../../shaders/metal.sl")),
            ("plastic", include_str!("../../shaders/plastic.sl")),
            ("paintedplastic", include_str!("../../shaders/paintedplastic.sl")),
            ("ambientlight", include_str!("../../shaders/ambientlight.sl")),
            ("distantlight", include_str!("../../shaders/distantlight.sl")),
            ("pointlight", include_str!("../../shaders/pointlight.sl")),
            ("spotlight", include_str!("../../shaders/spotlight.sl")),
            ("depthcue", include_str!("../../shaders/depthcue.sl")),
            ("fog", include_str!("../../shaders/fog.sl")),
            ("bumpy", include_str!("../../shaders/bumpy.sl")),
            ("background", include_str!("../../shaders/background.sl")),
        ] {
            let shader = compile(source, &table)
                .unwrap_or_else(|errors| panic!("{name} failed to compile:\n{errors}"));
            assert_eq!(shader.name(), name);
            assert!(shader.end_address() > shader.shade_address());
        }
    }

    #[test]
    fn register_plan_orders_constants_symbols_temporaries() {
        let table = SymbolTable::new();
        let shader = compile(include_str!("../../shaders/matte.sl"), &table).unwrap();
        let constants = shader.constants().len();
        assert!(constants >= 1);
        // Parameters sit right above the constant pool.
        let ka = shader.find_symbol("Ka").unwrap();
        assert_eq!(ka.kind(), SymbolKind::Parameter);
        assert_eq!(ka.register() as usize, constants);
        assert!(shader.permanent_registers() > constants);
        assert!(shader.registers() > shader.permanent_registers());
        assert_eq!(shader.parameters(), 2);
    }

    #[test]
    fn initializer_and_shade_fragments_are_disjoint() {
        let table = SymbolTable::new();
        let shader = compile(include_str!("../../shaders/matte.sl"), &table).unwrap();
        assert_eq!(shader.initialize_address(), 0);
        assert!(shader.shade_address() > 0);
        assert!(shader.shade_address() < shader.end_address());
    }

    #[test]
    fn empty_source_is_an_error() {
        let table = SymbolTable::new();
        let errors = compile("", &table).unwrap_err();
        assert!(errors.contains("defines no shader"));
    }

    #[test]
    fn continue_outside_a_loop_fails() {
        let table = SymbolTable::new();
        let errors = compile(
            "surface continue_statement_outside_of_loop() { \n   continue; \n}",
            &table,
        )
        .unwrap_err();
        assert!(errors.contains("Continue outside of a loop"));
        assert_eq!(errors.errors[0].line, 2);
    }

    #[test]
    fn continue_level_outside_a_loop_fails() {
        let table = SymbolTable::new();
        let errors = compile(
            "surface continue_statement_with_out_of_range_level() { \n\
             \x20  uniform float i; \n\
             \x20  for ( i = 0; i < 4; i += 1 ) { \n\
             \x20      continue 2; \n\
             \x20  } \n\
             }",
            &table,
        )
        .unwrap_err();
        assert!(errors.contains("Continue to a level outside of a loop"));
        assert_eq!(errors.errors[0].line, 4);
    }

    #[test]
    fn break_outside_a_loop_fails() {
        let table = SymbolTable::new();
        let errors = compile("surface s() { break; }", &table).unwrap_err();
        assert!(errors.contains("Break outside of a loop"));
    }

    #[test]
    fn host_registered_globals_resolve() {
        let mut table = SymbolTable::new();
        table.add_global("x", ValueType::Float);
        table.add_global("y", ValueType::Float);
        let shader = compile("surface s() { y += x; }", &table).unwrap();
        assert!(shader.find_symbol("x").is_some());
        assert!(shader.find_symbol("y").is_some());
    }

    #[test]
    fn disassembly_names_opcodes_and_fragments() {
        let table = SymbolTable::new();
        let shader = compile(include_str!("../../shaders/constant.sl"), &table).unwrap();
        let listing = shader.disassemble();
        assert!(listing.contains("shade:"));
        assert!(listing.contains("multiply"));
        assert!(listing.contains("assign"));
        assert!(listing.contains("halt"));
    }

    #[test]
    fn deeply_nested_masks_are_rejected() {
        let table = SymbolTable::new();
        let mut source = String::from("surface s() { uniform float i = 0; ");
        for _ in 0..9 {
            source.push_str("if (i < 1) { ");
        }
        source.push_str("i = 1; ");
        for _ in 0..9 {
            source.push('}');
        }
        source.push('}');
        let errors = compile(&source, &table).unwrap_err();
        assert!(errors.contains("nested too deeply"));
    }
}
