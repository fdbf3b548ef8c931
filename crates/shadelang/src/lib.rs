//! # Shadelang — a shading language engine
//!
//! The compiler and virtual machine at the heart of a REYES-style
//! renderer: RenderMan-flavored surface, displacement, light, volume,
//! and imager shaders compile to bytecode, and a SIMD-across-a-grid
//! interpreter runs them over rectangular grids of micropolygon
//! vertices.
//!
//! ```no_run
//! use shadelang::compile::{compile, symbols::SymbolTable};
//! use shadelang::grid::Grid;
//! use shadelang::render::EmptyContext;
//! use shadelang::vm::VirtualMachine;
//!
//! let table = SymbolTable::new();
//! let shader = compile("surface flat() { Ci = Cs; Oi = Os; }", &table).unwrap();
//!
//! let renderer = EmptyContext::default();
//! let mut vm = VirtualMachine::new(&renderer);
//! let mut parameters = Grid::new();
//! vm.initialize(&mut parameters, &shader);
//!
//! let mut grid = Grid::new();
//! grid.resize(8, 8);
//! vm.shade_surface(&mut grid, &parameters, &shader, &[]);
//! ```

pub mod compile;
pub mod error;
pub mod grid;
pub mod light;
pub mod math;
pub mod render;
pub mod shader;
pub mod texture;
pub mod value;
pub mod vm;

pub use compile::symbols::SymbolTable;
pub use compile::{compile, compile_file};
pub use error::{CompileError, CompileErrors};
pub use grid::Grid;
pub use render::{Attributes, EmptyContext, RenderContext, SceneContext};
pub use shader::{Shader, ShaderKind};
pub use texture::{Texture, TextureKind};
pub use value::{Value, ValueRef, ValueStorage, ValueType};
pub use vm::{LightSource, VirtualMachine};
