//! Compiled shader programs.
//!
//! A [`Shader`] is immutable after compilation and may be shared freely
//! (including across threads); everything mutable during execution lives
//! in the VM and the grid.

use std::fmt::Write as _;

use crate::value::{Value, ValueStorage, ValueType};
use crate::vm::instruction::{CodeReader, Opcode};
use crate::vm::intrinsics::IntrinsicFn;

/// What kind of shader a program is; decides which globals the renderer
/// binds and when the program runs in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderKind {
    Surface,
    Displacement,
    Light,
    Volume,
    Imager,
}

impl ShaderKind {
    pub fn name(self) -> &'static str {
        match self {
            ShaderKind::Surface => "surface",
            ShaderKind::Displacement => "displacement",
            ShaderKind::Light => "light",
            ShaderKind::Volume => "volume",
            ShaderKind::Imager => "imager",
        }
    }
}

/// How a symbol entered the shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// Declared in the parameter list; initialized by the initialize
    /// fragment.
    Parameter,
    /// Declared in the body.
    Local,
    /// A well-known name bound from the grid at shade time (`P`, `Ci`,
    /// `L`, ...).
    Global,
    /// A built-in function referenced by `call` instructions.
    Intrinsic,
}

/// A named slot in a shader's register plan.
#[derive(Clone)]
pub struct Symbol {
    name: String,
    ty: ValueType,
    storage: ValueStorage,
    kind: SymbolKind,
    register: u32,
    function: Option<IntrinsicFn>,
}

impl Symbol {
    pub fn new(
        name: impl Into<String>,
        ty: ValueType,
        storage: ValueStorage,
        kind: SymbolKind,
    ) -> Symbol {
        Symbol {
            name: name.into(),
            ty,
            storage,
            kind,
            register: u32::MAX,
            function: None,
        }
    }

    pub fn with_function(mut self, function: IntrinsicFn) -> Symbol {
        self.function = Some(function);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> ValueType {
        self.ty
    }

    pub fn storage(&self) -> ValueStorage {
        self.storage
    }

    pub fn kind(&self) -> SymbolKind {
        self.kind
    }

    pub fn register(&self) -> u32 {
        self.register
    }

    pub fn set_register(&mut self, register: u32) {
        self.register = register;
    }

    pub fn function(&self) -> Option<IntrinsicFn> {
        self.function
    }
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Symbol({} {} {} r{})",
            self.storage.name(),
            self.ty.name(),
            self.name,
            self.register
        )
    }
}

/// An immutable compiled shader.
pub struct Shader {
    kind: ShaderKind,
    name: String,
    symbols: Vec<Symbol>,
    constants: Vec<Value>,
    code: Vec<u8>,
    initialize_address: usize,
    shade_address: usize,
    parameters: usize,
    permanent_registers: usize,
    registers: usize,
}

impl Shader {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        kind: ShaderKind,
        name: String,
        symbols: Vec<Symbol>,
        constants: Vec<Value>,
        code: Vec<u8>,
        initialize_address: usize,
        shade_address: usize,
        parameters: usize,
        permanent_registers: usize,
        registers: usize,
    ) -> Shader {
        Shader {
            kind,
            name,
            symbols,
            constants,
            code,
            initialize_address,
            shade_address,
            parameters,
            permanent_registers,
            registers,
        }
    }

    pub fn kind(&self) -> ShaderKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameters first, then locals and referenced globals, then
    /// intrinsics.
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn symbol(&self, index: usize) -> &Symbol {
        &self.symbols[index]
    }

    pub fn find_symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// The constant pool; constant `i` occupies register `i`.
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Start of the parameter-initializer fragment.
    pub fn initialize_address(&self) -> usize {
        self.initialize_address
    }

    /// Start of the shade fragment (end of the initializer).
    pub fn shade_address(&self) -> usize {
        self.shade_address
    }

    pub fn end_address(&self) -> usize {
        self.code.len()
    }

    /// Number of parameter symbols.
    pub fn parameters(&self) -> usize {
        self.parameters
    }

    /// Registers holding constants and named values; temporaries are
    /// allocated above this index.
    pub fn permanent_registers(&self) -> usize {
        self.permanent_registers
    }

    /// Total registers the register file needs.
    pub fn registers(&self) -> usize {
        self.registers
    }

    /// Human-readable listing of the bytecode.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} {} ({} constants, {} registers, {} permanent)",
            self.kind.name(),
            self.name,
            self.constants.len(),
            self.registers,
            self.permanent_registers
        );
        let mut reader = CodeReader::new(&self.code, 0);
        while !reader.at_end(self.code.len()) {
            let at = reader.pc();
            if at == self.initialize_address {
                let _ = writeln!(out, "initialize:");
            }
            if at == self.shade_address {
                let _ = writeln!(out, "shade:");
            }
            let (op, dispatch) = reader.op();
            let _ = write!(out, "  {at:06}  {}", op.name());
            if dispatch != crate::vm::instruction::Dispatch::None && op != Opcode::Call {
                let _ = write!(out, ".{}", dispatch.name());
            }
            match op {
                Opcode::Null | Opcode::Halt | Opcode::ClearMask | Opcode::InvertMask => {}
                Opcode::Reset | Opcode::GenerateMask => {
                    let _ = write!(out, " r{}", reader.reg());
                }
                Opcode::Jump
                | Opcode::JumpEmpty
                | Opcode::JumpNotEmpty
                | Opcode::JumpIlluminance => {
                    let _ = write!(out, " -> {:06}", reader.target());
                }
                Opcode::Convert => {
                    let ty = crate::value::ValueType::try_from(reader.byte())
                        .unwrap_or(crate::value::ValueType::Null);
                    let a = reader.reg();
                    let b = reader.reg();
                    let _ = write!(out, " {} r{a}, r{b}", ty.name());
                }
                Opcode::Negate
                | Opcode::Promote
                | Opcode::Assign
                | Opcode::AddAssign
                | Opcode::SubtractAssign
                | Opcode::MultiplyAssign
                | Opcode::DivideAssign
                | Opcode::AssignString => {
                    let a = reader.reg();
                    let b = reader.reg();
                    let _ = write!(out, " r{a}, r{b}");
                }
                Opcode::Dot
                | Opcode::Multiply
                | Opcode::Divide
                | Opcode::Add
                | Opcode::Subtract
                | Opcode::Greater
                | Opcode::GreaterEqual
                | Opcode::Less
                | Opcode::LessEqual
                | Opcode::And
                | Opcode::Or
                | Opcode::Equal
                | Opcode::NotEqual
                | Opcode::TransformPoint
                | Opcode::TransformVector
                | Opcode::TransformNormal
                | Opcode::TransformColor
                | Opcode::TransformMatrix
                | Opcode::FloatEnvironment
                | Opcode::Vec3Environment => {
                    let a = reader.reg();
                    let b = reader.reg();
                    let c = reader.reg();
                    let _ = write!(out, " r{a}, r{b}, r{c}");
                }
                Opcode::FloatTexture | Opcode::Vec3Texture | Opcode::Shadow => {
                    let a = reader.reg();
                    let b = reader.reg();
                    let c = reader.reg();
                    let d = reader.reg();
                    let _ = write!(out, " r{a}, r{b}, r{c}, r{d}");
                }
                Opcode::Call => {
                    let result = reader.reg();
                    let symbol = reader.reg() as usize;
                    let _ = write!(out, " r{result}, {}", self.symbols[symbol].name());
                    for _ in 0..dispatch as u8 {
                        let _ = write!(out, ", r{}", reader.reg());
                    }
                }
                Opcode::Ambient => {
                    let a = reader.reg();
                    let b = reader.reg();
                    let _ = write!(out, " r{a}, r{b}");
                }
                Opcode::SolarAxisAngle => {
                    for i in 0..4 {
                        let _ = write!(out, "{} r{}", if i == 0 { "" } else { "," }, reader.reg());
                    }
                }
                Opcode::Illuminate => {
                    for i in 0..5 {
                        let _ = write!(out, "{} r{}", if i == 0 { "" } else { "," }, reader.reg());
                    }
                }
                Opcode::IlluminateAxisAngle | Opcode::IlluminanceAxisAngle => {
                    for i in 0..7 {
                        let _ = write!(out, "{} r{}", if i == 0 { "" } else { "," }, reader.reg());
                    }
                }
            }
            let _ = writeln!(out);
        }
        out
    }
}

impl std::fmt::Debug for Shader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Shader({} {}, {} bytes)",
            self.kind.name(),
            self.name,
            self.code.len()
        )
    }
}
