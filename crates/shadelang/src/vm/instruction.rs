//! Bytecode format.
//!
//! Instructions are variable width. Every instruction starts with a
//! 16-bit word: the high byte is the [`Opcode`], the low byte is a
//! [`Dispatch`] tag selecting the operand shape for opcodes that have
//! per-shape kernels (zero otherwise; the `call` opcode reuses it for the
//! argument count). Register references are 32-bit indices; branch
//! targets are signed byte offsets relative to the position just past the
//! offset operand. All fields are little-endian.

use num_enum::TryFromPrimitive;

use crate::value::ValueStorage;

/// Instructions interpreted by the virtual machine.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum Opcode {
    Null = 0,
    Halt,
    /// Reset the temporary register counter to the operand.
    Reset,
    ClearMask,
    GenerateMask,
    InvertMask,
    /// Branch when no elements are active; pops the mask it tested.
    JumpEmpty,
    JumpNotEmpty,
    /// Advance to the next non-ambient light; branch when none remain.
    JumpIlluminance,
    Jump,
    TransformPoint,
    TransformVector,
    TransformNormal,
    TransformColor,
    TransformMatrix,
    Dot,
    Multiply,
    Divide,
    Add,
    Subtract,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    And,
    Or,
    Equal,
    NotEqual,
    Negate,
    /// Widen float to a three-component type or to a matrix diagonal.
    Convert,
    /// Broadcast a uniform value across a varying buffer.
    Promote,
    Assign,
    AddAssign,
    SubtractAssign,
    MultiplyAssign,
    DivideAssign,
    AssignString,
    FloatTexture,
    Vec3Texture,
    FloatEnvironment,
    Vec3Environment,
    Shadow,
    /// N-ary intrinsic call; argument count in the dispatch byte.
    Call,
    Ambient,
    SolarAxisAngle,
    Illuminate,
    IlluminateAxisAngle,
    IlluminanceAxisAngle,
}

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Null => "null",
            Opcode::Halt => "halt",
            Opcode::Reset => "reset",
            Opcode::ClearMask => "clear_mask",
            Opcode::GenerateMask => "generate_mask",
            Opcode::InvertMask => "invert_mask",
            Opcode::JumpEmpty => "jump_empty",
            Opcode::JumpNotEmpty => "jump_not_empty",
            Opcode::JumpIlluminance => "jump_illuminance",
            Opcode::Jump => "jump",
            Opcode::TransformPoint => "transform_point",
            Opcode::TransformVector => "transform_vector",
            Opcode::TransformNormal => "transform_normal",
            Opcode::TransformColor => "transform_color",
            Opcode::TransformMatrix => "transform_matrix",
            Opcode::Dot => "dot",
            Opcode::Multiply => "multiply",
            Opcode::Divide => "divide",
            Opcode::Add => "add",
            Opcode::Subtract => "subtract",
            Opcode::Greater => "greater",
            Opcode::GreaterEqual => "greater_equal",
            Opcode::Less => "less",
            Opcode::LessEqual => "less_equal",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Equal => "equal",
            Opcode::NotEqual => "not_equal",
            Opcode::Negate => "negate",
            Opcode::Convert => "convert",
            Opcode::Promote => "promote",
            Opcode::Assign => "assign",
            Opcode::AddAssign => "add_assign",
            Opcode::SubtractAssign => "subtract_assign",
            Opcode::MultiplyAssign => "multiply_assign",
            Opcode::DivideAssign => "divide_assign",
            Opcode::AssignString => "assign_string",
            Opcode::FloatTexture => "float_texture",
            Opcode::Vec3Texture => "vec3_texture",
            Opcode::FloatEnvironment => "float_environment",
            Opcode::Vec3Environment => "vec3_environment",
            Opcode::Shadow => "shadow",
            Opcode::Call => "call",
            Opcode::Ambient => "ambient",
            Opcode::SolarAxisAngle => "solar_axis_angle",
            Opcode::Illuminate => "illuminate",
            Opcode::IlluminateAxisAngle => "illuminate_axis_angle",
            Opcode::IlluminanceAxisAngle => "illuminance_axis_angle",
        }
    }
}

/// Operand shape tag: storage class and component count of each operand.
///
/// `U`/`V` is uniform (one element) versus varying (one element per grid
/// vertex); the digit is the component count (1 for float/integer, 3 for
/// the geometric types, 16 for matrices). Binary opcodes use the paired
/// variants, unary opcodes the single ones.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, Default)]
pub enum Dispatch {
    #[default]
    None = 0,
    U1,
    U3,
    U16,
    V1,
    V3,
    V16,
    U1U1,
    U1V1,
    V1U1,
    V1V1,
    U3U3,
    U3V3,
    V3U3,
    V3V3,
}

impl Dispatch {
    /// Tag for a single operand of `storage` with `components`.
    pub fn single(storage: ValueStorage, components: usize) -> Dispatch {
        let varying = storage == ValueStorage::Varying;
        match (varying, components) {
            (false, 1) => Dispatch::U1,
            (false, 3) => Dispatch::U3,
            (false, 16) => Dispatch::U16,
            (true, 1) => Dispatch::V1,
            (true, 3) => Dispatch::V3,
            (true, 16) => Dispatch::V16,
            _ => panic!("no dispatch shape for {components} components"),
        }
    }

    /// Tag for a binary operand pair. The semantic analyzer has already
    /// matched component counts by inserting conversions.
    pub fn pair(lhs: ValueStorage, rhs: ValueStorage, components: usize) -> Dispatch {
        let l = lhs == ValueStorage::Varying;
        let r = rhs == ValueStorage::Varying;
        match (l, r, components) {
            (false, false, 1) => Dispatch::U1U1,
            (false, true, 1) => Dispatch::U1V1,
            (true, false, 1) => Dispatch::V1U1,
            (true, true, 1) => Dispatch::V1V1,
            (false, false, 3) => Dispatch::U3U3,
            (false, true, 3) => Dispatch::U3V3,
            (true, false, 3) => Dispatch::V3U3,
            (true, true, 3) => Dispatch::V3V3,
            _ => panic!("no dispatch shape for {components}-component pair"),
        }
    }

    /// Component count of the operands.
    pub fn components(self) -> usize {
        match self {
            Dispatch::None => 0,
            Dispatch::U1 | Dispatch::V1 => 1,
            Dispatch::U3 | Dispatch::V3 => 3,
            Dispatch::U16 | Dispatch::V16 => 16,
            Dispatch::U1U1 | Dispatch::U1V1 | Dispatch::V1U1 | Dispatch::V1V1 => 1,
            Dispatch::U3U3 | Dispatch::U3V3 | Dispatch::V3U3 | Dispatch::V3V3 => 3,
        }
    }

    /// Whether any operand is varying, i.e. whether the result is.
    pub fn varying(self) -> bool {
        matches!(
            self,
            Dispatch::V1
                | Dispatch::V3
                | Dispatch::V16
                | Dispatch::U1V1
                | Dispatch::V1U1
                | Dispatch::V1V1
                | Dispatch::U3V3
                | Dispatch::V3U3
                | Dispatch::V3V3
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Dispatch::None => "",
            Dispatch::U1 => "u1",
            Dispatch::U3 => "u3",
            Dispatch::U16 => "u16",
            Dispatch::V1 => "v1",
            Dispatch::V3 => "v3",
            Dispatch::V16 => "v16",
            Dispatch::U1U1 => "u1u1",
            Dispatch::U1V1 => "u1v1",
            Dispatch::V1U1 => "v1u1",
            Dispatch::V1V1 => "v1v1",
            Dispatch::U3U3 => "u3u3",
            Dispatch::U3V3 => "u3v3",
            Dispatch::V3U3 => "v3u3",
            Dispatch::V3V3 => "v3v3",
        }
    }
}

/// Append-only instruction stream writer used by the code generator.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
}

impl CodeBuffer {
    pub fn new() -> CodeBuffer {
        CodeBuffer::default()
    }

    /// Current write position, used for jump targets and fragment
    /// addresses.
    pub fn address(&self) -> usize {
        self.bytes.len()
    }

    pub fn op(&mut self, opcode: Opcode, dispatch: Dispatch) {
        self.bytes.push(opcode as u8);
        self.bytes.push(dispatch as u8);
    }

    /// Opcode word with a raw dispatch byte; the `call` opcode stores
    /// its argument count there.
    pub fn op_raw(&mut self, opcode: Opcode, dispatch: u8) {
        self.bytes.push(opcode as u8);
        self.bytes.push(dispatch);
    }

    pub fn reg(&mut self, register: u32) {
        self.bytes.extend_from_slice(&register.to_le_bytes());
    }

    /// Single-byte operand (the `convert` opcode's target type).
    pub fn byte(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    /// Reserve a branch offset slot; returns its position for
    /// [`CodeBuffer::patch`].
    pub fn offset_slot(&mut self) -> usize {
        let at = self.bytes.len();
        self.bytes.extend_from_slice(&0i32.to_le_bytes());
        at
    }

    /// Point the offset slot at `at` to the absolute address `target`.
    /// Offsets are relative to the byte just past the slot.
    pub fn patch(&mut self, at: usize, target: usize) {
        let base = at + 4;
        let distance = target as i64 - base as i64;
        self.bytes[at..at + 4].copy_from_slice(&(distance as i32).to_le_bytes());
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Decoder over an instruction stream; shared by the VM fetch loop and
/// the disassembler.
pub struct CodeReader<'a> {
    code: &'a [u8],
    pc: usize,
}

impl<'a> CodeReader<'a> {
    pub fn new(code: &'a [u8], pc: usize) -> CodeReader<'a> {
        CodeReader { code, pc }
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn at_end(&self, end: usize) -> bool {
        self.pc >= end
    }

    /// Fetch the next opcode word with the dispatch byte undecoded;
    /// for `call` it is an argument count, not a shape tag.
    pub fn op_raw(&mut self) -> (Opcode, u8) {
        let opcode = Opcode::try_from(self.code[self.pc]).expect("unknown opcode");
        let dispatch = self.code[self.pc + 1];
        self.pc += 2;
        (opcode, dispatch)
    }

    /// Fetch the next opcode word.
    pub fn op(&mut self) -> (Opcode, Dispatch) {
        let (opcode, dispatch) = self.op_raw();
        let dispatch = Dispatch::try_from(dispatch).expect("unknown dispatch tag");
        (opcode, dispatch)
    }

    pub fn reg(&mut self) -> u32 {
        let bytes: [u8; 4] = self.code[self.pc..self.pc + 4].try_into().unwrap();
        self.pc += 4;
        u32::from_le_bytes(bytes)
    }

    pub fn byte(&mut self) -> u8 {
        let byte = self.code[self.pc];
        self.pc += 1;
        byte
    }

    /// Fetch a branch offset and resolve it against the current position.
    pub fn target(&mut self) -> usize {
        let bytes: [u8; 4] = self.code[self.pc..self.pc + 4].try_into().unwrap();
        self.pc += 4;
        let distance = i32::from_le_bytes(bytes) as i64;
        (self.pc as i64 + distance) as usize
    }

    pub fn jump_to(&mut self, target: usize) {
        self.pc = target;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_word_round_trips() {
        let mut code = CodeBuffer::new();
        code.op(Opcode::Multiply, Dispatch::V3V3);
        code.reg(7);
        code.reg(1);
        code.reg(2);
        let bytes = code.finish();

        let mut reader = CodeReader::new(&bytes, 0);
        assert_eq!(reader.op(), (Opcode::Multiply, Dispatch::V3V3));
        assert_eq!(reader.reg(), 7);
        assert_eq!(reader.reg(), 1);
        assert_eq!(reader.reg(), 2);
        assert!(reader.at_end(bytes.len()));
    }

    #[test]
    fn branch_offsets_resolve_forward_and_back() {
        let mut code = CodeBuffer::new();
        code.op(Opcode::Jump, Dispatch::None);
        let slot = code.offset_slot();
        code.op(Opcode::Halt, Dispatch::None);
        let target = code.address();
        code.op(Opcode::Halt, Dispatch::None);
        code.patch(slot, target);
        let bytes = code.finish();

        let mut reader = CodeReader::new(&bytes, 0);
        assert_eq!(reader.op().0, Opcode::Jump);
        let resolved = reader.target();
        assert_eq!(resolved, target);
    }

    #[test]
    fn dispatch_shapes_classify_storage() {
        use crate::value::ValueStorage::*;
        assert_eq!(Dispatch::pair(Uniform, Varying, 3), Dispatch::U3V3);
        assert_eq!(Dispatch::pair(Constant, Uniform, 1), Dispatch::U1U1);
        assert!(Dispatch::U3V3.varying());
        assert!(!Dispatch::U1U1.varying());
        assert_eq!(Dispatch::V3V3.components(), 3);
    }
}
