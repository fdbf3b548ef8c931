//! Bytecode generation.
//!
//! Walks the annotated tree and emits the two code fragments of a
//! shader: the parameter initializer and the shade body. Registers are
//! planned here: the constant pool occupies the lowest indices, named
//! symbols come next, and expression temporaries are allocated above
//! `permanent_registers` by a high-water-mark counter that resets at
//! statement boundaries (the `reset` opcode records each reset for the
//! VM).
//!
//! Control flow lowers onto the mask stack. The mask stack depth always
//! equals the static nesting depth: `jump_empty` pops the mask it tested
//! when it branches, and every loop back-edge clears the iteration's
//! mask before jumping. `break n` and `continue n` emit the run of
//! `clear_mask` ops needed to cross `n` levels.

use crate::compile::ast::{NodeKind, SyntaxNode};
use crate::compile::semantic::Analysis;
use crate::error::ErrorLog;
use crate::shader::{Shader, ShaderKind, Symbol, SymbolKind};
use crate::value::{ValueStorage, ValueType};
use crate::vm::instruction::{CodeBuffer, Dispatch, Opcode};
use crate::vm::mask::MASK_STACK_RESERVE;

/// Generate bytecode for an analyzed shader definition.
pub fn generate(
    kind: ShaderKind,
    node: &SyntaxNode,
    analysis: Analysis,
    errors: &mut ErrorLog,
) -> Shader {
    let Analysis {
        mut symbols,
        constants,
        parameters,
    } = analysis;

    // Register plan: constants, then every named symbol in declaration
    // order. Intrinsics are referenced by symbol index, not register.
    let mut register = constants.len() as u32;
    for symbol in &mut symbols {
        if symbol.kind() != SymbolKind::Intrinsic {
            symbol.set_register(register);
            register += 1;
        }
    }
    let permanent_registers = register as usize;

    let mut generator = Generator {
        code: CodeBuffer::new(),
        symbols: &symbols,
        errors,
        temp: register,
        temp_base: register,
        max_register: register,
        mask_depth: 0,
        loops: Vec::new(),
    };

    // Initialize fragment: parameter defaults.
    let initialize_address = generator.code.address();
    for formal in &node.child(0).children {
        if formal.kind == NodeKind::Variable && formal.child(0).kind != NodeKind::Null {
            generator.statement_boundary();
            let source = generator.expression(formal.child(0));
            generator.assign_to_symbol(formal.symbol.unwrap(), source, formal.child(0));
        }
    }

    // Shade fragment: the body.
    let shade_address = generator.code.address();
    generator.statement(node.child(1));
    generator.code.op(Opcode::Halt, Dispatch::None);

    let registers = generator.max_register as usize;
    let code = generator.code.finish();
    Shader::new(
        kind,
        node.lexeme.clone(),
        symbols,
        constants,
        code,
        initialize_address,
        shade_address,
        parameters,
        permanent_registers,
        registers,
    )
}

struct LoopScope {
    /// Mask stack depth just after the loop pushed its own mask.
    mask_depth: usize,
    /// `jump` slots waiting for the loop's continue point.
    continue_patches: Vec<usize>,
    /// `jump` slots waiting for the loop's end.
    break_patches: Vec<usize>,
}

struct Generator<'a> {
    code: CodeBuffer,
    symbols: &'a [Symbol],
    errors: &'a mut ErrorLog,
    temp: u32,
    /// Where the temporary counter returns to at statement boundaries.
    temp_base: u32,
    max_register: u32,
    mask_depth: usize,
    loops: Vec<LoopScope>,
}

impl Generator<'_> {
    fn alloc_temp(&mut self) -> u32 {
        let register = self.temp;
        self.temp += 1;
        self.max_register = self.max_register.max(self.temp);
        register
    }

    /// Reset the temporary counter; emitted at the start of every
    /// simple statement so expression temporaries never accumulate.
    fn statement_boundary(&mut self) {
        self.temp = self.temp_base;
        self.code.op(Opcode::Reset, Dispatch::None);
        self.code.reg(self.temp_base);
    }

    fn register_of(&self, symbol: usize) -> u32 {
        self.symbols[symbol].register()
    }

    /// Register bound to a light-scope name (`L`, `Cl`, `Ol`, `Ps`).
    /// The analyzer declared these while walking the body.
    fn light_register(&mut self, name: &str, line: u32) -> u32 {
        match self
            .symbols
            .iter()
            .find(|s| s.name() == name && s.kind() != SymbolKind::Intrinsic)
        {
            Some(symbol) => symbol.register(),
            None => {
                self.errors
                    .error(line, format!("'{name}' is not bound in this shader"));
                0
            }
        }
    }

    fn push_mask(&mut self, condition: u32, line: u32) {
        if self.mask_depth >= MASK_STACK_RESERVE {
            self.errors
                .error(line, "Masked statements are nested too deeply");
        }
        self.code.op(Opcode::GenerateMask, Dispatch::None);
        self.code.reg(condition);
        self.mask_depth += 1;
    }

    fn clear_mask(&mut self) {
        self.code.op(Opcode::ClearMask, Dispatch::None);
        self.mask_depth -= 1;
    }

    // ── Statements ───────────────────────────────────────────────────

    fn statement(&mut self, node: &SyntaxNode) {
        match node.kind {
            NodeKind::Null => {}
            NodeKind::Ambient => self.ambient(node),
            NodeKind::List => {
                for child in &node.children {
                    self.statement(child);
                }
            }
            NodeKind::Variable => {
                if node.child(0).kind != NodeKind::Null {
                    self.statement_boundary();
                    let source = self.expression(node.child(0));
                    self.assign_to_symbol(node.symbol.unwrap(), source, node.child(0));
                }
            }
            NodeKind::Assign
            | NodeKind::AddAssign
            | NodeKind::SubtractAssign
            | NodeKind::MultiplyAssign
            | NodeKind::DivideAssign => {
                self.statement_boundary();
                let Some(symbol) = node.symbol else {
                    return;
                };
                let source = self.expression(node.child(0));
                let opcode = match node.kind {
                    NodeKind::Assign => {
                        self.assign_to_symbol(symbol, source, node.child(0));
                        return;
                    }
                    NodeKind::AddAssign => Opcode::AddAssign,
                    NodeKind::SubtractAssign => Opcode::SubtractAssign,
                    NodeKind::MultiplyAssign => Opcode::MultiplyAssign,
                    NodeKind::DivideAssign => Opcode::DivideAssign,
                    _ => unreachable!(),
                };
                let child = node.child(0);
                let dispatch =
                    Dispatch::single(child.storage, child.ty.element_floats().max(1));
                self.code.op(opcode, dispatch);
                self.code.reg(self.register_of(symbol));
                self.code.reg(source);
            }
            NodeKind::If => {
                self.statement_boundary();
                let condition = self.expression(node.child(0));
                self.push_mask(condition, node.line);
                self.statement(node.child(1));
                self.clear_mask();
            }
            NodeKind::IfElse => {
                self.statement_boundary();
                let condition = self.expression(node.child(0));
                self.push_mask(condition, node.line);
                self.statement(node.child(1));
                self.code.op(Opcode::InvertMask, Dispatch::None);
                self.statement(node.child(2));
                self.clear_mask();
            }
            NodeKind::While => {
                self.while_loop(node.child(0), None, node.child(1), node.line);
            }
            NodeKind::For => {
                self.statement(node.child(0));
                self.while_loop(node.child(1), Some(node.child(2)), node.child(3), node.line);
            }
            NodeKind::Break => self.jump_out(node, true),
            NodeKind::Continue => self.jump_out(node, false),
            NodeKind::Return => {
                // Shaders communicate through their output globals; a
                // return value has nowhere to go.
                if !node.children.is_empty() {
                    self.errors
                        .error(node.line, "Shaders cannot return a value");
                }
            }
            NodeKind::Solar => self.solar(node),
            NodeKind::Illuminate => self.illuminate(node),
            NodeKind::Illuminance => self.illuminance(node),
            _ => {
                // Expression statement evaluated for its side effects.
                self.statement_boundary();
                self.expression(node);
            }
        }
    }

    /// Shared lowering for `while` and desugared `for` (which carries an
    /// increment to run at the continue point).
    fn while_loop(
        &mut self,
        condition: &SyntaxNode,
        increment: Option<&SyntaxNode>,
        body: &SyntaxNode,
        line: u32,
    ) {
        let top = self.code.address();
        self.statement_boundary();
        let condition_register = self.expression(condition);
        self.push_mask(condition_register, line);
        self.code.op(Opcode::JumpEmpty, Dispatch::None);
        let exit_slot = self.code.offset_slot();

        self.loops.push(LoopScope {
            mask_depth: self.mask_depth,
            continue_patches: Vec::new(),
            break_patches: Vec::new(),
        });
        self.statement(body);
        let scope = self.loops.pop().unwrap();

        // Continue point: run the for-increment, drop this iteration's
        // mask, and jump back to re-evaluate the condition.
        let continue_address = self.code.address();
        for slot in scope.continue_patches {
            self.code.patch(slot, continue_address);
        }
        if let Some(increment) = increment {
            self.statement(increment);
        }
        self.clear_mask();
        self.code.op(Opcode::Jump, Dispatch::None);
        let back_slot = self.code.offset_slot();
        self.code.patch(back_slot, top);

        let end = self.code.address();
        self.code.patch(exit_slot, end);
        for slot in scope.break_patches {
            self.code.patch(slot, end);
        }
    }

    /// `break [n]` / `continue [n]`: clear the masks of the levels being
    /// crossed, then jump to the target loop's end or continue point.
    fn jump_out(&mut self, node: &SyntaxNode, is_break: bool) {
        let what = if is_break { "Break" } else { "Continue" };
        let level: usize = node
            .children
            .first()
            .and_then(|c| c.lexeme.parse().ok())
            .unwrap_or(1);
        if self.loops.is_empty() {
            self.errors
                .error(node.line, format!("{what} outside of a loop"));
            return;
        }
        if level == 0 || level > self.loops.len() {
            self.errors
                .error(node.line, format!("{what} to a level outside of a loop"));
            return;
        }
        let target_index = self.loops.len() - level;
        let target_depth = self.loops[target_index].mask_depth;
        // A break pops the target loop's own mask too; a continue leaves
        // it for the continue point's clear.
        let pops = if is_break {
            self.mask_depth - target_depth + 1
        } else {
            self.mask_depth - target_depth
        };
        for _ in 0..pops {
            self.code.op(Opcode::ClearMask, Dispatch::None);
        }
        self.code.op(Opcode::Jump, Dispatch::None);
        let slot = self.code.offset_slot();
        let scope = &mut self.loops[target_index];
        if is_break {
            scope.break_patches.push(slot);
        } else {
            scope.continue_patches.push(slot);
        }
    }

    fn ambient(&mut self, node: &SyntaxNode) {
        let cl = self.light_register("Cl", node.line);
        let ol = self.light_register("Ol", node.line);
        self.code.op(Opcode::Ambient, Dispatch::None);
        self.code.reg(cl);
        self.code.reg(ol);
    }

    fn solar(&mut self, node: &SyntaxNode) {
        let arguments = node.child(0);
        self.statement_boundary();
        let axis = self.expression(arguments.child(0));
        let angle = self.expression(arguments.child(1));
        let cl = self.light_register("Cl", node.line);
        let ol = self.light_register("Ol", node.line);
        self.code.op(Opcode::SolarAxisAngle, Dispatch::None);
        self.code.reg(axis);
        self.code.reg(angle);
        self.code.reg(cl);
        self.code.reg(ol);
        self.statement(node.child(1));
    }

    fn illuminate(&mut self, node: &SyntaxNode) {
        let arguments = node.child(0);
        self.statement_boundary();
        let position = self.expression(arguments.child(0));
        let axis_angle = if arguments.children.len() == 3 {
            let axis = self.expression(arguments.child(1));
            let angle = self.expression(arguments.child(2));
            Some((axis, angle))
        } else {
            None
        };
        let ps = self.light_register("Ps", node.line);
        let l = self.light_register("L", node.line);
        let cl = self.light_register("Cl", node.line);
        let ol = self.light_register("Ol", node.line);
        match axis_angle {
            None => {
                self.code.op(Opcode::Illuminate, Dispatch::None);
                self.code.reg(position);
            }
            Some((axis, angle)) => {
                self.code.op(Opcode::IlluminateAxisAngle, Dispatch::None);
                self.code.reg(position);
                self.code.reg(axis);
                self.code.reg(angle);
            }
        }
        self.code.reg(ps);
        self.code.reg(l);
        self.code.reg(cl);
        self.code.reg(ol);
        self.statement(node.child(1));
    }

    /// The per-light loop: `jump_illuminance` steps the VM's light
    /// index (skipping ambient lights) and exits when none remain; the
    /// cone mask gates the body.
    fn illuminance(&mut self, node: &SyntaxNode) {
        let arguments = node.child(0);
        self.statement_boundary();
        let position = self.expression(arguments.child(0));
        let axis = self.expression(arguments.child(1));
        let angle = self.expression(arguments.child(2));
        let l = self.light_register("L", node.line);
        let cl = self.light_register("Cl", node.line);
        let ol = self.light_register("Ol", node.line);

        // The position/axis/angle temporaries stay live across the
        // whole loop; body statements reset above them.
        let saved_base = self.temp_base;
        self.temp_base = self.temp;

        let top = self.code.address();
        self.code.op(Opcode::JumpIlluminance, Dispatch::None);
        let exit_slot = self.code.offset_slot();

        let mask = self.alloc_temp();
        self.code.op(Opcode::IlluminanceAxisAngle, Dispatch::None);
        self.code.reg(mask);
        self.code.reg(position);
        self.code.reg(axis);
        self.code.reg(angle);
        self.code.reg(l);
        self.code.reg(cl);
        self.code.reg(ol);
        self.push_mask(mask, node.line);

        self.statement(node.child(1));

        self.clear_mask();
        self.code.op(Opcode::Jump, Dispatch::None);
        let back_slot = self.code.offset_slot();
        self.code.patch(back_slot, top);
        let end = self.code.address();
        self.code.patch(exit_slot, end);

        self.temp_base = saved_base;
        self.temp = saved_base;
    }

    /// Plain assignment into a named symbol's register.
    fn assign_to_symbol(&mut self, symbol: usize, source: u32, value: &SyntaxNode) {
        let target = self.register_of(symbol);
        if value.ty == ValueType::String {
            self.code.op(Opcode::AssignString, Dispatch::None);
        } else {
            let dispatch = Dispatch::single(value.storage, value.ty.element_floats().max(1));
            self.code.op(Opcode::Assign, dispatch);
        }
        self.code.reg(target);
        self.code.reg(source);
    }

    // ── Expressions ──────────────────────────────────────────────────

    /// Emit code for an expression; returns the register holding its
    /// value.
    fn expression(&mut self, node: &SyntaxNode) -> u32 {
        match node.kind {
            NodeKind::Integer | NodeKind::Real | NodeKind::String => {
                node.constant.expect("literal without a pool entry") as u32
            }
            NodeKind::Triple => {
                // Literal triples folded into the constant pool; the
                // analyzer rewrote every other triple into component
                // calls.
                node.constant.expect("unfolded triple") as u32
            }
            NodeKind::Identifier => {
                let Some(symbol) = node.symbol else {
                    return 0;
                };
                self.register_of(symbol)
            }
            NodeKind::Convert => {
                let source = self.expression(node.child(0));
                let result = self.alloc_temp();
                let dispatch =
                    Dispatch::single(node.child(0).storage, node.ty.element_floats());
                self.code.op(Opcode::Convert, dispatch);
                self.code.byte(node.ty as u8);
                self.code.reg(result);
                self.code.reg(source);
                result
            }
            NodeKind::Promote => {
                let source = self.expression(node.child(0));
                let result = self.alloc_temp();
                let dispatch = Dispatch::single(
                    ValueStorage::Varying,
                    node.ty.element_floats().max(1),
                );
                self.code.op(Opcode::Promote, dispatch);
                self.code.reg(result);
                self.code.reg(source);
                result
            }
            NodeKind::Negate => {
                let source = self.expression(node.child(0));
                let result = self.alloc_temp();
                let dispatch = Dispatch::single(
                    node.child(0).storage,
                    node.child(0).ty.element_floats().max(1),
                );
                self.code.op(Opcode::Negate, dispatch);
                self.code.reg(result);
                self.code.reg(source);
                result
            }
            NodeKind::Add
            | NodeKind::Subtract
            | NodeKind::Multiply
            | NodeKind::Divide
            | NodeKind::Greater
            | NodeKind::GreaterEqual
            | NodeKind::Less
            | NodeKind::LessEqual
            | NodeKind::Equal
            | NodeKind::NotEqual
            | NodeKind::And
            | NodeKind::Or => self.binary(node),
            NodeKind::Dot => {
                let lhs = self.expression(node.child(0));
                let rhs = self.expression(node.child(1));
                let result = self.alloc_temp();
                let dispatch =
                    Dispatch::pair(node.child(0).storage, node.child(1).storage, 3);
                self.code.op(Opcode::Dot, dispatch);
                self.code.reg(result);
                self.code.reg(lhs);
                self.code.reg(rhs);
                result
            }
            NodeKind::Typecast => self.typecast(node),
            NodeKind::Call => self.call(node),
            NodeKind::Texture | NodeKind::Environment | NodeKind::Shadow => self.texture(node),
            NodeKind::Null => 0,
            _ => {
                self.errors
                    .error(node.line, "Internal error: unexpected expression node");
                0
            }
        }
    }

    fn binary(&mut self, node: &SyntaxNode) -> u32 {
        let lhs = self.expression(node.child(0));
        let rhs = self.expression(node.child(1));
        let result = self.alloc_temp();
        let opcode = match node.kind {
            NodeKind::Add => Opcode::Add,
            NodeKind::Subtract => Opcode::Subtract,
            NodeKind::Multiply => Opcode::Multiply,
            NodeKind::Divide => Opcode::Divide,
            NodeKind::Greater => Opcode::Greater,
            NodeKind::GreaterEqual => Opcode::GreaterEqual,
            NodeKind::Less => Opcode::Less,
            NodeKind::LessEqual => Opcode::LessEqual,
            NodeKind::Equal => Opcode::Equal,
            NodeKind::NotEqual => Opcode::NotEqual,
            NodeKind::And => Opcode::And,
            NodeKind::Or => Opcode::Or,
            _ => unreachable!(),
        };
        // Comparisons and logical ops dispatch over their operand
        // shapes, not the integer result.
        let components = match node.kind {
            NodeKind::Equal | NodeKind::NotEqual => {
                node.child(0).ty.element_floats().max(1)
            }
            NodeKind::And | NodeKind::Or => 1,
            NodeKind::Greater
            | NodeKind::GreaterEqual
            | NodeKind::Less
            | NodeKind::LessEqual => 1,
            _ => node.ty.element_floats().max(1),
        };
        let dispatch = Dispatch::pair(node.child(0).storage, node.child(1).storage, components);
        self.code.op(opcode, dispatch);
        self.code.reg(result);
        self.code.reg(lhs);
        self.code.reg(rhs);
        result
    }

    fn typecast(&mut self, node: &SyntaxNode) -> u32 {
        let type_node = node.child(0);
        let source = self.expression(node.child(1));
        if type_node.children.is_empty() {
            // A pure retyping; any float widening was spliced in by the
            // analyzer.
            return source;
        }
        // A cast with a coordinate system transforms out of that space.
        let space = type_node.child(0).constant.expect("space without a pool entry") as u32;
        let result = self.alloc_temp();
        let opcode = match node.ty {
            ValueType::Point => Opcode::TransformPoint,
            ValueType::Vector => Opcode::TransformVector,
            ValueType::Normal => Opcode::TransformNormal,
            ValueType::Color => Opcode::TransformColor,
            ValueType::Matrix => Opcode::TransformMatrix,
            _ => {
                self.errors
                    .error(node.line, "Coordinate systems apply to geometric types");
                return source;
            }
        };
        self.code.op(opcode, Dispatch::None);
        self.code.reg(result);
        self.code.reg(space);
        self.code.reg(source);
        result
    }

    fn call(&mut self, node: &SyntaxNode) -> u32 {
        let Some(symbol) = node.symbol else {
            return 0;
        };
        let arguments: Vec<u32> = node
            .children
            .iter()
            .map(|child| self.expression(child))
            .collect();
        let result = self.alloc_temp();
        self.code
            .op_raw(Opcode::Call, arguments.len() as u8);
        self.code.reg(result);
        self.code.reg(symbol as u32);
        for argument in arguments {
            self.code.reg(argument);
        }
        result
    }

    fn texture(&mut self, node: &SyntaxNode) -> u32 {
        let registers: Vec<u32> = node
            .children
            .iter()
            .map(|child| self.expression(child))
            .collect();
        let result = self.alloc_temp();
        let opcode = match (node.kind, node.ty.is_triple()) {
            (NodeKind::Texture, false) => Opcode::FloatTexture,
            (NodeKind::Texture, true) => Opcode::Vec3Texture,
            (NodeKind::Environment, false) => Opcode::FloatEnvironment,
            (NodeKind::Environment, true) => Opcode::Vec3Environment,
            (NodeKind::Shadow, _) => Opcode::Shadow,
            _ => unreachable!(),
        };
        self.code.op(opcode, Dispatch::None);
        self.code.reg(result);
        for register in registers {
            self.code.reg(register);
        }
        result
    }
}
