//! The virtual machine.
//!
//! A register-based interpreter that runs compiled shaders over grids of
//! surface samples. The register file is a vector of value-buffer
//! handles: constants and named values at permanent indices, expression
//! temporaries above them. Divergent control flow is SIMT-style — a
//! stack of per-vertex masks gates every varying write.
//!
//! A VM is a per-thread object that borrows the renderer, shader, and
//! grid only for the duration of one call; parallelism comes from
//! running independent VMs over independent grids.

pub mod instruction;
pub mod intrinsics;
pub mod kernels;
pub mod mask;

use std::cell::RefCell;
use std::rc::Rc;

use crate::grid::Grid;
use crate::light::{Light, LightKind};
use crate::math::{Mat4, Vec3};
use crate::render::RenderContext;
use crate::shader::Shader;
use crate::value::{Value, ValueRef, ValueStorage, ValueType};
use self::instruction::{CodeReader, Dispatch, Opcode};
use self::intrinsics::{IntrinsicCtx, Random};
use self::mask::{ConditionMask, MASK_STACK_RESERVE};

/// A light shader and the parameter grid `initialize` populated for it.
#[derive(Clone, Copy)]
pub struct LightSource<'a> {
    pub shader: &'a Shader,
    pub parameters: &'a Grid,
}

/// One shader interpreter.
pub struct VirtualMachine<'r> {
    renderer: &'r dyn RenderContext,
    /// Persistent buffers backing registers not bound to a grid value;
    /// grows to the largest register file seen.
    pool: Vec<ValueRef>,
    random: Random,
}

impl<'r> VirtualMachine<'r> {
    pub fn new(renderer: &'r dyn RenderContext) -> VirtualMachine<'r> {
        VirtualMachine {
            renderer,
            pool: Vec::new(),
            random: Random::default(),
        }
    }

    /// Run a shader's initializer fragment against its parameter grid,
    /// installing default parameter values.
    pub fn initialize(&mut self, parameters: &mut Grid, shader: &Shader) {
        log::debug!("initialize {} ({})", shader.name(), shader.kind().name());
        for symbol in shader.symbols().iter().take(shader.parameters()) {
            if parameters.find_value(symbol.name()).is_none() {
                parameters.add_value(symbol.name(), symbol.ty());
            }
        }
        let mut registers = self.construct(shader);
        bind_registers(&mut registers, parameters, shader);
        let shader_transform = parameters.transform();
        self.run(
            &mut registers,
            parameters,
            shader,
            shader_transform,
            shader.initialize_address(),
            shader.shade_address(),
        );
    }

    /// Run a shader's shade fragment over `globals`, binding registers
    /// from the parameter grid first so grid values shadow defaults.
    pub fn shade(&mut self, globals: &mut Grid, parameters: &Grid, shader: &Shader) {
        log::debug!(
            "shade {} over {}x{}",
            shader.name(),
            globals.width(),
            globals.height()
        );
        let mut registers = self.construct(shader);
        bind_registers(&mut registers, parameters, shader);
        bind_registers(&mut registers, globals, shader);
        self.run(
            &mut registers,
            globals,
            shader,
            parameters.transform(),
            shader.shade_address(),
            shader.end_address(),
        );
    }

    /// Run every light shader against a fresh grid the size of
    /// `surface`, with `Ps` carrying the surface positions, and lift the
    /// produced light records onto the surface grid.
    ///
    /// `Ps` is copied, not aliased, so a light shader cannot disturb the
    /// surface's `P`.
    pub fn shade_lights(&mut self, surface: &mut Grid, lights: &[LightSource<'_>]) {
        for light in lights {
            let mut light_grid = Grid::new();
            light_grid.resize(surface.width(), surface.height());
            if let Some(p) = surface.find_value("P") {
                light_grid.copy_value("Ps", p);
            }
            self.shade(&mut light_grid, light.parameters, light.shader);
            for record in light_grid.lights() {
                surface.add_light(Rc::clone(record));
            }
        }
    }

    /// The full surface-shading protocol: normals, lights, output and
    /// input globals, then the surface shader itself.
    pub fn shade_surface(
        &mut self,
        grid: &mut Grid,
        parameters: &Grid,
        shader: &Shader,
        lights: &[LightSource<'_>],
    ) {
        let attributes = self.renderer.attributes().clone();
        grid.generate_normals(attributes.geometry_left_handed, false);
        self.shade_lights(grid, lights);

        for name in ["Ci", "Oi"] {
            let value = grid.value(name, ValueType::Color);
            let mut value = value.borrow_mut();
            value.reset(ValueType::Color, ValueStorage::Varying, grid.size());
            value.zero();
        }
        if grid.find_value("I").is_none() {
            let p = grid.find_value("P").map(Rc::clone);
            if let Some(p) = p {
                grid.insert_value("I", p);
            }
        }
        for (name, fill) in [("Cs", attributes.color), ("Os", attributes.opacity)] {
            let value = grid.value(name, ValueType::Color);
            let mut value = value.borrow_mut();
            value.reset(ValueType::Color, ValueStorage::Varying, grid.size());
            for out in value.vec3s_mut() {
                *out = fill;
            }
        }

        self.shade(grid, parameters, shader);
    }

    /// Displacement protocol: normals before, shade, regenerate after.
    pub fn shade_displacement(&mut self, grid: &mut Grid, parameters: &Grid, shader: &Shader) {
        let left_handed = self.renderer.attributes().geometry_left_handed;
        grid.generate_normals(left_handed, false);
        self.shade(grid, parameters, shader);
        grid.generate_normals(left_handed, true);
    }

    /// Build the register file: constants at the bottom, pool-backed
    /// buffers everywhere else until grids are bound over them.
    fn construct(&mut self, shader: &Shader) -> Vec<ValueRef> {
        while self.pool.len() < shader.registers() {
            self.pool.push(Rc::new(RefCell::new(Value::new())));
        }
        let mut registers = Vec::with_capacity(shader.registers());
        for constant in shader.constants() {
            registers.push(Rc::new(RefCell::new(constant.clone())));
        }
        for index in shader.constants().len()..shader.registers() {
            registers.push(Rc::clone(&self.pool[index]));
        }
        registers
    }

    fn run(
        &mut self,
        registers: &mut Vec<ValueRef>,
        grid: &mut Grid,
        shader: &Shader,
        shader_transform: Mat4,
        start: usize,
        end: usize,
    ) {
        let mut execution = Execution {
            renderer: self.renderer,
            shader,
            grid,
            registers,
            masks: Vec::with_capacity(MASK_STACK_RESERVE),
            random: &mut self.random,
            shader_transform,
            light_index: usize::MAX,
        };
        execution.run(start, end);
    }
}

struct Execution<'a> {
    renderer: &'a dyn RenderContext,
    shader: &'a Shader,
    grid: &'a mut Grid,
    registers: &'a mut Vec<ValueRef>,
    masks: Vec<ConditionMask>,
    random: &'a mut Random,
    /// Object-to-camera transform of the parameter grid; backs the
    /// "shader" coordinate system.
    shader_transform: Mat4,
    /// Index of the light an illuminance body is visiting;
    /// `usize::MAX` outside an illuminance loop.
    light_index: usize,
}

impl Execution<'_> {
    fn run(&mut self, start: usize, end: usize) {
        let code = self.shader.code();
        let mut reader = CodeReader::new(code, start);
        while !reader.at_end(end) {
            let (op, dispatch_byte) = reader.op_raw();
            match op {
                Opcode::Null => {}
                Opcode::Halt => reader.jump_to(end),
                Opcode::Reset => {
                    let index = reader.reg();
                    debug_assert!(index as usize >= self.shader.permanent_registers());
                }
                Opcode::ClearMask => {
                    self.masks.pop();
                }
                Opcode::GenerateMask => {
                    let condition = reader.reg();
                    let condition = self.registers[condition as usize].borrow();
                    let mask = match self.masks.last() {
                        Some(enclosing) => ConditionMask::generate_and(&condition, enclosing),
                        None => ConditionMask::generate(&condition),
                    };
                    self.masks.push(mask);
                }
                Opcode::InvertMask => {
                    self.masks.last_mut().expect("invert with no mask").invert();
                }
                Opcode::JumpEmpty => {
                    let target = reader.target();
                    if self.masks.last().is_none_or(|m| m.is_empty()) {
                        reader.jump_to(target);
                        self.masks.pop();
                    }
                }
                Opcode::JumpNotEmpty => {
                    let target = reader.target();
                    if self.masks.last().is_some_and(|m| !m.is_empty()) {
                        reader.jump_to(target);
                    }
                }
                Opcode::JumpIlluminance => {
                    let target = reader.target();
                    self.jump_illuminance(&mut reader, target);
                }
                Opcode::Jump => {
                    let target = reader.target();
                    reader.jump_to(target);
                }
                Opcode::TransformPoint => self.transform(&mut reader, TransformKind::Point),
                Opcode::TransformVector => self.transform(&mut reader, TransformKind::Vector),
                Opcode::TransformNormal => self.transform(&mut reader, TransformKind::Normal),
                Opcode::TransformColor => {
                    let result = reader.reg() as usize;
                    let space = reader.reg() as usize;
                    let source = reader.reg() as usize;
                    let (result, space, source) = (
                        Rc::clone(&self.registers[result]),
                        Rc::clone(&self.registers[space]),
                        Rc::clone(&self.registers[source]),
                    );
                    let mut ctx = self.intrinsic_ctx();
                    intrinsics::color::ctransform(&mut ctx, &result, &[space, source]);
                }
                Opcode::TransformMatrix => {
                    let result = reader.reg() as usize;
                    let space = reader.reg() as usize;
                    let source = reader.reg() as usize;
                    let m = self.space_to(self.registers[space].borrow().string_value());
                    let source = self.registers[source].borrow();
                    let mut out = self.registers[result].borrow_mut();
                    out.reset(ValueType::Matrix, source.storage(), source.size());
                    for i in 0..source.size() {
                        out.set_matrix(i, m * source.matrix(i));
                    }
                }
                Opcode::Dot => {
                    let dispatch = Dispatch::try_from(dispatch_byte).expect("bad dispatch");
                    let result = reader.reg() as usize;
                    let lhs = reader.reg() as usize;
                    let rhs = reader.reg() as usize;
                    let length = self.result_length(dispatch);
                    let lhs = self.registers[lhs].borrow();
                    let rhs = self.registers[rhs].borrow();
                    let mut out = self.registers[result].borrow_mut();
                    out.reset(ValueType::Float, self.result_storage(dispatch), length);
                    kernels::dot(dispatch, out.raw_mut(), lhs.raw(), rhs.raw(), length);
                }
                Opcode::Multiply => self.arithmetic(&mut reader, dispatch_byte, |a, b| a * b),
                Opcode::Divide => self.arithmetic(&mut reader, dispatch_byte, |a, b| a / b),
                Opcode::Add => self.arithmetic(&mut reader, dispatch_byte, |a, b| a + b),
                Opcode::Subtract => self.arithmetic(&mut reader, dispatch_byte, |a, b| a - b),
                Opcode::Greater => self.comparison(&mut reader, dispatch_byte, |a, b| a > b),
                Opcode::GreaterEqual => {
                    self.comparison(&mut reader, dispatch_byte, |a, b| a >= b)
                }
                Opcode::Less => self.comparison(&mut reader, dispatch_byte, |a, b| a < b),
                Opcode::LessEqual => self.comparison(&mut reader, dispatch_byte, |a, b| a <= b),
                Opcode::Equal => self.equality(&mut reader, dispatch_byte, false),
                Opcode::NotEqual => self.equality(&mut reader, dispatch_byte, true),
                Opcode::And => self.logical(&mut reader, dispatch_byte, |a, b| a && b),
                Opcode::Or => self.logical(&mut reader, dispatch_byte, |a, b| a || b),
                Opcode::Negate => {
                    let dispatch = Dispatch::try_from(dispatch_byte).expect("bad dispatch");
                    let result = reader.reg() as usize;
                    let source = reader.reg() as usize;
                    let source = self.registers[source].borrow();
                    let mut out = self.registers[result].borrow_mut();
                    out.reset(source.ty(), source.storage(), source.size());
                    kernels::negate(dispatch, out.raw_mut(), source.raw(), source.size());
                }
                Opcode::Convert => {
                    let target = ValueType::try_from(reader.byte()).expect("bad convert type");
                    let result = reader.reg() as usize;
                    let source = reader.reg() as usize;
                    let source = self.registers[source].borrow();
                    let mut out = self.registers[result].borrow_mut();
                    out.reset(target, source.storage(), source.size());
                    if target == ValueType::Matrix {
                        kernels::convert_matrix(out.raw_mut(), source.raw(), source.size());
                    } else {
                        kernels::convert(
                            target.element_floats(),
                            out.raw_mut(),
                            source.raw(),
                            source.size(),
                        );
                    }
                }
                Opcode::Promote => {
                    let dispatch = Dispatch::try_from(dispatch_byte).expect("bad dispatch");
                    let result = reader.reg() as usize;
                    let source = reader.reg() as usize;
                    let length = self.grid.size();
                    let source = self.registers[source].borrow();
                    let mut out = self.registers[result].borrow_mut();
                    out.reset(source.ty(), ValueStorage::Varying, length);
                    kernels::promote(
                        dispatch.components(),
                        out.raw_mut(),
                        source.raw(),
                        length,
                    );
                }
                Opcode::Assign => {
                    let dispatch = Dispatch::try_from(dispatch_byte).expect("bad dispatch");
                    let target = reader.reg() as usize;
                    let source = reader.reg() as usize;
                    if Rc::ptr_eq(&self.registers[target], &self.registers[source]) {
                        continue;
                    }
                    let mask = self.write_mask(dispatch);
                    let source = self.registers[source].borrow();
                    let mut out = self.registers[target].borrow_mut();
                    out.reset(source.ty(), source.storage(), source.size());
                    kernels::assign(
                        dispatch.components(),
                        out.raw_mut(),
                        source.raw(),
                        mask.as_deref(),
                        source.size(),
                    );
                }
                Opcode::AddAssign => {
                    self.compound_assign(&mut reader, dispatch_byte, |a, b| a + b)
                }
                Opcode::SubtractAssign => {
                    self.compound_assign(&mut reader, dispatch_byte, |a, b| a - b)
                }
                Opcode::MultiplyAssign => {
                    self.compound_assign(&mut reader, dispatch_byte, |a, b| a * b)
                }
                Opcode::DivideAssign => {
                    self.compound_assign(&mut reader, dispatch_byte, |a, b| a / b)
                }
                Opcode::AssignString => {
                    let target = reader.reg() as usize;
                    let source = reader.reg() as usize;
                    if Rc::ptr_eq(&self.registers[target], &self.registers[source]) {
                        continue;
                    }
                    let text = self.registers[source].borrow().string_value().to_string();
                    self.registers[target].borrow_mut().set_string(&text);
                }
                Opcode::FloatTexture | Opcode::Vec3Texture => {
                    self.texture_lookup(&mut reader, op == Opcode::Vec3Texture)
                }
                Opcode::FloatEnvironment | Opcode::Vec3Environment => {
                    self.environment_lookup(&mut reader, op == Opcode::Vec3Environment)
                }
                Opcode::Shadow => self.shadow_lookup(&mut reader),
                Opcode::Call => self.call(&mut reader, dispatch_byte as usize),
                Opcode::Ambient => {
                    let cl = reader.reg() as usize;
                    let ol = reader.reg() as usize;
                    let (color, opacity) = self.bind_light_outputs(cl, ol);
                    self.grid.add_light(Rc::new(Light::new(
                        LightKind::Ambient,
                        color,
                        opacity,
                        Vec3::ZERO,
                        Vec3::ZERO,
                        0.0,
                    )));
                }
                Opcode::SolarAxisAngle => {
                    let axis = reader.reg() as usize;
                    let angle = reader.reg() as usize;
                    let cl = reader.reg() as usize;
                    let ol = reader.reg() as usize;
                    let axis = self.registers[axis].borrow().vec3_value();
                    let angle = self.registers[angle].borrow().float_value();
                    let (color, opacity) = self.bind_light_outputs(cl, ol);
                    self.grid.add_light(Rc::new(Light::new(
                        LightKind::SolarAxisAngle,
                        color,
                        opacity,
                        axis,
                        axis,
                        angle,
                    )));
                }
                Opcode::Illuminate => {
                    let position = reader.reg() as usize;
                    let rest: Vec<usize> = (0..4).map(|_| reader.reg() as usize).collect();
                    self.illuminate(position, None, &rest);
                }
                Opcode::IlluminateAxisAngle => {
                    let position = reader.reg() as usize;
                    let axis = reader.reg() as usize;
                    let angle = reader.reg() as usize;
                    let rest: Vec<usize> = (0..4).map(|_| reader.reg() as usize).collect();
                    self.illuminate(position, Some((axis, angle)), &rest);
                }
                Opcode::IlluminanceAxisAngle => self.illuminance(&mut reader),
            }
        }
    }

    // ── Operand plumbing ─────────────────────────────────────────────

    /// Element count of an operation's result: the grid size when any
    /// operand is varying, otherwise one.
    fn result_length(&self, dispatch: Dispatch) -> usize {
        if dispatch.varying() {
            self.grid.size()
        } else {
            1
        }
    }

    fn result_storage(&self, dispatch: Dispatch) -> ValueStorage {
        if dispatch.varying() {
            ValueStorage::Varying
        } else {
            ValueStorage::Uniform
        }
    }

    /// The active mask for a varying write; uniform writes are
    /// unconditional and reads are never masked.
    fn write_mask(&self, dispatch: Dispatch) -> Option<Vec<u8>> {
        if dispatch.varying() {
            self.masks.last().map(|m| m.flags().to_vec())
        } else {
            None
        }
    }

    fn intrinsic_ctx(&mut self) -> IntrinsicCtx<'_> {
        IntrinsicCtx {
            renderer: self.renderer,
            grid: self.grid,
            random: self.random,
            shader_transform: self.shader_transform,
        }
    }

    /// Resolve a coordinate-system name to the matrix out of that
    /// space. "current" and "shader" are maintained by the VM itself.
    fn space_from(&self, name: &str) -> Mat4 {
        match name {
            "current" | "camera" => Mat4::IDENTITY,
            "shader" => self.shader_transform,
            _ => self.renderer.transform_from(name),
        }
    }

    fn space_to(&self, name: &str) -> Mat4 {
        match name {
            "current" | "camera" => Mat4::IDENTITY,
            "shader" => self.shader_transform.inverse(),
            _ => self.renderer.transform_to(name),
        }
    }

    fn arithmetic(
        &mut self,
        reader: &mut CodeReader<'_>,
        dispatch_byte: u8,
        f: impl Fn(f32, f32) -> f32,
    ) {
        let dispatch = Dispatch::try_from(dispatch_byte).expect("bad dispatch");
        let result = reader.reg() as usize;
        let lhs = reader.reg() as usize;
        let rhs = reader.reg() as usize;
        let length = self.result_length(dispatch);
        let storage = self.result_storage(dispatch);
        let lhs = self.registers[lhs].borrow();
        let rhs = self.registers[rhs].borrow();
        let ty = if dispatch.components() == 1 {
            ValueType::Float
        } else if lhs.ty().is_triple() {
            lhs.ty()
        } else {
            rhs.ty()
        };
        let mut out = self.registers[result].borrow_mut();
        out.reset(ty, storage, length);
        kernels::binary(dispatch, out.raw_mut(), lhs.raw(), rhs.raw(), length, f);
    }

    fn comparison(
        &mut self,
        reader: &mut CodeReader<'_>,
        dispatch_byte: u8,
        f: impl Fn(f32, f32) -> bool,
    ) {
        let dispatch = Dispatch::try_from(dispatch_byte).expect("bad dispatch");
        let result = reader.reg() as usize;
        let lhs = reader.reg() as usize;
        let rhs = reader.reg() as usize;
        let length = self.result_length(dispatch);
        let lhs = self.registers[lhs].borrow();
        let rhs = self.registers[rhs].borrow();
        let mut out = self.registers[result].borrow_mut();
        out.reset(ValueType::Integer, self.result_storage(dispatch), length);
        kernels::compare(dispatch, out.ints_mut(), lhs.raw(), rhs.raw(), length, f);
    }

    fn equality(&mut self, reader: &mut CodeReader<'_>, dispatch_byte: u8, negate: bool) {
        let dispatch = Dispatch::try_from(dispatch_byte).expect("bad dispatch");
        let result = reader.reg() as usize;
        let lhs = reader.reg() as usize;
        let rhs = reader.reg() as usize;
        let length = self.result_length(dispatch);
        let lhs = self.registers[lhs].borrow();
        let rhs = self.registers[rhs].borrow();
        let mut out = self.registers[result].borrow_mut();
        out.reset(ValueType::Integer, self.result_storage(dispatch), length);
        if dispatch.components() == 3 {
            kernels::compare_vec3(dispatch, out.ints_mut(), lhs.raw(), rhs.raw(), length, negate);
        } else {
            kernels::compare(dispatch, out.ints_mut(), lhs.raw(), rhs.raw(), length, |a, b| {
                (a == b) != negate
            });
        }
    }

    fn logical(
        &mut self,
        reader: &mut CodeReader<'_>,
        dispatch_byte: u8,
        f: impl Fn(bool, bool) -> bool,
    ) {
        let dispatch = Dispatch::try_from(dispatch_byte).expect("bad dispatch");
        let result = reader.reg() as usize;
        let lhs = reader.reg() as usize;
        let rhs = reader.reg() as usize;
        let length = self.result_length(dispatch);
        let lhs = self.registers[lhs].borrow();
        let rhs = self.registers[rhs].borrow();
        let mut out = self.registers[result].borrow_mut();
        out.reset(ValueType::Integer, self.result_storage(dispatch), length);
        kernels::logical(dispatch, out.ints_mut(), lhs.ints(), rhs.ints(), length, f);
    }

    fn compound_assign(
        &mut self,
        reader: &mut CodeReader<'_>,
        dispatch_byte: u8,
        f: impl Fn(f32, f32) -> f32,
    ) {
        let dispatch = Dispatch::try_from(dispatch_byte).expect("bad dispatch");
        let target = reader.reg() as usize;
        let source = reader.reg() as usize;
        let mask = self.write_mask(dispatch);
        if Rc::ptr_eq(&self.registers[target], &self.registers[source]) {
            // `x += x` reads and writes the same buffer; work on a copy
            // of the source.
            let copy = self.registers[source].borrow().clone();
            let mut out = self.registers[target].borrow_mut();
            let length = copy.size();
            kernels::op_assign(
                dispatch.components(),
                out.raw_mut(),
                copy.raw(),
                mask.as_deref(),
                length,
                f,
            );
            return;
        }
        let source = self.registers[source].borrow();
        let mut out = self.registers[target].borrow_mut();
        let length = source.size();
        if out.size() < length {
            // Compound assignment into a never-written buffer; start it
            // at zero in the source's shape.
            out.reset(source.ty(), source.storage(), length);
            out.zero();
        }
        kernels::op_assign(
            dispatch.components(),
            out.raw_mut(),
            source.raw(),
            mask.as_deref(),
            length,
            f,
        );
    }

    fn transform(&mut self, reader: &mut CodeReader<'_>, kind: TransformKind) {
        let result = reader.reg() as usize;
        let space = reader.reg() as usize;
        let source = reader.reg() as usize;
        let m = self.space_from(self.registers[space].borrow().string_value());
        let result = &self.registers[result];
        let source = &self.registers[source];
        match kind {
            TransformKind::Point => {
                let ty = source.borrow().ty();
                intrinsics::geometry::apply_points(result, source, m, ty);
            }
            TransformKind::Vector => intrinsics::geometry::apply_vectors(result, source, m),
            TransformKind::Normal => intrinsics::geometry::apply_normals(result, source, m),
        }
    }

    fn call(&mut self, reader: &mut CodeReader<'_>, argc: usize) {
        let result = reader.reg() as usize;
        let symbol = reader.reg() as usize;
        let arguments: Vec<ValueRef> = (0..argc)
            .map(|_| Rc::clone(&self.registers[reader.reg() as usize]))
            .collect();
        let function = self
            .shader
            .symbol(symbol)
            .function()
            .expect("call to a symbol with no function");
        let result = Rc::clone(&self.registers[result]);
        let mut ctx = self.intrinsic_ctx();
        function(&mut ctx, &result, &arguments);
    }

    // ── Texture lookups ──────────────────────────────────────────────

    fn texture_lookup(&mut self, reader: &mut CodeReader<'_>, color: bool) {
        let result = reader.reg() as usize;
        let name = reader.reg() as usize;
        let s = reader.reg() as usize;
        let t = reader.reg() as usize;
        let name = self.registers[name].borrow().string_value().to_string();
        let s = self.registers[s].borrow();
        let t = self.registers[t].borrow();
        let mut out = self.registers[result].borrow_mut();
        let ty = if color { ValueType::Color } else { ValueType::Float };
        out.reset(ty, ValueStorage::Varying, s.size());

        match self.renderer.find_texture(&name) {
            Some(texture) if texture.valid() => {
                let s = s.floats();
                let t = t.floats();
                if color {
                    for (i, value) in out.vec3s_mut().iter_mut().enumerate() {
                        *value = texture.color(s[i], t[i.min(t.len() - 1)]);
                    }
                } else {
                    for (i, value) in out.floats_mut().iter_mut().enumerate() {
                        *value = texture.color(s[i], t[i.min(t.len() - 1)]).x;
                    }
                }
            }
            _ => {
                log::warn!("texture \"{name}\" not found; sampling zero");
                out.zero();
            }
        }
    }

    fn environment_lookup(&mut self, reader: &mut CodeReader<'_>, color: bool) {
        let result = reader.reg() as usize;
        let name = reader.reg() as usize;
        let direction = reader.reg() as usize;
        let name = self.registers[name].borrow().string_value().to_string();
        let direction = self.registers[direction].borrow();
        let mut out = self.registers[result].borrow_mut();
        let ty = if color { ValueType::Color } else { ValueType::Float };
        out.reset(ty, ValueStorage::Varying, direction.size());

        match self.renderer.find_texture(&name) {
            Some(texture) if texture.valid() => {
                let directions = direction.vec3s();
                if color {
                    for (i, value) in out.vec3s_mut().iter_mut().enumerate() {
                        *value = texture.environment(directions[i].normalize_or_zero());
                    }
                } else {
                    for (i, value) in out.floats_mut().iter_mut().enumerate() {
                        *value = texture.environment(directions[i].normalize_or_zero()).x;
                    }
                }
            }
            _ => {
                log::warn!("environment \"{name}\" not found; sampling zero");
                out.zero();
            }
        }
    }

    fn shadow_lookup(&mut self, reader: &mut CodeReader<'_>) {
        let result = reader.reg() as usize;
        let name = reader.reg() as usize;
        let position = reader.reg() as usize;
        let bias = reader.reg() as usize;
        let name = self.registers[name].borrow().string_value().to_string();
        let position = self.registers[position].borrow();
        let bias = self.registers[bias].borrow().float_value();
        let mut out = self.registers[result].borrow_mut();
        out.reset(ValueType::Float, ValueStorage::Varying, position.size());

        match self.renderer.find_texture(&name) {
            Some(texture) if texture.valid() => {
                // Positions are in camera space; shadow maps index from
                // world space.
                let world = self.renderer.camera_transform().inverse();
                let positions = position.vec3s();
                for (i, value) in out.floats_mut().iter_mut().enumerate() {
                    let p = world * positions[i].extend(1.0);
                    *value = texture.shadow(p, bias);
                }
            }
            _ => {
                log::warn!("shadow map \"{name}\" not found; sampling zero");
                out.zero();
            }
        }
    }

    // ── Lighting ─────────────────────────────────────────────────────

    /// Rebind the `Cl`/`Ol` registers to fresh zeroed varying colors
    /// owned by the light record being created.
    fn bind_light_outputs(&mut self, cl: usize, ol: usize) -> (ValueRef, ValueRef) {
        let size = self.grid.size();
        let color = Rc::new(RefCell::new(Value::varying(ValueType::Color, size)));
        let opacity = Rc::new(RefCell::new(Value::varying(ValueType::Color, size)));
        self.registers[cl] = Rc::clone(&color);
        self.registers[ol] = Rc::clone(&opacity);
        (color, opacity)
    }

    /// `illuminate` and its axis/angle variant: compute `L` from the
    /// light position to `Ps`, bind the light outputs, and record the
    /// light.
    fn illuminate(&mut self, position: usize, axis_angle: Option<(usize, usize)>, rest: &[usize]) {
        let [ps, l, cl, ol] = [rest[0], rest[1], rest[2], rest[3]];
        let light_position = self.registers[position].borrow().vec3_value();
        {
            let ps = self.registers[ps].borrow();
            let mut out = self.registers[l].borrow_mut();
            out.reset(ValueType::Vector, ValueStorage::Varying, ps.size());
            let surface = ps.vec3s();
            for (i, value) in out.vec3s_mut().iter_mut().enumerate() {
                *value = surface[i] - light_position;
            }
        }
        let (kind, axis, angle) = match axis_angle {
            None => (LightKind::Illuminate, Vec3::ZERO, 0.0),
            Some((axis, angle)) => (
                LightKind::IlluminateAxisAngle,
                self.registers[axis].borrow().vec3_value(),
                self.registers[angle].borrow().float_value(),
            ),
        };
        let (color, opacity) = self.bind_light_outputs(cl, ol);
        self.grid.add_light(Rc::new(Light::new(
            kind,
            color,
            opacity,
            light_position,
            axis,
            angle,
        )));
    }

    /// Step the light index past ambient lights; branch out of the
    /// illuminance loop when the list is exhausted.
    fn jump_illuminance(&mut self, reader: &mut CodeReader<'_>, target: usize) {
        let lights = self.grid.lights().len();
        self.light_index = match self.light_index {
            usize::MAX => 0,
            index => index + 1,
        };
        while self.light_index < lights
            && self.grid.light(self.light_index).kind() == LightKind::Ambient
        {
            self.light_index += 1;
        }
        if self.light_index >= lights {
            self.light_index = usize::MAX;
            reader.jump_to(target);
        }
    }

    /// The per-light body setup: cone mask into the result register,
    /// `L` toward the current light, `Cl`/`Ol` bound from its buffers.
    fn illuminance(&mut self, reader: &mut CodeReader<'_>) {
        let result = reader.reg() as usize;
        let position = reader.reg() as usize;
        let axis = reader.reg() as usize;
        let angle = reader.reg() as usize;
        let l = reader.reg() as usize;
        let cl = reader.reg() as usize;
        let ol = reader.reg() as usize;

        let light = self.grid.light(self.light_index);
        let angle_cosine = self.registers[angle].borrow().float_value().cos();
        {
            let position = self.registers[position].borrow();
            let axis_value = self.registers[axis].borrow();
            let mut out = self.registers[result].borrow_mut();
            out.reset(ValueType::Integer, ValueStorage::Varying, position.size());
            let positions = position.vec3s();
            let axes = axis_value.vec3s();
            for (i, value) in out.ints_mut().iter_mut().enumerate() {
                *value =
                    light.inside_cone(positions[i], axes[i.min(axes.len() - 1)], angle_cosine)
                        as i32;
            }
        }
        {
            let position = self.registers[position].borrow();
            let mut out = self.registers[l].borrow_mut();
            out.reset(ValueType::Vector, ValueStorage::Varying, position.size());
            let positions = position.vec3s();
            for (i, value) in out.vec3s_mut().iter_mut().enumerate() {
                *value = light.surface_to_light(positions[i]);
            }
        }
        for (register, source) in [(cl, light.color()), (ol, light.opacity())] {
            let source = source.borrow();
            let mut out = self.registers[register].borrow_mut();
            out.reset(source.ty(), source.storage(), source.size());
            out.raw_mut().copy_from_slice(source.raw());
        }
    }
}

#[derive(Clone, Copy)]
enum TransformKind {
    Point,
    Vector,
    Normal,
}

/// Bind registers to grid buffers by symbol name; names the grid does
/// not carry keep their pool backing.
fn bind_registers(registers: &mut [ValueRef], grid: &Grid, shader: &Shader) {
    for (name, value) in grid.values_by_identifier() {
        if let Some(symbol) = shader.find_symbol(name) {
            registers[symbol.register() as usize] = Rc::clone(value);
        }
    }
}
