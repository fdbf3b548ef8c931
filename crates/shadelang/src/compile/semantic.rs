//! Semantic analysis.
//!
//! One bottom-up pass over the parsed tree that annotates every
//! expression with its `(type, storage)` pair, resolves identifiers
//! through the scope stack, harvests literals into the constant pool,
//! picks intrinsic overloads, and splices in synthetic `Convert` and
//! `Promote` nodes wherever shapes would otherwise mix. After this pass
//! the code generator can emit a dispatch tag for every operation by
//! reading annotations alone.

use std::collections::HashMap;

use crate::compile::ast::{NodeKind, SyntaxNode};
use crate::compile::symbols::{Intrinsic, ParamKind, ResultStorage, ResultType, SymbolTable};
use crate::error::ErrorLog;
use crate::math::Vec3;
use crate::shader::{ShaderKind, Symbol, SymbolKind};
use crate::value::{Value, ValueStorage, ValueType};

/// Everything the code generator needs beyond the annotated tree.
pub struct Analysis {
    /// Parameters first, then locals/globals/intrinsics in first-use
    /// order. Registers are assigned later by the code generator.
    pub symbols: Vec<Symbol>,
    pub constants: Vec<Value>,
    pub parameters: usize,
}

/// Annotate one shader definition in place.
pub fn analyze(
    shader: &mut SyntaxNode,
    kind: ShaderKind,
    table: &SymbolTable,
    errors: &mut ErrorLog,
) -> Analysis {
    let mut analyzer = Analyzer {
        table,
        errors,
        kind,
        symbols: Vec::new(),
        scopes: vec![HashMap::new()],
        constants: Vec::new(),
        constant_map: HashMap::new(),
        intrinsic_map: HashMap::new(),
    };
    analyzer.shader(shader);
    let parameters = analyzer
        .symbols
        .iter()
        .filter(|s| s.kind() == SymbolKind::Parameter)
        .count();
    Analysis {
        symbols: analyzer.symbols,
        constants: analyzer.constants,
        parameters,
    }
}

#[derive(Hash, PartialEq, Eq)]
enum ConstantKey {
    Float(u32),
    Vec3(ValueType, [u32; 3]),
    Str(String),
}

struct Analyzer<'a> {
    table: &'a SymbolTable,
    errors: &'a mut ErrorLog,
    kind: ShaderKind,
    symbols: Vec<Symbol>,
    scopes: Vec<HashMap<String, usize>>,
    constants: Vec<Value>,
    constant_map: HashMap<ConstantKey, usize>,
    /// Intrinsic symbol index by (name, function identity).
    intrinsic_map: HashMap<(&'static str, usize), usize>,
}

impl Analyzer<'_> {
    // ── Scopes and symbols ───────────────────────────────────────────

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(
        &mut self,
        name: &str,
        ty: ValueType,
        storage: ValueStorage,
        kind: SymbolKind,
    ) -> usize {
        let index = self.symbols.len();
        self.symbols.push(Symbol::new(name, ty, storage, kind));
        self.scopes
            .last_mut()
            .unwrap()
            .insert(name.to_string(), index);
        index
    }

    /// Resolve `name` through the scope stack, falling back to the
    /// host-registered globals.
    fn resolve(&mut self, name: &str, line: u32) -> Option<usize> {
        for scope in self.scopes.iter().rev() {
            if let Some(&index) = scope.get(name) {
                return Some(index);
            }
        }
        if let Some(global) = self.table.find_global(name) {
            let index = self.symbols.len();
            self.symbols.push(Symbol::new(
                &global.name,
                global.ty,
                global.storage,
                SymbolKind::Global,
            ));
            // Globals resolve at the shader's outermost scope so every
            // use shares one symbol.
            self.scopes
                .first_mut()
                .unwrap()
                .insert(name.to_string(), index);
            return Some(index);
        }
        if matches!(name, "L" | "Cl" | "Ol" | "Ps") {
            self.errors.error(
                line,
                format!(
                    "'{name}' is only available inside an illuminance, solar, or illuminate statement"
                ),
            );
        } else {
            self.errors
                .error(line, format!("Unresolved symbol '{name}'"));
        }
        None
    }

    /// Declare the light-scope names visible inside a solar, illuminate,
    /// or illuminance body. The same symbols are reused by every light
    /// statement in the shader.
    fn push_light_scope(&mut self, with_ps: bool) {
        self.push_scope();
        for (name, ty) in [
            ("L", ValueType::Vector),
            ("Cl", ValueType::Color),
            ("Ol", ValueType::Color),
        ] {
            self.light_symbol(name, ty);
        }
        if with_ps {
            self.light_symbol("Ps", ValueType::Point);
        }
    }

    fn pop_light_scope(&mut self) {
        self.pop_scope();
    }

    fn light_symbol(&mut self, name: &str, ty: ValueType) -> usize {
        if let Some(index) = self
            .symbols
            .iter()
            .position(|s| s.name() == name && s.kind() == SymbolKind::Global)
        {
            self.scopes
                .last_mut()
                .unwrap()
                .insert(name.to_string(), index);
            return index;
        }
        self.declare(name, ty, ValueStorage::Varying, SymbolKind::Global)
    }

    // ── Constant pool ────────────────────────────────────────────────

    fn constant(&mut self, key: ConstantKey, build: impl FnOnce() -> Value) -> usize {
        if let Some(&index) = self.constant_map.get(&key) {
            return index;
        }
        let index = self.constants.len();
        self.constants.push(build());
        self.constant_map.insert(key, index);
        index
    }

    fn float_constant(&mut self, x: f32) -> usize {
        self.constant(ConstantKey::Float(x.to_bits()), || {
            let mut value = Value::uniform_float(x);
            value.reset(ValueType::Float, ValueStorage::Constant, 1);
            value
        })
    }

    fn vec3_constant(&mut self, ty: ValueType, v: Vec3) -> usize {
        let bits = [v.x.to_bits(), v.y.to_bits(), v.z.to_bits()];
        self.constant(ConstantKey::Vec3(ty, bits), || {
            let mut value = Value::uniform_vec3(ty, v);
            value.reset(ty, ValueStorage::Constant, 1);
            value
        })
    }

    fn string_constant(&mut self, s: &str) -> usize {
        self.constant(ConstantKey::Str(s.to_string()), || Value::string(s))
    }

    // ── Shader structure ─────────────────────────────────────────────

    fn shader(&mut self, shader: &mut SyntaxNode) {
        let mut children = std::mem::take(&mut shader.children);
        self.formals(&mut children[0]);
        self.push_scope();
        self.statement(&mut children[1]);
        self.pop_scope();
        shader.children = children;
    }

    fn formals(&mut self, formals: &mut SyntaxNode) {
        let mut list = std::mem::take(&mut formals.children);
        for formal in &mut list {
            if formal.kind != NodeKind::Variable {
                continue;
            }
            // Parameters default to uniform storage.
            let storage = if formal.storage == ValueStorage::Null {
                ValueStorage::Uniform
            } else {
                formal.storage
            };
            formal.storage = storage;
            let index = self.declare(&formal.lexeme, formal.ty, storage, SymbolKind::Parameter);
            formal.symbol = Some(index);
            if formal.child(0).kind != NodeKind::Null {
                self.expression(&mut formal.children[0], formal.ty);
                self.coerce(formal, 0, formal.ty, storage);
            }
        }
        formals.children = list;
    }

    // ── Statements ───────────────────────────────────────────────────

    fn statement(&mut self, node: &mut SyntaxNode) {
        match node.kind {
            NodeKind::Null => {}
            NodeKind::List => {
                self.push_scope();
                let mut children = std::mem::take(&mut node.children);
                for child in &mut children {
                    self.statement(child);
                }
                node.children = children;
                self.pop_scope();
            }
            NodeKind::Variable => self.declaration(node),
            NodeKind::Assign
            | NodeKind::AddAssign
            | NodeKind::SubtractAssign
            | NodeKind::MultiplyAssign
            | NodeKind::DivideAssign => self.assignment(node),
            NodeKind::If | NodeKind::While => {
                self.condition(node);
                let mut children = std::mem::take(&mut node.children);
                self.statement(&mut children[1]);
                node.children = children;
            }
            NodeKind::IfElse => {
                self.condition(node);
                let mut children = std::mem::take(&mut node.children);
                self.statement(&mut children[1]);
                self.statement(&mut children[2]);
                node.children = children;
            }
            NodeKind::For => {
                let mut children = std::mem::take(&mut node.children);
                self.statement(&mut children[0]);
                self.expression(&mut children[1], ValueType::Null);
                if children[1].ty != ValueType::Integer {
                    self.errors
                        .error(children[1].line, "Condition must be a relation");
                }
                if children[1].storage != ValueStorage::Varying {
                    let ty = children[1].ty;
                    wrap(&mut children[1], NodeKind::Promote, ty, ValueStorage::Varying);
                }
                self.statement(&mut children[2]);
                self.statement(&mut children[3]);
                node.children = children;
            }
            NodeKind::Break | NodeKind::Continue => {}
            NodeKind::Return => {
                if !node.children.is_empty() {
                    self.expression(&mut node.children[0], ValueType::Null);
                }
            }
            NodeKind::Solar => self.solar(node),
            NodeKind::Illuminate => self.illuminate(node),
            NodeKind::Illuminance => self.illuminance(node),
            NodeKind::Ambient => self.ambient(),
            _ => {
                // Expression statement; the value is discarded.
                self.expression(node, ValueType::Null);
            }
        }
    }

    fn declaration(&mut self, node: &mut SyntaxNode) {
        let has_initializer = node.child(0).kind != NodeKind::Null;
        if has_initializer {
            self.expression(&mut node.children[0], node.ty);
        }
        // An unqualified local takes the storage of its initializer, so
        // a value computed from uniform parameters stays uniform; an
        // uninitialized local is varying.
        let storage = match node.storage {
            ValueStorage::Null => match node.child(0).storage {
                ValueStorage::Varying => ValueStorage::Varying,
                ValueStorage::Null => ValueStorage::Varying,
                _ => {
                    if has_initializer {
                        ValueStorage::Uniform
                    } else {
                        ValueStorage::Varying
                    }
                }
            },
            explicit => explicit,
        };
        node.storage = storage;
        let index = self.declare(&node.lexeme, node.ty, storage, SymbolKind::Local);
        node.symbol = Some(index);
        if has_initializer {
            self.coerce(node, 0, node.ty, storage);
        }
    }

    fn assignment(&mut self, node: &mut SyntaxNode) {
        let name = node.lexeme.clone();
        let Some(index) = self.resolve(&name, node.line) else {
            self.expression(&mut node.children[0], ValueType::Null);
            return;
        };
        let (ty, storage) = {
            let symbol = &self.symbols[index];
            (symbol.ty(), symbol.storage())
        };
        node.symbol = Some(index);
        node.ty = ty;
        node.storage = storage;
        if ty == ValueType::String && node.kind != NodeKind::Assign {
            self.errors
                .error(node.line, format!("Invalid compound assignment to string '{name}'"));
        }
        self.expression(&mut node.children[0], ty);
        self.coerce(node, 0, ty, storage);
    }

    /// Annotate a conditional's condition and promote it to varying so
    /// it can drive a mask.
    fn condition(&mut self, node: &mut SyntaxNode) {
        let mut children = std::mem::take(&mut node.children);
        self.expression(&mut children[0], ValueType::Null);
        if children[0].ty != ValueType::Integer {
            self.errors
                .error(children[0].line, "Condition must be a relation");
        }
        if children[0].storage != ValueStorage::Varying {
            let ty = children[0].ty;
            wrap(&mut children[0], NodeKind::Promote, ty, ValueStorage::Varying);
        }
        node.children = children;
    }

    fn solar(&mut self, node: &mut SyntaxNode) {
        if self.kind != ShaderKind::Light {
            self.errors
                .error(node.line, "solar is only valid in a light shader");
        }
        let mut children = std::mem::take(&mut node.children);
        let arguments = &mut children[0];
        // Missing axis and angle default to (0, 0, 0) and 0.
        if arguments.children.is_empty() {
            let mut axis = SyntaxNode::new(NodeKind::Triple, node.line);
            for _ in 0..3 {
                axis.add(SyntaxNode::with_lexeme(NodeKind::Integer, node.line, "0"));
            }
            arguments.add(axis);
        }
        if arguments.children.len() == 1 {
            arguments.add(SyntaxNode::with_lexeme(NodeKind::Real, node.line, "0"));
        }
        self.expression(&mut arguments.children[0], ValueType::Vector);
        self.require_uniform_triple(&arguments.children[0], "solar axis");
        self.expression(&mut arguments.children[1], ValueType::Null);
        self.require_uniform_float(&arguments.children[1], "solar angle");

        self.push_light_scope(true);
        self.statement(&mut children[1]);
        self.pop_light_scope();
        node.children = children;
    }

    fn illuminate(&mut self, node: &mut SyntaxNode) {
        if self.kind != ShaderKind::Light {
            self.errors
                .error(node.line, "illuminate is only valid in a light shader");
        }
        let mut children = std::mem::take(&mut node.children);
        {
            let arguments = &mut children[0];
            self.expression(&mut arguments.children[0], ValueType::Point);
            self.require_uniform_triple(&arguments.children[0], "illuminate position");
            if arguments.children.len() == 3 {
                self.expression(&mut arguments.children[1], ValueType::Vector);
                self.require_uniform_triple(&arguments.children[1], "illuminate axis");
                self.expression(&mut arguments.children[2], ValueType::Null);
                self.require_uniform_float(&arguments.children[2], "illuminate angle");
            }
        }
        self.push_light_scope(true);
        self.statement(&mut children[1]);
        self.pop_light_scope();
        node.children = children;
    }

    fn illuminance(&mut self, node: &mut SyntaxNode) {
        if self.kind == ShaderKind::Light {
            self.errors
                .error(node.line, "illuminance is not valid in a light shader");
        }
        let mut children = std::mem::take(&mut node.children);
        {
            let arguments = &mut children[0];
            // Drop the optional light-category string; categories are
            // not carried on light records.
            if arguments
                .children
                .first()
                .is_some_and(|a| a.kind == NodeKind::String)
            {
                log::warn!("light categories are ignored by illuminance");
                arguments.children.remove(0);
            }
            // Missing axis and angle default to a full sphere: any axis
            // with cos(pi) = -1 passes the cone test everywhere.
            if arguments.children.len() < 2 {
                let mut axis = SyntaxNode::new(NodeKind::Triple, node.line);
                for _ in 0..3 {
                    axis.add(SyntaxNode::with_lexeme(NodeKind::Integer, node.line, "0"));
                }
                arguments.add(axis);
            }
            if arguments.children.len() < 3 {
                arguments.add(SyntaxNode::with_lexeme(
                    NodeKind::Real,
                    node.line,
                    "3.14159274",
                ));
            }
            self.expression(&mut arguments.children[0], ValueType::Point);
            if !arguments.children[0].ty.is_triple() {
                self.errors
                    .error(node.line, "illuminance position must be a point");
            }
            if arguments.children[0].storage != ValueStorage::Varying {
                let ty = arguments.children[0].ty;
                wrap(&mut arguments.children[0], NodeKind::Promote, ty, ValueStorage::Varying);
            }
            self.expression(&mut arguments.children[1], ValueType::Vector);
            if arguments.children[1].ty == ValueType::Float
                || arguments.children[1].ty == ValueType::Integer
            {
                let storage = arguments.children[1].storage;
                wrap(&mut arguments.children[1], NodeKind::Convert, ValueType::Vector, storage);
            }
            if arguments.children[1].storage != ValueStorage::Varying {
                let ty = arguments.children[1].ty;
                wrap(&mut arguments.children[1], NodeKind::Promote, ty, ValueStorage::Varying);
            }
            self.expression(&mut arguments.children[2], ValueType::Null);
            self.require_uniform_float(&arguments.children[2], "illuminance angle");
        }
        self.push_light_scope(false);
        self.statement(&mut children[1]);
        self.pop_light_scope();
        node.children = children;
    }

    /// The implicit wrapper the parser inserts for ambient light
    /// shaders; it brings Cl and Ol into scope for the rest of the
    /// body.
    fn ambient(&mut self) {
        for (name, ty) in [("Cl", ValueType::Color), ("Ol", ValueType::Color)] {
            self.light_symbol(name, ty);
        }
    }

    fn require_uniform_triple(&mut self, node: &SyntaxNode, what: &str) {
        if !node.ty.is_triple() {
            self.errors
                .error(node.line, format!("{what} must be a point or vector"));
        } else if node.storage == ValueStorage::Varying {
            self.errors
                .error(node.line, format!("{what} must be uniform"));
        }
    }

    fn require_uniform_float(&mut self, node: &SyntaxNode, what: &str) {
        if !matches!(node.ty, ValueType::Float | ValueType::Integer) {
            self.errors
                .error(node.line, format!("{what} must be a float"));
        } else if node.storage == ValueStorage::Varying {
            self.errors
                .error(node.line, format!("{what} must be uniform"));
        }
    }

    // ── Expressions ──────────────────────────────────────────────────

    /// Annotate an expression. `context` is the type an enclosing cast
    /// or declaration expects; it types bare triples and texture
    /// lookups and is `Null` when there is no context.
    fn expression(&mut self, node: &mut SyntaxNode, context: ValueType) {
        match node.kind {
            NodeKind::Null => {}
            NodeKind::Integer | NodeKind::Real => {
                let x: f32 = node.lexeme.parse().unwrap_or_else(|_| {
                    self.errors
                        .error(node.line, format!("Invalid number '{}'", node.lexeme));
                    0.0
                });
                node.ty = ValueType::Float;
                node.storage = ValueStorage::Constant;
                node.constant = Some(self.float_constant(x));
            }
            NodeKind::String => {
                node.ty = ValueType::String;
                node.storage = ValueStorage::Constant;
                node.constant = Some(self.string_constant(&node.lexeme.clone()));
            }
            NodeKind::Identifier => {
                let name = node.lexeme.clone();
                if let Some(index) = self.resolve(&name, node.line) {
                    node.symbol = Some(index);
                    node.ty = self.symbols[index].ty();
                    node.storage = self.symbols[index].storage();
                }
            }
            NodeKind::Triple => self.triple(node, context),
            NodeKind::Typecast => self.typecast(node),
            NodeKind::Call => self.call(node),
            NodeKind::Texture | NodeKind::Environment | NodeKind::Shadow => {
                self.texture(node, context)
            }
            NodeKind::Negate => {
                self.expression(&mut node.children[0], context);
                node.ty = node.child(0).ty;
                node.storage = node.child(0).storage;
                if !matches!(node.ty, ValueType::Float | ValueType::Integer)
                    && !node.ty.is_triple()
                {
                    self.errors
                        .error(node.line, "Negation needs a numeric operand");
                }
            }
            NodeKind::Add | NodeKind::Subtract | NodeKind::Multiply | NodeKind::Divide => {
                self.arithmetic(node)
            }
            NodeKind::Dot => self.dot(node),
            NodeKind::Greater
            | NodeKind::GreaterEqual
            | NodeKind::Less
            | NodeKind::LessEqual
            | NodeKind::Equal
            | NodeKind::NotEqual => self.comparison(node),
            NodeKind::And | NodeKind::Or => self.logical(node),
            _ => {
                self.errors
                    .error(node.line, "Expected an expression");
            }
        }
    }

    fn triple(&mut self, node: &mut SyntaxNode, context: ValueType) {
        let ty = if context.is_triple() {
            context
        } else {
            ValueType::Color
        };
        let mut children = std::mem::take(&mut node.children);
        for child in &mut children {
            self.expression(child, ValueType::Float);
        }
        node.ty = ty;

        // Literal triples fold into one constant-pool value.
        let all_literal = children
            .iter()
            .all(|c| matches!(c.kind, NodeKind::Integer | NodeKind::Real));
        if all_literal {
            let component = |c: &SyntaxNode| c.lexeme.parse::<f32>().unwrap_or(0.0);
            let v = Vec3::new(
                component(&children[0]),
                component(&children[1]),
                component(&children[2]),
            );
            node.storage = ValueStorage::Constant;
            node.constant = Some(self.vec3_constant(ty, v));
            node.children = children;
            return;
        }

        let mut storage = ValueStorage::Constant;
        for child in &children {
            if !matches!(child.ty, ValueType::Float | ValueType::Integer) {
                self.errors
                    .error(child.line, "Triple components must be floats");
            }
            storage = storage.max(child.storage);
        }
        if storage == ValueStorage::Varying {
            for child in &mut children {
                if child.storage != ValueStorage::Varying {
                    let ty = child.ty;
                    wrap(child, NodeKind::Promote, ty, ValueStorage::Varying);
                }
            }
        }

        // A triple with computed components has no single opcode; it
        // becomes setzcomp(setycomp(convert(x), y), z), with the
        // component setters writing through their first argument.
        let mut parts = children.into_iter();
        let (x, y, z) = (
            parts.next().unwrap(),
            parts.next().unwrap(),
            parts.next().unwrap(),
        );
        let mut convert = SyntaxNode::new(NodeKind::Convert, node.line);
        convert.ty = ty;
        convert.storage = storage;
        convert.children.push(x);

        let mut set_y = SyntaxNode::with_lexeme(NodeKind::Call, node.line, "setycomp");
        set_y.ty = ty;
        set_y.storage = storage;
        set_y.symbol = self.component_setter("setycomp", node.line);
        set_y.children.push(convert);
        set_y.children.push(y);

        node.kind = NodeKind::Call;
        node.lexeme = "setzcomp".to_string();
        node.storage = storage;
        node.symbol = self.component_setter("setzcomp", node.line);
        node.children.push(set_y);
        node.children.push(z);
    }

    /// Intrinsic symbol for one of the component setters the triple
    /// rewrite relies on.
    fn component_setter(&mut self, name: &'static str, line: u32) -> Option<usize> {
        let table = self.table;
        let Some(intrinsic) = table
            .intrinsics(name)
            .find(|i| i.params == [ParamKind::Triple, ParamKind::Float])
        else {
            self.errors
                .error(line, format!("Internal error: '{name}' is not registered"));
            return None;
        };
        let key = (intrinsic.name, intrinsic.function as usize);
        if let Some(&index) = self.intrinsic_map.get(&key) {
            return Some(index);
        }
        let index = self.symbols.len();
        self.symbols.push(
            Symbol::new(
                intrinsic.name,
                ValueType::Float,
                ValueStorage::Varying,
                SymbolKind::Intrinsic,
            )
            .with_function(intrinsic.function),
        );
        self.intrinsic_map.insert(key, index);
        Some(index)
    }

    fn typecast(&mut self, node: &mut SyntaxNode) {
        let target = match node.child(0).kind {
            NodeKind::FloatType => ValueType::Float,
            NodeKind::StringType => ValueType::String,
            NodeKind::ColorType => ValueType::Color,
            NodeKind::PointType => ValueType::Point,
            NodeKind::VectorType => ValueType::Vector,
            NodeKind::NormalType => ValueType::Normal,
            NodeKind::MatrixType => ValueType::Matrix,
            _ => ValueType::Null,
        };
        let has_space = !node.child(0).children.is_empty();
        if has_space {
            // The space name becomes a string constant the transform
            // opcode resolves at run time.
            let space = node.children[0].children[0].lexeme.clone();
            node.children[0].children[0].ty = ValueType::String;
            node.children[0].children[0].storage = ValueStorage::Constant;
            node.children[0].children[0].constant = Some(self.string_constant(&space));
        }

        self.expression(&mut node.children[1], target);
        let inner = &node.children[1];
        node.storage = inner.storage;
        node.ty = target;

        if matches!(inner.ty, ValueType::Float | ValueType::Integer) && target.is_triple() {
            let storage = inner.storage;
            wrap(&mut node.children[1], NodeKind::Convert, target, storage);
        } else if matches!(inner.ty, ValueType::Float | ValueType::Integer)
            && target == ValueType::Matrix
        {
            let storage = inner.storage;
            wrap(&mut node.children[1], NodeKind::Convert, target, storage);
        } else if inner.ty != target && !(inner.ty.is_triple() && target.is_triple()) {
            if !(matches!(inner.ty, ValueType::Float | ValueType::Integer)
                && target == ValueType::Float)
            {
                self.errors.error(
                    node.line,
                    format!("Cannot cast {} to {}", inner.ty.name(), target.name()),
                );
            }
        }
    }

    fn arithmetic(&mut self, node: &mut SyntaxNode) {
        let mut children = std::mem::take(&mut node.children);
        self.expression(&mut children[0], ValueType::Null);
        self.expression(&mut children[1], ValueType::Null);

        let left = children[0].ty;
        let right = children[1].ty;
        let scalar = |ty: ValueType| matches!(ty, ValueType::Float | ValueType::Integer);

        let ty = if scalar(left) && scalar(right) {
            ValueType::Float
        } else if left.is_triple() && scalar(right) {
            let storage = children[1].storage;
            wrap(&mut children[1], NodeKind::Convert, left, storage);
            left
        } else if scalar(left) && right.is_triple() {
            let storage = children[0].storage;
            wrap(&mut children[0], NodeKind::Convert, right, storage);
            right
        } else if left.is_triple() && right.is_triple() {
            left
        } else {
            self.errors.error(
                node.line,
                format!("Invalid operands ({} and {})", left.name(), right.name()),
            );
            ValueType::Float
        };
        node.ty = ty;
        node.storage = children[0].storage.max(children[1].storage);
        node.children = children;
    }

    fn dot(&mut self, node: &mut SyntaxNode) {
        let mut children = std::mem::take(&mut node.children);
        self.expression(&mut children[0], ValueType::Vector);
        self.expression(&mut children[1], ValueType::Vector);
        for child in &mut children {
            if matches!(child.ty, ValueType::Float | ValueType::Integer) {
                let storage = child.storage;
                wrap(child, NodeKind::Convert, ValueType::Vector, storage);
            } else if !child.ty.is_triple() {
                self.errors
                    .error(child.line, "Dot product needs vector operands");
            }
        }
        node.ty = ValueType::Float;
        node.storage = children[0].storage.max(children[1].storage);
        node.children = children;
    }

    fn comparison(&mut self, node: &mut SyntaxNode) {
        let mut children = std::mem::take(&mut node.children);
        self.expression(&mut children[0], ValueType::Null);
        self.expression(&mut children[1], ValueType::Null);

        let equality = matches!(node.kind, NodeKind::Equal | NodeKind::NotEqual);
        let either_triple = children[0].ty.is_triple() || children[1].ty.is_triple();
        if either_triple && equality {
            for i in 0..2 {
                if matches!(children[i].ty, ValueType::Float | ValueType::Integer) {
                    let other = children[1 - i].ty;
                    let storage = children[i].storage;
                    wrap(&mut children[i], NodeKind::Convert, other, storage);
                } else if !children[i].ty.is_triple() {
                    self.errors
                        .error(children[i].line, "Invalid comparison operand");
                }
            }
        } else {
            for child in &children {
                if !matches!(
                    child.ty,
                    ValueType::Float | ValueType::Integer
                ) {
                    self.errors.error(
                        child.line,
                        format!("Cannot compare {} values", child.ty.name()),
                    );
                }
            }
        }
        node.ty = ValueType::Integer;
        node.storage = children[0].storage.max(children[1].storage);
        node.children = children;
    }

    fn logical(&mut self, node: &mut SyntaxNode) {
        let mut children = std::mem::take(&mut node.children);
        self.expression(&mut children[0], ValueType::Null);
        self.expression(&mut children[1], ValueType::Null);
        for child in &children {
            if child.ty != ValueType::Integer {
                self.errors
                    .error(child.line, "Logical operands must be relations");
            }
        }
        node.ty = ValueType::Integer;
        node.storage = children[0].storage.max(children[1].storage);
        node.children = children;
    }

    /// Resolve a call against the intrinsic registry: exact parameter
    /// shapes win; otherwise the candidate needing the fewest float to
    /// vec3 widenings; a remaining tie goes to registration order.
    fn call(&mut self, node: &mut SyntaxNode) {
        let name = node.lexeme.clone();
        let mut children = std::mem::take(&mut node.children);
        for child in &mut children {
            self.expression(child, ValueType::Null);
        }

        // A call to a declared variable's name is nonsense; a call to an
        // unknown name is an unresolved symbol.
        if !self.table.has_intrinsic(&name) {
            self.errors
                .error(node.line, format!("Unresolved function '{name}'"));
            node.children = children;
            return;
        }

        let mut best: Option<(&Intrinsic, usize)> = None;
        for intrinsic in self.table.intrinsics(&name) {
            if intrinsic.params.len() != children.len() {
                continue;
            }
            let mut cost = 0usize;
            let mut viable = true;
            for (param, argument) in intrinsic.params.iter().zip(&children) {
                if param.matches(argument.ty) {
                    continue;
                }
                // Widening a float argument to a triple is the one
                // conversion overload resolution may apply.
                if *param == ParamKind::Triple
                    && matches!(argument.ty, ValueType::Float | ValueType::Integer)
                {
                    cost += 1;
                } else {
                    viable = false;
                    break;
                }
            }
            if viable && best.map_or(true, |(_, best_cost)| cost < best_cost) {
                best = Some((intrinsic, cost));
            }
        }

        let Some((intrinsic, _)) = best else {
            self.errors.error(
                node.line,
                format!("No matching overload for '{name}' with these arguments"),
            );
            node.children = children;
            return;
        };

        // Widen float arguments to the triple type the call is working
        // in (the first triple-typed argument's, or vector).
        let triple_context = children
            .iter()
            .map(|c| c.ty)
            .find(|ty| ty.is_triple())
            .unwrap_or(ValueType::Vector);
        for (param, argument) in intrinsic.params.iter().zip(children.iter_mut()) {
            if *param == ParamKind::Triple
                && matches!(argument.ty, ValueType::Float | ValueType::Integer)
            {
                let storage = argument.storage;
                wrap(argument, NodeKind::Convert, triple_context, storage);
            }
        }

        node.ty = match intrinsic.result {
            ResultType::Fixed(ty) => ty,
            ResultType::SameAsArg(i) => children.get(i).map(|c| c.ty).unwrap_or(ValueType::Null),
        };
        node.storage = match intrinsic.result_storage {
            ResultStorage::Varying => ValueStorage::Varying,
            ResultStorage::Uniform => ValueStorage::Uniform,
            ResultStorage::MaxArgs => children
                .iter()
                .map(|c| c.storage)
                .max()
                .unwrap_or(ValueStorage::Uniform),
        };

        // Register one intrinsic symbol per selected variant.
        let key = (intrinsic.name, intrinsic.function as usize);
        let index = match self.intrinsic_map.get(&key) {
            Some(&index) => index,
            None => {
                let index = self.symbols.len();
                self.symbols.push(
                    Symbol::new(
                        intrinsic.name,
                        node.ty,
                        node.storage,
                        SymbolKind::Intrinsic,
                    )
                    .with_function(intrinsic.function),
                );
                self.intrinsic_map.insert(key, index);
                index
            }
        };
        node.symbol = Some(index);
        node.children = children;
    }

    fn texture(&mut self, node: &mut SyntaxNode, context: ValueType) {
        let mut children = std::mem::take(&mut node.children);
        self.expression(&mut children[0], ValueType::String);
        if children[0].ty != ValueType::String {
            self.errors
                .error(children[0].line, "Texture name must be a string");
        }
        for (i, child) in children.iter_mut().enumerate().skip(1) {
            self.expression(child, ValueType::Null);
            match node.kind {
                NodeKind::Texture if child.ty.is_triple() => {
                    self.errors
                        .error(child.line, "Texture coordinates must be floats");
                }
                NodeKind::Environment if !child.ty.is_triple() => {
                    self.errors
                        .error(child.line, "Environment direction must be a vector");
                }
                NodeKind::Shadow if i == 1 && !child.ty.is_triple() => {
                    self.errors
                        .error(child.line, "Shadow position must be a point");
                }
                _ => {}
            }
            // Lookup coordinates are per-vertex; the shadow bias stays
            // uniform.
            let bias = node.kind == NodeKind::Shadow && i == 2;
            if !bias && child.storage != ValueStorage::Varying {
                let ty = child.ty;
                wrap(child, NodeKind::Promote, ty, ValueStorage::Varying);
            }
        }
        node.ty = if context.is_triple() {
            context
        } else {
            ValueType::Float
        };
        node.storage = ValueStorage::Varying;
        node.children = children;
    }

    /// Coerce `node.children[index]` to `(ty, storage)`, inserting
    /// conversion and promotion nodes or reporting an error when the
    /// coercion is impossible.
    fn coerce(
        &mut self,
        node: &mut SyntaxNode,
        index: usize,
        ty: ValueType,
        storage: ValueStorage,
    ) {
        let child_ty = node.child(index).ty;
        let child_storage = node.child(index).storage;
        let line = node.child(index).line;

        if ty == ValueType::String || child_ty == ValueType::String {
            if ty != child_ty {
                self.errors.error(
                    line,
                    format!("Cannot assign {} to {}", child_ty.name(), ty.name()),
                );
            }
            return;
        }

        if matches!(child_ty, ValueType::Float | ValueType::Integer)
            && (ty.is_triple() || ty == ValueType::Matrix)
        {
            node.wrap_child(index, NodeKind::Convert, ty, child_storage);
        } else if child_ty.is_triple() && !ty.is_triple() {
            self.errors.error(
                line,
                format!("Cannot assign {} to {}", child_ty.name(), ty.name()),
            );
            return;
        } else if child_ty == ValueType::Matrix && ty != ValueType::Matrix {
            self.errors.error(
                line,
                format!("Cannot assign {} to {}", child_ty.name(), ty.name()),
            );
            return;
        }

        let current = node.child(index).storage;
        if storage == ValueStorage::Varying && current != ValueStorage::Varying {
            node.wrap_child(index, NodeKind::Promote, ty, ValueStorage::Varying);
        } else if storage != ValueStorage::Varying && current == ValueStorage::Varying {
            self.errors.error(
                line,
                format!(
                    "Cannot assign a varying value to {} '{}'",
                    storage.name(),
                    node.lexeme
                ),
            );
        }
    }
}

/// Wrap `node` in a synthetic node of `kind` annotated `(ty, storage)`.
fn wrap(node: &mut SyntaxNode, kind: NodeKind, ty: ValueType, storage: ValueStorage) {
    let line = node.line;
    let inner = std::mem::replace(node, SyntaxNode::new(kind, line));
    node.ty = ty;
    node.storage = storage;
    node.children.push(inner);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::parser::parse;

    fn analyze_source(source: &str) -> (SyntaxNode, Analysis, Result<(), crate::error::CompileErrors>) {
        let table = SymbolTable::new();
        let mut errors = ErrorLog::new();
        let mut tree = parse(source, &mut errors);
        let shader = &mut tree.children[0];
        let kind = match shader.kind {
            NodeKind::LightShader => ShaderKind::Light,
            NodeKind::DisplacementShader => ShaderKind::Displacement,
            NodeKind::VolumeShader => ShaderKind::Volume,
            NodeKind::ImagerShader => ShaderKind::Imager,
            _ => ShaderKind::Surface,
        };
        let analysis = analyze(shader, kind, &table, &mut errors);
        let shader = tree.children.remove(0);
        (shader, analysis, errors.finish())
    }

    #[test]
    fn literals_share_constant_pool_entries() {
        let (_, analysis, result) = analyze_source(
            "surface s() { Ci = Cs * 2; Oi = Os * 2; }",
        );
        result.unwrap();
        let twos = analysis
            .constants
            .iter()
            .filter(|c| c.ty() == ValueType::Float && c.float_value() == 2.0)
            .count();
        assert_eq!(twos, 1);
    }

    #[test]
    fn uniform_float_plus_varying_color_widens_then_dispatches() {
        let (shader, _, result) = analyze_source(
            "surface s(float Ka = 1;) { Ci = Ka + Cs; }",
        );
        result.unwrap();
        let body = shader.child(1);
        let assign = body.child(0);
        let add = assign.child(0);
        assert_eq!(add.ty, ValueType::Color);
        assert_eq!(add.storage, ValueStorage::Varying);
        // The float side was widened to color but kept its storage; the
        // kernel's U3V3 shape handles the broadcast.
        assert_eq!(add.child(0).kind, NodeKind::Convert);
        assert_eq!(add.child(0).ty, ValueType::Color);
        assert_eq!(add.child(0).storage, ValueStorage::Uniform);
        assert_eq!(add.child(1).kind, NodeKind::Identifier);
    }

    #[test]
    fn assigning_uniform_to_varying_promotes() {
        let (shader, _, result) = analyze_source(
            "surface s(float Ka = 1;) { varying float x = Ka; Ci = Cs; }",
        );
        result.unwrap();
        let declaration = shader.child(1).child(0);
        assert_eq!(declaration.kind, NodeKind::Variable);
        assert_eq!(declaration.child(0).kind, NodeKind::Promote);
        assert_eq!(declaration.child(0).storage, ValueStorage::Varying);
    }

    #[test]
    fn unqualified_locals_take_their_initializer_storage() {
        let (shader, _, result) = analyze_source(
            "surface s(float Ka = 1;) { float x = Ka; float y; Ci = Cs; }",
        );
        result.unwrap();
        let x = shader.child(1).child(0);
        assert_eq!(x.storage, ValueStorage::Uniform);
        let y = shader.child(1).child(1);
        assert_eq!(y.storage, ValueStorage::Varying);
    }

    #[test]
    fn storage_narrowing_is_an_error() {
        let (_, _, result) = analyze_source(
            "surface s() { uniform float x = 0; x = s; }",
        );
        let errors = result.unwrap_err();
        assert!(errors.contains("Cannot assign a varying value to uniform 'x'"));
    }

    #[test]
    fn string_assignment_type_checks() {
        let (_, _, result) = analyze_source(
            "surface s(string name = \"\";) { name = 1; Ci = Cs; }",
        );
        let errors = result.unwrap_err();
        assert!(errors.contains("Cannot assign float to string"));
    }

    #[test]
    fn l_outside_light_scope_is_an_error() {
        let (_, _, result) = analyze_source(
            "surface s() { vector Ln = normalize(L); }",
        );
        let errors = result.unwrap_err();
        assert!(errors.contains("'L' is only available"));
    }

    #[test]
    fn cl_outside_light_scope_is_an_error() {
        let (_, _, result) = analyze_source("surface s() { Ci += Cl; }");
        let errors = result.unwrap_err();
        assert!(errors.contains("'Cl' is only available"));
    }

    #[test]
    fn l_inside_illuminance_resolves() {
        let (_, _, result) = analyze_source(
            "surface s() { illuminance(P, (0, 0, 1), 3.14159274) { vector Ln = normalize(L); } }",
        );
        result.unwrap();
    }

    #[test]
    fn cl_resolves_at_the_top_of_a_light_shader() {
        let (_, _, result) = analyze_source(
            "light ambientlight(float intensity = 1;) { Cl = intensity; }",
        );
        result.unwrap();
    }

    #[test]
    fn overload_resolution_prefers_exact_matches() {
        let (shader, analysis, result) = analyze_source(
            "surface s(float d = 0;) { Ci = mix(Ci, Cs, d); float y = mix(0.0, 1.0, d); Oi = Os * y; }",
        );
        result.unwrap();
        let body = shader.child(1);
        let color_mix = body.child(0).child(0);
        assert_eq!(color_mix.ty, ValueType::Color);
        let float_mix = body.child(1).child(0).child(0);
        assert_eq!(float_mix.kind, NodeKind::Call);
        assert_eq!(float_mix.ty, ValueType::Float);
        // The two variants registered two distinct intrinsic symbols.
        let mixes = analysis
            .symbols
            .iter()
            .filter(|s| s.name() == "mix")
            .count();
        assert_eq!(mixes, 2);
    }

    #[test]
    fn overload_resolution_widens_when_no_exact_match_exists() {
        let (shader, _, result) = analyze_source(
            "surface s(float d = 0;) { Ci = mix(Ci, 0.5, d); }",
        );
        result.unwrap();
        let mix = shader.child(1).child(0).child(0);
        assert_eq!(mix.ty, ValueType::Color);
        assert_eq!(mix.child(1).kind, NodeKind::Convert);
    }

    #[test]
    fn conditions_promote_to_varying() {
        let (shader, _, result) = analyze_source(
            "surface s() { uniform float i = 0; while (i < 4) { i += 1; } Ci = Cs; }",
        );
        result.unwrap();
        let while_node = shader.child(1).child(1);
        assert_eq!(while_node.kind, NodeKind::While);
        assert_eq!(while_node.child(0).kind, NodeKind::Promote);
        assert_eq!(while_node.child(0).ty, ValueType::Integer);
    }

    #[test]
    fn literal_triples_fold_into_vec3_constants() {
        let (shader, analysis, result) = analyze_source(
            "surface s() { Ci = color (1, 0, 0); }",
        );
        result.unwrap();
        let cast = shader.child(1).child(0).child(0);
        assert_eq!(cast.kind, NodeKind::Typecast);
        let triple = cast.child(1);
        assert!(triple.constant.is_some());
        let constant = &analysis.constants[triple.constant.unwrap()];
        assert_eq!(constant.ty(), ValueType::Color);
        assert_eq!(constant.vec3_value(), Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn parameters_shadow_intrinsics() {
        // fog names a parameter `distance`; the local must win over the
        // intrinsic when referenced as a value.
        let (_, _, result) = analyze_source(include_str!("../../shaders/fog.sl"));
        result.unwrap();
    }

    #[test]
    fn canonical_shaders_analyze_clean() {
        for source in [
            include_str!("../../shaders/constant.sl"),
            include_str!("../../shaders/matte.sl"),
            include_str!("../../shaders/metal.sl"),
            include_str!("../../shaders/plastic.sl"),
            include_str!("../../shaders/paintedplastic.sl"),
            include_str!("../../shaders/ambientlight.sl"),
            include_str!("../../shaders/distantlight.sl"),
            include_str!("../../shaders/pointlight.sl"),
            include_str!("../../shaders/spotlight.sl"),
            include_str!("../../shaders/depthcue.sl"),
            include_str!("../../shaders/bumpy.sl"),
            include_str!("../../shaders/background.sl"),
        ] {
            let (_, _, result) = analyze_source(source);
            result.unwrap();
        }
    }
}
