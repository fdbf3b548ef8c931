//! Recursive-descent parser.
//!
//! Produces the [`SyntaxNode`] tree the semantic analyzer annotates.
//! Errors are reported with their line and recovery skips to the next
//! statement terminator, so a single parse surfaces as many problems as
//! possible.
//!
//! Binary operators are parsed right-recursively (`a * b / c` becomes
//! `mul(a, div(b, c))`) and the dot-product's right operand is a full
//! multiplicative expression, so `L . A / length(L)` is the dot of `L`
//! with `A / length(L)`. The canonical-shader tests pin this shape down.

use crate::compile::ast::{NodeKind, SyntaxNode};
use crate::compile::lexer::{Token, TokenKind, tokenize};
use crate::error::ErrorLog;
use crate::value::{ValueStorage, ValueType};

/// Parse a whole source file into a `List` of shader definitions.
pub fn parse(source: &str, errors: &mut ErrorLog) -> SyntaxNode {
    let tokens = tokenize(source, errors);
    Parser {
        tokens,
        position: 0,
        errors,
    }
    .parse_file()
}

struct Parser<'a> {
    tokens: Vec<Token>,
    position: usize,
    errors: &'a mut ErrorLog,
}

impl Parser<'_> {
    // ── Token plumbing ───────────────────────────────────────────────

    fn peek(&self) -> TokenKind {
        self.tokens[self.position].kind
    }

    fn peek_next(&self) -> TokenKind {
        self.tokens
            .get(self.position + 1)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::EndOfFile)
    }

    fn line(&self) -> u32 {
        self.tokens[self.position].line
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.position].clone();
        if self.position + 1 < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> bool {
        if self.matches(kind) {
            true
        } else {
            let found = &self.tokens[self.position].lexeme;
            self.errors
                .error(self.line(), format!("Expected {what} but found '{found}'"));
            false
        }
    }

    /// Skip to just past the next `;` (or to a `}`/end of file) after a
    /// statement-level error.
    fn recover(&mut self) {
        loop {
            match self.peek() {
                TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                TokenKind::RightBrace | TokenKind::EndOfFile => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    // ── Shaders ──────────────────────────────────────────────────────

    fn parse_file(&mut self) -> SyntaxNode {
        let mut root = SyntaxNode::new(NodeKind::List, self.line());
        loop {
            match self.peek() {
                TokenKind::EndOfFile => break,
                TokenKind::Surface
                | TokenKind::Displacement
                | TokenKind::Light
                | TokenKind::Volume
                | TokenKind::Imager => {
                    let shader = self.parse_shader();
                    root.add(shader);
                }
                _ => {
                    self.errors.error(
                        self.line(),
                        format!(
                            "Expected a shader definition but found '{}'",
                            self.tokens[self.position].lexeme
                        ),
                    );
                    self.recover();
                }
            }
        }
        root
    }

    fn parse_shader(&mut self) -> SyntaxNode {
        let kind_token = self.advance();
        let kind = match kind_token.kind {
            TokenKind::Surface => NodeKind::SurfaceShader,
            TokenKind::Displacement => NodeKind::DisplacementShader,
            TokenKind::Light => NodeKind::LightShader,
            TokenKind::Volume => NodeKind::VolumeShader,
            TokenKind::Imager => NodeKind::ImagerShader,
            _ => unreachable!(),
        };
        let mut shader = SyntaxNode::new(kind, kind_token.line);
        if self.peek() == TokenKind::Identifier {
            shader.lexeme = self.advance().lexeme;
        } else {
            self.errors.error(self.line(), "Expected a shader name");
        }

        let mut formals = SyntaxNode::new(NodeKind::List, self.line());
        if self.expect(TokenKind::LeftParen, "'('") {
            while self.peek() != TokenKind::RightParen && self.peek() != TokenKind::EndOfFile {
                self.parse_formal(&mut formals);
            }
            self.expect(TokenKind::RightParen, "')'");
        }
        shader.add(formals);

        let mut body = SyntaxNode::new(NodeKind::List, self.line());
        if self.expect(TokenKind::LeftBrace, "'{'") {
            while self.peek() != TokenKind::RightBrace && self.peek() != TokenKind::EndOfFile {
                let statement = self.parse_statement();
                body.add(statement);
            }
            self.expect(TokenKind::RightBrace, "'}'");
        }

        // A light shader with no solar or illuminate statement is an
        // ambient light; wrap the body so assignments to Cl and Ol land
        // in an ambient light record.
        if kind == NodeKind::LightShader && !contains_light_statement(&body) {
            body.children
                .insert(0, SyntaxNode::new(NodeKind::Ambient, shader.line));
        }

        shader.add(body);
        shader
    }

    /// One parameter declaration: `[storage] type name = default` with
    /// `,`-separated extra names, terminated by `;`.
    fn parse_formal(&mut self, formals: &mut SyntaxNode) {
        let storage = self.parse_storage();
        let Some(ty) = self.parse_type_keyword() else {
            self.errors.error(self.line(), "Expected a parameter type");
            self.recover();
            return;
        };
        loop {
            if self.peek() != TokenKind::Identifier {
                self.errors.error(self.line(), "Expected a parameter name");
                self.recover();
                return;
            }
            let name = self.advance();
            let mut variable = SyntaxNode::with_lexeme(NodeKind::Variable, name.line, name.lexeme);
            variable.ty = ty;
            variable.storage = storage.unwrap_or(ValueStorage::Uniform);
            if self.matches(TokenKind::Assign) {
                let default = self.parse_expression();
                variable.add(default);
            } else {
                self.errors.error(
                    name.line,
                    format!("Missing default value for shader parameter '{}'", variable.lexeme),
                );
                variable.add(SyntaxNode::new(NodeKind::Null, name.line));
            }
            formals.add(variable);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Semicolon, "';'");
    }

    fn parse_storage(&mut self) -> Option<ValueStorage> {
        match self.peek() {
            TokenKind::Uniform => {
                self.advance();
                Some(ValueStorage::Uniform)
            }
            TokenKind::Varying => {
                self.advance();
                Some(ValueStorage::Varying)
            }
            _ => None,
        }
    }

    fn parse_type_keyword(&mut self) -> Option<ValueType> {
        let ty = match self.peek() {
            TokenKind::Float => ValueType::Float,
            TokenKind::Color => ValueType::Color,
            TokenKind::Point => ValueType::Point,
            TokenKind::Vector => ValueType::Vector,
            TokenKind::Normal => ValueType::Normal,
            TokenKind::Matrix => ValueType::Matrix,
            TokenKind::StringType => ValueType::String,
            _ => return None,
        };
        self.advance();
        Some(ty)
    }

    // ── Statements ───────────────────────────────────────────────────

    fn parse_statement(&mut self) -> SyntaxNode {
        match self.peek() {
            TokenKind::LeftBrace => {
                self.advance();
                let mut list = SyntaxNode::new(NodeKind::List, self.line());
                while self.peek() != TokenKind::RightBrace && self.peek() != TokenKind::EndOfFile {
                    let statement = self.parse_statement();
                    list.add(statement);
                }
                self.expect(TokenKind::RightBrace, "'}'");
                list
            }
            TokenKind::Semicolon => {
                let line = self.line();
                self.advance();
                SyntaxNode::new(NodeKind::Null, line)
            }
            TokenKind::Uniform
            | TokenKind::Varying
            | TokenKind::Float
            | TokenKind::Color
            | TokenKind::Point
            | TokenKind::Vector
            | TokenKind::Normal
            | TokenKind::Matrix
            | TokenKind::StringType => self.parse_declaration(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Break => self.parse_break_or_continue(NodeKind::Break),
            TokenKind::Continue => self.parse_break_or_continue(NodeKind::Continue),
            TokenKind::Return => {
                let line = self.line();
                self.advance();
                let mut node = SyntaxNode::new(NodeKind::Return, line);
                if self.peek() != TokenKind::Semicolon {
                    let value = self.parse_expression();
                    node.add(value);
                }
                self.expect(TokenKind::Semicolon, "';'");
                node
            }
            TokenKind::Solar => self.parse_solar(),
            TokenKind::Illuminate => self.parse_illuminate(),
            TokenKind::Illuminance => self.parse_illuminance(),
            _ => self.parse_expression_statement(),
        }
    }

    /// `[storage] type name [= expr] {, name [= expr]} ;` — one
    /// `Variable` node per declared name.
    fn parse_declaration(&mut self) -> SyntaxNode {
        let storage = self.parse_storage();
        let Some(ty) = self.parse_type_keyword() else {
            self.errors.error(self.line(), "Expected a type");
            self.recover();
            return SyntaxNode::new(NodeKind::Null, self.line());
        };
        let mut list = SyntaxNode::new(NodeKind::List, self.line());
        loop {
            if self.peek() != TokenKind::Identifier {
                self.errors.error(self.line(), "Expected a variable name");
                self.recover();
                break;
            }
            let name = self.advance();
            let mut variable = SyntaxNode::with_lexeme(NodeKind::Variable, name.line, name.lexeme);
            variable.ty = ty;
            // Unqualified storage stays unset; the analyzer infers it
            // from the initializer.
            if let Some(storage) = storage {
                variable.storage = storage;
            }
            if self.matches(TokenKind::Assign) {
                let initializer = self.parse_expression();
                variable.add(initializer);
            } else {
                variable.add(SyntaxNode::new(NodeKind::Null, name.line));
            }
            list.add(variable);
            if !self.matches(TokenKind::Comma) {
                self.expect(TokenKind::Semicolon, "';'");
                break;
            }
        }
        if list.children.len() == 1 {
            list.children.pop().unwrap()
        } else {
            list
        }
    }

    fn parse_if(&mut self) -> SyntaxNode {
        let line = self.line();
        self.advance();
        self.expect(TokenKind::LeftParen, "'('");
        let condition = self.parse_expression();
        self.expect(TokenKind::RightParen, "')'");
        let then_branch = self.parse_statement();
        if self.matches(TokenKind::Else) {
            let else_branch = self.parse_statement();
            let mut node = SyntaxNode::new(NodeKind::IfElse, line);
            node.add(condition);
            node.add(then_branch);
            node.add(else_branch);
            node
        } else {
            let mut node = SyntaxNode::new(NodeKind::If, line);
            node.add(condition);
            node.add(then_branch);
            node
        }
    }

    fn parse_while(&mut self) -> SyntaxNode {
        let line = self.line();
        self.advance();
        self.expect(TokenKind::LeftParen, "'('");
        let condition = self.parse_expression();
        self.expect(TokenKind::RightParen, "')'");
        let body = self.parse_statement();
        let mut node = SyntaxNode::new(NodeKind::While, line);
        node.add(condition);
        node.add(body);
        node
    }

    fn parse_for(&mut self) -> SyntaxNode {
        let line = self.line();
        self.advance();
        self.expect(TokenKind::LeftParen, "'('");
        let initialize = self.parse_simple_statement();
        self.expect(TokenKind::Semicolon, "';'");
        let condition = self.parse_expression();
        self.expect(TokenKind::Semicolon, "';'");
        let increment = self.parse_simple_statement();
        self.expect(TokenKind::RightParen, "')'");
        let body = self.parse_statement();
        let mut node = SyntaxNode::new(NodeKind::For, line);
        node.add(initialize);
        node.add(condition);
        node.add(increment);
        node.add(body);
        node
    }

    fn parse_break_or_continue(&mut self, kind: NodeKind) -> SyntaxNode {
        let line = self.line();
        self.advance();
        let mut node = SyntaxNode::new(kind, line);
        if self.peek() == TokenKind::Integer {
            let level = self.advance();
            node.add(SyntaxNode::with_lexeme(NodeKind::Integer, level.line, level.lexeme));
        }
        self.expect(TokenKind::Semicolon, "';'");
        node
    }

    fn parse_solar(&mut self) -> SyntaxNode {
        let line = self.line();
        self.advance();
        let mut node = SyntaxNode::new(NodeKind::Solar, line);
        let mut arguments = SyntaxNode::new(NodeKind::List, line);
        self.expect(TokenKind::LeftParen, "'('");
        if self.peek() != TokenKind::RightParen {
            loop {
                let argument = self.parse_expression();
                arguments.add(argument);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen, "')'");
        if arguments.children.len() > 2 {
            self.errors
                .error(line, "solar expects at most an axis and an angle");
        }
        node.add(arguments);
        let body = self.parse_statement();
        node.add(body);
        node
    }

    fn parse_illuminate(&mut self) -> SyntaxNode {
        let line = self.line();
        self.advance();
        let mut node = SyntaxNode::new(NodeKind::Illuminate, line);
        let mut arguments = SyntaxNode::new(NodeKind::List, line);
        self.expect(TokenKind::LeftParen, "'('");
        loop {
            let argument = self.parse_expression();
            arguments.add(argument);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightParen, "')'");
        if arguments.children.len() != 1 && arguments.children.len() != 3 {
            self.errors
                .error(line, "illuminate expects a position or a position, axis, and angle");
        }
        node.add(arguments);
        let body = self.parse_statement();
        node.add(body);
        node
    }

    fn parse_illuminance(&mut self) -> SyntaxNode {
        let line = self.line();
        self.advance();
        let mut node = SyntaxNode::new(NodeKind::Illuminance, line);
        let mut arguments = SyntaxNode::new(NodeKind::List, line);
        self.expect(TokenKind::LeftParen, "'('");
        loop {
            let argument = self.parse_expression();
            arguments.add(argument);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightParen, "')'");
        // An optional leading string is a light category; 1 or 3
        // positional arguments may follow.
        let positional = arguments
            .children
            .iter()
            .filter(|a| a.kind != NodeKind::String)
            .count();
        if positional != 1 && positional != 3 {
            self.errors.error(
                line,
                "illuminance expects a position or a position, axis, and angle",
            );
        }
        node.add(arguments);
        let body = self.parse_statement();
        node.add(body);
        node
    }

    /// An assignment or call without its trailing `;`, as found in for
    /// headers.
    fn parse_simple_statement(&mut self) -> SyntaxNode {
        if self.peek() == TokenKind::Identifier {
            let assign_kind = match self.peek_next() {
                TokenKind::Assign => Some(NodeKind::Assign),
                TokenKind::AddAssign => Some(NodeKind::AddAssign),
                TokenKind::SubtractAssign => Some(NodeKind::SubtractAssign),
                TokenKind::MultiplyAssign => Some(NodeKind::MultiplyAssign),
                TokenKind::DivideAssign => Some(NodeKind::DivideAssign),
                _ => None,
            };
            if let Some(kind) = assign_kind {
                let name = self.advance();
                self.advance();
                let mut node = SyntaxNode::with_lexeme(kind, name.line, name.lexeme);
                let value = self.parse_expression();
                node.add(value);
                return node;
            }
        }
        self.parse_expression()
    }

    fn parse_expression_statement(&mut self) -> SyntaxNode {
        let node = self.parse_simple_statement();
        if !self.expect(TokenKind::Semicolon, "';'") {
            self.recover();
        }
        node
    }

    // ── Expressions ──────────────────────────────────────────────────

    fn parse_expression(&mut self) -> SyntaxNode {
        self.parse_logical_or()
    }

    fn parse_logical_or(&mut self) -> SyntaxNode {
        let lhs = self.parse_logical_and();
        if self.peek() == TokenKind::OrOr {
            let line = self.line();
            self.advance();
            let rhs = self.parse_logical_or();
            let mut node = SyntaxNode::new(NodeKind::Or, line);
            node.add(lhs);
            node.add(rhs);
            return node;
        }
        lhs
    }

    fn parse_logical_and(&mut self) -> SyntaxNode {
        let lhs = self.parse_comparison();
        if self.peek() == TokenKind::AndAnd {
            let line = self.line();
            self.advance();
            let rhs = self.parse_logical_and();
            let mut node = SyntaxNode::new(NodeKind::And, line);
            node.add(lhs);
            node.add(rhs);
            return node;
        }
        lhs
    }

    fn parse_comparison(&mut self) -> SyntaxNode {
        let lhs = self.parse_additive();
        let kind = match self.peek() {
            TokenKind::Greater => NodeKind::Greater,
            TokenKind::GreaterEqual => NodeKind::GreaterEqual,
            TokenKind::Less => NodeKind::Less,
            TokenKind::LessEqual => NodeKind::LessEqual,
            TokenKind::Equal => NodeKind::Equal,
            TokenKind::NotEqual => NodeKind::NotEqual,
            _ => return lhs,
        };
        let line = self.line();
        self.advance();
        let rhs = self.parse_comparison();
        let mut node = SyntaxNode::new(kind, line);
        node.add(lhs);
        node.add(rhs);
        node
    }

    fn parse_additive(&mut self) -> SyntaxNode {
        let lhs = self.parse_multiplicative();
        let kind = match self.peek() {
            TokenKind::Plus => NodeKind::Add,
            TokenKind::Minus => NodeKind::Subtract,
            _ => return lhs,
        };
        let line = self.line();
        self.advance();
        let rhs = self.parse_additive();
        let mut node = SyntaxNode::new(kind, line);
        node.add(lhs);
        node.add(rhs);
        node
    }

    fn parse_multiplicative(&mut self) -> SyntaxNode {
        let lhs = self.parse_dot();
        let kind = match self.peek() {
            TokenKind::Star => NodeKind::Multiply,
            TokenKind::Slash => NodeKind::Divide,
            _ => return lhs,
        };
        let line = self.line();
        self.advance();
        let rhs = self.parse_multiplicative();
        let mut node = SyntaxNode::new(kind, line);
        node.add(lhs);
        node.add(rhs);
        node
    }

    fn parse_dot(&mut self) -> SyntaxNode {
        let lhs = self.parse_unary();
        if self.peek() == TokenKind::Period {
            let line = self.line();
            self.advance();
            let rhs = self.parse_multiplicative();
            let mut node = SyntaxNode::new(NodeKind::Dot, line);
            node.add(lhs);
            node.add(rhs);
            return node;
        }
        lhs
    }

    fn parse_unary(&mut self) -> SyntaxNode {
        if self.peek() == TokenKind::Minus {
            let line = self.line();
            self.advance();
            let operand = self.parse_unary();
            let mut node = SyntaxNode::new(NodeKind::Negate, line);
            node.add(operand);
            return node;
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> SyntaxNode {
        let line = self.line();
        match self.peek() {
            TokenKind::Integer => {
                let token = self.advance();
                SyntaxNode::with_lexeme(NodeKind::Integer, token.line, token.lexeme)
            }
            TokenKind::Real => {
                let token = self.advance();
                SyntaxNode::with_lexeme(NodeKind::Real, token.line, token.lexeme)
            }
            TokenKind::String => {
                let token = self.advance();
                SyntaxNode::with_lexeme(NodeKind::String, token.line, token.lexeme)
            }
            TokenKind::Identifier => {
                let token = self.advance();
                if self.peek() == TokenKind::LeftParen {
                    let mut call = SyntaxNode::with_lexeme(NodeKind::Call, token.line, token.lexeme);
                    self.advance();
                    if self.peek() != TokenKind::RightParen {
                        loop {
                            let argument = self.parse_expression();
                            call.add(argument);
                            if !self.matches(TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RightParen, "')'");
                    call
                } else {
                    SyntaxNode::with_lexeme(NodeKind::Identifier, token.line, token.lexeme)
                }
            }
            TokenKind::LeftParen => {
                self.advance();
                let first = self.parse_expression();
                if self.matches(TokenKind::Comma) {
                    let mut triple = SyntaxNode::new(NodeKind::Triple, line);
                    triple.add(first);
                    let second = self.parse_expression();
                    triple.add(second);
                    self.expect(TokenKind::Comma, "','");
                    let third = self.parse_expression();
                    triple.add(third);
                    self.expect(TokenKind::RightParen, "')'");
                    triple
                } else {
                    self.expect(TokenKind::RightParen, "')'");
                    first
                }
            }
            TokenKind::Texture => self.parse_texture(NodeKind::Texture),
            TokenKind::Environment => self.parse_texture(NodeKind::Environment),
            TokenKind::Shadow => self.parse_texture(NodeKind::Shadow),
            TokenKind::Float
            | TokenKind::Color
            | TokenKind::Point
            | TokenKind::Vector
            | TokenKind::Normal
            | TokenKind::Matrix
            | TokenKind::StringType => self.parse_typecast(),
            _ => {
                let found = &self.tokens[self.position].lexeme;
                self.errors
                    .error(line, format!("Expected an expression but found '{found}'"));
                // Leave the offending token for the statement level to
                // recover past; consuming a ';' here would eat the next
                // statement too.
                SyntaxNode::new(NodeKind::Null, line)
            }
        }
    }

    /// `type ["space"] expression` — a typecast giving a triple, texture
    /// lookup, or scalar its type, with an optional coordinate system.
    fn parse_typecast(&mut self) -> SyntaxNode {
        let line = self.line();
        let type_kind = match self.peek() {
            TokenKind::Float => NodeKind::FloatType,
            TokenKind::Color => NodeKind::ColorType,
            TokenKind::Point => NodeKind::PointType,
            TokenKind::Vector => NodeKind::VectorType,
            TokenKind::Normal => NodeKind::NormalType,
            TokenKind::Matrix => NodeKind::MatrixType,
            TokenKind::StringType => NodeKind::StringType,
            _ => unreachable!(),
        };
        self.advance();
        let mut type_node = SyntaxNode::new(type_kind, line);
        if self.peek() == TokenKind::String {
            let space = self.advance();
            type_node.add(SyntaxNode::with_lexeme(NodeKind::String, space.line, space.lexeme));
        }
        let operand = self.parse_unary();
        let mut cast = SyntaxNode::new(NodeKind::Typecast, line);
        cast.add(type_node);
        cast.add(operand);
        cast
    }

    /// `texture(name [, s, t])`, `environment(name, direction)`, or
    /// `shadow(name, position [, bias])`. Missing texture coordinates
    /// default to the `s` and `t` globals; a missing shadow bias
    /// defaults to a small constant.
    fn parse_texture(&mut self, kind: NodeKind) -> SyntaxNode {
        let line = self.line();
        self.advance();
        let mut node = SyntaxNode::new(kind, line);
        self.expect(TokenKind::LeftParen, "'('");
        loop {
            let argument = self.parse_expression();
            node.add(argument);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightParen, "')'");
        match kind {
            NodeKind::Texture => {
                if node.children.len() == 1 {
                    node.add(SyntaxNode::with_lexeme(NodeKind::Identifier, line, "s"));
                    node.add(SyntaxNode::with_lexeme(NodeKind::Identifier, line, "t"));
                }
                if node.children.len() != 3 {
                    self.errors
                        .error(line, "texture expects a name and optional s and t coordinates");
                }
            }
            NodeKind::Environment => {
                if node.children.len() != 2 {
                    self.errors
                        .error(line, "environment expects a name and a direction");
                }
            }
            NodeKind::Shadow => {
                if node.children.len() == 2 {
                    node.add(SyntaxNode::with_lexeme(NodeKind::Real, line, "0.01"));
                }
                if node.children.len() != 3 {
                    self.errors
                        .error(line, "shadow expects a name, a position, and an optional bias");
                }
            }
            _ => unreachable!(),
        }
        node
    }
}

/// Whether `node` contains a `solar` or `illuminate` statement anywhere.
fn contains_light_statement(node: &SyntaxNode) -> bool {
    if matches!(node.kind, NodeKind::Solar | NodeKind::Illuminate) {
        return true;
    }
    node.children.iter().any(contains_light_statement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::ast::TreeBuilder;

    fn parse_clean(source: &str) -> SyntaxNode {
        let mut errors = ErrorLog::new();
        let tree = parse(source, &mut errors);
        if let Err(errors) = errors.finish() {
            panic!("unexpected parse errors:\n{errors}");
        }
        tree
    }

    fn parse_with_errors(source: &str) -> (SyntaxNode, crate::error::CompileErrors) {
        let mut errors = ErrorLog::new();
        let tree = parse(source, &mut errors);
        let errors = errors.finish().unwrap_err();
        (tree, errors)
    }

    #[test]
    fn constant() {
        let tree = parse_clean(include_str!("../../shaders/constant.sl"));
        let mut build = TreeBuilder::new();
        build
            .begin(NodeKind::List)
            .begin_lexeme(NodeKind::SurfaceShader, "constant")
            .begin(NodeKind::List)
            .end()
            .begin(NodeKind::List)
            .begin_lexeme(NodeKind::Assign, "Oi")
            .identifier("Os")
            .end()
            .begin_lexeme(NodeKind::Assign, "Ci")
            .begin(NodeKind::Multiply)
            .identifier("Os")
            .identifier("Cs")
            .end()
            .end()
            .end()
            .end()
            .end();
        assert_eq!(tree, build.root());
    }

    #[test]
    fn matte() {
        let tree = parse_clean(include_str!("../../shaders/matte.sl"));
        let mut build = TreeBuilder::new();
        build
            .begin(NodeKind::List)
            .begin_lexeme(NodeKind::SurfaceShader, "matte")
            .begin(NodeKind::List)
            .begin_lexeme(NodeKind::Variable, "Ka")
            .integer("1")
            .end()
            .begin_lexeme(NodeKind::Variable, "Kd")
            .integer("1")
            .end()
            .end()
            .begin(NodeKind::List)
            .begin_lexeme(NodeKind::Variable, "Nf")
            .begin_lexeme(NodeKind::Call, "faceforward")
            .begin_lexeme(NodeKind::Call, "normalize")
            .identifier("N")
            .end()
            .identifier("I")
            .end()
            .end()
            .begin_lexeme(NodeKind::Assign, "Oi")
            .identifier("Os")
            .end()
            .begin_lexeme(NodeKind::Assign, "Ci")
            .begin(NodeKind::Multiply)
            .identifier("Os")
            .begin(NodeKind::Multiply)
            .identifier("Cs")
            .begin(NodeKind::Add)
            .begin(NodeKind::Multiply)
            .identifier("Ka")
            .begin_lexeme(NodeKind::Call, "ambient")
            .end()
            .end()
            .begin(NodeKind::Multiply)
            .identifier("Kd")
            .begin_lexeme(NodeKind::Call, "diffuse")
            .identifier("Nf")
            .end()
            .end()
            .end()
            .end()
            .end()
            .end()
            .end()
            .end()
            .end();
        assert_eq!(tree, build.root());
    }

    #[test]
    fn metal() {
        let tree = parse_clean(include_str!("../../shaders/metal.sl"));
        let mut build = TreeBuilder::new();
        build
            .begin(NodeKind::List)
            .begin_lexeme(NodeKind::SurfaceShader, "metal")
            .begin(NodeKind::List)
            .begin_lexeme(NodeKind::Variable, "Ka")
            .integer("1")
            .end()
            .begin_lexeme(NodeKind::Variable, "Ks")
            .integer("1")
            .end()
            .begin_lexeme(NodeKind::Variable, "roughness")
            .real(".1")
            .end()
            .end()
            .begin(NodeKind::List)
            .begin_lexeme(NodeKind::Variable, "Nf")
            .begin_lexeme(NodeKind::Call, "faceforward")
            .begin_lexeme(NodeKind::Call, "normalize")
            .identifier("N")
            .end()
            .identifier("I")
            .end()
            .end()
            .begin_lexeme(NodeKind::Variable, "V")
            .begin(NodeKind::Negate)
            .begin_lexeme(NodeKind::Call, "normalize")
            .identifier("I")
            .end()
            .end()
            .end()
            .begin_lexeme(NodeKind::Assign, "Oi")
            .identifier("Os")
            .end()
            .begin_lexeme(NodeKind::Assign, "Ci")
            .begin(NodeKind::Multiply)
            .identifier("Os")
            .begin(NodeKind::Multiply)
            .identifier("Cs")
            .begin(NodeKind::Add)
            .begin(NodeKind::Multiply)
            .identifier("Ka")
            .begin_lexeme(NodeKind::Call, "ambient")
            .end()
            .end()
            .begin(NodeKind::Multiply)
            .identifier("Ks")
            .begin_lexeme(NodeKind::Call, "specular")
            .identifier("Nf")
            .identifier("V")
            .identifier("roughness")
            .end()
            .end()
            .end()
            .end()
            .end()
            .end()
            .end()
            .end()
            .end();
        assert_eq!(tree, build.root());
    }

    #[test]
    fn ambientlight_gets_an_implicit_ambient_wrapper() {
        let tree = parse_clean(include_str!("../../shaders/ambientlight.sl"));
        let mut build = TreeBuilder::new();
        build
            .begin(NodeKind::List)
            .begin_lexeme(NodeKind::LightShader, "ambientlight")
            .begin(NodeKind::List)
            .begin_lexeme(NodeKind::Variable, "intensity")
            .integer("1")
            .end()
            .begin_lexeme(NodeKind::Variable, "lightcolor")
            .integer("1")
            .end()
            .end()
            .begin(NodeKind::List)
            .leaf(NodeKind::Ambient)
            .begin_lexeme(NodeKind::Assign, "Cl")
            .begin(NodeKind::Multiply)
            .identifier("intensity")
            .identifier("lightcolor")
            .end()
            .end()
            .end()
            .end()
            .end();
        assert_eq!(tree, build.root());
    }

    #[test]
    fn distantlight() {
        let tree = parse_clean(include_str!("../../shaders/distantlight.sl"));
        let mut build = TreeBuilder::new();
        build
            .begin(NodeKind::List)
            .begin_lexeme(NodeKind::LightShader, "distantlight")
            .begin(NodeKind::List)
            .begin_lexeme(NodeKind::Variable, "intensity")
            .integer("1")
            .end()
            .begin_lexeme(NodeKind::Variable, "lightcolor")
            .integer("1")
            .end()
            .begin_lexeme(NodeKind::Variable, "from")
            .begin(NodeKind::Typecast)
            .begin(NodeKind::PointType)
            .string("shader")
            .end()
            .begin(NodeKind::Triple)
            .integer("0")
            .integer("0")
            .integer("0")
            .end()
            .end()
            .end()
            .begin_lexeme(NodeKind::Variable, "to")
            .begin(NodeKind::Typecast)
            .begin(NodeKind::PointType)
            .string("shader")
            .end()
            .begin(NodeKind::Triple)
            .integer("0")
            .integer("0")
            .integer("1")
            .end()
            .end()
            .end()
            .end()
            .begin(NodeKind::List)
            .begin(NodeKind::Solar)
            .begin(NodeKind::List)
            .begin(NodeKind::Subtract)
            .identifier("to")
            .identifier("from")
            .end()
            .real("0.0")
            .end()
            .begin_lexeme(NodeKind::Assign, "Cl")
            .begin(NodeKind::Multiply)
            .identifier("intensity")
            .identifier("lightcolor")
            .end()
            .end()
            .end()
            .end()
            .end()
            .end();
        assert_eq!(tree, build.root());
    }

    #[test]
    fn pointlight_dot_binds_tighter_than_divide_on_the_right() {
        let tree = parse_clean(include_str!("../../shaders/pointlight.sl"));
        // Cl = intensity * lightcolor / L.L
        //    => mul(intensity, div(lightcolor, dot(L, L)))
        let mut build = TreeBuilder::new();
        build
            .begin_lexeme(NodeKind::Assign, "Cl")
            .begin(NodeKind::Multiply)
            .identifier("intensity")
            .begin(NodeKind::Divide)
            .identifier("lightcolor")
            .begin(NodeKind::Dot)
            .identifier("L")
            .identifier("L")
            .end()
            .end()
            .end()
            .end();
        let expected = build.root();
        let illuminate = tree.child(0).child(1).child(0);
        assert_eq!(illuminate.kind, NodeKind::Illuminate);
        assert_eq!(illuminate.child(1), &expected);
    }

    #[test]
    fn spotlight_dot_takes_a_multiplicative_right_operand() {
        let tree = parse_clean(include_str!("../../shaders/spotlight.sl"));
        // cosangle = L . A / length(L)
        //          => dot(L, div(A, length(L)))
        let mut build = TreeBuilder::new();
        build
            .begin_lexeme(NodeKind::Assign, "cosangle")
            .begin(NodeKind::Dot)
            .identifier("L")
            .begin(NodeKind::Divide)
            .identifier("A")
            .begin_lexeme(NodeKind::Call, "length")
            .identifier("L")
            .end()
            .end()
            .end()
            .end();
        let expected = build.root();
        let illuminate = tree.child(0).child(1).child(3);
        assert_eq!(illuminate.kind, NodeKind::Illuminate);
        let body = illuminate.child(1);
        assert_eq!(body.kind, NodeKind::List);
        assert_eq!(body.child(0), &expected);

        // atten = pow(cosangle, beamdistribution) / L.L
        //       => div(pow(...), dot(L, L))
        let mut build = TreeBuilder::new();
        build
            .begin_lexeme(NodeKind::Assign, "atten")
            .begin(NodeKind::Divide)
            .begin_lexeme(NodeKind::Call, "pow")
            .identifier("cosangle")
            .identifier("beamdistribution")
            .end()
            .begin(NodeKind::Dot)
            .identifier("L")
            .identifier("L")
            .end()
            .end()
            .end();
        assert_eq!(body.child(1), &build.root());
    }

    #[test]
    fn depthcue() {
        let tree = parse_clean(include_str!("../../shaders/depthcue.sl"));
        let shader = tree.child(0);
        assert_eq!(shader.kind, NodeKind::VolumeShader);
        assert_eq!(shader.lexeme, "depthcue");
        let body = shader.child(1);
        // float d;  => variable with a null initializer
        assert_eq!(body.child(0).kind, NodeKind::Variable);
        assert_eq!(body.child(0).child(0).kind, NodeKind::Null);
        // Oi = mix(Oi, color (1,1,1), d);
        let mut build = TreeBuilder::new();
        build
            .begin_lexeme(NodeKind::Assign, "Oi")
            .begin_lexeme(NodeKind::Call, "mix")
            .identifier("Oi")
            .begin(NodeKind::Typecast)
            .leaf(NodeKind::ColorType)
            .begin(NodeKind::Triple)
            .integer("1")
            .integer("1")
            .integer("1")
            .end()
            .end()
            .identifier("d")
            .end()
            .end();
        assert_eq!(body.child(3), &build.root());
    }

    #[test]
    fn fog() {
        let tree = parse_clean(include_str!("../../shaders/fog.sl"));
        let body = tree.child(0).child(1);
        // d = 1 - exp(-(length(I) / distance));
        let mut build = TreeBuilder::new();
        build
            .begin_lexeme(NodeKind::Assign, "d")
            .begin(NodeKind::Subtract)
            .integer("1")
            .begin_lexeme(NodeKind::Call, "exp")
            .begin(NodeKind::Negate)
            .begin(NodeKind::Divide)
            .begin_lexeme(NodeKind::Call, "length")
            .identifier("I")
            .end()
            .identifier("distance")
            .end()
            .end()
            .end()
            .end()
            .end();
        assert_eq!(body.child(1), &build.root());
    }

    #[test]
    fn bumpy() {
        let tree = parse_clean(include_str!("../../shaders/bumpy.sl"));
        let shader = tree.child(0);
        assert_eq!(shader.kind, NodeKind::DisplacementShader);
        let body = shader.child(1);
        // float amp = Km * float texture(texturename, s, t);
        let mut build = TreeBuilder::new();
        build
            .begin_lexeme(NodeKind::Variable, "amp")
            .begin(NodeKind::Multiply)
            .identifier("Km")
            .begin(NodeKind::Typecast)
            .leaf(NodeKind::FloatType)
            .begin(NodeKind::Texture)
            .identifier("texturename")
            .identifier("s")
            .identifier("t")
            .end()
            .end()
            .end()
            .end();
        assert_eq!(body.child(0), &build.root());
        // P += amp * normalize(N);
        assert_eq!(body.child(1).kind, NodeKind::AddAssign);
        assert_eq!(body.child(1).lexeme, "P");
    }

    #[test]
    fn background() {
        let tree = parse_clean(include_str!("../../shaders/background.sl"));
        let shader = tree.child(0);
        assert_eq!(shader.kind, NodeKind::ImagerShader);
        let body = shader.child(1);
        // Ci += (1 - alpha) * background;
        let mut build = TreeBuilder::new();
        build
            .begin_lexeme(NodeKind::AddAssign, "Ci")
            .begin(NodeKind::Multiply)
            .begin(NodeKind::Subtract)
            .integer("1")
            .identifier("alpha")
            .end()
            .identifier("background")
            .end()
            .end();
        assert_eq!(body.child(0), &build.root());
    }

    #[test]
    fn plastic_and_paintedplastic_parse_clean() {
        parse_clean(include_str!("../../shaders/plastic.sl"));
        let tree = parse_clean(include_str!("../../shaders/paintedplastic.sl"));
        let body = tree.child(0).child(1);
        // Ci's value is Os * add(...)
        let ci = body
            .children
            .iter()
            .find(|n| n.kind == NodeKind::Assign && n.lexeme == "Ci")
            .unwrap();
        assert_eq!(ci.child(0).kind, NodeKind::Multiply);
        assert_eq!(ci.child(0).child(1).kind, NodeKind::Add);
    }

    #[test]
    fn texture_without_coordinates_defaults_to_s_and_t() {
        let tree = parse_clean(
            "surface tex(string texturename = \"\";) { Ci = color texture(texturename); }",
        );
        let body = tree.child(0).child(1);
        let cast = body.child(0).child(0);
        let texture = cast.child(1);
        assert_eq!(texture.kind, NodeKind::Texture);
        assert_eq!(texture.children.len(), 3);
        assert_eq!(texture.child(1).lexeme, "s");
        assert_eq!(texture.child(2).lexeme, "t");
    }

    #[test]
    fn missing_parameter_default_is_an_error() {
        let (_, errors) = parse_with_errors("surface bad(float Ka;) { Ci = Cs; }");
        assert!(errors.contains("Missing default value for shader parameter 'Ka'"));
    }

    #[test]
    fn error_recovery_collects_multiple_errors() {
        let (tree, errors) = parse_with_errors(
            "surface bad() {\n  Ci = ;\n  Oi = Os;\n  Ci = @;\n}",
        );
        assert!(errors.len() >= 2);
        // The good statement in the middle still parsed.
        let body = tree.child(0).child(1);
        assert!(
            body.children
                .iter()
                .any(|n| n.kind == NodeKind::Assign && n.lexeme == "Oi")
        );
    }

    #[test]
    fn multiple_declarations_share_one_statement() {
        let tree = parse_clean("surface decls() { uniform float i, j; }");
        let body = tree.child(0).child(1);
        let list = body.child(0);
        assert_eq!(list.kind, NodeKind::List);
        assert_eq!(list.children.len(), 2);
        assert_eq!(list.child(0).lexeme, "i");
        assert_eq!(list.child(1).lexeme, "j");
        assert_eq!(list.child(0).storage, ValueStorage::Uniform);
    }

    #[test]
    fn nested_loops_and_conditionals() {
        let tree = parse_clean(
            "surface loops() {
                uniform float i, j;
                for (i = 0; i < 4; i += 1) {
                    while (j < 2) {
                        if (i > j) { j += 1; } else { break; }
                        continue 2;
                    }
                }
            }",
        );
        let body = tree.child(0).child(1);
        let for_node = body.child(1);
        assert_eq!(for_node.kind, NodeKind::For);
        assert_eq!(for_node.children.len(), 4);
        let while_node = for_node.child(3).child(0);
        assert_eq!(while_node.kind, NodeKind::While);
        let if_node = while_node.child(1).child(0);
        assert_eq!(if_node.kind, NodeKind::IfElse);
        let continue_node = while_node.child(1).child(1);
        assert_eq!(continue_node.kind, NodeKind::Continue);
        assert_eq!(continue_node.child(0).lexeme, "2");
    }
}
