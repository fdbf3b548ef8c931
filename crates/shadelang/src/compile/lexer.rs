//! Tokenizer for shader source.
//!
//! Hand-written, like the parser it feeds. Line endings may be LF or
//! CRLF; both `//` and `/* ... */` comments are skipped. Unknown
//! characters are reported and skipped so one pass surfaces every
//! lexical error.

use crate::error::ErrorLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Integer,
    Real,
    String,

    // Shader kinds.
    Surface,
    Displacement,
    Light,
    Volume,
    Imager,

    // Storage classes and types.
    Uniform,
    Varying,
    Float,
    Color,
    Point,
    Vector,
    Normal,
    Matrix,
    StringType,

    // Statements.
    If,
    Else,
    While,
    For,
    Break,
    Continue,
    Return,
    Illuminate,
    Illuminance,
    Solar,
    Texture,
    Environment,
    Shadow,

    // Punctuation and operators.
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Semicolon,
    Assign,
    AddAssign,
    SubtractAssign,
    MultiplyAssign,
    DivideAssign,
    Plus,
    Minus,
    Star,
    Slash,
    Period,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    Not,
    AndAnd,
    OrOr,

    EndOfFile,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: u32,
}

impl Token {
    fn new(kind: TokenKind, lexeme: impl Into<String>, line: u32) -> Token {
        Token {
            kind,
            lexeme: lexeme.into(),
            line,
        }
    }
}

fn keyword(identifier: &str) -> Option<TokenKind> {
    Some(match identifier {
        "surface" => TokenKind::Surface,
        "displacement" => TokenKind::Displacement,
        "light" => TokenKind::Light,
        "volume" => TokenKind::Volume,
        "imager" => TokenKind::Imager,
        "uniform" => TokenKind::Uniform,
        "varying" => TokenKind::Varying,
        "float" => TokenKind::Float,
        "color" => TokenKind::Color,
        "point" => TokenKind::Point,
        "vector" => TokenKind::Vector,
        "normal" => TokenKind::Normal,
        "matrix" => TokenKind::Matrix,
        "string" => TokenKind::StringType,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "for" => TokenKind::For,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "return" => TokenKind::Return,
        "illuminate" => TokenKind::Illuminate,
        "illuminance" => TokenKind::Illuminance,
        "solar" => TokenKind::Solar,
        "texture" => TokenKind::Texture,
        "environment" => TokenKind::Environment,
        "shadow" => TokenKind::Shadow,
        _ => return None,
    })
}

fn eat(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, next: char) -> bool {
    if chars.peek() == Some(&next) {
        chars.next();
        true
    } else {
        false
    }
}

/// Tokenize `source`, reporting lexical errors into `errors`.
pub fn tokenize(source: &str, errors: &mut ErrorLog) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line: u32 = 1;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut lexeme = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        lexeme.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let kind = keyword(&lexeme).unwrap_or(TokenKind::Identifier);
                tokens.push(Token::new(kind, lexeme, line));
            }
            c if c.is_ascii_digit() || c == '.' => {
                // A lone '.' is the dot-product operator; a '.' followed
                // by a digit starts a real literal like `.5`.
                if c == '.' {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if !lookahead.peek().is_some_and(|d| d.is_ascii_digit()) {
                        chars.next();
                        tokens.push(Token::new(TokenKind::Period, ".", line));
                        continue;
                    }
                }
                let mut lexeme = String::new();
                let mut real = false;
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        lexeme.push(c);
                        chars.next();
                    } else if c == '.' && !real {
                        real = true;
                        lexeme.push(c);
                        chars.next();
                    } else if (c == 'e' || c == 'E') && !lexeme.is_empty() {
                        let mut lookahead = chars.clone();
                        lookahead.next();
                        let next = lookahead.peek().copied();
                        if next.is_some_and(|d| d.is_ascii_digit() || d == '+' || d == '-') {
                            real = true;
                            lexeme.push(c);
                            chars.next();
                            if let Some(&sign @ ('+' | '-')) = chars.peek() {
                                lexeme.push(sign);
                                chars.next();
                            }
                        } else {
                            break;
                        }
                    } else {
                        break;
                    }
                }
                let kind = if real { TokenKind::Real } else { TokenKind::Integer };
                tokens.push(Token::new(kind, lexeme, line));
            }
            '"' => {
                chars.next();
                let mut lexeme = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some('n') => lexeme.push('\n'),
                            Some('t') => lexeme.push('\t'),
                            Some('r') => lexeme.push('\r'),
                            Some('\\') => lexeme.push('\\'),
                            Some('"') => lexeme.push('"'),
                            Some(other) => lexeme.push(other),
                            None => break,
                        },
                        '\n' => {
                            line += 1;
                            lexeme.push(c);
                        }
                        _ => lexeme.push(c),
                    }
                }
                if !closed {
                    errors.error(line, "Unterminated string literal");
                }
                tokens.push(Token::new(TokenKind::String, lexeme, line));
            }
            '/' => {
                chars.next();
                match chars.peek() {
                    Some('/') => {
                        for c in chars.by_ref() {
                            if c == '\n' {
                                line += 1;
                                break;
                            }
                        }
                    }
                    Some('*') => {
                        chars.next();
                        let mut star = false;
                        let mut closed = false;
                        for c in chars.by_ref() {
                            if c == '\n' {
                                line += 1;
                            }
                            if star && c == '/' {
                                closed = true;
                                break;
                            }
                            star = c == '*';
                        }
                        if !closed {
                            errors.error(line, "Unterminated comment");
                        }
                    }
                    Some('=') => {
                        chars.next();
                        tokens.push(Token::new(TokenKind::DivideAssign, "/=", line));
                    }
                    _ => tokens.push(Token::new(TokenKind::Slash, "/", line)),
                }
            }
            _ => {
                chars.next();
                let token = match c {
                    '(' => Token::new(TokenKind::LeftParen, "(", line),
                    ')' => Token::new(TokenKind::RightParen, ")", line),
                    '{' => Token::new(TokenKind::LeftBrace, "{", line),
                    '}' => Token::new(TokenKind::RightBrace, "}", line),
                    ',' => Token::new(TokenKind::Comma, ",", line),
                    ';' => Token::new(TokenKind::Semicolon, ";", line),
                    '+' if eat(&mut chars, '=') => Token::new(TokenKind::AddAssign, "+=", line),
                    '+' => Token::new(TokenKind::Plus, "+", line),
                    '-' if eat(&mut chars, '=') => {
                        Token::new(TokenKind::SubtractAssign, "-=", line)
                    }
                    '-' => Token::new(TokenKind::Minus, "-", line),
                    '*' if eat(&mut chars, '=') => {
                        Token::new(TokenKind::MultiplyAssign, "*=", line)
                    }
                    '*' => Token::new(TokenKind::Star, "*", line),
                    '=' if eat(&mut chars, '=') => Token::new(TokenKind::Equal, "==", line),
                    '=' => Token::new(TokenKind::Assign, "=", line),
                    '<' if eat(&mut chars, '=') => Token::new(TokenKind::LessEqual, "<=", line),
                    '<' => Token::new(TokenKind::Less, "<", line),
                    '>' if eat(&mut chars, '=') => {
                        Token::new(TokenKind::GreaterEqual, ">=", line)
                    }
                    '>' => Token::new(TokenKind::Greater, ">", line),
                    '!' if eat(&mut chars, '=') => Token::new(TokenKind::NotEqual, "!=", line),
                    '!' => Token::new(TokenKind::Not, "!", line),
                    '&' if eat(&mut chars, '&') => Token::new(TokenKind::AndAnd, "&&", line),
                    '|' if eat(&mut chars, '|') => Token::new(TokenKind::OrOr, "||", line),
                    other => {
                        errors.error(line, format!("Unexpected character '{other}'"));
                        continue;
                    }
                };
                tokens.push(token);
            }
        }
    }

    tokens.push(Token::new(TokenKind::EndOfFile, "", line));
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut errors = ErrorLog::new();
        let tokens = tokenize(source, &mut errors);
        assert!(errors.finish().is_ok());
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn shader_header_tokens() {
        assert_eq!(
            kinds("surface matte(float Ka = 1;)"),
            vec![
                TokenKind::Surface,
                TokenKind::Identifier,
                TokenKind::LeftParen,
                TokenKind::Float,
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::Integer,
                TokenKind::Semicolon,
                TokenKind::RightParen,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn leading_dot_real_versus_dot_product() {
        let mut errors = ErrorLog::new();
        let tokens = tokenize("roughness = .1; c = L.L;", &mut errors);
        assert!(errors.finish().is_ok());
        assert_eq!(tokens[2].kind, TokenKind::Real);
        assert_eq!(tokens[2].lexeme, ".1");
        let period = tokens.iter().find(|t| t.kind == TokenKind::Period);
        assert!(period.is_some());
    }

    #[test]
    fn string_escapes_and_crlf_lines() {
        let mut errors = ErrorLog::new();
        let tokens = tokenize("\"a\\\"b\"\r\nx", &mut errors);
        assert!(errors.finish().is_ok());
        assert_eq!(tokens[0].lexeme, "a\"b");
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("Ka /* block */ = 1; // rest\n"),
            vec![
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::Integer,
                TokenKind::Semicolon,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn compound_operators() {
        assert_eq!(
            kinds("+= -= *= /= == != <= >= && ||"),
            vec![
                TokenKind::AddAssign,
                TokenKind::SubtractAssign,
                TokenKind::MultiplyAssign,
                TokenKind::DivideAssign,
                TokenKind::Equal,
                TokenKind::NotEqual,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn unknown_characters_are_reported_and_skipped() {
        let mut errors = ErrorLog::new();
        let tokens = tokenize("Ka @ 1", &mut errors);
        assert_eq!(errors.count(), 1);
        assert_eq!(tokens.len(), 3); // Ka, 1, eof
    }

    #[test]
    fn exponent_literals() {
        let mut errors = ErrorLog::new();
        let tokens = tokenize("1e3 2.5e-2", &mut errors);
        assert!(errors.finish().is_ok());
        assert_eq!(tokens[0].kind, TokenKind::Real);
        assert_eq!(tokens[1].kind, TokenKind::Real);
        assert_eq!(tokens[1].lexeme, "2.5e-2");
    }
}
