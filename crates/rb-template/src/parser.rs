//! Recursive-descent parser for the expression sublanguage.

use rb_core::EngineError;

use crate::lexer::{Spanned, Token, tokenize};

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Dotted identifier path (`state.answers.foo`).
    Path(Vec<String>),
    Str(String),
    Number(f64),
    Bool(bool),
    Null,
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Helper invocation (`json x`, `includes coll needle`, `array a b`).
    Helper { name: String, args: Vec<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    StrictEq,
    StrictNe,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

const HELPERS: &[&str] = &["json", "jsonString", "jsonLiteral", "includes", "array"];

/// Fixed argument count per helper; `None` means variadic.
fn helper_arity(name: &str) -> Option<usize> {
    match name {
        "json" | "jsonString" | "jsonLiteral" => Some(1),
        "includes" => Some(2),
        "array" => None,
        _ => Some(0),
    }
}

pub fn parse(source: &str, base_offset: usize) -> Result<Expr, EngineError> {
    let tokens = tokenize(source, base_offset)?;
    let mut parser = Parser {
        tokens,
        index: 0,
        end_offset: base_offset + source.len(),
    };
    let expr = parser.expression()?;
    if let Some(extra) = parser.peek() {
        return Err(parser.error_at(
            extra.position,
            format!("unexpected trailing {}", extra.token.describe()),
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    index: usize,
    end_offset: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.index)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn error_at(&self, position: usize, message: impl Into<String>) -> EngineError {
        EngineError::Template {
            position,
            message: message.into(),
        }
    }

    fn error_eof(&self, message: impl Into<String>) -> EngineError {
        self.error_at(self.end_offset, message)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek().is_some_and(|s| &s.token == expected) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expression(&mut self) -> Result<Expr, EngineError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, EngineError> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::Or) {
            let right = self.and_expr()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, EngineError> {
        let mut left = self.equality_expr()?;
        while self.eat(&Token::And) {
            let right = self.equality_expr()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn equality_expr(&mut self) -> Result<Expr, EngineError> {
        let mut left = self.comparison_expr()?;
        loop {
            let op = match self.peek().map(|s| &s.token) {
                Some(Token::StrictEq) => BinaryOp::StrictEq,
                Some(Token::StrictNe) => BinaryOp::StrictNe,
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                _ => break,
            };
            self.index += 1;
            let right = self.comparison_expr()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn comparison_expr(&mut self) -> Result<Expr, EngineError> {
        let mut left = self.unary_expr()?;
        loop {
            let op = match self.peek().map(|s| &s.token) {
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::Le) => BinaryOp::Le,
                _ => break,
            };
            self.index += 1;
            let right = self.unary_expr()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn unary_expr(&mut self) -> Result<Expr, EngineError> {
        if self.eat(&Token::Not) {
            let inner = self.unary_expr()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.call_expr()
    }

    /// Helper invocation or a primary. Helper names only act as helpers when
    /// followed by an argument; a bare `json` is an ordinary path.
    fn call_expr(&mut self) -> Result<Expr, EngineError> {
        if let Some(Spanned {
            token: Token::Ident(name),
            ..
        }) = self.peek()
        {
            let is_helper = HELPERS.contains(&name.as_str());
            let next_is_dot = self
                .tokens
                .get(self.index + 1)
                .is_some_and(|s| s.token == Token::Dot);
            if is_helper && !next_is_dot && self.starts_primary(self.index + 1) {
                let name = name.clone();
                self.index += 1;
                let mut args = Vec::new();
                match helper_arity(&name) {
                    Some(count) => {
                        for _ in 0..count {
                            args.push(self.primary()?);
                        }
                    }
                    None => {
                        while self.starts_primary(self.index) {
                            args.push(self.primary()?);
                        }
                    }
                }
                return Ok(Expr::Helper { name, args });
            }
        }
        self.primary()
    }

    /// Whether the token at `index` can begin a primary expression.
    fn starts_primary(&self, index: usize) -> bool {
        matches!(
            self.tokens.get(index).map(|s| &s.token),
            Some(Token::Ident(_) | Token::Number(_) | Token::Str(_) | Token::LParen)
        )
    }

    fn primary(&mut self) -> Result<Expr, EngineError> {
        let Some(spanned) = self.advance() else {
            return Err(self.error_eof("unexpected end of expression"));
        };
        match spanned.token {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::LParen => {
                let inner = self.expression()?;
                if !self.eat(&Token::RParen) {
                    return Err(match self.peek() {
                        Some(next) => self.error_at(
                            next.position,
                            format!("expected ')', found {}", next.token.describe()),
                        ),
                        None => self.error_eof("expected ')'"),
                    });
                }
                Ok(inner)
            }
            Token::Ident(first) => match first.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                _ => {
                    let mut segments = vec![first];
                    while self.eat(&Token::Dot) {
                        match self.advance() {
                            Some(Spanned {
                                token: Token::Ident(segment),
                                ..
                            }) => segments.push(segment),
                            Some(Spanned {
                                token: Token::Number(n),
                                ..
                            }) if n >= 0.0 && n.fract() == 0.0 => {
                                segments.push((n as u64).to_string());
                            }
                            Some(other) => {
                                return Err(self.error_at(
                                    other.position,
                                    format!(
                                        "expected path segment after '.', found {}",
                                        other.token.describe()
                                    ),
                                ));
                            }
                            None => {
                                return Err(self.error_eof("expected path segment after '.'"));
                            }
                        }
                    }
                    Ok(Expr::Path(segments))
                }
            },
            other => Err(self.error_at(
                spanned.position,
                format!("unexpected {}", other.describe()),
            )),
        }
    }
}
