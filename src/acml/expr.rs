//! Condition expressions.
//!
//! A tiny total language over the validation context: the literals `null`,
//! booleans, numbers and strings; the variables `entity`, `index`, `key`
//! and `length`; member access and list indexing; comparisons and boolean
//! connectives. Expressions are compiled to an AST once, when the template
//! is built, and interpreted under a wall-clock deadline so a pathological
//! condition cannot stall validation.

use std::time::Instant;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExprError {
    #[error("syntax error at offset {0}: {1}")]
    Parse(usize, String),
    #[error("{0}")]
    Eval(String),
    #[error("condition evaluation timed out")]
    Timeout,
}

/// What a condition sees: the entity under validation, its position within
/// the enclosing container, and the container's length.
pub struct Context<'a> {
    pub entity: &'a Value,
    pub index: Option<usize>,
    pub key: Option<&'a str>,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Entity,
    Index,
    Key,
    Length,
    Member(Box<Expr>, String),
    At(Box<Expr>, usize),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl Expr {
    pub fn parse(source: &str) -> Result<Expr, ExprError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, at: 0 };
        let expr = parser.or()?;
        match parser.peek() {
            None => Ok(expr),
            Some((offset, _)) => Err(ExprError::Parse(*offset, "trailing input".to_owned())),
        }
    }

    pub fn eval(&self, ctx: &Context<'_>, deadline: Instant) -> Result<Value, ExprError> {
        if Instant::now() >= deadline {
            return Err(ExprError::Timeout);
        }
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Entity => Ok(ctx.entity.clone()),
            Expr::Index => Ok(ctx.index.map_or(Value::Null, Value::from)),
            Expr::Key => Ok(ctx.key.map_or(Value::Null, Value::from)),
            Expr::Length => Ok(Value::from(ctx.length)),
            Expr::Member(of, name) => match of.eval(ctx, deadline)? {
                Value::Object(mut entries) => {
                    Ok(entries.remove(name.as_str()).unwrap_or(Value::Null))
                }
                other => Err(ExprError::Eval(format!(
                    "cannot read member {:?} of a {}",
                    name,
                    crate::apes::type_tag(&other)
                ))),
            },
            Expr::At(of, position) => match of.eval(ctx, deadline)? {
                Value::Array(mut items) => {
                    if *position < items.len() {
                        Ok(items.swap_remove(*position))
                    } else {
                        Ok(Value::Null)
                    }
                }
                other => Err(ExprError::Eval(format!(
                    "cannot index a {}",
                    crate::apes::type_tag(&other)
                ))),
            },
            Expr::Not(inner) => match inner.eval(ctx, deadline)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(ExprError::Eval(format!(
                    "cannot negate a {}",
                    crate::apes::type_tag(&other)
                ))),
            },
            Expr::Binary(op, lhs, rhs) => Self::binary(*op, lhs, rhs, ctx, deadline),
        }
    }

    fn binary(
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        ctx: &Context<'_>,
        deadline: Instant,
    ) -> Result<Value, ExprError> {
        let left = lhs.eval(ctx, deadline)?;
        match op {
            BinOp::And | BinOp::Or => {
                let left = as_bool(&left)?;
                // Short circuit.
                if (op == BinOp::And && !left) || (op == BinOp::Or && left) {
                    return Ok(Value::Bool(left));
                }
                let right = as_bool(&rhs.eval(ctx, deadline)?)?;
                Ok(Value::Bool(right))
            }
            BinOp::Eq => Ok(Value::Bool(left == rhs.eval(ctx, deadline)?)),
            BinOp::Ne => Ok(Value::Bool(left != rhs.eval(ctx, deadline)?)),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let right = rhs.eval(ctx, deadline)?;
                let (a, b) = (as_number(&left)?, as_number(&right)?);
                Ok(Value::Bool(match op {
                    BinOp::Lt => a < b,
                    BinOp::Le => a <= b,
                    BinOp::Gt => a > b,
                    _ => a >= b,
                }))
            }
        }
    }
}

fn as_bool(value: &Value) -> Result<bool, ExprError> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(ExprError::Eval(format!(
            "expected a Boolean, got a {}",
            crate::apes::type_tag(other)
        ))),
    }
}

fn as_number(value: &Value) -> Result<f64, ExprError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ExprError::Eval("number out of range".to_owned())),
        other => Err(ExprError::Eval(format!(
            "expected a Number, got a {}",
            crate::apes::type_tag(other)
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Text(String),
    Symbol(&'static str),
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ExprError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut at = 0;
    while at < bytes.len() {
        let start = at;
        match bytes[at] {
            b' ' | b'\t' | b'\r' | b'\n' => at += 1,
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => {
                while at < bytes.len() && (bytes[at].is_ascii_alphanumeric() || bytes[at] == b'_') {
                    at += 1;
                }
                tokens.push((start, Token::Ident(source[start..at].to_owned())));
            }
            b'0'..=b'9' | b'-' => {
                at += 1;
                while at < bytes.len() && (bytes[at].is_ascii_digit() || bytes[at] == b'.') {
                    at += 1;
                }
                let number: f64 = source[start..at]
                    .parse()
                    .map_err(|_| ExprError::Parse(start, "malformed number".to_owned()))?;
                tokens.push((start, Token::Number(number)));
            }
            quote @ (b'"' | b'\'') => {
                at += 1;
                let text_start = at;
                while at < bytes.len() && bytes[at] != quote {
                    at += 1;
                }
                if at == bytes.len() {
                    return Err(ExprError::Parse(start, "unterminated string".to_owned()));
                }
                tokens.push((start, Token::Text(source[text_start..at].to_owned())));
                at += 1;
            }
            _ => {
                const SYMBOLS: [&str; 13] = [
                    "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "(", ")", "[", "]",
                ];
                let rest = &source[at..];
                match SYMBOLS.iter().copied().find(|symbol| rest.starts_with(symbol)) {
                    Some(symbol) => {
                        tokens.push((start, Token::Symbol(symbol)));
                        at += symbol.len();
                    }
                    None if bytes[at] == b'.' => {
                        tokens.push((start, Token::Symbol(".")));
                        at += 1;
                    }
                    None => {
                        return Err(ExprError::Parse(start, "unexpected character".to_owned()))
                    }
                }
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    at: usize,
}

impl Parser {
    fn peek(&self) -> Option<&(usize, Token)> {
        self.tokens.get(self.at)
    }

    fn accept_symbol(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some((_, Token::Symbol(s))) if *s == symbol) {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: &'static str) -> Result<(), ExprError> {
        if self.accept_symbol(symbol) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {:?}", symbol)))
        }
    }

    fn unexpected(&self, what: &str) -> ExprError {
        let offset = self
            .peek()
            .or_else(|| self.tokens.last())
            .map_or(0, |(offset, _)| *offset);
        ExprError::Parse(offset, what.to_owned())
    }

    fn or(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.and()?;
        while self.accept_symbol("||") {
            expr = Expr::Binary(BinOp::Or, Box::new(expr), Box::new(self.and()?));
        }
        Ok(expr)
    }

    fn and(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.not()?;
        while self.accept_symbol("&&") {
            expr = Expr::Binary(BinOp::And, Box::new(expr), Box::new(self.not()?));
        }
        Ok(expr)
    }

    fn not(&mut self) -> Result<Expr, ExprError> {
        if self.accept_symbol("!") {
            Ok(Expr::Not(Box::new(self.not()?)))
        } else {
            self.comparison()
        }
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.postfix()?;
        let op = match self.peek() {
            Some((_, Token::Symbol("=="))) => BinOp::Eq,
            Some((_, Token::Symbol("!="))) => BinOp::Ne,
            Some((_, Token::Symbol("<="))) => BinOp::Le,
            Some((_, Token::Symbol(">="))) => BinOp::Ge,
            Some((_, Token::Symbol("<"))) => BinOp::Lt,
            Some((_, Token::Symbol(">"))) => BinOp::Gt,
            _ => return Ok(left),
        };
        self.at += 1;
        let right = self.postfix()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.primary()?;
        loop {
            if self.accept_symbol(".") {
                match self.peek().cloned() {
                    Some((_, Token::Ident(name))) => {
                        self.at += 1;
                        expr = Expr::Member(Box::new(expr), name);
                    }
                    _ => return Err(self.unexpected("expected a member name")),
                }
            } else if self.accept_symbol("[") {
                let position = match self.peek().cloned() {
                    Some((offset, Token::Number(number))) => {
                        self.at += 1;
                        if number < 0.0 || number.fract() != 0.0 {
                            return Err(ExprError::Parse(
                                offset,
                                "index must be a whole non-negative number".to_owned(),
                            ));
                        }
                        number as usize
                    }
                    _ => return Err(self.unexpected("expected an index")),
                };
                self.expect_symbol("]")?;
                expr = Expr::At(Box::new(expr), position);
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        match self.peek().cloned() {
            Some((_, Token::Number(number))) => {
                self.at += 1;
                Ok(Expr::Literal(
                    serde_json::Number::from_f64(number).map_or(Value::Null, Value::Number),
                ))
            }
            Some((_, Token::Text(text))) => {
                self.at += 1;
                Ok(Expr::Literal(Value::String(text)))
            }
            Some((offset, Token::Ident(word))) => {
                self.at += 1;
                match word.as_str() {
                    "null" => Ok(Expr::Literal(Value::Null)),
                    "true" => Ok(Expr::Literal(Value::Bool(true))),
                    "false" => Ok(Expr::Literal(Value::Bool(false))),
                    "entity" => Ok(Expr::Entity),
                    "index" => Ok(Expr::Index),
                    "key" => Ok(Expr::Key),
                    "length" => Ok(Expr::Length),
                    other => Err(ExprError::Parse(
                        offset,
                        format!("unknown variable {:?}", other),
                    )),
                }
            }
            Some((_, Token::Symbol("("))) => {
                self.at += 1;
                let expr = self.or()?;
                self.expect_symbol(")")?;
                Ok(expr)
            }
            _ => Err(self.unexpected("expected an expression")),
        }
    }
}
