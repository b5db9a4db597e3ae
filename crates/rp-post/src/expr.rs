//! Restricted arithmetic expressions for configuration values.
//!
//! Scaling factors are often written as expressions in configuration files
//! (e.g. `"1. / 0.87"` for an ADC-to-MeV conversion). These are evaluated
//! once at construction by a recursive-descent parser over numeric literals,
//! `+ - * /`, unary minus and parentheses. Nothing else is accepted; in
//! particular there are no identifiers and no function calls.

use serde::Deserialize;

use rp_common::{Error, Result};

/// A configuration value that is either a number or an arithmetic
/// expression string, resolved to a number at construction time.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScaleFactor {
    Number(f64),
    Expression(String),
}

impl ScaleFactor {
    /// Resolve to a plain number, evaluating an expression form.
    pub fn resolve(&self) -> Result<f64> {
        match self {
            ScaleFactor::Number(v) => Ok(*v),
            ScaleFactor::Expression(s) => eval(s),
        }
    }
}

impl Default for ScaleFactor {
    fn default() -> Self {
        ScaleFactor::Number(1.0)
    }
}

impl From<f64> for ScaleFactor {
    fn from(v: f64) -> Self {
        ScaleFactor::Number(v)
    }
}

/// Evaluate a restricted arithmetic expression.
///
/// Grammar:
/// ```text
/// expr   := term (('+' | '-') term)*
/// term   := factor (('*' | '/') factor)*
/// factor := '-' factor | '(' expr ')' | number
/// ```
/// Division follows IEEE 754 (division by zero yields an infinity, not an
/// error). Malformed input fails with `Error::Expression`.
pub fn eval(expr: &str) -> Result<f64> {
    let mut parser = Parser {
        src: expr,
        bytes: expr.as_bytes(),
        pos: 0,
    };
    parser.skip_ws();
    let value = parser.expr()?;
    parser.skip_ws();
    if parser.pos != parser.bytes.len() {
        return Err(parser.error("trailing input after expression"));
    }
    Ok(value)
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> Error {
        Error::Expression {
            expr: self.src.to_string(),
            message: message.into(),
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'+') => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Some(b'-') => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64> {
        let mut value = self.factor()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    value *= self.factor()?;
                }
                Some(b'/') => {
                    self.pos += 1;
                    value /= self.factor()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn factor(&mut self) -> Result<f64> {
        self.skip_ws();
        match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                Ok(-self.factor()?)
            }
            Some(b'(') => {
                self.pos += 1;
                let value = self.expr()?;
                self.skip_ws();
                if self.peek() != Some(b')') {
                    return Err(self.error("unbalanced parenthesis"));
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.number(),
            Some(c) => Err(self.error(format!("unexpected character {:?}", c as char))),
            None => Err(self.error("truncated expression")),
        }
    }

    fn number(&mut self) -> Result<f64> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == b'.') {
            self.pos += 1;
        }
        // Optional exponent, e.g. 1.2e-3.
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let mark = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            if matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.pos += 1;
                }
            } else {
                self.pos = mark;
            }
        }
        let text = &self.src[start..self.pos];
        text.parse::<f64>()
            .map_err(|_| self.error(format!("invalid number {text:?}")))
    }
}
