//! Constant expression evaluators.
//!
//! The integer evaluator is cursor-shaped: it recurses into the
//! sub-cursors of an expression and only accepts the operator set needed
//! for enum constants and designated array indices. The floating
//! evaluator is a token-level recursive-descent parser used when a union
//! initializer has to be reinterpreted through the first member.

use clang::{Entity, EntityKind};

use crate::token::{self, Tok};
use crate::{Context, Error, Result};

/// Parse a C integer literal: `0x` hex, leading-zero octal, decimal, with
/// `u`/`U`/`l`/`L` suffixes tolerated.
pub fn parse_int_token(s: &str) -> Result<i64> {
    let mut t = s;
    while let Some(rest) = t.strip_suffix(|c| matches!(c, 'u' | 'U' | 'l' | 'L')) {
        t = rest;
    }
    let parsed = if let Some(h) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        i64::from_str_radix(h, 16)
    } else if t.len() > 1 && t.starts_with('0') {
        i64::from_str_radix(&t[1..], 8)
    } else {
        t.parse()
    };
    parsed.map_err(|_| Error::UnsupportedExpression(format!("integer literal {:?}", s)))
}

/// Evaluate a character literal to its embedded byte.
pub fn parse_char_token(s: &str) -> Result<i64> {
    let inner = s
        .strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .ok_or_else(|| Error::UnsupportedExpression(format!("character literal {:?}", s)))?;
    let mut chars = inner.chars();
    let value = match chars.next() {
        Some('\\') => match chars.next() {
            Some('n') => b'\n' as i64,
            Some('t') => b'\t' as i64,
            Some('r') => b'\r' as i64,
            Some('0') => 0,
            Some('\\') => b'\\' as i64,
            Some('\'') => b'\'' as i64,
            Some('"') => b'"' as i64,
            Some('x') => i64::from_str_radix(chars.as_str(), 16)
                .map_err(|_| Error::UnsupportedExpression(format!("escape in {:?}", s)))?,
            _ => return Err(Error::UnsupportedExpression(format!("escape in {:?}", s))),
        },
        Some(c) => c as i64,
        None => return Err(Error::UnsupportedExpression(format!("empty literal {:?}", s))),
    };
    Ok(value)
}

fn first_spelling(ctx: &Context, e: Entity<'_>) -> Result<String> {
    token::extent(e)
        .and_then(|r| token::slice_range(&ctx.toks, r).first().map(|t| t.spelling.clone()))
        .ok_or_else(|| Error::UnsupportedExpression("expression with no tokens".into()))
}

/// Evaluate an integer constant expression cursor. Accepts integer and
/// character literals, enum constant references, unary `+ - ~`, and the
/// binary operator set of the original converter.
pub fn eval_int(e: Entity<'_>, ctx: &Context) -> Result<i64> {
    match e.get_kind() {
        EntityKind::IntegerLiteral => parse_int_token(&first_spelling(ctx, e)?),
        EntityKind::CharacterLiteral => parse_char_token(&first_spelling(ctx, e)?),
        EntityKind::DeclRefExpr => {
            let name = e.get_name().unwrap_or_default();
            ctx.find_enum_constant(&name)
                .ok_or(Error::UnknownEnumConstant(name))
        }
        EntityKind::ParenExpr | EntityKind::UnexposedExpr => {
            let child = e
                .get_children()
                .into_iter()
                .next()
                .ok_or_else(|| Error::UnsupportedExpression("empty expression".into()))?;
            eval_int(child, ctx)
        }
        EntityKind::UnaryOperator => {
            let child = e
                .get_children()
                .into_iter()
                .next()
                .ok_or_else(|| Error::UnsupportedExpression("unary without operand".into()))?;
            let v = eval_int(child, ctx)?;
            match first_spelling(ctx, e)?.as_str() {
                "-" => Ok(-v),
                "+" => Ok(v),
                "~" => Ok(!v),
                op => Err(Error::UnsupportedExpression(format!("unary {:?}", op))),
            }
        }
        EntityKind::BinaryOperator => {
            let children = e.get_children();
            if children.len() != 2 {
                return Err(Error::UnsupportedExpression("malformed binary operator".into()));
            }
            let lhs = eval_int(children[0], ctx)?;
            let rhs = eval_int(children[1], ctx)?;
            let op = operator_after(ctx, children[0])?;
            apply_binary(&op, lhs, rhs)
        }
        kind => Err(Error::UnsupportedExpression(format!("{:?}", kind))),
    }
}

/// The operator token is the first non-comment token after the left
/// operand's extent.
fn operator_after(ctx: &Context, lhs: Entity<'_>) -> Result<String> {
    let end = token::extent(lhs)
        .ok_or_else(|| Error::UnsupportedExpression("operand with no extent".into()))?
        .end;
    let mut i = token::index_at(&ctx.toks, end);
    while let Some(t) = ctx.toks.get(i) {
        if token::is_comment(&t.spelling) {
            i += 1;
            continue;
        }
        return Ok(t.spelling.clone());
    }
    Err(Error::UnsupportedExpression("missing operator token".into()))
}

fn apply_binary(op: &str, l: i64, r: i64) -> Result<i64> {
    if matches!(op, "/" | "%") && r == 0 {
        return Err(Error::UnsupportedExpression("division by zero".into()));
    }
    let v = match op {
        "^" => l ^ r,
        "|" => l | r,
        "&" => l & r,
        "+" => l + r,
        "-" => l - r,
        "*" => l * r,
        "/" => l / r,
        "%" => l % r,
        "<<" => l << r,
        ">>" => l >> r,
        "<=" => (l <= r) as i64,
        ">=" => (l >= r) as i64,
        "!=" => (l != r) as i64,
        "==" => (l == r) as i64,
        _ => return Err(Error::UnsupportedExpression(format!("operator {:?}", op))),
    };
    Ok(v)
}

/// Evaluate a floating constant over `+ - * /`, unary minus, parentheses
/// and `(double)` casts. Any other parenthesized type name is the
/// cannot-parse-type error; anything else is unsupported.
pub fn eval_float(toks: &[Tok]) -> Result<f64> {
    let mut p = FloatParser { toks, pos: 0 };
    let v = p.expr()?;
    if p.pos != toks.len() {
        return Err(Error::UnsupportedExpression(format!(
            "trailing tokens in {:?}",
            p.peek()
        )));
    }
    Ok(v)
}

struct FloatParser<'a> {
    toks: &'a [Tok],
    pos: usize,
}

impl<'a> FloatParser<'a> {
    fn peek(&self) -> &str {
        self.toks.get(self.pos).map(|t| t.spelling.as_str()).unwrap_or("")
    }

    fn bump(&mut self) -> &str {
        let s = self.toks.get(self.pos).map(|t| t.spelling.as_str()).unwrap_or("");
        self.pos += 1;
        s
    }

    fn expr(&mut self) -> Result<f64> {
        let mut v = self.term()?;
        loop {
            match self.peek() {
                "+" => {
                    self.pos += 1;
                    v += self.term()?;
                }
                "-" => {
                    self.pos += 1;
                    v -= self.term()?;
                }
                _ => return Ok(v),
            }
        }
    }

    fn term(&mut self) -> Result<f64> {
        let mut v = self.factor()?;
        loop {
            match self.peek() {
                "*" => {
                    self.pos += 1;
                    v *= self.factor()?;
                }
                "/" => {
                    self.pos += 1;
                    let d = self.factor()?;
                    v /= d;
                }
                _ => return Ok(v),
            }
        }
    }

    fn factor(&mut self) -> Result<f64> {
        match self.peek() {
            "-" => {
                self.pos += 1;
                Ok(-self.factor()?)
            }
            "(" => {
                // narrow cast recognition: `(double)` only
                let name = self.toks.get(self.pos + 1).map(|t| t.spelling.clone());
                let close = self.toks.get(self.pos + 2).map(|t| t.spelling.clone());
                if let (Some(name), Some(close)) = (name, close) {
                    if close == ")" && looks_like_type(&name) {
                        if name != "double" {
                            return Err(Error::FloatCastType(name));
                        }
                        self.pos += 3;
                        return self.factor();
                    }
                }
                self.pos += 1;
                let v = self.expr()?;
                if self.bump() != ")" {
                    return Err(Error::UnsupportedExpression("unbalanced parentheses".into()));
                }
                Ok(v)
            }
            "" => Err(Error::UnsupportedExpression("empty floating expression".into())),
            _ => {
                let s = self.bump().to_string();
                parse_float_token(&s)
            }
        }
    }
}

fn looks_like_type(s: &str) -> bool {
    matches!(
        s,
        "double" | "float" | "int" | "long" | "short" | "char" | "unsigned" | "signed"
    )
}

fn parse_float_token(s: &str) -> Result<f64> {
    let mut t = s;
    while let Some(rest) = t.strip_suffix(|c| matches!(c, 'f' | 'F' | 'l' | 'L')) {
        t = rest;
    }
    if let Some(h) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return i64::from_str_radix(h, 16)
            .map(|v| v as f64)
            .map_err(|_| Error::UnsupportedExpression(format!("hex literal {:?}", s)));
    }
    if t.len() > 1
        && t.starts_with('0')
        && !t.contains('.')
        && !t.contains('e')
        && !t.contains('E')
    {
        return i64::from_str_radix(&t[1..], 8)
            .map(|v| v as f64)
            .map_err(|_| Error::UnsupportedExpression(format!("octal literal {:?}", s)));
    }
    t.parse()
        .map_err(|_| Error::UnsupportedExpression(format!("numeric literal {:?}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ftoks(spellings: &[&str]) -> Vec<Tok> {
        let mut off = 0;
        spellings
            .iter()
            .map(|s| {
                let t = Tok {
                    spelling: s.to_string(),
                    line: 0,
                    col: off as u32,
                    offset: off,
                };
                off += s.len() + 1;
                t
            })
            .collect()
    }

    #[test]
    fn int_literal_forms() {
        assert_eq!(parse_int_token("42").unwrap(), 42);
        assert_eq!(parse_int_token("0x1f").unwrap(), 31);
        assert_eq!(parse_int_token("017").unwrap(), 15);
        assert_eq!(parse_int_token("7U").unwrap(), 7);
        assert_eq!(parse_int_token("1UL").unwrap(), 1);
        assert!(parse_int_token("abc").is_err());
    }

    #[test]
    fn char_literal_forms() {
        assert_eq!(parse_char_token("'a'").unwrap(), 97);
        assert_eq!(parse_char_token("'\\n'").unwrap(), 10);
        assert_eq!(parse_char_token("'\\0'").unwrap(), 0);
        assert_eq!(parse_char_token("'\\x41'").unwrap(), 0x41);
    }

    #[test]
    fn binary_operator_set() {
        assert_eq!(apply_binary("<<", 1, 4).unwrap(), 16);
        assert_eq!(apply_binary("<=", 3, 3).unwrap(), 1);
        assert_eq!(apply_binary("!=", 3, 3).unwrap(), 0);
        assert!(apply_binary("&&", 1, 1).is_err());
        assert!(apply_binary("/", 1, 0).is_err());
    }

    #[test]
    fn float_arithmetic() {
        assert_eq!(eval_float(&ftoks(&["1.5"])).unwrap(), 1.5);
        assert_eq!(eval_float(&ftoks(&["1", "+", "2", "*", "3"])).unwrap(), 7.0);
        assert_eq!(
            eval_float(&ftoks(&["(", "1", "+", "2", ")", "*", "3"])).unwrap(),
            9.0
        );
        assert_eq!(eval_float(&ftoks(&["-", "2.5"])).unwrap(), -2.5);
        assert_eq!(eval_float(&ftoks(&["1.0f"])).unwrap(), 1.0);
        assert_eq!(eval_float(&ftoks(&["0x10"])).unwrap(), 16.0);
    }

    #[test]
    fn float_double_cast_only() {
        assert_eq!(
            eval_float(&ftoks(&["(", "double", ")", "3"])).unwrap(),
            3.0
        );
        match eval_float(&ftoks(&["(", "float", ")", "3"])) {
            Err(Error::FloatCastType(t)) => assert_eq!(t, "float"),
            other => panic!("expected cast-type error, got {:?}", other),
        }
    }

    #[test]
    fn float_rejects_identifiers() {
        assert!(eval_float(&ftoks(&["x", "+", "1"])).is_err());
    }
}
