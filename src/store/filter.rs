//! Store filter expressions.
//!
//! Builders produce the string form sent to the backend (`name == "alfa" and
//! ended_at == 0`). [`Filter`] parses that same grammar so the in-memory
//! backend evaluates exactly what the HTTP backend would ship over the wire.
//!
//! Grammar, loosest to tightest binding:
//!
//! ```text
//! expr := term ("or" term)*
//! term := cmp ("and" cmp)*
//! cmp  := "(" expr ")" | ident op literal
//! op   := == | != | <= | >= | < | > | like
//! ```
//!
//! `like` patterns use `%` for any run of characters and `_` for one.

use crate::error::StoreError;
use crate::store::Record;
use serde_json::Value;

/// Quote and escape a string literal for use in a filter expression.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

pub fn eq_str(field: &str, value: &str) -> String {
    format!("{} == {}", field, quote(value))
}

pub fn ne_str(field: &str, value: &str) -> String {
    format!("{} != {}", field, quote(value))
}

pub fn eq_int(field: &str, value: i64) -> String {
    format!("{} == {}", field, value)
}

pub fn lt_int(field: &str, value: i64) -> String {
    format!("{} < {}", field, value)
}

pub fn gt_int(field: &str, value: i64) -> String {
    format!("{} > {}", field, value)
}

pub fn ge_int(field: &str, value: i64) -> String {
    format!("{} >= {}", field, value)
}

/// Prefix match via `like`; `%` and `_` in the prefix are escaped out by
/// substitution since the pattern language has no escape of its own.
pub fn starts_with(field: &str, prefix: &str) -> String {
    let cleaned: String = prefix
        .chars()
        .map(|c| if c == '%' || c == '_' { '?' } else { c })
        .collect();
    format!("{} like {}", field, quote(&format!("{}%", cleaned)))
}

pub fn and(parts: &[String]) -> String {
    parts.join(" and ")
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Op(CmpOp),
    And,
    Or,
    LParen,
    RParen,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

/// Parsed filter expression, evaluatable against a [`Record`].
#[derive(Debug, Clone)]
pub enum Filter {
    /// Empty filter: matches everything.
    All,
    Cmp {
        field: String,
        op: CmpOp,
        value: Value,
    },
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
}

fn lex(input: &str) -> Result<Vec<Token>, StoreError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' | '\'' => {
                let delim = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(esc) => s.push(esc),
                            None => {
                                return Err(StoreError::Request(
                                    "unterminated string in filter".into(),
                                ));
                            }
                        },
                        Some(ch) if ch == delim => break,
                        Some(ch) => s.push(ch),
                        None => {
                            return Err(StoreError::Request(
                                "unterminated string in filter".into(),
                            ));
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '=' => {
                chars.next();
                if chars.next_if_eq(&'=').is_none() {
                    return Err(StoreError::Request("expected == in filter".into()));
                }
                tokens.push(Token::Op(CmpOp::Eq));
            }
            '!' => {
                chars.next();
                if chars.next_if_eq(&'=').is_none() {
                    return Err(StoreError::Request("expected != in filter".into()));
                }
                tokens.push(Token::Op(CmpOp::Ne));
            }
            '<' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Op(CmpOp::Le));
                } else {
                    tokens.push(Token::Op(CmpOp::Lt));
                }
            }
            '>' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Op(CmpOp::Ge));
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                }
            }
            '-' | '0'..='9' => {
                let mut num = String::new();
                if c == '-' {
                    num.push(c);
                    chars.next();
                }
                while let Some(d) = chars.next_if(|ch| ch.is_ascii_digit()) {
                    num.push(d);
                }
                let n: i64 = num
                    .parse()
                    .map_err(|_| StoreError::Request(format!("bad number in filter: {num}")))?;
                tokens.push(Token::Int(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(ch) = chars.next_if(|ch| ch.is_ascii_alphanumeric() || *ch == '_') {
                    word.push(ch);
                }
                match word.to_ascii_lowercase().as_str() {
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    "like" => tokens.push(Token::Op(CmpOp::Like)),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            other => {
                return Err(StoreError::Request(format!(
                    "unexpected character in filter: {other}"
                )));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expr(&mut self) -> Result<Filter, StoreError> {
        let mut left = self.term()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.next();
            let right = self.term()?;
            left = Filter::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Filter, StoreError> {
        let mut left = self.cmp()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.next();
            let right = self.cmp()?;
            left = Filter::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn cmp(&mut self) -> Result<Filter, StoreError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(StoreError::Request("expected ) in filter".into())),
                }
            }
            Some(Token::Ident(field)) => {
                let op = match self.next() {
                    Some(Token::Op(op)) => op,
                    other => {
                        return Err(StoreError::Request(format!(
                            "expected comparison operator after {field}, got {other:?}"
                        )));
                    }
                };
                let value = match self.next() {
                    Some(Token::Str(s)) => Value::String(s),
                    Some(Token::Int(n)) => Value::from(n),
                    other => {
                        return Err(StoreError::Request(format!(
                            "expected literal in filter, got {other:?}"
                        )));
                    }
                };
                Ok(Filter::Cmp { field, op, value })
            }
            other => Err(StoreError::Request(format!(
                "unexpected token in filter: {other:?}"
            ))),
        }
    }
}

impl Filter {
    pub fn parse(input: &str) -> Result<Self, StoreError> {
        if input.trim().is_empty() {
            return Ok(Filter::All);
        }
        let tokens = lex(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(StoreError::Request(format!(
                "trailing tokens in filter: {input}"
            )));
        }
        Ok(expr)
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::All => true,
            Filter::And(a, b) => a.matches(record) && b.matches(record),
            Filter::Or(a, b) => a.matches(record) || b.matches(record),
            Filter::Cmp { field, op, value } => {
                let Some(actual) = record.get(field) else {
                    return false;
                };
                compare(actual, *op, value)
            }
        }
    }
}

fn compare(actual: &Value, op: CmpOp, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(a), Value::String(b)) => match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            CmpOp::Like => like_match(b, a),
        },
        (Value::Number(a), Value::Number(b)) => {
            let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
                return false;
            };
            match op {
                CmpOp::Eq => a == b,
                CmpOp::Ne => a != b,
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
                CmpOp::Gt => a > b,
                CmpOp::Ge => a >= b,
                CmpOp::Like => false,
            }
        }
        (Value::Bool(a), Value::Bool(b)) => match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            _ => false,
        },
        _ => false,
    }
}

/// `%` matches any run, `_` matches one character; everything else literal.
fn like_match(pattern: &str, text: &str) -> bool {
    let mut regex = String::with_capacity(pattern.len() + 2);
    regex.push('^');
    for c in pattern.chars() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            c => {
                if c.is_ascii_alphanumeric() {
                    regex.push(c);
                } else {
                    regex.push('\\');
                    regex.push(c);
                }
            }
        }
    }
    regex.push('$');
    regex_lite::Regex::new(&regex)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}
