//! JSONPath subset used by metadata filter leaves.
//!
//! Paths are parsed once at the request boundary into a typed [`JsonPath`] and
//! evaluated in lax mode against a message's metadata document, following the
//! PostgreSQL `jsonb_path_exists` conventions:
//!
//! - member access on an array applies to each object element
//! - `[0]` on a non-array addresses the value itself
//! - a filter `? (...)` applied to an array tests each element
//! - a comparison holds if any selected value compares true; values of
//!   mismatched types never compare true
//!
//! ```text
//! $.tag
//! $.system.entities[*] ? (@.Label == "DATE")
//! $.tags ? (@ == "urgent" || @ == "blocked")
//! $.priority ? (@ >= 2 && !(@ > 5))
//! ```

use std::cmp::Ordering;

use serde_json::Value;

use crate::error::FilterError;

/// A parsed JSONPath expression rooted at `$`.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPath {
    source: String,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    /// `.name`, `."name"`, `["name"]`
    Key(String),
    /// `.*`
    AnyKey,
    /// `[n]`
    Index(usize),
    /// `[*]`
    AnyIndex,
    /// `? (expr)`
    Filter(Expr),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Vec<Expr>),
    And(Vec<Expr>),
    Not(Box<Expr>),
    Exists(Vec<Step>),
    Compare {
        target: Vec<Step>,
        op: CompareOp,
        value: Literal,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
}

impl JsonPath {
    /// Parse a path, rejecting anything outside the supported grammar.
    pub fn parse(src: &str) -> Result<Self, FilterError> {
        let source = src.trim();
        let mut parser = Parser { src: source, pos: 0 };
        let steps = parser.parse_root()?;
        Ok(Self {
            source: source.to_string(),
            steps,
        })
    }

    /// The path text as supplied (trimmed).
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// `true` if the path selects at least one item in `doc`.
    pub fn exists(&self, doc: &Value) -> bool {
        !select(&self.steps, doc).is_empty()
    }
}

impl std::fmt::Display for JsonPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

// ── Evaluation ────────────────────────────────────────────────────────────────

fn select<'v>(steps: &[Step], root: &'v Value) -> Vec<&'v Value> {
    let mut current = vec![root];
    for step in steps {
        let mut next = Vec::new();
        for value in current {
            apply(step, value, &mut next);
        }
        if next.is_empty() {
            return next;
        }
        current = next;
    }
    current
}

fn apply<'v>(step: &Step, value: &'v Value, out: &mut Vec<&'v Value>) {
    match (step, value) {
        (Step::Key(key), Value::Object(map)) => out.extend(map.get(key)),
        (Step::AnyKey, Value::Object(map)) => out.extend(map.values()),
        (Step::Key(_) | Step::AnyKey, Value::Array(items)) => {
            for item in items.iter().filter(|item| item.is_object()) {
                apply(step, item, out);
            }
        }
        (Step::Index(i), Value::Array(items)) => out.extend(items.get(*i)),
        (Step::Index(0), other) => out.push(other),
        (Step::AnyIndex, Value::Array(items)) => out.extend(items.iter()),
        (Step::AnyIndex, other) => out.push(other),
        (Step::Filter(expr), Value::Array(items)) => {
            out.extend(items.iter().filter(|item| expr.holds(item)));
        }
        (Step::Filter(expr), other) => {
            if expr.holds(other) {
                out.push(other);
            }
        }
        _ => {}
    }
}

impl Expr {
    fn holds(&self, current: &Value) -> bool {
        match self {
            Self::Or(terms) => terms.iter().any(|t| t.holds(current)),
            Self::And(terms) => terms.iter().all(|t| t.holds(current)),
            Self::Not(inner) => !inner.holds(current),
            Self::Exists(steps) => !select(steps, current).is_empty(),
            Self::Compare { target, op, value } => {
                select(target, current).into_iter().any(|selected| match selected {
                    Value::Array(items) => items.iter().any(|item| compare(item, *op, value)),
                    other => compare(other, *op, value),
                })
            }
        }
    }
}

fn compare(actual: &Value, op: CompareOp, expected: &Literal) -> bool {
    match (actual, expected) {
        (Value::String(a), Literal::String(b)) => op.accepts(a.as_str().cmp(b.as_str())),
        (Value::Number(a), Literal::Number(b)) => a
            .as_f64()
            .and_then(|a| a.partial_cmp(b))
            .is_some_and(|ord| op.accepts(ord)),
        (Value::Bool(a), Literal::Bool(b)) => match op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            _ => false,
        },
        (Value::Null, Literal::Null) => op == CompareOp::Eq,
        _ => false,
    }
}

impl CompareOp {
    fn accepts(self, ord: Ordering) -> bool {
        match self {
            Self::Eq => ord == Ordering::Equal,
            Self::Ne => ord != Ordering::Equal,
            Self::Lt => ord == Ordering::Less,
            Self::Le => ord != Ordering::Greater,
            Self::Gt => ord == Ordering::Greater,
            Self::Ge => ord != Ordering::Less,
        }
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn parse_root(&mut self) -> Result<Vec<Step>, FilterError> {
        if !self.eat("$") {
            return Err(self.error("path must start with `$`"));
        }
        let steps = self.parse_steps(true)?;
        self.skip_ws();
        if self.pos != self.src.len() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(steps)
    }

    /// Filters are only allowed on absolute paths, not inside `@` operands.
    fn parse_steps(&mut self, allow_filter: bool) -> Result<Vec<Step>, FilterError> {
        let mut steps = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some('.') => {
                    self.bump();
                    steps.push(self.parse_member()?);
                }
                Some('[') => {
                    self.bump();
                    steps.push(self.parse_subscript()?);
                }
                Some('?') if allow_filter => {
                    self.bump();
                    self.skip_ws();
                    self.expect('(')?;
                    let expr = self.parse_or()?;
                    self.skip_ws();
                    self.expect(')')?;
                    steps.push(Step::Filter(expr));
                }
                _ => return Ok(steps),
            }
        }
    }

    fn parse_member(&mut self) -> Result<Step, FilterError> {
        match self.peek() {
            Some('*') => {
                self.bump();
                Ok(Step::AnyKey)
            }
            Some(q @ ('"' | '\'')) => {
                self.bump();
                Ok(Step::Key(self.parse_string(q)?))
            }
            _ => {
                let ident = self.take_while(|c| c.is_alphanumeric() || c == '_' || c == '$');
                if ident.is_empty() {
                    return Err(self.error("expected member name after `.`"));
                }
                Ok(Step::Key(ident.to_string()))
            }
        }
    }

    fn parse_subscript(&mut self) -> Result<Step, FilterError> {
        self.skip_ws();
        let step = match self.peek() {
            Some('*') => {
                self.bump();
                Step::AnyIndex
            }
            Some(q @ ('"' | '\'')) => {
                self.bump();
                Step::Key(self.parse_string(q)?)
            }
            Some(c) if c.is_ascii_digit() => {
                let digits = self.take_while(|c| c.is_ascii_digit());
                let index = digits
                    .parse::<usize>()
                    .map_err(|e| self.error(format!("bad array index: {e}")))?;
                Step::Index(index)
            }
            _ => return Err(self.error("expected `*`, an index, or a quoted key inside `[]`")),
        };
        self.skip_ws();
        self.expect(']')?;
        Ok(step)
    }

    fn parse_or(&mut self) -> Result<Expr, FilterError> {
        let mut terms = vec![self.parse_and()?];
        loop {
            self.skip_ws();
            if !self.eat("||") {
                break;
            }
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, FilterError> {
        let mut terms = vec![self.parse_unary()?];
        loop {
            self.skip_ws();
            if !self.eat("&&") {
                break;
            }
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::And(terms)
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, FilterError> {
        self.skip_ws();
        match self.peek() {
            Some('!') => {
                self.bump();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some('(') => {
                self.bump();
                let inner = self.parse_or()?;
                self.skip_ws();
                self.expect(')')?;
                Ok(inner)
            }
            Some('@') => {
                self.bump();
                let target = self.parse_steps(false)?;
                self.skip_ws();
                let op = self.parse_op()?;
                self.skip_ws();
                let value = self.parse_literal()?;
                Ok(Expr::Compare { target, op, value })
            }
            _ if self.eat_keyword("exists") => {
                self.skip_ws();
                self.expect('(')?;
                self.skip_ws();
                self.expect('@')?;
                let steps = self.parse_steps(false)?;
                self.skip_ws();
                self.expect(')')?;
                Ok(Expr::Exists(steps))
            }
            _ => Err(self.error("expected `@`, `!`, `(` or `exists` in filter")),
        }
    }

    fn parse_op(&mut self) -> Result<CompareOp, FilterError> {
        const OPS: [(&str, CompareOp); 7] = [
            ("==", CompareOp::Eq),
            ("!=", CompareOp::Ne),
            ("<>", CompareOp::Ne),
            ("<=", CompareOp::Le),
            (">=", CompareOp::Ge),
            ("<", CompareOp::Lt),
            (">", CompareOp::Gt),
        ];
        for (token, op) in OPS {
            if self.eat(token) {
                return Ok(op);
            }
        }
        Err(self.error("expected a comparison operator"))
    }

    fn parse_literal(&mut self) -> Result<Literal, FilterError> {
        match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.bump();
                Ok(Literal::String(self.parse_string(q)?))
            }
            _ if self.eat_keyword("true") => Ok(Literal::Bool(true)),
            _ if self.eat_keyword("false") => Ok(Literal::Bool(false)),
            _ if self.eat_keyword("null") => Ok(Literal::Null),
            Some(c) if c == '-' || c == '+' || c.is_ascii_digit() => {
                let start = self.pos;
                let text =
                    self.take_while(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'));
                text.parse::<f64>().map(Literal::Number).map_err(|_| {
                    self.pos = start;
                    self.error(format!("bad number literal `{text}`"))
                })
            }
            _ => Err(self.error("expected a string, number, true, false or null")),
        }
    }

    /// Called after the opening quote has been consumed.
    fn parse_string(&mut self, quote: char) -> Result<String, FilterError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.src[self.pos..].starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    /// Like [`Self::eat`], but the keyword must not run into an identifier.
    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let rest = &self.src[self.pos..];
        if !rest.starts_with(keyword) {
            return false;
        }
        let boundary = rest[keyword.len()..]
            .chars()
            .next()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
        if boundary {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), FilterError> {
        if self.peek() == Some(c) {
            self.bump();
            Ok(())
        } else {
            Err(self.error(format!("expected `{c}`")))
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn error(&self, reason: impl Into<String>) -> FilterError {
        FilterError::JsonPath {
            path: self.src.to_string(),
            offset: self.pos,
            reason: reason.into(),
        }
    }
}
