//! Rule Expression Language
//!
//! A small, side-effect free expression language for rule conditions, action
//! guards, bindings and parameter templates. Expressions are parsed once when
//! rules load and evaluated against an [`EvalContext`] for every dispatch.
//!
//! ```text
//! data.comment contains "hi" && len(data.comment) < 200
//! lower(data.user.name) matches "mod_*"
//! data.giftCount * data.diamonds >= 100 or platform == "simulator"
//! ```
//!
//! Missing fields evaluate to `null`. Unknown roots, unknown helpers, helper
//! failures and type mismatches are evaluation errors.

mod eval;
mod lexer;
mod parser;

use std::fmt;

use serde_json::Value;

use crate::context::EvalContext;
use crate::helper::HelperError;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised while parsing or evaluating expressions
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("Syntax error at {pos}: {message}")]
    Syntax { pos: usize, message: String },

    #[error("Unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("Unknown helper '{0}'")]
    UnknownHelper(String),

    #[error("Helper '{name}' failed: {source}")]
    Helper {
        name: String,
        #[source]
        source: HelperError,
    },

    #[error("Type error: {0}")]
    Type(String),

    #[error("Division by zero")]
    DivisionByZero,
}

pub type ExprResult<T> = Result<T, ExprError>;

// ─────────────────────────────────────────────────────────────────────────────
// AST
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    StartsWith,
    EndsWith,
    In,
    Matches,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Array(Vec<Expr>),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Collect the helper names this expression calls
    pub fn helper_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.visit_calls(&mut names);
        names
    }

    fn visit_calls<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) | Expr::Ident(_) => {}
            Expr::Array(items) => items.iter().for_each(|e| e.visit_calls(out)),
            Expr::Member(base, _) => base.visit_calls(out),
            Expr::Index(base, index) => {
                base.visit_calls(out);
                index.visit_calls(out);
            }
            Expr::Call(name, args) => {
                out.push(name);
                args.iter().for_each(|e| e.visit_calls(out));
            }
            Expr::Unary(_, operand) => operand.visit_calls(out),
            Expr::Binary(_, left, right) => {
                left.visit_calls(out);
                right.visit_calls(out);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Expression
// ─────────────────────────────────────────────────────────────────────────────

/// A compiled expression together with its source text
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    /// Parse an expression
    pub fn parse(source: impl Into<String>) -> ExprResult<Self> {
        let source = source.into();
        let tokens = lexer::tokenize(&source)?;
        let ast = parser::Parser::parse(&tokens, source.len())?;
        Ok(Self { source, ast })
    }

    /// Original source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parsed tree
    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Evaluate to a value
    pub fn evaluate(&self, ctx: &EvalContext) -> ExprResult<Value> {
        eval::evaluate(&self.ast, ctx).map(|v| v.into_owned())
    }

    /// Evaluate and apply truthiness
    pub fn evaluate_bool(&self, ctx: &EvalContext) -> ExprResult<bool> {
        eval::evaluate(&self.ast, ctx).map(|v| is_truthy(&v))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for Expression {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value semantics
// ─────────────────────────────────────────────────────────────────────────────

/// Truthiness: null, false, 0, NaN, "" and [] are false
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

/// Convert an f64 into a JSON number, keeping integral values integral
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Render a value as text (strings unquoted, null as empty)
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
