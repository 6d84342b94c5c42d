// Expression Evaluator - Tree-walking evaluation against an EvalContext

use std::borrow::Cow;
use std::cmp::Ordering;

use serde_json::Value;
use wildmatch::WildMatch;

use super::{BinaryOp, Expr, ExprError, ExprResult, UnaryOp, is_truthy, number_value, stringify};
use crate::context::EvalContext;

/// Evaluate an expression, borrowing from the context where possible
pub(crate) fn evaluate<'a>(expr: &Expr, ctx: &'a EvalContext) -> ExprResult<Cow<'a, Value>> {
    match expr {
        Expr::Literal(value) => Ok(Cow::Owned(value.clone())),

        Expr::Array(items) => {
            let values = items
                .iter()
                .map(|item| evaluate(item, ctx).map(Cow::into_owned))
                .collect::<ExprResult<Vec<_>>>()?;
            Ok(Cow::Owned(Value::Array(values)))
        }

        Expr::Ident(name) => ctx
            .root(name)
            .ok_or_else(|| ExprError::UnknownVariable(name.clone())),

        Expr::Member(base, key) => {
            let base = evaluate(base, ctx)?;
            Ok(member(base, key))
        }

        Expr::Index(base, index) => {
            let base = evaluate(base, ctx)?;
            let index = evaluate(index, ctx)?;
            match index.as_ref() {
                Value::String(key) => Ok(member(base, key)),
                Value::Number(n) => Ok(element(base, n.as_f64().unwrap_or(-1.0))),
                other => Err(ExprError::Type(format!("cannot index with {}", other))),
            }
        }

        Expr::Call(name, args) => {
            let helper = ctx
                .helpers()
                .get(name)
                .ok_or_else(|| ExprError::UnknownHelper(name.clone()))?;
            let args = args
                .iter()
                .map(|arg| evaluate(arg, ctx).map(Cow::into_owned))
                .collect::<ExprResult<Vec<_>>>()?;
            helper(&args)
                .map(Cow::Owned)
                .map_err(|source| ExprError::Helper {
                    name: name.clone(),
                    source,
                })
        }

        Expr::Unary(op, operand) => {
            let value = evaluate(operand, ctx)?;
            match op {
                UnaryOp::Not => Ok(Cow::Owned(Value::Bool(!is_truthy(&value)))),
                UnaryOp::Neg => match value.as_ref() {
                    Value::Number(n) => Ok(Cow::Owned(number_value(-n.as_f64().unwrap_or(0.0)))),
                    other => Err(ExprError::Type(format!("cannot negate {}", other))),
                },
            }
        }

        Expr::Binary(BinaryOp::Or, left, right) => {
            let left = evaluate(left, ctx)?;
            if is_truthy(&left) {
                Ok(left)
            } else {
                evaluate(right, ctx)
            }
        }

        Expr::Binary(BinaryOp::And, left, right) => {
            let left = evaluate(left, ctx)?;
            if is_truthy(&left) {
                evaluate(right, ctx)
            } else {
                Ok(left)
            }
        }

        Expr::Binary(op, left, right) => {
            let left = evaluate(left, ctx)?;
            let right = evaluate(right, ctx)?;
            binary(*op, &left, &right).map(Cow::Owned)
        }
    }
}

fn member<'a>(base: Cow<'a, Value>, key: &str) -> Cow<'a, Value> {
    match base {
        Cow::Borrowed(Value::Object(map)) => map
            .get(key)
            .map(Cow::Borrowed)
            .unwrap_or(Cow::Owned(Value::Null)),
        Cow::Borrowed(other) => Cow::Owned(length_of(other, key)),
        Cow::Owned(Value::Object(mut map)) => Cow::Owned(map.remove(key).unwrap_or(Value::Null)),
        Cow::Owned(other) => Cow::Owned(length_of(&other, key)),
    }
}

fn element<'a>(base: Cow<'a, Value>, index: f64) -> Cow<'a, Value> {
    if index < 0.0 || index.fract() != 0.0 {
        return Cow::Owned(Value::Null);
    }
    let index = index as usize;
    match base {
        Cow::Borrowed(Value::Array(items)) => items
            .get(index)
            .map(Cow::Borrowed)
            .unwrap_or(Cow::Owned(Value::Null)),
        Cow::Owned(Value::Array(mut items)) if index < items.len() => {
            Cow::Owned(items.swap_remove(index))
        }
        Cow::Borrowed(Value::String(s)) => Cow::Owned(
            s.chars()
                .nth(index)
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null),
        ),
        _ => Cow::Owned(Value::Null),
    }
}

fn length_of(value: &Value, key: &str) -> Value {
    if key != "length" {
        return Value::Null;
    }
    match value {
        Value::String(s) => Value::from(s.chars().count()),
        Value::Array(items) => Value::from(items.len()),
        _ => Value::Null,
    }
}

/// Equality with numeric coercion (1 == 1.0)
pub(crate) fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| loose_eq(a, b))
        }
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> ExprResult<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y)
                .ok_or_else(|| ExprError::Type("cannot compare NaN".to_string()))
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(ExprError::Type(format!("cannot compare {} with {}", a, b))),
    }
}

fn contains(haystack: &Value, needle: &Value) -> ExprResult<bool> {
    match haystack {
        Value::Null => Ok(false),
        Value::String(s) => Ok(s.contains(stringify(needle).as_str())),
        Value::Array(items) => Ok(items.iter().any(|item| loose_eq(item, needle))),
        Value::Object(map) => Ok(map.contains_key(&stringify(needle))),
        other => Err(ExprError::Type(format!("'contains' is not defined for {}", other))),
    }
}

fn numbers(op: BinaryOp, a: &Value, b: &Value) -> ExprResult<(f64, f64)> {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => Ok((x, y)),
        _ => Err(ExprError::Type(format!(
            "operator {:?} expects numbers, got {} and {}",
            op, a, b
        ))),
    }
}

fn binary(op: BinaryOp, a: &Value, b: &Value) -> ExprResult<Value> {
    let value = match op {
        BinaryOp::Eq => Value::Bool(loose_eq(a, b)),
        BinaryOp::Ne => Value::Bool(!loose_eq(a, b)),
        BinaryOp::Lt => Value::Bool(compare(a, b)? == Ordering::Less),
        BinaryOp::Le => Value::Bool(compare(a, b)? != Ordering::Greater),
        BinaryOp::Gt => Value::Bool(compare(a, b)? == Ordering::Greater),
        BinaryOp::Ge => Value::Bool(compare(a, b)? != Ordering::Less),
        BinaryOp::Contains => Value::Bool(contains(a, b)?),
        BinaryOp::In => Value::Bool(contains(b, a)?),
        BinaryOp::StartsWith => Value::Bool(match a {
            Value::Null => false,
            _ => stringify(a).starts_with(stringify(b).as_str()),
        }),
        BinaryOp::EndsWith => Value::Bool(match a {
            Value::Null => false,
            _ => stringify(a).ends_with(stringify(b).as_str()),
        }),
        BinaryOp::Matches => Value::Bool(match a {
            Value::Null => false,
            _ => WildMatch::new(&stringify(b)).matches(&stringify(a)),
        }),
        BinaryOp::Add => match (a, b) {
            (Value::Number(_), Value::Number(_)) => {
                let (x, y) = numbers(op, a, b)?;
                number_value(x + y)
            }
            (Value::String(_), _) | (_, Value::String(_)) => {
                Value::String(format!("{}{}", stringify(a), stringify(b)))
            }
            (Value::Array(x), Value::Array(y)) => {
                Value::Array(x.iter().chain(y.iter()).cloned().collect())
            }
            _ => return Err(ExprError::Type(format!("cannot add {} and {}", a, b))),
        },
        BinaryOp::Sub => {
            let (x, y) = numbers(op, a, b)?;
            number_value(x - y)
        }
        BinaryOp::Mul => {
            let (x, y) = numbers(op, a, b)?;
            number_value(x * y)
        }
        BinaryOp::Div => {
            let (x, y) = numbers(op, a, b)?;
            if y == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            number_value(x / y)
        }
        BinaryOp::Rem => {
            let (x, y) = numbers(op, a, b)?;
            if y == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            number_value(x % y)
        }
        BinaryOp::Or | BinaryOp::And => unreachable!("short-circuit operators are handled by evaluate"),
    };
    Ok(value)
}
