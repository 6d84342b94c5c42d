// Helper Registry - Pure functions callable from rule expressions
//
// Helpers are registered once at startup and snapshotted per dispatch so that
// every expression in one dispatch sees the same set.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::expr::{is_truthy, number_value, stringify};

// ─────────────────────────────────────────────────────────────────────────────
// Helper Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by helper functions
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HelperError {
    #[error("expected {expected} argument(s), got {got}")]
    Arity { expected: String, got: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Failed(String),
}

pub type HelperResult<T> = Result<T, HelperError>;

/// A pure function invoked from condition and parameter expressions
///
/// Helpers must be deterministic and side-effect free; this is not enforced.
pub type HelperFn = Arc<dyn Fn(&[Value]) -> HelperResult<Value> + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Helper Set
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable snapshot of the registered helpers
#[derive(Clone, Default)]
pub struct HelperSet {
    helpers: Arc<HashMap<String, HelperFn>>,
}

impl HelperSet {
    /// Look up a helper by name
    pub fn get(&self, name: &str) -> Option<&HelperFn> {
        self.helpers.get(name)
    }

    /// Check if a helper exists
    pub fn contains(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    /// Number of helpers in the snapshot
    pub fn len(&self) -> usize {
        self.helpers.len()
    }

    /// Check if the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.helpers.is_empty()
    }
}

impl std::fmt::Debug for HelperSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.helpers.keys().collect();
        names.sort();
        f.debug_struct("HelperSet").field("helpers", &names).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Registry of helper functions available to expressions
#[derive(Default)]
pub struct HelperRegistry {
    helpers: DashMap<String, HelperFn>,
}

impl HelperRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            helpers: DashMap::new(),
        }
    }

    /// Create a registry pre-populated with the built-in helpers
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        register_builtins(&registry);
        registry
    }

    /// Register a helper, replacing any previous helper with the same name
    pub fn register<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(&[Value]) -> HelperResult<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.helpers.insert(name.clone(), Arc::new(func)).is_some() {
            tracing::warn!(helper = %name, "Helper re-registered, previous definition replaced");
        }
    }

    /// Snapshot all helpers for one dispatch
    pub fn get_all(&self) -> HelperSet {
        let helpers = self
            .helpers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        HelperSet {
            helpers: Arc::new(helpers),
        }
    }

    /// Check if a helper is registered
    pub fn contains(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    /// Get helper count
    pub fn len(&self) -> usize {
        self.helpers.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.helpers.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn arity(args: &[Value], expected: usize) -> HelperResult<()> {
    if args.len() != expected {
        return Err(HelperError::Arity {
            expected: expected.to_string(),
            got: args.len(),
        });
    }
    Ok(())
}

fn number_arg(args: &[Value], index: usize) -> HelperResult<f64> {
    match &args[index] {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| HelperError::InvalidArgument(format!("argument {} is not finite", index))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| HelperError::InvalidArgument(format!("'{}' is not a number", s))),
        other => Err(HelperError::InvalidArgument(format!(
            "argument {} must be a number, got {}",
            index, other
        ))),
    }
}

fn register_builtins(registry: &HelperRegistry) {
    registry.register("lower", |args| {
        arity(args, 1)?;
        Ok(Value::String(stringify(&args[0]).to_lowercase()))
    });

    registry.register("upper", |args| {
        arity(args, 1)?;
        Ok(Value::String(stringify(&args[0]).to_uppercase()))
    });

    registry.register("trim", |args| {
        arity(args, 1)?;
        Ok(Value::String(stringify(&args[0]).trim().to_string()))
    });

    registry.register("len", |args| {
        arity(args, 1)?;
        let len = match &args[0] {
            Value::String(s) => s.chars().count(),
            Value::Array(a) => a.len(),
            Value::Object(m) => m.len(),
            Value::Null => 0,
            other => {
                return Err(HelperError::InvalidArgument(format!("len() of {}", other)));
            }
        };
        Ok(Value::from(len))
    });

    registry.register("str", |args| {
        arity(args, 1)?;
        Ok(Value::String(stringify(&args[0])))
    });

    registry.register("num", |args| {
        arity(args, 1)?;
        Ok(number_value(number_arg(args, 0)?))
    });

    registry.register("bool", |args| {
        arity(args, 1)?;
        Ok(Value::Bool(is_truthy(&args[0])))
    });

    registry.register("concat", |args| {
        Ok(Value::String(args.iter().map(stringify).collect()))
    });

    registry.register("coalesce", |args| {
        Ok(args
            .iter()
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or(Value::Null))
    });

    registry.register("min", |args| {
        if args.is_empty() {
            return Err(HelperError::Arity {
                expected: "at least 1".to_string(),
                got: 0,
            });
        }
        let mut best = number_arg(args, 0)?;
        for i in 1..args.len() {
            best = best.min(number_arg(args, i)?);
        }
        Ok(number_value(best))
    });

    registry.register("max", |args| {
        if args.is_empty() {
            return Err(HelperError::Arity {
                expected: "at least 1".to_string(),
                got: 0,
            });
        }
        let mut best = number_arg(args, 0)?;
        for i in 1..args.len() {
            best = best.max(number_arg(args, i)?);
        }
        Ok(number_value(best))
    });

    registry.register("abs", |args| {
        arity(args, 1)?;
        Ok(number_value(number_arg(args, 0)?.abs()))
    });

    registry.register("round", |args| {
        arity(args, 1)?;
        Ok(number_value(number_arg(args, 0)?.round()))
    });

    registry.register("split", |args| {
        arity(args, 2)?;
        let text = stringify(&args[0]);
        let sep = stringify(&args[1]);
        let parts = if sep.is_empty() {
            text.split_whitespace().map(|s| Value::String(s.to_string())).collect()
        } else {
            text.split(sep.as_str()).map(|s| Value::String(s.to_string())).collect()
        };
        Ok(Value::Array(parts))
    });

    registry.register("join", |args| {
        arity(args, 2)?;
        let items = args[0]
            .as_array()
            .ok_or_else(|| HelperError::InvalidArgument("join() expects a list".to_string()))?;
        let sep = stringify(&args[1]);
        let joined: Vec<String> = items.iter().map(stringify).collect();
        Ok(Value::String(joined.join(&sep)))
    });

    registry.register("replace", |args| {
        arity(args, 3)?;
        let text = stringify(&args[0]);
        Ok(Value::String(
            text.replace(&stringify(&args[1]), &stringify(&args[2])),
        ))
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
