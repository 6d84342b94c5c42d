// Parameter Templates - `{{ expr }}` placeholders inside action parameters
//
// A string that is exactly one placeholder keeps the evaluated value's type;
// any other string with placeholders renders to text. Objects and arrays are
// rendered recursively. Parameter trees are parsed once when a rule compiles.

use serde_json::{Map, Value};

use crate::context::EvalContext;
use crate::expr::{ExprError, ExprResult, Expression, stringify};

/// A piece of a parsed template string
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Expr(Expression),
}

/// A parsed template string
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a string containing `{{ expr }}` placeholders
    pub fn parse(source: &str) -> ExprResult<Self> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = closing_braces(after).ok_or_else(|| ExprError::Syntax {
                pos: offset + start,
                message: "unclosed '{{' in template".to_string(),
            })?;
            let expr = Expression::parse(after[..end].trim()).map_err(|e| match e {
                ExprError::Syntax { pos, message } => ExprError::Syntax {
                    pos: offset + start + 2 + pos,
                    message,
                },
                other => other,
            })?;
            segments.push(Segment::Expr(expr));
            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// Whether the template contains any placeholder
    pub fn has_placeholders(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Expr(_)))
    }

    /// Render against a context
    pub fn render(&self, ctx: &EvalContext) -> ExprResult<Value> {
        if let [Segment::Expr(expr)] = self.segments.as_slice() {
            return expr.evaluate(ctx);
        }

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Expr(expr) => out.push_str(&stringify(&expr.evaluate(ctx)?)),
            }
        }
        Ok(Value::String(out))
    }
}

/// Byte offset of the first `}}` outside a quoted string
fn closing_braces(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut quote = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(_) if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Parameter Trees
// ─────────────────────────────────────────────────────────────────────────────

/// A parameter value with its placeholders parsed
#[derive(Debug, Clone, PartialEq)]
pub enum ParamTemplate {
    /// No placeholders anywhere below
    Literal(Value),
    Text(Template),
    Array(Vec<ParamTemplate>),
    Object(Vec<(String, ParamTemplate)>),
}

impl ParamTemplate {
    pub fn compile(value: &Value) -> ExprResult<Self> {
        let compiled = match value {
            Value::String(s) if s.contains("{{") => Self::Text(Template::parse(s)?),
            Value::Array(items) => {
                let items = items.iter().map(Self::compile).collect::<ExprResult<Vec<_>>>()?;
                if items.iter().all(Self::is_literal) {
                    Self::Literal(value.clone())
                } else {
                    Self::Array(items)
                }
            }
            Value::Object(map) => {
                let entries = compile_entries(map)?;
                if entries.iter().all(|(_, v)| v.is_literal()) {
                    Self::Literal(value.clone())
                } else {
                    Self::Object(entries)
                }
            }
            other => Self::Literal(other.clone()),
        };
        Ok(compiled)
    }

    fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    pub fn render(&self, ctx: &EvalContext) -> ExprResult<Value> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Text(template) => template.render(ctx),
            Self::Array(items) => items
                .iter()
                .map(|item| item.render(ctx))
                .collect::<ExprResult<Vec<_>>>()
                .map(Value::Array),
            Self::Object(entries) => render_entries(entries, ctx).map(Value::Object),
        }
    }
}

/// Parsed `params` of one action invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledParams {
    entries: Vec<(String, ParamTemplate)>,
}

impl CompiledParams {
    /// Parse every placeholder inside a parameter map
    pub fn compile(params: &Map<String, Value>) -> ExprResult<Self> {
        Ok(Self {
            entries: compile_entries(params)?,
        })
    }

    /// Render every placeholder against a context
    pub fn render(&self, ctx: &EvalContext) -> ExprResult<Map<String, Value>> {
        render_entries(&self.entries, ctx)
    }
}

fn compile_entries(map: &Map<String, Value>) -> ExprResult<Vec<(String, ParamTemplate)>> {
    map.iter()
        .map(|(key, value)| Ok((key.clone(), ParamTemplate::compile(value)?)))
        .collect()
}

fn render_entries(entries: &[(String, ParamTemplate)], ctx: &EvalContext) -> ExprResult<Map<String, Value>> {
    entries
        .iter()
        .map(|(key, value)| Ok((key.clone(), value.render(ctx)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::HelperRegistry;
    use serde_json::json;
    use stagehand_types::Event;

    fn ctx() -> EvalContext {
        let event = Event::new("gift", json!({"user": "ann", "count": 3, "tags": ["a", "b"]}));
        EvalContext::new(&event, HelperRegistry::with_builtins().get_all())
    }

    fn render_value(value: &Value, ctx: &EvalContext) -> ExprResult<Value> {
        ParamTemplate::compile(value)?.render(ctx)
    }

    #[test]
    fn test_single_placeholder_keeps_type() {
        assert_eq!(render_value(&json!("{{data.count}}"), &ctx()), Ok(json!(3)));
        assert_eq!(render_value(&json!("{{ data.tags }}"), &ctx()), Ok(json!(["a", "b"])));
    }

    #[test]
    fn test_mixed_text() {
        assert_eq!(
            render_value(&json!("{{upper(data.user)}} sent {{data.count}} gifts"), &ctx()),
            Ok(json!("ANN sent 3 gifts"))
        );
        assert_eq!(render_value(&json!("no placeholders"), &ctx()), Ok(json!("no placeholders")));
        assert_eq!(render_value(&json!("[{{data.nobody}}]"), &ctx()), Ok(json!("[]")));
    }

    #[test]
    fn test_nested_params() {
        let params = json!({
            "command": "say {{data.user}}",
            "targets": ["{{event}}", 7],
            "meta": {"n": "{{data.count + 1}}"}
        });
        let compiled = CompiledParams::compile(params.as_object().unwrap()).unwrap();
        let rendered = compiled.render(&ctx()).unwrap();
        assert_eq!(
            Value::Object(rendered),
            json!({"command": "say ann", "targets": ["gift", 7], "meta": {"n": 4}})
        );
    }

    #[test]
    fn test_template_errors() {
        assert!(matches!(Template::parse("oops {{data.user"), Err(ExprError::Syntax { .. })));
        assert!(CompiledParams::compile(json!({"a": ["{{ 1 + }}"]}).as_object().unwrap()).is_err());
        assert!(CompiledParams::compile(json!({"a": "{{ data.x }}"}).as_object().unwrap()).is_ok());
        assert!(Template::parse("{{ 'never closed }}").is_err());
        assert!(!Template::parse("plain").unwrap().has_placeholders());
    }

    #[test]
    fn test_braces_inside_string_literals() {
        assert_eq!(
            render_value(&json!("{{ '}}' + data.user }}!"), &ctx()),
            Ok(json!("}}ann!"))
        );
        assert_eq!(
            render_value(&json!("{{ \"a}}b\" }}"), &ctx()),
            Ok(json!("a}}b"))
        );
        assert_eq!(
            render_value(&json!("{{ 'it\\'s }}' }}"), &ctx()),
            Ok(json!("it's }}"))
        );
    }

    #[test]
    fn test_literal_subtrees_are_not_templates() {
        let compiled = ParamTemplate::compile(&json!({"a": [1, "x"], "b": {"c": true}})).unwrap();
        assert!(matches!(compiled, ParamTemplate::Literal(_)));

        let compiled = ParamTemplate::compile(&json!({"a": [1, "{{event}}"], "b": 2})).unwrap();
        let ParamTemplate::Object(entries) = &compiled else {
            panic!("expected an object, got {:?}", compiled);
        };
        assert!(matches!(entries[0].1, ParamTemplate::Array(_)));
        assert!(matches!(entries[1].1, ParamTemplate::Literal(_)));
        assert_eq!(compiled.render(&ctx()), Ok(json!({"a": [1, "gift"], "b": 2})));
    }
}
