//! Rule Definitions
//!
//! A rule binds an event name and an optional condition to an ordered list of
//! action invocations. Rules are read from definition files; one file may hold
//! a single rule, a list of rules, or a `rules` table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Rule Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised while reading or validating a rule record
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleError {
    #[error("Malformed rule record: {0}")]
    Malformed(String),

    #[error("Rule is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Rule '{rule_id}' has an action with an empty type (index {index})")]
    EmptyActionType { rule_id: String, index: usize },

    #[error("Unsupported rule document: {0}")]
    UnsupportedDocument(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Action Invocation
// ─────────────────────────────────────────────────────────────────────────────

/// A call to a registered action handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInvocation {
    /// Registered action name (e.g., "TTS", "minecraft:command")
    #[serde(rename = "type")]
    pub action_type: String,

    /// Literal or templated parameters handed to the handler
    #[serde(default)]
    pub params: Map<String, Value>,

    /// Optional guard evaluated right before this invocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

impl ActionInvocation {
    /// Create an invocation with no parameters
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            params: Map::new(),
            when: None,
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Gate this invocation on an expression
    pub fn with_when(mut self, expr: impl Into<String>) -> Self {
        self.when = Some(expr.into());
        self
    }

    /// Get a parameter
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// Get a numeric parameter
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(|v| v.as_f64())
    }

    /// Get a boolean parameter
    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(|v| v.as_bool())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rule
// ─────────────────────────────────────────────────────────────────────────────

/// A declarative binding of an event to actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Unique rule identifier within one active set
    pub id: String,

    /// Event name this rule reacts to (exact match)
    #[serde(alias = "on", alias = "event_name")]
    pub event_name: String,

    /// Condition expression; absent means "always match"
    #[serde(default, alias = "trigger", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Named expressions exposed to actions as `vars.<name>`
    ///
    /// Each binding is evaluated against the event, never against another
    /// binding.
    #[serde(default, alias = "let", skip_serializing_if = "BTreeMap::is_empty")]
    pub bindings: BTreeMap<String, String>,

    /// Actions run in declared order when the rule matches
    pub actions: Vec<ActionInvocation>,

    /// Disabled rules are kept in the set but never evaluated
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Rule {
    /// Create an enabled rule with no condition and no actions
    pub fn new(id: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event_name: event_name.into(),
            condition: None,
            bindings: BTreeMap::new(),
            actions: Vec::new(),
            enabled: true,
            description: None,
        }
    }

    /// Set the condition expression
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Bind a named expression
    pub fn with_binding(mut self, name: impl Into<String>, expr: impl Into<String>) -> Self {
        self.bindings.insert(name.into(), expr.into());
        self
    }

    /// Append an action
    pub fn with_action(mut self, action: ActionInvocation) -> Self {
        self.actions.push(action);
        self
    }

    /// Set the enabled flag
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check the required fields
    ///
    /// An empty action list is legal (the rule only logs its match), but every
    /// declared action must name a handler.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.id.trim().is_empty() {
            return Err(RuleError::MissingField("id"));
        }
        if self.event_name.trim().is_empty() {
            return Err(RuleError::MissingField("eventName"));
        }
        for (index, action) in self.actions.iter().enumerate() {
            if action.action_type.trim().is_empty() {
                return Err(RuleError::EmptyActionType {
                    rule_id: self.id.clone(),
                    index,
                });
            }
        }
        Ok(())
    }

    /// Whether the condition is absent or blank
    pub fn is_unconditional(&self) -> bool {
        self.condition.as_deref().is_none_or(|c| c.trim().is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rule Document
// ─────────────────────────────────────────────────────────────────────────────

/// Split a parsed definition file into its rule records
///
/// Each record is decoded independently so that one bad record does not hide
/// its siblings. Accepted shapes: a rule object, an array of rule objects, or
/// an object with a `rules` array.
pub fn rules_from_document(document: Value) -> Result<Vec<Result<Rule, RuleError>>, RuleError> {
    let records = match document {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("rules") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(RuleError::UnsupportedDocument(format!(
                    "'rules' must be a list, found {}",
                    type_name(&other)
                )));
            }
            None => vec![Value::Object(map)],
        },
        other => {
            return Err(RuleError::UnsupportedDocument(format!(
                "expected an object or a list, found {}",
                type_name(&other)
            )));
        }
    };

    Ok(records.into_iter().map(decode_rule).collect())
}

fn decode_rule(record: Value) -> Result<Rule, RuleError> {
    if let Value::Object(map) = &record {
        if !map.contains_key("actions") {
            return Err(RuleError::MissingField("actions"));
        }
    }
    let rule: Rule =
        serde_json::from_value(record).map_err(|e| RuleError::Malformed(e.to_string()))?;
    rule.validate()?;
    Ok(rule)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_field_aliases() {
        let rule: Rule = serde_json::from_value(json!({
            "id": "greet",
            "on": "chat",
            "condition": "data.comment contains 'hi'",
            "let": {"who": "data.user"},
            "actions": [{"type": "TTS", "params": {"message": "{{data.comment}}"}}]
        }))
        .unwrap();

        assert_eq!(rule.event_name, "chat");
        assert_eq!(rule.bindings.get("who").map(String::as_str), Some("data.user"));
        assert!(rule.enabled);
        assert_eq!(rule.actions[0].action_type, "TTS");
        assert_eq!(rule.actions[0].param_str("message"), Some("{{data.comment}}"));

        let rule: Rule = serde_json::from_value(json!({
            "id": "gift",
            "eventName": "gift",
            "actions": [],
            "enabled": false
        }))
        .unwrap();
        assert_eq!(rule.event_name, "gift");
        assert!(!rule.enabled);
        assert!(rule.is_unconditional());
    }

    #[test]
    fn test_validate_required_fields() {
        assert_eq!(
            Rule::new("", "chat").validate(),
            Err(RuleError::MissingField("id"))
        );
        assert_eq!(
            Rule::new("r1", " ").validate(),
            Err(RuleError::MissingField("eventName"))
        );

        let rule = Rule::new("r1", "chat").with_action(ActionInvocation::new(""));
        assert!(matches!(
            rule.validate(),
            Err(RuleError::EmptyActionType { index: 0, .. })
        ));

        // Empty action list is a legal no-op rule
        assert!(Rule::new("r1", "chat").validate().is_ok());
    }

    #[test]
    fn test_document_shapes() {
        let single = rules_from_document(json!({"id": "a", "on": "x", "actions": []})).unwrap();
        assert_eq!(single.len(), 1);
        assert!(single[0].is_ok());

        let list = rules_from_document(json!([
            {"id": "a", "on": "x", "actions": []},
            {"id": "b", "on": "y", "actions": []}
        ]))
        .unwrap();
        assert_eq!(list.len(), 2);

        let table = rules_from_document(json!({"rules": [{"id": "a", "on": "x", "actions": []}]}))
            .unwrap();
        assert_eq!(table.len(), 1);

        assert!(rules_from_document(json!("nope")).is_err());
        assert!(rules_from_document(json!({"rules": 3})).is_err());
    }

    #[test]
    fn test_bad_record_does_not_hide_siblings() {
        let records = rules_from_document(json!([
            {"id": "good", "on": "chat", "actions": []},
            {"id": "no-actions", "on": "chat"},
            {"on": "chat", "actions": []}
        ]))
        .unwrap();

        assert!(records[0].is_ok());
        assert_eq!(records[1], Err(RuleError::MissingField("actions")));
        assert!(matches!(records[2], Err(RuleError::Malformed(_))));
    }

    #[test]
    fn test_toml_document() {
        let doc: Value = toml::from_str(
            r#"
[[rules]]
id = "follow"
on = "follow"

[[rules.actions]]
type = "log"
params = { message = "new follower {{data.user}}" }
"#,
        )
        .unwrap();

        let rules: Vec<Rule> = rules_from_document(doc)
            .unwrap()
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rules[0].id, "follow");
        assert_eq!(
            rules[0].actions[0].param_str("message"),
            Some("new follower {{data.user}}")
        );
    }
}
