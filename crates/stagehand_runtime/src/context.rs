// Evaluation Context - Everything an expression or action can see during one dispatch
//
// Roots available to expressions:
//   event      event name
//   platform   originating platform (or null)
//   timestamp  event timestamp (unix ms)
//   data       event payload
//   rule       id of the rule being evaluated (or null)
//   vars       bindings extracted by the rule
//   results    results of the actions already run for this rule
//   last       the most recent action result (or null)

use std::borrow::Cow;

use serde_json::{Map, Value};

use stagehand_types::Event;

use crate::helper::HelperSet;

static NULL: Value = Value::Null;

/// Context passed to expressions and action handlers
#[derive(Debug, Clone)]
pub struct EvalContext {
    event: Value,
    platform: Value,
    timestamp: Value,
    data: Value,
    rule: Value,
    vars: Value,
    results: Vec<Value>,
    results_value: Value,
    helpers: HelperSet,
}

impl EvalContext {
    /// Create a context for an event
    pub fn new(event: &Event, helpers: HelperSet) -> Self {
        Self {
            event: Value::String(event.name.clone()),
            platform: event
                .platform
                .as_ref()
                .map(|p| Value::String(p.clone()))
                .unwrap_or(Value::Null),
            timestamp: Value::from(event.timestamp),
            data: event.data.clone(),
            rule: Value::Null,
            vars: Value::Object(Map::new()),
            results: Vec::new(),
            results_value: Value::Array(Vec::new()),
            helpers,
        }
    }

    /// Derive a fresh per-rule context (results and bindings reset)
    pub fn for_rule(&self, rule_id: &str) -> Self {
        let mut ctx = self.clone();
        ctx.rule = Value::String(rule_id.to_string());
        ctx.vars = Value::Object(Map::new());
        ctx.results.clear();
        ctx.results_value = Value::Array(Vec::new());
        ctx
    }

    /// Event name
    pub fn event_name(&self) -> &str {
        self.event.as_str().unwrap_or_default()
    }

    /// Originating platform
    pub fn platform(&self) -> Option<&str> {
        self.platform.as_str()
    }

    /// Event payload
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Id of the rule being evaluated
    pub fn rule_id(&self) -> Option<&str> {
        self.rule.as_str()
    }

    /// Helper snapshot for this dispatch
    pub fn helpers(&self) -> &HelperSet {
        &self.helpers
    }

    /// Bound variable by name
    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Bind a variable visible as `vars.<name>`
    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        if let Value::Object(map) = &mut self.vars {
            map.insert(name.into(), value);
        }
    }

    /// Results of earlier actions in this rule
    pub fn results(&self) -> &[Value] {
        &self.results
    }

    /// Most recent action result
    pub fn last_result(&self) -> Option<&Value> {
        self.results.last()
    }

    /// Record an action result
    pub fn push_result(&mut self, result: Value) {
        self.results.push(result.clone());
        if let Value::Array(items) = &mut self.results_value {
            items.push(result);
        }
    }

    /// Resolve a root identifier; `None` means the name is unknown
    pub(crate) fn root(&self, name: &str) -> Option<Cow<'_, Value>> {
        let value = match name {
            "event" => &self.event,
            "platform" => &self.platform,
            "timestamp" => &self.timestamp,
            "data" => &self.data,
            "rule" => &self.rule,
            "vars" => &self.vars,
            "results" => &self.results_value,
            "last" => self.results.last().unwrap_or(&NULL),
            _ => return None,
        };
        Some(Cow::Borrowed(value))
    }
}
