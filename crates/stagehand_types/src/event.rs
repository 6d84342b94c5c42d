//! Platform Events
//!
//! Events are produced by platform adapters and consumed once by the rule
//! engine. The core never persists them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Event
// ─────────────────────────────────────────────────────────────────────────────

/// A named occurrence with a data payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name rules bind to (e.g., "chat", "gift", "keypress")
    pub name: String,

    /// Timestamp when the event was created (Unix milliseconds)
    pub timestamp: i64,

    /// Event payload data (always an object)
    #[serde(default = "empty_object")]
    pub data: Value,

    /// Platform that produced the event, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Event {
    /// Create a new event stamped with the current time
    ///
    /// Non-object payloads are wrapped as `{ "value": payload }` so that rule
    /// expressions can always treat `data` as a map.
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            data: normalize_data(data),
            platform: None,
        }
    }

    /// Create an event attributed to a platform
    pub fn from_platform(platform: impl Into<String>, name: impl Into<String>, data: Value) -> Self {
        Self::new(name, data).with_platform(platform)
    }

    /// Set the originating platform
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    /// Get a field from the event data
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a string field from the event data
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Get a number field from the event data
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(|v| v.as_f64())
    }

    /// Deserialize the event data to a specific type
    pub fn parse_data<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}

fn normalize_data(data: Value) -> Value {
    match data {
        Value::Object(_) => data,
        Value::Null => empty_object(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), other);
            Value::Object(map)
        }
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
    fn test_event_creation() {
        let event = Event::from_platform("tiktok", "chat", json!({"comment": "hi", "likes": 3}));

        assert_eq!(event.name, "chat");
        assert_eq!(event.platform.as_deref(), Some("tiktok"));
        assert_eq!(event.get_str("comment"), Some("hi"));
        assert_eq!(event.get_f64("likes"), Some(3.0));
        assert!(event.timestamp > 0);
    }

    #[test]
    fn test_non_object_payload_is_wrapped() {
        let event = Event::new("keypress", json!("F1"));
        assert_eq!(event.get_str("value"), Some("F1"));

        let event = Event::new("tick", Value::Null);
        assert!(event.data.as_object().is_some_and(|m| m.is_empty()));
    }

    #[test]
    fn test_event_deserialize_defaults() {
        let event: Event = serde_json::from_str(r#"{"name": "gift", "timestamp": 10}"#).unwrap();
        assert_eq!(event.data, json!({}));
        assert!(event.platform.is_none());
    }
}
