//! Event payloads exchanged with the Executor.

use serde::{Deserialize, Serialize};

/// Emitted by the Executor when a run exhausts its retries; drives
/// registered failure handlers.
pub const FUNCTION_FAILED_EVENT: &str = "inngest/function.failed";
/// Emitted when one function invokes another.
pub const FUNCTION_INVOKED_EVENT: &str = "inngest/function.invoked";

/// An event as received from or published to the Executor. The engine
/// never mutates one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(default)]
    pub data: serde_json::Value,
    /// Actor information attached by the publisher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<serde_json::Value>,
    /// Unix milliseconds; stamped by the Executor when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    /// Idempotency key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Payload schema version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<String>,
}

impl Event {
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            data,
            user: None,
            ts: None,
            id: None,
            v: None,
        }
    }

    pub fn with_user(mut self, user: serde_json::Value) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_ts(mut self, ts: i64) -> Self {
        self.ts = Some(ts);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// True for `inngest/*` events published by the Executor itself.
    pub fn is_internal(&self) -> bool {
        self.name.starts_with("inngest/")
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new("", serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_event_round_trip() {
        let event = Event::new("shop/order.created", json!({"order_id": 42}))
            .with_user(json!({"id": "u_1"}))
            .with_ts(1_700_000_000_000)
            .with_id("evt-1");

        let encoded = serde_json::to_value(&event).unwrap();
        let decoded: Event = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_optional_fields_omitted() {
        let event = Event::new("a/b", json!({}));
        let encoded = serde_json::to_string(&event).unwrap();

        assert!(!encoded.contains("user"));
        assert!(!encoded.contains("ts"));
        assert!(!encoded.contains("\"id\""));
    }

    #[test]
    fn test_internal_event_detection() {
        assert!(Event::new(FUNCTION_FAILED_EVENT, json!({})).is_internal());
        assert!(!Event::new("shop/order.created", json!({})).is_internal());
    }

    #[test]
    fn test_decode_minimal() {
        let event: Event = serde_json::from_str(r#"{"name":"a/b"}"#).unwrap();
        assert_eq!(event.name, "a/b");
        assert_eq!(event.data, serde_json::Value::Null);
    }
}
