//! The invocation request envelope: memoized step state, the
//! Executor-observed completion order, and the versioned wire decoding.

use crate::hash::StepId;
use durafn_core::{Event, SerializedError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The replay protocol version of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionVersion {
    V0,
    V1,
    V2,
}

impl ExecutionVersion {
    pub const LATEST: ExecutionVersion = ExecutionVersion::V2;

    pub fn from_wire(value: i64) -> Result<Self, RequestParseError> {
        match value {
            0 => Ok(Self::V0),
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            other => Err(RequestParseError::UnsupportedVersion(other)),
        }
    }

    pub fn from_header(value: &str) -> Result<Self, RequestParseError> {
        value
            .trim()
            .parse::<i64>()
            .map_err(|_| RequestParseError::MalformedVersion(value.to_string()))
            .and_then(Self::from_wire)
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Self::V0 => 0,
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    /// Value of the `X-Inngest-Req-Version` header.
    pub fn as_header(&self) -> &'static str {
        match self {
            Self::V0 => "0",
            Self::V1 => "1",
            Self::V2 => "2",
        }
    }
}

/// A memoized outcome for one step, restored from the Executor.
/// Exactly one of the fields is populated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoizedStep {
    pub data: Option<serde_json::Value>,
    pub error: Option<SerializedError>,
    /// Input captured for a step the Executor will re-run.
    pub input: Option<serde_json::Value>,
}

impl MemoizedStep {
    pub fn data(value: serde_json::Value) -> Self {
        Self {
            data: Some(value),
            ..Default::default()
        }
    }

    pub fn error(error: SerializedError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    /// Decode one wire entry. V1/V2 entries are `{data}`, `{error}`, or
    /// `{input}` (an `id` echo is tolerated); anything else is treated as
    /// bare V0 data.
    pub fn from_wire(value: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = &value {
            let known = map
                .keys()
                .all(|k| matches!(k.as_str(), "id" | "data" | "error" | "input" | "type"));
            let tagged = map.contains_key("data")
                || map.contains_key("error")
                || map.contains_key("input");

            if known && tagged {
                return Self {
                    data: map.get("data").cloned(),
                    error: map
                        .get("error")
                        .and_then(|e| serde_json::from_value(e.clone()).ok()),
                    input: map.get("input").cloned(),
                };
            }
        }

        Self::data(value)
    }

    pub fn to_wire(&self, id: &StepId, version: ExecutionVersion) -> serde_json::Value {
        match version {
            ExecutionVersion::V0 => self.data.clone().unwrap_or(serde_json::Value::Null),
            _ => {
                let mut map = serde_json::Map::new();
                map.insert("id".into(), serde_json::Value::String(id.as_str().into()));
                if let Some(data) = &self.data {
                    map.insert("data".into(), data.clone());
                } else if let Some(error) = &self.error {
                    map.insert(
                        "error".into(),
                        serde_json::to_value(error).unwrap_or(serde_json::Value::Null),
                    );
                } else if let Some(input) = &self.input {
                    map.insert("input".into(), input.clone());
                }
                serde_json::Value::Object(map)
            }
        }
    }
}

/// Memoized state for every step the Executor has observed finishing.
/// Map insertion order carries no meaning; ordering questions go through
/// the [`CompletionStack`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepState {
    entries: HashMap<StepId, MemoizedStep>,
}

impl StepState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: StepId, step: MemoizedStep) {
        self.entries.insert(id, step);
    }

    pub fn get(&self, id: &StepId) -> Option<&MemoizedStep> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &StepId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn from_wire(map: serde_json::Map<String, serde_json::Value>) -> Self {
        let entries = map
            .into_iter()
            .map(|(k, v)| (StepId::raw(k), MemoizedStep::from_wire(v)))
            .collect();
        Self { entries }
    }

    pub fn to_wire(&self, version: ExecutionVersion) -> serde_json::Map<String, serde_json::Value> {
        self.entries
            .iter()
            .map(|(id, step)| (id.as_str().to_string(), step.to_wire(id, version)))
            .collect()
    }
}

/// The order in which the Executor observed steps complete. Determinism
/// that depends on which step resolved first (e.g. which arm of a race
/// won) uses this, never map iteration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionStack {
    #[serde(default)]
    pub stack: Vec<StepId>,
    #[serde(default)]
    pub current: i64,
}

impl CompletionStack {
    /// Position of a step in completion order, if it has completed.
    pub fn position(&self, id: &StepId) -> Option<usize> {
        self.stack.iter().position(|s| s == id)
    }
}

/// Request-scoped execution context from the Executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestCtx {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Set by the Executor once it has seen parallel discovery; forces
    /// planned steps to be reported rather than executed inline.
    #[serde(default)]
    pub disable_immediate_execution: bool,
    #[serde(default)]
    pub use_api: bool,
    #[serde(default)]
    pub stack: CompletionStack,
}

/// A fully decoded invocation request.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub event: Event,
    pub events: Vec<Event>,
    pub steps: StepState,
    pub ctx: RequestCtx,
    pub version: ExecutionVersion,
}

#[derive(Debug, Error)]
pub enum RequestParseError {
    #[error("invalid request body: {0}")]
    InvalidBody(#[from] serde_json::Error),

    #[error("request carries no event")]
    MissingEvent,

    #[error("unsupported execution version {0}")]
    UnsupportedVersion(i64),

    #[error("malformed execution version {0:?}")]
    MalformedVersion(String),
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    event: Option<Event>,
    events: Option<Vec<Event>>,
    steps: Option<serde_json::Map<String, serde_json::Value>>,
    ctx: Option<RequestCtx>,
    version: Option<i64>,
}

impl ExecutionRequest {
    /// Decode a request body. A version header, when present, overrides
    /// the body's own version; an absent version means latest.
    pub fn from_wire(
        body: &[u8],
        version_override: Option<ExecutionVersion>,
    ) -> Result<Self, RequestParseError> {
        let raw: RawEnvelope = serde_json::from_slice(body)?;
        Self::from_raw(raw, version_override)
    }

    pub fn from_wire_value(
        body: serde_json::Value,
        version_override: Option<ExecutionVersion>,
    ) -> Result<Self, RequestParseError> {
        let raw: RawEnvelope = serde_json::from_value(body)?;
        Self::from_raw(raw, version_override)
    }

    fn from_raw(
        raw: RawEnvelope,
        version_override: Option<ExecutionVersion>,
    ) -> Result<Self, RequestParseError> {
        let version = match (version_override, raw.version) {
            (Some(v), _) => v,
            (None, Some(v)) => ExecutionVersion::from_wire(v)?,
            (None, None) => ExecutionVersion::LATEST,
        };

        let mut events = raw.events.unwrap_or_default();
        let event = match (raw.event, events.first()) {
            (Some(event), _) => event,
            (None, Some(first)) => first.clone(),
            (None, None) => return Err(RequestParseError::MissingEvent),
        };
        if events.is_empty() {
            events.push(event.clone());
        }

        Ok(Self {
            event,
            events,
            steps: StepState::from_wire(raw.steps.unwrap_or_default()),
            ctx: raw.ctx.unwrap_or_default(),
            version,
        })
    }

    /// Encode back to the wire shape; `from_wire(to_wire(r)) == r`.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "event": self.event,
            "events": self.events,
            "steps": serde_json::Value::Object(self.steps.to_wire(self.version)),
            "ctx": self.ctx,
            "version": self.version.as_i64(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_step_id;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn body(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_decode_full_envelope() {
        let a = hash_step_id("A");
        let request = ExecutionRequest::from_wire(
            &body(json!({
                "event": {"name": "t/run", "data": {"n": 1}},
                "steps": { a.as_str(): {"id": a.as_str(), "data": "A"} },
                "ctx": {
                    "run_id": "r1",
                    "attempt": 2,
                    "disable_immediate_execution": true,
                    "stack": {"stack": [a.as_str()], "current": 1}
                },
                "version": 2
            })),
            None,
        )
        .unwrap();

        assert_eq!(request.version, ExecutionVersion::V2);
        assert_eq!(request.event.name, "t/run");
        assert_eq!(request.events.len(), 1);
        assert_eq!(request.ctx.run_id, "r1");
        assert_eq!(request.ctx.attempt, 2);
        assert!(request.ctx.disable_immediate_execution);
        assert_eq!(request.ctx.stack.position(&a), Some(0));
        assert_eq!(request.steps.get(&a).unwrap().data, Some(json!("A")));
    }

    #[test]
    fn test_absent_version_means_latest() {
        let request = ExecutionRequest::from_wire(
            &body(json!({"event": {"name": "t/run"}})),
            None,
        )
        .unwrap();
        assert_eq!(request.version, ExecutionVersion::LATEST);
    }

    #[test]
    fn test_header_overrides_body_version() {
        let request = ExecutionRequest::from_wire(
            &body(json!({"event": {"name": "t/run"}, "version": 0})),
            Some(ExecutionVersion::V1),
        )
        .unwrap();
        assert_eq!(request.version, ExecutionVersion::V1);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let err = ExecutionRequest::from_wire(
            &body(json!({"event": {"name": "t/run"}, "version": 7})),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, RequestParseError::UnsupportedVersion(7)));
    }

    #[test]
    fn test_missing_event_rejected() {
        let err = ExecutionRequest::from_wire(&body(json!({"steps": {}})), None).unwrap_err();
        assert!(matches!(err, RequestParseError::MissingEvent));
    }

    #[test]
    fn test_events_fill_in_event() {
        let request = ExecutionRequest::from_wire(
            &body(json!({"events": [{"name": "first"}, {"name": "second"}]})),
            None,
        )
        .unwrap();
        assert_eq!(request.event.name, "first");
        assert_eq!(request.events.len(), 2);
    }

    #[test]
    fn test_memoized_step_variants() {
        let data = MemoizedStep::from_wire(json!({"data": 42}));
        assert_eq!(data.data, Some(json!(42)));

        let error = MemoizedStep::from_wire(json!({
            "error": {"name": "Error", "message": "boom", "__serialized": true}
        }));
        assert_eq!(error.error.as_ref().unwrap().message, "boom");

        let input = MemoizedStep::from_wire(json!({"input": [1, 2]}));
        assert_eq!(input.input, Some(json!([1, 2])));

        // V0 compat: a bare value is data.
        let bare = MemoizedStep::from_wire(json!("A"));
        assert_eq!(bare.data, Some(json!("A")));

        // An object that is not a tagged entry is bare data too.
        let unshaped = MemoizedStep::from_wire(json!({"answer": 42}));
        assert_eq!(unshaped.data, Some(json!({"answer": 42})));
    }

    #[test]
    fn test_round_trip_law() {
        let wire = json!({
            "event": {"name": "t/run", "data": {"n": 1}},
            "events": [{"name": "t/run", "data": {"n": 1}}],
            "steps": {
                hash_step_id("A").as_str(): {"data": "A"},
                hash_step_id("B").as_str(): {
                    "error": {"name": "Error", "message": "boom", "__serialized": true}
                }
            },
            "ctx": {"run_id": "r1", "attempt": 0, "stack": {"stack": [], "current": 0}},
            "version": 2
        });

        let first = ExecutionRequest::from_wire_value(wire, None).unwrap();
        let second = ExecutionRequest::from_wire_value(first.to_wire(), None).unwrap();
        assert_eq!(first, second);
    }
}
