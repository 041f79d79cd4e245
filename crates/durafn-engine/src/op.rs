//! Step descriptors: what the step tools emit and the engine reports
//! back to the Executor.

use crate::hash::StepId;
use durafn_core::SerializedError;
use serde::{Deserialize, Serialize};

/// The operation a descriptor represents. Serialized names are part of
/// the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// A step body executed in this invocation; `data` or `error` is set.
    StepRun,
    /// A step discovered during replay but not yet delegated.
    StepPlanned,
    /// A step body failed but may be retried.
    StepError,
    /// A step body failed terminally.
    StepFailed,
    /// The run finished.
    RunComplete,
    WaitForEvent,
    Sleep,
    InvokeFunction,
}

impl Op {
    /// Whether the SDK itself can execute a step of this kind. Sleeps,
    /// event waits, and invocations are fulfilled by the Executor.
    pub fn is_executable(&self) -> bool {
        matches!(self, Op::StepPlanned | Op::StepRun)
    }
}

/// A single step as reported to the Executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDescriptor {
    /// Hashed step ID (40-char lowercase hex).
    pub id: StepId,
    pub name: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    pub op: Op,
    /// Present only after execution; mutually exclusive with `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SerializedError>,
    /// Tool-specific options, e.g. a wait-for-event match expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opts: Option<serde_json::Value>,
}

impl StepDescriptor {
    pub fn planned(id: StepId, name: impl Into<String>, op: Op) -> Self {
        let name = name.into();
        Self {
            id,
            display_name: name.clone(),
            name,
            op,
            data: None,
            error: None,
            opts: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_opts(mut self, opts: serde_json::Value) -> Self {
        self.opts = Some(opts);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        debug_assert!(self.error.is_none(), "data and error are mutually exclusive");
        self.data = Some(data);
        self
    }

    pub fn with_error(mut self, error: SerializedError) -> Self {
        debug_assert!(self.data.is_none(), "data and error are mutually exclusive");
        self.error = Some(error);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_step_id;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_op_wire_names() {
        assert_eq!(serde_json::to_string(&Op::StepRun).unwrap(), "\"StepRun\"");
        assert_eq!(
            serde_json::to_string(&Op::WaitForEvent).unwrap(),
            "\"WaitForEvent\""
        );
        assert_eq!(
            serde_json::to_string(&Op::InvokeFunction).unwrap(),
            "\"InvokeFunction\""
        );
    }

    #[test]
    fn test_executable_ops() {
        assert!(Op::StepPlanned.is_executable());
        assert!(Op::StepRun.is_executable());
        assert!(!Op::Sleep.is_executable());
        assert!(!Op::WaitForEvent.is_executable());
        assert!(!Op::InvokeFunction.is_executable());
    }

    #[test]
    fn test_descriptor_serialization() {
        let descriptor = StepDescriptor::planned(hash_step_id("A"), "A", Op::StepPlanned)
            .with_data(json!("ok"));

        let wire = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(wire["id"], json!("6dcd4ce23d88e2ee9568ba546c007c63d9131c1b"));
        assert_eq!(wire["displayName"], json!("A"));
        assert_eq!(wire["op"], json!("StepPlanned"));
        assert_eq!(wire["data"], json!("ok"));
        assert!(wire.get("error").is_none());
        assert!(wire.get("opts").is_none());
    }
}
