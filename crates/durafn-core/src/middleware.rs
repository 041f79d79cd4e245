//! Middleware pipeline wrapping function execution, step execution, and
//! outgoing event delivery.
//!
//! Hooks run in registration order going in and reverse order coming out,
//! and every hook is awaited, so slow middleware stretches the invocation
//! rather than being skipped.

use crate::error::SerializedError;
use crate::event::Event;
use crate::sender::SendEventOutput;
use async_trait::async_trait;
use std::sync::Arc;

/// What a step looked like when its hook fired.
#[derive(Debug, Clone)]
pub struct StepInfo {
    /// The logical ID the user supplied.
    pub id: String,
    /// The hashed step ID reported to the Executor.
    pub hashed_id: String,
}

/// A `{data, error}` pair hooks may transform in place. Exactly one side
/// is populated.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub data: Option<serde_json::Value>,
    pub error: Option<SerializedError>,
}

impl RunOutput {
    pub fn data(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: SerializedError) -> Self {
        Self {
            data: None,
            error: Some(error),
        }
    }
}

/// Hook points around the engine. All methods default to no-ops so a
/// middleware implements only what it needs.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Before the user body is replayed for an invocation.
    async fn before_function_run(&self, _event: &Event, _run_id: &str) {}

    /// After the invocation produced a function-level outcome; may mutate it.
    async fn after_function_run(&self, _output: &mut RunOutput) {}

    /// Before a `run` step body executes.
    async fn before_step_run(&self, _step: &StepInfo) {}

    /// After a `run` step body executed; may mutate its outcome.
    async fn after_step_run(&self, _step: &StepInfo, _output: &mut RunOutput) {}

    /// Before events are handed to the sender; may mutate the batch.
    async fn before_send_event(&self, _events: &mut Vec<Event>) {}

    /// After the sender accepted the batch.
    async fn after_send_event(&self, _output: &SendEventOutput) {}

    /// Engine warnings, e.g. `AUTOMATIC_PARALLEL_INDEXING`.
    fn on_warning(&self, _code: &str, _message: &str) {}
}

/// An ordered middleware pipeline.
#[derive(Clone, Default)]
pub struct MiddlewareStack {
    layers: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.layers.push(middleware);
    }

    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.push(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub async fn function_run_before(&self, event: &Event, run_id: &str) {
        for layer in &self.layers {
            layer.before_function_run(event, run_id).await;
        }
    }

    pub async fn function_run_after(&self, output: &mut RunOutput) {
        for layer in self.layers.iter().rev() {
            layer.after_function_run(output).await;
        }
    }

    pub async fn step_run_before(&self, step: &StepInfo) {
        for layer in &self.layers {
            layer.before_step_run(step).await;
        }
    }

    pub async fn step_run_after(&self, step: &StepInfo, output: &mut RunOutput) {
        for layer in self.layers.iter().rev() {
            layer.after_step_run(step, output).await;
        }
    }

    pub async fn send_event_before(&self, events: &mut Vec<Event>) {
        for layer in &self.layers {
            layer.before_send_event(events).await;
        }
    }

    pub async fn send_event_after(&self, output: &SendEventOutput) {
        for layer in self.layers.iter().rev() {
            layer.after_send_event(output).await;
        }
    }

    pub fn warn(&self, code: &str, message: &str) {
        tracing::warn!(code, "{message}");
        for layer in &self.layers {
            layer.on_warning(code, message);
        }
    }
}

impl std::fmt::Debug for MiddlewareStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareStack")
            .field("layers", &self.layers.len())
            .finish()
    }
}
