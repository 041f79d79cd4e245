//! Step tools: the operations user code calls inside a function body,
//! and the per-invocation coordinator that memoizes, plans, and executes
//! them.
//!
//! Control flow is `Result`-based. A tool call that hits memoized state
//! resolves (or rejects) immediately; a call for a step the Executor has
//! not yet completed records a planned descriptor and returns
//! [`FlowError::Interrupt`], which user code propagates with `?` back to
//! the engine.

use crate::duration::to_time_str;
use crate::hash::{StepId, StepIdIndexer};
use crate::op::{Op, StepDescriptor};
use crate::state::{MemoizedStep, StepState};
use durafn_core::{
    deserialize_error, serialize_error, Event, EventSender, MiddlewareStack, Retriability,
    RunOutput, SdkError, SendEventOutput, StepInfo,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Warning code emitted when duplicate logical IDs are indexed across
/// discovery batches.
pub const AUTOMATIC_PARALLEL_INDEXING: &str = "AUTOMATIC_PARALLEL_INDEXING";

/// Marker that an invocation stopped at a planned step. Opaque: only the
/// engine constructs and consumes one.
#[derive(Debug)]
pub struct Interrupt(());

/// Errors flowing out of step tools and function bodies.
///
/// `Interrupt` is engine control flow, not a failure. User code must
/// propagate it with `?`; recovery logic that wants to handle a step's
/// own error should match [`FlowError::Error`] and re-raise the rest.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error(transparent)]
    Error(#[from] SdkError),

    #[error("function interrupted awaiting planned steps")]
    Interrupt(Interrupt),
}

impl FlowError {
    fn interrupt() -> Self {
        Self::Interrupt(Interrupt(()))
    }

    /// The user-level error, unless this is an engine interrupt.
    pub fn user_error(&self) -> Option<&SdkError> {
        match self {
            FlowError::Error(err) => Some(err),
            FlowError::Interrupt(_) => None,
        }
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, FlowError::Interrupt(_))
    }
}

impl From<anyhow::Error> for FlowError {
    fn from(err: anyhow::Error) -> Self {
        FlowError::Error(err.into())
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Error(err.into())
    }
}

/// Options for [`StepHandle::wait_for_event`].
#[derive(Debug, Clone)]
pub struct WaitForEventOpts {
    /// Name of the event to wait for.
    pub event: String,
    pub timeout: Duration,
    /// CEL expression matching the waited-for event against the trigger.
    pub match_expression: Option<String>,
}

impl WaitForEventOpts {
    pub fn new(event: impl Into<String>, timeout: Duration) -> Self {
        Self {
            event: event.into(),
            timeout,
            match_expression: None,
        }
    }

    pub fn with_match(mut self, expression: impl Into<String>) -> Self {
        self.match_expression = Some(expression.into());
        self
    }
}

/// Options for [`StepHandle::invoke`].
#[derive(Debug, Clone)]
pub struct InvokeOpts {
    /// Fully qualified slug of the function to invoke.
    pub function_id: String,
    pub data: serde_json::Value,
    pub timeout: Option<Duration>,
}

impl InvokeOpts {
    pub fn new(function_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            function_id: function_id.into(),
            data,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A step the coordinator executed inline during this invocation.
#[derive(Debug, Clone)]
pub(crate) struct ExecutedStep {
    pub descriptor: StepDescriptor,
    pub retriable: Option<Retriability>,
}

#[derive(Default)]
struct CoordinatorInner {
    indexer: StepIdIndexer,
    found: Vec<StepDescriptor>,
    executed: Option<ExecutedStep>,
    /// Advances every time a memoized step resolves; separates discovery
    /// batches for the parallel-indexing warning.
    batch: u32,
    last_occurrence_batch: HashMap<String, u32>,
}

/// Per-invocation step bookkeeping shared by every tool call.
pub(crate) struct StepCoordinator {
    state: StepState,
    target: Option<StepId>,
    middleware: Arc<MiddlewareStack>,
    sender: Option<Arc<dyn EventSender>>,
    inner: Mutex<CoordinatorInner>,
}

impl StepCoordinator {
    pub(crate) fn new(
        state: StepState,
        target: Option<StepId>,
        middleware: Arc<MiddlewareStack>,
        sender: Option<Arc<dyn EventSender>>,
    ) -> Self {
        Self {
            state,
            target,
            middleware,
            sender,
            inner: Mutex::new(CoordinatorInner::default()),
        }
    }

    /// Hashed ID for the next occurrence of a logical ID, plus whether a
    /// prior occurrence happened in an earlier batch.
    fn next_id(&self, logical_id: &str) -> (StepId, u32, bool) {
        let mut inner = self.inner.lock().expect("coordinator poisoned");
        let (hashed, occurrence) = inner.indexer.next(logical_id);
        let current_batch = inner.batch;
        let previous = inner
            .last_occurrence_batch
            .insert(logical_id.to_string(), current_batch);
        let cross_batch = occurrence >= 2 && previous != Some(current_batch);
        (hashed, occurrence, cross_batch)
    }

    fn memoized(&self, id: &StepId) -> Option<MemoizedStep> {
        self.state.get(id).cloned()
    }

    /// A memoized resolution is a progress point; later discoveries are a
    /// new batch.
    fn note_resolution(&self) {
        self.inner.lock().expect("coordinator poisoned").batch += 1;
    }

    fn is_target(&self, id: &StepId) -> bool {
        self.target.as_ref() == Some(id)
    }

    fn plan(&self, descriptor: StepDescriptor, logical_id: &str, cross_batch: bool) {
        if cross_batch {
            self.middleware.warn(
                AUTOMATIC_PARALLEL_INDEXING,
                &format!(
                    "step id {logical_id:?} was reused across batches and has been \
                     automatically indexed; give steps unique ids to silence this"
                ),
            );
        }
        self.inner
            .lock()
            .expect("coordinator poisoned")
            .found
            .push(descriptor);
    }

    fn record_executed(&self, descriptor: StepDescriptor, retriable: Option<Retriability>) {
        let mut inner = self.inner.lock().expect("coordinator poisoned");
        inner.executed = Some(ExecutedStep {
            descriptor,
            retriable,
        });
    }

    /// Drain discoveries after the body future settles.
    pub(crate) fn take_results(&self) -> (Vec<StepDescriptor>, Option<ExecutedStep>) {
        let mut inner = self.inner.lock().expect("coordinator poisoned");
        (std::mem::take(&mut inner.found), inner.executed.take())
    }
}

/// The step tools exposed to user code through the function context.
#[derive(Clone)]
pub struct StepHandle {
    coordinator: Arc<StepCoordinator>,
}

impl StepHandle {
    pub(crate) fn new(coordinator: Arc<StepCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Execute `body` once; memoized on every later replay. The return
    /// value must be JSON-serializable; `()` normalizes to `null`.
    pub async fn run<T, F, Fut>(&self, id: &str, body: F) -> Result<T, FlowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SdkError>>,
    {
        let (hashed, _occurrence, cross_batch) = self.coordinator.next_id(id);

        if let Some(memoized) = self.coordinator.memoized(&hashed) {
            self.coordinator.note_resolution();
            if let Some(error) = &memoized.error {
                return Err(FlowError::Error(deserialize_error(error)));
            }
            let data = memoized.data.unwrap_or(serde_json::Value::Null);
            return serde_json::from_value(data).map_err(|e| {
                FlowError::Error(SdkError::generic(format!(
                    "memoized output for step {id:?} does not decode: {e}"
                )))
            });
        }

        if self.coordinator.is_target(&hashed) {
            let info = StepInfo {
                id: id.to_string(),
                hashed_id: hashed.as_str().to_string(),
            };
            self.coordinator.middleware.step_run_before(&info).await;

            let output = match body().await {
                Ok(value) => match serde_json::to_value(value) {
                    Ok(data) => RunOutput::data(data),
                    Err(e) => RunOutput::error(serialize_error(&SdkError::non_retriable(
                        format!("step {id:?} returned unserializable output: {e}"),
                    ))),
                },
                Err(error) => RunOutput::error(serialize_error(&error)),
            };
            let mut output = output;
            self.coordinator
                .middleware
                .step_run_after(&info, &mut output)
                .await;

            let (descriptor, retriable) = executed_descriptor(hashed, id, output);
            self.coordinator.record_executed(descriptor, retriable);
            return Err(FlowError::interrupt());
        }

        self.coordinator.plan(
            StepDescriptor::planned(hashed, id, Op::StepPlanned),
            id,
            cross_batch,
        );
        Err(FlowError::interrupt())
    }

    /// Complete after a wall-clock duration. The Executor schedules the
    /// wakeup; the descriptor only reports intent.
    pub async fn sleep(&self, id: &str, duration: Duration) -> Result<(), FlowError> {
        self.sleep_inner(id, to_time_str(duration)).await
    }

    /// As [`sleep`](Self::sleep), but until an absolute timestamp.
    pub async fn sleep_until(
        &self,
        id: &str,
        until: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), FlowError> {
        self.sleep_inner(id, until.to_rfc3339()).await
    }

    async fn sleep_inner(&self, id: &str, time: String) -> Result<(), FlowError> {
        let (hashed, _occurrence, cross_batch) = self.coordinator.next_id(id);

        if let Some(memoized) = self.coordinator.memoized(&hashed) {
            self.coordinator.note_resolution();
            if let Some(error) = &memoized.error {
                return Err(FlowError::Error(deserialize_error(error)));
            }
            return Ok(());
        }

        let descriptor =
            StepDescriptor::planned(hashed, id, Op::Sleep).with_name(time);
        self.coordinator.plan(descriptor, id, cross_batch);
        Err(FlowError::interrupt())
    }

    /// Resolve with the matching event, or `None` once the timeout
    /// elapsed without a match.
    pub async fn wait_for_event(
        &self,
        id: &str,
        opts: WaitForEventOpts,
    ) -> Result<Option<Event>, FlowError> {
        let (hashed, _occurrence, cross_batch) = self.coordinator.next_id(id);

        if let Some(memoized) = self.coordinator.memoized(&hashed) {
            self.coordinator.note_resolution();
            if let Some(error) = &memoized.error {
                return Err(FlowError::Error(deserialize_error(error)));
            }
            return match memoized.data {
                None | Some(serde_json::Value::Null) => Ok(None),
                Some(data) => serde_json::from_value(data).map(Some).map_err(|e| {
                    FlowError::Error(SdkError::generic(format!(
                        "memoized event for step {id:?} does not decode: {e}"
                    )))
                }),
            };
        }

        let mut wire_opts = serde_json::json!({
            "event": opts.event,
            "timeout": to_time_str(opts.timeout),
        });
        if let Some(expression) = &opts.match_expression {
            wire_opts["if"] = serde_json::Value::String(expression.clone());
        }

        let descriptor = StepDescriptor::planned(hashed, id, Op::WaitForEvent)
            .with_opts(wire_opts);
        self.coordinator.plan(descriptor, id, cross_batch);
        Err(FlowError::interrupt())
    }

    /// Await another registered function's result.
    pub async fn invoke(
        &self,
        id: &str,
        opts: InvokeOpts,
    ) -> Result<serde_json::Value, FlowError> {
        let (hashed, _occurrence, cross_batch) = self.coordinator.next_id(id);

        if let Some(memoized) = self.coordinator.memoized(&hashed) {
            self.coordinator.note_resolution();
            if let Some(error) = &memoized.error {
                return Err(FlowError::Error(deserialize_error(error)));
            }
            return Ok(memoized.data.unwrap_or(serde_json::Value::Null));
        }

        let mut wire_opts = serde_json::json!({
            "function_id": opts.function_id,
            "payload": { "data": opts.data },
        });
        if let Some(timeout) = opts.timeout {
            wire_opts["timeout"] = serde_json::Value::String(to_time_str(timeout));
        }

        let descriptor = StepDescriptor::planned(hashed, id, Op::InvokeFunction)
            .with_opts(wire_opts);
        self.coordinator.plan(descriptor, id, cross_batch);
        Err(FlowError::interrupt())
    }

    /// Publish events through the configured sender; memoized like `run`.
    pub async fn send_event(
        &self,
        id: &str,
        events: Vec<Event>,
    ) -> Result<SendEventOutput, FlowError> {
        let (hashed, _occurrence, cross_batch) = self.coordinator.next_id(id);

        if let Some(memoized) = self.coordinator.memoized(&hashed) {
            self.coordinator.note_resolution();
            if let Some(error) = &memoized.error {
                return Err(FlowError::Error(deserialize_error(error)));
            }
            return match memoized.data {
                None | Some(serde_json::Value::Null) => Ok(SendEventOutput::default()),
                Some(data) => serde_json::from_value(data).map_err(|e| {
                    FlowError::Error(SdkError::generic(format!(
                        "memoized send-event output for step {id:?} does not decode: {e}"
                    )))
                }),
            };
        }

        if self.coordinator.is_target(&hashed) {
            let mut events = events;
            self.coordinator
                .middleware
                .send_event_before(&mut events)
                .await;

            let result = match &self.coordinator.sender {
                Some(sender) => sender.send(&events).await,
                None => Err(SdkError::non_retriable(
                    "no event sender configured; set an event key before using send_event",
                )),
            };

            let output = match result {
                Ok(output) => {
                    self.coordinator.middleware.send_event_after(&output).await;
                    match serde_json::to_value(&output) {
                        Ok(data) => RunOutput::data(data),
                        Err(e) => RunOutput::error(serialize_error(&SdkError::generic(
                            e.to_string(),
                        ))),
                    }
                }
                Err(error) => RunOutput::error(serialize_error(&error)),
            };

            let (descriptor, retriable) = executed_descriptor(hashed, id, output);
            self.coordinator.record_executed(descriptor, retriable);
            return Err(FlowError::interrupt());
        }

        self.coordinator.plan(
            StepDescriptor::planned(hashed, id, Op::StepPlanned),
            id,
            cross_batch,
        );
        Err(FlowError::interrupt())
    }
}

/// Build the reported descriptor for an executed step from its (possibly
/// middleware-transformed) output.
fn executed_descriptor(
    hashed: StepId,
    logical_id: &str,
    output: RunOutput,
) -> (StepDescriptor, Option<Retriability>) {
    match output.error {
        Some(error) => {
            let retriability = error.retriability();
            let op = if retriability.is_retriable() {
                Op::StepError
            } else {
                Op::StepFailed
            };
            (
                StepDescriptor::planned(hashed, logical_id, op).with_error(error),
                Some(retriability),
            )
        }
        None => (
            StepDescriptor::planned(hashed, logical_id, Op::StepRun)
                .with_data(output.data.unwrap_or(serde_json::Value::Null)),
            None,
        ),
    }
}
