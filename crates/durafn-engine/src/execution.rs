//! The execution engine: replays a user body against memoized step
//! state and produces exactly one result per invocation.
//!
//! Replay is deterministic and happens at most twice per invocation: a
//! discovery pass that lets every unresolved step record a planned
//! descriptor, and (when a single step should run) a targeted pass that
//! executes that step at the point of its call and stops. Replay purity
//! rests on the step-ID indexer and the memoized state alone, so both
//! passes observe identical step IDs.

use crate::function::StepFn;
use crate::hash::StepId;
use crate::op::StepDescriptor;
use crate::registry::ResolvedFunction;
use crate::state::ExecutionRequest;
use crate::tools::{ExecutedStep, FlowError, StepCoordinator, StepHandle};
use durafn_core::{
    serialize_error, Event, EventSender, MiddlewareStack, Retriability, RunOutput, SdkError,
    SerializedError,
};
use std::sync::Arc;

/// Run-scoped logger handed to user code; records carry the run ID.
#[derive(Debug, Clone)]
pub struct RunLogger {
    run_id: String,
}

impl RunLogger {
    fn new(run_id: String) -> Self {
        Self { run_id }
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(run_id = %self.run_id, "{message}");
    }

    pub fn info(&self, message: &str) {
        tracing::info!(run_id = %self.run_id, "{message}");
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(run_id = %self.run_id, "{message}");
    }

    pub fn error(&self, message: &str) {
        tracing::error!(run_id = %self.run_id, "{message}");
    }
}

/// What user code sees: the triggering event(s), run metadata, the step
/// tools, and a logger.
#[derive(Clone)]
pub struct Context {
    pub event: Event,
    pub events: Vec<Event>,
    pub run_id: String,
    pub attempt: u32,
    /// Executor-observed step completion order, for code whose outcome
    /// depends on which of several steps resolved first.
    pub completion_order: crate::state::CompletionStack,
    pub step: StepHandle,
    pub logger: RunLogger,
}

/// The single outcome of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// The user body returned; the run is done.
    FunctionResolved { data: serde_json::Value },
    /// The user body failed, fatally or transiently.
    FunctionRejected {
        error: SerializedError,
        retriable: Retriability,
    },
    /// New planned steps for the Executor to schedule.
    StepsFound { steps: Vec<StepDescriptor> },
    /// One step executed inline; includes its outcome.
    StepRan {
        step: StepDescriptor,
        retriable: Option<Retriability>,
    },
    /// The Executor asked for a step replay never re-discovered.
    StepNotFound { step: StepId },
}

enum BodyOutcome {
    Resolved(serde_json::Value),
    Rejected(SdkError),
    Interrupted,
}

struct ReplayOutcome {
    body: BodyOutcome,
    found: Vec<StepDescriptor>,
    executed: Option<ExecutedStep>,
}

/// Drives user bodies. Stateless across invocations; every call builds
/// its own coordinator and context.
pub struct ExecutionEngine {
    middleware: Arc<MiddlewareStack>,
    sender: Option<Arc<dyn EventSender>>,
}

impl ExecutionEngine {
    pub fn new(middleware: MiddlewareStack) -> Self {
        Self {
            middleware: Arc::new(middleware),
            sender: None,
        }
    }

    pub fn with_sender(mut self, sender: Arc<dyn EventSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Execute one invocation. `requested_step` is the hashed ID from
    /// the request, already stripped of the `"step"` placeholder.
    pub async fn execute(
        &self,
        function: &ResolvedFunction,
        request: &ExecutionRequest,
        requested_step: Option<StepId>,
    ) -> ExecutionResult {
        self.middleware
            .function_run_before(&request.event, &request.ctx.run_id)
            .await;

        let result = self.decide(function, request, requested_step).await;
        self.transform_output(result).await
    }

    async fn decide(
        &self,
        function: &ResolvedFunction,
        request: &ExecutionRequest,
        requested_step: Option<StepId>,
    ) -> ExecutionResult {
        let discovery = self.replay(function.handler(), request, None).await;

        match discovery.body {
            BodyOutcome::Resolved(data) => {
                return ExecutionResult::FunctionResolved { data };
            }
            BodyOutcome::Rejected(error) => {
                return ExecutionResult::FunctionRejected {
                    retriable: error.retriability(),
                    error: serialize_error(&error),
                };
            }
            BodyOutcome::Interrupted => {}
        }

        let found = discovery.found;
        if found.is_empty() {
            // An interrupt can only come from a step tool, which always
            // plans first; reaching here means non-deterministic replay.
            let error = SdkError::non_retriable(
                "function interrupted without discovering steps; \
                 replay is non-deterministic",
            );
            return ExecutionResult::FunctionRejected {
                retriable: error.retriability(),
                error: serialize_error(&error),
            };
        }

        if let Some(requested) = requested_step {
            if let Some(descriptor) = found.iter().find(|d| d.id == requested) {
                if descriptor.op.is_executable() {
                    return self.run_target(function, request, requested).await;
                }
                // The Executor fulfills this op itself; report it again.
                return ExecutionResult::StepsFound {
                    steps: vec![descriptor.clone()],
                };
            }

            if !request.steps.contains(&requested) {
                return ExecutionResult::StepNotFound { step: requested };
            }
            // Requested step already memoized; replay moved past it.
        } else if !request.ctx.disable_immediate_execution
            && found.len() == 1
            && found[0].op.is_executable()
        {
            // Saves a round trip for purely sequential workflows.
            let target = found[0].id.clone();
            return self.run_target(function, request, target).await;
        }

        ExecutionResult::StepsFound { steps: found }
    }

    async fn run_target(
        &self,
        function: &ResolvedFunction,
        request: &ExecutionRequest,
        target: StepId,
    ) -> ExecutionResult {
        let pass = self
            .replay(function.handler(), request, Some(target.clone()))
            .await;

        if let Some(executed) = pass.executed {
            return ExecutionResult::StepRan {
                step: executed.descriptor,
                retriable: executed.retriable,
            };
        }

        // The targeted pass never reached the step it was meant to run.
        match pass.body {
            BodyOutcome::Resolved(data) => ExecutionResult::FunctionResolved { data },
            BodyOutcome::Rejected(error) => ExecutionResult::FunctionRejected {
                retriable: error.retriability(),
                error: serialize_error(&error),
            },
            BodyOutcome::Interrupted => ExecutionResult::StepNotFound { step: target },
        }
    }

    async fn replay(
        &self,
        handler: &StepFn,
        request: &ExecutionRequest,
        target: Option<StepId>,
    ) -> ReplayOutcome {
        let coordinator = Arc::new(StepCoordinator::new(
            request.steps.clone(),
            target,
            self.middleware.clone(),
            self.sender.clone(),
        ));

        let ctx = Context {
            event: request.event.clone(),
            events: request.events.clone(),
            run_id: request.ctx.run_id.clone(),
            attempt: request.ctx.attempt,
            completion_order: request.ctx.stack.clone(),
            step: StepHandle::new(coordinator.clone()),
            logger: RunLogger::new(request.ctx.run_id.clone()),
        };

        let body = match handler(ctx).await {
            Ok(value) => BodyOutcome::Resolved(value),
            Err(FlowError::Error(error)) => BodyOutcome::Rejected(error),
            Err(FlowError::Interrupt(_)) => BodyOutcome::Interrupted,
        };

        let (found, executed) = coordinator.take_results();
        ReplayOutcome {
            body,
            found,
            executed,
        }
    }

    /// Run the after-function hooks, which may transform the outcome.
    async fn transform_output(&self, result: ExecutionResult) -> ExecutionResult {
        let mut output = match result {
            ExecutionResult::FunctionResolved { data } => RunOutput::data(data),
            ExecutionResult::FunctionRejected { error, .. } => RunOutput::error(error),
            other => return other,
        };

        self.middleware.function_run_after(&mut output).await;

        match output.error {
            Some(error) => ExecutionResult::FunctionRejected {
                retriable: error.retriability(),
                error,
            },
            None => ExecutionResult::FunctionResolved {
                data: output.data.unwrap_or(serde_json::Value::Null),
            },
        }
    }
}
