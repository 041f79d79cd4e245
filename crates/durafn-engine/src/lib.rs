//! The durafn execution engine: deterministic replay of user-written
//! async functions with step memoization.
//!
//! A registered function's body runs once per Executor invocation. Step
//! tools ([`StepHandle`]) resolve memoized steps from prior state,
//! record planned descriptors for new ones, and interrupt the body when
//! it can make no further progress; the [`ExecutionEngine`] turns each
//! replay into exactly one [`ExecutionResult`].

pub mod duration;
pub mod execution;
pub mod function;
pub mod hash;
pub mod op;
pub mod registry;
pub mod state;
pub mod tools;

pub use execution::{Context, ExecutionEngine, ExecutionResult, RunLogger};
pub use function::{
    create_function, failure_handler, Cancellation, FunctionConfig, FunctionOpts,
    ServableFunction, StepFn, Trigger,
};
pub use hash::{hash_step_id, StepId, StepIdIndexer};
pub use op::{Op, StepDescriptor};
pub use registry::{FunctionRegistry, RegistryError, ResolvedFunction};
pub use state::{
    CompletionStack, ExecutionRequest, ExecutionVersion, MemoizedStep, RequestCtx,
    RequestParseError, StepState,
};
pub use tools::{
    FlowError, InvokeOpts, StepHandle, WaitForEventOpts, AUTOMATIC_PARALLEL_INDEXING,
};
