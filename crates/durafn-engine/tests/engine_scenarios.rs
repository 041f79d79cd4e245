//! End-to-end engine scenarios: multi-invocation runs driven the way
//! the Executor drives them, with memoized state fed back in.

use async_trait::async_trait;
use durafn_core::{Event, Middleware, MiddlewareStack, Retriability, SdkError};
use durafn_engine::{
    create_function, hash_step_id, ExecutionEngine, ExecutionRequest, ExecutionResult,
    ExecutionVersion, FlowError, FunctionOpts, MemoizedStep, Op, RequestCtx, ResolvedFunction,
    ServableFunction, StepId, StepState, Trigger, AUTOMATIC_PARALLEL_INDEXING,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

fn request(steps: Vec<(StepId, MemoizedStep)>, disable_immediate: bool) -> ExecutionRequest {
    let mut state = StepState::new();
    for (id, step) in steps {
        state.insert(id, step);
    }
    ExecutionRequest {
        event: Event::new("t/run", json!({})),
        events: vec![Event::new("t/run", json!({}))],
        steps: state,
        ctx: RequestCtx {
            run_id: "run-1".to_string(),
            disable_immediate_execution: disable_immediate,
            ..Default::default()
        },
        version: ExecutionVersion::LATEST,
    }
}

fn servable(function: ServableFunction) -> ResolvedFunction {
    ResolvedFunction {
        function: Arc::new(function),
        failure: false,
    }
}

fn engine() -> ExecutionEngine {
    ExecutionEngine::new(MiddlewareStack::new())
}

fn opts() -> FunctionOpts {
    FunctionOpts::new("f").with_trigger(Trigger::event("t/run"))
}

/// Collects engine warnings for assertions.
#[derive(Default)]
struct WarningRecorder {
    codes: Mutex<Vec<String>>,
}

#[async_trait]
impl Middleware for WarningRecorder {
    fn on_warning(&self, code: &str, _message: &str) {
        self.codes.lock().unwrap().push(code.to_string());
    }
}

fn sequential_a_then_b() -> ResolvedFunction {
    servable(create_function(opts(), |ctx| async move {
        let _a: Value = ctx.step.run("A", || async { Ok(json!("A")) }).await?;
        let _b: Value = ctx.step.run("B", || async { Ok(json!("B")) }).await?;
        Ok(Value::Null)
    }))
}

#[tokio::test]
async fn simple_a_then_b_runs_over_three_invocations() {
    let function = sequential_a_then_b();
    let engine = engine();

    // Invocation 1: empty state, A executes inline.
    let result = engine.execute(&function, &request(vec![], false), None).await;
    match result {
        ExecutionResult::StepRan { step, retriable } => {
            assert_eq!(step.id, hash_step_id("A"));
            assert_eq!(step.op, Op::StepRun);
            assert_eq!(step.data, Some(json!("A")));
            assert_eq!(retriable, None);
        }
        other => panic!("expected StepRan, got {other:?}"),
    }

    // Invocation 2: A memoized, B executes inline.
    let result = engine
        .execute(
            &function,
            &request(vec![(hash_step_id("A"), MemoizedStep::data(json!("A")))], false),
            None,
        )
        .await;
    match result {
        ExecutionResult::StepRan { step, .. } => {
            assert_eq!(step.id, hash_step_id("B"));
            assert_eq!(step.data, Some(json!("B")));
        }
        other => panic!("expected StepRan, got {other:?}"),
    }

    // Invocation 3: both memoized, the body runs to completion.
    let result = engine
        .execute(
            &function,
            &request(
                vec![
                    (hash_step_id("A"), MemoizedStep::data(json!("A"))),
                    (hash_step_id("B"), MemoizedStep::data(json!("B"))),
                ],
                false,
            ),
            None,
        )
        .await;
    assert_eq!(result, ExecutionResult::FunctionResolved { data: Value::Null });
}

fn parallel_ab_then_c() -> ResolvedFunction {
    servable(create_function(opts(), |ctx| async move {
        let (a, b) = tokio::join!(
            ctx.step.run::<Value, _, _>("A", || async { Ok(json!("A")) }),
            ctx.step.run::<Value, _, _>("B", || async { Ok(json!("B")) }),
        );
        let _a = a?;
        let _b = b?;
        let _c: Value = ctx.step.run("C", || async { Ok(json!("C")) }).await?;
        Ok(Value::Null)
    }))
}

#[tokio::test]
async fn parallel_discovery_reports_both_steps() {
    let function = parallel_ab_then_c();
    let engine = engine();

    // Parallel mode: both planned steps come back in call order.
    let result = engine.execute(&function, &request(vec![], true), None).await;
    match result {
        ExecutionResult::StepsFound { steps } => {
            assert_eq!(steps.len(), 2);
            assert_eq!(steps[0].id, hash_step_id("A"));
            assert_eq!(steps[1].id, hash_step_id("B"));
            assert!(steps.iter().all(|s| s.op == Op::StepPlanned));
        }
        other => panic!("expected StepsFound, got {other:?}"),
    }

    // The Executor delegates A specifically.
    let result = engine
        .execute(&function, &request(vec![], true), Some(hash_step_id("A")))
        .await;
    match result {
        ExecutionResult::StepRan { step, .. } => {
            assert_eq!(step.id, hash_step_id("A"));
            assert_eq!(step.data, Some(json!("A")));
        }
        other => panic!("expected StepRan, got {other:?}"),
    }

    // With A and B memoized, only C remains.
    let result = engine
        .execute(
            &function,
            &request(
                vec![
                    (hash_step_id("A"), MemoizedStep::data(json!("A"))),
                    (hash_step_id("B"), MemoizedStep::data(json!("B"))),
                ],
                true,
            ),
            None,
        )
        .await;
    match result {
        ExecutionResult::StepsFound { steps } => {
            assert_eq!(steps.len(), 1);
            assert_eq!(steps[0].id, hash_step_id("C"));
        }
        other => panic!("expected StepsFound, got {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_ids_are_indexed_deterministically() {
    let function = servable(create_function(opts(), |ctx| async move {
        let _one: Value = ctx.step.run("A", || async { Ok(json!("A")) }).await?;
        let _two: Value = ctx.step.run("A", || async { Ok(json!("B")) }).await?;
        let _three: Value = ctx.step.run("A", || async { Ok(json!("C")) }).await?;
        Ok(Value::Null)
    }));
    let engine = engine();

    // Invocation 2: the first occurrence is memoized, the second hashes
    // with the ":1" suffix.
    let result = engine
        .execute(
            &function,
            &request(vec![(hash_step_id("A"), MemoizedStep::data(json!("A")))], false),
            None,
        )
        .await;
    match result {
        ExecutionResult::StepRan { step, .. } => {
            assert_eq!(step.id, hash_step_id("A:1"));
            assert_eq!(step.name, "A");
            assert_eq!(step.data, Some(json!("B")));
        }
        other => panic!("expected StepRan, got {other:?}"),
    }

    // Invocation 3: the third occurrence hashes with ":2".
    let result = engine
        .execute(
            &function,
            &request(
                vec![
                    (hash_step_id("A"), MemoizedStep::data(json!("A"))),
                    (hash_step_id("A:1"), MemoizedStep::data(json!("B"))),
                ],
                false,
            ),
            None,
        )
        .await;
    match result {
        ExecutionResult::StepRan { step, .. } => {
            assert_eq!(step.id, hash_step_id("A:2"));
            assert_eq!(step.data, Some(json!("C")));
        }
        other => panic!("expected StepRan, got {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_ids_across_batches_warn() {
    let recorder = Arc::new(WarningRecorder::default());
    let stack = MiddlewareStack::new().with(recorder.clone());
    let engine = ExecutionEngine::new(stack);

    let function = servable(create_function(opts(), |ctx| async move {
        let _one: Value = ctx.step.run("A", || async { Ok(json!("A")) }).await?;
        let _two: Value = ctx.step.run("A", || async { Ok(json!("B")) }).await?;
        Ok(Value::Null)
    }));

    let result = engine
        .execute(
            &function,
            &request(vec![(hash_step_id("A"), MemoizedStep::data(json!("A")))], false),
            None,
        )
        .await;
    assert!(matches!(result, ExecutionResult::StepRan { .. }));

    let codes = recorder.codes.lock().unwrap().clone();
    assert!(codes.contains(&AUTOMATIC_PARALLEL_INDEXING.to_string()));
}

#[tokio::test]
async fn duplicate_ids_in_one_batch_do_not_warn() {
    let recorder = Arc::new(WarningRecorder::default());
    let stack = MiddlewareStack::new().with(recorder.clone());
    let engine = ExecutionEngine::new(stack);

    let function = servable(create_function(opts(), |ctx| async move {
        let (one, two) = tokio::join!(
            ctx.step.run::<Value, _, _>("A", || async { Ok(json!("one")) }),
            ctx.step.run::<Value, _, _>("A", || async { Ok(json!("two")) }),
        );
        let _one = one?;
        let _two = two?;
        Ok(Value::Null)
    }));

    let result = engine.execute(&function, &request(vec![], true), None).await;
    match result {
        ExecutionResult::StepsFound { steps } => {
            assert_eq!(steps[0].id, hash_step_id("A"));
            assert_eq!(steps[1].id, hash_step_id("A:1"));
        }
        other => panic!("expected StepsFound, got {other:?}"),
    }

    assert!(recorder.codes.lock().unwrap().is_empty());
}

fn erroring_b_with_recovery() -> ResolvedFunction {
    servable(create_function(opts(), |ctx| async move {
        let (a, b) = tokio::join!(
            ctx.step.run::<Value, _, _>("A", || async { Ok(json!("A")) }),
            async {
                match ctx
                    .step
                    .run::<Value, _, _>("B", || async {
                        Err(SdkError::generic("B failed message"))
                    })
                    .await
                {
                    Ok(value) => Ok(value),
                    Err(FlowError::Error(_)) => {
                        ctx.step
                            .run::<Value, _, _>("B failed", || async { Ok(json!("handled")) })
                            .await
                    }
                    Err(interrupt) => Err(interrupt),
                }
            },
        );
        let _a = a?;
        let _b = b?;
        Ok(Value::Null)
    }))
}

#[tokio::test]
async fn step_error_is_reported_then_recovered() {
    let function = erroring_b_with_recovery();
    let engine = engine();

    // The Executor delegates B; its body throws a retriable error.
    let result = engine
        .execute(&function, &request(vec![], true), Some(hash_step_id("B")))
        .await;
    match result {
        ExecutionResult::StepRan { step, retriable } => {
            assert_eq!(step.id, hash_step_id("B"));
            assert_eq!(step.op, Op::StepError);
            assert_eq!(retriable, Some(Retriability::Retriable));
            assert_eq!(step.error.as_ref().unwrap().message, "B failed message");
        }
        other => panic!("expected StepRan, got {other:?}"),
    }

    // Once B's error is memoized, the user's recovery branch plans the
    // fallback step.
    let error = durafn_core::serialize_error(&SdkError::generic("B failed message"));
    let result = engine
        .execute(
            &function,
            &request(
                vec![
                    (hash_step_id("A"), MemoizedStep::data(json!("A"))),
                    (hash_step_id("B"), MemoizedStep::error(error)),
                ],
                true,
            ),
            None,
        )
        .await;
    match result {
        ExecutionResult::StepsFound { steps } => {
            assert_eq!(steps.len(), 1);
            assert_eq!(steps[0].id, hash_step_id("B failed"));
        }
        other => panic!("expected StepsFound, got {other:?}"),
    }
}

#[tokio::test]
async fn non_retriable_inside_step_is_step_failed() {
    let function = servable(create_function(opts(), |ctx| async move {
        let _a: Value = ctx
            .step
            .run("A", || async { Err(SdkError::non_retriable("x")) })
            .await?;
        Ok(Value::Null)
    }));

    let result = engine().execute(&function, &request(vec![], false), None).await;
    match result {
        ExecutionResult::StepRan { step, retriable } => {
            assert_eq!(step.op, Op::StepFailed);
            assert_eq!(retriable, Some(Retriability::NonRetriable));
            assert_eq!(step.error.as_ref().unwrap().name, "NonRetriableError");
        }
        other => panic!("expected StepRan, got {other:?}"),
    }
}

#[tokio::test]
async fn retry_after_inside_step_carries_delay() {
    let function = servable(create_function(opts(), |ctx| async move {
        let _a: Value = ctx
            .step
            .run("A", || async { Err(SdkError::retry_after("busy", 30)) })
            .await?;
        Ok(Value::Null)
    }));

    let result = engine().execute(&function, &request(vec![], false), None).await;
    match result {
        ExecutionResult::StepRan { step, retriable } => {
            assert_eq!(step.op, Op::StepError);
            assert_eq!(retriable, Some(Retriability::After("30".to_string())));
        }
        other => panic!("expected StepRan, got {other:?}"),
    }
}

#[tokio::test]
async fn non_retriable_in_body_rejects_the_function() {
    let function = servable(create_function(opts(), |_ctx| async move {
        Err::<Value, _>(SdkError::non_retriable("Error message").into())
    }));

    let result = engine().execute(&function, &request(vec![], false), None).await;
    match result {
        ExecutionResult::FunctionRejected { error, retriable } => {
            assert_eq!(error.name, "NonRetriableError");
            assert_eq!(error.message, "Error message");
            assert_eq!(retriable, Retriability::NonRetriable);
        }
        other => panic!("expected FunctionRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn non_error_throws_are_wrapped_retriable() {
    // Analogue of `throw "foo"`.
    let function = servable(create_function(opts(), |_ctx| async move {
        Err::<Value, _>(SdkError::from_value(&json!("foo")).into())
    }));
    let result = engine().execute(&function, &request(vec![], false), None).await;
    match result {
        ExecutionResult::FunctionRejected { error, retriable } => {
            assert_eq!(error.message, "foo");
            assert_eq!(retriable, Retriability::Retriable);
        }
        other => panic!("expected FunctionRejected, got {other:?}"),
    }

    // Analogue of `throw {}`.
    let function = servable(create_function(opts(), |_ctx| async move {
        Err::<Value, _>(SdkError::from_value(&json!({})).into())
    }));
    let result = engine().execute(&function, &request(vec![], false), None).await;
    match result {
        ExecutionResult::FunctionRejected { error, .. } => {
            assert_eq!(error.message, "{}");
        }
        other => panic!("expected FunctionRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn race_losers_are_re_reported_until_memoized() {
    // A race between A and B where user code continues with whichever
    // settled; B has already completed, A must keep being re-planned.
    let function = servable(create_function(opts(), |ctx| async move {
        let (a, b) = tokio::join!(
            ctx.step.run::<Value, _, _>("A", || async { Ok(json!("A")) }),
            ctx.step.run::<Value, _, _>("B", || async { Ok(json!("B")) }),
        );
        let winner = match (a, b) {
            (Ok(value), _) => ("A", value),
            (_, Ok(value)) => ("B", value),
            (Err(err), Err(_)) => return Err(err),
        };
        let _next: Value = ctx
            .step
            .run(&format!("{} wins", winner.0), || async { Ok(json!("done")) })
            .await?;
        Ok(Value::Null)
    }));

    let result = engine()
        .execute(
            &function,
            &request(vec![(hash_step_id("B"), MemoizedStep::data(json!("B")))], true),
            None,
        )
        .await;

    match result {
        ExecutionResult::StepsFound { steps } => {
            let ids: Vec<_> = steps.iter().map(|s| s.id.clone()).collect();
            assert_eq!(ids, vec![hash_step_id("A"), hash_step_id("B wins")]);
        }
        other => panic!("expected StepsFound, got {other:?}"),
    }
}

#[tokio::test]
async fn sleep_reports_a_time_string() {
    let function = servable(create_function(opts(), |ctx| async move {
        ctx.step
            .sleep("pause", std::time::Duration::from_secs(5400))
            .await?;
        Ok(Value::Null)
    }));

    let result = engine().execute(&function, &request(vec![], false), None).await;
    match result {
        ExecutionResult::StepsFound { steps } => {
            assert_eq!(steps.len(), 1);
            assert_eq!(steps[0].op, Op::Sleep);
            assert_eq!(steps[0].name, "1h30m");
            assert_eq!(steps[0].display_name, "pause");
        }
        other => panic!("expected StepsFound, got {other:?}"),
    }

    // Once memoized, the sleep resolves and the body completes.
    let result = engine()
        .execute(
            &function,
            &request(
                vec![(hash_step_id("pause"), MemoizedStep::data(Value::Null))],
                false,
            ),
            None,
        )
        .await;
    assert_eq!(result, ExecutionResult::FunctionResolved { data: Value::Null });
}

#[tokio::test]
async fn wait_for_event_times_out_to_none() {
    let function = servable(create_function(opts(), |ctx| async move {
        let approval = ctx
            .step
            .wait_for_event(
                "approval",
                durafn_engine::WaitForEventOpts::new(
                    "shop/order.approved",
                    std::time::Duration::from_secs(3600),
                ),
            )
            .await?;
        Ok(json!({ "approved": approval.is_some() }))
    }));

    // Planned with its options on first discovery.
    let result = engine().execute(&function, &request(vec![], false), None).await;
    match result {
        ExecutionResult::StepsFound { steps } => {
            assert_eq!(steps[0].op, Op::WaitForEvent);
            let opts = steps[0].opts.as_ref().unwrap();
            assert_eq!(opts["event"], json!("shop/order.approved"));
            assert_eq!(opts["timeout"], json!("1h"));
        }
        other => panic!("expected StepsFound, got {other:?}"),
    }

    // A null outcome means the timeout elapsed.
    let result = engine()
        .execute(
            &function,
            &request(
                vec![(hash_step_id("approval"), MemoizedStep::data(Value::Null))],
                false,
            ),
            None,
        )
        .await;
    assert_eq!(
        result,
        ExecutionResult::FunctionResolved {
            data: json!({ "approved": false })
        }
    );
}

#[tokio::test]
async fn send_event_delivers_through_the_sender() {
    let sender = Arc::new(durafn_core::MemorySender::new());
    let engine = ExecutionEngine::new(MiddlewareStack::new()).with_sender(sender.clone());

    let function = servable(create_function(opts(), |ctx| async move {
        let output = ctx
            .step
            .send_event("notify", vec![Event::new("shop/order.shipped", json!({}))])
            .await?;
        Ok(json!({ "sent": output.ids.len() }))
    }));

    let result = engine.execute(&function, &request(vec![], false), None).await;
    match result {
        ExecutionResult::StepRan { step, .. } => {
            assert_eq!(step.op, Op::StepRun);
            assert_eq!(sender.sent().len(), 1);
            assert_eq!(sender.sent()[0].name, "shop/order.shipped");
        }
        other => panic!("expected StepRan, got {other:?}"),
    }
}

#[tokio::test]
async fn invoke_plans_a_function_invocation() {
    let function = servable(create_function(opts(), |ctx| async move {
        let result = ctx
            .step
            .invoke(
                "child",
                durafn_engine::InvokeOpts::new("app-child", json!({"n": 1})),
            )
            .await?;
        Ok(result)
    }));

    let result = engine().execute(&function, &request(vec![], false), None).await;
    match result {
        ExecutionResult::StepsFound { steps } => {
            assert_eq!(steps[0].op, Op::InvokeFunction);
            let opts = steps[0].opts.as_ref().unwrap();
            assert_eq!(opts["function_id"], json!("app-child"));
            assert_eq!(opts["payload"]["data"], json!({"n": 1}));
        }
        other => panic!("expected StepsFound, got {other:?}"),
    }

    // The Executor fulfills the invocation and memoizes its output.
    let result = engine()
        .execute(
            &function,
            &request(
                vec![(hash_step_id("child"), MemoizedStep::data(json!({"ok": true})))],
                false,
            ),
            None,
        )
        .await;
    assert_eq!(
        result,
        ExecutionResult::FunctionResolved {
            data: json!({"ok": true})
        }
    );
}
