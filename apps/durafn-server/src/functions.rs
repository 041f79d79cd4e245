//! Demo functions exercising the step tools.

use durafn_core::Event;
use durafn_engine::{
    create_function, failure_handler, Cancellation, FunctionOpts, FunctionRegistry,
    RegistryError, ServableFunction, Trigger, WaitForEventOpts,
};
use serde_json::{json, Value};
use std::time::Duration;

/// Register the demo functions.
pub fn build_registry(app_id: &str) -> Result<FunctionRegistry, RegistryError> {
    let mut registry = FunctionRegistry::new(app_id);
    registry.register(process_order())?;
    registry.register(weekly_digest())?;
    registry.register(onboard_user())?;
    Ok(registry)
}

/// Sequential steps with a failure handler: charge, then ship, then
/// notify.
fn process_order() -> ServableFunction {
    create_function(
        FunctionOpts::new("process-order")
            .with_name("Process order")
            .with_trigger(Trigger::event("shop/order.created"))
            .with_cancel(Cancellation::on_if(
                "shop/order.cancelled",
                "async.data.order_id == event.data.order_id",
            ))
            .with_retries(4),
        |ctx| async move {
            let order_id = ctx.event.data["order_id"].clone();

            let charge: Value = ctx
                .step
                .run("charge", || async {
                    Ok(json!({ "charged": true, "order_id": order_id }))
                })
                .await?;

            let _shipment: Value = ctx
                .step
                .run("ship", || async { Ok(json!({ "carrier": "rail" })) })
                .await?;

            ctx.step
                .send_event(
                    "notify",
                    vec![Event::new("shop/order.shipped", charge.clone())],
                )
                .await?;

            Ok(json!({ "status": "shipped" }))
        },
    )
    .with_failure_handler(failure_handler(|ctx| async move {
        ctx.logger.error("order processing exhausted its retries");
        Ok(Value::Null)
    }))
}

/// Cron-triggered function with a sleep between steps.
fn weekly_digest() -> ServableFunction {
    create_function(
        FunctionOpts::new("weekly-digest")
            .with_name("Weekly digest")
            .with_trigger(Trigger::cron("0 9 * * 1")),
        |ctx| async move {
            let drafted: Value = ctx
                .step
                .run("draft", || async { Ok(json!({ "sections": 3 })) })
                .await?;

            // Let late stories land before sending.
            ctx.step.sleep("hold", Duration::from_secs(30 * 60)).await?;

            let _sent: Value = ctx
                .step
                .run("send", || async { Ok(drafted) })
                .await?;

            Ok(Value::Null)
        },
    )
}

/// Waits for a verification event, giving up after a day.
fn onboard_user() -> ServableFunction {
    create_function(
        FunctionOpts::new("onboard-user")
            .with_name("Onboard user")
            .with_trigger(Trigger::event("auth/user.created")),
        |ctx| async move {
            let verified = ctx
                .step
                .wait_for_event(
                    "verified",
                    WaitForEventOpts::new(
                        "auth/user.verified",
                        Duration::from_secs(24 * 60 * 60),
                    )
                    .with_match("async.data.user_id == event.data.user_id"),
                )
                .await?;

            match verified {
                Some(_) => {
                    let _welcome: Value = ctx
                        .step
                        .run("welcome", || async { Ok(json!({ "sent": true })) })
                        .await?;
                    Ok(json!({ "onboarded": true }))
                }
                None => Ok(json!({ "onboarded": false, "reason": "verification timed out" })),
            }
        },
    )
}
