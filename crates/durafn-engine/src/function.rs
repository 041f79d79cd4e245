//! Function definitions: what the user registers, and the wire-level
//! configuration published to the Executor during sync.

use crate::execution::Context;
use crate::tools::FlowError;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Retry attempts permitted per step.
pub const DEFAULT_RETRIES: u32 = 3;
pub const MAX_RETRIES: u32 = 20;

/// What causes a function to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Trigger {
    Event {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expression: Option<String>,
    },
    Cron { cron: String },
}

impl Trigger {
    pub fn event(name: impl Into<String>) -> Self {
        Self::Event {
            event: name.into(),
            expression: None,
        }
    }

    pub fn event_if(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::Event {
            event: name.into(),
            expression: Some(expression.into()),
        }
    }

    pub fn cron(schedule: impl Into<String>) -> Self {
        Self::Cron {
            cron: schedule.into(),
        }
    }
}

/// An event that cancels in-flight runs of a function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cancellation {
    pub event: String,
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub if_expression: Option<String>,
}

impl Cancellation {
    pub fn on(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            if_expression: None,
        }
    }

    pub fn on_if(event: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            if_expression: Some(expression.into()),
        }
    }
}

/// User-facing options for a registered function.
#[derive(Debug, Clone)]
pub struct FunctionOpts {
    /// Stable ID, namespaced by the app ID at registration time.
    pub id: String,
    pub name: Option<String>,
    pub triggers: Vec<Trigger>,
    /// Clamped to 0..=20.
    pub retries: u32,
    pub cancel: Vec<Cancellation>,
    pub concurrency: Option<serde_json::Value>,
    pub rate_limit: Option<serde_json::Value>,
}

impl FunctionOpts {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            triggers: Vec::new(),
            retries: DEFAULT_RETRIES,
            cancel: Vec::new(),
            concurrency: None,
            rate_limit: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.min(MAX_RETRIES);
        self
    }

    pub fn with_cancel(mut self, cancellation: Cancellation) -> Self {
        self.cancel.push(cancellation);
        self
    }

    pub fn with_concurrency(mut self, concurrency: serde_json::Value) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: serde_json::Value) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Boxed user handler. The body replays on every invocation; step tools
/// carry the memoization.
pub type StepFn =
    Arc<dyn Fn(Context) -> BoxFuture<'static, Result<serde_json::Value, FlowError>> + Send + Sync>;

/// A registered function: immutable for the process lifetime.
pub struct ServableFunction {
    opts: FunctionOpts,
    handler: StepFn,
    on_failure: Option<StepFn>,
}

impl ServableFunction {
    pub fn new(opts: FunctionOpts, handler: StepFn) -> Self {
        Self {
            opts,
            handler,
            on_failure: None,
        }
    }

    pub fn with_failure_handler(mut self, handler: StepFn) -> Self {
        self.on_failure = Some(handler);
        self
    }

    pub fn opts(&self) -> &FunctionOpts {
        &self.opts
    }

    pub fn id(&self) -> &str {
        &self.opts.id
    }

    /// The fully qualified ID used on the wire.
    pub fn slug(&self, app_id: &str) -> String {
        format!("{app_id}-{}", self.opts.id)
    }

    pub fn handler(&self) -> &StepFn {
        &self.handler
    }

    pub fn failure_handler(&self) -> Option<&StepFn> {
        self.on_failure.as_ref()
    }
}

impl std::fmt::Debug for ServableFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServableFunction")
            .field("id", &self.opts.id)
            .field("triggers", &self.opts.triggers)
            .field("has_failure_handler", &self.on_failure.is_some())
            .finish()
    }
}

/// Build a function from an async closure.
pub fn create_function<F, Fut>(opts: FunctionOpts, f: F) -> ServableFunction
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, FlowError>> + Send + 'static,
{
    ServableFunction::new(opts, Arc::new(move |ctx| Box::pin(f(ctx))))
}

/// Wrap an async closure as a failure handler for [`ServableFunction`].
pub fn failure_handler<F, Fut>(f: F) -> StepFn
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, FlowError>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Wire configuration for one function, published during sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub id: String,
    pub name: String,
    pub triggers: Vec<Trigger>,
    pub steps: HashMap<String, StepConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<RetriesConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cancel: Vec<Cancellation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<serde_json::Value>,
    #[serde(
        rename = "rateLimit",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub rate_limit: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub id: String,
    pub name: String,
    pub runtime: StepRuntime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRuntime {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetriesConfig {
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_trigger_wire_shapes() {
        let event = Trigger::event_if("shop/order.created", "event.data.total > 0");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "shop/order.created", "expression": "event.data.total > 0"})
        );

        let cron = Trigger::cron("0 * * * *");
        assert_eq!(serde_json::to_value(&cron).unwrap(), json!({"cron": "0 * * * *"}));
    }

    #[test]
    fn test_cancellation_wire_shape() {
        let cancel = Cancellation::on_if("shop/order.cancelled", "async.data.id == event.data.id");
        let wire = serde_json::to_value(&cancel).unwrap();
        assert_eq!(wire["if"], json!("async.data.id == event.data.id"));
    }

    #[test]
    fn test_retries_clamped() {
        assert_eq!(FunctionOpts::new("f").with_retries(50).retries, MAX_RETRIES);
        assert_eq!(FunctionOpts::new("f").with_retries(0).retries, 0);
        assert_eq!(FunctionOpts::new("f").retries, DEFAULT_RETRIES);
    }

    #[test]
    fn test_slug_is_namespaced() {
        let f = create_function(FunctionOpts::new("import-users"), |_ctx| async move {
            Ok(serde_json::Value::Null)
        });
        assert_eq!(f.slug("my-app"), "my-app-import-users");
    }
}
