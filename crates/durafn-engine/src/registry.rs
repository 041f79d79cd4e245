//! The function registry: owns every registered function, rejects
//! duplicate IDs at startup, and produces the wire configs for sync.

use crate::function::{
    FunctionConfig, RetriesConfig, ServableFunction, StepConfig, StepFn, StepRuntime, Trigger,
};
use durafn_core::event::FUNCTION_FAILED_EVENT;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate function id {0:?}")]
    DuplicateId(String),

    #[error("function {0:?} has no trigger")]
    MissingTrigger(String),
}

/// Result of a lookup: the function plus whether the failure-handler
/// registration was addressed.
#[derive(Clone)]
pub struct ResolvedFunction {
    pub function: Arc<ServableFunction>,
    pub failure: bool,
}

impl ResolvedFunction {
    /// The handler this resolution runs.
    pub fn handler(&self) -> &StepFn {
        if self.failure {
            self.function
                .failure_handler()
                .expect("failure registration exists only with a failure handler")
        } else {
            self.function.handler()
        }
    }
}

/// Owns functions for the process lifetime. Functions hold only their
/// ID; nothing points back at the registry.
pub struct FunctionRegistry {
    app_id: String,
    functions: Vec<Arc<ServableFunction>>,
    by_slug: HashMap<String, usize>,
}

impl FunctionRegistry {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            functions: Vec::new(),
            by_slug: HashMap::new(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn register(&mut self, function: ServableFunction) -> Result<(), RegistryError> {
        if function.opts().triggers.is_empty() {
            return Err(RegistryError::MissingTrigger(function.id().to_string()));
        }

        let slug = function.slug(&self.app_id);
        if self.by_slug.contains_key(&slug) {
            return Err(RegistryError::DuplicateId(slug));
        }

        self.by_slug.insert(slug, self.functions.len());
        self.functions.push(Arc::new(function));
        Ok(())
    }

    /// Look up by the wire `fnId`. A `{slug}-failure` ID resolves to the
    /// function's failure handler.
    pub fn lookup(&self, fn_id: &str) -> Option<ResolvedFunction> {
        if let Some(&index) = self.by_slug.get(fn_id) {
            return Some(ResolvedFunction {
                function: self.functions[index].clone(),
                failure: false,
            });
        }

        let base = fn_id.strip_suffix("-failure")?;
        let &index = self.by_slug.get(base)?;
        let function = &self.functions[index];
        function.failure_handler()?;

        Some(ResolvedFunction {
            function: function.clone(),
            failure: true,
        })
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Count of wire configs, including synthesized failure registrations.
    pub fn config_count(&self) -> usize {
        self.functions
            .iter()
            .map(|f| if f.failure_handler().is_some() { 2 } else { 1 })
            .sum()
    }

    /// Build the configs published during sync. `serve_url` is the
    /// absolute URL the serve handler is reachable at.
    pub fn configs(&self, serve_url: &str) -> Vec<FunctionConfig> {
        let mut configs = Vec::with_capacity(self.config_count());

        for function in &self.functions {
            let slug = function.slug(&self.app_id);
            configs.push(self.config_for(function, &slug, None, serve_url));

            if function.failure_handler().is_some() {
                let failure_slug = format!("{slug}-failure");
                configs.push(self.config_for(function, &failure_slug, Some(&slug), serve_url));
            }
        }

        configs
    }

    fn config_for(
        &self,
        function: &ServableFunction,
        slug: &str,
        failure_of: Option<&str>,
        serve_url: &str,
    ) -> FunctionConfig {
        let opts = function.opts();

        let (name, triggers, cancel) = match failure_of {
            None => (
                opts.display_name().to_string(),
                opts.triggers.clone(),
                opts.cancel.clone(),
            ),
            Some(parent_slug) => (
                format!("{} (failure)", opts.display_name()),
                vec![Trigger::event_if(
                    FUNCTION_FAILED_EVENT,
                    format!("event.data.function_id == '{parent_slug}'"),
                )],
                Vec::new(),
            ),
        };

        let step_url = format!("{serve_url}?fnId={slug}&stepId=step");
        let mut steps = HashMap::new();
        steps.insert(
            "step".to_string(),
            StepConfig {
                id: "step".to_string(),
                name: "step".to_string(),
                runtime: StepRuntime {
                    kind: "http".to_string(),
                    url: step_url,
                },
            },
        );

        FunctionConfig {
            id: slug.to_string(),
            name,
            triggers,
            steps,
            retries: Some(RetriesConfig {
                attempts: opts.retries,
            }),
            cancel,
            concurrency: opts.concurrency.clone(),
            rate_limit: opts.rate_limit.clone(),
        }
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("app_id", &self.app_id)
            .field("functions", &self.functions.len())
            .finish()
    }
}
