//! The comm handler: the HTTP surface between registered functions and
//! the Executor.
//!
//! A single route serves three verbs: POST executes an invocation, GET
//! serves introspection, PUT syncs function configs. Requests are
//! signature-verified in cloud mode, and every signed response is
//! signed with the key that verified its request.

pub mod client;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod signature;
pub mod stream;
pub mod sync;

pub use client::EventClient;
pub use envelope::{encode_result, headers, HttpOutcome};
pub use error::{ApiError, Result};

use axum::routing::post;
use axum::Router;
use durafn_core::{Mode, MiddlewareStack, SdkConfig};
use durafn_engine::{ExecutionEngine, FunctionRegistry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Framework identifier reported during sync and introspection.
pub const FRAMEWORK: &str = "axum";
/// Version of the introspection body shape.
pub const SCHEMA_VERSION: &str = "2024-05-24";

/// Shared state behind the serve route: configuration, the function
/// registry, and the execution engine.
pub struct ServeHandler {
    pub(crate) config: SdkConfig,
    pub(crate) registry: FunctionRegistry,
    pub(crate) engine: ExecutionEngine,
    pub(crate) http: reqwest::Client,
    dev_warned: AtomicBool,
}

impl ServeHandler {
    pub fn new(config: SdkConfig, registry: FunctionRegistry) -> Self {
        Self::with_middleware(config, registry, MiddlewareStack::new())
    }

    pub fn with_middleware(
        config: SdkConfig,
        registry: FunctionRegistry,
        middleware: MiddlewareStack,
    ) -> Self {
        let http = reqwest::Client::new();

        let mut engine = ExecutionEngine::new(middleware);
        if let Some(event_key) = config.event_key() {
            engine = engine.with_sender(Arc::new(EventClient::new(
                http.clone(),
                config.event_api_base_url.clone(),
                event_key,
            )));
        }

        Self {
            config,
            registry,
            engine,
            http,
            dev_warned: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Verify the request signature per mode. Returns the key that
    /// verified (used to sign the response), or `None` in dev mode.
    pub(crate) fn verify_request(
        &self,
        headers: &axum::http::HeaderMap,
        body: &[u8],
    ) -> Result<Option<String>> {
        match self.config.mode() {
            Mode::Dev => {
                if self.config.signing_key().is_none()
                    && !self.dev_warned.swap(true, Ordering::Relaxed)
                {
                    tracing::warn!(
                        "no signing key configured; accepting unsigned requests in dev mode"
                    );
                }
                Ok(None)
            }
            Mode::Cloud => {
                let key = self.config.signing_key().ok_or_else(|| {
                    ApiError::SignatureVerificationFailed("no signing key configured".into())
                })?;
                let header = headers
                    .get(headers::SIGNATURE)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        ApiError::SignatureVerificationFailed("missing signature header".into())
                    })?;

                let verified = signature::verify(
                    body,
                    key,
                    self.config.signing_key_fallback(),
                    header,
                )?;
                Ok(Some(verified.to_string()))
            }
        }
    }

    /// Absolute URL the serve route is reachable at, from configuration
    /// or the incoming request.
    pub(crate) fn serve_url(&self, headers: &axum::http::HeaderMap) -> String {
        let origin = match &self.config.serve_origin {
            Some(origin) => origin.trim_end_matches('/').to_string(),
            None => {
                let proto = headers
                    .get("x-forwarded-proto")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("http");
                let host = headers
                    .get(axum::http::header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("localhost");
                format!("{proto}://{host}")
            }
        };
        format!("{origin}{}", self.config.serve_path)
    }

    /// The unauthenticated introspection body.
    pub(crate) fn introspection(&self) -> serde_json::Value {
        serde_json::json!({
            "has_event_key": self.config.event_key().is_some(),
            "has_signing_key": self.config.signing_key().is_some(),
            "function_count": self.registry.config_count(),
            "mode": self.config.mode().as_str(),
            "schema_version": SCHEMA_VERSION,
        })
    }

    /// The extended body served when the request signature verified.
    pub(crate) fn authed_introspection(&self) -> serde_json::Value {
        let mut body = self.introspection();
        body["authentication_succeeded"] = true.into();
        body["app_id"] = self.registry.app_id().into();
        body["framework"] = FRAMEWORK.into();
        body["sdk_language"] = sync::SDK_LANGUAGE.into();
        body["sdk_version"] = sync::SDK_VERSION.into();
        body["api_origin"] = self.config.api_base_url().into();
        body["event_api_origin"] = self.config.event_api_base_url.clone().into();
        body["signing_key_hash"] = self
            .config
            .signing_key()
            .map(signature::hashed_signing_key)
            .into();
        body["signing_key_fallback_hash"] = self
            .config
            .signing_key_fallback()
            .map(signature::hashed_signing_key)
            .into();
        body["serve_origin"] = self.config.serve_origin.clone().into();
        body["serve_path"] = self.config.serve_path.clone().into();
        body
    }
}

impl std::fmt::Debug for ServeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServeHandler")
            .field("app_id", &self.registry.app_id())
            .field("mode", &self.config.mode())
            .field("functions", &self.registry.len())
            .finish()
    }
}

/// Build the serve router. The route is mounted at the configured serve
/// path with POST/GET/PUT handlers.
pub fn router(handler: Arc<ServeHandler>) -> Router {
    let path = handler.config.serve_path.clone();
    Router::new()
        .route(
            &path,
            post(handlers::invoke)
                .get(handlers::introspect)
                .put(handlers::register),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}
