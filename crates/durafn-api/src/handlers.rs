//! Request handlers for the serve route.

use crate::envelope::{self, headers, HttpOutcome};
use crate::error::ApiError;
use crate::signature;
use crate::stream;
use crate::sync::{
    detect_platform, InBandSyncRequest, InBandSyncResponse, OutOfBandSyncResult,
    RegisterRequest, SDK_LANGUAGE, SDK_VERSION,
};
use crate::{client, ServeHandler, FRAMEWORK};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use durafn_core::{serialize_error, SdkError};
use durafn_engine::{ExecutionRequest, ExecutionVersion, StepId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Durations backing the `Server-Timing` response header.
struct Timings {
    handler_started: Instant,
    action_ms: u128,
    encode_started: Instant,
}

impl Timings {
    fn start() -> Self {
        let now = Instant::now();
        Self {
            handler_started: now,
            action_ms: 0,
            encode_started: now,
        }
    }

    fn header(&self) -> String {
        format!(
            "handler;dur={}, action;dur={}, res;dur={}",
            self.handler_started.elapsed().as_millis(),
            self.action_ms,
            self.encode_started.elapsed().as_millis(),
        )
    }
}

/// POST: execute one invocation of a registered function.
pub async fn invoke(
    State(handler): State<Arc<ServeHandler>>,
    Query(query): Query<HashMap<String, String>>,
    request_headers: HeaderMap,
    body: Bytes,
) -> Response {
    if handler.config().streaming {
        let work = process_invoke(handler.clone(), query, request_headers, body);
        return stream::streamed(work);
    }
    process_invoke(handler, query, request_headers, body)
        .await
        .into_response()
}

async fn process_invoke(
    handler: Arc<ServeHandler>,
    query: HashMap<String, String>,
    request_headers: HeaderMap,
    body: Bytes,
) -> HttpOutcome {
    let mut timings = Timings::start();

    let signing_key = match handler.verify_request(&request_headers, &body) {
        Ok(key) => key,
        Err(err) => {
            return finalize(error_outcome(err), &request_headers, None, &timings);
        }
    };

    if let Some(probe) = query.get("probe") {
        debug!(probe = %probe, "dispatching probe");
        let outcome = match probe.as_str() {
            "trust" => HttpOutcome::new(StatusCode::OK, String::new()),
            other => error_outcome(ApiError::InvalidRequest(format!(
                "unknown probe {other:?}"
            ))),
        };
        return finalize(outcome, &request_headers, signing_key, &timings);
    }

    let version_override = match request_headers
        .get(headers::REQ_VERSION)
        .and_then(|v| v.to_str().ok())
    {
        Some(raw) => match ExecutionVersion::from_header(raw) {
            Ok(version) => Some(version),
            Err(err) => {
                return finalize(
                    error_outcome(err.into()),
                    &request_headers,
                    signing_key,
                    &timings,
                );
            }
        },
        None => None,
    };

    let fn_id = match query.get("fnId").filter(|id| !id.is_empty()) {
        Some(id) => id.clone(),
        None => {
            return finalize(
                error_outcome(ApiError::InvalidRequest(
                    "missing fnId query parameter".into(),
                )),
                &request_headers,
                signing_key,
                &timings,
            );
        }
    };

    let requested_step = match requested_step(&query, &request_headers) {
        Ok(step) => step,
        Err(err) => {
            return finalize(error_outcome(err), &request_headers, signing_key, &timings);
        }
    };

    let mut request = match ExecutionRequest::from_wire(&body, version_override) {
        Ok(request) => request,
        Err(err) => {
            return finalize(
                error_outcome(err.into()),
                &request_headers,
                signing_key,
                &timings,
            );
        }
    };

    // Header carriers used by sync-mode Executors.
    if request.ctx.run_id.is_empty() {
        if let Some(run_id) = request_headers
            .get(headers::RUN_ID)
            .and_then(|v| v.to_str().ok())
        {
            request.ctx.run_id = run_id.to_string();
        }
    }

    let function = match handler.registry().lookup(&fn_id) {
        Some(function) => function,
        None => {
            return finalize(
                error_outcome(ApiError::FunctionNotFound(fn_id)),
                &request_headers,
                signing_key,
                &timings,
            );
        }
    };

    info!(
        fn_id = %fn_id,
        run_id = %request.ctx.run_id,
        attempt = request.ctx.attempt,
        server_kind = request_headers
            .get(headers::SERVER_KIND)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown"),
        "executing invocation"
    );

    let action_started = Instant::now();
    let result = handler
        .engine
        .execute(&function, &request, requested_step)
        .await;
    timings.action_ms = action_started.elapsed().as_millis();

    timings.encode_started = Instant::now();
    let outcome = envelope::encode_result(&result, request.version);
    finalize(outcome, &request_headers, signing_key, &timings)
}

/// The requested run step, from the `stepId` query key or its header
/// carrier. The literal `"step"` means "no specific step".
fn requested_step(
    query: &HashMap<String, String>,
    request_headers: &HeaderMap,
) -> Result<Option<StepId>, ApiError> {
    let raw = query
        .get("stepId")
        .map(String::as_str)
        .or_else(|| {
            request_headers
                .get(headers::STEP_ID)
                .and_then(|v| v.to_str().ok())
        });

    match raw {
        None | Some("") | Some("step") => Ok(None),
        Some(raw) => StepId::parse(raw).map(Some).ok_or_else(|| {
            ApiError::InvalidRequest(format!("stepId {raw:?} is not a hashed step id"))
        }),
    }
}

fn error_outcome(err: ApiError) -> HttpOutcome {
    let body = serialize_error(&SdkError::generic(err.to_string()));
    HttpOutcome::new(
        err.status_code(),
        serde_json::to_string(&body).unwrap_or_default(),
    )
}

/// Attach the headers every POST response carries: relayed trace
/// context, timing, and the response signature.
fn finalize(
    mut outcome: HttpOutcome,
    request_headers: &HeaderMap,
    signing_key: Option<String>,
    timings: &Timings,
) -> HttpOutcome {
    for name in [headers::TRACEPARENT, headers::TRACESTATE] {
        if let Some(value) = request_headers.get(name).and_then(|v| v.to_str().ok()) {
            outcome.push_header(name, value);
        }
    }

    outcome.push_header("server-timing", timings.header());

    if let Some(key) = signing_key {
        outcome.push_header(
            headers::SIGNATURE,
            signature::sign_now(outcome.body.as_bytes(), &key),
        );
    }

    outcome
}

/// GET: introspection. Unauthenticated by default; a verified signature
/// in cloud mode unlocks the extended body.
pub async fn introspect(
    State(handler): State<Arc<ServeHandler>>,
    request_headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut authed = false;
    if handler.config().mode() == durafn_core::Mode::Cloud {
        if let (Some(key), Some(header)) = (
            handler.config().signing_key(),
            request_headers
                .get(headers::SIGNATURE)
                .and_then(|v| v.to_str().ok()),
        ) {
            authed = signature::verify(
                &body,
                key,
                handler.config().signing_key_fallback(),
                header,
            )
            .is_ok();
        }
    }

    let body = if authed {
        handler.authed_introspection()
    } else {
        handler.introspection()
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// PUT: sync function configs with the Executor, in-band when the
/// Executor asks for it and the instance allows it.
pub async fn register(
    State(handler): State<Arc<ServeHandler>>,
    Query(query): Query<HashMap<String, String>>,
    request_headers: HeaderMap,
    body: Bytes,
) -> Response {
    let serve_url = handler.serve_url(&request_headers);
    let configs = handler.registry().configs(&serve_url);

    let sync_kind = request_headers
        .get(headers::SYNC_KIND)
        .and_then(|v| v.to_str().ok());

    if sync_kind == Some(headers::SYNC_KIND_IN_BAND) && handler.config().allow_in_band_sync {
        return match in_band_sync(&handler, &request_headers, &body, serve_url, configs) {
            Ok(outcome) => outcome.into_response(),
            Err(err) => err.into_response(),
        };
    }

    info!(url = %serve_url, functions = configs.len(), "registering app out-of-band");

    let request = RegisterRequest::new(
        handler.registry().app_id(),
        serve_url,
        FRAMEWORK,
        configs,
        query.get("deployId").cloned(),
    );

    match client::register_app(
        &handler.http,
        handler.config().api_base_url(),
        &request,
        handler.config().signing_key(),
    )
    .await
    {
        Ok(reply) => (
            StatusCode::OK,
            Json(OutOfBandSyncResult {
                ok: true,
                message: reply.error,
                modified: reply.modified,
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

fn in_band_sync(
    handler: &ServeHandler,
    request_headers: &HeaderMap,
    body: &[u8],
    serve_url: String,
    configs: Vec<durafn_engine::FunctionConfig>,
) -> Result<HttpOutcome, ApiError> {
    // In-band sync trusts the response body, so it is gated on a valid
    // signature even where plain requests are not.
    let key = handler.config().signing_key().ok_or_else(|| {
        ApiError::SyncRejected("in-band sync requires a signing key".into())
    })?;
    let header = request_headers
        .get(headers::SIGNATURE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError::SignatureVerificationFailed("missing signature header".into())
        })?;
    signature::verify(body, key, handler.config().signing_key_fallback(), header)?;

    let request: InBandSyncRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::SyncRejected(format!("body does not match schema: {e}")))?;

    let response = InBandSyncResponse {
        app_id: handler.registry().app_id().to_string(),
        env: request.env,
        framework: FRAMEWORK.to_string(),
        functions: configs,
        inspection: handler.introspection(),
        url: serve_url,
        sdk_language: SDK_LANGUAGE.to_string(),
        sdk_version: SDK_VERSION.to_string(),
        capabilities: Default::default(),
        platform: detect_platform(),
    };

    let body = serde_json::to_string(&response)
        .map_err(|e| ApiError::SyncRejected(e.to_string()))?;
    let mut outcome = HttpOutcome::new(StatusCode::OK, body);
    outcome.push_header(
        headers::SIGNATURE,
        signature::sign_now(outcome.body.as_bytes(), key),
    );
    Ok(outcome)
}
