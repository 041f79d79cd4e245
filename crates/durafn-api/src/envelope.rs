//! Encoding of engine results into protocol responses.

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use durafn_engine::{ExecutionResult, ExecutionVersion};

/// Protocol header names.
pub mod headers {
    pub const SIGNATURE: &str = "x-inngest-signature";
    pub const SERVER_KIND: &str = "x-inngest-server-kind";
    pub const REQ_VERSION: &str = "x-inngest-req-version";
    pub const RUN_ID: &str = "x-inngest-run-id";
    pub const STEP_ID: &str = "x-inngest-step-id";
    pub const SYNC_KIND: &str = "x-inngest-sync-kind";
    pub const NO_RETRY: &str = "x-inngest-no-retry";
    pub const RETRY_AFTER: &str = "retry-after";
    pub const TRACEPARENT: &str = "traceparent";
    pub const TRACESTATE: &str = "tracestate";

    pub const SYNC_KIND_IN_BAND: &str = "in_band";
    pub const SYNC_KIND_OUT_OF_BAND: &str = "out_of_band";
}

/// A fully decided HTTP response, kept in a form that can either become
/// a plain response or the JSON trailer of a streamed one.
#[derive(Debug, Clone)]
pub struct HttpOutcome {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpOutcome {
    pub fn new(status: StatusCode, body: String) -> Self {
        Self {
            status,
            headers: vec![(
                header::CONTENT_TYPE.to_string(),
                "application/json".to_string(),
            )],
            body,
        }
    }

    pub fn json(status: StatusCode, body: &serde_json::Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn push_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// The trailer written at the end of a streamed response: enough for
    /// the Executor to reconstruct status, headers, and body.
    pub fn trailer(&self) -> String {
        let headers: serde_json::Map<String, serde_json::Value> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();

        serde_json::json!({
            "status": self.status.as_u16(),
            "headers": headers,
            "body": self.body,
        })
        .to_string()
    }

    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                name.parse::<HeaderName>(),
                HeaderValue::from_str(value),
            ) {
                response.headers_mut().append(name, value);
            }
        }
        response
    }
}

/// Encode an execution result per the protocol's status table.
pub fn encode_result(result: &ExecutionResult, version: ExecutionVersion) -> HttpOutcome {
    let mut outcome = match result {
        ExecutionResult::FunctionResolved { data } => {
            HttpOutcome::json(StatusCode::OK, data)
        }

        ExecutionResult::FunctionRejected { error, retriable } => {
            let status = if retriable.is_retriable() {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::BAD_REQUEST
            };
            let mut outcome = HttpOutcome::new(
                status,
                serde_json::to_string(error).unwrap_or_default(),
            );
            outcome.push_header(headers::NO_RETRY, retriable.no_retry_header());
            if let Some(after) = retriable.retry_after_header() {
                outcome.push_header(headers::RETRY_AFTER, after);
            }
            outcome
        }

        ExecutionResult::StepRan { step, retriable } => {
            let mut outcome = HttpOutcome::new(
                StatusCode::PARTIAL_CONTENT,
                serde_json::to_string(&vec![step]).unwrap_or_default(),
            );
            if let Some(retriable) = retriable {
                outcome.push_header(headers::NO_RETRY, retriable.no_retry_header());
                if let Some(after) = retriable.retry_after_header() {
                    outcome.push_header(headers::RETRY_AFTER, after);
                }
            }
            outcome
        }

        ExecutionResult::StepsFound { steps } => HttpOutcome::new(
            StatusCode::PARTIAL_CONTENT,
            serde_json::to_string(steps).unwrap_or_default(),
        ),

        ExecutionResult::StepNotFound { step } => {
            let mut outcome = HttpOutcome::json(
                StatusCode::INTERNAL_SERVER_ERROR,
                &serde_json::json!({
                    "error": format!("could not find step {} to run", step.as_str()),
                }),
            );
            outcome.push_header(headers::NO_RETRY, "false");
            outcome
        }
    };

    outcome.push_header(headers::REQ_VERSION, version.as_header());
    outcome
}
