//! Error types for the comm handler.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use durafn_core::{serialize_error, SdkError};

/// Result type for handler operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Comm-handler errors, mapped onto the protocol's status semantics.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("signature verification failed: {0}")]
    SignatureVerificationFailed(String),

    #[error("function {0:?} is not registered")]
    FunctionNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("registration failed: {0}")]
    RegistrationFailed(String),

    #[error("in-band sync rejected: {0}")]
    SyncRejected(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::SignatureVerificationFailed(_) => StatusCode::UNAUTHORIZED,
            // Protocol contract: a missing function and a fatal parse
            // failure both surface as 500 so the Executor retries.
            ApiError::FunctionNotFound(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InvalidRequest(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::RegistrationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::SyncRejected(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serialize_error(&SdkError::generic(self.to_string()));
        (status, Json(body)).into_response()
    }
}

impl From<durafn_engine::RequestParseError> for ApiError {
    fn from(err: durafn_engine::RequestParseError) -> Self {
        ApiError::InvalidRequest(err.to_string())
    }
}

impl From<crate::signature::SignatureError> for ApiError {
    fn from(err: crate::signature::SignatureError) -> Self {
        ApiError::SignatureVerificationFailed(err.to_string())
    }
}
