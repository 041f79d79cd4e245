//! Error taxonomy and the JSON-safe error serialization used on the wire.
//!
//! Every failure falls into one of three kinds: terminal
//! ([`SdkError::NonRetriable`]), transient with an explicit delay
//! ([`SdkError::RetryAfter`]), or plain transient (everything else).
//! Errors cross the wire as [`SerializedError`], which carries a sentinel
//! marker so a payload can be recognized and reversibly deserialized.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recognized by name so the classification survives crossing crate and
/// process boundaries.
pub const NON_RETRIABLE_ERROR_NAME: &str = "NonRetriableError";
pub const RETRY_AFTER_ERROR_NAME: &str = "RetryAfterError";
const GENERIC_ERROR_NAME: &str = "Error";

/// Maximum `cause` chain depth preserved during serialization.
const MAX_CAUSE_DEPTH: usize = 5;

/// Failures produced by user handlers and the SDK itself.
#[derive(Debug, Error)]
pub enum SdkError {
    /// Terminal for this step or run; the Executor stops retrying.
    #[error("{message}")]
    NonRetriable {
        message: String,
        cause: Option<Box<SdkError>>,
    },

    /// Transient, with an explicit delay before the next attempt.
    #[error("{message}")]
    RetryAfter {
        message: String,
        /// Seconds, as rendered into the `Retry-After` header.
        after: String,
    },

    /// The default kind: retried up to the configured attempt count.
    #[error("{message}")]
    Generic { message: String },
}

impl SdkError {
    pub fn non_retriable(message: impl Into<String>) -> Self {
        Self::NonRetriable {
            message: message.into(),
            cause: None,
        }
    }

    pub fn non_retriable_with_cause(message: impl Into<String>, cause: SdkError) -> Self {
        Self::NonRetriable {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn retry_after(message: impl Into<String>, after_seconds: u64) -> Self {
        Self::RetryAfter {
            message: message.into(),
            after: after_seconds.to_string(),
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Wraps a thrown value that is not an error, e.g. a bare string or a
    /// plain object. The message is the compact JSON rendering.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let message = match value {
            serde_json::Value::String(s) => s.clone(),
            other => serde_json::to_string(other).unwrap_or_else(|_| "{}".to_string()),
        };
        Self::Generic { message }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SdkError::NonRetriable { .. } => NON_RETRIABLE_ERROR_NAME,
            SdkError::RetryAfter { .. } => RETRY_AFTER_ERROR_NAME,
            SdkError::Generic { .. } => GENERIC_ERROR_NAME,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SdkError::NonRetriable { message, .. }
            | SdkError::RetryAfter { message, .. }
            | SdkError::Generic { message } => message,
        }
    }

    pub fn retriability(&self) -> Retriability {
        match self {
            SdkError::NonRetriable { .. } => Retriability::NonRetriable,
            SdkError::RetryAfter { after, .. } => Retriability::After(after.clone()),
            SdkError::Generic { .. } => Retriability::Retriable,
        }
    }
}

impl From<anyhow::Error> for SdkError {
    fn from(err: anyhow::Error) -> Self {
        Self::Generic {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Generic {
            message: err.to_string(),
        }
    }
}

/// How a failure should drive Executor retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retriability {
    Retriable,
    NonRetriable,
    /// Retriable after the given number of seconds.
    After(String),
}

impl Retriability {
    /// Value for the `X-Inngest-No-Retry` response header.
    pub fn no_retry_header(&self) -> &'static str {
        match self {
            Retriability::NonRetriable => "true",
            _ => "false",
        }
    }

    /// Value for the `Retry-After` response header, when any.
    pub fn retry_after_header(&self) -> Option<&str> {
        match self {
            Retriability::After(seconds) => Some(seconds),
            _ => None,
        }
    }

    pub fn is_retriable(&self) -> bool {
        !matches!(self, Retriability::NonRetriable)
    }
}

/// The wire form of an error. The `__serialized` marker distinguishes a
/// serialized error from arbitrary user data shaped like one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedError {
    pub name: String,
    pub message: String,
    #[serde(default)]
    pub stack: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<SerializedError>>,
    #[serde(
        rename = "retryAfter",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub retry_after: Option<String>,
    #[serde(rename = "__serialized", default)]
    pub serialized: bool,
}

impl SerializedError {
    /// True when a JSON value carries the serialization marker.
    pub fn is_serialized(value: &serde_json::Value) -> bool {
        value
            .get("__serialized")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    pub fn retriability(&self) -> Retriability {
        if self.name == NON_RETRIABLE_ERROR_NAME {
            Retriability::NonRetriable
        } else if self.name == RETRY_AFTER_ERROR_NAME {
            match &self.retry_after {
                Some(after) => Retriability::After(after.clone()),
                None => Retriability::Retriable,
            }
        } else {
            Retriability::Retriable
        }
    }
}

/// Serialize an error for the wire, preserving the `cause` chain up to
/// [`MAX_CAUSE_DEPTH`] links.
pub fn serialize_error(err: &SdkError) -> SerializedError {
    serialize_at_depth(err, 0)
}

fn serialize_at_depth(err: &SdkError, depth: usize) -> SerializedError {
    let name = err.name().to_string();
    let message = err.message().to_string();
    let cause = match err {
        SdkError::NonRetriable {
            cause: Some(inner), ..
        } if depth < MAX_CAUSE_DEPTH => Some(Box::new(serialize_at_depth(inner, depth + 1))),
        _ => None,
    };
    let retry_after = match err {
        SdkError::RetryAfter { after, .. } => Some(after.clone()),
        _ => None,
    };

    SerializedError {
        stack: format!("{name}: {message}"),
        name,
        message,
        cause,
        retry_after,
        serialized: true,
    }
}

/// Reconstruct an [`SdkError`] from its wire form. Classification is by
/// name so errors survive cross-module duplication of the error types.
pub fn deserialize_error(err: &SerializedError) -> SdkError {
    match err.name.as_str() {
        NON_RETRIABLE_ERROR_NAME => SdkError::NonRetriable {
            message: err.message.clone(),
            cause: err.cause.as_deref().map(|c| Box::new(deserialize_error(c))),
        },
        RETRY_AFTER_ERROR_NAME => SdkError::RetryAfter {
            message: err.message.clone(),
            after: err.retry_after.clone().unwrap_or_else(|| "0".to_string()),
        },
        _ => SdkError::Generic {
            message: err.message.clone(),
        },
    }
}
