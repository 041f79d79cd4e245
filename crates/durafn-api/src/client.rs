//! HTTP clients the handler drives: the event-API sender and the
//! out-of-band register call.

use crate::error::ApiError;
use crate::signature::hashed_signing_key;
use crate::sync::{RegisterReply, RegisterRequest};
use async_trait::async_trait;
use durafn_core::{Event, EventSender, SdkError, SendEventOutput};

/// Publishes events to the event API; the production [`EventSender`].
pub struct EventClient {
    http: reqwest::Client,
    base_url: String,
    event_key: String,
}

impl EventClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, event_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            event_key: event_key.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/e/{}", self.base_url.trim_end_matches('/'), self.event_key)
    }
}

#[async_trait]
impl EventSender for EventClient {
    async fn send(&self, events: &[Event]) -> Result<SendEventOutput, SdkError> {
        let response = self
            .http
            .post(self.endpoint())
            .json(events)
            .send()
            .await
            .map_err(|e| SdkError::generic(format!("event delivery failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SdkError::generic(format!(
                "event API returned {status}: {body}"
            )));
        }

        response
            .json::<SendEventOutput>()
            .await
            .map_err(|e| SdkError::generic(format!("event API reply did not decode: {e}")))
    }
}

impl std::fmt::Debug for EventClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// POST the register body to the Executor's `/fn/register`.
pub async fn register_app(
    http: &reqwest::Client,
    api_base_url: &str,
    request: &RegisterRequest,
    signing_key: Option<&str>,
) -> Result<RegisterReply, ApiError> {
    let mut url = format!("{}/fn/register", api_base_url.trim_end_matches('/'));
    if let Some(deploy_id) = &request.deploy_id {
        url = format!("{url}?deployId={deploy_id}");
    }

    let mut builder = http.post(&url).json(request);
    if let Some(key) = signing_key {
        builder = builder.bearer_auth(hashed_signing_key(key));
    }

    let response = builder
        .send()
        .await
        .map_err(|e| ApiError::RegistrationFailed(e.to_string()))?;

    let status = response.status();
    let reply: RegisterReply = response.json().await.unwrap_or_default();

    if !status.is_success() {
        return Err(ApiError::RegistrationFailed(format!(
            "executor returned {status}: {}",
            reply.error.as_deref().unwrap_or("unknown error")
        )));
    }

    Ok(reply)
}
