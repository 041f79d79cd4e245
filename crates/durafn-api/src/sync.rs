//! Sync (registration) wire bodies: the out-of-band register request
//! POSTed to the Executor and the synchronous in-band exchange.

use durafn_engine::FunctionConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

pub const SDK_LANGUAGE: &str = "rust";
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The `sdk` self-identification string, e.g. `rust:v0.1.0`.
pub fn sdk_identifier() -> String {
    format!("{SDK_LANGUAGE}:v{SDK_VERSION}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub trust_probe: String,
    pub connect: String,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            trust_probe: "v1".to_string(),
            connect: "v1".to_string(),
        }
    }
}

/// Out-of-band register body, POSTed to `<api-base>/fn/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub url: String,
    pub app_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    pub framework: String,
    pub sdk: String,
    pub v: String,
    pub deploy_type: String,
    pub functions: Vec<FunctionConfig>,
    pub capabilities: Capabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_id: Option<String>,
    /// Hash of the app's self-identification, detects config drift.
    pub hash: String,
}

impl RegisterRequest {
    pub fn new(
        app_name: impl Into<String>,
        url: impl Into<String>,
        framework: impl Into<String>,
        functions: Vec<FunctionConfig>,
        deploy_id: Option<String>,
    ) -> Self {
        let app_name = app_name.into();
        let url = url.into();
        let hash = self_identification_hash(&app_name, &url);

        Self {
            url,
            app_name,
            app_version: None,
            framework: framework.into(),
            sdk: sdk_identifier(),
            v: "0.1".to_string(),
            deploy_type: "ping".to_string(),
            functions,
            capabilities: Capabilities::default(),
            deploy_id,
            hash,
        }
    }
}

fn self_identification_hash(app_name: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(app_name.as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Body of an in-band sync request from the Executor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InBandSyncRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub env: Option<String>,
}

/// Synchronous response to an in-band sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InBandSyncResponse {
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    pub framework: String,
    pub functions: Vec<FunctionConfig>,
    /// The same body the GET introspection endpoint serves.
    pub inspection: serde_json::Value,
    pub url: String,
    pub sdk_language: String,
    pub sdk_version: String,
    pub capabilities: Capabilities,
    /// Hosting platform, when detectable from the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

/// Best-effort platform detection from well-known hosting env vars.
pub fn detect_platform() -> Option<String> {
    let probes: &[(&str, &str)] = &[
        ("VERCEL", "vercel"),
        ("NETLIFY", "netlify"),
        ("AWS_LAMBDA_FUNCTION_NAME", "aws-lambda"),
        ("K_SERVICE", "cloud-run"),
        ("FLY_APP_NAME", "fly"),
        ("RAILWAY_ENVIRONMENT", "railway"),
    ];
    probes
        .iter()
        .find(|(var, _)| std::env::var_os(var).is_some())
        .map(|(_, name)| name.to_string())
}

/// Summary returned to the caller of an out-of-band PUT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutOfBandSyncResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<bool>,
}

/// Shape of the Executor's `/fn/register` reply.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterReply {
    #[serde(default)]
    pub ok: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub modified: Option<bool>,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}
