use config::{Config, ConfigError, Environment};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

/// Default cloud API origin.
pub const DEFAULT_BASE_URL: &str = "https://api.inngest.com";
/// Default event-ingestion origin.
pub const DEFAULT_EVENT_API_BASE_URL: &str = "https://inn.gs";
/// Default path the serve handler is mounted at.
pub const DEFAULT_SERVE_PATH: &str = "/api/inngest";

/// Whether the SDK is talking to the hosted Executor or a local dev server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Production: signatures are required and verified.
    Cloud,
    /// Development: any request is accepted.
    Dev,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Cloud => "cloud",
            Mode::Dev => "dev",
        }
    }
}

/// Instance configuration, built once at startup and passed to everything.
///
/// Values come from the environment (`INNGEST_*` variables) or from the
/// builder methods. Secret material never appears in `Debug` output.
#[derive(Debug, Clone, Deserialize)]
pub struct SdkConfig {
    /// Key used to verify incoming and sign outgoing payloads.
    #[serde(default)]
    pub signing_key: Option<Secret<String>>,
    /// Retried when the primary key fails verification (key rotation).
    #[serde(default)]
    pub signing_key_fallback: Option<Secret<String>>,
    /// Key used to publish events to the event API.
    #[serde(default)]
    pub event_key: Option<Secret<String>>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Overrides `base_url` for Executor API calls (registration).
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default = "default_event_api_base_url")]
    pub event_api_base_url: String,
    /// Absolute origin the serve handler is reachable at; when unset the
    /// handler infers it from the incoming request.
    #[serde(default)]
    pub serve_origin: Option<String>,
    #[serde(default = "default_serve_path")]
    pub serve_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Stream POST responses with a keepalive heartbeat.
    #[serde(default)]
    pub streaming: bool,
    /// `"1"` or a dev-server URL puts the instance in dev mode.
    #[serde(default)]
    pub dev: Option<String>,
    #[serde(default = "default_true")]
    pub allow_in_band_sync: bool,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_event_api_base_url() -> String {
    DEFAULT_EVENT_API_BASE_URL.to_string()
}

fn default_serve_path() -> String {
    DEFAULT_SERVE_PATH.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            signing_key: None,
            signing_key_fallback: None,
            event_key: None,
            base_url: default_base_url(),
            api_base_url: None,
            event_api_base_url: default_event_api_base_url(),
            serve_origin: None,
            serve_path: default_serve_path(),
            log_level: default_log_level(),
            streaming: false,
            dev: None,
            allow_in_band_sync: true,
        }
    }
}

impl SdkConfig {
    /// Load from `INNGEST_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let builder = Config::builder().add_source(
            Environment::with_prefix("INNGEST")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn mode(&self) -> Mode {
        match self.dev.as_deref() {
            Some(v) if !v.is_empty() && v != "0" && v != "false" => Mode::Dev,
            _ => Mode::Cloud,
        }
    }

    /// Dev-server origin when `dev` carries a URL rather than a bare flag.
    pub fn dev_server_url(&self) -> Option<&str> {
        match self.dev.as_deref() {
            Some(v) if v.starts_with("http://") || v.starts_with("https://") => Some(v),
            _ => None,
        }
    }

    /// Origin for Executor API calls, preferring the explicit override.
    pub fn api_base_url(&self) -> &str {
        match self.mode() {
            Mode::Dev => self.dev_server_url().unwrap_or(&self.base_url),
            Mode::Cloud => self.api_base_url.as_deref().unwrap_or(&self.base_url),
        }
    }

    pub fn signing_key(&self) -> Option<&str> {
        self.signing_key.as_ref().map(|k| k.expose_secret().as_str())
    }

    pub fn signing_key_fallback(&self) -> Option<&str> {
        self.signing_key_fallback
            .as_ref()
            .map(|k| k.expose_secret().as_str())
    }

    pub fn event_key(&self) -> Option<&str> {
        self.event_key.as_ref().map(|k| k.expose_secret().as_str())
    }

    pub fn with_signing_key(mut self, key: impl Into<String>) -> Self {
        self.signing_key = Some(Secret::new(key.into()));
        self
    }

    pub fn with_signing_key_fallback(mut self, key: impl Into<String>) -> Self {
        self.signing_key_fallback = Some(Secret::new(key.into()));
        self
    }

    pub fn with_event_key(mut self, key: impl Into<String>) -> Self {
        self.event_key = Some(Secret::new(key.into()));
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_serve_origin(mut self, origin: impl Into<String>) -> Self {
        self.serve_origin = Some(origin.into());
        self
    }

    pub fn with_serve_path(mut self, path: impl Into<String>) -> Self {
        self.serve_path = path.into();
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_dev(mut self, dev: impl Into<String>) -> Self {
        self.dev = Some(dev.into());
        self
    }

    pub fn with_allow_in_band_sync(mut self, allow: bool) -> Self {
        self.allow_in_band_sync = allow;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SdkConfig::default();

        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.event_api_base_url, DEFAULT_EVENT_API_BASE_URL);
        assert_eq!(config.serve_path, DEFAULT_SERVE_PATH);
        assert_eq!(config.mode(), Mode::Cloud);
        assert!(config.allow_in_band_sync);
        assert!(!config.streaming);
        assert!(config.signing_key().is_none());
    }

    #[test]
    fn test_dev_mode_detection() {
        assert_eq!(SdkConfig::default().with_dev("1").mode(), Mode::Dev);
        assert_eq!(
            SdkConfig::default().with_dev("http://localhost:8288").mode(),
            Mode::Dev
        );
        assert_eq!(SdkConfig::default().with_dev("0").mode(), Mode::Cloud);
        assert_eq!(SdkConfig::default().mode(), Mode::Cloud);
    }

    #[test]
    fn test_dev_server_url() {
        let config = SdkConfig::default().with_dev("http://localhost:8288");
        assert_eq!(config.dev_server_url(), Some("http://localhost:8288"));
        assert_eq!(config.api_base_url(), "http://localhost:8288");

        let config = SdkConfig::default().with_dev("1");
        assert_eq!(config.dev_server_url(), None);
    }

    #[test]
    fn test_api_base_url_override() {
        let mut config = SdkConfig::default();
        assert_eq!(config.api_base_url(), DEFAULT_BASE_URL);

        config.api_base_url = Some("https://api.example.com".to_string());
        assert_eq!(config.api_base_url(), "https://api.example.com");
    }

    #[test]
    fn test_secret_accessors() {
        let config = SdkConfig::default()
            .with_signing_key("signkey-prod-abc")
            .with_signing_key_fallback("signkey-prod-old")
            .with_event_key("evt-key");

        assert_eq!(config.signing_key(), Some("signkey-prod-abc"));
        assert_eq!(config.signing_key_fallback(), Some("signkey-prod-old"));
        assert_eq!(config.event_key(), Some("evt-key"));
    }

    #[test]
    fn test_secrets_redacted_in_debug() {
        let config = SdkConfig::default().with_signing_key("signkey-prod-abc");
        let dump = format!("{:?}", config);
        assert!(!dump.contains("signkey-prod-abc"));
    }
}
