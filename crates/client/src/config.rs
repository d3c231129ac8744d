//! Client configuration from environment variables.
//!
//! The socket endpoint is resolved once, when the configuration is built.
//! Reconnect attempts reuse it; only the credential is fetched again.

use std::time::Duration;

use alertdesk_shared::is_local_address;
use url::Url;

use crate::error::ConfigError;
use crate::ws::ReconnectConfig;

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_WS_PATH: &str = "/api/ws";
pub const DEFAULT_TOKEN_PARAM: &str = "token";

/// Resolved settings for a [`ConnectionManager`](crate::ws::ConnectionManager).
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    socket_url: Url,
    token_param: String,
    pub reconnect: ReconnectConfig,
}

impl RealtimeConfig {
    /// Configuration for `api_url` with the default socket path and reconnect policy.
    pub fn new(api_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            socket_url: resolve_socket_url(api_url, DEFAULT_WS_PATH)?,
            token_param: DEFAULT_TOKEN_PARAM.to_string(),
            reconnect: ReconnectConfig::default(),
        })
    }

    /// Read configuration from the process environment.
    ///
    /// Environment variables:
    /// - `ALERTDESK_API_URL`: console API base URL (default: "http://localhost:8080")
    /// - `ALERTDESK_WS_PATH`: socket path under the API (default: "/api/ws")
    /// - `ALERTDESK_TOKEN_PARAM`: query parameter carrying the credential (default: "token")
    /// - `ALERTDESK_RECONNECT_MAX_ATTEMPTS`: retry ceiling (default: 5)
    /// - `ALERTDESK_RECONNECT_BASE_DELAY_MS`: first retry delay (default: 1000)
    /// - `ALERTDESK_RECONNECT_MAX_DELAY_MS`: optional cap on the retry delay (default: none)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = lookup("ALERTDESK_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let ws_path = lookup("ALERTDESK_WS_PATH").unwrap_or_else(|| DEFAULT_WS_PATH.to_string());
        let token_param =
            lookup("ALERTDESK_TOKEN_PARAM").unwrap_or_else(|| DEFAULT_TOKEN_PARAM.to_string());

        let mut reconnect = ReconnectConfig::default();
        if let Some(value) = lookup("ALERTDESK_RECONNECT_MAX_ATTEMPTS") {
            reconnect.max_attempts = parse_number("ALERTDESK_RECONNECT_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("ALERTDESK_RECONNECT_BASE_DELAY_MS") {
            reconnect.base_delay = Duration::from_millis(parse_number(
                "ALERTDESK_RECONNECT_BASE_DELAY_MS",
                &value,
            )?);
        }
        if let Some(value) = lookup("ALERTDESK_RECONNECT_MAX_DELAY_MS") {
            reconnect.max_delay = Some(Duration::from_millis(parse_number(
                "ALERTDESK_RECONNECT_MAX_DELAY_MS",
                &value,
            )?));
        }

        Ok(Self {
            socket_url: resolve_socket_url(&api_url, &ws_path)?,
            token_param,
            reconnect,
        })
    }

    pub fn with_token_param(mut self, name: impl Into<String>) -> Self {
        self.token_param = name.into();
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// The socket URL without a credential attached.
    pub fn socket_url(&self) -> &Url {
        &self.socket_url
    }

    /// The socket URL carrying `token` as a query parameter.
    pub fn authenticated_url(&self, token: &str) -> Url {
        let mut url = self.socket_url.clone();
        url.query_pairs_mut().append_pair(&self.token_param, token);
        url
    }
}

/// Turn a console API URL into the WebSocket URL for `path`.
///
/// `https` maps to `wss` and `http` to `ws`. A bare host gets `ws` when it is
/// a local address and `wss` otherwise.
pub fn resolve_socket_url(api_url: &str, path: &str) -> Result<Url, ConfigError> {
    let trimmed = api_url.trim().trim_end_matches('/');
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else if is_local_address(trimmed) {
        format!("ws://{trimmed}")
    } else {
        format!("wss://{trimmed}")
    };

    let mut url = Url::parse(&with_scheme).map_err(|source| ConfigError::InvalidEndpoint {
        endpoint: api_url.to_string(),
        source,
    })?;

    let ws_scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(ws_scheme)
        .map_err(|_| ConfigError::UnsupportedScheme(ws_scheme.to_string()))?;

    if url.host_str().is_none() {
        return Err(ConfigError::MissingHost(api_url.to_string()));
    }

    let joined = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url.set_fragment(None);
    Ok(url)
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        var,
        value: value.to_string(),
    })
}
