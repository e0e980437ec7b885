//! Session configuration.
//!
//! [`BridgeConfig`] is built with [`BridgeConfig::builder`], loaded from a
//! TOML file, or both: file values first, then `LLC_*` environment
//! overrides via [`BridgeConfig::apply_env`].

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BridgeError, Result};

/// Public LLC deployment used when no base URL is configured.
pub const DEFAULT_BASE_URL: &str = "https://liasparklivechat.onrender.com";

/// Port of the local development server used in local mode.
pub const DEFAULT_LOCAL_PORT: u16 = 8080;

/// Per-character delay used by `animate` when the caller passes none.
pub const DEFAULT_ANIMATE_INTERVAL: Duration = Duration::from_millis(50);

/// Deepest reply chain converted before truncation.
pub const DEFAULT_MAX_REPLY_DEPTH: usize = 64;

/// How echoes of our own sends are matched to the waiting call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMode {
    /// Match by the `correlationId` the echo carries back; echoes without one
    /// resolve the most recent pending send.
    #[default]
    Keyed,
    /// Always resolve the most recent pending send, whatever the echo says.
    Lifo,
}

/// Configuration for one bridge session.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Identity the bot connects as.
    pub username: String,
    /// Base URL of the LLC HTTP API.
    pub base_url: String,
    /// Pre-issued access token; skips the token request when set.
    pub token: Option<String>,
    /// Connect to `wss://localhost:<port>/ws` instead of the advertised socket.
    pub local: bool,
    pub port: u16,
    pub correlation: CorrelationMode,
    /// Upper bound on waiting for an echo. `None` waits until the echo
    /// arrives or the connection closes.
    pub echo_timeout: Option<Duration>,
    pub max_reply_depth: usize,
    /// Exit the process when the server reports a login failure.
    pub exit_on_login_failure: bool,
    /// Base delay before reconnecting after a close.
    pub reconnect_delay: Duration,
    pub animate_interval: Duration,
    /// TCP connection timeout for HTTP requests.
    pub connect_timeout: Duration,
    /// Per-request timeout for HTTP requests.
    pub request_timeout: Duration,
}

impl BridgeConfig {
    /// Create a config with defaults for `username`.
    ///
    /// - base_url: [`DEFAULT_BASE_URL`]
    /// - reconnect_delay: 1 s
    /// - connect_timeout: 3 s
    /// - request_timeout: 10 s
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            local: false,
            port: DEFAULT_LOCAL_PORT,
            correlation: CorrelationMode::Keyed,
            echo_timeout: None,
            max_reply_depth: DEFAULT_MAX_REPLY_DEPTH,
            exit_on_login_failure: true,
            reconnect_delay: Duration::from_secs(1),
            animate_interval: DEFAULT_ANIMATE_INTERVAL,
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Start building a config for `username`.
    pub fn builder(username: impl Into<String>) -> BridgeConfigBuilder {
        BridgeConfigBuilder::new(username)
    }

    /// Parse a TOML document. `username` is required.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|e| BridgeError::Config(e.to_string()))?;
        file.into_config()
    }

    /// Read and parse a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Apply `LLC_USERNAME`, `LLC_URL`, `LLC_TOKEN`, `LLC_LOCAL` and `LLC_PORT`.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(username) = env::var("LLC_USERNAME") {
            self.username = username;
        }
        if let Ok(url) = env::var("LLC_URL") {
            self.base_url = url;
        }
        if let Ok(token) = env::var("LLC_TOKEN") {
            self.token = Some(token);
        }
        if let Ok(local) = env::var("LLC_LOCAL") {
            self.local = matches!(local.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(port) = env::var("LLC_PORT") {
            self.port = port
                .parse()
                .map_err(|_| BridgeError::Config(format!("LLC_PORT is not a port: {port}")))?;
        }
        Ok(())
    }

    /// Socket URL used in local mode.
    pub fn local_ws_url(&self) -> String {
        format!("wss://localhost:{}/ws", self.port)
    }
}

/// Builder for [`BridgeConfig`].
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            config: BridgeConfig::new(username),
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.token = Some(token.into());
        self
    }

    /// Enable local mode on `port`.
    pub fn local(mut self, port: u16) -> Self {
        self.config.local = true;
        self.config.port = port;
        self
    }

    pub fn correlation(mut self, mode: CorrelationMode) -> Self {
        self.config.correlation = mode;
        self
    }

    pub fn echo_timeout(mut self, timeout: Duration) -> Self {
        self.config.echo_timeout = Some(timeout);
        self
    }

    pub fn max_reply_depth(mut self, depth: usize) -> Self {
        self.config.max_reply_depth = depth;
        self
    }

    pub fn exit_on_login_failure(mut self, exit: bool) -> Self {
        self.config.exit_on_login_failure = exit;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    pub fn animate_interval(mut self, interval: Duration) -> Self {
        self.config.animate_interval = interval;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn build(self) -> BridgeConfig {
        self.config
    }
}

/// On-disk shape. Durations are whole milliseconds.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    username: Option<String>,
    base_url: Option<String>,
    token: Option<String>,
    local: Option<bool>,
    port: Option<u16>,
    correlation: Option<CorrelationMode>,
    echo_timeout_ms: Option<u64>,
    max_reply_depth: Option<usize>,
    exit_on_login_failure: Option<bool>,
    reconnect_delay_ms: Option<u64>,
    animate_interval_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
}

impl ConfigFile {
    fn into_config(self) -> Result<BridgeConfig> {
        let username = self
            .username
            .filter(|u| !u.is_empty())
            .ok_or_else(|| BridgeError::Config("username is required".into()))?;

        let mut config = BridgeConfig::new(username);
        if let Some(v) = self.base_url {
            config.base_url = v;
        }
        config.token = self.token;
        if let Some(v) = self.local {
            config.local = v;
        }
        if let Some(v) = self.port {
            config.port = v;
        }
        if let Some(v) = self.correlation {
            config.correlation = v;
        }
        config.echo_timeout = self.echo_timeout_ms.map(Duration::from_millis);
        if let Some(v) = self.max_reply_depth {
            config.max_reply_depth = v;
        }
        if let Some(v) = self.exit_on_login_failure {
            config.exit_on_login_failure = v;
        }
        if let Some(v) = self.reconnect_delay_ms {
            config.reconnect_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.animate_interval_ms {
            config.animate_interval = Duration::from_millis(v);
        }
        if let Some(v) = self.connect_timeout_ms {
            config.connect_timeout = Duration::from_millis(v);
        }
        if let Some(v) = self.request_timeout_ms {
            config.request_timeout = Duration::from_millis(v);
        }
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
